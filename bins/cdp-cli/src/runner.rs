//! Pipeline API glue: turns a validated [`PipelineTemplate`]
//! into a running [`cdp_core::dag::Engine`], wiring in the concrete input
//! adapter, step functions, backpressure supervisor, metrics endpoint, and
//! health monitor. This lives in the CLI binary, not `cdp-core`, because it
//! is the one place that is allowed to depend on both `cdp-io` and `cdp-tx`
//! without creating a cycle between them.

use std::collections::HashMap;
use std::sync::Arc;

use cdp_core::context::EngineContext;
use cdp_core::dag::{Engine, StepRuntimeSpec};
use cdp_core::event::Event;
use cdp_core::pipeline::PipelineTemplate;
use cdp_core::{CdpError, Result};
use cdp_io::processor::ProcessorRegistry;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::RuntimeConfig;

/// Everything spawned by [`run`] that the caller must hold onto to drive a
/// clean shutdown: the running engine, the processor registry it fed into
/// every bridged step, and the root cancellation token that fans out to the
/// input pump, health monitor, backpressure supervisor, and metrics server.
pub struct RunningPipeline {
    pub engine: Arc<Engine>,
    pub registry: Arc<ProcessorRegistry>,
    pub cancel: CancellationToken,
    input_pump: tokio::task::JoinHandle<()>,
    input_drain_timeout: std::time::Duration,
    health_monitor: tokio::task::JoinHandle<()>,
    backpressure: tokio::task::JoinHandle<()>,
}

impl RunningPipeline {
    /// Cancels every background
    /// task, then drives the engine's ordered shutdown and returns the
    /// accumulated dead letters.
    ///
    /// The input pump is an external adapter (stdin, generator, a processor
    /// bridge) that may not notice cancellation promptly; it is bounded by
    /// `input_drain_timeout` so a stuck adapter can't hang shutdown forever.
    pub async fn stop(self) -> Vec<Event> {
        self.cancel.cancel();
        if tokio::time::timeout(self.input_drain_timeout, self.input_pump)
            .await
            .is_err()
        {
            warn!("input pump did not exit within the drain timeout, continuing shutdown anyway");
        }
        let _ = self.health_monitor.await;
        let _ = self.backpressure.await;
        let dead = self.engine.shutdown().await;
        self.registry.close_all().await;
        dead
    }

    /// Resolves when the input adapter ends from external causes, without
    /// anyone calling `stop`.
    pub async fn wait_input_exhausted(&self) {
        // `input_pump` is consumed by `stop`, so callers that want to race
        // "input ended" against a signal should select on the cancel token
        // going down instead.
        self.cancel.cancelled().await;
    }
}

/// Builds and starts every step's runtime spec, the DAG engine, the input
/// pump, the health monitor, and the backpressure supervisor. Does not start
/// the metrics endpoint; the CLI does that separately since it also owns the
/// `RuntimeConfig` the port/path come from.
pub async fn run(
    template: PipelineTemplate,
    context: Arc<EngineContext>,
    config: &RuntimeConfig,
) -> Result<RunningPipeline> {
    let registry = ProcessorRegistry::new();
    let signature = template.signature();

    let mut specs = HashMap::new();
    for (name, def) in &template.steps {
        let pattern = def
            .pattern_def
            .as_ref()
            .map(|p| p.resolve())
            .transpose()?
            .flatten();
        let (mode, function_spec) = def.function.resolve()?;

        let function = match cdp_tx::create_function(&function_spec)? {
            Some(f) => f,
            None => cdp_io::create_function(&function_spec, name, &registry)
                .await?
                .ok_or_else(|| {
                    CdpError::InvalidOptions {
                        step: name.clone(),
                        reason: "no implementation for this function kind".to_string(),
                    }
                })?,
        };

        specs.insert(
            name.clone(),
            StepRuntimeSpec {
                pattern,
                window: def.window,
                mode,
                function,
            },
        );
    }

    let engine = Engine::build(
        template.name.clone(),
        &template.steps,
        specs,
        config.queue_drain_grace_period,
    )?;

    let (raw_input, input_done) = cdp_io::make_input(&template.input_form, &template.input_options, context.clone())?;
    let event_channel = cdp_io::into_event_channel(
        raw_input,
        template.name.clone(),
        signature,
        context.clone(),
    );

    let cancel = CancellationToken::new();

    let pump_engine = engine.clone();
    let pump_channel = event_channel.clone();
    let pump_cancel = cancel.clone();
    let pipeline_name = template.name.clone();
    let input_pump = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = pump_cancel.cancelled() => break,
                ev = pump_channel.recv() => {
                    match ev {
                        Some(event) => {
                            pump_engine.feed_input(event).await;
                        }
                        None => {
                            info!(pipeline = %pipeline_name, "input adapter exhausted");
                            break;
                        }
                    }
                }
            }
        }
        let _ = input_done.await;
        pump_channel.close().await;
    });

    let health_registry = registry.clone();
    let health_cancel = cancel.clone();
    let health_interval = config.health_check_interval;
    let health_pipeline = template.name.clone();
    let health_monitor = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(health_interval);
        loop {
            tokio::select! {
                _ = health_cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if !health_registry.all_healthy().await {
                        warn!(pipeline = %health_pipeline, "processor bridge died, initiating shutdown");
                        health_cancel.cancel();
                        break;
                    }
                }
            }
        }
    });

    let bp_engine = engine.clone();
    let backpressure = cdp_core::backpressure::spawn(
        context.clone(),
        config.backpressure_thresholds,
        config.backpressure_interval,
        move || bp_engine.queued_events() as u64,
        cancel.child_token(),
    );

    Ok(RunningPipeline {
        engine,
        registry,
        cancel,
        input_pump,
        input_drain_timeout: config.input_drain_timeout,
        health_monitor,
        backpressure,
    })
}

/// Substitutes `${VAR}` occurrences in `text` from the process environment,
/// per the `-e`/`--environment` flag. A reference to an unset
/// variable is left untouched rather than erroring, since the document may
/// legitimately contain a literal `${...}` the author didn't intend as a
/// substitution (e.g. inside a `jsonnet-expr` string).
pub fn substitute_environment(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let var_name = &after[..end];
                match std::env::var(var_name) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => {
                        out.push_str("${");
                        out.push_str(var_name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str("${");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_variables_and_leaves_unknown_ones_untouched() {
        std::env::set_var("CDP_TEST_SUBST_VAR", "value");
        let out = substitute_environment("name: ${CDP_TEST_SUBST_VAR}, other: ${CDP_TEST_UNSET_VAR}");
        assert_eq!(out, "name: value, other: ${CDP_TEST_UNSET_VAR}");
        std::env::remove_var("CDP_TEST_SUBST_VAR");
    }

    #[test]
    fn text_without_placeholders_is_unchanged() {
        assert_eq!(substitute_environment("no placeholders here"), "no placeholders here");
    }
}
