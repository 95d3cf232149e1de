//! # CDP I/O - input adapters, sinks, and the external processor bridge
//!
//! This crate provides the concrete boundary collaborators named in the
//! spec's External Interfaces: the two reference input forms (`generator`,
//! `stdin`), the two reference sink forms (`send-stdout`, `send-dead-letter`),
//! and the processor bridge that fronts an external `jq`/`jsonnet` child
//! process as a step function.
//!
//! Every other transport (HTTP, AMQP, MQTT, Redis, file-tail, polling)
//! remains specified only by boundary contract and is not implemented here;
//!
//! This crate depends on `cdp-core` but not on `cdp-tx`, so the two can be
//! composed independently by the CLI without a cycle.

#![allow(unused)]

/// Transient I/O and processor-bridge error taxonomy, folded into
/// [`cdp_core::CdpError`] at this crate's boundary.
pub mod error;

/// Long-running child-process JSON transducer (`jq`/`jsonnet`) exposed as a
/// step function, plus the process-wide health registry.
pub mod processor;

/// Timer-driven synthetic event source, used for tests and demos.
pub mod source_generator;

/// Newline-delimited JSON event source reading the process's stdin.
pub mod source_stdin;

/// `send-stdout`: prints each event (optionally jq-transformed) and forwards
/// the batch unchanged.
pub mod sink_stdout;

/// `send-dead-letter`: explicitly routes a batch to the dead-letter
/// destination and forwards it unchanged.
pub mod sink_dead_letter;

use std::sync::Arc;

use cdp_core::context::EngineContext;
use cdp_core::dag::StepFunction;
use cdp_core::queue::BoxChannel;
use cdp_core::step::FunctionSpec;
use cdp_core::{CdpError, Event, Result};
use tokio::task::JoinHandle;

use processor::{ProcessorBridge, ProcessorKind, ProcessorRegistry};

/// The input form adapter contract: a channel that only produces
/// (`send` always returns `false`) plus a handle that resolves when the
/// source ends from external causes.
pub type InputChannel = BoxChannel<serde_json::Value, serde_json::Value>;

/// Instantiates the named input form. Only `generator` and `stdin` are
/// implemented; any other name is a template error surfaced at validation
/// time, not a runtime panic.
pub fn make_input(
    form: &str,
    options: &serde_json::Value,
    context: Arc<EngineContext>,
) -> Result<(InputChannel, JoinHandle<()>)> {
    match form {
        "generator" => {
            let opts: source_generator::GeneratorOptions =
                serde_json::from_value(options.clone()).map_err(CdpError::Json)?;
            Ok(source_generator::spawn(opts, context))
        }
        "stdin" => {
            let opts: source_stdin::StdinOptions =
                serde_json::from_value(options.clone()).map_err(CdpError::Json)?;
            Ok(source_stdin::spawn(opts, context))
        }
        other => Err(CdpError::InvalidTemplate(format!(
            "unknown input form '{other}': only 'generator' and 'stdin' are implemented"
        ))),
    }
}

/// Builds the step function for `spec` if it is one of this crate's kinds
/// (the processor-bridged forms and the sink forms). Returns `Ok(None)` for
/// the built-in pure functions so the caller falls through to
/// `cdp_tx::create_function`.
pub async fn create_function(
    spec: &FunctionSpec,
    step_name: &str,
    registry: &ProcessorRegistry,
) -> Result<Option<Arc<dyn StepFunction>>> {
    let function: Arc<dyn StepFunction> = match spec {
        FunctionSpec::Jq { jq_expr } => {
            let bridge = ProcessorBridge::spawn(ProcessorKind::Jq, jq_expr, step_name).await?;
            registry.register(bridge.clone()).await;
            Arc::new(processor::BridgedFunction::new(bridge))
        }
        FunctionSpec::Jsonnet { jsonnet_expr } => {
            let bridge =
                ProcessorBridge::spawn(ProcessorKind::Jsonnet, jsonnet_expr, step_name).await?;
            registry.register(bridge.clone()).await;
            Arc::new(processor::BridgedFunction::new(bridge))
        }
        FunctionSpec::SendStdout { jq_expr } => {
            let bridge = match jq_expr {
                Some(expr) => {
                    let bridge = ProcessorBridge::spawn(ProcessorKind::Jq, expr, step_name).await?;
                    registry.register(bridge.clone()).await;
                    Some(bridge)
                }
                None => None,
            };
            Arc::new(sink_stdout::SendStdout::new(bridge))
        }
        FunctionSpec::SendDeadLetter {} => Arc::new(sink_dead_letter::SendDeadLetter::new(step_name)),
        FunctionSpec::KeepN { .. }
        | FunctionSpec::KeepWhen { .. }
        | FunctionSpec::Deduplicate { .. }
        | FunctionSpec::Rename { .. } => return Ok(None),
    };
    Ok(Some(function))
}

/// Wraps a raw input channel's decoded JSON values into parsed [`Event`]s
/// via the new-event parser: each value is flattened through
/// [`cdp_core::event::parse_vector`] and stamped with a trace point derived
/// from the current arrival timestamp and this pipeline's identity. Built
/// on [`cdp_core::queue::FlatMapChannel`] rather than a bespoke adapter,
/// since "apply a function to each received value" is exactly what that
/// combinator already is.
pub fn into_event_channel(
    raw: InputChannel,
    pipeline_name: String,
    pipeline_signature: String,
    context: Arc<EngineContext>,
) -> BoxChannel<serde_json::Value, Event> {
    cdp_core::queue::FlatMapChannel::new(raw, move |value: serde_json::Value| {
        let arrival = context.arrival_timestamp();
        let name_ref: &str = pipeline_name.as_str();
        let sig_ref: &str = pipeline_signature.as_str();
        cdp_core::event::parse_vector(value, move |raw_event| {
            cdp_core::event::parse_new_event(raw_event, arrival, name_ref, sig_ref)
        })
    })
}
