//! `generator`: a timer-driven synthetic event source, one of the two
//! reference input adapters used to exercise the engine end to end.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cdp_core::context::EngineContext;
use cdp_core::queue::{BoxChannel, Channel, Queue, QueueChannel};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorOptions {
    /// Interval between ticks, in seconds.
    pub seconds: f64,
}

/// Emits a `generator.tick` event, with an incrementing counter as its
/// `data`, at a fixed interval. While the backpressure gate is up, the
/// adapter skips the tick entirely ("pull-based adapters skip a
/// polling tick") rather than buffering it.
pub fn spawn(
    options: GeneratorOptions,
    context: Arc<EngineContext>,
) -> (BoxChannel<Value, Value>, JoinHandle<()>) {
    let queue = Queue::new("input::generator");
    let channel = QueueChannel::new(queue.clone());
    let counter = AtomicI64::new(0);

    let handle = tokio::spawn(async move {
        let period = Duration::from_secs_f64(options.seconds.max(0.001));
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            if context.backpressure_active() {
                debug!("generator skipping tick: backpressure gate is up");
                continue;
            }
            let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
            let raw = json!({"n": "generator.tick", "d": n});
            if !queue.push(raw).await {
                break;
            }
        }
    });

    (channel, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn emits_incrementing_ticks_until_closed() {
        let context = EngineContext::new();
        let (channel, handle) = spawn(GeneratorOptions { seconds: 0.01 }, context);

        // Drain concurrently: closing while items are pending would otherwise
        // deadlock on `wait_drained` since nothing else is consuming them.
        let reader_channel = channel.clone();
        let reader = tokio::spawn(async move {
            let mut out = Vec::new();
            while let Some(v) = reader_channel.recv().await {
                out.push(v["d"].as_i64().unwrap());
            }
            out
        });

        tokio::time::advance(Duration::from_millis(35)).await;
        channel.close().await;
        let _ = handle.await;
        let counts = reader.await.unwrap();

        assert!(counts.len() >= 2, "expected at least a couple of ticks, got {counts:?}");
        let sorted = {
            let mut c = counts.clone();
            c.sort();
            c
        };
        assert_eq!(counts, sorted, "ticks must arrive in increasing order");
    }

    #[tokio::test(start_paused = true)]
    async fn skips_ticks_while_backpressure_gate_is_up() {
        let context = EngineContext::new();
        context.set_backpressure(true);
        let (channel, handle) = spawn(GeneratorOptions { seconds: 0.01 }, context);

        tokio::time::advance(Duration::from_millis(35)).await;
        channel.close().await;
        let _ = handle.await;

        assert!(channel.recv().await.is_none());
    }
}
