//! Backpressure supervisor: periodic sampling of memory/queue
//! thresholds that drives a process-wide boolean gate.

use std::sync::Arc;
use std::time::Duration;

use metrics::gauge;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::context::EngineContext;

/// Thresholds read from the `BACKPRESSURE_*` environment variables.
/// Any configured threshold set to `None` is never tripped.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackpressureThresholds {
    pub rss_bytes: Option<u64>,
    pub heap_total_bytes: Option<u64>,
    pub heap_used_bytes: Option<u64>,
    pub queued_events: Option<u64>,
}

/// Samples process memory and a caller-supplied queue-depth function at
/// `interval`, raising or lowering `context`'s gate. The task is spawned by
/// [`spawn`] and must be cancelled via `cancel` before the metrics
/// exposition endpoint is closed.
pub fn spawn<F>(
    context: Arc<EngineContext>,
    thresholds: BackpressureThresholds,
    interval: Duration,
    queued_events: F,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()>
where
    F: Fn() -> u64 + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let depth = queued_events();
                    let memory = read_process_memory();
                    let tripped = thresholds
                        .queued_events
                        .is_some_and(|max| depth > max)
                        || thresholds.rss_bytes.is_some_and(|max| memory.rss > max)
                        || thresholds
                            .heap_total_bytes
                            .is_some_and(|max| memory.heap_total > max)
                        || thresholds
                            .heap_used_bytes
                            .is_some_and(|max| memory.heap_used > max);

                    gauge!("backpressure").set(if tripped { 1.0 } else { 0.0 });
                    if tripped != context.backpressure_active() {
                        info!(tripped, depth, "backpressure gate flipped");
                        context.set_backpressure(tripped);
                    }
                }
            }
        }
    })
}

struct MemorySample {
    rss: u64,
    heap_total: u64,
    heap_used: u64,
}

/// Reads resident set size from `/proc/self/statm` on Linux. Rust has no
/// portable heap-total/heap-used equivalent to a V8-style heap, so both
/// fields mirror RSS; any configured `heapTotal`/`heapUsed` threshold is
/// evaluated against the same process-memory figure.
fn read_process_memory() -> MemorySample {
    let rss = std::fs::read_to_string("/proc/self/statm")
        .ok()
        .and_then(|contents| {
            let pages: u64 = contents.split_whitespace().nth(1)?.parse().ok()?;
            Some(pages * page_size())
        })
        .unwrap_or(0);
    MemorySample {
        rss,
        heap_total: rss,
        heap_used: rss,
    }
}

fn page_size() -> u64 {
    4096
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test(start_paused = true)]
    async fn trips_gate_when_queue_depth_exceeds_threshold() {
        let context = EngineContext::new();
        let depth = Arc::new(AtomicU64::new(0));
        let depth_clone = depth.clone();
        let cancel = CancellationToken::new();
        let handle = spawn(
            context.clone(),
            BackpressureThresholds {
                queued_events: Some(5),
                ..Default::default()
            },
            Duration::from_millis(10),
            move || depth_clone.load(Ordering::Relaxed),
            cancel.clone(),
        );

        tokio::time::advance(Duration::from_millis(15)).await;
        tokio::task::yield_now().await;
        assert!(!context.backpressure_active());

        depth.store(10, Ordering::Relaxed);
        tokio::time::advance(Duration::from_millis(15)).await;
        tokio::task::yield_now().await;
        assert!(context.backpressure_active());

        cancel.cancel();
        let _ = handle.await;
    }
}
