//! Process-wide state realized as one explicit context object rather than
//! true globals: the active-queue set depth tracker,
//! the backpressure gate, and the arrival-timestamp clock all live here,
//! threaded from the CLI entry point down through pipeline construction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared runtime context injected into every pipeline this process runs.
/// There is exactly one per process, but it is not a `static` — it is an
/// `Arc` passed explicitly, so tests can construct an isolated instance.
pub struct EngineContext {
    backpressure_gate: AtomicBool,
    parse_buffer_size: Option<u64>,
}

impl EngineContext {
    pub fn new() -> Arc<Self> {
        Self::with_parse_buffer_size(None)
    }

    /// `parse_buffer_size` overrides an input adapter's default line/chunk
    /// buffer size (e.g. stdin's `max_line_length`) when the adapter's own
    /// options don't set one explicitly.
    pub fn with_parse_buffer_size(parse_buffer_size: Option<u64>) -> Arc<Self> {
        Arc::new(Self {
            backpressure_gate: AtomicBool::new(false),
            parse_buffer_size,
        })
    }

    pub fn parse_buffer_size(&self) -> Option<u64> {
        self.parse_buffer_size
    }

    pub fn backpressure_active(&self) -> bool {
        self.backpressure_gate.load(Ordering::Relaxed)
    }

    pub fn set_backpressure(&self, active: bool) {
        self.backpressure_gate.store(active, Ordering::Relaxed);
    }

    /// The arrival timestamp stamped on new trace points: Unix seconds.
    pub fn arrival_timestamp(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}
