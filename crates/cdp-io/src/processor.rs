//! External processor bridge: a long-running child process that
//! consumes one JSON value per input line on its stdin and emits zero or
//! more JSON values per line on its stdout.
//!
//! The two backends named in the design notes (`jq`, `jsonnet`) sit behind
//! one [`ProcessorKind`] enum so that adding a backend is a matter of adding
//! a variant, not touching the bridge. This bridge pairs exactly one input
//! line with exactly one output line per [`ProcessorBridge::apply`] call —
//! see the note on that method for why.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cdp_core::dag::StepFunction;
use cdp_core::queue::Queue;
use cdp_core::{CdpError, Event, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::IoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorKind {
    Jq,
    Jsonnet,
}

impl ProcessorKind {
    fn executable(self) -> &'static str {
        match self {
            ProcessorKind::Jq => "jq",
            ProcessorKind::Jsonnet => "jsonnet",
        }
    }

    /// Each backend's expression is passed as a single argument, and both
    /// are asked for compact, one-value-per-invocation output so the
    /// bridge's one-line-in, one-line-out pairing holds.
    fn args(self, expr: &str) -> Vec<String> {
        match self {
            ProcessorKind::Jq => vec!["-c".to_string(), expr.to_string()],
            ProcessorKind::Jsonnet => vec!["-e".to_string(), expr.to_string()],
        }
    }
}

/// One child process plus its stdin buffer channel and stdout receive loop.
pub struct ProcessorBridge {
    name: String,
    child: Mutex<Child>,
    pid: Option<u32>,
    stdin_queue: Arc<Queue<Value>>,
    writer: Mutex<Option<tokio::task::JoinHandle<()>>>,
    output_queue: Arc<Queue<Value>>,
    reader: Mutex<Option<tokio::task::JoinHandle<()>>>,
    dead: Arc<AtomicBool>,
}

impl ProcessorBridge {
    /// Resolves `kind`'s executable against `PATH`, spawns it with piped
    /// stdin/stdout and inherited stderr, and wires the buffer channel (A)
    /// feeding stdin plus the stream-decoder-backed receive sequence from
    /// stdout.
    pub async fn spawn(kind: ProcessorKind, expr: &str, step_name: &str) -> Result<Arc<Self>> {
        let resolved = which::which(kind.executable())
            .map_err(|e| IoError::ExecutableNotFound {
                executable: kind.executable().to_string(),
                source: e,
            })
            .map_err(|e| CdpError::InvalidOptions {
                step: step_name.to_string(),
                reason: e.to_string(),
            })?;

        let mut child = Command::new(resolved)
            .args(kind.args(expr))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(IoError::Spawn)
            .map_err(|e| CdpError::InvalidOptions {
                step: step_name.to_string(),
                reason: e.to_string(),
            })?;
        let pid = child.id();
        info!(step = %step_name, executable = %kind.executable(), ?pid, "processor bridge spawned");

        let mut stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");

        let stdin_queue = Queue::new(format!("{step_name}::processor-stdin"));
        let output_queue = Queue::new(format!("{step_name}::processor-stdout"));
        let dead = Arc::new(AtomicBool::new(false));

        let writer_queue = stdin_queue.clone();
        let writer_dead = dead.clone();
        let writer_name = step_name.to_string();
        let writer = tokio::spawn(async move {
            while let Some(value) = writer_queue.receive().await {
                let mut line = value.to_string();
                line.push('\n');
                if let Err(e) = stdin.write_all(line.as_bytes()).await {
                    warn!(step = %writer_name, error = %e, "processor stdin write failed");
                    writer_dead.store(true, Ordering::SeqCst);
                    break;
                }
                if let Err(e) = stdin.flush().await {
                    warn!(step = %writer_name, error = %e, "processor stdin flush failed");
                    writer_dead.store(true, Ordering::SeqCst);
                    break;
                }
            }
            // Dropping `stdin` here closes the write half so the child
            // observes EOF even if the queue closed before a write error.
            drop(stdin);
        });

        let reader_output = output_queue.clone();
        let reader_dead = dead.clone();
        let reader_name = step_name.to_string();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match serde_json::from_str::<Value>(&line) {
                        Ok(v) => {
                            reader_output.push(v).await;
                        }
                        Err(e) => {
                            warn!(step = %reader_name, error = %e, "dropping unparseable processor output line");
                        }
                    },
                    Ok(None) => break,
                    Err(e) => {
                        warn!(step = %reader_name, error = %e, "processor stdout read failed");
                        break;
                    }
                }
            }
            reader_output.close().await;
            reader_dead.store(true, Ordering::SeqCst);
        });

        Ok(Arc::new(Self {
            name: step_name.to_string(),
            child: Mutex::new(child),
            pid,
            stdin_queue,
            writer: Mutex::new(Some(writer)),
            output_queue,
            reader: Mutex::new(Some(reader)),
            dead,
        }))
    }

    /// Sends one JSON value and awaits exactly one response value.
    ///
    /// The wire contract is an open-ended "zero or more JSON values per
    /// line" stdout stream; without a request id there is no way to tell how
    /// many output lines belong to one input line. This implementation
    /// instead pairs each call with exactly one output value (see
    /// DESIGN.md): it covers every `jq -c` filter that computes one value
    /// (e.g. `{count: length}`), and a filter that legitimately emits zero
    /// or multiple values per input is a known limitation rather than an
    /// unbounded, timeout-based read.
    pub async fn apply(&self, input: Value) -> Option<Value> {
        if !self.stdin_queue.push(input).await {
            return None;
        }
        self.output_queue.receive().await
    }

    /// A process is healthy while it has not been observed to die; checked
    /// by the pipeline's health monitor, which cascades a dead bridge into
    /// an orderly shutdown.
    pub fn is_healthy(&self) -> bool {
        !self.dead.load(Ordering::SeqCst)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Closes the buffer channel, awaits feed completion, closes stdin,
    /// awaits receive completion, then kills the child if it is still
    /// running.
    pub async fn close(&self) {
        self.stdin_queue.close().await;
        self.stdin_queue.wait_drained().await;
        if let Some(handle) = self.writer.lock().await.take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.reader.lock().await.take() {
            let _ = handle.await;
        }
        let mut child = self.child.lock().await;
        if child.try_wait().ok().flatten().is_none() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        info!(step = %self.name, pid = ?self.pid, "processor bridge closed");
    }
}

/// Process-wide processor instance map, threaded
/// explicitly through the CLI rather than a `static`, used by the health
/// monitor to cascade a dead bridge into a pipeline shutdown.
#[derive(Default)]
pub struct ProcessorRegistry {
    bridges: Mutex<Vec<Arc<ProcessorBridge>>>,
}

impl ProcessorRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn register(&self, bridge: Arc<ProcessorBridge>) {
        self.bridges.lock().await.push(bridge);
    }

    /// `false` as soon as any registered bridge is observed dead.
    pub async fn all_healthy(&self) -> bool {
        self.bridges.lock().await.iter().all(|b| b.is_healthy())
    }

    pub async fn close_all(&self) {
        let bridges = self.bridges.lock().await.drain(..).collect::<Vec<_>>();
        for bridge in bridges {
            bridge.close().await;
        }
    }
}

/// Wraps a [`ProcessorBridge`] as a step function: the batch's `data`
/// values are sent as one JSON array, and the single response value
/// becomes the `data` of one derived event carrying the first source
/// event's name (consistent with `send-stdout`'s `{count: length}` example,
/// where the bridge's output summarizes the whole batch).
pub struct BridgedFunction {
    bridge: Arc<ProcessorBridge>,
}

impl BridgedFunction {
    pub fn new(bridge: Arc<ProcessorBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl StepFunction for BridgedFunction {
    async fn apply(&self, batch: Vec<Event>) -> Vec<Event> {
        if batch.is_empty() {
            return Vec::new();
        }
        let input = Value::Array(batch.iter().map(|e| e.data.clone()).collect());
        match self.bridge.apply(input).await {
            Some(output) => {
                let source = &batch[0];
                vec![source.derive(source.name.clone(), output)]
            }
            None => {
                warn!(step = %self.bridge.name(), "processor produced no output for batch");
                Vec::new()
            }
        }
    }
}
