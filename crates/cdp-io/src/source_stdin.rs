//! `stdin`: newline-delimited JSON event source reading the process's
//! standard input, the second reference input adapter.

use std::sync::Arc;

use cdp_core::context::EngineContext;
use cdp_core::decoder::{Decoder, DEFAULT_MAX_LINE_LENGTH};
use cdp_core::event::WrapDirective;
use cdp_core::queue::{BoxChannel, Queue, QueueChannel};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
pub struct StdinOptions {
    /// Shorthand for framing raw lines into a well-formed serialized event
    /// before parsing (see the wrap directive).
    #[serde(default)]
    pub wrap: Option<WrapDirective>,
    #[serde(default)]
    pub byte_limit: Option<u64>,
    /// Falls back to the process-wide `parse_buffer_size` (`PARSE_BUFFER_SIZE`),
    /// then to [`DEFAULT_MAX_LINE_LENGTH`], when unset.
    #[serde(default)]
    pub max_line_length: Option<usize>,
}

/// Reads stdin in chunks, decodes it line by line via the stream decoder
/// and pushes each decoded line onto the queue either as-is (no
/// `wrap`: the line is already a well-formed `{n,d,t}` serialized event) or
/// framed under `wrap.name` (`wrap.raw`: bypasses JSON parsing of the
/// payload and carries the line as a string).
pub fn spawn(
    options: StdinOptions,
    context: Arc<EngineContext>,
) -> (BoxChannel<Value, Value>, JoinHandle<()>) {
    let queue = Queue::new("input::stdin");
    let channel = QueueChannel::new(queue.clone());
    let wrap = options.wrap.clone();
    let byte_limit = options.byte_limit;
    let max_line_length = options.max_line_length.unwrap_or_else(|| {
        context
            .parse_buffer_size()
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_MAX_LINE_LENGTH)
    });

    let handle = tokio::spawn(async move {
        let parser: cdp_core::decoder::LineParser<Value> = match &wrap {
            Some(w) if w.raw => {
                let name = w.name.clone();
                Box::new(move |bytes: &[u8]| {
                    Some(json!({"n": name, "d": String::from_utf8_lossy(bytes).into_owned()}))
                })
            }
            Some(w) => {
                let name = w.name.clone();
                Box::new(move |bytes: &[u8]| {
                    serde_json::from_slice::<Value>(bytes)
                        .ok()
                        .map(|d| json!({"n": name, "d": d}))
                })
            }
            None => Box::new(|bytes: &[u8]| serde_json::from_slice::<Value>(bytes).ok()),
        };

        let mut decoder = Decoder::new(parser, byte_limit).with_max_line_length(max_line_length);
        let mut stdin = tokio::io::stdin();
        let mut chunk = [0u8; 8192];
        let mut out = Vec::new();

        loop {
            if context.backpressure_active() {
                // Push-based adapter: pause reading until the gate drops
                // rather than buffering unboundedly.
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                continue;
            }
            match stdin.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    let reached_limit = decoder.push_chunk(&chunk[..n], &mut out);
                    for v in out.drain(..) {
                        if !queue.push(v).await {
                            break;
                        }
                    }
                    if reached_limit {
                        break;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "stdin read error, ending input");
                    break;
                }
            }
        }
        decoder.finish(&mut out);
        for v in out.drain(..) {
            queue.push(v).await;
        }
        queue.close().await;
    });

    (channel, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdin_options_without_wrap_parses_bare_lines_as_events() {
        let opts: StdinOptions = serde_json::from_value(json!({})).unwrap();
        assert!(opts.wrap.is_none());
        assert_eq!(opts.max_line_length, None);
    }

    #[test]
    fn stdin_options_accept_explicit_max_line_length() {
        let opts: StdinOptions = serde_json::from_value(json!({"max_line_length": 64})).unwrap();
        assert_eq!(opts.max_line_length, Some(64));
    }

    #[test]
    fn stdin_options_accept_wrap_directive() {
        let opts: StdinOptions =
            serde_json::from_value(json!({"wrap": {"name": "raw.line", "raw": true}})).unwrap();
        let wrap = opts.wrap.unwrap();
        assert_eq!(wrap.name, "raw.line");
        assert!(wrap.raw);
    }
}
