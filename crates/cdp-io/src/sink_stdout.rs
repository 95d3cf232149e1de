//! `send-stdout`: a sink-with-pass-through. Prints something for
//! each batch to stdout — either the batch's events themselves as
//! newline-delimited JSON, or, when a `jq-expr` is configured, the single
//! value the processor bridge computes over the batch — then forwards the
//! *unchanged* batch downstream.

use async_trait::async_trait;
use cdp_core::dag::StepFunction;
use cdp_core::Event;
use std::sync::Arc;
use tracing::warn;

use crate::processor::ProcessorBridge;

pub struct SendStdout {
    bridge: Option<Arc<ProcessorBridge>>,
}

impl SendStdout {
    pub fn new(bridge: Option<Arc<ProcessorBridge>>) -> Self {
        Self { bridge }
    }

    fn print_events(batch: &[Event]) {
        for event in batch {
            println!("{}", serde_json::to_string(&event.to_serialized()).unwrap_or_default());
        }
    }
}

#[async_trait]
impl StepFunction for SendStdout {
    async fn apply(&self, batch: Vec<Event>) -> Vec<Event> {
        match &self.bridge {
            Some(bridge) => {
                let input =
                    serde_json::Value::Array(batch.iter().map(|e| e.data.clone()).collect());
                match bridge.apply(input).await {
                    Some(value) => println!("{value}"),
                    None => warn!(step = %bridge.name(), "send-stdout: processor produced no output"),
                }
            }
            None => Self::print_events(&batch),
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ev(n: i64) -> Event {
        Event::new(
            "e".into(),
            json!(n),
            vec![cdp_core::TracePoint {
                i: 0,
                p: "p".into(),
                h: "h".into(),
            }],
        )
    }

    #[tokio::test]
    async fn without_bridge_forwards_batch_unchanged() {
        let sink = SendStdout::new(None);
        let batch = vec![ev(1), ev(2)];
        let out = sink.apply(batch.clone()).await;
        assert_eq!(out, batch);
    }
}
