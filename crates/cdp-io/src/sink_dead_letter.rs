//! `send-dead-letter`: a sink-with-pass-through that explicitly
//! routes a batch to the dead-letter destination (logged here; a concrete
//! `DEAD_LETTER_TARGET*` transport is a boundary-contract collaborator per
//! logs) and forwards the batch unchanged.

use async_trait::async_trait;
use cdp_core::dag::StepFunction;
use cdp_core::Event;
use tracing::warn;

pub struct SendDeadLetter {
    step_name: String,
}

impl SendDeadLetter {
    pub fn new(step_name: &str) -> Self {
        Self {
            step_name: step_name.to_string(),
        }
    }
}

#[async_trait]
impl StepFunction for SendDeadLetter {
    async fn apply(&self, batch: Vec<Event>) -> Vec<Event> {
        for event in &batch {
            warn!(step = %self.step_name, name = %event.name, "event routed to dead letter");
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn forwards_batch_unchanged() {
        let sink = SendDeadLetter::new("dlq");
        let event = Event::new(
            "e".into(),
            json!(1),
            vec![cdp_core::TracePoint {
                i: 0,
                p: "p".into(),
                h: "h".into(),
            }],
        );
        let out = sink.apply(vec![event.clone()]).await;
        assert_eq!(out, vec![event]);
    }
}
