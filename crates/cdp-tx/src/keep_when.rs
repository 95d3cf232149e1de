//! `keep-when`: filters a batch by validating each event's `data` against a
//! configured JSON Schema.

use async_trait::async_trait;
use cdp_core::dag::StepFunction;
use cdp_core::{CdpError, Event, Result};
use jsonschema::JSONSchema;

pub struct KeepWhen {
    schema: JSONSchema,
}

impl KeepWhen {
    pub fn new(schema: &serde_json::Value) -> Result<Self> {
        let compiled = JSONSchema::compile(schema).map_err(|e| CdpError::InvalidOptions {
            step: "keep-when".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { schema: compiled })
    }
}

#[async_trait]
impl StepFunction for KeepWhen {
    async fn apply(&self, batch: Vec<Event>) -> Vec<Event> {
        let before = batch.len();
        let out: Vec<Event> = batch
            .into_iter()
            .filter(|e| self.schema.is_valid(&e.data))
            .collect();
        tracing::debug!(before, after = out.len(), "keep-when applied");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ev(data: serde_json::Value) -> Event {
        Event::new(
            "e".into(),
            data,
            vec![cdp_core::TracePoint {
                i: 0,
                p: "p".into(),
                h: "h".into(),
            }],
        )
    }

    #[tokio::test]
    async fn only_objects_pass_matching_spec_scenario_3() {
        let f = KeepWhen::new(&json!({"type": "object"})).unwrap();
        let batch = vec![
            ev(json!(1)),
            ev(json!(2)),
            ev(json!({"key": 3})),
            ev(json!({"key": [4]})),
            ev(json!([5])),
            ev(json!("6")),
            ev(json!(true)),
            ev(json!(null)),
        ];
        let out = f.apply(batch).await;
        assert_eq!(out.len(), 2);
        assert!(out[0].data.is_object());
        assert!(out[1].data.is_object());
    }

    #[test]
    fn malformed_schema_is_rejected_at_construction() {
        assert!(KeepWhen::new(&json!({"type": 5})).is_err());
    }
}
