//! `deduplicate`: keeps the first event per distinct key within a batch,
//! where the key is built from whichever of `name`/`data`/`trace` the step
//! was configured to consider.

use std::collections::HashSet;

use async_trait::async_trait;
use cdp_core::dag::StepFunction;
use cdp_core::Event;

pub struct Deduplicate {
    consider_name: bool,
    consider_data: bool,
    consider_trace: bool,
}

impl Deduplicate {
    pub fn new(consider_name: bool, consider_data: bool, consider_trace: bool) -> Self {
        Self {
            consider_name,
            consider_data,
            consider_trace,
        }
    }

    fn key(&self, event: &Event) -> String {
        let mut key = String::new();
        if self.consider_name {
            key.push_str(&event.name);
            key.push('\0');
        }
        if self.consider_data {
            key.push_str(&event.data.to_string());
            key.push('\0');
        }
        if self.consider_trace {
            key.push_str(&serde_json::to_string(&event.trace).unwrap_or_default());
        }
        key
    }
}

#[async_trait]
impl StepFunction for Deduplicate {
    async fn apply(&self, batch: Vec<Event>) -> Vec<Event> {
        let before = batch.len();
        let mut seen = HashSet::new();
        let out: Vec<Event> = batch
            .into_iter()
            .filter(|e| seen.insert(self.key(e)))
            .collect();
        tracing::debug!(before, after = out.len(), "deduplicate applied");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ev(name: &str, data: serde_json::Value) -> Event {
        Event::new(
            name.to_string(),
            data,
            vec![cdp_core::TracePoint {
                i: 0,
                p: "p".into(),
                h: "h".into(),
            }],
        )
    }

    #[tokio::test]
    async fn consider_data_only_matches_spec_scenario_2() {
        let f = Deduplicate::new(false, true, false);
        let batch = vec![
            ev("a", json!(3.14)),
            ev("b", json!(3.14)),
            ev("c", json!(3.141)),
            ev("d", json!(3.14)),
            ev("e", json!(3.14)),
            ev("f", json!(3.141)),
            ev("g", json!(3.14)),
            ev("h", json!(3.1415)),
        ];
        let out = f.apply(batch).await;
        let names: Vec<&str> = out.iter().map(|e| e.name.as_str()).collect();
        let data: Vec<f64> = out.iter().map(|e| e.data.as_f64().unwrap()).collect();
        assert_eq!(names, vec!["a", "c", "h"]);
        assert_eq!(data, vec![3.14, 3.141, 3.1415]);
    }

    #[tokio::test]
    async fn no_considered_fields_collapses_to_one_survivor() {
        let f = Deduplicate::new(false, false, false);
        let batch = vec![ev("a", json!(1)), ev("b", json!(2)), ev("c", json!(3))];
        let out = f.apply(batch).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "a");
    }
}
