//! `keep-n`: truncates a batch to its first `n` events.

use async_trait::async_trait;
use cdp_core::dag::StepFunction;
use cdp_core::Event;

pub struct KeepN {
    n: u64,
}

impl KeepN {
    pub fn new(n: u64) -> Self {
        Self { n }
    }
}

#[async_trait]
impl StepFunction for KeepN {
    async fn apply(&self, mut batch: Vec<Event>) -> Vec<Event> {
        let before = batch.len();
        batch.truncate(self.n as usize);
        tracing::debug!(before, after = batch.len(), "keep-n applied");
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
    async fn keeps_first_n_matching_spec_scenario_4() {
        let f = KeepN::new(3);
        let batch: Vec<Event> = (1..=8).map(ev).collect();
        let out = f.apply(batch).await;
        let data: Vec<i64> = out.iter().map(|e| e.data.as_i64().unwrap()).collect();
        assert_eq!(data, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn short_batch_is_kept_unchanged() {
        let f = KeepN::new(3);
        let batch: Vec<Event> = (1..=2).map(ev).collect();
        let out = f.apply(batch).await;
        assert_eq!(out.len(), 2);
    }
}
