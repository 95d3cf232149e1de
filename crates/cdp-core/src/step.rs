//! Step template types and the windowing layer. The pattern filter and
//! function-mode composition that make a step a running channel live in
//! [`crate::dag`], which owns the wiring that turns a [`StepDef`] into a
//! [`crate::queue::Channel`].

use serde::{Deserialize, Serialize};

use crate::error::{CdpError, Result};
use crate::event::Event;
use crate::pattern::Pattern;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternMode {
    Pass,
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionMode {
    Flatmap,
    Reduce,
}

/// `{events: int|digit-string >= 1, seconds: number|digit-string > 0}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Window {
    pub events: u64,
    pub seconds: f64,
}

impl<'de> Deserialize<'de> for Window {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            events: serde_json::Value,
            seconds: serde_json::Value,
        }
        let raw = Raw::deserialize(deserializer)?;
        let events = number_or_digit_string(&raw.events, "window.events")
            .map_err(serde::de::Error::custom)? as u64;
        let seconds =
            float_or_digit_string(&raw.seconds, "window.seconds").map_err(serde::de::Error::custom)?;
        Ok(Window { events, seconds })
    }
}

/// Accepts a JSON integer or a string of decimal digits, per `int|digit-string`.
fn number_or_digit_string(v: &serde_json::Value, field: &str) -> std::result::Result<u64, String> {
    match v {
        serde_json::Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| format!("{field} must be a non-negative integer")),
        serde_json::Value::String(s) => s
            .parse::<u64>()
            .map_err(|_| format!("{field} must be a digit string, got '{s}'")),
        other => Err(format!("{field} must be a number or digit string, got {other}")),
    }
}

/// Accepts a JSON number or a numeric string, per `number|digit-string`.
fn float_or_digit_string(v: &serde_json::Value, field: &str) -> std::result::Result<f64, String> {
    match v {
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| format!("{field} must be a number")),
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .map_err(|_| format!("{field} must be a numeric string, got '{s}'")),
        other => Err(format!("{field} must be a number or numeric string, got {other}")),
    }
}

impl Window {
    pub fn validate(&self) -> Result<()> {
        if self.events < 1 {
            return Err(CdpError::InvalidTemplate(
                "window.events must be >= 1".to_string(),
            ));
        }
        if !(self.seconds > 0.0) {
            return Err(CdpError::InvalidTemplate(
                "window.seconds must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// A step's function: one of the built-in kinds, a processor-bridged form,
/// or a sink form. Concrete behavior lives in the `cdp-tx`/`cdp-io` crates;
/// this is the template-level description.
///
/// Deliberately left externally tagged (no `tag = "..."` attribute) so the
/// wire shape matches the template grammar's `{<fn>: <opts>}`, e.g.
/// `{"keep-n": {"n": 3}}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FunctionSpec {
    KeepN {
        n: u64,
    },
    KeepWhen {
        schema: serde_json::Value,
    },
    #[serde(rename_all = "kebab-case")]
    Deduplicate {
        #[serde(default)]
        consider_name: bool,
        #[serde(default)]
        consider_data: bool,
        #[serde(default)]
        consider_trace: bool,
    },
    Rename {
        #[serde(default)]
        replace: Option<String>,
        #[serde(default)]
        prepend: Option<String>,
        #[serde(default)]
        append: Option<String>,
    },
    Jq {
        #[serde(rename = "jq-expr")]
        jq_expr: String,
    },
    Jsonnet {
        #[serde(rename = "jsonnet-expr")]
        jsonnet_expr: String,
    },
    SendStdout {
        #[serde(rename = "jq-expr", default)]
        jq_expr: Option<String>,
    },
    SendDeadLetter {},
}

/// A step as declared in the configuration template.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StepDef {
    #[serde(default)]
    pub after: Vec<String>,
    #[serde(rename = "match", default)]
    pub pattern_def: Option<PatternDef>,
    #[serde(default)]
    pub window: Option<Window>,
    #[serde(flatten)]
    pub function: FunctionDef,
}

/// `match/pass: Pattern` or `match/drop: Pattern` — exactly one.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PatternDef {
    #[serde(default)]
    pub pass: Option<Pattern>,
    #[serde(default)]
    pub drop: Option<Pattern>,
}

impl PatternDef {
    pub fn resolve(&self) -> Result<Option<(Pattern, PatternMode)>> {
        match (&self.pass, &self.drop) {
            (Some(p), None) => Ok(Some((p.clone(), PatternMode::Pass))),
            (None, Some(p)) => Ok(Some((p.clone(), PatternMode::Drop))),
            (None, None) => Ok(None),
            (Some(_), Some(_)) => Err(CdpError::InvalidTemplate(
                "step has both match/pass and match/drop".to_string(),
            )),
        }
    }
}

/// `flatmap: {<fn>: <opts>}` or `reduce: {<fn>: <opts>}` — exactly one.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FunctionDef {
    #[serde(default)]
    pub flatmap: Option<FunctionSpec>,
    #[serde(default)]
    pub reduce: Option<FunctionSpec>,
}

impl FunctionDef {
    pub fn resolve(&self) -> Result<(FunctionMode, FunctionSpec)> {
        match (&self.flatmap, &self.reduce) {
            (Some(f), None) => Ok((FunctionMode::Flatmap, f.clone())),
            (None, Some(f)) => Ok((FunctionMode::Reduce, f.clone())),
            (None, None) => Err(CdpError::InvalidTemplate(
                "step must declare exactly one of flatmap/reduce".to_string(),
            )),
            (Some(_), Some(_)) => Err(CdpError::InvalidTemplate(
                "step has both flatmap and reduce".to_string(),
            )),
        }
    }
}

/// Sliding window over a stream of events, bounded by `(events, seconds)`;
/// whichever bound is reached first closes a batch.
///
/// Edge case: `windowMaxSize == 1` ignores the time bound entirely and
/// emits every event immediately as a one-element batch.
pub struct SlidingWindow {
    max_size: u64,
    seen: std::collections::VecDeque<Event>,
}

impl SlidingWindow {
    pub fn new(max_size: u64) -> Self {
        Self {
            max_size,
            seen: std::collections::VecDeque::new(),
        }
    }

    /// Feeds one event, returning the new batch: the last
    /// `min(eventsSeen, max_size)` events.
    pub fn push(&mut self, event: Event) -> Vec<Event> {
        self.seen.push_back(event);
        while self.seen.len() as u64 > self.max_size {
            self.seen.pop_front();
        }
        self.seen.iter().cloned().collect()
    }

    /// On input close, emits the natural tail: successive shorter batches
    /// truncating the last full batch on its right edge, down to a single
    /// element. The terminal empty batch is never emitted.
    pub fn drain_tail(mut self) -> Vec<Vec<Event>> {
        let mut out = Vec::new();
        while self.seen.len() > 1 {
            self.seen.pop_front();
            out.push(self.seen.iter().cloned().collect());
        }
        out
    }
}

/// Tumbling (disjoint) window: collects events until `events` is reached,
/// emits and resets. A time-bounded partial batch is emitted by the caller
/// on timer expiry (the timer itself lives in the step's driving task since
/// it is a wall-clock concern, not a pure data-structure one).
pub struct TumblingWindow {
    max_size: u64,
    pending: Vec<Event>,
}

impl TumblingWindow {
    pub fn new(max_size: u64) -> Self {
        Self {
            max_size,
            pending: Vec::new(),
        }
    }

    /// Feeds one event; returns `Some(batch)` if the size bound was reached.
    pub fn push(&mut self, event: Event) -> Option<Vec<Event>> {
        self.pending.push(event);
        if self.pending.len() as u64 >= self.max_size {
            Some(std::mem::take(&mut self.pending))
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Called on timer expiry or input close: emits whatever is pending, if
    /// anything, and resets.
    pub fn flush(&mut self) -> Option<Vec<Event>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }

    pub fn is_single_element(&self) -> bool {
        self.max_size == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ev(n: i64) -> Event {
        Event::new(
            "e".to_string(),
            json!(n),
            vec![crate::event::TracePoint {
                i: 0,
                p: "p".into(),
                h: "h".into(),
            }],
        )
    }

    #[test]
    fn window_accepts_digit_strings_for_events_and_seconds() {
        let w: Window = serde_json::from_value(json!({"events": "10", "seconds": "0.5"})).unwrap();
        assert_eq!(w.events, 10);
        assert_eq!(w.seconds, 0.5);
    }

    #[test]
    fn window_accepts_plain_numbers() {
        let w: Window = serde_json::from_value(json!({"events": 10, "seconds": 999})).unwrap();
        assert_eq!(w.events, 10);
        assert_eq!(w.seconds, 999.0);
    }

    #[test]
    fn sliding_window_size_3_matches_spec_scenario_6() {
        let mut w = SlidingWindow::new(3);
        let sizes: Vec<usize> = (1..=5).map(|i| w.push(ev(i)).len()).collect();
        assert_eq!(sizes, vec![1, 2, 3, 3, 3]);
        let tail = w.drain_tail();
        let tail_sizes: Vec<usize> = tail.iter().map(|b| b.len()).collect();
        assert_eq!(tail_sizes, vec![2, 1]);
    }

    #[test]
    fn sliding_window_batch_size_sequence_for_m_greater_than_n() {
        let n = 3u64;
        let m = 7i64;
        let mut w = SlidingWindow::new(n);
        let mut sizes: Vec<usize> = (1..=m).map(|i| w.push(ev(i)).len()).collect();
        let tail = w.drain_tail();
        sizes.extend(tail.iter().map(|b| b.len()));
        assert_eq!(sizes, vec![1, 2, 3, 3, 3, 3, 3, 2, 1]);
    }

    #[test]
    fn tumbling_window_emits_fixed_size_batches() {
        let mut w = TumblingWindow::new(3);
        assert!(w.push(ev(1)).is_none());
        assert!(w.push(ev(2)).is_none());
        let batch = w.push(ev(3)).unwrap();
        assert_eq!(batch.len(), 3);
        assert!(w.push(ev(4)).is_none());
        let tail = w.flush().unwrap();
        assert_eq!(tail.len(), 1);
    }

    #[test]
    fn tumbling_window_ceil_division_batch_count() {
        let mut w = TumblingWindow::new(3);
        let mut batches = 0;
        for i in 1..=8i64 {
            if w.push(ev(i)).is_some() {
                batches += 1;
            }
        }
        if w.flush().is_some() {
            batches += 1;
        }
        assert_eq!(batches, 3); // ceil(8/3)
    }
}
