//! Event identity: the `Event`/`TracePoint`/`SerializedEvent` triad, the wrap
//! directive, and the two parser factories (new-event vs old-event).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::{Digest, Sha1};
use tracing::warn;

/// Per-pipeline provenance record, appended exactly once per ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracePoint {
    /// Unix seconds.
    pub i: i64,
    /// Pipeline name.
    pub p: String,
    /// Pipeline signature.
    pub h: String,
}

/// An immutable event flowing through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub data: Value,
    pub trace: Vec<TracePoint>,
    pub timestamp: i64,
    pub signature: String,
}

impl Event {
    /// Computes the signature and derives the timestamp from the latest
    /// trace point.
    pub fn new(name: String, data: Value, trace: Vec<TracePoint>) -> Self {
        let timestamp = trace.last().map(|t| t.i).unwrap_or(0);
        let signature = compute_signature(&name, &data, &trace);
        Self {
            name,
            data,
            trace,
            timestamp,
            signature,
        }
    }

    /// Produces a new event with `data` replaced, recomputing the signature.
    /// The trace is preserved unchanged (internal transformations never
    /// rewrite trace points).
    pub fn with_data(&self, data: Value) -> Self {
        Self::new(self.name.clone(), data, self.trace.clone())
    }

    /// Produces a new event with `name` replaced, recomputing the signature.
    pub fn with_name(&self, name: String) -> Self {
        Self::new(name, self.data.clone(), self.trace.clone())
    }

    /// Extends the trace with derived events during a flatmap function: the
    /// new event keeps the same trace as its source (traces are only
    /// appended to on ingestion, never on internal transforms).
    pub fn derive(&self, name: String, data: Value) -> Self {
        Self::new(name, data, self.trace.clone())
    }

    pub fn to_serialized(&self) -> SerializedEvent {
        SerializedEvent {
            n: self.name.clone(),
            d: Some(self.data.clone()),
            t: Some(self.trace.clone()),
        }
    }
}

fn compute_signature(name: &str, data: &Value, trace: &[TracePoint]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(name.as_bytes());
    hasher.update(data.to_string().as_bytes());
    for point in trace {
        hasher.update(point.i.to_le_bytes());
        hasher.update(point.p.as_bytes());
        hasher.update(point.h.as_bytes());
    }
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Wire form: `{n: name, d?: data, t?: trace}`. Round-trips to and from the
/// internal event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedEvent {
    pub n: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<Vec<TracePoint>>,
}

/// Shorthand for renaming raw bytes into a well-formed serialized event
/// before parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrapDirective {
    pub name: String,
    #[serde(default)]
    pub raw: bool,
}

/// Appends a new trace point derived from arrival time and pipeline identity,
/// used when accepting events from an input adapter. Requires a non-empty
/// event name.
pub fn parse_new_event(
    raw: SerializedEvent,
    arrival_timestamp: i64,
    pipeline_name: &str,
    pipeline_signature: &str,
) -> Option<Event> {
    if raw.n.is_empty() {
        warn!(name = %raw.n, "dropping event with empty name");
        return None;
    }
    let mut trace = raw.t.unwrap_or_default();
    trace.push(TracePoint {
        i: arrival_timestamp,
        p: pipeline_name.to_string(),
        h: pipeline_signature.to_string(),
    });
    Some(Event::new(raw.n, raw.d.unwrap_or(Value::Null), trace))
}

/// Used when reading events produced by this or another pipeline: requires a
/// non-empty trace and does not append one.
pub fn parse_old_event(raw: SerializedEvent) -> Option<Event> {
    let trace = raw.t.unwrap_or_default();
    if trace.is_empty() {
        warn!(name = %raw.n, "dropping old-event with empty trace");
        return None;
    }
    if raw.n.is_empty() {
        warn!("dropping old-event with empty name");
        return None;
    }
    Some(Event::new(raw.n, raw.d.unwrap_or(Value::Null), trace))
}

/// Flattens arbitrary nesting of JSON arrays and applies `parser` to each
/// leaf. A leaf that fails to parse is dropped with a warning so that one bad
/// element cannot discard a whole batch.
pub fn parse_vector<F>(raw: Value, parser: F) -> Vec<Event>
where
    F: Fn(SerializedEvent) -> Option<Event> + Copy,
{
    let mut out = Vec::new();
    flatten_into(raw, parser, &mut out);
    out
}

fn flatten_into<F>(raw: Value, parser: F, out: &mut Vec<Event>)
where
    F: Fn(SerializedEvent) -> Option<Event> + Copy,
{
    match raw {
        Value::Array(items) => {
            for item in items {
                flatten_into(item, parser, out);
            }
        }
        leaf => match serde_json::from_value::<SerializedEvent>(leaf) {
            Ok(serialized) => {
                if let Some(event) = parser(serialized) {
                    out.push(event);
                }
            }
            Err(err) => {
                warn!(error = %err, "dropping unparseable event leaf");
            }
        },
    }
}
