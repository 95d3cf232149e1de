//! Pipeline API: template types, validation, and the `run`/`stop`
//! lifecycle. This module owns the shape of the configuration document; the
//! DAG engine in [`crate::dag`] owns turning a validated template into a
//! running set of steps.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{CdpError, Result};
use crate::pattern;
use crate::step::StepDef;

pub const RESERVED_INPUT_NAME: &str = "$input";

/// `{ name, input-factory, [step...] }`, deserialized straight from the
/// YAML/JSON configuration document. Extra keys at the root are accepted for
/// forward compatibility (no `deny_unknown_fields` here); extra keys inside
/// `steps` entries are rejected by [`StepDef`]'s own attribute.
///
/// `#[derive(Validate)]` covers the structural phase's root-level shape
/// check: a `name` field present but empty fails here, before the
/// semantic phase's hand-written checks ever run.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct RawTemplate {
    #[validate(length(min = 1, message = "pipeline name must be non-empty"))]
    pub name: String,
    pub input: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub steps: HashMap<String, StepDef>,
}

/// A validated template: structurally and semantically sound, ready to be
/// handed to the DAG engine.
#[derive(Debug, Clone)]
pub struct PipelineTemplate {
    pub name: String,
    pub input_form: String,
    pub input_options: serde_json::Value,
    pub steps: HashMap<String, StepDef>,
}

impl PipelineTemplate {
    /// SHA-1 over a canonical (sorted-key) rendering of the template,
    /// stamped into every trace point this pipeline appends (see the trace
    /// point's `h` field). Stable across runs for the same configuration,
    /// independent of `HashMap` iteration order.
    pub fn signature(&self) -> String {
        use sha1::{Digest, Sha1};
        let mut step_names: Vec<&String> = self.steps.keys().collect();
        step_names.sort();
        let mut hasher = Sha1::new();
        hasher.update(self.name.as_bytes());
        hasher.update(self.input_form.as_bytes());
        hasher.update(self.input_options.to_string().as_bytes());
        for name in step_names {
            hasher.update(name.as_bytes());
            hasher.update(serde_json::to_string(&self.steps[name]).unwrap_or_default().as_bytes());
        }
        hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Validates structure and semantics. Deliberately split into the two
/// phases named in the expanded spec's validation layer: serde's shape
/// matching handles "one of several known shapes", and this function
/// handles the rules serde cannot express.
pub fn make_pipeline_template(raw: RawTemplate) -> Result<PipelineTemplate> {
    raw.validate()
        .map_err(|e| CdpError::InvalidTemplate(e.to_string()))?;
    if raw.name.trim().is_empty() {
        return Err(CdpError::InvalidTemplate(
            "pipeline name must be non-empty".to_string(),
        ));
    }
    if raw.input.len() != 1 {
        return Err(CdpError::InvalidTemplate(format!(
            "input must declare exactly one form, got {}",
            raw.input.len()
        )));
    }
    let (input_form, input_options) = raw.input.into_iter().next().unwrap();

    let mut seen_names: HashSet<&str> = HashSet::new();
    for name in raw.steps.keys() {
        if name == RESERVED_INPUT_NAME {
            return Err(CdpError::ReservedStepName(name.clone()));
        }
        if !seen_names.insert(name.as_str()) {
            return Err(CdpError::DuplicateStepName(name.clone()));
        }
    }

    for (name, step) in &raw.steps {
        for dep in &step.after {
            if dep != RESERVED_INPUT_NAME && !raw.steps.contains_key(dep) {
                return Err(CdpError::DanglingReference {
                    step: name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
        if let Some(pattern_def) = &step.pattern_def {
            if let Some((pattern, _mode)) = pattern_def.resolve()? {
                pattern::validate(&pattern).map_err(|e| CdpError::InvalidOptions {
                    step: name.clone(),
                    reason: e.to_string(),
                })?;
            }
        }
        if let Some(window) = &step.window {
            window.validate().map_err(|e| CdpError::InvalidOptions {
                step: name.clone(),
                reason: e.to_string(),
            })?;
        }
        step.function.resolve().map_err(|e| CdpError::InvalidOptions {
            step: name.clone(),
            reason: e.to_string(),
        })?;
    }

    crate::dag::validate_graph(&raw.steps)?;

    Ok(PipelineTemplate {
        name: raw.name,
        input_form,
        input_options,
        steps: raw.steps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal_raw() -> RawTemplate {
        let mut input = HashMap::new();
        input.insert("generator".to_string(), json!({"seconds": 0.1}));
        RawTemplate {
            name: "p".to_string(),
            input,
            steps: HashMap::new(),
        }
    }

    #[test]
    fn rejects_empty_name() {
        let mut raw = minimal_raw();
        raw.name = "".to_string();
        assert!(make_pipeline_template(raw).is_err());
    }

    #[test]
    fn rejects_multiple_input_forms() {
        let mut raw = minimal_raw();
        raw.input.insert("stdin".to_string(), json!({}));
        assert!(make_pipeline_template(raw).is_err());
    }

    #[test]
    fn accepts_minimal_template() {
        let raw = minimal_raw();
        assert!(make_pipeline_template(raw).is_ok());
    }

    #[test]
    fn signature_is_stable_and_differs_on_change() {
        let template = make_pipeline_template(minimal_raw()).unwrap();
        assert_eq!(template.signature(), template.signature());

        let mut raw = minimal_raw();
        raw.name = "other".to_string();
        let other = make_pipeline_template(raw).unwrap();
        assert_ne!(template.signature(), other.signature());
    }
}
