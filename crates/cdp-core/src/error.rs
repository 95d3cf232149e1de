//! Error taxonomy for the engine crate: fatal-at-construction errors
//! (template, validation, cycle, dangling reference) plus the transparent
//! wrappers for the parsing/arbitrary-failure cases threaded through
//! `#[from]`. A closed-queue push is not represented here — it is signaled
//! by [`crate::queue::Queue::push`]'s plain `bool` return, which every
//! caller already checks to decide whether to record a dead letter.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CdpError {
    #[error("step '{0}' may not use the reserved name $input")]
    ReservedStepName(String),

    #[error("duplicate step name: {0}")]
    DuplicateStepName(String),

    #[error("step '{step}' references unknown dependency '{dependency}'")]
    DanglingReference { step: String, dependency: String },

    #[error("cycle detected: {0}")]
    CycleDetected(String),

    #[error("invalid template: {0}")]
    InvalidTemplate(String),

    #[error("invalid options for step '{step}': {reason}")]
    InvalidOptions { step: String, reason: String },

    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CdpError>;
