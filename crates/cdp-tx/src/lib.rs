//! # CDP Transformations - built-in step functions
//!
//! This crate provides the step functions that don't need any external I/O:
//! `keep-n`, `keep-when`, `deduplicate`, and `rename`. The sink forms
//! (`send-stdout`, `send-dead-letter`) and the processor-bridged forms
//! (`jq`, `jsonnet`) live in `cdp-io` since they own a child process, a
//! standard stream, or both.
//!
//! ## Example
//!
//! ```rust
//! use cdp_core::dag::StepFunction;
//! use cdp_core::step::FunctionSpec;
//! use cdp_tx::create_function;
//!
//! # async fn example() {
//! let spec = FunctionSpec::KeepN { n: 3 };
//! let function = create_function(&spec).unwrap().unwrap();
//! # }
//! ```

mod deduplicate;
mod keep_n;
mod keep_when;
mod rename;

pub use deduplicate::Deduplicate;
pub use keep_n::KeepN;
pub use keep_when::KeepWhen;
pub use rename::Rename;

use std::sync::Arc;

use cdp_core::dag::StepFunction;
use cdp_core::step::FunctionSpec;
use cdp_core::Result;

/// Builds the step function for `spec` if it is one of this crate's kinds.
/// Returns `Ok(None)` for `Jq`, `Jsonnet`, `SendStdout`, and `SendDeadLetter`
/// so the caller can fall through to `cdp_io::create_function`: one factory
/// per crate, split across the boundary that separates pure functions from
/// I/O-owning ones.
pub fn create_function(spec: &FunctionSpec) -> Result<Option<Arc<dyn StepFunction>>> {
    let function: Arc<dyn StepFunction> = match spec {
        FunctionSpec::KeepN { n } => Arc::new(KeepN::new(*n)),
        FunctionSpec::KeepWhen { schema } => Arc::new(KeepWhen::new(schema)?),
        FunctionSpec::Deduplicate {
            consider_name,
            consider_data,
            consider_trace,
        } => Arc::new(Deduplicate::new(*consider_name, *consider_data, *consider_trace)),
        FunctionSpec::Rename {
            replace,
            prepend,
            append,
        } => Arc::new(Rename::new(replace.clone(), prepend.clone(), append.clone())),
        FunctionSpec::Jq { .. }
        | FunctionSpec::Jsonnet { .. }
        | FunctionSpec::SendStdout { .. }
        | FunctionSpec::SendDeadLetter {} => return Ok(None),
    };
    Ok(Some(function))
}
