//! # CDP Core - Composable Data Pipelines engine
//!
//! This crate provides the in-process streaming engine described by the
//! runtime's component design: queue/channel primitives, the event model,
//! the dotted-name pattern language, the step lifecycle (pattern filter +
//! windowing + function), the DAG engine, and the backpressure supervisor.
//!
//! Concrete adapters (HTTP, generator, stdin, stdout, the processor bridge)
//! live in `cdp-io`; built-in step functions live in `cdp-tx`. This crate
//! depends on neither, so those crates can depend on it without a cycle.
//!
//! ## Example
//!
//! ```rust
//! use cdp_core::queue::{Queue, QueueChannel, Channel};
//!
//! # async fn example() {
//! let queue = Queue::new("example");
//! let channel = QueueChannel::new(queue);
//! channel.send(vec![1, 2, 3]).await;
//! channel.close().await;
//! # }
//! ```

pub mod backpressure;
pub mod context;
pub mod dag;
pub mod decoder;
pub mod error;
pub mod event;
pub mod pattern;
pub mod pipeline;
pub mod queue;
pub mod step;

pub use dag::{Engine, StepFunction, StepRuntimeSpec};
pub use error::{CdpError, Result};
pub use event::{Event, SerializedEvent, TracePoint, WrapDirective};
pub use pattern::Pattern;
pub use pipeline::{make_pipeline_template, PipelineTemplate, RawTemplate};
pub use step::{FunctionMode, FunctionSpec, PatternMode, StepDef, Window};
