//! Pipelines: named, ordered chains of stages.
//!
//! ## Architecture
//!
//! ```text
//! Pipeline → Stages
//!
//! - Pipeline: immutable list of stages, registered once, addressed by PipelineId
//! - Stage: function mutating a payload in place for the next stage
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use conveyor::{Engine, EngineOptions, PipelineBuilder, Stage};
//!
//! let engine = Engine::new(EngineOptions::default())?;
//! let id = PipelineBuilder::new()
//!     .stage(Stage::map("double", |n: i64, _| n * 2))
//!     .stage(Stage::map("label", |n: i64, _| format!("{n}.done")))
//!     .register(&engine)?;
//! ```

mod metrics;
#[allow(clippy::module_inception)]
mod pipeline;
mod registry;
mod stage;

pub(crate) use metrics::StageStats;
pub use metrics::{PipelineMetrics, StageMetrics};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineId};
pub(crate) use registry::PipelineRegistry;
pub use stage::{Stage, StageContext, StageFn};
