//! In-process pipeline executor.
//!
//! A fixed pool of worker threads drives items through registered pipelines,
//! each an ordered list of stages. Items enter through one of two lanes:
//!
//! - the **sync** lane is started by [`Engine::launch_sync`], which blocks
//!   until every item submitted before the call has finished or failed;
//! - the **async** lane is started by [`Engine::launch_async`], which returns
//!   at once along with whatever async results accumulated since the last
//!   call.
//!
//! Sync work always wins over async work when a worker picks its next job,
//! and a job that finishes a stage is requeued ahead of jobs that have not
//! started, so pipelines drain instead of fanning out.
//!
//! ```no_run
//! use conveyor::{Engine, Lane, PipelineBuilder, Stage};
//!
//! # fn main() -> conveyor::ConveyorResult<()> {
//! let engine = Engine::with_threads(4)?;
//! let id = PipelineBuilder::new()
//!     .stage(Stage::map("double", |n: i64, _| n * 2))
//!     .stage(Stage::map("label", |n: i64, _| format!("{n}.done")))
//!     .register(&engine)?;
//!
//! engine.submit_many(Lane::Sync, id, [1_i64, 2, 3])?;
//! let results = engine.launch_sync()?;
//! for payload in results.get(id).into_iter().flat_map(|r| r.completed()) {
//!     println!("{}", payload.downcast_ref::<String>()?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod job;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod queue;
pub mod results;
pub mod runtime;
pub mod util;
pub mod worker;

pub use conveyor_shared::{ConveyorError, ConveyorResult};
pub use job::{Payload, TaskError};
pub use logging::{LoggingOptions, init_logging};
pub use metrics::EngineMetrics;
pub use pipeline::{PipelineBuilder, PipelineId, PipelineMetrics, Stage, StageContext};
pub use queue::Lane;
pub use results::{AsyncLaunch, JobResult, LaunchResults, ResultAccumulator};
pub use runtime::{Engine, EngineId, EngineOptions};
pub use util::hardware_threads;
pub use worker::{WorkerCounts, WorkerState};
