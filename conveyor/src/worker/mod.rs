//! Worker pool internals: the dispatch state machine and the worker loop.

mod runner;
mod state;

pub(crate) use runner::run;
pub(crate) use state::{Observation, WorkerTable};
pub use state::{WorkerCounts, WorkerState};
