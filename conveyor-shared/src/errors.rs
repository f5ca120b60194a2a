//! Error types for the conveyor engine.

use thiserror::Error;

/// Errors returned by engine operations.
///
/// Stage failures reported through a payload are not represented here; they
/// are job outcomes and travel through the result accumulators instead.
#[derive(Error, Debug)]
pub enum ConveyorError {
    /// A pipeline id that was never registered.
    #[error("unknown pipeline id {0}")]
    UnknownPipeline(usize),

    /// A pipeline must contain at least one stage.
    #[error("pipeline has no stages")]
    EmptyPipeline,

    /// A payload was read as a type the previous stage did not produce.
    #[error("payload type mismatch: expected `{expected}`, found `{found}`")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// Engine options failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Engine options could not be loaded or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// The engine has been shut down.
    #[error("engine is shut down")]
    ShutDown,

    /// Sync work is pending but every worker has terminated.
    #[error("no live workers remain to drain the sync lane")]
    NoLiveWorkers,

    /// A worker thread was torn down by a panicking stage.
    #[error("worker {worker_id} panicked: {message}")]
    WorkerPanicked { worker_id: usize, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used across the conveyor crates.
pub type ConveyorResult<T> = Result<T, ConveyorError>;
