//! Types shared by the conveyor engine and the tools built on top of it.

pub mod errors;

pub use errors::{ConveyorError, ConveyorResult};
