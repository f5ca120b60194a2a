//! Engine handle, configuration and the state shared with workers.

mod core;
mod options;
mod shared;
mod types;

pub use self::core::Engine;
pub use options::EngineOptions;
pub(crate) use shared::{EngineInner, StageFault};
pub use types::EngineId;
