//! Engine configuration.

use std::path::Path;

use conveyor_shared::errors::{ConveyorError, ConveyorResult};
use serde::{Deserialize, Serialize};

use crate::util::default_worker_threads;

/// Options for constructing an [`Engine`](crate::Engine).
///
/// Every field has a default, so an options file only needs the keys it
/// overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Size of the worker pool. `None` means hardware threads plus two.
    pub worker_threads: Option<usize>,
    /// Worker threads are named `{thread_name}-{index}`.
    pub thread_name: String,
    /// Stack size for worker threads, in bytes. `None` keeps the platform default.
    pub stack_size: Option<usize>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            worker_threads: None,
            thread_name: "conveyor-worker".to_string(),
            stack_size: None,
        }
    }
}

impl EngineOptions {
    pub fn with_worker_threads(worker_threads: usize) -> Self {
        Self {
            worker_threads: Some(worker_threads),
            ..Self::default()
        }
    }

    /// Load options from a JSON file.
    pub fn from_file(path: &Path) -> ConveyorResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let options: Self = serde_json::from_str(&raw).map_err(|e| {
            ConveyorError::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> ConveyorResult<()> {
        if self.worker_threads == Some(0) {
            return Err(ConveyorError::InvalidConfig(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        if self.thread_name.is_empty() {
            return Err(ConveyorError::InvalidConfig(
                "thread_name must not be empty".to_string(),
            ));
        }
        if self.stack_size == Some(0) {
            return Err(ConveyorError::InvalidConfig(
                "stack_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Worker count the engine will spawn.
    pub fn resolved_worker_threads(&self) -> usize {
        self.worker_threads.unwrap_or_else(default_worker_threads)
    }
}
