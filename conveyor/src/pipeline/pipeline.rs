//! Registered pipelines.

use std::fmt;

use conveyor_shared::errors::ConveyorResult;
use serde::{Deserialize, Serialize};

use super::metrics::{PipelineMetrics, StageStats};
use super::stage::Stage;
use crate::runtime::Engine;

/// Stable handle of a registered pipeline: its 0-based registration index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PipelineId(pub usize);

impl PipelineId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable ordered list of stages.
pub struct Pipeline {
    id: PipelineId,
    stages: Vec<Stage>,
    stats: Vec<StageStats>,
}

impl Pipeline {
    pub(crate) fn new(id: PipelineId, stages: Vec<Stage>) -> Self {
        let stats = stages.iter().map(|_| StageStats::default()).collect();
        Self { id, stages, stats }
    }

    pub fn id(&self) -> PipelineId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(Stage::name)
    }

    pub(crate) fn stage(&self, index: usize) -> Option<(&Stage, &StageStats)> {
        Some((self.stages.get(index)?, self.stats.get(index)?))
    }

    pub fn metrics(&self) -> PipelineMetrics {
        PipelineMetrics::collect(self.id, self.stage_names().zip(self.stats.iter()))
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.id)
            .field("stages", &self.stages)
            .finish()
    }
}

/// Collects stages in order and registers them as one pipeline.
#[derive(Debug, Default)]
pub struct PipelineBuilder {
    stages: Vec<Stage>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stages(self) -> Vec<Stage> {
        self.stages
    }

    /// Hand the stages to the engine. See [`Engine::register_pipeline`].
    pub fn register(self, engine: &Engine) -> ConveyorResult<PipelineId> {
        engine.register_pipeline(self.stages)
    }
}
