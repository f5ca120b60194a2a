//! Pipeline registry: append-only, indexed by [`PipelineId`].

use std::sync::Arc;

use conveyor_shared::errors::{ConveyorError, ConveyorResult};

use super::pipeline::{Pipeline, PipelineId};
use super::stage::Stage;

#[derive(Debug, Default)]
pub(crate) struct PipelineRegistry {
    pipelines: Vec<Arc<Pipeline>>,
}

impl PipelineRegistry {
    /// Take ownership of `stages` and assign the next id.
    pub(crate) fn register(&mut self, stages: Vec<Stage>) -> ConveyorResult<PipelineId> {
        if stages.is_empty() {
            return Err(ConveyorError::EmptyPipeline);
        }
        let id = PipelineId(self.pipelines.len());
        self.pipelines.push(Arc::new(Pipeline::new(id, stages)));
        Ok(id)
    }

    pub(crate) fn get(&self, id: PipelineId) -> ConveyorResult<&Arc<Pipeline>> {
        self.pipelines
            .get(id.index())
            .ok_or(ConveyorError::UnknownPipeline(id.index()))
    }

    pub(crate) fn len(&self) -> usize {
        self.pipelines.len()
    }
}
