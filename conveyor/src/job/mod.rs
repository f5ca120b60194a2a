//! Jobs: one payload's progress through a pipeline.

mod payload;

pub use payload::{Payload, TaskError};

use std::sync::Arc;

use crate::pipeline::{Pipeline, PipelineId};

/// A payload plus the position of the next stage to run on it.
///
/// Jobs hold the pipeline itself so a worker never consults the registry
/// while executing.
pub(crate) struct Job {
    pub(crate) payload: Payload,
    pipeline: Arc<Pipeline>,
    stage_index: usize,
}

impl Job {
    pub(crate) fn new(pipeline: Arc<Pipeline>, payload: Payload) -> Self {
        Self {
            payload,
            pipeline,
            stage_index: 0,
        }
    }

    pub(crate) fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub(crate) fn pipeline_id(&self) -> PipelineId {
        self.pipeline.id()
    }

    pub(crate) fn stage_index(&self) -> usize {
        self.stage_index
    }

    pub(crate) fn stage_count(&self) -> usize {
        self.pipeline.len()
    }

    pub(crate) fn has_next_stage(&self) -> bool {
        self.stage_index + 1 < self.stage_count()
    }

    pub(crate) fn advance(&mut self) {
        self.stage_index += 1;
    }

    pub(crate) fn into_payload(self) -> Payload {
        self.payload
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("pipeline", &self.pipeline_id())
            .field("stage_index", &self.stage_index)
            .field("stage_count", &self.stage_count())
            .field("payload", &self.payload)
            .finish()
    }
}
