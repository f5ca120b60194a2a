//! Per-pipeline result accumulators.
//!
//! Workers append outcomes under the engine lock. A launch swaps the whole
//! set out for a pre-built empty one, so harvesting never copies entries
//! while new work keeps accumulating.

use crate::job::{Payload, TaskError};
use crate::pipeline::PipelineId;

/// Outcome of one job: its final payload, or the error a stage recorded.
pub type JobResult = Result<Payload, TaskError>;

/// Outcomes collected for one pipeline in one lane.
#[derive(Debug, Default)]
pub struct ResultAccumulator {
    count: usize,
    entries: Vec<JobResult>,
}

impl ResultAccumulator {
    pub(crate) fn push(&mut self, result: JobResult) {
        self.entries.push(result);
        self.count += 1;
    }

    /// Number of recorded outcomes.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn entries(&self) -> &[JobResult] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<JobResult> {
        self.entries
    }

    pub fn completed(&self) -> impl Iterator<Item = &Payload> {
        self.entries.iter().filter_map(|entry| entry.as_ref().ok())
    }

    pub fn errors(&self) -> impl Iterator<Item = &TaskError> {
        self.entries.iter().filter_map(|entry| entry.as_ref().err())
    }
}

/// Results harvested by one launch, indexed by pipeline.
#[derive(Debug, Default)]
pub struct LaunchResults {
    pipelines: Vec<ResultAccumulator>,
}

impl LaunchResults {
    pub fn get(&self, id: PipelineId) -> Option<&ResultAccumulator> {
        self.pipelines.get(id.index())
    }

    /// Take one pipeline's accumulator, leaving an empty one behind.
    pub fn take(&mut self, id: PipelineId) -> ResultAccumulator {
        self.pipelines
            .get_mut(id.index())
            .map(std::mem::take)
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PipelineId, &ResultAccumulator)> {
        self.pipelines
            .iter()
            .enumerate()
            .map(|(index, results)| (PipelineId(index), results))
    }

    /// Number of pipelines covered, including those with no outcomes.
    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    /// Total outcomes across all pipelines.
    pub fn total(&self) -> usize {
        self.pipelines.iter().map(ResultAccumulator::count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.iter().all(ResultAccumulator::is_empty)
    }
}

/// What `launch_async` returns.
#[derive(Debug, Default)]
pub struct AsyncLaunch {
    /// Async outcomes recorded since the previous async launch.
    pub results: LaunchResults,
    /// Size of the async active queue observed under the lock. A snapshot,
    /// not a completion signal: workers may already be consuming it.
    pub active: usize,
}

/// The live accumulators of one lane, owned by the engine state.
#[derive(Debug, Default)]
pub(crate) struct ResultSet {
    pipelines: Vec<ResultAccumulator>,
}

impl ResultSet {
    pub(crate) fn add_pipeline(&mut self) {
        self.pipelines.push(ResultAccumulator::default());
    }

    pub(crate) fn record(&mut self, id: PipelineId, result: JobResult) {
        // Accumulators are added at registration, before any job exists.
        match self.pipelines.get_mut(id.index()) {
            Some(accumulator) => accumulator.push(result),
            None => tracing::error!(
                pipeline = %id,
                accumulators = self.pipelines.len(),
                "Dropped job outcome for a pipeline without an accumulator"
            ),
        }
    }

    /// Empty slots prepared by a caller outside the lock.
    pub(crate) fn empty_slots(pipelines: usize) -> Vec<ResultAccumulator> {
        std::iter::repeat_with(ResultAccumulator::default)
            .take(pipelines)
            .collect()
    }

    /// Swap the live accumulators out for `slots`.
    ///
    /// `slots` is resized if pipelines were registered since it was built.
    pub(crate) fn harvest(&mut self, mut slots: Vec<ResultAccumulator>) -> LaunchResults {
        slots.resize_with(self.pipelines.len(), ResultAccumulator::default);
        std::mem::swap(&mut self.pipelines, &mut slots);
        LaunchResults { pipelines: slots }
    }
}
