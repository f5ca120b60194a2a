use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::pipeline::PipelineId;

/// Lock-free per-stage counters, updated by workers after each execution.
#[derive(Debug, Default)]
pub(crate) struct StageStats {
    executions: AtomicU64,
    failures: AtomicU64,
    busy_nanos: AtomicU64,
}

impl StageStats {
    pub(crate) fn record(&self, elapsed: Duration, failed: bool) {
        self.executions.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.busy_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    fn snapshot(&self, index: usize, name: &str) -> StageMetrics {
        StageMetrics {
            index,
            name: name.to_string(),
            executions: self.executions.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            total_duration: Duration::from_nanos(self.busy_nanos.load(Ordering::Relaxed)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageMetrics {
    pub index: usize,
    pub name: String,
    pub executions: u64,
    /// Executions that left a task error in the payload.
    pub failures: u64,
    pub total_duration: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineMetrics {
    pub pipeline: PipelineId,
    pub stages: Vec<StageMetrics>,
}

impl PipelineMetrics {
    pub(crate) fn collect<'a>(
        pipeline: PipelineId,
        stages: impl Iterator<Item = (&'a str, &'a StageStats)>,
    ) -> Self {
        Self {
            pipeline,
            stages: stages
                .enumerate()
                .map(|(index, (name, stats))| stats.snapshot(index, name))
                .collect(),
        }
    }

    pub fn stage_duration(&self, name: &str) -> Option<Duration> {
        self.stages
            .iter()
            .find(|stage| stage.name == name)
            .map(|stage| stage.total_duration)
    }

    pub fn total_executions(&self) -> u64 {
        self.stages.iter().map(|stage| stage.executions).sum()
    }
}
