//! Engine-wide counters.
//!
//! Stored as `AtomicU64` and updated with relaxed ordering outside the engine
//! lock. Counters never reset; delta calculation is the caller's
//! responsibility.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub(crate) struct EngineMetricsStorage {
    jobs_submitted: AtomicU64,
    sync_launches: AtomicU64,
    async_launches: AtomicU64,
    stages_executed: AtomicU64,
    continuations_requeued: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
}

impl EngineMetricsStorage {
    pub(crate) fn add_submitted(&self, jobs: u64) {
        self.jobs_submitted.fetch_add(jobs, Ordering::Relaxed);
    }

    pub(crate) fn increment_sync_launches(&self) {
        self.sync_launches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_async_launches(&self) {
        self.async_launches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_stages_executed(&self) {
        self.stages_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_continuations(&self) {
        self.continuations_requeued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> EngineMetrics {
        EngineMetrics {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            sync_launches: self.sync_launches.load(Ordering::Relaxed),
            async_launches: self.async_launches.load(Ordering::Relaxed),
            stages_executed: self.stages_executed.load(Ordering::Relaxed),
            continuations_requeued: self.continuations_requeued.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineMetrics {
    pub jobs_submitted: u64,
    pub sync_launches: u64,
    pub async_launches: u64,
    pub stages_executed: u64,
    pub continuations_requeued: u64,
    /// Jobs that ran every stage.
    pub jobs_completed: u64,
    /// Jobs stopped by a task error.
    pub jobs_failed: u64,
}

impl EngineMetrics {
    /// Jobs submitted but not yet completed or failed.
    pub fn jobs_outstanding(&self) -> u64 {
        self.jobs_submitted
            .saturating_sub(self.jobs_completed + self.jobs_failed)
    }
}
