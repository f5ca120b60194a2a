//! State shared between the engine handle and its workers.

use std::sync::atomic::AtomicUsize;

use conveyor_shared::errors::ConveyorResult;
use parking_lot::{Condvar, Mutex};

use crate::job::Job;
use crate::metrics::EngineMetricsStorage;
use crate::pipeline::{PipelineId, PipelineRegistry, Stage};
use crate::queue::{Lane, Lanes};
use crate::results::ResultSet;
use crate::runtime::types::EngineId;
use crate::worker::{Observation, WorkerCounts, WorkerTable};

/// A sync-lane stage that panicked during the current launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StageFault {
    pub(crate) worker_id: usize,
    pub(crate) pipeline: PipelineId,
    pub(crate) stage_index: usize,
    pub(crate) message: String,
}

/// Everything guarded by the engine lock.
pub(crate) struct EngineState {
    pub(crate) pipelines: PipelineRegistry,
    pub(crate) lanes: Lanes<Job>,
    sync_results: ResultSet,
    async_results: ResultSet,
    pub(crate) workers: WorkerTable,
    /// First sync stage panic since the last sync launch finished.
    pub(crate) sync_fault: Option<StageFault>,
    pub(crate) shutting_down: bool,
}

impl EngineState {
    fn new(workers: usize) -> Self {
        Self {
            pipelines: PipelineRegistry::default(),
            lanes: Lanes::default(),
            sync_results: ResultSet::default(),
            async_results: ResultSet::default(),
            workers: WorkerTable::new(workers),
            sync_fault: None,
            shutting_down: false,
        }
    }

    /// Register a pipeline and give it an empty accumulator in each lane.
    pub(crate) fn register(&mut self, stages: Vec<Stage>) -> ConveyorResult<PipelineId> {
        let id = self.pipelines.register(stages)?;
        self.sync_results.add_pipeline();
        self.async_results.add_pipeline();
        Ok(id)
    }

    pub(crate) fn results_mut(&mut self, lane: Lane) -> &mut ResultSet {
        match lane {
            Lane::Sync => &mut self.sync_results,
            Lane::Async => &mut self.async_results,
        }
    }

    /// Keep the first fault of a sync round.
    pub(crate) fn record_sync_fault(&mut self, fault: StageFault) {
        self.sync_fault.get_or_insert(fault);
    }

    /// Close a failed sync round: drop the outcomes it recorded so they are
    /// not reported by the next launch, and clear its fault. Returns the
    /// number of outcomes dropped.
    pub(crate) fn abandon_sync_round(&mut self) -> usize {
        self.sync_fault = None;
        self.sync_results.harvest(Vec::new()).total()
    }

    /// What a worker deciding its next move sees.
    pub(crate) fn observe(&self) -> Observation {
        if self.shutting_down {
            Observation::KillRequested
        } else if self.lanes.get(Lane::Sync).has_active() {
            Observation::SyncPending
        } else if self.lanes.get(Lane::Async).has_active() {
            Observation::AsyncPending
        } else {
            Observation::Drained
        }
    }

    /// Sync lane is quiescent: nothing queued and no live worker touching it.
    pub(crate) fn sync_settled(&self) -> bool {
        !self.lanes.get(Lane::Sync).has_active() && self.workers.counts().all_async()
    }

    /// Sync work is queued but nobody is left to run it.
    pub(crate) fn sync_stalled(&self) -> bool {
        self.lanes.get(Lane::Sync).has_active() && self.workers.counts().live() == 0
    }
}

/// Engine internals, shared by `Arc` between the handle and every worker.
///
/// **Locking Strategy**:
/// - `state`: the single engine lock. Queues, accumulators, the registry and
///   the worker table only change under it. Stage bodies never run under it.
/// - `launch_gate`: serializes `launch_sync` callers so the sync active queue
///   is empty whenever a launch begins. Always taken before `state`.
/// - `pipeline_count`, `metrics`: lock-free reads.
pub(crate) struct EngineInner {
    pub(crate) id: EngineId,
    pub(crate) state: Mutex<EngineState>,
    /// Signalled when work is queued or shutdown begins.
    pub(crate) work_available: Condvar,
    /// Signalled when a worker stops touching the sync lane.
    pub(crate) sync_quiescent: Condvar,
    /// Signalled when a worker exits.
    pub(crate) all_dead: Condvar,
    pub(crate) launch_gate: Mutex<()>,
    /// Mirrors the registry length so result slots can be sized before locking.
    pub(crate) pipeline_count: AtomicUsize,
    pub(crate) metrics: EngineMetricsStorage,
}

impl EngineInner {
    pub(crate) fn new(workers: usize) -> Self {
        Self {
            id: EngineId::generate(),
            state: Mutex::new(EngineState::new(workers)),
            work_available: Condvar::new(),
            sync_quiescent: Condvar::new(),
            all_dead: Condvar::new(),
            launch_gate: Mutex::new(()),
            pipeline_count: AtomicUsize::new(0),
            metrics: EngineMetricsStorage::default(),
        }
    }

    /// Wake one sleeper if exactly one is parked, otherwise all of them.
    pub(crate) fn wake_sleeping(&self, counts: WorkerCounts) {
        match counts.sleeping {
            0 => {}
            1 => {
                self.work_available.notify_one();
            }
            _ => {
                self.work_available.notify_all();
            }
        }
    }
}
