//! Worker state machine.
//!
//! Every dispatch decision is a pure transition `(state, observation) ->
//! (next state, action)`. The table below is the whole protocol:
//!
//! ```text
//! state          observation      next       action
//! any            KillRequested    Dead       Shutdown
//! any            SyncPending      Sync       Take(Sync)
//! any            AsyncPending     Async      Take(Async)
//! any            Drained          Sleeping   Park
//! Dead           any              Dead       Shutdown
//! ```
//!
//! `Async` and `Sleeping` count as async for the sync quiescence barrier. A
//! worker leaving `Idle` or `Sync` for one of them has just stopped touching
//! the sync lane, which is what a blocked `launch_sync` waits for.

use serde::Serialize;

use crate::queue::Lane;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Spawned, has not made a dispatch decision yet.
    Idle,
    /// Serving the sync lane.
    Sync,
    /// Serving the async lane, or about to.
    Async,
    /// Parked with both lanes empty.
    Sleeping,
    /// Left the dispatch loop.
    Dead,
}

/// What a worker sees in the queues when it makes a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Observation {
    KillRequested,
    SyncPending,
    AsyncPending,
    Drained,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    Shutdown,
    Take(Lane),
    Park,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Transition {
    pub(crate) next: WorkerState,
    pub(crate) action: Action,
}

impl WorkerState {
    pub(crate) fn on(self, observation: Observation) -> Transition {
        let (next, action) = match (self, observation) {
            (WorkerState::Dead, _) | (_, Observation::KillRequested) => {
                (WorkerState::Dead, Action::Shutdown)
            }
            (_, Observation::SyncPending) => (WorkerState::Sync, Action::Take(Lane::Sync)),
            (_, Observation::AsyncPending) => (WorkerState::Async, Action::Take(Lane::Async)),
            (_, Observation::Drained) => (WorkerState::Sleeping, Action::Park),
        };
        Transition { next, action }
    }

    pub fn counts_as_async(self) -> bool {
        matches!(self, WorkerState::Async | WorkerState::Sleeping)
    }

    pub fn is_sleeping(self) -> bool {
        self == WorkerState::Sleeping
    }

    pub fn is_dead(self) -> bool {
        self == WorkerState::Dead
    }
}

/// Aggregate view of the worker table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerCounts {
    pub total: usize,
    pub sleeping: usize,
    /// Workers counted async (`Async` or `Sleeping`).
    pub async_: usize,
    pub dead: usize,
}

impl WorkerCounts {
    pub fn live(&self) -> usize {
        self.total - self.dead
    }

    /// No live worker is touching the sync lane.
    pub fn all_async(&self) -> bool {
        self.async_ + self.dead == self.total
    }
}

/// Result of applying an observation to one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Applied {
    pub(crate) action: Action,
    /// The worker just started counting as async.
    pub(crate) entered_async: bool,
}

/// Worker-indexed states plus counters kept in step with every transition.
#[derive(Debug)]
pub(crate) struct WorkerTable {
    states: Vec<WorkerState>,
    counts: WorkerCounts,
}

impl WorkerTable {
    pub(crate) fn new(workers: usize) -> Self {
        Self {
            states: vec![WorkerState::Idle; workers],
            counts: WorkerCounts {
                total: workers,
                ..WorkerCounts::default()
            },
        }
    }

    pub(crate) fn apply(&mut self, worker_id: usize, observation: Observation) -> Applied {
        let previous = self.state(worker_id);
        let transition = previous.on(observation);
        self.set(worker_id, transition.next);
        Applied {
            action: transition.action,
            entered_async: !previous.counts_as_async() && transition.next.counts_as_async(),
        }
    }

    /// Mark a worker dead outside the dispatch loop. Returns false if it
    /// already was.
    pub(crate) fn retire(&mut self, worker_id: usize) -> bool {
        if self.state(worker_id).is_dead() {
            return false;
        }
        self.set(worker_id, WorkerState::Dead);
        true
    }

    pub(crate) fn counts(&self) -> WorkerCounts {
        self.counts
    }

    pub(crate) fn states(&self) -> &[WorkerState] {
        &self.states
    }

    fn state(&self, worker_id: usize) -> WorkerState {
        self.states
            .get(worker_id)
            .copied()
            .unwrap_or(WorkerState::Dead)
    }

    fn set(&mut self, worker_id: usize, next: WorkerState) {
        let Some(slot) = self.states.get_mut(worker_id) else {
            return;
        };
        let previous = std::mem::replace(slot, next);
        let counts = &mut self.counts;

        if previous.counts_as_async() {
            counts.async_ -= 1;
        }
        if previous.is_sleeping() {
            counts.sleeping -= 1;
        }
        if previous.is_dead() {
            counts.dead -= 1;
        }

        if next.counts_as_async() {
            counts.async_ += 1;
        }
        if next.is_sleeping() {
            counts.sleeping += 1;
        }
        if next.is_dead() {
            counts.dead += 1;
        }
    }
}
