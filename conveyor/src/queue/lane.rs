use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Priority class of a job. Sync work always preempts async work at the next
/// dispatch decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    Sync,
    Async,
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lane::Sync => f.write_str("sync"),
            Lane::Async => f.write_str("async"),
        }
    }
}

/// Queues of one lane.
///
/// Submissions accumulate in `buffer` until a launch promotes them into
/// `fresh`. Jobs coming back for their next stage go to `continuations`,
/// which workers drain before touching `fresh`. The most recently requeued
/// continuation runs first.
#[derive(Debug)]
pub(crate) struct LaneQueue<T> {
    buffer: VecDeque<T>,
    continuations: VecDeque<T>,
    fresh: VecDeque<T>,
}

impl<T> Default for LaneQueue<T> {
    fn default() -> Self {
        Self {
            buffer: VecDeque::new(),
            continuations: VecDeque::new(),
            fresh: VecDeque::new(),
        }
    }
}

impl<T> LaneQueue<T> {
    pub(crate) fn push_buffered(&mut self, item: T) {
        self.buffer.push_back(item);
    }

    pub(crate) fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Number of items workers can dequeue right now.
    pub(crate) fn active_len(&self) -> usize {
        self.continuations.len() + self.fresh.len()
    }

    pub(crate) fn has_active(&self) -> bool {
        !self.continuations.is_empty() || !self.fresh.is_empty()
    }

    /// Move the buffer into the active queue by swapping storage.
    ///
    /// Expects the active queue to be drained; falls back to appending if it
    /// is not. Returns the number of items promoted.
    pub(crate) fn promote_swap(&mut self) -> usize {
        let promoted = self.buffer.len();
        if self.fresh.is_empty() {
            self.fresh = std::mem::take(&mut self.buffer);
        } else {
            self.fresh.append(&mut self.buffer);
        }
        promoted
    }

    /// Append the buffer to the tail of the active queue, which may still be
    /// draining.
    pub(crate) fn promote_append(&mut self) -> usize {
        let promoted = self.buffer.len();
        self.fresh.append(&mut self.buffer);
        promoted
    }

    pub(crate) fn requeue(&mut self, item: T) {
        self.continuations.push_front(item);
    }

    pub(crate) fn pop(&mut self) -> Option<T> {
        self.continuations
            .pop_front()
            .or_else(|| self.fresh.pop_front())
    }
}

/// Both lanes' queues.
#[derive(Debug)]
pub(crate) struct Lanes<T> {
    sync: LaneQueue<T>,
    async_: LaneQueue<T>,
}

impl<T> Default for Lanes<T> {
    fn default() -> Self {
        Self {
            sync: LaneQueue::default(),
            async_: LaneQueue::default(),
        }
    }
}

impl<T> Lanes<T> {
    pub(crate) fn get(&self, lane: Lane) -> &LaneQueue<T> {
        match lane {
            Lane::Sync => &self.sync,
            Lane::Async => &self.async_,
        }
    }

    pub(crate) fn get_mut(&mut self, lane: Lane) -> &mut LaneQueue<T> {
        match lane {
            Lane::Sync => &mut self.sync,
            Lane::Async => &mut self.async_,
        }
    }
}
