//! The loop each worker thread runs until shutdown.
//!
//! The engine lock is held only to pick a job and to hand it back (requeue or
//! record). Stage bodies always run unlocked.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use super::state::Action;
use crate::job::{Job, TaskError};
use crate::pipeline::StageContext;
use crate::queue::Lane;
use crate::runtime::{EngineInner, StageFault};
use crate::util::panic_message;

pub(crate) fn run(inner: Arc<EngineInner>, worker_id: usize) {
    let span = tracing::debug_span!("worker", engine_id = %inner.id, worker_id);
    let _entered = span.enter();
    let _retire = RetireGuard {
        inner: &inner,
        worker_id,
    };

    tracing::trace!("Worker started");
    while let Some((job, lane)) = next_job(&inner, worker_id) {
        execute(&inner, worker_id, lane, job);
    }
}

/// Block until there is a job to run or the engine shuts down.
///
/// The queues are re-observed on every wake, so spurious wakeups and
/// wakeups meant for another worker are harmless.
fn next_job(inner: &EngineInner, worker_id: usize) -> Option<(Job, Lane)> {
    let mut state = inner.state.lock();
    loop {
        let observation = state.observe();
        let applied = state.workers.apply(worker_id, observation);
        if applied.entered_async {
            inner.sync_quiescent.notify_one();
        }

        match applied.action {
            Action::Shutdown => return None,
            Action::Park => inner.work_available.wait(&mut state),
            Action::Take(lane) => {
                if let Some(job) = state.lanes.get_mut(lane).pop() {
                    return Some((job, lane));
                }
            }
        }
    }
}

fn execute(inner: &EngineInner, worker_id: usize, lane: Lane, mut job: Job) {
    let pipeline = Arc::clone(job.pipeline());
    let ctx = StageContext {
        worker_id,
        lane,
        pipeline: pipeline.id(),
        stage_index: job.stage_index(),
        stage_count: job.stage_count(),
    };

    let Some((stage, stats)) = pipeline.stage(ctx.stage_index) else {
        tracing::error!(
            pipeline = %ctx.pipeline,
            stage_index = ctx.stage_index,
            "Job points past the end of its pipeline"
        );
        let error = TaskError {
            stage_index: ctx.stage_index,
            message: "stage index out of range".to_string(),
        };
        inner.metrics.increment_failed();
        inner.state.lock().results_mut(lane).record(ctx.pipeline, Err(error));
        return;
    };

    tracing::trace!(pipeline = %ctx.pipeline, %lane, stage = stage.name(), "Running stage");
    let started = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| stage.run(&mut job.payload, &ctx)));
    if let Err(cause) = outcome {
        if lane == Lane::Sync {
            inner.state.lock().record_sync_fault(StageFault {
                worker_id,
                pipeline: ctx.pipeline,
                stage_index: ctx.stage_index,
                message: panic_message(cause.as_ref()),
            });
        }
        // The worker still dies; shutdown reports the same panic on join.
        panic::resume_unwind(cause);
    }
    let task_error = job.payload.take_task_error();
    stats.record(started.elapsed(), task_error.is_some());
    inner.metrics.increment_stages_executed();

    match task_error {
        Some(mut error) => {
            error.stage_index = ctx.stage_index;
            tracing::debug!(
                pipeline = %ctx.pipeline,
                %lane,
                stage = stage.name(),
                error = %error.message,
                "Stage reported a task error"
            );
            inner.metrics.increment_failed();
            inner.state.lock().results_mut(lane).record(ctx.pipeline, Err(error));
        }
        None if job.has_next_stage() => {
            job.advance();
            inner.metrics.increment_continuations();
            let mut state = inner.state.lock();
            state.lanes.get_mut(lane).requeue(job);
            // A peer may have seen both lanes empty between our pop and this
            // push and gone to sleep.
            inner.work_available.notify_one();
        }
        None => {
            inner.metrics.increment_completed();
            inner
                .state
                .lock()
                .results_mut(lane)
                .record(ctx.pipeline, Ok(job.into_payload()));
        }
    }
}

/// Marks the worker dead when its thread leaves `run`, including by unwinding
/// out of a panicking stage, and wakes anyone waiting on worker states.
struct RetireGuard<'a> {
    inner: &'a EngineInner,
    worker_id: usize,
}

impl Drop for RetireGuard<'_> {
    fn drop(&mut self) {
        let counts = {
            let mut state = self.inner.state.lock();
            state.workers.retire(self.worker_id);
            state.workers.counts()
        };

        if std::thread::panicking() {
            tracing::error!(
                live_workers = counts.live(),
                "Worker terminated by a panicking stage"
            );
        } else {
            tracing::debug!("Worker exited");
        }

        self.inner.sync_quiescent.notify_one();
        self.inner.all_dead.notify_one();
    }
}
