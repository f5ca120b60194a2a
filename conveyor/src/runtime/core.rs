//! The engine handle: pipeline registration, submission, launches and
//! lifecycle.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};

use conveyor_shared::errors::{ConveyorError, ConveyorResult};

use crate::job::{Job, Payload};
use crate::pipeline::{PipelineId, PipelineMetrics, Stage};
use crate::queue::Lane;
use crate::results::{AsyncLaunch, LaunchResults, ResultSet};
use crate::runtime::options::EngineOptions;
use crate::runtime::shared::EngineInner;
use crate::runtime::types::EngineId;
use crate::metrics::EngineMetrics;
use crate::util::panic_message;
use crate::worker::{self, WorkerCounts, WorkerState};

/// A fixed pool of worker threads driving jobs through registered pipelines.
///
/// Work is submitted into one of two lanes. Sync work is started by
/// [`launch_sync`](Self::launch_sync), which blocks until the lane has fully
/// drained. Async work is started by [`launch_async`](Self::launch_async),
/// which returns immediately; its outcomes are collected by later calls.
/// Sync work always has priority at the next dispatch decision of any worker.
///
/// All methods except [`shutdown`](Self::shutdown) take `&self`, so an engine
/// can be shared between submitting threads. Dropping the engine shuts it
/// down and joins every worker.
pub struct Engine {
    inner: Arc<EngineInner>,
    workers: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Spawn the worker pool.
    ///
    /// # Errors
    ///
    /// Returns error if the options are invalid or a worker thread cannot be
    /// spawned. Workers spawned before the failure are shut down and joined.
    pub fn new(options: EngineOptions) -> ConveyorResult<Self> {
        options.validate()?;
        let thread_count = options.resolved_worker_threads();

        let mut engine = Self {
            inner: Arc::new(EngineInner::new(thread_count)),
            workers: Vec::with_capacity(thread_count),
        };

        for worker_id in 0..thread_count {
            let mut builder =
                thread::Builder::new().name(format!("{}-{}", options.thread_name, worker_id));
            if let Some(stack_size) = options.stack_size {
                builder = builder.stack_size(stack_size);
            }

            let inner = Arc::clone(&engine.inner);
            match builder.spawn(move || worker::run(inner, worker_id)) {
                Ok(handle) => engine.workers.push(handle),
                Err(e) => {
                    tracing::error!(
                        engine_id = %engine.inner.id,
                        worker_id,
                        error = %e,
                        "Failed to spawn worker thread"
                    );
                    engine.abandon_unspawned(worker_id, thread_count);
                    return Err(e.into());
                }
            }
        }

        tracing::info!(
            engine_id = %engine.inner.id,
            workers = thread_count,
            "Engine started"
        );
        Ok(engine)
    }

    /// Engine with an explicit worker count and default options otherwise.
    pub fn with_threads(worker_threads: usize) -> ConveyorResult<Self> {
        Self::new(EngineOptions::with_worker_threads(worker_threads))
    }

    pub fn id(&self) -> EngineId {
        self.inner.id
    }

    pub fn thread_count(&self) -> usize {
        self.inner.state.lock().workers.counts().total
    }

    /// Register a pipeline and return its permanent id.
    ///
    /// Safe while workers are running, though pipelines are normally all
    /// registered before submission starts.
    ///
    /// # Errors
    ///
    /// Returns [`ConveyorError::EmptyPipeline`] for an empty stage list and
    /// [`ConveyorError::ShutDown`] after shutdown.
    pub fn register_pipeline(&self, stages: Vec<Stage>) -> ConveyorResult<PipelineId> {
        let stage_count = stages.len();
        let id = {
            let mut state = self.inner.state.lock();
            if state.shutting_down {
                return Err(ConveyorError::ShutDown);
            }
            let id = state.register(stages)?;
            self.inner
                .pipeline_count
                .store(state.pipelines.len(), Ordering::Release);
            id
        };

        tracing::debug!(
            engine_id = %self.inner.id,
            pipeline = %id,
            stages = stage_count,
            "Registered pipeline"
        );
        Ok(id)
    }

    /// Buffer an item for the sync lane. It runs at the next `launch_sync`.
    pub fn submit<T: Any + Send>(&self, pipeline: PipelineId, value: T) -> ConveyorResult<()> {
        self.submit_to(Lane::Sync, pipeline, value)
    }

    /// Buffer an item for the async lane. It runs after the next `launch_async`.
    pub fn submit_async<T: Any + Send>(
        &self,
        pipeline: PipelineId,
        value: T,
    ) -> ConveyorResult<()> {
        self.submit_to(Lane::Async, pipeline, value)
    }

    /// Buffer an item for `lane`.
    ///
    /// # Errors
    ///
    /// Returns [`ConveyorError::UnknownPipeline`] if `pipeline` was never
    /// registered and [`ConveyorError::ShutDown`] after shutdown.
    pub fn submit_to<T: Any + Send>(
        &self,
        lane: Lane,
        pipeline: PipelineId,
        value: T,
    ) -> ConveyorResult<()> {
        self.submit_many(lane, pipeline, std::iter::once(value))
    }

    /// Buffer several items for `lane` under a single lock acquisition,
    /// preserving iteration order.
    pub fn submit_many<T, I>(&self, lane: Lane, pipeline: PipelineId, values: I) -> ConveyorResult<()>
    where
        T: Any + Send,
        I: IntoIterator<Item = T>,
    {
        let payloads: Vec<Payload> = values.into_iter().map(Payload::new).collect();
        let submitted = payloads.len() as u64;

        {
            let mut state = self.inner.state.lock();
            if state.shutting_down {
                return Err(ConveyorError::ShutDown);
            }
            let target = Arc::clone(state.pipelines.get(pipeline)?);
            let queue = state.lanes.get_mut(lane);
            for payload in payloads {
                queue.push_buffered(Job::new(Arc::clone(&target), payload));
            }
        }

        self.inner.metrics.add_submitted(submitted);
        Ok(())
    }

    /// Run everything buffered for the sync lane and block until it drained.
    ///
    /// When this returns, every job submitted to the sync lane before the call
    /// has either completed all its stages or recorded a task error, and no
    /// worker holds sync work.
    ///
    /// # Errors
    ///
    /// Returns [`ConveyorError::ShutDown`] after shutdown. Returns
    /// [`ConveyorError::WorkerPanicked`] once the lane has drained if a stage
    /// panicked on a sync job during this launch; that job is lost and its
    /// worker is gone. Returns [`ConveyorError::NoLiveWorkers`] if every worker
    /// has been torn down by a panicking stage while sync work is still
    /// queued. On either failure the outcomes already recorded for this launch
    /// are discarded, so no later launch reports them.
    pub fn launch_sync(&self) -> ConveyorResult<LaunchResults> {
        let _gate = self.inner.launch_gate.lock();
        let slots = ResultSet::empty_slots(self.inner.pipeline_count.load(Ordering::Acquire));

        let mut state = self.inner.state.lock();
        if state.shutting_down {
            return Err(ConveyorError::ShutDown);
        }

        let promoted = state.lanes.get_mut(Lane::Sync).promote_swap();
        self.inner.wake_sleeping(state.workers.counts());
        tracing::debug!(engine_id = %self.inner.id, promoted, "Launched sync lane");

        self.inner
            .sync_quiescent
            .wait_while(&mut state, |state| !state.sync_settled() && !state.sync_stalled());

        if !state.sync_settled() {
            let dropped = state.abandon_sync_round();
            tracing::warn!(
                engine_id = %self.inner.id,
                pending = state.lanes.get(Lane::Sync).active_len(),
                dropped,
                "Sync lane stalled: no live workers"
            );
            return Err(ConveyorError::NoLiveWorkers);
        }
        if let Some(fault) = state.sync_fault.take() {
            let dropped = state.abandon_sync_round();
            tracing::error!(
                engine_id = %self.inner.id,
                worker_id = fault.worker_id,
                pipeline = %fault.pipeline,
                stage_index = fault.stage_index,
                dropped,
                "Sync round failed: a stage panicked"
            );
            return Err(ConveyorError::WorkerPanicked {
                worker_id: fault.worker_id,
                message: fault.message,
            });
        }

        let results = state.results_mut(Lane::Sync).harvest(slots);
        drop(state);

        self.inner.metrics.increment_sync_launches();
        Ok(results)
    }

    /// Move everything buffered for the async lane behind the work already
    /// running there and collect async outcomes recorded so far.
    ///
    /// Never blocks on workers.
    pub fn launch_async(&self) -> ConveyorResult<AsyncLaunch> {
        let slots = ResultSet::empty_slots(self.inner.pipeline_count.load(Ordering::Acquire));

        let mut state = self.inner.state.lock();
        if state.shutting_down {
            return Err(ConveyorError::ShutDown);
        }

        let queue = state.lanes.get_mut(Lane::Async);
        let promoted = queue.promote_append();
        let active = queue.active_len();
        if active > 0 {
            self.inner.wake_sleeping(state.workers.counts());
        }
        let results = state.results_mut(Lane::Async).harvest(slots);
        drop(state);

        tracing::trace!(engine_id = %self.inner.id, promoted, active, "Launched async lane");
        self.inner.metrics.increment_async_launches();
        Ok(AsyncLaunch { results, active })
    }

    /// Items waiting in `lane`'s buffer for the next launch.
    pub fn buffered(&self, lane: Lane) -> usize {
        self.inner.state.lock().lanes.get(lane).buffered_len()
    }

    /// Items in `lane`'s active queue, not counting ones being executed.
    pub fn active(&self, lane: Lane) -> usize {
        self.inner.state.lock().lanes.get(lane).active_len()
    }

    pub fn pipeline_count(&self) -> usize {
        self.inner.pipeline_count.load(Ordering::Acquire)
    }

    pub fn worker_counts(&self) -> WorkerCounts {
        self.inner.state.lock().workers.counts()
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.inner.state.lock().workers.states().to_vec()
    }

    pub fn metrics(&self) -> EngineMetrics {
        self.inner.metrics.snapshot()
    }

    pub fn pipeline_metrics(&self, pipeline: PipelineId) -> ConveyorResult<PipelineMetrics> {
        let target = Arc::clone(self.inner.state.lock().pipelines.get(pipeline)?);
        Ok(target.metrics())
    }

    /// Stop the workers and join them.
    ///
    /// Stages already running finish normally; queued work is left unrun.
    /// Calling this more than once is harmless.
    ///
    /// # Errors
    ///
    /// Returns [`ConveyorError::WorkerPanicked`] for the first worker whose
    /// thread was torn down by a panicking stage. Every worker is joined
    /// regardless.
    pub fn shutdown(&mut self) -> ConveyorResult<()> {
        if self.workers.is_empty() {
            self.inner.state.lock().shutting_down = true;
            return Ok(());
        }

        {
            let mut state = self.inner.state.lock();
            state.shutting_down = true;
            self.inner.work_available.notify_all();
            self.inner
                .all_dead
                .wait_while(&mut state, |state| state.workers.counts().live() > 0);
        }

        let mut first_panic = None;
        for (worker_id, handle) in self.workers.drain(..).enumerate() {
            if let Err(payload) = handle.join() {
                let message = panic_message(payload.as_ref());
                tracing::error!(
                    engine_id = %self.inner.id,
                    worker_id,
                    %message,
                    "Worker panicked"
                );
                first_panic.get_or_insert(ConveyorError::WorkerPanicked { worker_id, message });
            }
        }

        tracing::info!(engine_id = %self.inner.id, "Engine shut down");
        match first_panic {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Mark workers that were never spawned as dead so shutdown does not
    /// wait for them.
    fn abandon_unspawned(&self, from: usize, to: usize) {
        let mut state = self.inner.state.lock();
        for worker_id in from..to {
            state.workers.retire(worker_id);
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!(engine_id = %self.inner.id, error = %e, "Engine shutdown reported an error");
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.inner.id)
            .field("workers", &self.workers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::TaskError;
    use crate::pipeline::PipelineBuilder;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    fn completed<T: Any + Clone>(results: &LaunchResults, id: PipelineId) -> Vec<T> {
        results
            .get(id)
            .unwrap()
            .completed()
            .map(|payload| payload.downcast_ref::<T>().unwrap().clone())
            .collect()
    }

    fn wait_until_all_sleeping(engine: &Engine) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !engine.worker_states().iter().all(|state| state.is_sleeping()) {
            assert!(Instant::now() < deadline, "workers never parked");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn double_then_label(engine: &Engine) -> PipelineId {
        PipelineBuilder::new()
            .stage(Stage::map("double", |n: i64, _| n * 2))
            .stage(Stage::map("label", |n: i64, _| format!("{n}.done")))
            .register(engine)
            .unwrap()
    }

    #[test]
    fn test_two_stage_pipeline_in_order() {
        let engine = Engine::with_threads(1).unwrap();
        let id = double_then_label(&engine);

        for value in [1_i64, 2, 3] {
            engine.submit(id, value).unwrap();
        }
        let results = engine.launch_sync().unwrap();

        assert_eq!(
            completed::<String>(&results, id),
            vec!["2.done", "4.done", "6.done"]
        );
        assert_eq!(results.get(id).unwrap().count(), 3);
    }

    #[test]
    fn test_task_error_recorded_per_job() {
        let engine = Engine::with_threads(3).unwrap();
        let id = engine
            .register_pipeline(vec![Stage::try_map("increment", |n: i64, _| {
                if n == 0 {
                    Err("input is zero")
                } else {
                    Ok(n + 1)
                }
            })])
            .unwrap();

        engine.submit_many(Lane::Sync, id, [0_i64, 1, 2]).unwrap();
        let results = engine.launch_sync().unwrap();
        let outcomes = results.get(id).unwrap();

        assert_eq!(outcomes.count(), 3);
        let errors: Vec<&TaskError> = outcomes.errors().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].stage_index, 0);
        assert_eq!(errors[0].message, "input is zero");

        let mut values = completed::<i64>(&results, id);
        values.sort_unstable();
        assert_eq!(values, vec![2, 3]);
    }

    #[test]
    fn test_error_stage_index_is_stamped() {
        let engine = Engine::with_threads(2).unwrap();
        let id = PipelineBuilder::new()
            .stage(Stage::map("pass", |n: u32, _| n))
            .stage(Stage::new("reject", |payload, _| payload.fail("rejected")))
            .stage(Stage::new("unreachable", |payload, _| payload.set("ran")))
            .register(&engine)
            .unwrap();

        engine.submit(id, 1_u32).unwrap();
        let results = engine.launch_sync().unwrap();
        let errors: Vec<&TaskError> = results.get(id).unwrap().errors().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].stage_index, 1);

        let metrics = engine.pipeline_metrics(id).unwrap();
        assert_eq!(metrics.stages[1].failures, 1);
        assert_eq!(metrics.stages[2].executions, 0);
    }

    #[test]
    fn test_single_stage_results_keep_submission_order() {
        let engine = Engine::with_threads(1).unwrap();
        let id = engine
            .register_pipeline(vec![Stage::map("square", |n: u64, _| n * n)])
            .unwrap();

        engine.submit_many(Lane::Sync, id, 0_u64..100).unwrap();
        let results = engine.launch_sync().unwrap();

        let expected: Vec<u64> = (0_u64..100).map(|n| n * n).collect();
        assert_eq!(completed::<u64>(&results, id), expected);
    }

    #[test]
    fn test_continuations_finish_before_new_jobs_start() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let engine = Engine::with_threads(1).unwrap();

        let first = Arc::clone(&events);
        let second = Arc::clone(&events);
        let id = PipelineBuilder::new()
            .stage(Stage::new("first", move |payload, ctx| {
                let job = *payload.downcast_ref::<u8>().unwrap();
                first.lock().push((job, ctx.stage_index));
            }))
            .stage(Stage::new("second", move |payload, ctx| {
                let job = *payload.downcast_ref::<u8>().unwrap();
                second.lock().push((job, ctx.stage_index));
            }))
            .register(&engine)
            .unwrap();

        engine.submit_many(Lane::Sync, id, [0_u8, 1, 2]).unwrap();
        engine.launch_sync().unwrap();

        assert_eq!(
            *events.lock(),
            vec![(0, 0), (0, 1), (1, 0), (1, 1), (2, 0), (2, 1)]
        );
    }

    #[test]
    fn test_every_job_reported_exactly_once() {
        let engine = Engine::with_threads(4).unwrap();
        let id = PipelineBuilder::new()
            .stage(Stage::map("widen", |n: u32, _| u64::from(n)))
            .stage(Stage::map("offset", |n: u64, _| n + 1_000))
            .stage(Stage::map("back", |n: u64, _| n - 1_000))
            .register(&engine)
            .unwrap();

        engine.submit_many(Lane::Sync, id, 0_u32..500).unwrap();
        let results = engine.launch_sync().unwrap();

        let mut values = completed::<u64>(&results, id);
        values.sort_unstable();
        assert_eq!(values, (0_u64..500).collect::<Vec<_>>());
        assert_eq!(engine.metrics().stages_executed, 1_500);
        assert_eq!(engine.metrics().jobs_outstanding(), 0);
    }

    #[test]
    fn test_launch_sync_never_returns_with_sync_work_in_flight() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let engine = Engine::with_threads(4).unwrap();

        let stages = (0..3)
            .map(|index| {
                let in_flight = Arc::clone(&in_flight);
                Stage::new(format!("step{index}"), move |payload, _| {
                    in_flight.fetch_add(1, Ordering::SeqCst);
                    let n = payload.downcast_mut::<u64>().unwrap();
                    for _ in 0..(*n % 7) * 50 {
                        *n = std::hint::black_box(*n);
                    }
                    *n += 1;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        let id = engine.register_pipeline(stages).unwrap();

        for round in 0..50_u64 {
            let items = 1 + round % 20;
            engine.submit_many(Lane::Sync, id, 0..items).unwrap();
            let results = engine.launch_sync().unwrap();

            assert_eq!(in_flight.load(Ordering::SeqCst), 0, "round {round}");
            assert_eq!(results.get(id).unwrap().count() as u64, items);
            assert_eq!(engine.active(Lane::Sync), 0);
            assert!(
                engine
                    .worker_states()
                    .iter()
                    .all(|state| state.counts_as_async())
            );
        }
    }

    #[test]
    fn test_sync_jobs_preempt_queued_async_jobs() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let engine = Engine::with_threads(1).unwrap();

        let async_log = Arc::clone(&log);
        let background = engine
            .register_pipeline(vec![Stage::new("background", move |_, _| {
                std::thread::sleep(Duration::from_micros(200));
                async_log.lock().push(Lane::Async);
            })])
            .unwrap();
        let sync_log = Arc::clone(&log);
        let urgent = engine
            .register_pipeline(vec![Stage::new("urgent", move |_, _| {
                sync_log.lock().push(Lane::Sync);
            })])
            .unwrap();

        engine.submit_many(Lane::Async, background, 0..50).unwrap();
        engine.launch_async().unwrap();
        engine.submit_many(Lane::Sync, urgent, 0..10).unwrap();
        let results = engine.launch_sync().unwrap();
        assert_eq!(results.get(urgent).unwrap().count(), 10);

        let log = log.lock();
        let sync_positions: Vec<usize> = log
            .iter()
            .enumerate()
            .filter(|(_, lane)| **lane == Lane::Sync)
            .map(|(index, _)| index)
            .collect();
        assert_eq!(sync_positions.len(), 10);
        assert_eq!(sync_positions[9] - sync_positions[0], 9);
    }

    #[test]
    fn test_empty_async_launch_reports_nothing() {
        let engine = Engine::with_threads(2).unwrap();
        let id = double_then_label(&engine);
        wait_until_all_sleeping(&engine);

        let launch = engine.launch_async().unwrap();
        assert_eq!(launch.active, 0);
        assert!(launch.results.is_empty());
        assert_eq!(launch.results.pipeline_count(), 1);
        assert!(launch.results.get(id).unwrap().is_empty());

        std::thread::sleep(Duration::from_millis(20));
        assert!(engine.worker_states().iter().all(|state| state.is_sleeping()));
        assert_eq!(engine.metrics().stages_executed, 0);
        assert_eq!(engine.active(Lane::Async), 0);
    }

    #[test]
    fn test_empty_sync_launch_returns_immediately() {
        let engine = Engine::with_threads(2).unwrap();
        double_then_label(&engine);

        let results = engine.launch_sync().unwrap();
        assert!(results.is_empty());
        assert_eq!(results.pipeline_count(), 1);
    }

    #[test]
    fn test_async_results_collected_by_polling() {
        let engine = Engine::with_threads(3).unwrap();
        let id = double_then_label(&engine);

        engine.submit_many(Lane::Async, id, 1_i64..=40).unwrap();
        assert_eq!(engine.buffered(Lane::Async), 40);

        let first = engine.launch_async().unwrap();
        assert_eq!(engine.buffered(Lane::Async), 0);
        assert!(first.active <= 40);

        let mut collected: Vec<String> = completed(&first.results, id);
        let deadline = Instant::now() + Duration::from_secs(10);
        while collected.len() < 40 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
            let launch = engine.launch_async().unwrap();
            collected.extend(completed::<String>(&launch.results, id));
        }

        assert_eq!(collected.len(), 40);
        let mut expected: Vec<String> = (1_i64..=40).map(|n| format!("{}.done", n * 2)).collect();
        collected.sort();
        expected.sort();
        assert_eq!(collected, expected);
    }

    #[test]
    fn test_failing_jobs_do_not_affect_other_jobs() {
        let engine = Engine::with_threads(4).unwrap();
        let picky = engine
            .register_pipeline(vec![
                Stage::try_map("odd_only", |n: i32, _| {
                    if n % 2 == 0 { Err(format!("{n} is even")) } else { Ok(n) }
                }),
                Stage::map("negate", |n: i32, _| -n),
            ])
            .unwrap();
        let plain = double_then_label(&engine);

        engine.submit_many(Lane::Sync, picky, 0_i32..20).unwrap();
        engine.submit_many(Lane::Sync, plain, 0_i64..20).unwrap();
        let results = engine.launch_sync().unwrap();

        let picky_results = results.get(picky).unwrap();
        assert_eq!(picky_results.errors().count(), 10);
        let mut negated = completed::<i32>(&results, picky);
        negated.sort_unstable();
        assert_eq!(negated, vec![-19, -17, -15, -13, -11, -9, -7, -5, -3, -1]);
        assert_eq!(results.get(plain).unwrap().count(), 20);
        assert_eq!(results.get(plain).unwrap().errors().count(), 0);
        assert_eq!(engine.metrics().jobs_failed, 10);
    }

    #[test]
    fn test_unknown_pipeline_rejected() {
        let engine = Engine::with_threads(1).unwrap();
        let err = engine.submit(PipelineId(5), 1_u8).unwrap_err();
        assert!(matches!(err, ConveyorError::UnknownPipeline(5)));
        assert!(engine.pipeline_metrics(PipelineId(5)).is_err());
        assert_eq!(engine.buffered(Lane::Sync), 0);
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        let engine = Engine::with_threads(1).unwrap();
        let err = engine.register_pipeline(Vec::new()).unwrap_err();
        assert!(matches!(err, ConveyorError::EmptyPipeline));
        assert_eq!(engine.pipeline_count(), 0);
    }

    #[test]
    fn test_pipeline_registered_between_launches() {
        let engine = Engine::with_threads(2).unwrap();
        let early = double_then_label(&engine);
        engine.submit(early, 5_i64).unwrap();
        engine.launch_sync().unwrap();

        let late = engine
            .register_pipeline(vec![Stage::map("shout", |s: String, _| s.to_uppercase())])
            .unwrap();
        engine.submit(late, "quiet".to_string()).unwrap();
        let results = engine.launch_sync().unwrap();

        assert_eq!(results.pipeline_count(), 2);
        assert_eq!(completed::<String>(&results, late), vec!["QUIET"]);
        assert!(results.get(early).unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_submitters() {
        let engine = Engine::with_threads(4).unwrap();
        let id = engine
            .register_pipeline(vec![Stage::map("identity", |n: usize, _| n)])
            .unwrap();

        std::thread::scope(|scope| {
            for producer in 0..4_usize {
                let engine = &engine;
                scope.spawn(move || {
                    for n in 0..250 {
                        engine.submit(id, producer * 1_000 + n).unwrap();
                    }
                });
            }
        });

        let results = engine.launch_sync().unwrap();
        assert_eq!(results.get(id).unwrap().count(), 1_000);
        assert_eq!(engine.metrics().jobs_submitted, 1_000);
    }

    #[test]
    fn test_stage_context_identifies_worker_and_lane() {
        let engine = Engine::with_threads(3).unwrap();
        let id = engine
            .register_pipeline(vec![Stage::new("whoami", |payload, ctx| {
                payload.set((ctx.worker_id, ctx.lane, ctx.stage_count));
            })])
            .unwrap();

        engine.submit_many(Lane::Sync, id, 0..30).unwrap();
        let results = engine.launch_sync().unwrap();
        for (worker_id, lane, stage_count) in completed::<(usize, Lane, usize)>(&results, id) {
            assert!(worker_id < 3);
            assert_eq!(lane, Lane::Sync);
            assert_eq!(stage_count, 1);
        }
    }

    #[test]
    fn test_shutdown_stops_every_worker() {
        let mut engine = Engine::with_threads(3).unwrap();
        let id = double_then_label(&engine);
        engine.submit(id, 1_i64).unwrap();
        engine.launch_sync().unwrap();

        engine.shutdown().unwrap();
        let counts = engine.worker_counts();
        assert_eq!(counts.dead, 3);
        assert_eq!(counts.live(), 0);
        assert!(engine.worker_states().iter().all(|state| state.is_dead()));

        assert!(matches!(engine.submit(id, 2_i64), Err(ConveyorError::ShutDown)));
        assert!(matches!(engine.launch_sync(), Err(ConveyorError::ShutDown)));
        assert!(matches!(engine.launch_async(), Err(ConveyorError::ShutDown)));
        assert!(engine.shutdown().is_ok());
    }

    #[test]
    fn test_shutdown_leaves_queued_async_work() {
        let mut engine = Engine::with_threads(1).unwrap();
        let id = engine
            .register_pipeline(vec![Stage::new("slow", |_, _| {
                std::thread::sleep(Duration::from_millis(5));
            })])
            .unwrap();

        engine.submit_many(Lane::Async, id, 0..100).unwrap();
        engine.launch_async().unwrap();
        engine.shutdown().unwrap();

        assert!(engine.metrics().stages_executed < 100);
        assert_eq!(engine.worker_counts().dead, 1);
    }

    #[test]
    fn test_panicking_stage_fails_its_sync_round() {
        let mut engine = Engine::with_threads(2).unwrap();
        let id = engine
            .register_pipeline(vec![Stage::map("fragile", |n: u32, _| {
                assert_ne!(n, 13, "unlucky input");
                n
            })])
            .unwrap();

        engine.submit_many(Lane::Sync, id, 0_u32..20).unwrap();
        match engine.launch_sync() {
            Err(ConveyorError::WorkerPanicked { worker_id, message }) => {
                assert!(worker_id < 2);
                assert!(message.contains("unlucky input"));
            }
            other => panic!("expected a worker panic, got {other:?}"),
        }
        assert_eq!(engine.worker_counts().dead, 1);
        assert_eq!(engine.active(Lane::Sync), 0);

        // the surviving worker serves the next round, which reports only its own jobs
        engine.submit_many(Lane::Sync, id, 100_u32..105).unwrap();
        let results = engine.launch_sync().unwrap();
        assert_eq!(
            completed::<u32>(&results, id).len(),
            5,
            "outcomes of the failed round must not carry over"
        );

        match engine.shutdown() {
            Err(ConveyorError::WorkerPanicked { message, .. }) => {
                assert!(message.contains("unlucky input"));
            }
            other => panic!("expected a worker panic, got {other:?}"),
        }
    }

    #[test]
    fn test_type_mismatch_is_fatal_to_the_stage() {
        let mut engine = Engine::with_threads(2).unwrap();
        let id = PipelineBuilder::new()
            .stage(Stage::map("to_text", |n: i64, _| n.to_string()))
            .stage(Stage::map("expects_number", |n: i64, _| n + 1))
            .register(&engine)
            .unwrap();

        engine.submit(id, 1_i64).unwrap();
        let err = engine.launch_sync().unwrap_err();
        assert!(matches!(err, ConveyorError::WorkerPanicked { .. }));
        assert!(err.to_string().contains("payload type mismatch"));

        let err = engine.shutdown().unwrap_err();
        assert!(err.to_string().contains("payload type mismatch"));
    }

    #[test]
    fn test_sync_launch_fails_without_live_workers() {
        let mut engine = Engine::with_threads(1).unwrap();
        let id = engine
            .register_pipeline(vec![Stage::new("explode", |_, _| panic!("stage exploded"))])
            .unwrap();

        engine.submit_many(Lane::Sync, id, 0..2).unwrap();
        let err = engine.launch_sync().unwrap_err();
        assert!(matches!(err, ConveyorError::NoLiveWorkers));
        assert_eq!(engine.active(Lane::Sync), 1);
        assert!(engine.shutdown().is_err());
    }

    #[test]
    fn test_metrics_track_launches_and_stages() {
        let engine = Engine::with_threads(2).unwrap();
        let id = double_then_label(&engine);

        engine.submit_many(Lane::Sync, id, 0_i64..10).unwrap();
        engine.launch_sync().unwrap();
        engine.launch_async().unwrap();

        let metrics = engine.metrics();
        assert_eq!(metrics.jobs_submitted, 10);
        assert_eq!(metrics.jobs_completed, 10);
        assert_eq!(metrics.stages_executed, 20);
        assert_eq!(metrics.continuations_requeued, 10);
        assert_eq!(metrics.sync_launches, 1);
        assert_eq!(metrics.async_launches, 1);

        let pipeline = engine.pipeline_metrics(id).unwrap();
        assert_eq!(pipeline.stages[0].executions, 10);
        assert_eq!(pipeline.stages[1].executions, 10);
        assert!(pipeline.stage_duration("label").is_some());
    }

    #[test]
    fn test_invalid_options_rejected() {
        let err = Engine::with_threads(0).unwrap_err();
        assert!(matches!(err, ConveyorError::InvalidConfig(_)));
    }

    #[test]
    fn test_named_worker_threads() {
        let options = EngineOptions {
            worker_threads: Some(1),
            thread_name: "lane-test".to_string(),
            stack_size: Some(256 * 1024),
        };
        let engine = Engine::new(options).unwrap();
        let id = engine
            .register_pipeline(vec![Stage::new("thread_name", |payload, _| {
                let name = std::thread::current().name().map(str::to_string);
                payload.set(name);
            })])
            .unwrap();

        engine.submit(id, ()).unwrap();
        let results = engine.launch_sync().unwrap();
        assert_eq!(
            completed::<Option<String>>(&results, id),
            vec![Some("lane-test-0".to_string())]
        );
        assert_eq!(engine.thread_count(), 1);
    }
}
