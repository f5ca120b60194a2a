//! Stage definition for pipeline execution.

use std::any::Any;
use std::fmt::{self, Display};

use crate::job::Payload;
use crate::pipeline::PipelineId;
use crate::queue::Lane;

/// Boxed stage body. Mutates the payload in place to become the input of the
/// next stage.
pub type StageFn = Box<dyn Fn(&mut Payload, &StageContext) + Send + Sync>;

/// Identity handed to a stage body while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageContext {
    /// Index of the worker thread running the stage.
    pub worker_id: usize,
    /// Lane the job was dequeued from.
    pub lane: Lane,
    pub pipeline: PipelineId,
    pub stage_index: usize,
    pub stage_count: usize,
}

/// One step of a pipeline.
///
/// A stage signals failure by leaving a [`TaskError`](crate::job::TaskError)
/// in the payload, which stops the job and records the error. Panicking
/// inside a stage is a programming error and terminates the worker running
/// it.
pub struct Stage {
    name: String,
    body: StageFn,
}

impl Stage {
    /// Create a stage from a raw body operating on the payload.
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut Payload, &StageContext) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            body: Box::new(body),
        }
    }

    /// Create a stage that consumes an `I` and produces an `O`.
    ///
    /// # Panics
    ///
    /// The stage panics when the payload does not hold an `I`. That means the
    /// pipeline was assembled from stages whose types do not line up.
    pub fn map<I, O, F>(name: impl Into<String>, f: F) -> Self
    where
        I: Any + Send,
        O: Any + Send,
        F: Fn(I, &StageContext) -> O + Send + Sync + 'static,
    {
        let name = name.into();
        let label = name.clone();
        Self::new(name, move |payload, ctx| {
            let input = payload
                .take::<I>()
                .unwrap_or_else(|e| panic!("stage `{label}`: {e}"));
            payload.set(f(input, ctx));
        })
    }

    /// Like [`Stage::map`], but an `Err` turns the payload into a task error
    /// carrying the error's message.
    ///
    /// # Panics
    ///
    /// Panics on a payload type mismatch, like [`Stage::map`].
    pub fn try_map<I, O, E, F>(name: impl Into<String>, f: F) -> Self
    where
        I: Any + Send,
        O: Any + Send,
        E: Display,
        F: Fn(I, &StageContext) -> Result<O, E> + Send + Sync + 'static,
    {
        let name = name.into();
        let label = name.clone();
        Self::new(name, move |payload, ctx| {
            let input = payload
                .take::<I>()
                .unwrap_or_else(|e| panic!("stage `{label}`: {e}"));
            match f(input, ctx) {
                Ok(output) => payload.set(output),
                Err(e) => payload.fail(e.to_string()),
            }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn run(&self, payload: &mut Payload, ctx: &StageContext) {
        (self.body)(payload, ctx)
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage").field("name", &self.name).finish()
    }
}
