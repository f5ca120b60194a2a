//! Type-erased payload carried by a job from stage to stage.
//!
//! Stages may retype the payload freely. Each stage documents the type it
//! expects; reading the payload as any other type yields
//! [`ConveyorError::TypeMismatch`] instead of undefined behavior.

use std::any::{Any, type_name};
use std::fmt;

use conveyor_shared::errors::{ConveyorError, ConveyorResult};
use thiserror::Error;

/// Error record a stage leaves in the payload to stop its job.
///
/// The engine stamps `stage_index` with the index of the stage that set it,
/// so the value given at construction is overwritten.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("stage {stage_index} failed: {message}")]
pub struct TaskError {
    pub stage_index: usize,
    pub message: String,
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            stage_index: 0,
            message: message.into(),
        }
    }
}

/// Opaque value owned by exactly one queue, worker or accumulator at a time.
pub struct Payload {
    value: Box<dyn Any + Send>,
    type_name: &'static str,
}

impl Payload {
    /// Wrap a value. Wrapping an existing `Payload` returns it unchanged.
    pub fn new<T: Any + Send>(value: T) -> Self {
        let boxed: Box<dyn Any + Send> = Box::new(value);
        match boxed.downcast::<Payload>() {
            Ok(payload) => *payload,
            Err(value) => Self {
                value,
                type_name: type_name::<T>(),
            },
        }
    }

    /// Payload holding a [`TaskError`] with the given message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(TaskError::new(message))
    }

    /// Replace the payload with a new value, possibly of a different type.
    pub fn set<T: Any + Send>(&mut self, value: T) {
        *self = Self::new(value);
    }

    /// Mark the job as failed. No further stages run for it.
    pub fn fail(&mut self, message: impl Into<String>) {
        *self = Self::failed(message);
    }

    /// Name of the type currently stored.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: Any>(&self) -> bool {
        (*self.value).is::<T>()
    }

    /// Whether the payload carries a [`TaskError`].
    pub fn is_error(&self) -> bool {
        self.is::<TaskError>()
    }

    pub fn downcast_ref<T: Any>(&self) -> ConveyorResult<&T> {
        let found = self.type_name;
        (*self.value)
            .downcast_ref::<T>()
            .ok_or_else(|| mismatch::<T>(found))
    }

    pub fn downcast_mut<T: Any>(&mut self) -> ConveyorResult<&mut T> {
        let found = self.type_name;
        (*self.value)
            .downcast_mut::<T>()
            .ok_or_else(|| mismatch::<T>(found))
    }

    /// Move the value out, leaving `()` in its place.
    ///
    /// On a type mismatch the payload is left untouched.
    pub fn take<T: Any + Send>(&mut self) -> ConveyorResult<T> {
        let previous = std::mem::replace(self, Self::new(()));
        let found = previous.type_name;
        match previous.value.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(value) => {
                *self = Self {
                    value,
                    type_name: found,
                };
                Err(mismatch::<T>(found))
            }
        }
    }

    /// Consume the payload and return the stored value.
    pub fn into_inner<T: Any>(self) -> ConveyorResult<T> {
        let found = self.type_name;
        self.value
            .downcast::<T>()
            .map(|value| *value)
            .map_err(|_| mismatch::<T>(found))
    }

    /// Remove the error record, if any, leaving `()` behind.
    pub(crate) fn take_task_error(&mut self) -> Option<TaskError> {
        if self.is_error() {
            self.take::<TaskError>().ok()
        } else {
            None
        }
    }
}

fn mismatch<T: Any>(found: &'static str) -> ConveyorError {
    ConveyorError::TypeMismatch {
        expected: type_name::<T>(),
        found,
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}
