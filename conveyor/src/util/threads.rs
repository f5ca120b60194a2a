//! Thread utilities.

use std::any::Any;
use std::num::NonZeroUsize;

/// Worker threads added on top of the hardware thread count by default.
///
/// Measured to balance keeping cores busy against context switching; more
/// threads tended to slow execution down.
pub const EXTRA_WORKER_THREADS: usize = 2;

/// Number of hardware threads available to this process.
///
/// Usable before any engine exists. Falls back to 1 when the platform cannot
/// report it.
pub fn hardware_threads() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Default worker pool size: hardware threads plus [`EXTRA_WORKER_THREADS`].
pub fn default_worker_threads() -> usize {
    hardware_threads() + EXTRA_WORKER_THREADS
}

/// Extract the message of a panic payload returned by `JoinHandle::join`.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
