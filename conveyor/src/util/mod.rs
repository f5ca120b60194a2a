pub mod threads;

pub use threads::{default_worker_threads, hardware_threads, panic_message};
