//! Tracing subscriber setup for binaries and tests embedding the engine.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Log file name prefix inside [`LoggingOptions::log_dir`].
pub const LOG_FILE_PREFIX: &str = "conveyor.log";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingOptions {
    /// Filter directives used when `RUST_LOG` is unset.
    pub filter: String,
    /// Also write logs to a daily rolling file in this directory.
    pub log_dir: Option<PathBuf>,
    /// Colored stderr output.
    pub ansi: bool,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            log_dir: None,
            ansi: true,
        }
    }
}

/// Install the global subscriber.
///
/// Returns the file writer guard when a log directory is configured; logs
/// buffered for the file are flushed when it is dropped. Returns `None` when
/// no file is configured or a global subscriber already exists, in which case
/// the existing one is left in place.
pub fn init_logging(options: &LoggingOptions) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&options.filter));

    let (file_layer, guard) = match &options.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_names(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(options.ansi)
                .with_thread_names(true),
        )
        .with(file_layer)
        .try_init();

    match installed {
        Ok(()) => guard,
        Err(_) => None,
    }
}
