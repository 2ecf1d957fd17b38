//! # patchloop-logging
//!
//! Event records and logging for patchloop.
//!
//! The iteration loop reports every significant transition as an
//! [`IterationRecord`] appended to an [`EventSink`]. Sinks here cover the
//! in-memory [`EventBus`] (ordered history plus per-task live
//! subscriptions), the console [`Logger`], and fan-out to several sinks.
//!
//! ## Log Formats
//!
//! - `Pretty` - Human-readable colored output
//! - `JSON` - Structured JSON lines
//! - `Compact` - Minimal text output

mod artifacts;
mod events;
mod logger;
mod sink;

pub use artifacts::{ArtifactKind, ArtifactRef, ArtifactStore, FsArtifactStore};
pub use events::{EventKind, IterationRecord, LogFormat, LoopEvent};
pub use logger::Logger;
pub use sink::{EventBus, EventFanout, EventSink, Subscription};

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing for the application.
///
/// With `log_file`, diagnostics are also written there as JSON lines; keep
/// the returned guard alive until exit so the file is flushed.
pub fn init_tracing(
    level: &str,
    format: LogFormat,
    log_file: Option<&Path>,
) -> std::io::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Pretty | LogFormat::Compact => fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path.file_name().ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "log file needs a file name",
                )
            })?;
            std::fs::create_dir_all(dir)?;

            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .init();

    Ok(guard)
}
