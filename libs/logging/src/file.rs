//! File logger for daemonized runs.
//!
//! The log file is opened in append mode and never rotated for the duration of
//! the process. Writes go through [`tracing_appender`]'s non-blocking worker so
//! the datapath never blocks on disk I/O.

use std::fs::OpenOptions;
use std::path::Path;

use anyhow::{Context as _, Result};
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::Layer;

/// Create a new file logger layer writing to `path`.
///
/// The returned [`WorkerGuard`] must be kept alive for the lifetime of the
/// process; dropping it flushes and stops the background writer.
pub fn layer<T>(path: &Path) -> Result<(Box<dyn Layer<T> + Send + Sync + 'static>, WorkerGuard)>
where
    T: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file `{}`", path.display()))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    let layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking)
        .event_format(crate::Format::new())
        .boxed();

    Ok((layer, guard))
}
