//! Logging for report runs
//!
//! A run logs to `~/.local/state/vizreport/vizreport.log` (XDG state dir),
//! rotated daily. Dropped metrics, dropped fields and skipped studies are
//! only visible here, since a report run never fails because of them.
//!
//! Every data source is processed inside a [`report_span`], so its events
//! carry the data source name and period:
//!
//! ```text
//! WARN report{ds=issues period=month}: vizreport_core::reshape: Field length does not match items, dropped field=closed_7
//! ```

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};
use crate::period::Period;
use std::path::Path;
use tracing::Span;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

const LOG_PREFIX: &str = "vizreport.log";

/// Install the global subscriber writing to the rolling report log.
///
/// `RUST_LOG` wins over `config.level`. Closing a [`report_span`] logs how
/// long that data source took.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    let log_dir = Config::state_dir();
    let (writer, guard) = rolling_writer(&log_dir, config.max_files)?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .init();

    tracing::info!(
        log_dir = %log_dir.display(),
        level = %config.level,
        max_files = config.max_files,
        "Report log opened"
    );

    Ok(LoggingGuard { _guard: guard })
}

fn rolling_writer(log_dir: &Path, max_files: usize) -> Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(log_dir)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_PREFIX)
        .max_log_files(max_files.max(1))
        .build(log_dir)
        .map_err(|e| Error::Config(format!("failed to create log appender: {}", e)))?;
    Ok(tracing_appender::non_blocking(appender))
}

/// Span wrapping every report written for one data source.
pub fn report_span(ds: &str, period: Period) -> Span {
    tracing::info_span!("report", ds = %ds, period = %period)
}

/// Initialize logging for tests (logs to the test writer)
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Flushes pending log lines when dropped; hold it for the whole run.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}
