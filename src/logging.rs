use crate::error::{PipelineError, Result};
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Flushes the file writer when dropped; keep it alive for the life of the process.
pub type LoggingGuard = WorkerGuard;

const DEFAULT_FILTER: &str = "adjacency_pipeline=info";

/// Initializes the logging system with both console and file output.
pub fn init_logging<P: AsRef<Path>>(log_dir: P) -> Result<LoggingGuard> {
    let log_dir = log_dir.as_ref();
    fs::create_dir_all(log_dir)?;

    // Daily-rotated JSON file
    let file_appender = tracing_appender::rolling::daily(log_dir, "pipeline.log");
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer().json().with_writer(non_blocking_writer);

    let console_layer = fmt::layer().with_writer(std::io::stdout);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
        .map_err(|e| PipelineError::Configuration(format!("invalid log filter: {e}")))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| PipelineError::Configuration(format!("logging already initialized: {e}")))?;

    Ok(guard)
}
