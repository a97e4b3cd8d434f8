use std::error::Error;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_FILTER: &str = "info";

pub fn default_log_file() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("fsindex")
        .join("fsindex.log")
}

/// Installs the global subscriber: everything goes to `log_file` through a
/// non-blocking writer, and to stderr as well when `verbose` is set. `RUST_LOG`
/// overrides the default filter. The returned guard must live until exit or
/// buffered lines are lost.
pub fn init_tracing(log_file: &Path, verbose: bool) -> Result<WorkerGuard, Box<dyn Error>> {
    let directory = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    std::fs::create_dir_all(directory)?;

    let file_name = log_file
        .file_name()
        .ok_or_else(|| format!("log file path {} has no file name", log_file.display()))?;

    let appender = tracing_appender::rolling::never(directory, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let stderr = verbose.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(stderr)
        .try_init()?;

    Ok(guard)
}
