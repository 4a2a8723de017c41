//! Logging setup for a run.
//!
//! * `{log_dir}/{log_file}`, truncated at start, written by a non-blocking worker
//! * compact output on stdout
//! * level from `RUST_LOG`, `info` when unset
//!
//! The library itself only emits `tracing` events; installing a subscriber is up to the
//! binary or test harness embedding it.
use std::fs;
use std::io;

use camino::Utf8Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Keeps the file writer alive. Dropping it flushes and closes the log file.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Install the global subscriber.
///
/// Arguments
/// -----------------
/// * `log_dir`: directory of the log file, created if needed.
/// * `log_file`: file name inside `log_dir`; an existing file is cleared.
///
/// Return
/// ----------
/// * The [`LoggingGuard`] to hold for the lifetime of the run, or an I/O error when the
///   directory cannot be created or a global subscriber is already installed.
pub fn init_logging(log_dir: &Utf8Path, log_file: &str) -> Result<LoggingGuard, io::Error> {
    fs::create_dir_all(log_dir)?;
    fs::write(log_dir.join(log_file), "")?;

    let file_appender = tracing_appender::rolling::never(log_dir, log_file);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_target(false);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_target(false)
        .compact();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .map_err(io::Error::other)?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

pub fn default_log_dir() -> &'static str {
    "logs"
}

pub fn default_log_file() -> &'static str {
    "landwatch.log"
}

#[cfg(test)]
mod test_logging {
    use super::*;

    #[test]
    fn test_default_paths() {
        assert_eq!(default_log_dir(), "logs");
        assert_eq!(default_log_file(), "landwatch.log");
    }

    #[test]
    fn test_init_clears_file_and_refuses_second_subscriber() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap().join("nested/logs");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("run.log"), "old log data").unwrap();

        let guard = init_logging(&dir, "run.log").unwrap();
        tracing::error!(cell = 1, "Cell failed");
        drop(guard);
        let contents = fs::read_to_string(dir.join("run.log")).unwrap();
        assert!(!contents.contains("old log data"));
        assert!(contents.contains("Cell failed"));

        assert!(init_logging(&dir, "again.log").is_err());
    }
}
