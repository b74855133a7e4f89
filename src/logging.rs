//! Tracing setup: console output plus a daily rolling log file.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const LOG_FILE_NAME: &str = "inbox-triage.log";

/// `RUST_LOG` if set, else `level` (e.g. `INFO`), else `info`.
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.trim().to_ascii_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Keep the returned guard alive until exit
/// so buffered file output is flushed.
pub fn init(log_dir: &Path, level: &str) -> std::io::Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;
    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME));

    let installed = tracing_subscriber::registry()
        .with(env_filter(level))
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .try_init();
    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unparseable_level_falls_back_to_info() {
        // Only meaningful when RUST_LOG is unset; never panics either way.
        let filter = env_filter("not a level ===");
        assert!(!filter.to_string().is_empty());
    }

    #[test]
    fn init_creates_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let _guard = init(&log_dir, "INFO").unwrap();
        assert!(log_dir.is_dir());
    }
}
