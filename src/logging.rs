//! Logging setup for discovery sweeps.
//!
//! Logs go to stderr (ANSI colored only when stderr is a terminal) and,
//! when enabled, to a timestamped file in ~/.devdisc/logs/.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Default log retention in hours.
pub const DEFAULT_LOG_RETENTION_HOURS: u32 = 72;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error, off).
    pub level: String,
    /// Whether to also write a log file.
    pub file: bool,
    /// Log file retention period in hours.
    pub retention_hours: u32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            file: false,
            retention_hours: DEFAULT_LOG_RETENTION_HOURS,
        }
    }
}

impl LogConfig {
    /// Normalizes a log level name, falling back to the default.
    #[must_use]
    pub fn parse_level(value: &str) -> String {
        match value.trim().to_lowercase().as_str() {
            "trace" => "trace".to_string(),
            "debug" => "debug".to_string(),
            "info" => "info".to_string(),
            "warn" | "warning" => "warn".to_string(),
            "error" => "error".to_string(),
            "off" | "none" | "quiet" => "off".to_string(),
            _ => DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

/// Returns the log directory path (~/.devdisc/logs/).
#[must_use]
pub fn log_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".devdisc")
        .join("logs")
}

/// Returns a fresh log file name for the current time.
#[must_use]
pub fn log_file_name() -> String {
    let now = chrono::Local::now();
    format!("devdisc_{}.log", now.format("%Y-%m-%d_%H-%M-%S"))
}

/// Deletes `.log` files in `dir` older than `retention_hours`.
///
/// Returns the number of deleted files.
///
/// # Errors
/// Returns error if the directory cannot be read.
pub fn cleanup_old_logs(dir: &Path, retention_hours: u32) -> io::Result<u32> {
    if !dir.exists() {
        return Ok(0);
    }

    let retention = Duration::from_secs(u64::from(retention_hours) * 3600);
    let now = SystemTime::now();
    let mut deleted = 0;

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }
        let age = fs::metadata(&path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if age.is_some_and(|age| age > retention) && fs::remove_file(&path).is_ok() {
            deleted += 1;
        }
    }

    Ok(deleted)
}

/// Initializes the global subscriber.
///
/// `RUST_LOG` overrides the configured level.
///
/// # Errors
/// Returns error if the log file cannot be created.
pub fn init(config: &LogConfig) -> io::Result<()> {
    let level = LogConfig::parse_level(&config.level);
    if level == "off" {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .with_target(false);

    let mut deleted = 0;
    let mut log_path = None;
    let file_layer = if config.file {
        let dir = log_directory();
        fs::create_dir_all(&dir)?;
        deleted = cleanup_old_logs(&dir, config.retention_hours)?;
        let path = dir.join(log_file_name());
        let file = File::create(&path)?;
        log_path = Some(path);
        Some(
            fmt::layer()
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .with_target(true)
                .with_line_number(false),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    tracing::debug!("Log level: {}", level);
    if let Some(path) = log_path {
        tracing::info!("Log file: {}", path.display());
    }
    if deleted > 0 {
        tracing::debug!("Cleaned up {} old log file(s)", deleted);
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert_eq!(config.level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.retention_hours, DEFAULT_LOG_RETENTION_HOURS);
        assert!(!config.file);
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(LogConfig::parse_level("DEBUG"), "debug");
        assert_eq!(LogConfig::parse_level("warning"), "warn");
        assert_eq!(LogConfig::parse_level("quiet"), "off");
        assert_eq!(LogConfig::parse_level("loud"), DEFAULT_LOG_LEVEL);
    }

    #[test]
    fn test_log_paths() {
        let dir = log_directory();
        assert!(dir.ends_with(".devdisc/logs"));
        let name = log_file_name();
        assert!(name.starts_with("devdisc_"));
        assert!(name.ends_with(".log"));
    }

    #[test]
    fn test_cleanup_keeps_fresh_logs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("fresh.log"), "x").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        assert_eq!(cleanup_old_logs(dir.path(), 1).unwrap(), 0);
        assert!(dir.path().join("fresh.log").exists());
    }

    #[test]
    fn test_cleanup_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("none");
        assert_eq!(cleanup_old_logs(&missing, 1).unwrap(), 0);
    }
}
