use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

/// Logging configuration: level plus an optional rolling file target.
/// Without a file directory, logs go to stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub level: String,
    pub file_dir: Option<String>,
    pub file_prefix: Option<String>,
    /// `"daily"` (default), `"hourly"` or `"minutely"`.
    pub rolling: Option<String>,
    pub max_files: usize,
}

impl LoggerConfig {
    /// Reads `LOG_LEVEL`, `LOG_FILE_DIR`, `LOG_FILE_PREFIX` and
    /// `LOG_ROLLING` from the environment, with defaults for the rest.
    pub fn from_env() -> Self {
        Self {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned()),
            file_dir: std::env::var("LOG_FILE_DIR").ok(),
            file_prefix: std::env::var("LOG_FILE_PREFIX").ok(),
            rolling: std::env::var("LOG_ROLLING").ok(),
            ..Self::default()
        }
    }

    /// Installs the global tracing subscriber. Returns the appender guard
    /// that must stay alive while file logging is in use.
    pub fn init(&self) -> anyhow::Result<Option<WorkerGuard>> {
        let level = Level::from_str(&self.level).unwrap_or(Level::INFO);

        let Some(dir) = self.file_dir.as_deref() else {
            let _ = tracing_subscriber::fmt().with_max_level(level).try_init();
            return Ok(None);
        };

        let rotation = match self.rolling.as_deref() {
            Some("hourly") => Rotation::HOURLY,
            Some("minutely") => Rotation::MINUTELY,
            _ => Rotation::DAILY,
        };
        let appender: RollingFileAppender = RollingFileAppender::builder()
            .rotation(rotation)
            .max_log_files(self.max_files)
            .filename_prefix(self.file_prefix.as_deref().unwrap_or(""))
            .build(dir)
            .with_context(|| format!("failed to create rolling appender in {dir}"))?;

        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(writer)
            .with_ansi(false)
            .try_init();
        Ok(Some(guard))
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            file_dir: None,
            file_prefix: None,
            rolling: None,
            max_files: 3,
        }
    }
}
