//! Logging setup.
//!
//! Console output stays quiet by default so it does not tear the progress bars;
//! the log file gets everything at debug level.

use std::fs;
use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

pub const LOG_ENV: &str = "MOV_CONVERT_LOG";
const LOG_FILE: &str = "video_converter.log";

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter used when neither `MOV_CONVERT_LOG` nor `RUST_LOG` is set.
    pub default_level: String,
    pub file_enabled: bool,
    /// Defaults to `~/.video-converter/logs`.
    pub file_dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_level: String::from("warn"),
            file_enabled: true,
            file_dir: crate::settings::config_dir().map(|dir| dir.join("logs")),
        }
    }
}

/// Installs the global subscriber. Keep the returned guard alive until exit or
/// buffered file output is lost.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error + Send + Sync>> {
    let console_filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new(&config.default_level));

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .with_filter(console_filter);

    let log_dir = config.file_dir.clone().filter(|_| config.file_enabled);
    match log_dir {
        Some(dir) => {
            fs::create_dir_all(&dir)?;
            let file_appender = tracing_appender::rolling::never(&dir, LOG_FILE);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_filter(EnvFilter::new("debug"));

            tracing_subscriber::registry()
                .with(console_layer)
                .with(file_layer)
                .try_init()?;

            tracing::info!(log_file = ?dir.join(LOG_FILE), version = env!("CARGO_PKG_VERSION"), "logging initialized");
            Ok(Some(guard))
        },
        None => {
            tracing_subscriber::registry().with(console_layer).try_init()?;
            Ok(None)
        },
    }
}
