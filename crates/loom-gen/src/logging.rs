//! Structured logging setup
//!
//! Precedence, highest first: `LOOM_LOG` / `LOOM_LOG_FORMAT` environment
//! variables, the `[logging]` config table, then `info` text to stderr.

use crate::config::LoggingConfig;
use loom_core::{LoomError, Result};
use std::path::Path;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Output encoding for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(LoomError::Config(format!(
                "Invalid log format: {} (must be 'json' or 'text')",
                other
            ))),
        }
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<()> {
    let filter = build_env_filter(config)?;
    let format = determine_format(config)?;
    let base = Registry::default().with(filter);

    let installed = match (format, config.and_then(|c| c.file.as_deref())) {
        (LogFormat::Json, Some(path)) => base
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(open_log_file(path)?),
            )
            .try_init(),
        (LogFormat::Json, None) => base
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        (LogFormat::Text, Some(path)) => base
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(false)
                    .with_writer(open_log_file(path)?),
            )
            .try_init(),
        (LogFormat::Text, None) => base
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };

    installed.map_err(|e| LoomError::Config(format!("Failed to install logger: {}", e)))
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| LoomError::Config(format!("Failed to create log directory: {}", e)))?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| LoomError::Config(format!("Failed to open log file {}: {}", path.display(), e)))
}

/// Build the level filter from `LOOM_LOG` or the config
pub fn build_env_filter(config: Option<&LoggingConfig>) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_env("LOOM_LOG") {
        return Ok(filter);
    }
    filter_from_config(config)
}

fn filter_from_config(config: Option<&LoggingConfig>) -> Result<EnvFilter> {
    let level = config
        .and_then(|c| c.level.as_deref())
        .unwrap_or("info");

    let mut filter = EnvFilter::try_new(level)
        .map_err(|e| LoomError::Config(format!("Invalid log level '{}': {}", level, e)))?;

    if let Some(config) = config {
        for (module, module_level) in &config.modules {
            let directive = format!("{}={}", module, module_level);
            filter = filter.add_directive(
                directive
                    .parse()
                    .map_err(|e| LoomError::Config(format!("Invalid log directive: {}", e)))?,
            );
        }
    }

    Ok(filter)
}

fn determine_format(config: Option<&LoggingConfig>) -> Result<LogFormat> {
    if let Ok(format) = std::env::var("LOOM_LOG_FORMAT") {
        return LogFormat::parse(&format);
    }
    LogFormat::parse(config.and_then(|c| c.format.as_deref()).unwrap_or("text"))
}
