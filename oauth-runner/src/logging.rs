use crate::RunnerError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// Logging configuration for the runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Whether to enable JSON formatted logs
    pub json_format: bool,

    /// Whether to include thread names in logs
    pub include_thread_names: bool,

    /// Whether to include file and line number information
    pub include_file_info: bool,

    /// Whether to enable colored output (only for non-JSON format)
    pub enable_colors: bool,

    /// Log file path (optional, if None logs only to stdout)
    pub log_file: Option<String>,

    /// Module-specific log levels
    pub module_levels: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let mut module_levels = HashMap::new();
        module_levels.insert("oauth_engine".to_string(), "info".to_string());
        module_levels.insert("oauth_runner".to_string(), "info".to_string());
        module_levels.insert("chromiumoxide".to_string(), "warn".to_string());
        module_levels.insert("tungstenite".to_string(), "warn".to_string());

        Self {
            level: "info".to_string(),
            json_format: false,
            include_thread_names: false,
            include_file_info: false,
            enable_colors: true,
            log_file: None,
            module_levels,
        }
    }
}

impl LoggingConfig {
    /// Build the filter from the base level and the per-module levels
    pub fn env_filter(&self) -> Result<EnvFilter, RunnerError> {
        if !levels::is_valid_level(&self.level) {
            return Err(RunnerError::Logging(format!("Invalid log level: {}", self.level)));
        }

        let mut filter = EnvFilter::new(&self.level);
        for (module, level) in &self.module_levels {
            let directive = format!("{}={}", module, level);
            filter = filter.add_directive(
                directive
                    .parse()
                    .map_err(|e| RunnerError::Logging(format!("Invalid log directive '{}': {}", directive, e)))?,
            );
        }
        Ok(filter)
    }
}

/// Initialize logging based on the provided configuration.
///
/// The returned guard flushes the log file when dropped and must be kept alive
/// for as long as the runner logs.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>, RunnerError> {
    let filter = config.env_filter()?;

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let stdout = fmt::layer()
        .with_target(true)
        .with_thread_names(config.include_thread_names)
        .with_file(config.include_file_info)
        .with_line_number(config.include_file_info);
    if config.json_format {
        layers.push(stdout.json().boxed());
    } else {
        layers.push(stdout.with_ansi(config.enable_colors).boxed());
    }

    let mut guard = None;
    if let Some(log_file) = &config.log_file {
        let (writer, file_guard) = tracing_appender::non_blocking(create_file_appender(log_file)?);
        guard = Some(file_guard);
        layers.push(fmt::layer().with_writer(writer).with_ansi(false).boxed());
    }

    // Try to initialize logging, ignore if already initialized
    match tracing_subscriber::registry().with(layers).with(filter).try_init() {
        Ok(_) => {
            tracing::info!("Logging initialized with config level: {}", config.level);
        }
        Err(_) => {
            tracing::debug!("Logging already initialized, skipping");
        }
    }

    Ok(guard)
}

/// Daily rolling appender for `log_file`
fn create_file_appender(log_file: &str) -> Result<RollingFileAppender, RunnerError> {
    let log_path = Path::new(log_file);
    let directory = match log_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let filename = log_path
        .file_name()
        .ok_or_else(|| RunnerError::Logging(format!("Invalid log file name: {}", log_file)))?
        .to_string_lossy();

    std::fs::create_dir_all(directory)
        .map_err(|e| RunnerError::Logging(format!("Failed to create log directory: {}", e)))?;

    Ok(RollingFileAppender::new(Rotation::DAILY, directory, filename.as_ref()))
}

/// Log level utilities
pub mod levels {
    /// Check if a log level string is valid
    pub fn is_valid_level(level: &str) -> bool {
        matches!(level.to_lowercase().as_str(), "trace" | "debug" | "info" | "warn" | "error")
    }
}
