//! Logging configuration and initialization
//!
//! One place to set up `tracing` for every collector binary:
//!
//! - console, daily-rotated file, or both
//! - human-readable text or JSON lines
//! - level and per-module directives from the environment
//!
//! Library code logs only through `tracing` macros with structured fields:
//!
//! ```rust,ignore
//! info!(source_id = %id, status = %status, "Published dataset");
//! ```
//!
//! # Example
//!
//! ```no_run
//! use sdmx_common::logging::{init_logging, LogConfig};
//!
//! let config = LogConfig::from_env().unwrap_or_default();
//! init_logging(&config).unwrap();
//! ```

use crate::error::{CommonError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Minimum severity written to any output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

/// Where log lines go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Console,
    File,
    Both,
}

impl LogOutput {
    fn console(self) -> bool {
        matches!(self, LogOutput::Console | LogOutput::Both)
    }

    fn file(self) -> bool {
        matches!(self, LogOutput::File | LogOutput::Both)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Case-insensitive lookup of `raw` in a table of accepted spellings.
fn lookup<T: Copy>(what: &str, raw: &str, table: &[(&str, T)]) -> Result<T> {
    let wanted = raw.trim().to_ascii_lowercase();
    table
        .iter()
        .find(|(name, _)| *name == wanted)
        .map(|(_, value)| *value)
        .ok_or_else(|| CommonError::Config(format!("Invalid log {what}: {raw}")))
}

impl std::str::FromStr for LogLevel {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self> {
        lookup(
            "level",
            s,
            &[
                ("trace", LogLevel::Trace),
                ("debug", LogLevel::Debug),
                ("info", LogLevel::Info),
                ("warn", LogLevel::Warn),
                ("warning", LogLevel::Warn),
                ("error", LogLevel::Error),
            ],
        )
    }
}

impl std::str::FromStr for LogOutput {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self> {
        lookup(
            "output",
            s,
            &[
                ("console", LogOutput::Console),
                ("stdout", LogOutput::Console),
                ("file", LogOutput::File),
                ("both", LogOutput::Both),
            ],
        )
    }
}

impl std::str::FromStr for LogFormat {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self> {
        lookup("format", s, &[("text", LogFormat::Text), ("json", LogFormat::Json)])
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,

    /// Output target (console, file, or both)
    pub output: LogOutput,

    /// Log format (text or JSON)
    pub format: LogFormat,

    /// Directory for rotated log files
    pub log_dir: PathBuf,

    /// Log file name prefix ("sdmx-collector" -> "sdmx-collector.2024-01-18")
    pub log_file_prefix: String,

    /// Extra filter directives, e.g. "reqwest=warn,sdmx_collector=debug"
    pub filter_directives: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            output: LogOutput::Console,
            format: LogFormat::Text,
            log_dir: PathBuf::from("./logs"),
            log_file_prefix: "sdmx-collector".to_string(),
            filter_directives: None,
        }
    }
}

impl LogConfig {
    /// Load configuration from environment variables
    ///
    /// - `COLLECTOR_LOG_LEVEL`: trace, debug, info, warn, error
    /// - `COLLECTOR_LOG_OUTPUT`: console, file, both
    /// - `COLLECTOR_LOG_FORMAT`: text, json
    /// - `COLLECTOR_LOG_DIR`: directory for log files
    /// - `COLLECTOR_LOG_FILTER`: additional filter directives
    pub fn from_env() -> Result<Self> {
        Self::default().merge_env()
    }

    /// Override fields of `self` with any environment variables that are set.
    pub fn merge_env(self) -> Result<Self> {
        self.merge_lookup(|key| std::env::var(key).ok())
    }

    fn merge_lookup(mut self, get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(level) = get("COLLECTOR_LOG_LEVEL") {
            self.level = level.parse()?;
        }
        if let Some(output) = get("COLLECTOR_LOG_OUTPUT") {
            self.output = output.parse()?;
        }
        if let Some(format) = get("COLLECTOR_LOG_FORMAT") {
            self.format = format.parse()?;
        }
        if let Some(dir) = get("COLLECTOR_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }
        self.filter_directives = get("COLLECTOR_LOG_FILTER").or(self.filter_directives);
        Ok(self)
    }

    pub fn builder() -> LogConfigBuilder {
        LogConfigBuilder(Self::default())
    }
}

/// Fluent construction of a [`LogConfig`], starting from the defaults
pub struct LogConfigBuilder(LogConfig);

impl LogConfigBuilder {
    pub fn level(self, level: LogLevel) -> Self {
        self.with(|c| c.level = level)
    }

    pub fn output(self, output: LogOutput) -> Self {
        self.with(|c| c.output = output)
    }

    pub fn format(self, format: LogFormat) -> Self {
        self.with(|c| c.format = format)
    }

    pub fn log_dir(self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.with(|c| c.log_dir = dir)
    }

    pub fn log_file_prefix(self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.with(|c| c.log_file_prefix = prefix)
    }

    pub fn filter_directives(self, filter: impl Into<String>) -> Self {
        let filter = filter.into();
        self.with(|c| c.filter_directives = Some(filter))
    }

    fn with(mut self, f: impl FnOnce(&mut LogConfig)) -> Self {
        f(&mut self.0);
        self
    }

    pub fn build(self) -> LogConfig {
        self.0
    }
}

type BoxedLayer = Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync>;

fn build_filter(config: &LogConfig) -> Result<EnvFilter> {
    let mut filter =
        EnvFilter::from_default_env().add_directive(Level::from(config.level).into());

    if let Some(ref directives) = config.filter_directives {
        for directive in directives.split(',').filter(|d| !d.trim().is_empty()) {
            let parsed = directive
                .trim()
                .parse()
                .map_err(|e| CommonError::Logging(format!("bad directive '{directive}': {e}")))?;
            filter = filter.add_directive(parsed);
        }
    }

    Ok(filter)
}

fn console_layer(config: &LogConfig) -> BoxedLayer {
    let layer = fmt::layer().with_writer(std::io::stdout);
    match config.format {
        LogFormat::Text => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

fn file_layer(config: &LogConfig) -> Result<BoxedLayer> {
    std::fs::create_dir_all(&config.log_dir)?;

    let appender = tracing_appender::rolling::daily(&config.log_dir, &config.log_file_prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    // The guard flushes on drop; it has to live as long as the process.
    std::mem::forget(guard);

    let layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
    Ok(match config.format {
        LogFormat::Text => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    })
}

/// Initialize the global tracing subscriber. Call once at startup.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = build_filter(config)?;

    let mut layers: Vec<BoxedLayer> = Vec::new();
    if config.output.console() {
        layers.push(console_layer(config));
    }
    if config.output.file() {
        layers.push(file_layer(config)?);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| CommonError::Logging(e.to_string()))
}
