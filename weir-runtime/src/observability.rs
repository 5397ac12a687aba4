//! Tracing subscriber setup with format selection.
//!
//! The flow's own `observability` block stays opaque to the engine; this
//! module only configures the process-local `tracing` output the runtime
//! logs and spans go to.

use std::env;
use std::io::IsTerminal;
use std::str::FromStr;

use anyhow::{Context, Result};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON format for structured logging pipelines.
    Json,
    /// Human-readable pretty format with colors.
    Pretty,
    /// Compact single-line format.
    #[default]
    Compact,
}

impl FromStr for LogFormat {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "pretty" => Self::Pretty,
            _ => Self::Compact,
        })
    }
}

/// Configuration for the tracing subscriber.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    log_filter: String,
    log_format: LogFormat,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            log_format: LogFormat::default(),
        }
    }
}

impl TracingConfig {
    /// Build configuration from the environment.
    ///
    /// - `WEIR_LOG_FORMAT`: "json", "pretty" or "compact"; auto-detected
    ///   from the terminal when unset
    /// - `WEIR_LOG` or `RUST_LOG`: filter string
    pub fn from_env() -> Self {
        let log_format = env::var("WEIR_LOG_FORMAT")
            .ok()
            .and_then(|s| s.parse::<LogFormat>().ok())
            .unwrap_or_else(|| {
                if std::io::stdout().is_terminal() {
                    LogFormat::Pretty
                } else {
                    LogFormat::Compact
                }
            });

        let log_filter = env::var("WEIR_LOG")
            .or_else(|_| env::var("RUST_LOG"))
            .unwrap_or_else(|_| "info".to_string());

        Self {
            log_filter,
            log_format,
        }
    }

    /// Override the filter string (e.g. "debug,weir_runtime=trace").
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    /// Override the output format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    /// The configured filter string.
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// The configured output format.
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

/// Initialize the global tracing subscriber.
pub fn init_tracing(config: TracingConfig) -> Result<()> {
    let filter =
        EnvFilter::try_new(config.log_filter()).unwrap_or_else(|_| EnvFilter::new("info"));

    match config.log_format() {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE)
                    .flatten_event(true),
            )
            .try_init()
            .context("Failed to initialize tracing subscriber")?,
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .try_init()
            .context("Failed to initialize tracing subscriber")?,
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
            .context("Failed to initialize tracing subscriber")?,
    }

    Ok(())
}
