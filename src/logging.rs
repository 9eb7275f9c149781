//! Logging configuration for lokstra
//!
//! Structured logging setup for binaries and tests, with JSON output for
//! production and pretty output for development.
//!
//! # Example
//!
//! ```rust,ignore
//! use lokstra::logging;
//!
//! // Initialize with default settings.
//! logging::init();
//!
//! // Or configure explicitly.
//! logging::builder()
//!     .with_level(tracing::Level::DEBUG)
//!     .lokstra_only()
//!     .json()
//!     .init();
//! ```

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Logging format configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Compact single-line output (default)
    #[default]
    Compact,
    /// JSON structured logging (production)
    Json,
    /// Pretty colorful output (development)
    Pretty,
}

/// Builder for logging configuration
#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    level: Level,
    format: LogFormat,
    target: Option<&'static str>,
    with_file: bool,
    with_line_number: bool,
    with_thread_ids: bool,
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Compact,
            target: None,
            with_file: false,
            with_line_number: false,
            with_thread_ids: false,
        }
    }
}

impl LoggingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum log level
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Filter to only show logs from a specific target
    pub fn with_target_filter(mut self, target: &'static str) -> Self {
        self.target = Some(target);
        self
    }

    /// Only show lokstra logs
    pub fn lokstra_only(self) -> Self {
        self.with_target_filter("lokstra")
    }

    /// Include file names in log output
    pub fn with_file(mut self) -> Self {
        self.with_file = true;
        self
    }

    /// Include line numbers in log output
    pub fn with_line_number(mut self) -> Self {
        self.with_line_number = true;
        self
    }

    /// Include thread IDs in log output
    pub fn with_thread_ids(mut self) -> Self {
        self.with_thread_ids = true;
        self
    }

    /// Use JSON structured logging format
    pub fn json(mut self) -> Self {
        self.format = LogFormat::Json;
        self
    }

    /// Use pretty colorful logging format
    pub fn pretty(mut self) -> Self {
        self.format = LogFormat::Pretty;
        self
    }

    /// Use compact single-line logging format
    pub fn compact(mut self) -> Self {
        self.format = LogFormat::Compact;
        self
    }

    /// Initialize the subscriber. `RUST_LOG` overrides the configured level
    /// when set.
    pub fn init(self) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            if let Some(target) = self.target {
                EnvFilter::new(format!("{}={}", target, self.level))
            } else {
                EnvFilter::new(self.level.to_string())
            }
        });

        let base = fmt::layer()
            .with_file(self.with_file)
            .with_line_number(self.with_line_number)
            .with_thread_ids(self.with_thread_ids)
            .with_target(true);

        match self.format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(base.json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(base.pretty())
                    .init();
            }
            LogFormat::Compact => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(base.compact())
                    .init();
            }
        }
    }
}

/// Create a logging builder with default settings
pub fn builder() -> LoggingBuilder {
    LoggingBuilder::new()
}

/// Initialize logging with defaults (compact, INFO, `RUST_LOG` respected)
pub fn init() {
    builder().init()
}

/// Initialize JSON logging (production)
pub fn init_json() {
    builder().json().init()
}

/// Initialize pretty logging (development)
pub fn init_pretty() {
    builder().pretty().init()
}
