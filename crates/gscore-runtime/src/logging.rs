//! Logging setup on `tracing-subscriber`.
//!
//! [`LoggingBuilder`] renders a [`LoggingConfig`] into a global subscriber.
//! `RUST_LOG`, when set, replaces the configured base level; the per-module
//! filters and any extra directives are layered on top either way.
//!
//! Handler invocations run inside a `handler` span carrying the bot, SV,
//! trigger and session, so enabling `span_events.new` / `span_events.close`
//! shows when each one starts and ends.
//!
//! ```rust,ignore
//! use gscore_runtime::logging::LoggingBuilder;
//!
//! LoggingBuilder::from_config(&config.logging)
//!     .directive("gscore_framework=debug")
//!     .init();
//! ```

use std::ffi::OsStr;
use std::path::Path;

use tracing::warn;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{LogFormat, LogOutput, LoggingConfig, SpanEventConfig};

/// Initializes logging from configuration. Does nothing if a global
/// subscriber is already installed.
pub fn init_from_config(config: &LoggingConfig) {
    let _ = LoggingBuilder::from_config(config).try_init();
}

fn fmt_span(events: SpanEventConfig) -> FmtSpan {
    [
        (events.new, FmtSpan::NEW),
        (events.enter, FmtSpan::ENTER),
        (events.exit, FmtSpan::EXIT),
        (events.close, FmtSpan::CLOSE),
    ]
    .into_iter()
    .filter(|(on, _)| *on)
    .fold(FmtSpan::NONE, |acc, (_, span)| acc | span)
}

/// Builder for the global `tracing` subscriber.
#[derive(Debug, Clone, Default)]
pub struct LoggingBuilder {
    config: LoggingConfig,
    extra: Vec<String>,
}

impl LoggingBuilder {
    /// Info level, compact format, stdout.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &LoggingConfig) -> Self {
        Self {
            config: config.clone(),
            extra: Vec::new(),
        }
    }

    /// Adds a filter directive such as `gscore_transport=trace`.
    pub fn directive(mut self, directive: impl Into<String>) -> Self {
        self.extra.push(directive.into());
        self
    }

    /// Module filters from the configuration (sorted), then extra directives.
    fn directives(&self) -> Vec<String> {
        let mut filters: Vec<_> = self
            .config
            .filters
            .iter()
            .map(|(module, level)| format!("{module}={level}"))
            .collect();
        filters.sort();
        filters.extend(self.extra.iter().cloned());
        filters
    }

    fn filter(&self) -> EnvFilter {
        let base = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.config.level.as_str()));
        self.directives()
            .iter()
            .filter_map(|d| d.parse().ok())
            .fold(base, |filter, d| filter.add_directive(d))
    }

    fn format(&self) -> LogFormat {
        match self.config.format {
            #[cfg(not(feature = "json-log"))]
            LogFormat::Json => LogFormat::Full,
            other => other,
        }
    }

    /// Installs the subscriber, ignoring a second initialization.
    pub fn init(self) {
        let _ = self.try_init();
    }

    /// Installs the subscriber.
    pub fn try_init(self) -> Result<(), TryInitError> {
        let filter = self.filter();
        let format = self.format();
        let spans = fmt_span(self.config.span_events);
        let thread_ids = self.config.thread_ids;
        let location = self.config.file_location;

        macro_rules! install {
            ($layer:expr) => {
                tracing_subscriber::registry()
                    .with(
                        $layer
                            .with_span_events(spans)
                            .with_thread_ids(thread_ids)
                            .with_file(location)
                            .with_line_number(location),
                    )
                    .with(filter)
                    .try_init()
            };
        }

        macro_rules! install_with_writer {
            ($writer:expr) => {
                match format {
                    #[cfg(feature = "json-log")]
                    LogFormat::Json => install!(fmt::layer().json().with_writer($writer)),
                    LogFormat::Compact => install!(fmt::layer().compact().with_writer($writer)),
                    LogFormat::Pretty => install!(fmt::layer().pretty().with_writer($writer)),
                    _ => install!(fmt::layer().with_writer($writer)),
                }
            };
        }

        match (self.config.output, self.config.file_path.as_deref()) {
            (LogOutput::Stdout, _) => install_with_writer!(std::io::stdout),
            (LogOutput::Stderr, _) => install_with_writer!(std::io::stderr),
            (LogOutput::File, Some(path)) => {
                let appender = tracing_appender::rolling::never(
                    path.parent().unwrap_or_else(|| Path::new(".")),
                    path.file_name().unwrap_or_else(|| OsStr::new("gscore.log")),
                );
                install_with_writer!(appender)
            }
            (LogOutput::File, None) => {
                let result = install_with_writer!(std::io::stdout);
                warn!("File output requested but no file path configured, using stdout");
                result
            }
        }
    }
}
