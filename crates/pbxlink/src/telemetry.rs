//! Process-wide tracing setup for applications embedding the client.
//!
//! The library itself only emits `tracing` events under `pbxlink::*` targets.
//! Applications that have no subscriber of their own can call [`initialise`]
//! once at startup.

use std::env;
use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer, fmt};

use pbxlink_config::{LogFormat, LoggingConfig};

/// Environment variable whose value replaces the configured filter.
pub const FILTER_ENV: &str = "PBXLINK_LOG";

static INSTALLED: OnceCell<TelemetryHandle> = OnceCell::new();

/// Describes the subscriber that is in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryHandle {
    filter: String,
    format: LogFormat,
}

impl TelemetryHandle {
    /// Filter expression in effect.
    #[must_use]
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Output format in effect.
    #[must_use]
    pub const fn format(&self) -> LogFormat {
        self.format
    }
}

/// Errors raised while installing the subscriber.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The filter expression did not parse.
    #[error("invalid log filter '{filter}': {message}")]
    Filter {
        /// Rejected expression.
        filter: String,
        /// Parser diagnostic.
        message: String,
    },
    /// Another global subscriber is already installed.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

/// Installs a stderr subscriber on the first call.
///
/// The filter comes from [`FILTER_ENV`] when set, otherwise from `config`.
/// Later calls return the handle of the first installation unchanged.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] for an unparsable filter and
/// [`TelemetryError::Subscriber`] when the process already has a global
/// subscriber.
pub fn initialise(config: &LoggingConfig) -> Result<TelemetryHandle, TelemetryError> {
    INSTALLED
        .get_or_try_init(|| install(config, env::var(FILTER_ENV).ok()))
        .cloned()
}

fn install(
    config: &LoggingConfig,
    filter_override: Option<String>,
) -> Result<TelemetryHandle, TelemetryError> {
    let (expression, filter) = resolve_filter(config, filter_override)?;
    let ansi = io::stderr().is_terminal();
    let output = match config.format() {
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_thread_names(true)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_ansi(ansi)
            .with_thread_names(true)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(io::stderr)
            .boxed(),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(output)
        .try_init()?;
    Ok(TelemetryHandle {
        filter: expression,
        format: config.format(),
    })
}

fn resolve_filter(
    config: &LoggingConfig,
    filter_override: Option<String>,
) -> Result<(String, EnvFilter), TelemetryError> {
    let expression = filter_override
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| config.filter().to_owned());
    match EnvFilter::try_new(&expression) {
        Ok(filter) => Ok((expression, filter)),
        Err(error) => Err(TelemetryError::Filter {
            filter: expression,
            message: error.to_string(),
        }),
    }
}
