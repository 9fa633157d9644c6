use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::aggregate::{AggregateFamily, standard_families};
use crate::credentials::Credentials;
use crate::defaults::{
    DEFAULT_ACTION_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MONITOR_INTERVAL,
    DEFAULT_POLL_INTERVAL, default_action_id_prefix, default_socket_endpoint,
};
use crate::logging::LoggingConfig;
use crate::socket::SocketEndpoint;

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn default_action_timeout_ms() -> u64 {
    millis(DEFAULT_ACTION_TIMEOUT)
}

fn default_connect_timeout_ms() -> u64 {
    millis(DEFAULT_CONNECT_TIMEOUT)
}

fn default_poll_interval_ms() -> u64 {
    millis(DEFAULT_POLL_INTERVAL)
}

fn default_monitor_interval_ms() -> u64 {
    millis(DEFAULT_MONITOR_INTERVAL)
}

/// Watchdog settings.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Milliseconds between liveness probes.
    #[serde(default = "default_monitor_interval_ms")]
    pub interval_ms: u64,
    /// Milliseconds a probe may wait for its reply. Falls back to the action
    /// timeout when absent.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl MonitorConfig {
    /// Probes every `interval`, waiting up to the action timeout for replies.
    #[must_use]
    pub fn every(interval: Duration) -> Self {
        Self {
            interval_ms: millis(interval),
            timeout_ms: None,
        }
    }

    /// Gives probes their own reply deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(millis(timeout));
        self
    }

    /// Interval between probes.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Probe reply deadline, if configured separately.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::every(DEFAULT_MONITOR_INTERVAL)
    }
}

/// Settings of one manager session.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ManagerConfig {
    /// Address of the manager interface.
    pub endpoint: SocketEndpoint,
    /// Login identity. The session stays unauthenticated when absent.
    pub credentials: Option<Credentials>,
    /// Default response deadline for actions, in milliseconds.
    pub action_timeout_ms: u64,
    /// Deadline for opening the socket and reading the greeting, in
    /// milliseconds.
    pub connect_timeout_ms: u64,
    /// Socket read poll interval, in milliseconds.
    pub poll_interval_ms: u64,
    /// Watchdog settings. No watchdog runs when absent.
    pub monitor: Option<MonitorConfig>,
    /// Prefix of generated correlation identifiers.
    pub action_id_prefix: String,
    /// List reply families assembled into aggregates.
    pub aggregates: Vec<AggregateFamily>,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl ManagerConfig {
    /// Configuration for `endpoint` with every other setting at its default.
    #[must_use]
    pub fn new(endpoint: SocketEndpoint) -> Self {
        Self {
            endpoint,
            ..Self::default()
        }
    }

    /// Sets the login identity.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Sets the default action timeout.
    #[must_use]
    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout_ms = millis(timeout);
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = millis(timeout);
        self
    }

    /// Sets the reader poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = millis(interval);
        self
    }

    /// Enables the watchdog.
    #[must_use]
    pub const fn with_monitor(mut self, monitor: MonitorConfig) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Sets the correlation identifier prefix.
    #[must_use]
    pub fn with_action_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.action_id_prefix = prefix.into();
        self
    }

    /// Replaces the aggregate family table.
    #[must_use]
    pub fn with_aggregates(mut self, aggregates: Vec<AggregateFamily>) -> Self {
        self.aggregates = aggregates;
        self
    }

    /// Default response deadline for actions.
    #[must_use]
    pub const fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    /// Deadline for opening the socket and reading the greeting.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Socket read poll interval. Never zero.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_socket_endpoint(),
            credentials: None,
            action_timeout_ms: default_action_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            monitor: None,
            action_id_prefix: default_action_id_prefix(),
            aggregates: standard_families(),
            logging: LoggingConfig::default(),
        }
    }
}
