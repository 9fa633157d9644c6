//! Fallback values used when configuration leaves a setting out.

use std::time::Duration;

use crate::socket::SocketEndpoint;

/// Port the manager interface listens on unless reconfigured.
pub const DEFAULT_MANAGER_PORT: u16 = 5038;

/// Host used when no endpoint is configured.
pub const DEFAULT_MANAGER_HOST: &str = "127.0.0.1";

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Seconds an action waits for its response unless the action overrides it.
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on establishing the socket and reading the greeting.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Read poll interval of the socket reader.
///
/// The reader wakes at least this often to observe the connected flag.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Interval between watchdog liveness probes.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_millis(2500);

/// Prefix placed in front of generated correlation identifiers.
pub const DEFAULT_ACTION_ID_PREFIX: &str = "pbxlink";

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format.
#[must_use]
pub const fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}

/// Endpoint of a manager interface on the local host.
#[must_use]
pub fn default_socket_endpoint() -> SocketEndpoint {
    SocketEndpoint::tcp(DEFAULT_MANAGER_HOST, DEFAULT_MANAGER_PORT)
}

/// Correlation prefix qualified with the process id so concurrent clients on
/// one host never share identifiers.
#[must_use]
pub fn default_action_id_prefix() -> String {
    format!("{DEFAULT_ACTION_ID_PREFIX}-{}", std::process::id())
}
