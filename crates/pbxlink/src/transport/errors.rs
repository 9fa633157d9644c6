//! Errors raised by the socket transport.

use std::io;

use thiserror::Error;

/// Failures of the connection to the switch. Each one is fatal to the
/// current connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The host name did not resolve to a socket address.
    #[error("failed to resolve {endpoint}: {source}")]
    Resolve {
        /// Endpoint being resolved.
        endpoint: String,
        /// Underlying resolver error.
        #[source]
        source: io::Error,
    },
    /// The socket could not be opened.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        /// Endpoint being connected.
        endpoint: String,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
    /// Unix sockets are unavailable on this platform.
    #[error("unix sockets are not supported on this platform: {endpoint}")]
    UnsupportedUnix {
        /// Endpoint that requested the Unix transport.
        endpoint: String,
    },
    /// Reading or writing the socket failed.
    #[error("socket I/O failed: {0}")]
    Io(#[from] io::Error),
    /// The switch closed the connection.
    #[error("connection closed by the switch")]
    Closed,
    /// The connection was torn down while the operation was in progress.
    #[error("connection lost: {reason}")]
    Disconnected {
        /// Why the connection went down.
        reason: String,
    },
    /// The switch did not send a recognisable greeting.
    #[error("unexpected greeting from switch: {line:?}")]
    Greeting {
        /// The line received instead, empty when none arrived in time.
        line: String,
    },
}
