use std::fmt;
use std::str::FromStr;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::defaults::DEFAULT_MANAGER_PORT;

/// Where the manager interface listens.
///
/// Accepts `tcp://host[:port]` and `unix:///path` URLs, a bare `host[:port]`
/// pair, or an absolute socket path. The port defaults to the manager's
/// well-known port.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum SocketEndpoint {
    /// Local socket, used when the client runs beside the switch.
    Unix {
        /// Filesystem path of the socket.
        path: Utf8PathBuf,
    },
    /// Network listener.
    Tcp {
        /// Host name or address.
        host: String,
        /// Listener port.
        #[serde(default = "default_port")]
        port: u16,
    },
}

const fn default_port() -> u16 {
    DEFAULT_MANAGER_PORT
}

impl SocketEndpoint {
    /// Local socket at `path`.
    #[must_use]
    pub fn unix(path: impl Into<Utf8PathBuf>) -> Self {
        Self::Unix { path: path.into() }
    }

    /// Network listener at `host:port`.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    fn from_url(input: &str, url: &Url) -> Result<Self, SocketParseError> {
        match url.scheme() {
            "tcp" => {
                let host = url
                    .host_str()
                    .filter(|host| !host.is_empty())
                    .ok_or_else(|| SocketParseError::MissingHost(input.to_owned()))?;
                Ok(Self::tcp(
                    host.trim_start_matches('[').trim_end_matches(']'),
                    url.port().unwrap_or(DEFAULT_MANAGER_PORT),
                ))
            }
            "unix" => match url.path() {
                "" | "/" => Err(SocketParseError::MissingUnixPath(input.to_owned())),
                path => Ok(Self::unix(path)),
            },
            other => Err(SocketParseError::UnsupportedScheme(other.to_owned())),
        }
    }
}

impl fmt::Display for SocketEndpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } if host.contains(':') => {
                write!(formatter, "tcp://[{host}]:{port}")
            }
            Self::Tcp { host, port } => write!(formatter, "tcp://{host}:{port}"),
            Self::Unix { path } => write!(formatter, "unix://{path}"),
        }
    }
}

impl FromStr for SocketEndpoint {
    type Err = SocketParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed.starts_with('/') {
            return Ok(Self::unix(trimmed));
        }
        let url = if trimmed.contains("://") {
            Url::parse(trimmed)?
        } else {
            Url::parse(&format!("tcp://{trimmed}"))?
        };
        Self::from_url(input, &url)
    }
}

/// Reasons an endpoint string was rejected.
#[derive(Debug, Error)]
pub enum SocketParseError {
    /// Neither `tcp` nor `unix`.
    #[error("unsupported endpoint scheme '{0}'")]
    UnsupportedScheme(String),
    /// A `tcp` endpoint without a host.
    #[error("no host in endpoint '{0}'")]
    MissingHost(String),
    /// A `unix` endpoint without a path.
    #[error("no socket path in endpoint '{0}'")]
    MissingUnixPath(String),
    /// Not a URL at all.
    #[error(transparent)]
    Url(#[from] url::ParseError),
}
