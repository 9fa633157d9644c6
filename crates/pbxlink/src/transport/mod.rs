//! Socket transport to the switch's manager interface.
//!
//! [`Connection`] wraps TCP and Unix streams behind one type so the reader,
//! the writer and the shutdown path can each hold their own clone of the
//! same socket.

mod errors;
mod reader;

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::net::UnixStream;

#[cfg(unix)]
use socket2::{Domain, SockAddr, Socket, Type};

use pbxlink_config::SocketEndpoint;

pub use self::errors::TransportError;
pub(crate) use self::reader::{BlockReader, Frame, RawBlock};
#[cfg(test)]
pub(crate) use self::reader::RawLine;

pub(crate) const TRANSPORT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");

/// Identity announced by the switch in its greeting line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    name: String,
    version: String,
}

impl ServerInfo {
    /// Parses a `<name>/<version>` greeting.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Greeting`] when the line has no version
    /// separator.
    pub fn parse(greeting: &str) -> Result<Self, TransportError> {
        let (name, version) =
            greeting
                .trim()
                .rsplit_once('/')
                .ok_or_else(|| TransportError::Greeting {
                    line: greeting.to_owned(),
                })?;
        Ok(Self {
            name: name.trim().to_owned(),
            version: version.trim().to_owned(),
        })
    }

    /// Product name, for example `Asterisk Call Manager`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Protocol version string.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }
}

impl fmt::Display for ServerInfo {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}/{}", self.name, self.version)
    }
}

/// An open stream to the switch.
#[derive(Debug)]
pub(crate) enum Connection {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Connection {
    pub(crate) fn open(endpoint: &SocketEndpoint, timeout: Duration) -> Result<Self, TransportError> {
        match endpoint {
            SocketEndpoint::Tcp { host, port } => {
                let address =
                    resolve_tcp_address(host, *port).map_err(|source| TransportError::Resolve {
                        endpoint: endpoint.to_string(),
                        source,
                    })?;
                let stream = TcpStream::connect_timeout(&address, timeout).map_err(|source| {
                    TransportError::Connect {
                        endpoint: endpoint.to_string(),
                        source,
                    }
                })?;
                stream.set_nodelay(true)?;
                Ok(Self::Tcp(stream))
            }
            #[cfg(unix)]
            SocketEndpoint::Unix { path } => {
                connect_unix(path.as_str(), timeout).map_err(|source| TransportError::Connect {
                    endpoint: endpoint.to_string(),
                    source,
                })
            }
            #[cfg(not(unix))]
            SocketEndpoint::Unix { .. } => Err(TransportError::UnsupportedUnix {
                endpoint: endpoint.to_string(),
            }),
        }
    }

    pub(crate) fn try_clone(&self) -> io::Result<Self> {
        match self {
            Self::Tcp(stream) => stream.try_clone().map(Self::Tcp),
            #[cfg(unix)]
            Self::Unix(stream) => stream.try_clone().map(Self::Unix),
        }
    }

    /// Applies a read timeout to the underlying socket, shared by all clones.
    pub(crate) fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.set_read_timeout(timeout),
            #[cfg(unix)]
            Self::Unix(stream) => stream.set_read_timeout(timeout),
        }
    }

    /// Shuts both directions down, waking any blocked reader.
    pub(crate) fn shutdown(&self) -> io::Result<()> {
        let result = match self {
            Self::Tcp(stream) => stream.shutdown(Shutdown::Both),
            #[cfg(unix)]
            Self::Unix(stream) => stream.shutdown(Shutdown::Both),
        };
        match result {
            Err(error) if error.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Self::Unix(stream) => stream.flush(),
        }
    }
}

fn resolve_tcp_address(host: &str, port: u16) -> io::Result<SocketAddr> {
    let mut addrs = (host, port).to_socket_addrs()?;
    addrs
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no resolved addresses"))
}

#[cfg(unix)]
fn connect_unix(path: &str, timeout: Duration) -> io::Result<Connection> {
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    let address = SockAddr::unix(path)?;
    socket.connect_timeout(&address, timeout)?;
    let stream: UnixStream = socket.into();
    Ok(Connection::Unix(stream))
}
