//! Configuration shared by manager interface clients.
//!
//! Everything here is plain data with serde support so callers can load it
//! from whichever file format or environment layer they prefer.

#![deny(missing_docs)]

mod aggregate;
mod credentials;
pub mod defaults;
mod logging;
mod manager;
mod socket;

pub use aggregate::{AggregateFamily, DEFAULT_LIST_ID_HEADER, standard_families};
pub use credentials::{AuthMethod, Credentials};
pub use logging::{LogFormat, LogFormatParseError, LoggingConfig};
pub use manager::{ManagerConfig, MonitorConfig};
pub use socket::{SocketEndpoint, SocketParseError};
