//! Errors surfaced by [`Manager`](super::Manager) operations.

use std::io;

use thiserror::Error;

use crate::aggregate::AssemblyError;
use crate::transport::TransportError;

/// Failures of manager operations.
///
/// An action that receives no response in time is not an error; it yields
/// [`ActionOutcome::TimedOut`](crate::ActionOutcome::TimedOut).
#[derive(Debug, Error)]
pub enum ManagerError {
    /// No connection is open.
    #[error("not connected to the switch")]
    NotConnected,
    /// The connection failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The switch rejected the login.
    #[error("authentication failed: {message}")]
    Authentication {
        /// Reason reported by the switch.
        message: String,
    },
    /// The explicit correlation id is already in flight.
    #[error("action id '{action_id}' is already in flight")]
    DuplicateActionId {
        /// The clashing id.
        action_id: String,
    },
    /// An aggregate could not be opened for the action.
    #[error(transparent)]
    Assembly(#[from] AssemblyError),
    /// A background thread could not be started.
    #[error("failed to spawn {worker} thread: {source}")]
    Spawn {
        /// Name of the worker.
        worker: &'static str,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// A background thread panicked.
    #[error("{worker} thread panicked")]
    ThreadPanic {
        /// Name of the worker.
        worker: &'static str,
    },
}
