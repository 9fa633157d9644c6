//! Client engine for the switch manager interface.
//!
//! The crate speaks the line-oriented `Key: Value` protocol of the manager
//! interface. It correlates actions with their responses, fans unsolicited
//! events out to registered handlers, assembles list replies into single
//! aggregates and propagates connection loss to every waiting caller.
//! Concrete action and event schemas live outside the crate and plug in via
//! [`FromMessage`] and `Into<Action>`.

#![deny(missing_docs)]

mod action;
mod aggregate;
mod callbacks;
mod correlation;
mod dispatch;
mod event;
mod manager;
mod message;
pub mod telemetry;
mod transport;

#[cfg(test)]
mod tests;

pub use action::{Action, ActionOutcome, ActionResponse};
pub use aggregate::{Aggregate, AssemblyError};
pub use callbacks::{CallbackId, Delivery, EventHandler, Matcher};
pub use event::{Event, EventCatalog, EventKind};
pub use manager::{ConnectionState, Manager, ManagerError, ManagerHandle};
pub use message::{
    ACTION_ID_HEADER, EVENT_HEADER, FromMessage, GENERIC_EVENT, GENERIC_RESPONSE, Headers, Message,
    MessageKind, ProtocolError, ProtocolErrorKind, RESPONSE_HEADER,
};
pub use transport::{ServerInfo, TransportError};
