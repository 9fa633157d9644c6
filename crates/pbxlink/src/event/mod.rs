//! Unsolicited events and their type tags.

mod catalog;

use strum::{Display, EnumIter};

use crate::message::{FromMessage, Message};

pub use self::catalog::EventCatalog;

/// Type tag of an event.
///
/// The set is closed; names outside it resolve to [`EventKind::Generic`] so
/// protocol additions never fail dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[non_exhaustive]
pub enum EventKind {
    /// The switch finished starting up.
    FullyBooted,
    /// The switch is shutting down.
    Shutdown,
    /// A module was reloaded.
    Reload,
    /// A channel was created.
    Newchannel,
    /// A channel changed state.
    Newstate,
    /// A channel's caller id changed.
    NewCallerid,
    /// A channel entered a new dialplan step.
    Newexten,
    /// A channel hung up.
    Hangup,
    /// A channel variable was set.
    VarSet,
    /// A dial attempt started.
    DialBegin,
    /// A dial attempt finished.
    DialEnd,
    /// Two channels were bridged.
    BridgeEnter,
    /// A channel left a bridge.
    BridgeLeave,
    /// A channel was placed on hold.
    Hold,
    /// A channel was taken off hold.
    Unhold,
    /// A DTMF digit was received.
    #[strum(serialize = "DTMFEnd")]
    DtmfEnd,
    /// A peer's registration state changed.
    PeerStatus,
    /// An outbound registration changed state.
    Registry,
    /// A call was parked.
    ParkedCall,
    /// A parked call was retrieved.
    UnParkedCall,
    /// A queue caller joined.
    QueueCallerJoin,
    /// A queue caller left.
    QueueCallerLeave,
    /// A voicemail box's message count changed.
    MessageWaiting,
    /// An originate request finished.
    OriginateResponse,
    /// A user-defined event.
    UserEvent,
    /// Member of a channel list.
    CoreShowChannel,
    /// End of a channel list.
    CoreShowChannelsComplete,
    /// Queue parameters within a queue status list.
    QueueParams,
    /// Queue member within a queue status list.
    QueueMember,
    /// Queue caller within a queue status list.
    QueueEntry,
    /// End of a queue status list.
    QueueStatusComplete,
    /// Member of a peer list.
    PeerEntry,
    /// End of a peer list.
    PeerlistComplete,
    /// Member of a registration list.
    RegistryEntry,
    /// End of a registration list.
    RegistrationsComplete,
    /// Member of a channel status list.
    Status,
    /// End of a channel status list.
    StatusComplete,
    /// Member of a voicemail user list.
    VoicemailUserEntry,
    /// End of a voicemail user list.
    VoicemailUserEntryComplete,
    /// Assembled list delivered in place of its completion event.
    Aggregate,
    /// Any name outside the catalog.
    Generic,
}

/// An unsolicited message with its resolved type tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    message: Message,
    kind: EventKind,
}

impl Event {
    pub(crate) const fn new(message: Message, kind: EventKind) -> Self {
        Self { message, kind }
    }

    /// Event name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.message.name()
    }

    /// Type tag.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.kind
    }

    /// Underlying message.
    #[must_use]
    pub const fn message(&self) -> &Message {
        &self.message
    }

    /// First value of header `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.message.get(name)
    }

    /// Converts the event into a typed value.
    ///
    /// # Errors
    ///
    /// Propagates the conversion's error.
    pub fn decode<T: FromMessage>(&self) -> Result<T, T::Error> {
        T::from_message(&self.message)
    }
}
