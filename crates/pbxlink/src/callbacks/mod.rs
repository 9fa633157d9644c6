//! Subscription table for unsolicited deliveries.
//!
//! Registrations are kept in insertion order. For each delivery the table is
//! walked once per matcher phase (name, kind, pattern, wildcard) so that a
//! handler's position within its phase never changes.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use regex::Regex;
use tracing::error;

use crate::aggregate::Aggregate;
use crate::event::{Event, EventKind};
use crate::manager::ManagerHandle;
use crate::message::{Message, ProtocolError};

const CALLBACK_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::callbacks");

/// Something handed to event handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// An unsolicited event.
    Event(Event),
    /// A sealed list reply.
    Aggregate(Aggregate),
    /// A response whose request is gone.
    Orphan(Message),
    /// A block that could not be parsed.
    Malformed(ProtocolError),
}

impl Delivery {
    /// Event name, aggregate family name, orphan response name, or an empty
    /// string for malformed blocks.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Event(event) => event.name(),
            Self::Aggregate(aggregate) => aggregate.family(),
            Self::Orphan(message) => message.name(),
            Self::Malformed(_) => "",
        }
    }

    /// Type tag used by [`Matcher::Kind`].
    #[must_use]
    pub const fn kind(&self) -> Option<EventKind> {
        match self {
            Self::Event(event) => Some(event.kind()),
            Self::Aggregate(_) => Some(EventKind::Aggregate),
            Self::Orphan(_) | Self::Malformed(_) => None,
        }
    }

    /// The event, when this is one.
    #[must_use]
    pub const fn as_event(&self) -> Option<&Event> {
        match self {
            Self::Event(event) => Some(event),
            _ => None,
        }
    }

    /// The aggregate, when this is one.
    #[must_use]
    pub const fn as_aggregate(&self) -> Option<&Aggregate> {
        match self {
            Self::Aggregate(aggregate) => Some(aggregate),
            _ => None,
        }
    }
}

/// Selects the deliveries a handler receives.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Events (or aggregates) with this name, ignoring case.
    Name(String),
    /// Events with this type tag.
    Kind(EventKind),
    /// Events whose name matches the expression.
    Pattern(Regex),
    /// Every event and aggregate.
    All,
    /// Responses that arrived after their request was gone.
    Orphan,
    /// Blocks that failed to parse.
    Malformed,
}

impl Matcher {
    /// Name matcher.
    #[must_use]
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    /// Pattern matcher.
    ///
    /// # Errors
    ///
    /// Returns the regex compilation error for an invalid expression.
    pub fn pattern(expression: &str) -> Result<Self, regex::Error> {
        Regex::new(expression).map(Self::Pattern)
    }
}

impl From<EventKind> for Matcher {
    fn from(kind: EventKind) -> Self {
        Self::Kind(kind)
    }
}

/// A callback with the fixed `(delivery, manager)` shape.
pub trait EventHandler: Send + Sync {
    /// Handles one delivery.
    fn handle(&self, delivery: &Delivery, manager: &ManagerHandle);
}

impl<F> EventHandler for F
where
    F: Fn(&Delivery, &ManagerHandle) + Send + Sync,
{
    fn handle(&self, delivery: &Delivery, manager: &ManagerHandle) {
        self(delivery, manager);
    }
}

/// Identifies a registration for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

/// Which matcher phases a delivery reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reach {
    /// Name, kind, pattern and wildcard.
    Full,
    /// Name and kind only, used for raw list members.
    Explicit,
}

struct Registration {
    id: CallbackId,
    matcher: Matcher,
    handler: Arc<dyn EventHandler>,
}

#[derive(Clone, Copy)]
enum Phase {
    Name,
    Kind,
    Pattern,
    All,
    Orphan,
    Malformed,
}

/// Ordered registration table.
pub(crate) struct CallbackRegistry {
    next_id: AtomicU64,
    registrations: RwLock<Vec<Registration>>,
}

impl CallbackRegistry {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            registrations: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn register(&self, matcher: Matcher, handler: Arc<dyn EventHandler>) -> CallbackId {
        let id = CallbackId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.registrations
            .write()
            .unwrap_or_else(|poison| poison.into_inner())
            .push(Registration {
                id,
                matcher,
                handler,
            });
        id
    }

    pub(crate) fn unregister(&self, id: CallbackId) -> bool {
        let mut registrations = self
            .registrations
            .write()
            .unwrap_or_else(|poison| poison.into_inner());
        let before = registrations.len();
        registrations.retain(|registration| registration.id != id);
        registrations.len() != before
    }

    /// Handlers for `delivery`, in invocation order.
    fn snapshot(&self, delivery: &Delivery, reach: Reach) -> Vec<Arc<dyn EventHandler>> {
        let phases: &[Phase] = match (delivery, reach) {
            (Delivery::Orphan(_), _) => &[Phase::Orphan],
            (Delivery::Malformed(_), _) => &[Phase::Malformed],
            (_, Reach::Explicit) => &[Phase::Name, Phase::Kind],
            (_, Reach::Full) => &[Phase::Name, Phase::Kind, Phase::Pattern, Phase::All],
        };
        let registrations = self
            .registrations
            .read()
            .unwrap_or_else(|poison| poison.into_inner());
        let mut handlers = Vec::new();
        for phase in phases {
            handlers.extend(
                registrations
                    .iter()
                    .filter(|registration| selects(*phase, &registration.matcher, delivery))
                    .map(|registration| Arc::clone(&registration.handler)),
            );
        }
        handlers
    }

    /// Invokes every matching handler. Panics are caught and logged; the
    /// remaining handlers still run. Stops early once `alive` is cleared.
    pub(crate) fn deliver(
        &self,
        delivery: &Delivery,
        reach: Reach,
        manager: &ManagerHandle,
        alive: &AtomicBool,
    ) -> usize {
        let handlers = self.snapshot(delivery, reach);
        let mut invoked = 0;
        for handler in handlers {
            if !alive.load(Ordering::SeqCst) {
                break;
            }
            invoked += 1;
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| handler.handle(delivery, manager)));
            if let Err(payload) = outcome {
                error!(
                    target: CALLBACK_TARGET,
                    delivery = delivery.name(),
                    panic = panic_message(payload.as_ref()),
                    "event handler panicked"
                );
            }
        }
        invoked
    }
}

fn selects(phase: Phase, matcher: &Matcher, delivery: &Delivery) -> bool {
    match (phase, matcher) {
        (Phase::Name, Matcher::Name(name)) => name.eq_ignore_ascii_case(delivery.name()),
        (Phase::Kind, Matcher::Kind(kind)) => delivery.kind() == Some(*kind),
        (Phase::Pattern, Matcher::Pattern(pattern)) => pattern.is_match(delivery.name()),
        (Phase::All, Matcher::All)
        | (Phase::Orphan, Matcher::Orphan)
        | (Phase::Malformed, Matcher::Malformed) => true,
        _ => false,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(text) = payload.downcast_ref::<&str>() {
        *text
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.as_str()
    } else {
        "non-string panic payload"
    }
}
