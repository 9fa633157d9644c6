//! Moves inbound blocks from the socket to requests and handlers.
//!
//! The reader thread parses each block and resolves correlated responses on
//! the spot, so a waiting caller is released even while handlers are busy.
//! Everything else is queued for the dispatch thread, which runs the
//! aggregate assembler and the callback table.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};

use tracing::{debug, warn};

use crate::aggregate::Assembly;
use crate::callbacks::{Delivery, Reach};
use crate::event::Event;
use crate::manager::{ManagerHandle, Session};
use crate::message::{Message, ProtocolError, parse_block};
use crate::transport::{BlockReader, Connection, Frame, TRANSPORT_TARGET};

const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// Work queued for the dispatch thread.
#[derive(Debug)]
pub(crate) enum Inbound {
    /// A message no pending request claimed.
    Unmatched(Message),
    /// A block that failed to parse.
    Malformed(ProtocolError),
}

/// Reader thread body. Runs until the session ends or the socket fails.
pub(crate) fn run_reader(
    mut reader: BlockReader<Connection>,
    manager: &ManagerHandle,
    session: &Arc<Session>,
    queue: &Sender<Inbound>,
) {
    let shared = manager.shared();
    while session.is_alive() && shared.is_connected() {
        let block = match reader.next_frame() {
            Ok(Frame::Idle) => continue,
            Ok(Frame::Block(block)) => block,
            Err(error) => {
                shared.mark_disconnected(session, &error.to_string());
                break;
            }
        };
        let inbound = match parse_block(block) {
            Ok(message) => match shared.registry().resolve(message) {
                Some(unmatched) => Inbound::Unmatched(unmatched),
                None => continue,
            },
            Err(error) => {
                warn!(target: TRANSPORT_TARGET, %error, "routing malformed block to fallback handlers");
                Inbound::Malformed(error)
            }
        };
        if queue.send(inbound).is_err() {
            break;
        }
    }
    debug!(target: TRANSPORT_TARGET, "reader stopped");
}

/// Dispatch thread state.
pub(crate) struct Dispatcher {
    manager: ManagerHandle,
    alive: Arc<AtomicBool>,
}

impl Dispatcher {
    pub(crate) const fn new(manager: ManagerHandle, alive: Arc<AtomicBool>) -> Self {
        Self { manager, alive }
    }

    /// Drains the queue until the reader hangs up or the session ends.
    pub(crate) fn run(self, queue: &Receiver<Inbound>) {
        for inbound in queue {
            if !self.alive.load(Ordering::SeqCst) {
                break;
            }
            self.dispatch(inbound);
        }
        debug!(target: DISPATCH_TARGET, "dispatcher stopped");
    }

    /// Routes one item and runs its handlers. Returns the number invoked.
    pub(crate) fn dispatch(&self, inbound: Inbound) -> usize {
        let shared = self.manager.shared();
        let (delivery, reach) = match inbound {
            Inbound::Malformed(error) => (Delivery::Malformed(error), Reach::Full),
            Inbound::Unmatched(message) if message.is_response() => {
                debug!(
                    target: DISPATCH_TARGET,
                    action_id = message.action_id().unwrap_or_default(),
                    "routing unmatched response to orphan handlers"
                );
                (Delivery::Orphan(message), Reach::Full)
            }
            Inbound::Unmatched(message) => {
                let kind = shared.catalog().resolve(message.name());
                let assembly = shared.assembler().accept(Event::new(message, kind));
                match assembly {
                    Assembly::Member(event) => (Delivery::Event(event), Reach::Explicit),
                    Assembly::Sealed(aggregate) => (Delivery::Aggregate(aggregate), Reach::Full),
                    Assembly::Passthrough(event) => (Delivery::Event(event), Reach::Full),
                }
            }
        };
        shared
            .callbacks()
            .deliver(&delivery, reach, &self.manager, &self.alive)
    }
}
