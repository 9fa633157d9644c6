//! Tracks in-flight actions and matches responses to them.
//!
//! Every pending request owns a private one-shot slot. Resolving one request
//! never wakes another, and the registry lock is held only while the map is
//! touched.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::action::{ActionOutcome, ActionResponse};
use crate::manager::ManagerError;
use crate::message::Message;
use crate::transport::TransportError;

const CORRELATION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::correlation");

type Resolution = Result<Message, TransportError>;

struct PendingRequest {
    action: String,
    submitted: Instant,
    slot: SyncSender<Resolution>,
}

struct RegistryState {
    next_id: u32,
    pending: HashMap<String, PendingRequest>,
    open: bool,
}

impl RegistryState {
    fn advance(&mut self) -> u32 {
        let current = self.next_id;
        self.next_id = match current {
            u32::MAX => 1,
            other => other + 1,
        };
        current
    }
}

/// In-flight request table owned by one manager.
pub(crate) struct RequestRegistry {
    prefix: String,
    state: Mutex<RegistryState>,
}

impl RequestRegistry {
    /// Creates a closed registry; call [`Self::reopen`] once connected.
    pub(crate) fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            state: Mutex::new(RegistryState {
                next_id: 1,
                pending: HashMap::new(),
                open: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    /// Registers a request, allocating an id unless `explicit` names one.
    pub(crate) fn register(
        &self,
        action: &str,
        explicit: Option<&str>,
    ) -> Result<Ticket, ManagerError> {
        let mut state = self.lock();
        if !state.open {
            return Err(ManagerError::NotConnected);
        }
        let action_id = match explicit {
            Some(id) if state.pending.contains_key(id) => {
                return Err(ManagerError::DuplicateActionId {
                    action_id: id.to_owned(),
                });
            }
            Some(id) => id.to_owned(),
            None => self.allocate(&mut state),
        };
        let (slot, receiver) = mpsc::sync_channel(1);
        let submitted = Instant::now();
        state.pending.insert(
            action_id.clone(),
            PendingRequest {
                action: action.to_owned(),
                submitted,
                slot,
            },
        );
        debug!(
            target: CORRELATION_TARGET,
            action,
            action_id = action_id.as_str(),
            "registered request"
        );
        Ok(Ticket {
            action: action.to_owned(),
            action_id,
            submitted,
            receiver,
        })
    }

    fn allocate(&self, state: &mut RegistryState) -> String {
        loop {
            let candidate = format!("{}-{:08x}", self.prefix, state.advance());
            if !state.pending.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Hands `message` to the request it answers.
    ///
    /// Returns the message back when no pending request matches.
    pub(crate) fn resolve(&self, message: Message) -> Option<Message> {
        let Some(action_id) = message.action_id() else {
            return Some(message);
        };
        let Some(request) = self.lock().pending.remove(action_id) else {
            return Some(message);
        };
        debug!(
            target: CORRELATION_TARGET,
            action = request.action.as_str(),
            action_id,
            elapsed_ms = u64::try_from(request.submitted.elapsed().as_millis()).unwrap_or(u64::MAX),
            "resolved request"
        );
        match request.slot.try_send(Ok(message)) {
            Ok(()) => None,
            Err(TrySendError::Full(resolution) | TrySendError::Disconnected(resolution)) => {
                resolution.ok()
            }
        }
    }

    /// Removes a request whose waiter gave up. Returns `false` when it was
    /// already gone.
    pub(crate) fn expire(&self, action_id: &str) -> bool {
        self.lock().pending.remove(action_id).is_some()
    }

    /// Releases every pending request with an error built by `error` and
    /// refuses new registrations until [`Self::reopen`].
    pub(crate) fn fail_all(&self, error: impl Fn() -> TransportError) -> usize {
        let drained: Vec<_> = {
            let mut state = self.lock();
            state.open = false;
            state.pending.drain().collect()
        };
        let count = drained.len();
        for (action_id, request) in drained {
            if request.slot.try_send(Err(error())).is_err() {
                warn!(
                    target: CORRELATION_TARGET,
                    action_id = action_id.as_str(),
                    "waiter already gone while failing request"
                );
            }
        }
        count
    }

    /// Accepts registrations again.
    pub(crate) fn reopen(&self) {
        self.lock().open = true;
    }

    /// Number of requests awaiting a response.
    pub(crate) fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }
}

/// Caller side of a registered request.
pub(crate) struct Ticket {
    action: String,
    action_id: String,
    submitted: Instant,
    receiver: Receiver<Resolution>,
}

impl Ticket {
    pub(crate) fn action_id(&self) -> &str {
        &self.action_id
    }

    /// Blocks until the request resolves, fails or `timeout` elapses.
    ///
    /// Exactly one outcome is produced: a response that races the deadline
    /// wins over the timeout.
    pub(crate) fn wait(
        self,
        registry: &RequestRegistry,
        timeout: Duration,
    ) -> Result<ActionOutcome, ManagerError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(resolution) => self.finish(resolution),
            Err(RecvTimeoutError::Timeout) => {
                if registry.expire(&self.action_id) {
                    debug!(
                        target: CORRELATION_TARGET,
                        action = self.action.as_str(),
                        action_id = self.action_id.as_str(),
                        "request timed out"
                    );
                    return Ok(ActionOutcome::TimedOut {
                        action_id: self.action_id,
                    });
                }
                match self.receiver.try_recv() {
                    Ok(resolution) => self.finish(resolution),
                    Err(TryRecvError::Empty | TryRecvError::Disconnected) => {
                        Ok(ActionOutcome::TimedOut {
                            action_id: self.action_id,
                        })
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => Err(ManagerError::Transport(
                TransportError::Disconnected {
                    reason: String::from("request abandoned"),
                },
            )),
        }
    }

    fn finish(self, resolution: Resolution) -> Result<ActionOutcome, ManagerError> {
        let message = resolution?;
        Ok(ActionOutcome::Responded(ActionResponse::new(
            message,
            self.action,
            self.action_id,
            self.submitted.elapsed(),
        )))
    }
}
