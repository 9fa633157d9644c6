//! Watchdog that probes the connection with `Ping`.

use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use super::{MANAGER_TARGET, ManagerError, ManagerHandle, Session};
use crate::action::{Action, ActionOutcome};

/// Running watchdog. Dropping the stop sender wakes it immediately.
pub(crate) struct MonitorHandle {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

impl MonitorHandle {
    /// Stops the watchdog and waits for it, unless called from it.
    pub(crate) fn stop(self) -> Result<(), ManagerError> {
        drop(self.stop);
        if self.thread.thread().id() == thread::current().id() {
            return Ok(());
        }
        self.thread
            .join()
            .map_err(|_| ManagerError::ThreadPanic { worker: "monitor" })
    }
}

pub(super) fn spawn(
    manager: ManagerHandle,
    session: Arc<Session>,
    interval: Duration,
    probe_timeout: Duration,
) -> Result<MonitorHandle, ManagerError> {
    let (stop, stopped) = mpsc::channel::<()>();
    let thread = thread::Builder::new()
        .name(String::from("pbxlink-monitor"))
        .spawn(move || {
            debug!(
                target: MANAGER_TARGET,
                interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
                "watchdog started"
            );
            loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
                if !session.is_alive() || !manager.is_connected() {
                    break;
                }
                if let Err(reason) = probe(&manager, probe_timeout) {
                    warn!(target: MANAGER_TARGET, reason = reason.as_str(), "watchdog probe failed");
                    manager.shared().mark_disconnected(&session, &reason);
                    break;
                }
            }
            debug!(target: MANAGER_TARGET, "watchdog stopped");
        })
        .map_err(|source: io::Error| ManagerError::Spawn {
            worker: "monitor",
            source,
        })?;
    Ok(MonitorHandle { stop, thread })
}

fn probe(manager: &ManagerHandle, timeout: Duration) -> Result<(), String> {
    match manager.send_action(Action::new("Ping").with_timeout(timeout)) {
        Ok(ActionOutcome::Responded(_)) => Ok(()),
        Ok(ActionOutcome::TimedOut { action_id }) => {
            Err(format!("no reply to liveness probe {action_id}"))
        }
        Err(error) => Err(error.to_string()),
    }
}
