//! Connection lifecycle and the public manager facade.
//!
//! A [`Manager`] owns one session at a time. Each session runs a reader
//! thread (the only reader of the socket), a dispatch thread that runs
//! handlers, and optionally a watchdog. [`ManagerHandle`] is the cheap clone
//! handed to handlers so they can submit actions or close the connection.

mod auth;
mod errors;
mod monitor;

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use pbxlink_config::ManagerConfig;
use strum::Display;
use tracing::{debug, info, warn};

use crate::action::{Action, ActionOutcome};
use crate::aggregate::Assembler;
use crate::callbacks::{CallbackId, CallbackRegistry, EventHandler, Matcher};
use crate::correlation::RequestRegistry;
use crate::dispatch::{self, Dispatcher};
use crate::event::EventCatalog;
use crate::transport::{BlockReader, Connection, ServerInfo, TransportError};

#[cfg(test)]
pub(crate) use self::auth::challenge_key;
pub use self::errors::ManagerError;
use self::monitor::MonitorHandle;

const MANAGER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::manager");

/// Lifecycle state of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ConnectionState {
    /// No socket is open.
    Disconnected,
    /// The socket is being opened.
    Connecting,
    /// The login exchange is in progress.
    Authenticating,
    /// Actions and events flow.
    Ready,
}

/// One open socket and the flag its workers observe.
pub(crate) struct Session {
    writer: Mutex<Connection>,
    control: Connection,
    alive: Arc<AtomicBool>,
}

impl Session {
    fn new(writer: Connection, control: Connection) -> Self {
        Self {
            writer: Mutex::new(writer),
            control,
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        writer.write_all(bytes)?;
        writer.flush()?;
        Ok(())
    }

    fn shutdown(&self) {
        if let Err(error) = self.control.shutdown() {
            debug!(target: MANAGER_TARGET, %error, "socket shutdown failed");
        }
    }
}

#[derive(Default)]
struct Workers {
    reader: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
    monitor: Option<MonitorHandle>,
}

impl Workers {
    /// Joins every worker except the calling thread.
    fn join(self) -> Result<(), ManagerError> {
        let mut result = Ok(());
        if let Some(monitor) = self.monitor {
            if let Err(error) = monitor.stop() {
                result = Err(error);
            }
        }
        for (worker, handle) in [("reader", self.reader), ("dispatch", self.dispatcher)] {
            let Some(handle) = handle else { continue };
            if handle.thread().id() == thread::current().id() {
                continue;
            }
            if handle.join().is_err() {
                result = Err(ManagerError::ThreadPanic { worker });
            }
        }
        result
    }
}

/// State shared by the facade and the worker threads.
pub(crate) struct Shared {
    config: ManagerConfig,
    catalog: EventCatalog,
    registry: RequestRegistry,
    callbacks: CallbackRegistry,
    assembler: Mutex<Assembler>,
    state: Mutex<ConnectionState>,
    connected: AtomicBool,
    session: Mutex<Option<Arc<Session>>>,
    server: Mutex<Option<ServerInfo>>,
    workers: Mutex<Workers>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}

impl Shared {
    fn new(config: ManagerConfig, catalog: EventCatalog) -> Self {
        Self {
            registry: RequestRegistry::new(config.action_id_prefix.clone()),
            assembler: Mutex::new(Assembler::new(config.aggregates.clone())),
            catalog,
            callbacks: CallbackRegistry::new(),
            state: Mutex::new(ConnectionState::Disconnected),
            connected: AtomicBool::new(false),
            session: Mutex::new(None),
            server: Mutex::new(None),
            workers: Mutex::new(Workers::default()),
            config,
        }
    }

    pub(crate) const fn registry(&self) -> &RequestRegistry {
        &self.registry
    }

    pub(crate) const fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    pub(crate) const fn catalog(&self) -> &EventCatalog {
        &self.catalog
    }

    pub(crate) fn assembler(&self) -> MutexGuard<'_, Assembler> {
        lock(&self.assembler)
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: ConnectionState) {
        let mut current = lock(&self.state);
        let previous = *current;
        if previous != state {
            debug!(target: MANAGER_TARGET, from = %previous, to = %state, "connection state changed");
            *current = state;
        }
    }

    fn current_session(&self) -> Option<Arc<Session>> {
        lock(&self.session).clone()
    }

    /// Tears the connection down after a transport failure observed by a
    /// worker of `session`. Ignored when `session` is no longer current.
    pub(crate) fn mark_disconnected(&self, session: &Arc<Session>, reason: &str) {
        let is_current = lock(&self.session)
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, session));
        if is_current {
            self.disconnect(Some(session), reason);
        }
    }

    fn disconnect(&self, session: Option<&Arc<Session>>, reason: &str) {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected);
        let released = self.registry.fail_all(|| TransportError::Disconnected {
            reason: reason.to_owned(),
        });
        if let Some(session) = session {
            session.shutdown();
        }
        if was_connected {
            warn!(target: MANAGER_TARGET, reason, released, "connection down");
        }
    }
}

/// Cloneable access to a manager, handed to every event handler.
#[derive(Clone)]
pub struct ManagerHandle {
    shared: Arc<Shared>,
}

impl ManagerHandle {
    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    /// A handle with no connection, for exercising dispatch in isolation.
    #[cfg(test)]
    pub(crate) fn detached(config: ManagerConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new(config, EventCatalog::standard())),
        }
    }

    /// Opens the connection, replacing any existing one.
    ///
    /// Reads the greeting, starts the reader and dispatch threads, logs in
    /// when credentials are configured and starts the watchdog when one is
    /// configured.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Transport`] when the socket cannot be opened
    /// or the greeting is not recognised, and
    /// [`ManagerError::Authentication`] when the login is rejected. The
    /// half-open connection is closed in both cases.
    pub fn connect(&self) -> Result<ServerInfo, ManagerError> {
        self.close()?;
        self.shared.set_state(ConnectionState::Connecting);
        match self.open_session() {
            Ok(server) => Ok(server),
            Err(error) => {
                if let Err(close_error) = self.close() {
                    warn!(target: MANAGER_TARGET, error = %close_error, "cleanup after failed connect");
                }
                Err(error)
            }
        }
    }

    fn open_session(&self) -> Result<ServerInfo, ManagerError> {
        let shared = &self.shared;
        let config = &shared.config;
        info!(target: MANAGER_TARGET, endpoint = %config.endpoint, "connecting");

        let connection = Connection::open(&config.endpoint, config.connect_timeout())?;
        connection
            .set_read_timeout(Some(config.connect_timeout()))
            .map_err(TransportError::from)?;
        let mut reader = BlockReader::new(connection.try_clone().map_err(TransportError::from)?);
        let server = ServerInfo::parse(&reader.read_greeting()?)?;
        connection
            .set_read_timeout(Some(config.poll_interval()))
            .map_err(TransportError::from)?;

        let writer = connection.try_clone().map_err(TransportError::from)?;
        let session = Arc::new(Session::new(writer, connection));
        shared.assembler().reset();
        shared.registry.reopen();
        *lock(&shared.session) = Some(Arc::clone(&session));
        *lock(&shared.server) = Some(server.clone());
        shared.connected.store(true, Ordering::SeqCst);
        self.spawn_workers(reader, &session)?;

        if let Some(credentials) = &config.credentials {
            shared.set_state(ConnectionState::Authenticating);
            auth::authenticate(self, credentials)?;
        }
        shared.set_state(ConnectionState::Ready);
        info!(target: MANAGER_TARGET, %server, "connected");

        if let Some(monitor) = config.monitor {
            self.start_monitor(&session, monitor.interval(), monitor.timeout())?;
        }
        Ok(server)
    }

    fn spawn_workers(
        &self,
        reader: BlockReader<Connection>,
        session: &Arc<Session>,
    ) -> Result<(), ManagerError> {
        let (queue, inbound) = mpsc::channel();

        let manager = self.clone();
        let reader_session = Arc::clone(session);
        let reader_thread = thread::Builder::new()
            .name(String::from("pbxlink-reader"))
            .spawn(move || dispatch::run_reader(reader, &manager, &reader_session, &queue))
            .map_err(|source| ManagerError::Spawn {
                worker: "reader",
                source,
            })?;
        lock(&self.shared.workers).reader = Some(reader_thread);

        let dispatcher = Dispatcher::new(self.clone(), Arc::clone(&session.alive));
        let dispatch_thread = thread::Builder::new()
            .name(String::from("pbxlink-dispatch"))
            .spawn(move || dispatcher.run(&inbound))
            .map_err(|source| ManagerError::Spawn {
                worker: "dispatch",
                source,
            })?;
        lock(&self.shared.workers).dispatcher = Some(dispatch_thread);
        Ok(())
    }

    fn start_monitor(
        &self,
        session: &Arc<Session>,
        interval: Duration,
        probe_timeout: Option<Duration>,
    ) -> Result<(), ManagerError> {
        let timeout = probe_timeout.unwrap_or_else(|| self.shared.config.action_timeout());
        let monitor = monitor::spawn(self.clone(), Arc::clone(session), interval, timeout)?;
        let previous = lock(&self.shared.workers).monitor.replace(monitor);
        match previous {
            Some(previous) => previous.stop(),
            None => Ok(()),
        }
    }

    /// Starts (or restarts) the watchdog on the current connection.
    ///
    /// Every `interval` a `Ping` is sent; a transport error or a missing
    /// reply within the action timeout drops the connection.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::NotConnected`] when no connection is open.
    pub fn monitor_connection(&self, interval: Duration) -> Result<(), ManagerError> {
        let session = self
            .shared
            .current_session()
            .filter(|_| self.shared.is_connected())
            .ok_or(ManagerError::NotConnected)?;
        let probe_timeout = self.shared.config.monitor.and_then(|monitor| monitor.timeout());
        self.start_monitor(&session, interval, probe_timeout)
    }

    /// Closes the connection. Safe to call repeatedly and from handlers.
    ///
    /// Every pending action is released with a transport error at once and
    /// no handler runs after this returns, other than the one calling it.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::ThreadPanic`] when a worker panicked.
    pub fn close(&self) -> Result<(), ManagerError> {
        let shared = &self.shared;
        let session = lock(&shared.session).take();
        if let Some(session) = &session {
            session.alive.store(false, Ordering::SeqCst);
        }
        shared.disconnect(session.as_ref(), "connection closed");
        let workers = std::mem::take(&mut *lock(&shared.workers));
        let result = workers.join();
        shared.assembler().reset();
        if session.is_some() {
            info!(target: MANAGER_TARGET, "connection closed");
        }
        result
    }

    /// Sends an action and waits for its response.
    ///
    /// The request is registered before it is written, so an immediate
    /// reply cannot be missed. Aggregate families named with
    /// [`Action::expect_list`] are opened under the correlation id.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::NotConnected`] without a connection,
    /// [`ManagerError::DuplicateActionId`] for a clashing explicit id,
    /// [`ManagerError::Assembly`] when a list is already being assembled
    /// under the same id, and [`ManagerError::Transport`] when the write
    /// fails or the connection drops while waiting.
    pub fn send_action(&self, action: impl Into<Action>) -> Result<ActionOutcome, ManagerError> {
        let action = action.into();
        let shared = &self.shared;
        let session = shared
            .current_session()
            .filter(|_| shared.is_connected())
            .ok_or(ManagerError::NotConnected)?;

        let ticket = shared.registry.register(action.name(), action.action_id())?;
        let action_id = ticket.action_id().to_owned();
        if let Err(error) = self.open_lists(&action, &action_id) {
            shared.registry.expire(&action_id);
            return Err(error);
        }
        if let Err(error) = session.write(&action.serialize(&action_id)) {
            shared.registry.expire(&action_id);
            self.close_lists(&action, &action_id);
            shared.mark_disconnected(&session, &error.to_string());
            return Err(ManagerError::Transport(error));
        }
        debug!(
            target: MANAGER_TARGET,
            action = action.name(),
            action_id = action_id.as_str(),
            "sent action"
        );

        let timeout = action
            .timeout()
            .unwrap_or_else(|| shared.config.action_timeout());
        let outcome = ticket.wait(&shared.registry, timeout);
        let listing = matches!(
            &outcome,
            Ok(ActionOutcome::Responded(response)) if response.is_success()
        );
        if !listing {
            self.close_lists(&action, &action_id);
        }
        outcome
    }

    fn open_lists(&self, action: &Action, action_id: &str) -> Result<(), ManagerError> {
        let mut assembler = self.shared.assembler();
        for (opened, family) in action.expected_lists().iter().enumerate() {
            if let Err(error) = assembler.begin(family, action_id) {
                for earlier in action.expected_lists().iter().take(opened) {
                    assembler.abandon(earlier, action_id);
                }
                return Err(error.into());
            }
        }
        Ok(())
    }

    fn close_lists(&self, action: &Action, action_id: &str) {
        let mut assembler = self.shared.assembler();
        for family in action.expected_lists() {
            assembler.abandon(family, action_id);
        }
    }

    /// Registers `handler` for deliveries selected by `matcher`.
    pub fn register<H>(&self, matcher: Matcher, handler: H) -> CallbackId
    where
        H: EventHandler + 'static,
    {
        self.shared.callbacks.register(matcher, Arc::new(handler))
    }

    /// Removes a registration. Returns `false` when it was already gone.
    pub fn unregister(&self, id: CallbackId) -> bool {
        self.shared.callbacks.unregister(id)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *lock(&self.shared.state)
    }

    /// Returns `true` while the connection is up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Greeting of the most recent connection.
    #[must_use]
    pub fn server_info(&self) -> Option<ServerInfo> {
        lock(&self.shared.server).clone()
    }

    /// Number of actions awaiting a response.
    #[must_use]
    pub fn pending_actions(&self) -> usize {
        self.shared.registry.pending_count()
    }

    /// Configuration this manager was built with.
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.shared.config
    }
}

/// Client for one switch's manager interface.
///
/// Handlers may be registered before [`Manager::connect`]; they survive
/// reconnects. Dropping the manager closes the connection.
pub struct Manager {
    handle: ManagerHandle,
}

impl Manager {
    /// Creates a disconnected manager using the standard event catalog.
    #[must_use]
    pub fn new(config: ManagerConfig) -> Self {
        Self::with_catalog(config, EventCatalog::standard())
    }

    /// Creates a disconnected manager with a custom event catalog.
    #[must_use]
    pub fn with_catalog(config: ManagerConfig, catalog: EventCatalog) -> Self {
        Self {
            handle: ManagerHandle {
                shared: Arc::new(Shared::new(config, catalog)),
            },
        }
    }

    /// A cloneable handle to this manager.
    #[must_use]
    pub fn handle(&self) -> ManagerHandle {
        self.handle.clone()
    }

    /// See [`ManagerHandle::connect`].
    ///
    /// # Errors
    ///
    /// As for [`ManagerHandle::connect`].
    pub fn connect(&self) -> Result<ServerInfo, ManagerError> {
        self.handle.connect()
    }

    /// See [`ManagerHandle::close`].
    ///
    /// # Errors
    ///
    /// As for [`ManagerHandle::close`].
    pub fn close(&self) -> Result<(), ManagerError> {
        self.handle.close()
    }

    /// See [`ManagerHandle::send_action`].
    ///
    /// # Errors
    ///
    /// As for [`ManagerHandle::send_action`].
    pub fn send_action(&self, action: impl Into<Action>) -> Result<ActionOutcome, ManagerError> {
        self.handle.send_action(action)
    }

    /// See [`ManagerHandle::monitor_connection`].
    ///
    /// # Errors
    ///
    /// As for [`ManagerHandle::monitor_connection`].
    pub fn monitor_connection(&self, interval: Duration) -> Result<(), ManagerError> {
        self.handle.monitor_connection(interval)
    }

    /// See [`ManagerHandle::register`].
    pub fn register<H>(&self, matcher: Matcher, handler: H) -> CallbackId
    where
        H: EventHandler + 'static,
    {
        self.handle.register(matcher, handler)
    }

    /// See [`ManagerHandle::unregister`].
    pub fn unregister(&self, id: CallbackId) -> bool {
        self.handle.unregister(id)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    /// Returns `true` while the connection is up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    /// Greeting of the most recent connection.
    #[must_use]
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.handle.server_info()
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        if let Err(error) = self.handle.close() {
            warn!(target: MANAGER_TARGET, %error, "close during drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn new_manager_starts_disconnected() {
        let manager = Manager::new(ManagerConfig::default());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!manager.is_connected());
        assert!(manager.server_info().is_none());
    }

    #[rstest]
    fn actions_require_a_connection() {
        let manager = Manager::new(ManagerConfig::default());
        let error = manager.send_action("Ping").expect_err("not connected");
        assert!(matches!(error, ManagerError::NotConnected));
    }

    #[rstest]
    fn close_is_idempotent() {
        let manager = Manager::new(ManagerConfig::default());
        manager.close().expect("first close");
        manager.close().expect("second close");
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[rstest]
    fn watchdog_requires_a_connection() {
        let manager = Manager::new(ManagerConfig::default());
        let error = manager
            .monitor_connection(Duration::from_millis(10))
            .expect_err("not connected");
        assert!(matches!(error, ManagerError::NotConnected));
    }
}
