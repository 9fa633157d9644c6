//! Test support for behavioural coverage of the manager.
//!
//! Wraps a [`FakeSwitch`] and a [`Manager`] connected to it, and records what
//! registered handlers observe so step definitions stay focused on their
//! assertions.

mod fake_switch;

use std::cell::RefCell;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, ensure};
use pbxlink_config::{AuthMethod, Credentials, ManagerConfig, MonitorConfig, SocketEndpoint};
use rstest::fixture;

use crate::{
    Action, ActionOutcome, Aggregate, Delivery, Event, Manager, ManagerError, ManagerHandle,
    Matcher, ServerInfo,
};

pub(super) use self::fake_switch::{CHALLENGE, FakeSwitch, GREETING, SECRET, USERNAME, wait_for};

/// How long asynchronous expectations may take to settle.
pub(super) const SETTLE: Duration = Duration::from_secs(2);

/// Handler observations shared with the dispatch thread.
#[derive(Clone, Default)]
pub(super) struct Observations {
    log: Arc<Mutex<Vec<String>>>,
    events: Arc<Mutex<Vec<Event>>>,
    aggregates: Arc<Mutex<Vec<Aggregate>>>,
}

impl Observations {
    fn observe(&self, label: &str, delivery: &Delivery) {
        let detail = match delivery {
            Delivery::Aggregate(aggregate) => {
                push(&self.aggregates, aggregate.clone());
                format!("{}({})", aggregate.family(), aggregate.len())
            }
            Delivery::Event(event) => {
                push(&self.events, event.clone());
                event.name().to_owned()
            }
            other => other.name().to_owned(),
        };
        push(&self.log, format!("{label}:{detail}"));
    }

    pub(super) fn log(&self) -> Vec<String> {
        snapshot(&self.log)
    }

    pub(super) fn events(&self) -> Vec<Event> {
        snapshot(&self.events)
    }

    pub(super) fn aggregates(&self) -> Vec<Aggregate> {
        snapshot(&self.aggregates)
    }
}

fn push<T>(items: &Mutex<Vec<T>>, item: T) {
    items
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
        .push(item);
}

fn snapshot<T: Clone>(items: &Mutex<Vec<T>>) -> Vec<T> {
    items
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
        .clone()
}

/// Shared state for the manager scenarios.
#[derive(Default)]
pub(super) struct TestWorld {
    pub switch: Option<FakeSwitch>,
    pub manager: Option<Manager>,
    pub observations: Observations,
    pub connected: Option<Result<ServerInfo, ManagerError>>,
    pub outcome: Option<Result<ActionOutcome, ManagerError>>,
    pub released: Vec<Result<ActionOutcome, ManagerError>>,
    pub release_time: Option<Duration>,
    monitor: Option<MonitorConfig>,
}

impl TestWorld {
    pub fn start_switch(&mut self) -> Result<()> {
        self.switch = Some(FakeSwitch::spawn()?);
        Ok(())
    }

    pub fn switch(&self) -> &FakeSwitch {
        self.switch.as_ref().expect("fake switch started")
    }

    pub fn manager(&self) -> &Manager {
        self.manager.as_ref().expect("manager created")
    }

    pub fn handle(&self) -> ManagerHandle {
        self.manager().handle()
    }

    pub fn enable_monitor(&mut self, monitor: MonitorConfig) {
        self.monitor = Some(monitor);
    }

    pub fn config(&self, credentials: Credentials) -> ManagerConfig {
        let config = ManagerConfig::new(SocketEndpoint::tcp("127.0.0.1", self.switch().port()))
            .with_credentials(credentials)
            .with_action_timeout(SETTLE)
            .with_connect_timeout(SETTLE)
            .with_poll_interval(Duration::from_millis(20));
        match self.monitor {
            Some(monitor) => config.with_monitor(monitor),
            None => config,
        }
    }

    /// Builds the manager without connecting, so handlers can be registered
    /// first.
    pub fn prepare(&mut self, credentials: Credentials) {
        if self.manager.is_none() {
            self.manager = Some(Manager::new(self.config(credentials)));
        }
    }

    pub fn connect_with(&mut self, credentials: Credentials) {
        self.prepare(credentials);
        self.connected = Some(self.manager().connect());
    }

    pub fn connect(&mut self) -> Result<()> {
        self.connect_with(Credentials::new(USERNAME, SECRET));
        match self.connected.as_ref() {
            Some(Ok(_)) => Ok(()),
            Some(Err(error)) => Err(anyhow!("connect failed: {error}")),
            None => Err(anyhow!("connect was not attempted")),
        }
    }

    pub fn connect_by_challenge(&mut self) {
        self.connect_with(Credentials::new(USERNAME, SECRET).with_method(AuthMethod::Challenge));
    }

    pub fn record(&mut self, label: &str, matcher: Matcher) {
        self.prepare(Credentials::new(USERNAME, SECRET));
        let observations = self.observations.clone();
        let label = label.to_owned();
        self.manager()
            .register(matcher, move |delivery: &Delivery, _: &ManagerHandle| {
                observations.observe(&label, delivery);
            });
    }

    pub fn send(&mut self, action: Action) {
        self.outcome = Some(self.manager().send_action(action));
    }

    pub fn response(&self) -> &crate::ActionResponse {
        match self.outcome.as_ref() {
            Some(Ok(ActionOutcome::Responded(response))) => response,
            other => panic!("expected a response, got {other:?}"),
        }
    }

    /// Parks `count` actions that the switch never answers, then closes the
    /// manager and collects what each caller got back.
    pub fn close_with_pending(&mut self, count: usize) -> Result<()> {
        let callers: Vec<_> = (0..count)
            .map(|_| {
                let handle = self.handle();
                thread::spawn(move || {
                    handle.send_action(Action::new("Hold").with_timeout(Duration::from_secs(5)))
                })
            })
            .collect();
        let manager = self.manager();
        ensure!(
            wait_for(SETTLE, || manager.handle().pending_actions() == count),
            "actions never became pending"
        );
        let started = Instant::now();
        manager.close().context("close manager")?;
        for caller in callers {
            let result = caller
                .join()
                .map_err(|_| anyhow!("caller thread panicked"))?;
            self.released.push(result);
        }
        self.release_time = Some(started.elapsed());
        Ok(())
    }

    /// Parks one action, then lets `trigger` break the connection.
    pub fn pending_then(&mut self, trigger: impl FnOnce(&FakeSwitch)) -> Result<()> {
        let handle = self.handle();
        let caller = thread::spawn(move || {
            handle.send_action(Action::new("Hold").with_timeout(Duration::from_secs(5)))
        });
        let manager = self.handle();
        ensure!(
            wait_for(SETTLE, || manager.pending_actions() == 1),
            "action never became pending"
        );
        trigger(self.switch());
        let result = caller
            .join()
            .map_err(|_| anyhow!("caller thread panicked"))?;
        self.outcome = Some(result);
        Ok(())
    }
}

#[fixture]
pub(super) fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::default())
}
