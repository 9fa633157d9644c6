//! Fake switch for behavioural tests.
//!
//! Listens on an ephemeral TCP port, greets each client, records every action
//! it receives and answers from a small built-in script. Tests can push
//! unsolicited blocks, silence the script or drop the connection.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};

use crate::manager::challenge_key;

pub(in crate::tests) const GREETING: &str = "Asterisk Call Manager/5.0.1";
pub(in crate::tests) const USERNAME: &str = "admin";
pub(in crate::tests) const SECRET: &str = "secret";
pub(in crate::tests) const CHALLENGE: &str = "1234567890";

const POLL: Duration = Duration::from_millis(10);

/// One action as received, headers in wire order.
#[derive(Debug, Clone, Default)]
pub(in crate::tests) struct RecordedAction {
    pub headers: Vec<(String, String)>,
}

impl RecordedAction {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn name(&self) -> &str {
        self.get("Action").unwrap_or_default()
    }

    pub fn action_id(&self) -> &str {
        self.get("ActionID").unwrap_or_default()
    }
}

/// Knobs the tests flip while the switch runs.
#[derive(Default)]
struct Controls {
    stop: AtomicBool,
    hang_up: AtomicBool,
    silent: AtomicBool,
    channels: AtomicUsize,
}

/// A scripted manager endpoint serving one client at a time.
pub(in crate::tests) struct FakeSwitch {
    port: u16,
    actions: Arc<Mutex<Vec<RecordedAction>>>,
    controls: Arc<Controls>,
    outbox: Sender<Vec<u8>>,
    handle: Option<thread::JoinHandle<Result<()>>>,
}

impl FakeSwitch {
    /// Binds to an ephemeral port and starts serving.
    pub fn spawn() -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).context("bind fake switch")?;
        listener
            .set_nonblocking(true)
            .context("fake switch nonblocking")?;
        let port = listener.local_addr().context("local addr")?.port();
        let actions = Arc::new(Mutex::new(Vec::new()));
        let controls = Arc::new(Controls::default());
        let (outbox, pushes) = mpsc::channel();
        let server = Server {
            actions: Arc::clone(&actions),
            controls: Arc::clone(&controls),
            pushes,
        };
        let handle = thread::spawn(move || server.run(&listener));
        Ok(Self {
            port,
            actions,
            controls,
            outbox,
            handle: Some(handle),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Sends an unsolicited block, given as lines without terminators.
    pub fn push(&self, lines: &[&str]) -> Result<()> {
        let mut bytes = Vec::new();
        for line in lines {
            bytes.extend_from_slice(line.as_bytes());
            bytes.extend_from_slice(b"\r\n");
        }
        bytes.extend_from_slice(b"\r\n");
        self.outbox
            .send(bytes)
            .map_err(|_| anyhow!("fake switch stopped"))
    }

    /// Number of members returned for `CoreShowChannels`.
    pub fn set_channels(&self, count: usize) {
        self.controls.channels.store(count, Ordering::SeqCst);
    }

    /// Stops answering any action.
    pub fn go_silent(&self) {
        self.controls.silent.store(true, Ordering::SeqCst);
    }

    /// Drops the current client connection.
    pub fn hang_up(&self) {
        self.controls.hang_up.store(true, Ordering::SeqCst);
    }

    pub fn actions(&self) -> Vec<RecordedAction> {
        self.actions
            .lock()
            .map(|actions| actions.clone())
            .unwrap_or_default()
    }

    /// Actions received with the given name.
    pub fn actions_named(&self, name: &str) -> Vec<RecordedAction> {
        self.actions()
            .into_iter()
            .filter(|action| action.name().eq_ignore_ascii_case(name))
            .collect()
    }

    /// Stops the server thread and surfaces its error, if any.
    pub fn shutdown(&mut self) -> Result<()> {
        self.controls.stop.store(true, Ordering::SeqCst);
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| anyhow!("fake switch thread panicked"))?,
            None => Ok(()),
        }
    }
}

impl Drop for FakeSwitch {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

struct Server {
    actions: Arc<Mutex<Vec<RecordedAction>>>,
    controls: Arc<Controls>,
    pushes: Receiver<Vec<u8>>,
}

impl Server {
    fn run(&self, listener: &TcpListener) -> Result<()> {
        while !self.controls.stop.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, _)) => self.serve(stream)?,
                Err(ref error) if error.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(POLL);
                }
                Err(error) => return Err(error).context("accept connection"),
            }
        }
        Ok(())
    }

    fn serve(&self, stream: TcpStream) -> Result<()> {
        stream
            .set_nonblocking(false)
            .context("client blocking mode")?;
        stream
            .set_read_timeout(Some(POLL))
            .context("client read timeout")?;
        let writer = Arc::new(Mutex::new(stream.try_clone().context("clone stream")?));
        write_to(&writer, format!("{GREETING}\r\n").as_bytes())?;
        self.controls.hang_up.store(false, Ordering::SeqCst);

        let mut reader = stream;
        let mut buffer = Vec::new();
        let mut chunk = [0_u8; 1024];
        loop {
            if self.controls.stop.load(Ordering::SeqCst)
                || self.controls.hang_up.swap(false, Ordering::SeqCst)
            {
                let _ = reader.shutdown(Shutdown::Both);
                return Ok(());
            }
            while let Ok(bytes) = self.pushes.try_recv() {
                write_to(&writer, &bytes)?;
            }
            match reader.read(&mut chunk) {
                Ok(0) => return Ok(()),
                Ok(count) => buffer.extend_from_slice(&chunk[..count]),
                Err(ref error)
                    if matches!(
                        error.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) => {}
                Err(ref error)
                    if matches!(
                        error.kind(),
                        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
                    ) =>
                {
                    return Ok(());
                }
                Err(error) => return Err(error).context("read action"),
            }
            while let Some(action) = take_action(&mut buffer) {
                self.record(&action)?;
                if !self.controls.silent.load(Ordering::SeqCst) {
                    self.answer(&action, &writer)?;
                }
            }
        }
    }

    fn record(&self, action: &RecordedAction) -> Result<()> {
        self.actions
            .lock()
            .map_err(|error| anyhow!("lock actions: {error}"))?
            .push(action.clone());
        Ok(())
    }

    fn answer(&self, action: &RecordedAction, writer: &Arc<Mutex<TcpStream>>) -> Result<()> {
        let id = action.action_id();
        let reply = match action.name() {
            "Login" => login_reply(action),
            "Challenge" => block(&[
                "Response: Success",
                &format!("ActionID: {id}"),
                &format!("Challenge: {CHALLENGE}"),
            ]),
            "Ping" => block(&[
                "Response: Success",
                &format!("ActionID: {id}"),
                "Ping: Pong",
                "Timestamp: 1700000000.000000",
            ]),
            "CoreShowChannels" => self.channel_list(id),
            "Command" => format!(
                "Response: Follows\r\nActionID: {id}\r\nPrivilege: Command\r\n\
                 Channel              Location\n1 active channel\n--END COMMAND--\r\n\r\n"
            ),
            "Slow" => {
                let delay = action
                    .get("Delay")
                    .and_then(|value| value.parse().ok())
                    .unwrap_or(200);
                let reply = block(&["Response: Success", &format!("ActionID: {id}")]);
                let writer = Arc::clone(writer);
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(delay));
                    let _ = write_to(&writer, reply.as_bytes());
                });
                return Ok(());
            }
            "Hold" => return Ok(()),
            _ => block(&[
                "Response: Error",
                &format!("ActionID: {id}"),
                "Message: Invalid/unknown command",
            ]),
        };
        write_to(writer, reply.as_bytes())
    }

    fn channel_list(&self, id: &str) -> String {
        let count = self.controls.channels.load(Ordering::SeqCst);
        let mut reply = block(&[
            "Response: Success",
            &format!("ActionID: {id}"),
            "EventList: start",
            "Message: Channels will follow",
        ]);
        for index in 0..count {
            reply.push_str(&block(&[
                "Event: CoreShowChannel",
                &format!("ActionID: {id}"),
                &format!("Channel: SIP/10{index}-0000000{index}"),
                "ChannelState: 6",
            ]));
        }
        reply.push_str(&block(&[
            "Event: CoreShowChannelsComplete",
            &format!("ActionID: {id}"),
            "EventList: Complete",
            &format!("ListItems: {count}"),
        ]));
        reply
    }
}

fn login_reply(action: &RecordedAction) -> String {
    let id = action.action_id();
    let accepted = action.get("Username") == Some(USERNAME)
        && match action.get("Key") {
            Some(key) => key == challenge_key(CHALLENGE, SECRET),
            None => action.get("Secret") == Some(SECRET),
        };
    if accepted {
        block(&[
            "Response: Success",
            &format!("ActionID: {id}"),
            "Message: Authentication accepted",
        ])
    } else {
        block(&[
            "Response: Error",
            &format!("ActionID: {id}"),
            "Message: Authentication failed",
        ])
    }
}

fn block(lines: &[&str]) -> String {
    let mut text = lines.join("\r\n");
    text.push_str("\r\n\r\n");
    text
}

fn write_to(writer: &Arc<Mutex<TcpStream>>, bytes: &[u8]) -> Result<()> {
    let mut stream = writer
        .lock()
        .map_err(|error| anyhow!("lock writer: {error}"))?;
    match stream.write_all(bytes).and_then(|()| stream.flush()) {
        Ok(()) => Ok(()),
        Err(error) if is_disconnect(&error) => Ok(()),
        Err(error) => Err(error).context("write reply"),
    }
}

fn is_disconnect(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::NotConnected
    )
}

/// Pops one blank-line terminated action from `buffer`.
fn take_action(buffer: &mut Vec<u8>) -> Option<RecordedAction> {
    let end = buffer.windows(4).position(|window| window == b"\r\n\r\n")?;
    let bytes: Vec<u8> = buffer.drain(..end + 4).collect();
    let text = String::from_utf8_lossy(&bytes[..end]);
    let headers = text
        .split("\r\n")
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_owned(), value.trim().to_owned()))
        .collect();
    Some(RecordedAction { headers })
}

/// Polls `condition` until it holds or `timeout` passes.
pub(in crate::tests) fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(POLL);
    }
    condition()
}
