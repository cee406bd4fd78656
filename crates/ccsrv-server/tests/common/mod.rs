//! Shared helpers for server integration tests.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::time::Duration;

use ccsrv_server::{
    Answer, BusHandler, ControlSession, FatalError, Module, ModuleLocator, PollSet, Poller,
    ServerContext, SessionError, SessionOpener, ShutdownHandle, SystemPoller,
};
use serde_json::Value;

// ============================================================================
// Constants
// ============================================================================

/// Upper bound on a single poll so a broken test fails instead of hanging
pub const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Polls allowed before a test server is considered stuck
pub const MAX_POLLS: usize = 16;

// ============================================================================
// Event Log
// ============================================================================

/// Ordered record of what modules, callbacks and sessions did.
pub type EventLog = Rc<RefCell<Vec<String>>>;

pub fn event_log() -> EventLog {
    Rc::default()
}

pub fn push(log: &EventLog, event: impl Into<String>) {
    log.borrow_mut().push(event.into());
}

pub fn events(log: &EventLog) -> Vec<String> {
    log.borrow().clone()
}

// ============================================================================
// Scripted Session
// ============================================================================

/// A message the scripted bus delivers.
#[derive(Debug, Clone)]
pub enum Scripted {
    Command(&'static str, Option<Value>),
    Config(Value),
}

/// In-process stand-in for a bus session.
///
/// Its descriptor is one end of a socket pair with one byte queued per
/// scripted message, so it polls readable exactly while messages remain.
pub struct ScriptedSession {
    ours: UnixStream,
    _theirs: UnixStream,
    script: VecDeque<Scripted>,
    answers: Rc<RefCell<Vec<Answer>>>,
    events: EventLog,
    watched: Option<ShutdownHandle>,
}

impl ScriptedSession {
    pub fn new(script: Vec<Scripted>, events: EventLog) -> Self {
        let (ours, mut theirs) = UnixStream::pair().expect("socket pair");
        theirs
            .write_all(&vec![0u8; script.len()])
            .expect("queue script bytes");

        Self {
            ours,
            _theirs: theirs,
            script: script.into(),
            answers: Rc::default(),
            events,
            watched: None,
        }
    }

    /// Records the shutdown flag after every delivered message.
    pub fn with_shutdown_watch(mut self, handle: ShutdownHandle) -> Self {
        self.watched = Some(handle);
        self
    }

    /// Answers returned by the handler, in delivery order.
    pub fn answers(&self) -> Rc<RefCell<Vec<Answer>>> {
        Rc::clone(&self.answers)
    }
}

impl ControlSession for ScriptedSession {
    fn descriptor(&self) -> RawFd {
        self.ours.as_raw_fd()
    }

    fn check_command(
        &mut self,
        blocking: bool,
        handler: &mut dyn BusHandler,
    ) -> Result<bool, SessionError> {
        if !blocking && self.script.is_empty() {
            return Ok(false);
        }

        let mut byte = [0u8; 1];
        self.ours.read_exact(&mut byte)?;
        let message = self.script.pop_front().ok_or(SessionError::Closed)?;

        let answer = match message {
            Scripted::Command(name, args) => {
                push(&self.events, format!("command:{name}"));
                handler.handle_command(name, args.as_ref())
            }
            Scripted::Config(config) => {
                push(&self.events, "config");
                handler.handle_config(&config)
            }
        };

        if let Some(handle) = &self.watched {
            push(&self.events, format!("shutdown:{}", handle.is_triggered()));
        }
        self.answers.borrow_mut().push(answer);
        Ok(true)
    }

    fn notify_stopping(&mut self) -> Result<(), SessionError> {
        push(&self.events, "stopping");
        Ok(())
    }

    fn close(&mut self) -> Result<(), SessionError> {
        push(&self.events, "closed");
        Ok(())
    }
}

/// Opener handing out `session` once.
pub fn opener(session: ScriptedSession) -> impl SessionOpener {
    let mut session = Some(session);
    move |_locator: &ModuleLocator| -> Result<Box<dyn ControlSession>, SessionError> {
        let session = session
            .take()
            .ok_or_else(|| SessionError::Other("session opened twice".to_string()))?;
        Ok(Box::new(session))
    }
}

/// Opener that fails like an unreachable bus.
pub fn unreachable_bus(events: EventLog) -> impl SessionOpener {
    move |locator: &ModuleLocator| -> Result<Box<dyn ControlSession>, SessionError> {
        push(&events, "open");
        Err(SessionError::Connect {
            path: locator.socket_path.clone(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        })
    }
}

// ============================================================================
// Pollers
// ============================================================================

/// Real poller with a cap on the number of polls.
///
/// Past the cap it fails, which the server turns into exit status 1.
pub struct LimitedPoller {
    inner: SystemPoller,
    remaining: usize,
    polls: Rc<Cell<usize>>,
}

impl LimitedPoller {
    pub fn new() -> Self {
        Self {
            inner: SystemPoller::with_timeout(POLL_TIMEOUT),
            remaining: MAX_POLLS,
            polls: Rc::default(),
        }
    }

    /// Shared counter of polls performed.
    pub fn counter(&self) -> Rc<Cell<usize>> {
        Rc::clone(&self.polls)
    }
}

impl Poller for LimitedPoller {
    fn poll(&mut self, interest: &PollSet) -> io::Result<PollSet> {
        if self.remaining == 0 {
            return Err(io::Error::other("poll limit reached"));
        }
        self.remaining -= 1;
        self.polls.set(self.polls.get() + 1);

        let ready = self.inner.poll(interest)?;
        if ready.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "nothing became ready"));
        }
        Ok(ready)
    }
}

/// Poller replaying canned results, then deferring to a real poll.
pub struct ScriptedPoller {
    results: VecDeque<io::Result<PollSet>>,
    fallback: LimitedPoller,
}

impl ScriptedPoller {
    pub fn new(results: Vec<io::Result<PollSet>>) -> Self {
        Self {
            results: results.into(),
            fallback: LimitedPoller::new(),
        }
    }

    pub fn counter(&self) -> Rc<Cell<usize>> {
        self.fallback.counter()
    }
}

impl Poller for ScriptedPoller {
    fn poll(&mut self, interest: &PollSet) -> io::Result<PollSet> {
        match self.results.pop_front() {
            Some(result) => {
                let polls = self.fallback.counter();
                polls.set(polls.get() + 1);
                result
            }
            None => self.fallback.poll(interest),
        }
    }
}

// ============================================================================
// Modules
// ============================================================================

/// Where a [`Recorder`] should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Failure {
    #[default]
    Never,
    Setup,
    SetupFatal,
    Teardown,
    PanicOnCommand,
}

/// Module recording every hook into an [`EventLog`].
///
/// Accepts object configs, rejects everything else, and answers commands
/// other than `ping` with a failure.
pub struct Recorder {
    pub events: EventLog,
    pub failure: Failure,
}

impl Recorder {
    pub fn new(events: EventLog) -> Self {
        Self {
            events,
            failure: Failure::Never,
        }
    }

    pub fn failing(events: EventLog, failure: Failure) -> Self {
        Self { events, failure }
    }
}

impl Module for Recorder {
    fn config_handler(&mut self, config: &Value) -> Answer {
        if config.is_object() {
            Answer::success()
        } else {
            Answer::failure(1, "configuration must be an object")
        }
    }

    fn command_handler(&mut self, command: &str, _args: Option<&Value>) -> Answer {
        if self.failure == Failure::PanicOnCommand {
            panic!("command handler exploded");
        }
        match command {
            "ping" => Answer::success_with(Value::from("pong")),
            other => Answer::failure(1, format!("unrecognized command: {other}")),
        }
    }

    fn setup(&mut self, _ctx: &ServerContext) -> anyhow::Result<()> {
        push(&self.events, "setup");
        match self.failure {
            Failure::Setup => anyhow::bail!("cannot bind listener"),
            Failure::SetupFatal => Err(FatalError::new("no zones configured").into()),
            _ => Ok(()),
        }
    }

    fn teardown(&mut self, _ctx: &ServerContext) -> anyhow::Result<()> {
        push(&self.events, "teardown");
        if self.failure == Failure::Teardown {
            anyhow::bail!("flush failed");
        }
        Ok(())
    }
}

// ============================================================================
// Pipes
// ============================================================================

/// Creates a pipe, returning (read end, write end).
pub fn pipe() -> (File, File) {
    let mut fds = [0 as RawFd; 2];
    // SAFETY: `fds` has room for the two descriptors pipe(2) writes.
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    assert_eq!(rc, 0, "pipe failed: {}", io::Error::last_os_error());

    // SAFETY: both descriptors were just created and are owned by nobody else.
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    (File::from(read), File::from(write))
}
