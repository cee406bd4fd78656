//! Server lifecycle: start-up, event loop and tear-down.
//!
//! ```text
//! INIT ──▶ RUNNING ──▶ STOPPING ──▶ STOPPED (exit 0)
//!   │         │            │
//!   └─────────┴────────────┴──────▶ FATAL   (exit 1)
//! ```
//!
//! - INIT: bind SIGTERM/SIGINT, open the control session, module setup
//! - RUNNING: poll module descriptors plus the session descriptor,
//!   run ready callbacks, deliver one bus message when the session is
//!   readable, repeat until shutdown is requested
//! - STOPPING: module teardown, stopping notification, session close
//!
//! [`Server::run`] never returns an error or unwinds: every failure is
//! logged and turned into exit status 1.

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};

use thiserror::Error;
use tracing::{debug, error, info};

use ccsrv_core::{CoreError, ModuleName};

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::module::{FatalError, Module, ServerContext};
use crate::mux::{CallbackError, Poller, SystemPoller, Watcher};
use crate::session::{ControlSession, SessionError, SessionOpener, SocketSessionOpener};
use crate::shutdown::{Shutdown, ShutdownHandle};

/// Exit status of a clean run.
pub const EXIT_SUCCESS: i32 = 0;

/// Exit status of a run that hit a fatal condition.
pub const EXIT_FAILURE: i32 = 1;

/// Long-running module server.
///
/// Owns the module, the descriptor registration table, the shutdown flag
/// and, while running, the control session.
pub struct Server<M: Module> {
    module: M,
    config: ServerConfig,
    watcher: Watcher,
    shutdown: Shutdown,
    poller: Box<dyn Poller>,
    opener: Box<dyn SessionOpener>,
    module_name: Option<ModuleName>,
}

impl<M: Module> Server<M> {
    /// Creates a server using `poll(2)` and the socket session.
    pub fn new(module: M, config: ServerConfig) -> Self {
        Self {
            module,
            config,
            watcher: Watcher::new(),
            shutdown: Shutdown::new(),
            poller: Box::new(SystemPoller::new()),
            opener: Box::new(SocketSessionOpener),
            module_name: None,
        }
    }

    /// Replaces the readiness poll primitive.
    pub fn with_poller(mut self, poller: impl Poller + 'static) -> Self {
        self.poller = Box::new(poller);
        self
    }

    /// Replaces how the control session is opened.
    pub fn with_session_opener(mut self, opener: impl SessionOpener + 'static) -> Self {
        self.opener = Box::new(opener);
        self
    }

    pub fn module(&self) -> &M {
        &self.module
    }

    /// Name given to [`Server::run`], once it has been validated.
    pub fn module_name(&self) -> Option<&ModuleName> {
        self.module_name.as_ref()
    }

    /// Descriptor registration table.
    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.handle()
    }

    /// Requests shutdown; the loop exits before its next poll.
    pub fn trigger_shutdown(&self) {
        self.shutdown.trigger();
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.is_requested()
    }

    /// Runs the server until it is told to stop.
    ///
    /// Returns [`EXIT_SUCCESS`] after a clean shutdown and
    /// [`EXIT_FAILURE`] after any fatal condition, including a panic in
    /// module code.
    ///
    /// `module_name` must be a valid [`ModuleName`]: non-empty, at most 64
    /// bytes of ASCII letters, digits, `-` and `_`. The name becomes part
    /// of the spec file path handed to the bus, so anything else (a `.`
    /// or `/` for instance) is rejected as fatal before signals are bound
    /// or the bus is contacted.
    pub fn run(&mut self, module_name: &str) -> i32 {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run_phases(module_name)));
        self.shutdown.unbind_signals();

        match outcome {
            Ok(Ok(())) => {
                info!(module = module_name, "Server stopped");
                EXIT_SUCCESS
            }
            Ok(Err(e)) if e.is_fatal_request() => {
                error!(module = module_name, error = %e, "Server fatal error");
                EXIT_FAILURE
            }
            Ok(Err(e)) => {
                error!(
                    module = module_name,
                    error_type = e.kind(),
                    error = %e,
                    "Uncaught error"
                );
                EXIT_FAILURE
            }
            Err(payload) => {
                error!(
                    module = module_name,
                    panic = panic_message(&*payload),
                    "Server panicked"
                );
                EXIT_FAILURE
            }
        }
    }

    fn run_phases(&mut self, module_name: &str) -> Result<(), ServerError> {
        let module_name = ModuleName::new(module_name)?;
        self.module_name = Some(module_name.clone());

        // INIT
        self.shutdown.bind_signals().map_err(ServerError::Signals)?;
        let locator = self.config.locator_for(&module_name);
        let mut session = self.opener.open(&locator)?;

        let ctx = ServerContext::new(
            module_name.clone(),
            self.watcher.clone(),
            self.shutdown.handle(),
        );
        self.module.setup(&ctx).map_err(ServerError::Setup)?;

        // RUNNING
        self.event_loop(&module_name, session.as_mut())?;

        // STOPPING
        self.module.teardown(&ctx).map_err(ServerError::Teardown)?;
        session.notify_stopping()?;
        session.close()?;
        Ok(())
    }

    fn event_loop(
        &mut self,
        module_name: &ModuleName,
        session: &mut dyn ControlSession,
    ) -> Result<(), ServerError> {
        let bus_fd = session.descriptor();
        let wakeup_fd = self.shutdown.wakeup_fd();
        let shutdown = self.shutdown.handle();

        info!(module = %module_name, bus_fd, "Server started");

        while !shutdown.is_triggered() {
            let mut interest = self.watcher.interest();
            interest.add_read(bus_fd);
            if let Some(fd) = wakeup_fd {
                interest.add_read(fd);
            }

            let ready = match self.poller.poll(&interest) {
                Ok(ready) => ready,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    debug!(module = %module_name, "Poll interrupted by signal, retrying");
                    continue;
                }
                Err(e) => return Err(ServerError::Poll(e)),
            };

            if let Some(fd) = wakeup_fd.filter(|fd| ready.is_readable(*fd)) {
                debug!(module = %module_name, fd, "Woken by termination signal");
                self.shutdown.drain_wakeup().map_err(ServerError::Signals)?;
                continue;
            }

            self.watcher.dispatch(&ready)?;

            if ready.is_readable(bus_fd) {
                let mut dispatcher = Dispatcher::new(&mut self.module, &shutdown, module_name);
                session.check_command(true, &mut dispatcher)?;
            }
        }

        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Fatal conditions that end [`Server::run`] with exit status 1.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{0}")]
    InvalidModuleName(#[from] CoreError),

    #[error("Termination signal handling failed: {0}")]
    Signals(#[source] io::Error),

    #[error("Control session failed: {0}")]
    Session(#[from] SessionError),

    #[error("Module setup failed: {0:#}")]
    Setup(anyhow::Error),

    #[error("Module teardown failed: {0:#}")]
    Teardown(anyhow::Error),

    #[error("Readiness poll failed: {0}")]
    Poll(#[source] io::Error),

    #[error(transparent)]
    Callback(#[from] CallbackError),
}

impl ServerError {
    /// Short name of the failing stage, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerError::InvalidModuleName(_) => "module_name",
            ServerError::Signals(_) => "signals",
            ServerError::Session(_) => "session",
            ServerError::Setup(_) => "setup",
            ServerError::Teardown(_) => "teardown",
            ServerError::Poll(_) => "poll",
            ServerError::Callback(_) => "callback",
        }
    }

    /// True if module code explicitly raised a [`FatalError`].
    pub fn is_fatal_request(&self) -> bool {
        let source = match self {
            ServerError::Setup(e) | ServerError::Teardown(e) => e,
            ServerError::Callback(e) => &e.source,
            _ => return false,
        };
        source.downcast_ref::<FatalError>().is_some()
    }
}
