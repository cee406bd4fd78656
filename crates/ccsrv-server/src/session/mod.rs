//! Control-channel session interface.
//!
//! The server never speaks the bus protocol itself. It opens a session
//! through a [`SessionOpener`], polls the session's descriptor together
//! with the module's own descriptors, and asks the session to deliver one
//! message whenever that descriptor turns readable. The reference
//! implementation, [`SocketSession`], speaks the framed JSON protocol of
//! `ccsrv-protocol` over a Unix socket.

mod socket;

pub use socket::{SocketSession, SocketSessionOpener};

use std::io;
use std::os::unix::io::RawFd;
use std::path::PathBuf;

use thiserror::Error;

use ccsrv_protocol::{FrameError, VersionError};

use crate::config::ModuleLocator;
use crate::dispatch::BusHandler;

/// A module's connection to the control-channel bus.
pub trait ControlSession {
    /// Descriptor that becomes readable when a message is pending.
    fn descriptor(&self) -> RawFd;

    /// Delivers at most one pending message to `handler` and sends the
    /// handler's answer back to the bus.
    ///
    /// With `blocking` unset, returns `Ok(false)` immediately when nothing
    /// is pending. Returns `Ok(true)` when a message was delivered. Errors
    /// are failures the session could not absorb; the server treats them
    /// as fatal.
    fn check_command(
        &mut self,
        blocking: bool,
        handler: &mut dyn BusHandler,
    ) -> Result<bool, SessionError>;

    /// Tells the bus the module is stopping.
    fn notify_stopping(&mut self) -> Result<(), SessionError>;

    /// Releases the connection.
    fn close(&mut self) -> Result<(), SessionError>;
}

/// Opens the session for a module during server start-up.
pub trait SessionOpener {
    fn open(&mut self, locator: &ModuleLocator) -> Result<Box<dyn ControlSession>, SessionError>;
}

impl<F> SessionOpener for F
where
    F: FnMut(&ModuleLocator) -> Result<Box<dyn ControlSession>, SessionError>,
{
    fn open(&mut self, locator: &ModuleLocator) -> Result<Box<dyn ControlSession>, SessionError> {
        self(locator)
    }
}

/// Errors that can occur in session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to connect to bus at {}: {source}", .path.display())]
    Connect { path: PathBuf, source: io::Error },

    #[error("Bus connection closed")]
    Closed,

    #[error("Bus protocol error: {0}")]
    Frame(#[from] FrameError),

    #[error("Protocol version mismatch: {0}")]
    Version(#[from] VersionError),

    #[error("Expected {expected} from bus, got {got}")]
    Unexpected {
        expected: &'static str,
        got: &'static str,
    },

    #[error("Bus I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Bus session failure: {0}")]
    Other(String),
}
