//! Reference session over a Unix stream socket.

use std::io;
use std::net::Shutdown as NetShutdown;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use tracing::{debug, info};

use ccsrv_core::ModuleName;
use ccsrv_protocol::{read_frame, write_frame, BusMessage, ModuleMessage, ProtocolVersion};

use super::{ControlSession, SessionError};
use crate::config::ModuleLocator;
use crate::dispatch::BusHandler;
use crate::mux::{PollSet, Poller, SystemPoller};

/// Session speaking framed JSON over a connected Unix socket.
///
/// Frames are read exactly, never ahead, so the socket stays readable for
/// as long as a message is pending and one readiness event always maps to
/// one delivered message.
#[derive(Debug)]
pub struct SocketSession {
    stream: UnixStream,
    module: ModuleName,
    closed: bool,
}

impl SocketSession {
    /// Connects to the bus socket of `locator` and introduces the module.
    pub fn connect(locator: &ModuleLocator) -> Result<Self, SessionError> {
        let stream =
            UnixStream::connect(&locator.socket_path).map_err(|source| SessionError::Connect {
                path: locator.socket_path.clone(),
                source,
            })?;
        Self::from_stream(stream, locator)
    }

    /// Wraps an already connected stream and introduces the module.
    pub fn from_stream(stream: UnixStream, locator: &ModuleLocator) -> Result<Self, SessionError> {
        let mut session = Self {
            stream,
            module: locator.module.clone(),
            closed: false,
        };

        session.send(&ModuleMessage::hello(
            locator.module.clone(),
            locator.spec_file.clone(),
        ))?;
        let bus_version = session.await_welcome()?;

        info!(
            module = %locator.module,
            socket = %locator.socket_path.display(),
            protocol = %bus_version,
            "Control session opened"
        );
        Ok(session)
    }

    /// Reads the bus reply to `hello` and checks its protocol version.
    fn await_welcome(&mut self) -> Result<ProtocolVersion, SessionError> {
        let reply: BusMessage = read_frame(&mut self.stream)?.ok_or(SessionError::Closed)?;
        match reply {
            BusMessage::Welcome { protocol_version } => {
                protocol_version.ensure_compatible()?;
                Ok(protocol_version)
            }
            other => Err(SessionError::Unexpected {
                expected: "welcome",
                got: message_kind(&other),
            }),
        }
    }

    fn send(&mut self, message: &ModuleMessage) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        write_frame(&mut self.stream, message)?;
        Ok(())
    }

    /// Whether a frame can be read without blocking.
    fn has_pending(&self) -> io::Result<bool> {
        let mut poller = SystemPoller::with_timeout(Duration::ZERO);
        match poller.poll(&PollSet::readable(self.descriptor())) {
            Ok(ready) => Ok(ready.is_readable(self.descriptor())),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl ControlSession for SocketSession {
    fn descriptor(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    fn check_command(
        &mut self,
        blocking: bool,
        handler: &mut dyn BusHandler,
    ) -> Result<bool, SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        if !blocking && !self.has_pending()? {
            return Ok(false);
        }

        let message: BusMessage = read_frame(&mut self.stream)?.ok_or(SessionError::Closed)?;
        let seq = message.seq();

        let answer = match message {
            BusMessage::Config { config, .. } => handler.handle_config(&config),
            BusMessage::Command { command, args, .. } => {
                handler.handle_command(&command, args.as_ref())
            }
            other @ BusMessage::Welcome { .. } => {
                return Err(SessionError::Unexpected {
                    expected: "config or command",
                    got: message_kind(&other),
                })
            }
        };

        self.send(&ModuleMessage::answer(seq, answer))?;
        Ok(true)
    }

    fn notify_stopping(&mut self) -> Result<(), SessionError> {
        self.send(&ModuleMessage::stopping(self.module.clone()))?;
        debug!(module = %self.module, "Sent stopping notification");
        Ok(())
    }

    fn close(&mut self) -> Result<(), SessionError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        match self.stream.shutdown(NetShutdown::Both) {
            Ok(()) => {}
            // The bus already went away.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
            Err(e) => return Err(e.into()),
        }

        info!(module = %self.module, "Control session closed");
        Ok(())
    }
}

fn message_kind(message: &BusMessage) -> &'static str {
    match message {
        BusMessage::Welcome { .. } => "welcome",
        BusMessage::Config { .. } => "config",
        BusMessage::Command { .. } => "command",
    }
}

/// Opens a [`SocketSession`] for the locator's socket path.
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketSessionOpener;

impl super::SessionOpener for SocketSessionOpener {
    fn open(
        &mut self,
        locator: &ModuleLocator,
    ) -> Result<Box<dyn ControlSession>, SessionError> {
        Ok(Box::new(SocketSession::connect(locator)?))
    }
}
