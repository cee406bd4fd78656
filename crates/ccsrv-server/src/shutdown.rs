//! Shutdown flag and termination signal binding.
//!
//! The server runs until its shutdown flag is set. Two paths set it: the
//! `shutdown` bus command (through [`ShutdownHandle::trigger`]) and
//! delivery of SIGTERM or SIGINT. In signal context, `signal-hook` only
//! stores into the flag and then writes one byte to a non-blocking wakeup
//! socket. The server polls the other end of that socket, so a signal
//! that lands just before the poll starts still wakes it. Everything that
//! follows a shutdown request runs later, in the loop's ordinary control
//! flow.
//!
//! The flag only ever goes from `false` to `true`.

use std::io::{self, Read};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::SigId;
use tracing::debug;

/// Signals bound to the shutdown flag while the server runs.
pub const TERMINATION_SIGNALS: [libc::c_int; 2] = [SIGTERM, SIGINT];

/// Cheap-to-clone handle that can request shutdown.
///
/// Modules receive one through their `ServerContext` and may keep it to
/// stop the server on their own.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Requests shutdown. Idempotent.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns true once shutdown has been requested.
    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Owner of the shutdown flag and of the signal registrations feeding it.
#[derive(Debug, Default)]
pub struct Shutdown {
    handle: ShutdownHandle,
    signals: Vec<SigId>,
    wakeup: Option<UnixStream>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new handle sharing this flag.
    pub fn handle(&self) -> ShutdownHandle {
        self.handle.clone()
    }

    /// Requests shutdown. Idempotent.
    pub fn trigger(&self) {
        self.handle.trigger();
    }

    pub fn is_requested(&self) -> bool {
        self.handle.is_triggered()
    }

    /// Binds SIGTERM and SIGINT to the flag and the wakeup socket.
    ///
    /// Calling it again while bound is a no-op. On failure, signals bound
    /// so far are released again.
    pub fn bind_signals(&mut self) -> io::Result<()> {
        if !self.signals.is_empty() {
            return Ok(());
        }

        if let Err(e) = self.register_all() {
            self.unbind_signals();
            return Err(e);
        }

        debug!(signals = ?TERMINATION_SIGNALS, "Termination signals bound");
        Ok(())
    }

    fn register_all(&mut self) -> io::Result<()> {
        let (reader, writer) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;

        for signal in TERMINATION_SIGNALS {
            // Flag first: once the byte is readable the flag is already set.
            let id = signal_hook::flag::register(signal, Arc::clone(&self.handle.flag))?;
            self.signals.push(id);

            let id = signal_hook::low_level::pipe::register(signal, writer.try_clone()?)?;
            self.signals.push(id);
        }

        self.wakeup = Some(reader);
        Ok(())
    }

    /// Removes the signal registrations made by [`Shutdown::bind_signals`].
    pub fn unbind_signals(&mut self) {
        if self.signals.is_empty() {
            return;
        }

        for id in self.signals.drain(..) {
            signal_hook::low_level::unregister(id);
        }
        self.wakeup = None;
        debug!("Termination signals unbound");
    }

    /// Descriptor that turns readable when a termination signal arrives.
    ///
    /// Only present while signals are bound.
    pub fn wakeup_fd(&self) -> Option<RawFd> {
        self.wakeup.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Discards pending wakeup bytes.
    pub fn drain_wakeup(&self) -> io::Result<()> {
        let Some(mut wakeup) = self.wakeup.as_ref() else {
            return Ok(());
        };

        let mut buf = [0u8; 64];
        loop {
            match wakeup.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    pub fn signals_bound(&self) -> bool {
        !self.signals.is_empty()
    }
}

impl Drop for Shutdown {
    fn drop(&mut self) {
        self.unbind_signals();
    }
}
