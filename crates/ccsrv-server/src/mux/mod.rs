//! Readiness multiplexer: descriptor registration and callback dispatch.
//!
//! A [`Watcher`] keeps three tables (read, write, error), each mapping a
//! raw descriptor to the callbacks registered for it, in registration
//! order. The server asks it for the current [`PollSet`] interest before
//! every poll and hands the reported readiness back to
//! [`Watcher::dispatch`].
//!
//! Descriptors are never owned here; closing a descriptor while it is
//! still watched is a caller error.
//!
//! # Reentrancy
//!
//! `Watcher` is a cheap-to-clone handle. Callbacks may capture a clone
//! and call [`Watcher::watch`] or [`Watcher::unwatch`] while running,
//! including for their own descriptor. The callback list of a
//! descriptor/kind is captured just before it runs, so a removal made by
//! one of its callbacks takes effect from the next poll iteration.

mod poll;

pub use poll::{PollSet, Poller, SystemPoller};

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::os::unix::io::RawFd;
use std::rc::Rc;

use thiserror::Error;
use tracing::trace;

/// Result returned by watch callbacks. An error is fatal to the server.
pub type CallbackResult = anyhow::Result<()>;

type SharedCallback = Rc<RefCell<dyn FnMut() -> CallbackResult>>;

/// Readiness event kinds a descriptor can be watched for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Read,
    Write,
    Error,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [EventKind::Read, EventKind::Write, EventKind::Error];
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Read => f.write_str("read"),
            EventKind::Write => f.write_str("write"),
            EventKind::Error => f.write_str("error"),
        }
    }
}

/// Invalid operation on the registration table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchError {
    /// `unwatch` was asked to cancel a kind with no registration
    #[error("fd {fd} not watched for {kind}")]
    NotWatched { fd: RawFd, kind: EventKind },
}

/// A watch callback failed; fatal to the server.
#[derive(Debug, Error)]
#[error("{kind} callback for fd {fd} failed: {source:#}")]
pub struct CallbackError {
    pub fd: RawFd,
    pub kind: EventKind,
    pub source: anyhow::Error,
}

/// Callbacks to register for one descriptor, any subset of the kinds.
///
/// ```ignore
/// watcher.watch(fd, WatchCallbacks::new().on_read(|| Ok(())));
/// ```
#[derive(Default)]
pub struct WatchCallbacks {
    read: Option<SharedCallback>,
    write: Option<SharedCallback>,
    error: Option<SharedCallback>,
}

impl WatchCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_read<F>(mut self, callback: F) -> Self
    where
        F: FnMut() -> CallbackResult + 'static,
    {
        self.read = Some(Rc::new(RefCell::new(callback)));
        self
    }

    pub fn on_write<F>(mut self, callback: F) -> Self
    where
        F: FnMut() -> CallbackResult + 'static,
    {
        self.write = Some(Rc::new(RefCell::new(callback)));
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: FnMut() -> CallbackResult + 'static,
    {
        self.error = Some(Rc::new(RefCell::new(callback)));
        self
    }
}

impl fmt::Debug for WatchCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchCallbacks")
            .field("read", &self.read.is_some())
            .field("write", &self.write.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

#[derive(Default)]
struct WatchTable {
    read: BTreeMap<RawFd, Vec<SharedCallback>>,
    write: BTreeMap<RawFd, Vec<SharedCallback>>,
    error: BTreeMap<RawFd, Vec<SharedCallback>>,
}

impl WatchTable {
    fn kind(&self, kind: EventKind) -> &BTreeMap<RawFd, Vec<SharedCallback>> {
        match kind {
            EventKind::Read => &self.read,
            EventKind::Write => &self.write,
            EventKind::Error => &self.error,
        }
    }

    fn kind_mut(&mut self, kind: EventKind) -> &mut BTreeMap<RawFd, Vec<SharedCallback>> {
        match kind {
            EventKind::Read => &mut self.read,
            EventKind::Write => &mut self.write,
            EventKind::Error => &mut self.error,
        }
    }
}

/// Handle to the descriptor registration table.
#[derive(Clone, Default)]
pub struct Watcher {
    table: Rc<RefCell<WatchTable>>,
}

impl Watcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers callbacks for `fd`.
    ///
    /// Callbacks accumulate: earlier registrations for the same
    /// descriptor and kind are kept and run first.
    pub fn watch(&self, fd: RawFd, callbacks: WatchCallbacks) {
        let mut table = self.table.borrow_mut();
        let WatchCallbacks { read, write, error } = callbacks;

        for (kind, callback) in [
            (EventKind::Read, read),
            (EventKind::Write, write),
            (EventKind::Error, error),
        ] {
            if let Some(callback) = callback {
                table.kind_mut(kind).entry(fd).or_default().push(callback);
                trace!(fd, %kind, "Watching descriptor");
            }
        }
    }

    /// Shorthand for watching `fd` for readability only.
    pub fn watch_read<F>(&self, fd: RawFd, callback: F)
    where
        F: FnMut() -> CallbackResult + 'static,
    {
        self.watch(fd, WatchCallbacks::new().on_read(callback));
    }

    /// Shorthand for watching `fd` for writability only.
    pub fn watch_write<F>(&self, fd: RawFd, callback: F)
    where
        F: FnMut() -> CallbackResult + 'static,
    {
        self.watch(fd, WatchCallbacks::new().on_write(callback));
    }

    /// Shorthand for watching `fd` for exceptional conditions only.
    pub fn watch_error<F>(&self, fd: RawFd, callback: F)
    where
        F: FnMut() -> CallbackResult + 'static,
    {
        self.watch(fd, WatchCallbacks::new().on_error(callback));
    }

    /// Removes every callback registered for `fd` under each of `kinds`.
    ///
    /// # Errors
    ///
    /// `WatchError::NotWatched` if any requested kind has no registration
    /// for `fd`. The table is left untouched in that case.
    pub fn unwatch<I>(&self, fd: RawFd, kinds: I) -> Result<(), WatchError>
    where
        I: IntoIterator<Item = EventKind>,
    {
        let kinds: Vec<EventKind> = kinds.into_iter().collect();
        let mut table = self.table.borrow_mut();

        if let Some(kind) = kinds
            .iter()
            .copied()
            .find(|kind| !table.kind(*kind).contains_key(&fd))
        {
            return Err(WatchError::NotWatched { fd, kind });
        }

        for kind in kinds {
            table.kind_mut(kind).remove(&fd);
            trace!(fd, %kind, "Unwatched descriptor");
        }
        Ok(())
    }

    pub fn is_watched(&self, fd: RawFd, kind: EventKind) -> bool {
        self.table.borrow().kind(kind).contains_key(&fd)
    }

    /// Number of callbacks registered for `fd` under `kind`.
    pub fn callback_count(&self, fd: RawFd, kind: EventKind) -> usize {
        self.table
            .borrow()
            .kind(kind)
            .get(&fd)
            .map_or(0, Vec::len)
    }

    /// Current interest: every watched descriptor, per kind.
    pub fn interest(&self) -> PollSet {
        let table = self.table.borrow();
        PollSet {
            read: table.read.keys().copied().collect(),
            write: table.write.keys().copied().collect(),
            error: table.error.keys().copied().collect(),
        }
    }

    /// Runs the callbacks of every ready descriptor.
    ///
    /// Ready reads are handled first, then writes, then errors; within a
    /// kind descriptors are visited in the order given and each
    /// descriptor's callbacks run in registration order. Ready
    /// descriptors without registrations are skipped.
    ///
    /// Returns the number of callbacks invoked. Stops at the first failing
    /// callback.
    pub fn dispatch(&self, ready: &PollSet) -> Result<usize, CallbackError> {
        let mut invoked = 0;

        for (kind, fds) in [
            (EventKind::Read, &ready.read),
            (EventKind::Write, &ready.write),
            (EventKind::Error, &ready.error),
        ] {
            for &fd in fds {
                // Snapshot, then release the table so callbacks can edit it.
                let callbacks = match self.table.borrow().kind(kind).get(&fd) {
                    Some(callbacks) => callbacks.clone(),
                    None => continue,
                };

                for callback in callbacks {
                    let mut callback = callback.borrow_mut();
                    (&mut *callback)().map_err(|source| CallbackError { fd, kind, source })?;
                    invoked += 1;
                }
            }
        }

        Ok(invoked)
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("interest", &self.interest())
            .finish()
    }
}
