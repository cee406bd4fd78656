//! Readiness poll over read, write and error descriptor sets.

use std::collections::BTreeMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Descriptor sets, one per event kind.
///
/// Used both for the interest handed to a [`Poller`] and for the
/// readiness it reports back. Descriptors are kept in ascending order
/// and without duplicates so dispatch order is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSet {
    pub read: Vec<RawFd>,
    pub write: Vec<RawFd>,
    pub error: Vec<RawFd>,
}

impl PollSet {
    /// A set asking only for readability of `fd`.
    pub fn readable(fd: RawFd) -> Self {
        Self {
            read: vec![fd],
            ..Self::default()
        }
    }

    /// Adds `fd` to the read set, keeping it sorted and unique.
    pub fn add_read(&mut self, fd: RawFd) {
        insert_sorted(&mut self.read, fd);
    }

    pub fn add_write(&mut self, fd: RawFd) {
        insert_sorted(&mut self.write, fd);
    }

    pub fn add_error(&mut self, fd: RawFd) {
        insert_sorted(&mut self.error, fd);
    }

    pub fn is_readable(&self, fd: RawFd) -> bool {
        self.read.binary_search(&fd).is_ok()
    }

    pub fn is_empty(&self) -> bool {
        self.read.is_empty() && self.write.is_empty() && self.error.is_empty()
    }
}

fn insert_sorted(set: &mut Vec<RawFd>, fd: RawFd) {
    if let Err(pos) = set.binary_search(&fd) {
        set.insert(pos, fd);
    }
}

/// A blocking readiness-poll primitive.
///
/// Implementations block until at least one descriptor of `interest` is
/// ready. Interruption by signal delivery must be reported as an error of
/// kind [`io::ErrorKind::Interrupted`] so the caller can retry; any other
/// error is treated as fatal by the server.
pub trait Poller {
    fn poll(&mut self, interest: &PollSet) -> io::Result<PollSet>;
}

/// [`Poller`] backed by `poll(2)`.
///
/// The error set maps to `POLLPRI` (exceptional conditions), matching the
/// except set of `select(2)`. A descriptor reported invalid (`POLLNVAL`)
/// fails the whole poll with `EBADF`, as `select(2)` would.
///
/// `poll(2)` reports hang-ups and errors even when they were not asked
/// for. Such an event is credited to one of the descriptor's requested
/// kinds (error, then read, then write), so a poll that wakes up never
/// comes back with an empty set.
#[derive(Debug, Clone)]
pub struct SystemPoller {
    timeout_ms: libc::c_int,
}

impl SystemPoller {
    /// A poller that blocks without a timeout.
    pub fn new() -> Self {
        Self { timeout_ms: -1 }
    }

    /// A poller that gives up after `timeout` and reports nothing ready.
    pub fn with_timeout(timeout: Duration) -> Self {
        let timeout_ms = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);
        Self { timeout_ms }
    }
}

impl Default for SystemPoller {
    fn default() -> Self {
        Self::new()
    }
}

// Kernel masks used by select(2) on Linux.
const READ_MASK: libc::c_short = libc::POLLIN | libc::POLLHUP | libc::POLLERR;
const WRITE_MASK: libc::c_short = libc::POLLOUT | libc::POLLERR;
const ERROR_MASK: libc::c_short = libc::POLLPRI;

impl Poller for SystemPoller {
    fn poll(&mut self, interest: &PollSet) -> io::Result<PollSet> {
        let mut events: BTreeMap<RawFd, libc::c_short> = BTreeMap::new();
        for fd in &interest.read {
            *events.entry(*fd).or_default() |= libc::POLLIN;
        }
        for fd in &interest.write {
            *events.entry(*fd).or_default() |= libc::POLLOUT;
        }
        for fd in &interest.error {
            *events.entry(*fd).or_default() |= libc::POLLPRI;
        }

        let mut fds: Vec<libc::pollfd> = events
            .into_iter()
            .map(|(fd, events)| libc::pollfd {
                fd,
                events,
                revents: 0,
            })
            .collect();

        // SAFETY: `fds` is a valid, exclusively borrowed array of
        // `fds.len()` pollfd structs for the duration of the call.
        let rc = unsafe {
            libc::poll(
                fds.as_mut_ptr(),
                fds.len() as libc::nfds_t,
                self.timeout_ms,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut ready = PollSet::default();
        for pfd in fds.iter().filter(|pfd| pfd.revents != 0) {
            if pfd.revents & libc::POLLNVAL != 0 {
                return Err(io::Error::from_raw_os_error(libc::EBADF));
            }
            let read = pfd.events & libc::POLLIN != 0 && pfd.revents & READ_MASK != 0;
            let write = pfd.events & libc::POLLOUT != 0 && pfd.revents & WRITE_MASK != 0;
            let error = pfd.events & libc::POLLPRI != 0 && pfd.revents & ERROR_MASK != 0;

            if read || write || error {
                if read {
                    ready.read.push(pfd.fd);
                }
                if write {
                    ready.write.push(pfd.fd);
                }
                if error {
                    ready.error.push(pfd.fd);
                }
            } else if pfd.events & libc::POLLPRI != 0 {
                ready.error.push(pfd.fd);
            } else if pfd.events & libc::POLLIN != 0 {
                ready.read.push(pfd.fd);
            } else {
                ready.write.push(pfd.fd);
            }
        }

        Ok(ready)
    }
}
