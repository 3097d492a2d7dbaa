//! Event-loop integration point.
//!
//! State machines in this crate never poll file descriptors themselves. They
//! register a read-readiness watch through [`IoWatch`] and expect the host
//! loop to call back into them when the descriptor signals. [`TokioWatch`]
//! is the implementation used with the tokio reactor.

use crate::base::neterror::NetError;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::Rc;
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

/// Handle for a registered watch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

impl WatchId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Registers and unregisters read-readiness watches with a host event loop.
pub trait IoWatch {
    /// Start watching `fd` for read readiness.
    fn add_read_watch(&mut self, fd: RawFd) -> Result<WatchId, NetError>;

    /// Stop watching. Unknown ids are ignored.
    fn remove_watch(&mut self, id: WatchId);
}

impl<W: IoWatch + ?Sized> IoWatch for &mut W {
    fn add_read_watch(&mut self, fd: RawFd) -> Result<WatchId, NetError> {
        (**self).add_read_watch(fd)
    }

    fn remove_watch(&mut self, id: WatchId) {
        (**self).remove_watch(id)
    }
}

/// A descriptor registered with the reactor but not owned by it.
///
/// Dropping the registration deregisters the descriptor without closing it;
/// the owner (for instance a DNS backend) remains responsible for that.
#[derive(Debug)]
struct WatchedFd(RawFd);

impl AsRawFd for WatchedFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

#[derive(Default)]
struct WatchSlots {
    next_id: u64,
    watches: HashMap<WatchId, Rc<AsyncFd<WatchedFd>>>,
}

/// [`IoWatch`] backed by tokio's reactor.
///
/// Must be used from within a tokio runtime. Cloning shares the registrations,
/// so a driver can keep one clone while the state machine owns the other.
#[derive(Clone, Default)]
pub struct TokioWatch {
    slots: Rc<RefCell<WatchSlots>>,
}

impl TokioWatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until the watched descriptor is readable.
    ///
    /// Returns `Ok(false)` when the watch was removed, which happens once the
    /// state machine reached a terminal state.
    pub async fn readable(&self, id: WatchId) -> io::Result<bool> {
        let registration = self.slots.borrow().watches.get(&id).cloned();
        let Some(registration) = registration else {
            return Ok(false);
        };
        let mut guard = registration.readable().await?;
        guard.clear_ready();
        Ok(true)
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.slots.borrow().watches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IoWatch for TokioWatch {
    fn add_read_watch(&mut self, fd: RawFd) -> Result<WatchId, NetError> {
        let registration =
            AsyncFd::with_interest(WatchedFd(fd), Interest::READABLE).map_err(|e| {
                tracing::warn!(fd, error = %e, "failed to register readiness watch");
                NetError::DnsInitFailed
            })?;

        let mut slots = self.slots.borrow_mut();
        slots.next_id += 1;
        let id = WatchId(slots.next_id);
        slots.watches.insert(id, Rc::new(registration));
        tracing::trace!(fd, ?id, "readiness watch added");
        Ok(id)
    }

    fn remove_watch(&mut self, id: WatchId) {
        if self.slots.borrow_mut().watches.remove(&id).is_some() {
            tracing::trace!(?id, "readiness watch removed");
        }
    }
}
