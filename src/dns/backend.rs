//! Asynchronous DNS backend contract.
//!
//! A backend owns a resolver context and exposes a single readiness
//! descriptor. The [`Resolver`](super::Resolver) registers that descriptor with
//! the host event loop and calls [`AsyncDnsBackend::poll`] whenever it signals
//! readable. Readiness is level-triggered and may be spurious: `poll` is
//! allowed to return [`PollStatus::Pending`] even after a wakeup.

use crate::base::neterror::NetError;
use std::fmt;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;

/// DNS class IN.
pub const CLASS_IN: u16 = 1;

/// DNS record type SRV.
pub const TYPE_SRV: u16 = 33;

/// Opaque handle for a query submitted to a backend.
///
/// Ids are only meaningful to the backend that issued them and become
/// invalid once the backend is closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryId(u64);

impl QueryId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

/// Address family requested for a host lookup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AddressFamily {
    #[default]
    Unspecified,
    Ipv4,
    Ipv6,
}

/// Hints for a host lookup, mirroring `getaddrinfo`'s `ai_family`.
///
/// Results are always meant for stream (TCP) sockets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AddressHints {
    pub family: AddressFamily,
}

impl AddressHints {
    /// Unspecified family, TCP stream sockets.
    pub fn tcp() -> Self {
        Self::default()
    }

    /// Whether an address satisfies the requested family.
    pub fn accepts(&self, addr: &SocketAddr) -> bool {
        match self.family {
            AddressFamily::Unspecified => true,
            AddressFamily::Ipv4 => addr.is_ipv4(),
            AddressFamily::Ipv6 => addr.is_ipv6(),
        }
    }
}

/// Outcome of [`AsyncDnsBackend::poll`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollStatus {
    /// No query has finished yet; wait for the next readiness signal.
    Pending,
    /// The query with this id has finished and its result can be fetched.
    Ready(QueryId),
}

/// An asynchronous resolver context.
///
/// Backends are created through a caller-supplied factory so the
/// [`Resolver`](super::Resolver) can open them lazily; a factory error is
/// reported as [`NetError::DnsInitFailed`].
pub trait AsyncDnsBackend {
    /// Descriptor that becomes readable when a query may have completed.
    fn readiness_fd(&self) -> RawFd;

    /// Submit an address lookup for `hostname`.
    fn submit_host_query(&mut self, hostname: &str, hints: AddressHints)
        -> Result<QueryId, NetError>;

    /// Submit a raw resource-record query.
    fn submit_service_query(
        &mut self,
        dns_name: &str,
        record_class: u16,
        record_type: u16,
    ) -> Result<QueryId, NetError>;

    /// Drain the readiness descriptor and report a finished query, if any.
    fn poll(&mut self) -> PollStatus;

    /// Take the result of a finished host query.
    ///
    /// Returned addresses carry port 0.
    fn fetch_host_result(&mut self, id: QueryId) -> Result<Vec<SocketAddr>, NetError>;

    /// Take the wire-format answer of a finished resource-record query.
    fn fetch_raw_result(&mut self, id: QueryId) -> Result<Vec<u8>, NetError>;

    /// Abandon a query. Its completion, if it arrives later, is discarded.
    fn cancel(&mut self, id: QueryId);

    /// Release the context. All outstanding ids become invalid.
    fn close(&mut self);
}

impl<B: AsyncDnsBackend + ?Sized> AsyncDnsBackend for Box<B> {
    fn readiness_fd(&self) -> RawFd {
        (**self).readiness_fd()
    }

    fn submit_host_query(
        &mut self,
        hostname: &str,
        hints: AddressHints,
    ) -> Result<QueryId, NetError> {
        (**self).submit_host_query(hostname, hints)
    }

    fn submit_service_query(
        &mut self,
        dns_name: &str,
        record_class: u16,
        record_type: u16,
    ) -> Result<QueryId, NetError> {
        (**self).submit_service_query(dns_name, record_class, record_type)
    }

    fn poll(&mut self) -> PollStatus {
        (**self).poll()
    }

    fn fetch_host_result(&mut self, id: QueryId) -> Result<Vec<SocketAddr>, NetError> {
        (**self).fetch_host_result(id)
    }

    fn fetch_raw_result(&mut self, id: QueryId) -> Result<Vec<u8>, NetError> {
        (**self).fetch_raw_result(id)
    }

    fn cancel(&mut self, id: QueryId) {
        (**self).cancel(id)
    }

    fn close(&mut self) {
        (**self).close()
    }
}
