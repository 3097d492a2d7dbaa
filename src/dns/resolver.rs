//! Resolver state machine.
//!
//! A [`Resolver`] turns one [`ResolverRequest`] into exactly one
//! [`ResolverResult`]. It owns its backend and readiness watch for the
//! lifetime of the request and releases both before the result callback runs.
//!
//! ```text
//! Idle -> Preparing -> Querying -> Done | Failed | Cancelled
//! ```
//!
//! The resolver never blocks: the host loop calls [`Resolver::on_readable`]
//! whenever the registered descriptor signals.

use super::backend::{AddressHints, AsyncDnsBackend, PollStatus, QueryId, CLASS_IN, TYPE_SRV};
use super::srv::{resolve_srv_answer, srv_query_name};
use crate::base::neterror::NetError;
use crate::socket::watch::{IoWatch, WatchId};
use std::fmt;
use std::net::SocketAddr;

/// What to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverRequest {
    /// Address lookup for a host name.
    Host { hostname: String },
    /// SRV discovery of `_service._protocol.domain`.
    Service {
        domain: String,
        service: String,
        protocol: String,
    },
}

impl ResolverRequest {
    pub fn host(hostname: impl Into<String>) -> Self {
        ResolverRequest::Host {
            hostname: hostname.into(),
        }
    }

    pub fn service(
        domain: impl Into<String>,
        service: impl Into<String>,
        protocol: impl Into<String>,
    ) -> Self {
        ResolverRequest::Service {
            domain: domain.into(),
            service: service.into(),
            protocol: protocol.into(),
        }
    }
}

/// Terminal outcome of a request, delivered exactly once.
#[derive(Debug, Clone)]
pub enum ResolverResult {
    /// Host lookup succeeded. Addresses carry port 0.
    Addresses(Vec<SocketAddr>),
    /// SRV discovery produced a new host/port pair.
    Service { host: String, port: u16 },
    Failed(NetError),
    Cancelled,
}

impl ResolverResult {
    pub fn is_ok(&self) -> bool {
        matches!(
            self,
            ResolverResult::Addresses(_) | ResolverResult::Service { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverState {
    Idle,
    Preparing,
    Querying,
    Done,
    Failed,
    Cancelled,
}

impl ResolverState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ResolverState::Done | ResolverState::Failed | ResolverState::Cancelled
        )
    }
}

/// Which completion handler a query is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryKind {
    Host,
    Service,
}

#[derive(Debug, Clone, Copy)]
struct PendingQuery {
    id: QueryId,
    kind: QueryKind,
}

/// Factory used to open the backend on first use.
pub type BackendOpener<B> = Box<dyn FnMut() -> Result<B, NetError>>;

/// Receives the single result of a request.
pub type ResultCallback = Box<dyn FnOnce(ResolverResult)>;

pub struct Resolver<B: AsyncDnsBackend, W: IoWatch> {
    state: ResolverState,
    open: BackendOpener<B>,
    backend: Option<B>,
    watch: W,
    watch_id: Option<WatchId>,
    query: Option<PendingQuery>,
    on_result: Option<ResultCallback>,
}

impl<B: AsyncDnsBackend, W: IoWatch> Resolver<B, W> {
    pub fn new(
        open: impl FnMut() -> Result<B, NetError> + 'static,
        watch: W,
        on_result: impl FnOnce(ResolverResult) + 'static,
    ) -> Self {
        Self {
            state: ResolverState::Idle,
            open: Box::new(open),
            backend: None,
            watch,
            watch_id: None,
            query: None,
            on_result: Some(Box::new(on_result)),
        }
    }

    pub fn state(&self) -> ResolverState {
        self.state
    }

    /// The readiness watch registered for the outstanding query.
    pub fn watch_id(&self) -> Option<WatchId> {
        self.watch_id
    }

    /// Submit the request. Only valid once, from `Idle`.
    ///
    /// Failures to open the backend or register the watch are delivered as
    /// [`ResolverResult::Failed`] through the result callback.
    pub fn start(&mut self, request: ResolverRequest) {
        if self.state != ResolverState::Idle {
            tracing::warn!(state = ?self.state, "resolver already used, ignoring start");
            return;
        }
        self.state = ResolverState::Preparing;

        if let Err(e) = self.prepare() {
            self.finish(ResolverResult::Failed(e));
            return;
        }

        let Some(backend) = self.backend.as_mut() else {
            self.finish(ResolverResult::Failed(NetError::DnsInitFailed));
            return;
        };

        let submitted = match &request {
            ResolverRequest::Host { hostname } => {
                tracing::debug!(host = %hostname, "looking up host");
                backend
                    .submit_host_query(hostname, AddressHints::tcp())
                    .map(|id| PendingQuery {
                        id,
                        kind: QueryKind::Host,
                    })
            }
            ResolverRequest::Service {
                domain,
                service,
                protocol,
            } => {
                let name = srv_query_name(domain, service, protocol);
                tracing::debug!(%domain, %service, %protocol, srv = %name, "looking up service");
                backend
                    .submit_service_query(&name, CLASS_IN, TYPE_SRV)
                    .map(|id| PendingQuery {
                        id,
                        kind: QueryKind::Service,
                    })
            }
        };

        match submitted {
            Ok(query) => {
                self.query = Some(query);
                self.state = ResolverState::Querying;
            }
            Err(e) => {
                tracing::debug!(error = %e, "query submission failed");
                self.finish(ResolverResult::Failed(e));
            }
        }
    }

    /// Advance after the readiness descriptor signalled.
    ///
    /// Spurious wakeups and completions for ids other than the outstanding
    /// one leave the resolver waiting.
    pub fn on_readable(&mut self) -> ResolverState {
        if self.state != ResolverState::Querying {
            return self.state;
        }
        let Some(backend) = self.backend.as_mut() else {
            return self.state;
        };

        let id = match backend.poll() {
            PollStatus::Pending => return self.state,
            PollStatus::Ready(id) => id,
        };

        let query = match self.query {
            Some(query) if query.id == id => query,
            _ => {
                tracing::debug!(%id, "ignoring completion for stale query");
                return self.state;
            }
        };
        self.query = None;

        let result = match query.kind {
            QueryKind::Host => Self::host_done(backend, id),
            QueryKind::Service => Self::service_done(backend, id),
        };
        self.finish(result);
        self.state
    }

    /// Abandon the outstanding query and deliver [`ResolverResult::Cancelled`]
    /// before returning. A no-op unless a query is outstanding.
    pub fn cancel(&mut self) {
        if self.state != ResolverState::Querying {
            return;
        }
        if let (Some(backend), Some(query)) = (self.backend.as_mut(), self.query.take()) {
            tracing::debug!(id = %query.id, "cancelling query");
            backend.cancel(query.id);
        }
        self.finish(ResolverResult::Cancelled);
    }

    fn prepare(&mut self) -> Result<(), NetError> {
        if self.backend.is_some() {
            return Ok(());
        }

        let mut backend = (self.open)().map_err(|e| {
            tracing::warn!(error = %e, "can't initialise DNS backend");
            NetError::DnsInitFailed
        })?;

        let fd = backend.readiness_fd();
        match self.watch.add_read_watch(fd) {
            Ok(id) => {
                self.watch_id = Some(id);
                self.backend = Some(backend);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(fd, error = %e, "can't watch DNS backend");
                backend.close();
                Err(NetError::DnsInitFailed)
            }
        }
    }

    fn host_done(backend: &mut B, id: QueryId) -> ResolverResult {
        match backend.fetch_host_result(id) {
            Ok(addrs) if !addrs.is_empty() => {
                tracing::debug!(count = addrs.len(), "host lookup complete");
                ResolverResult::Addresses(addrs)
            }
            Ok(_) => ResolverResult::Failed(NetError::NameNotResolved),
            Err(e) => {
                tracing::debug!(error = %e, "host lookup failed");
                ResolverResult::Failed(e)
            }
        }
    }

    fn service_done(backend: &mut B, id: QueryId) -> ResolverResult {
        tracing::debug!("srv lookup complete");
        let answer = match backend.fetch_raw_result(id) {
            Ok(answer) if !answer.is_empty() => answer,
            Ok(_) => {
                tracing::debug!("empty srv answer");
                return ResolverResult::Failed(NetError::DnsMalformedResponse);
            }
            Err(e) => {
                tracing::debug!(error = %e, "failed to read srv results");
                return ResolverResult::Failed(e);
            }
        };

        match resolve_srv_answer(&answer, &mut rand::thread_rng()) {
            Ok((host, port)) => ResolverResult::Service { host, port },
            Err(e) => ResolverResult::Failed(e),
        }
    }

    /// Release the watch and backend, then deliver `result`.
    fn finish(&mut self, result: ResolverResult) {
        self.release();
        self.state = match result {
            ResolverResult::Addresses(_) | ResolverResult::Service { .. } => ResolverState::Done,
            ResolverResult::Failed(_) => ResolverState::Failed,
            ResolverResult::Cancelled => ResolverState::Cancelled,
        };
        if let Some(on_result) = self.on_result.take() {
            on_result(result);
        }
    }

    fn release(&mut self) {
        self.query = None;
        if let Some(id) = self.watch_id.take() {
            self.watch.remove_watch(id);
        }
        if let Some(mut backend) = self.backend.take() {
            backend.close();
        }
    }
}

impl<B: AsyncDnsBackend, W: IoWatch> Drop for Resolver<B, W> {
    fn drop(&mut self) {
        if self.state == ResolverState::Querying {
            self.cancel();
        } else {
            self.release();
        }
    }
}

impl<B: AsyncDnsBackend, W: IoWatch> fmt::Debug for Resolver<B, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("state", &self.state)
            .field("watch_id", &self.watch_id)
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::net::{IpAddr, Ipv4Addr};
    use std::os::unix::io::RawFd;
    use std::rc::Rc;

    #[derive(Default)]
    struct Script {
        next: u64,
        ready: Option<QueryId>,
        hosts: HashMap<QueryId, Vec<SocketAddr>>,
        closed: usize,
        cancelled: Vec<QueryId>,
    }

    struct ScriptedBackend(Rc<RefCell<Script>>);

    impl AsyncDnsBackend for ScriptedBackend {
        fn readiness_fd(&self) -> RawFd {
            3
        }

        fn submit_host_query(
            &mut self,
            _hostname: &str,
            _hints: AddressHints,
        ) -> Result<QueryId, NetError> {
            let mut s = self.0.borrow_mut();
            s.next += 1;
            Ok(QueryId::new(s.next))
        }

        fn submit_service_query(
            &mut self,
            _dns_name: &str,
            _record_class: u16,
            _record_type: u16,
        ) -> Result<QueryId, NetError> {
            Err(NetError::NameResolutionFailed)
        }

        fn poll(&mut self) -> PollStatus {
            match self.0.borrow_mut().ready.take() {
                Some(id) => PollStatus::Ready(id),
                None => PollStatus::Pending,
            }
        }

        fn fetch_host_result(&mut self, id: QueryId) -> Result<Vec<SocketAddr>, NetError> {
            self.0
                .borrow_mut()
                .hosts
                .remove(&id)
                .ok_or(NetError::DnsUnknownQuery)
        }

        fn fetch_raw_result(&mut self, _id: QueryId) -> Result<Vec<u8>, NetError> {
            Err(NetError::DnsUnknownQuery)
        }

        fn cancel(&mut self, id: QueryId) {
            self.0.borrow_mut().cancelled.push(id);
        }

        fn close(&mut self) {
            self.0.borrow_mut().closed += 1;
        }
    }

    #[derive(Default)]
    struct NullWatch;

    impl IoWatch for NullWatch {
        fn add_read_watch(&mut self, _fd: RawFd) -> Result<WatchId, NetError> {
            Ok(WatchId::new(1))
        }

        fn remove_watch(&mut self, _id: WatchId) {}
    }

    fn resolver(
        script: &Rc<RefCell<Script>>,
        results: &Rc<RefCell<Vec<ResolverResult>>>,
    ) -> Resolver<ScriptedBackend, NullWatch> {
        let script = script.clone();
        let results = results.clone();
        Resolver::new(
            move || Ok(ScriptedBackend(script.clone())),
            NullWatch,
            move |r| results.borrow_mut().push(r),
        )
    }

    #[test]
    fn test_spurious_wakeup_keeps_querying() {
        let script = Rc::new(RefCell::new(Script::default()));
        let results = Rc::new(RefCell::new(Vec::new()));
        let mut r = resolver(&script, &results);

        r.start(ResolverRequest::host("example.com"));
        assert_eq!(r.state(), ResolverState::Querying);
        assert_eq!(r.on_readable(), ResolverState::Querying);
        assert!(results.borrow().is_empty());
    }

    #[test]
    fn test_host_lookup_completes() {
        let script = Rc::new(RefCell::new(Script::default()));
        let results = Rc::new(RefCell::new(Vec::new()));
        let mut r = resolver(&script, &results);

        r.start(ResolverRequest::host("example.com"));
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), 0);
        {
            let mut s = script.borrow_mut();
            s.hosts.insert(QueryId::new(1), vec![addr]);
            s.ready = Some(QueryId::new(1));
        }

        assert_eq!(r.on_readable(), ResolverState::Done);
        assert_eq!(script.borrow().closed, 1);
        let results = results.borrow();
        assert_eq!(results.len(), 1);
        assert!(matches!(&results[0], ResolverResult::Addresses(a) if a == &vec![addr]));
    }

    #[test]
    fn test_stale_completion_is_ignored() {
        let script = Rc::new(RefCell::new(Script::default()));
        let results = Rc::new(RefCell::new(Vec::new()));
        let mut r = resolver(&script, &results);

        r.start(ResolverRequest::host("example.com"));
        script.borrow_mut().ready = Some(QueryId::new(99));
        assert_eq!(r.on_readable(), ResolverState::Querying);
        assert!(results.borrow().is_empty());
    }

    #[test]
    fn test_submission_failure_is_reported() {
        let script = Rc::new(RefCell::new(Script::default()));
        let results = Rc::new(RefCell::new(Vec::new()));
        let mut r = resolver(&script, &results);

        r.start(ResolverRequest::service("example.com", "xmpp-client", "tcp"));
        assert_eq!(r.state(), ResolverState::Failed);
        assert_eq!(script.borrow().closed, 1);
        assert!(matches!(
            results.borrow()[0],
            ResolverResult::Failed(NetError::NameResolutionFailed)
        ));
    }

    #[test]
    fn test_open_failure_is_init_failed() {
        let results = Rc::new(RefCell::new(Vec::new()));
        let sink = results.clone();
        let mut r: Resolver<ScriptedBackend, NullWatch> = Resolver::new(
            || Err(NetError::Unknown(-1)),
            NullWatch,
            move |res| sink.borrow_mut().push(res),
        );

        r.start(ResolverRequest::host("example.com"));
        assert_eq!(r.state(), ResolverState::Failed);
        assert!(matches!(
            results.borrow()[0],
            ResolverResult::Failed(NetError::DnsInitFailed)
        ));
    }

    #[test]
    fn test_drop_mid_query_cancels() {
        let script = Rc::new(RefCell::new(Script::default()));
        let results = Rc::new(RefCell::new(Vec::new()));
        {
            let mut r = resolver(&script, &results);
            r.start(ResolverRequest::host("example.com"));
        }
        assert_eq!(script.borrow().cancelled, vec![QueryId::new(1)]);
        assert_eq!(script.borrow().closed, 1);
        assert!(matches!(results.borrow()[0], ResolverResult::Cancelled));
    }

    #[test]
    fn test_second_start_is_ignored() {
        let script = Rc::new(RefCell::new(Script::default()));
        let results = Rc::new(RefCell::new(Vec::new()));
        let mut r = resolver(&script, &results);

        r.start(ResolverRequest::host("a.example.com"));
        r.start(ResolverRequest::host("b.example.com"));
        assert_eq!(script.borrow().next, 1);
    }
}
