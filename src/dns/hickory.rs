//! Asynchronous DNS backend using hickory-dns.
//!
//! Lookups run on a private tokio runtime with a single worker thread, the
//! same shape as a classic asynchronous resolver library with one worker
//! process. Finished lookups are parked in a completion table and announced by
//! writing a byte to a Unix socket pair; the read end is the readiness
//! descriptor the [`Resolver`](super::Resolver) hands to the event loop.

use super::backend::{AddressHints, AsyncDnsBackend, PollStatus, QueryId, CLASS_IN};
use crate::base::context::{lookup_failure, IoResultExt};
use crate::base::neterror::NetError;
use hickory_resolver::{
    config::{LookupIpStrategy, ResolverConfig},
    name_server::TokioConnectionProvider,
    proto::op::{Message, MessageType},
    proto::rr::RecordType,
    proto::serialize::binary::BinEncodable as _,
    TokioResolver,
};
use std::{
    collections::{HashMap, HashSet},
    io::{self, Read, Write},
    net::SocketAddr,
    os::unix::{
        io::{AsRawFd, RawFd},
        net::UnixStream,
    },
    sync::{Arc, Mutex},
};
use tokio::{runtime::Runtime, task::JoinHandle};

enum Outcome {
    Host(Result<Vec<SocketAddr>, NetError>),
    Raw(Result<Vec<u8>, NetError>),
}

type Completions = Arc<Mutex<HashMap<QueryId, Outcome>>>;

/// [`AsyncDnsBackend`] backed by hickory-dns.
///
/// # Example
///
/// ```rust,ignore
/// use xmppconnect::dns::{driver, HickoryBackend, ResolverRequest};
///
/// let result = driver::resolve(
///     ResolverRequest::service("example.com", "xmpp-client", "tcp"),
///     HickoryBackend::open,
/// )
/// .await?;
/// ```
pub struct HickoryBackend {
    runtime: Option<Runtime>,
    resolver: Arc<TokioResolver>,
    notify_rx: UnixStream,
    notify_tx: Arc<UnixStream>,
    completed: Completions,
    tasks: HashMap<QueryId, JoinHandle<()>>,
    cancelled: HashSet<QueryId>,
    next_id: u64,
}

impl HickoryBackend {
    /// Open a backend using the system DNS configuration, falling back to
    /// hickory's defaults when it cannot be read.
    pub fn open() -> Result<Self, NetError> {
        Self::open_with(None)
    }

    /// Open a backend with an explicit resolver configuration.
    pub fn open_with_config(config: ResolverConfig) -> Result<Self, NetError> {
        Self::open_with(Some(config))
    }

    fn open_with(config: Option<ResolverConfig>) -> Result<Self, NetError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("xmppconnect-dns")
            .enable_all()
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to start DNS worker");
                NetError::DnsInitFailed
            })?;

        let (notify_rx, notify_tx) = UnixStream::pair().map_err(|e| {
            tracing::error!(error = %e, "failed to create DNS readiness channel");
            NetError::DnsInitFailed
        })?;
        notify_rx
            .set_nonblocking(true)
            .and_then(|_| notify_tx.set_nonblocking(true))
            .map_err(|_| NetError::DnsInitFailed)?;

        let resolver = {
            let _guard = runtime.enter();
            let mut builder = match config {
                Some(config) => {
                    TokioResolver::builder_with_config(config, TokioConnectionProvider::default())
                }
                None => match TokioResolver::builder_tokio() {
                    Ok(builder) => {
                        tracing::debug!("Using system DNS configuration");
                        builder
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            "Failed to read system DNS config, using defaults"
                        );
                        TokioResolver::builder_with_config(
                            ResolverConfig::default(),
                            TokioConnectionProvider::default(),
                        )
                    }
                },
            };
            builder.options_mut().ip_strategy = LookupIpStrategy::Ipv4AndIpv6;
            builder.build()
        };

        Ok(Self {
            runtime: Some(runtime),
            resolver: Arc::new(resolver),
            notify_rx,
            notify_tx: Arc::new(notify_tx),
            completed: Arc::new(Mutex::new(HashMap::new())),
            tasks: HashMap::new(),
            cancelled: HashSet::new(),
            next_id: 0,
        })
    }

    fn allocate_id(&mut self) -> QueryId {
        self.next_id += 1;
        QueryId::new(self.next_id)
    }

    fn spawn<F>(&mut self, id: QueryId, lookup: F) -> Result<QueryId, NetError>
    where
        F: std::future::Future<Output = Outcome> + Send + 'static,
    {
        let runtime = self.runtime.as_ref().ok_or(NetError::DnsInitFailed)?;
        let completed = self.completed.clone();
        let notify = self.notify_tx.clone();

        let handle = runtime.spawn(async move {
            let outcome = lookup.await;
            completed
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .insert(id, outcome);
            // A full socket buffer already means "readable".
            let _ = (&*notify).write(&[1]);
        });
        self.tasks.insert(id, handle);
        Ok(id)
    }

    fn take_outcome(&mut self, id: QueryId) -> Option<Outcome> {
        self.tasks.remove(&id);
        self.completed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&id)
    }

    fn drain_notifications(&mut self) {
        let mut buf = [0u8; 64];
        loop {
            match (&self.notify_rx).read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::warn!(error = %e, "DNS readiness channel read failed");
                    break;
                }
            }
        }
    }
}

impl AsyncDnsBackend for HickoryBackend {
    fn readiness_fd(&self) -> RawFd {
        self.notify_rx.as_raw_fd()
    }

    fn submit_host_query(
        &mut self,
        hostname: &str,
        hints: AddressHints,
    ) -> Result<QueryId, NetError> {
        let id = self.allocate_id();
        let resolver = self.resolver.clone();
        let host = hostname.to_string();

        self.spawn(id, async move {
            tracing::debug!(domain = %host, "resolving via hickory-dns");
            let result = resolver
                .lookup_ip(host.as_str())
                .await
                .map_err(|e| {
                    tracing::debug!(domain = %host, error = %e, "hickory-dns lookup failed");
                    lookup_failure(e)
                })
                .and_then(|lookup| {
                    let addrs: Vec<SocketAddr> = lookup
                        .iter()
                        .map(|ip| SocketAddr::new(ip, 0))
                        .filter(|addr| hints.accepts(addr))
                        .collect();
                    if addrs.is_empty() {
                        Err(lookup_failure(format!(
                            "no {:?} addresses returned",
                            hints.family
                        )))
                    } else {
                        Ok(addrs)
                    }
                })
                .dns_context(&host);
            Outcome::Host(result)
        })
    }

    fn submit_service_query(
        &mut self,
        dns_name: &str,
        record_class: u16,
        record_type: u16,
    ) -> Result<QueryId, NetError> {
        if record_class != CLASS_IN {
            tracing::warn!(record_class, "only class IN queries are supported");
            return Err(NetError::NameResolutionFailed);
        }

        let id = self.allocate_id();
        let resolver = self.resolver.clone();
        let name = dns_name.to_string();
        let rtype = RecordType::from(record_type);

        self.spawn(id, async move {
            tracing::debug!(%name, ?rtype, "querying via hickory-dns");
            let result = match resolver.lookup(name.as_str(), rtype).await {
                Ok(lookup) => {
                    let mut message = Message::new();
                    message.set_message_type(MessageType::Response);
                    message.add_answers(lookup.records().to_vec());
                    message.to_vec().map_err(|e| {
                        tracing::warn!(%name, error = %e, "failed to encode answer");
                        NetError::DnsMalformedResponse
                    })
                }
                Err(e) => {
                    tracing::debug!(%name, error = %e, "hickory-dns query failed");
                    Err(lookup_failure(e)).dns_context(&name)
                }
            };
            Outcome::Raw(result)
        })
    }

    fn poll(&mut self) -> PollStatus {
        self.drain_notifications();

        let mut completed = self
            .completed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Late completions of cancelled queries are discarded here.
        completed.retain(|id, _| !self.cancelled.contains(id));
        match completed.keys().min().copied() {
            Some(id) => PollStatus::Ready(id),
            None => PollStatus::Pending,
        }
    }

    fn fetch_host_result(&mut self, id: QueryId) -> Result<Vec<SocketAddr>, NetError> {
        match self.take_outcome(id) {
            Some(Outcome::Host(result)) => result,
            _ => Err(NetError::DnsUnknownQuery),
        }
    }

    fn fetch_raw_result(&mut self, id: QueryId) -> Result<Vec<u8>, NetError> {
        match self.take_outcome(id) {
            Some(Outcome::Raw(result)) => result,
            _ => Err(NetError::DnsUnknownQuery),
        }
    }

    fn cancel(&mut self, id: QueryId) {
        if let Some(handle) = self.tasks.remove(&id) {
            handle.abort();
        }
        self.completed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&id);
        self.cancelled.insert(id);
    }

    fn close(&mut self) {
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
        self.completed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        self.cancelled.clear();
        if let Some(runtime) = self.runtime.take() {
            // Never blocks, so closing from inside another runtime is fine.
            runtime.shutdown_background();
            tracing::debug!("DNS backend closed");
        }
    }
}

impl Drop for HickoryBackend {
    fn drop(&mut self) {
        self.close();
    }
}
