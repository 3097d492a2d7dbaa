use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use crate::config::ConnectionConfig;
use crate::dns::{driver, AsyncDnsBackend, HickoryBackend, ResolverRequest, ResolverResult};
use crate::tls::credentials::TlsCredentials;
use crate::tls::engine::{BoringEngine, ReadStatus, WriteError};
use crate::tls::session::{abort_on_anomaly, AnomalyHandler, HandshakeProgress, TlsSession};
use std::net::{IpAddr, SocketAddr};
use std::os::unix::io::{AsFd, AsRawFd, OwnedFd};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tokio::net::TcpStream;

/// Session type produced by [`ConnectJob`].
pub type TcpTlsSession = TlsSession<BoringEngine<std::net::TcpStream>>;

/// Manages the connection process: DNS -> TCP -> TLS.
///
/// The returned futures are not `Send`: DNS readiness is tracked with
/// `Rc`-shared watches. Run them on a current-thread runtime or inside a
/// [`tokio::task::LocalSet`] (`spawn_local`), not through `tokio::spawn` on
/// the multi-thread scheduler.
pub struct ConnectJob;

impl ConnectJob {
    /// Connect with the hickory backend, rejecting the peer on any anomaly.
    pub async fn connect(config: &ConnectionConfig) -> Result<Connection, NetError> {
        Self::connect_with(config, HickoryBackend::open, abort_on_anomaly()).await
    }

    /// Connect using `open` for every DNS backend the job needs.
    pub async fn connect_with<B, F>(
        config: &ConnectionConfig,
        open: F,
        on_anomaly: AnomalyHandler,
    ) -> Result<Connection, NetError>
    where
        B: AsyncDnsBackend + 'static,
        F: FnMut() -> Result<B, NetError> + Clone + 'static,
    {
        config.validate()?;

        // 1. Service discovery
        let (host, port) = Self::target(config, open.clone()).await?;

        // 2. Address lookup
        let addrs = Self::lookup(&host, port, open).await?;

        // 3. TCP connect, first address that answers wins
        let mut last_error = None;
        let mut connected = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    connected = Some((stream, addr));
                    break;
                }
                Err(e) => {
                    tracing::debug!(%addr, error = %e, "TCP connect failed");
                    last_error = Some(e);
                }
            }
        }
        let (stream, peer) = match (connected, last_error) {
            (Some(connected), _) => connected,
            (None, Some(e)) => return Err(NetError::connection_failed_to(&host, port, e)),
            (None, None) => return Err(NetError::NameNotResolved),
        };
        tracing::debug!(%peer, "TCP connected");

        // 4. TLS
        let server_name = config.tls_server_name().unwrap_or(&host).to_string();
        let credentials = TlsCredentials::load(config.ca_path())?;
        let options = config.session_options();

        let stream = stream.into_std().connection_context(&host, port)?;
        // The registration holds its own descriptor, so the session closing
        // the socket on failure cannot leave a stale fd number registered.
        let watched = stream
            .as_fd()
            .try_clone_to_owned()
            .connection_context(&host, port)?;
        let engine = BoringEngine::new(stream, &server_name, &credentials, &options.cipher_policy)?;
        let mut session =
            TlsSession::start(engine, &server_name, credentials, options.pinned, on_anomaly);

        let readiness = AsyncFd::with_interest(watched, Interest::READABLE | Interest::WRITABLE)
            .connection_context(&host, port)?;

        loop {
            match session.handshake_step()? {
                HandshakeProgress::Established => break,
                HandshakeProgress::WantRead => wait_readable(&readiness).await?,
                HandshakeProgress::WantWrite => wait_writable(&readiness).await?,
            }
        }

        tracing::debug!(fd = readiness.as_raw_fd(), %peer, "TLS established");
        Ok(Connection {
            readiness: Some(readiness),
            session,
            peer,
            host,
        })
    }

    /// Where to connect: the SRV target when discovery succeeds, otherwise
    /// the configured host (or domain) and port.
    async fn target<B, F>(config: &ConnectionConfig, open: F) -> Result<(String, u16), NetError>
    where
        B: AsyncDnsBackend + 'static,
        F: FnMut() -> Result<B, NetError> + 'static,
    {
        let fallback = || -> Result<(String, u16), NetError> {
            let host = config.fallback_host().ok_or_else(|| {
                NetError::InvalidConfiguration("either host or domain must be set".into())
            })?;
            Ok((host.to_string(), config.port))
        };

        let Some(request) = config.srv_request() else {
            return fallback();
        };

        match driver::resolve(request, open).await {
            Ok(ResolverResult::Service { host, port }) => {
                tracing::debug!(%host, port, "using SRV target");
                Ok((host, port))
            }
            Ok(other) => {
                tracing::warn!(result = ?other, "SRV lookup failed, falling back to domain");
                fallback()
            }
            Err(e) => {
                tracing::warn!(error = %e, "SRV lookup failed, falling back to domain");
                fallback()
            }
        }
    }

    async fn lookup<B, F>(host: &str, port: u16, open: F) -> Result<Vec<SocketAddr>, NetError>
    where
        B: AsyncDnsBackend + 'static,
        F: FnMut() -> Result<B, NetError> + 'static,
    {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![SocketAddr::new(ip, port)]);
        }

        match driver::resolve(ResolverRequest::host(host), open).await? {
            ResolverResult::Addresses(addrs) => Ok(addrs
                .into_iter()
                .map(|addr| SocketAddr::new(addr.ip(), port))
                .collect()),
            ResolverResult::Failed(e) => {
                tracing::debug!(host, error = %e, "host lookup failed");
                Err(e)
            }
            ResolverResult::Service { .. } | ResolverResult::Cancelled => {
                Err(NetError::NameResolutionFailed)
            }
        }
    }
}

/// An established, verified TLS connection.
pub struct Connection {
    // Taken before the session closes the socket.
    readiness: Option<AsyncFd<OwnedFd>>,
    session: TcpTlsSession,
    peer: SocketAddr,
    host: String,
}

impl Connection {
    /// Read decrypted bytes; `Ok(0)` means the peer closed the stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, NetError> {
        loop {
            match self.session.read(buf) {
                ReadStatus::Normal(n) => return Ok(n),
                ReadStatus::Eof => return Ok(0),
                ReadStatus::Again => wait_readable(self.readiness()?).await?,
                ReadStatus::Error(e) => return Err(e),
            }
        }
    }

    pub async fn write_all(&mut self, mut buf: &[u8]) -> Result<(), NetError> {
        while !buf.is_empty() {
            match self.session.try_write(buf) {
                Ok(n) => buf = &buf[n..],
                Err(WriteError::Retry) => wait_writable(self.readiness()?).await?,
                Err(WriteError::Fatal(e)) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn session(&self) -> &TcpTlsSession {
        &self.session
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Host that was connected to, after SRV discovery.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Deregister from the reactor, then close the TLS session.
    pub fn close(&mut self) {
        self.readiness.take();
        self.session.close();
    }

    fn readiness(&self) -> Result<&AsyncFd<OwnedFd>, NetError> {
        self.readiness.as_ref().ok_or(NetError::SocketNotConnected)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn wait_readable(readiness: &AsyncFd<OwnedFd>) -> Result<(), NetError> {
    let mut guard = readiness.readable().await.map_err(|e| {
        tracing::warn!(error = %e, "socket readiness failed");
        NetError::ConnectionFailed
    })?;
    guard.clear_ready();
    Ok(())
}

async fn wait_writable(readiness: &AsyncFd<OwnedFd>) -> Result<(), NetError> {
    let mut guard = readiness.writable().await.map_err(|e| {
        tracing::warn!(error = %e, "socket readiness failed");
        NetError::ConnectionFailed
    })?;
    guard.clear_ready();
    Ok(())
}
