//! TLS session state machine.
//!
//! A session moves through
//! `Uninitialized → Handshaking → Verifying → {Established, Rejected, HandshakeFailed} → Closed`.
//! Encrypted I/O is only allowed in `Established`. The engine and the
//! credentials are released exactly once, on the first of: handshake
//! failure, rejection, [`TlsSession::close`], or drop.

use super::credentials::TlsCredentials;
use super::engine::{BoringEngine, HandshakeStatus, ReadStatus, TlsEngine, WriteError};
use super::fingerprint::Fingerprint;
use super::verifier::{self, Anomaly, AnomalyResponse, Verdict};
use crate::base::neterror::NetError;
use crate::config::CipherPolicy;
use std::fmt;
use std::io::{Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;
use time::OffsetDateTime;

/// Decides, per anomaly, whether verification may continue.
pub type AnomalyHandler = Box<dyn FnMut(Anomaly) -> AnomalyResponse>;

/// Handler that rejects the peer on any anomaly.
pub fn abort_on_anomaly() -> AnomalyHandler {
    Box::new(|anomaly| {
        tracing::warn!(%anomaly, "rejecting peer certificate");
        AnomalyResponse::Abort
    })
}

// Pause between retries in the blocking handshake and write loops.
const RETRY_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Handshaking,
    Verifying,
    Established,
    Rejected,
    HandshakeFailed,
    Closed,
}

/// What the event loop should wait for before the next handshake step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeProgress {
    WantRead,
    WantWrite,
    Established,
}

/// Per-session TLS options.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub cipher_policy: CipherPolicy,
    pub pinned: Option<Fingerprint>,
}

pub struct TlsSession<E: TlsEngine> {
    engine: Option<E>,
    credentials: Option<TlsCredentials>,
    state: SessionState,
    peer_name: String,
    socket_fd: RawFd,
    pinned: Option<Fingerprint>,
    on_anomaly: AnomalyHandler,
    negotiated_cipher: Option<String>,
    fingerprint: Option<Fingerprint>,
}

impl<S> TlsSession<BoringEngine<S>>
where
    S: Read + Write + AsRawFd,
{
    /// Negotiate TLS over `socket` and verify the peer, blocking until done.
    ///
    /// A non-blocking socket is retried in a loop until the handshake
    /// completes.
    pub fn begin(
        socket: S,
        server_name: &str,
        credentials: TlsCredentials,
        options: &SessionOptions,
        on_anomaly: AnomalyHandler,
    ) -> Result<Self, NetError> {
        let engine = BoringEngine::new(socket, server_name, &credentials, &options.cipher_policy)?;
        Self::begin_with_engine(
            engine,
            server_name,
            credentials,
            options.pinned,
            on_anomaly,
        )
    }
}

impl<E: TlsEngine> TlsSession<E> {
    /// Create a session ready for [`handshake_step`](Self::handshake_step).
    pub fn start(
        engine: E,
        server_name: &str,
        credentials: TlsCredentials,
        pinned: Option<Fingerprint>,
        on_anomaly: AnomalyHandler,
    ) -> Self {
        let mut session = Self {
            socket_fd: engine.socket_fd(),
            engine: Some(engine),
            credentials: Some(credentials),
            state: SessionState::Uninitialized,
            peer_name: server_name.to_string(),
            pinned,
            on_anomaly,
            negotiated_cipher: None,
            fingerprint: None,
        };
        session.state = SessionState::Handshaking;
        tracing::debug!(peer = %session.peer_name, fd = session.socket_fd, "TLS handshake started");
        session
    }

    /// Blocking counterpart of [`start`](Self::start) plus the handshake loop.
    pub fn begin_with_engine(
        engine: E,
        server_name: &str,
        credentials: TlsCredentials,
        pinned: Option<Fingerprint>,
        on_anomaly: AnomalyHandler,
    ) -> Result<Self, NetError> {
        let mut session = Self::start(engine, server_name, credentials, pinned, on_anomaly);
        loop {
            match session.handshake_step()? {
                HandshakeProgress::Established => return Ok(session),
                HandshakeProgress::WantRead | HandshakeProgress::WantWrite => {
                    std::thread::sleep(RETRY_INTERVAL);
                }
            }
        }
    }

    /// Advance the handshake; re-enter when the socket is ready as requested.
    ///
    /// On completion the peer certificate is verified before the session
    /// becomes `Established`.
    pub fn handshake_step(&mut self) -> Result<HandshakeProgress, NetError> {
        match self.state {
            SessionState::Handshaking => {}
            SessionState::Established => return Ok(HandshakeProgress::Established),
            _ => return Err(NetError::SocketNotConnected),
        }
        let Some(engine) = self.engine.as_mut() else {
            return Err(NetError::SocketNotConnected);
        };

        match engine.handshake() {
            HandshakeStatus::WantRead => Ok(HandshakeProgress::WantRead),
            HandshakeStatus::WantWrite => Ok(HandshakeProgress::WantWrite),
            HandshakeStatus::Failed(code) => {
                tracing::debug!(peer = %self.peer_name, code, "TLS handshake failed");
                self.state = SessionState::HandshakeFailed;
                self.release();
                Err(NetError::SslHandshakeFailed { code })
            }
            HandshakeStatus::Done => self.verify_peer(),
        }
    }

    fn verify_peer(&mut self) -> Result<HandshakeProgress, NetError> {
        self.state = SessionState::Verifying;
        let Some(engine) = self.engine.as_ref() else {
            return Err(NetError::SocketNotConnected);
        };
        let facts = engine.peer_facts();
        let verification = verifier::verify(
            &facts,
            &self.peer_name,
            self.pinned.as_ref(),
            OffsetDateTime::now_utc(),
            &mut *self.on_anomaly,
        );
        self.fingerprint = verification.fingerprint;

        match verification.verdict {
            Verdict::Accept => {
                self.negotiated_cipher = engine.negotiated_cipher();
                self.state = SessionState::Established;
                tracing::debug!(
                    peer = %self.peer_name,
                    cipher = self.negotiated_cipher.as_deref().unwrap_or("unknown"),
                    "TLS session established"
                );
                Ok(HandshakeProgress::Established)
            }
            Verdict::Reject(anomaly) => {
                tracing::warn!(peer = %self.peer_name, %anomaly, "peer certificate rejected");
                self.state = SessionState::Rejected;
                self.release();
                Err(NetError::CertificateRejected { anomaly })
            }
        }
    }

    /// Read decrypted bytes.
    pub fn read(&mut self, buf: &mut [u8]) -> ReadStatus {
        match (self.state, self.engine.as_mut()) {
            (SessionState::Established, Some(engine)) => engine.read(buf),
            _ => ReadStatus::Error(NetError::SocketNotConnected),
        }
    }

    /// Write the buffer's first bytes, retrying until the engine accepts them.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, NetError> {
        loop {
            match self.try_write(buf) {
                Ok(n) => return Ok(n),
                Err(WriteError::Retry) => std::thread::sleep(RETRY_INTERVAL),
                Err(WriteError::Fatal(e)) => return Err(e),
            }
        }
    }

    /// Single write attempt; `Retry` hands waiting back to the caller.
    pub fn try_write(&mut self, buf: &[u8]) -> Result<usize, WriteError> {
        match (self.state, self.engine.as_mut()) {
            (SessionState::Established, Some(engine)) => engine.write(buf),
            _ => Err(WriteError::Fatal(NetError::SocketNotConnected)),
        }
    }

    /// Tear the session down. Further calls do nothing.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.release();
        self.state = SessionState::Closed;
        tracing::debug!(peer = %self.peer_name, "TLS session closed");
    }

    // Engine first, then credentials.
    fn release(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.teardown();
        }
        self.credentials = None;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peer_name(&self) -> &str {
        &self.peer_name
    }

    pub fn socket_fd(&self) -> RawFd {
        self.socket_fd
    }

    pub fn negotiated_cipher(&self) -> Option<&str> {
        self.negotiated_cipher.as_deref()
    }

    /// Leaf certificate digest computed during verification.
    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        self.fingerprint.as_ref()
    }

    pub fn credentials(&self) -> Option<&TlsCredentials> {
        self.credentials.as_ref()
    }
}

impl<E: TlsEngine> Drop for TlsSession<E> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<E: TlsEngine> fmt::Debug for TlsSession<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSession")
            .field("state", &self.state)
            .field("peer_name", &self.peer_name)
            .field("socket_fd", &self.socket_fd)
            .field("negotiated_cipher", &self.negotiated_cipher)
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}
