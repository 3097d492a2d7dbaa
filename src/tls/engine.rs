//! The TLS library seam.
//!
//! [`TlsSession`](super::session::TlsSession) drives any [`TlsEngine`]; the
//! production engine is [`BoringEngine`], which runs BoringSSL over a socket
//! owned by the engine. Certificate verification is deferred: the library's
//! verify callback always accepts, folding every chain error it sees into
//! [`ChainFlags`], so the session can apply its own policy once the handshake
//! has finished.

use super::credentials::TlsCredentials;
use super::facts::{ChainFlags, ChainStatus, PeerCertificateFacts};
use crate::base::neterror::NetError;
use crate::config::CipherPolicy;
use boring::ssl::{
    ConnectConfiguration, ErrorCode, HandshakeError, MidHandshakeSslStream, SslConnector,
    SslMethod, SslStream, SslVerifyMode,
};
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex, Once};

static LIBRARY_INIT: Once = Once::new();

/// Initialise the TLS library for this process.
///
/// Safe to call any number of times from any session; the library is set up
/// on the first call and stays up until the process exits.
pub fn library_init() {
    LIBRARY_INIT.call_once(|| {
        boring::init();
        tracing::debug!("TLS library initialised");
    });
}

/// One step of a handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    Done,
    WantRead,
    WantWrite,
    /// Negotiation failed with the library's error code.
    Failed(i32),
}

/// Outcome of reading from an established channel.
#[derive(Debug, Clone)]
pub enum ReadStatus {
    /// `n` bytes of plaintext were read.
    Normal(usize),
    /// Nothing available yet; wait for readiness and retry.
    Again,
    /// The peer closed the channel cleanly.
    Eof,
    Error(NetError),
}

/// Why a write did not complete.
#[derive(Debug, Clone)]
pub enum WriteError {
    /// Interrupted or would block; the same buffer must be offered again.
    Retry,
    Fatal(NetError),
}

/// A TLS implementation bound to one transport.
pub trait TlsEngine {
    /// Descriptor of the underlying transport.
    fn socket_fd(&self) -> RawFd;

    /// Advance the handshake as far as the transport allows.
    fn handshake(&mut self) -> HandshakeStatus;

    /// Facts about the peer certificate. Only meaningful after `Done`.
    fn peer_facts(&self) -> PeerCertificateFacts;

    fn negotiated_cipher(&self) -> Option<String>;

    fn read(&mut self, buf: &mut [u8]) -> ReadStatus;

    fn write(&mut self, buf: &[u8]) -> Result<usize, WriteError>;

    /// Release the library context. Called at most once by the session.
    fn teardown(&mut self);
}

enum Stage<S> {
    Configured {
        config: ConnectConfiguration,
        domain: String,
        stream: S,
    },
    Handshaking(MidHandshakeSslStream<S>),
    Established(SslStream<S>),
    Failed,
    TornDown,
}

/// BoringSSL client engine.
pub struct BoringEngine<S> {
    fd: RawFd,
    stage: Stage<S>,
    chain: Arc<Mutex<ChainFlags>>,
}

impl<S> BoringEngine<S>
where
    S: Read + Write + AsRawFd,
{
    /// Configure a client context for `server_name` over `stream`.
    ///
    /// Nothing is sent until the first [`TlsEngine::handshake`] call.
    pub fn new(
        stream: S,
        server_name: &str,
        credentials: &TlsCredentials,
        cipher_policy: &CipherPolicy,
    ) -> Result<Self, NetError> {
        library_init();

        let mut builder =
            SslConnector::builder(SslMethod::tls()).map_err(|_| NetError::SslProtocolError)?;

        if let CipherPolicy::Custom(ciphers) = cipher_policy {
            builder.set_cipher_list(ciphers).map_err(|e| {
                tracing::warn!(ciphers = %ciphers, error = %e, "cipher policy rejected");
                NetError::SslVersionOrCipherMismatch
            })?;
        }

        credentials.apply_to_builder(&mut builder)?;

        // The verdict is reached after the handshake from the collected facts.
        let chain = Arc::new(Mutex::new(ChainFlags::default()));
        let recorder = chain.clone();
        builder.set_verify_callback(SslVerifyMode::PEER, move |preverify_ok, ctx| {
            if !preverify_ok {
                if let Err(e) = ctx.error() {
                    let depth = ctx.error_depth();
                    tracing::debug!(code = e.as_raw(), depth, error = %e, "chain verify error");
                    recorder
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .record(e.as_raw(), depth);
                }
            }
            true
        });

        let connector = builder.build();
        let mut config = connector.configure().map_err(|_| NetError::SslProtocolError)?;
        config.set_verify_hostname(false);
        if server_name.parse::<std::net::IpAddr>().is_ok() {
            config.set_use_server_name_indication(false);
        }

        Ok(Self {
            fd: stream.as_raw_fd(),
            stage: Stage::Configured {
                config,
                domain: server_name.to_string(),
                stream,
            },
            chain,
        })
    }

    fn chain_status(&self) -> ChainStatus {
        self.chain
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .status()
    }

    fn on_handshake_result(
        &mut self,
        result: Result<SslStream<S>, HandshakeError<S>>,
    ) -> HandshakeStatus {
        match result {
            Ok(stream) => {
                self.stage = Stage::Established(stream);
                HandshakeStatus::Done
            }
            Err(HandshakeError::WouldBlock(mid)) => {
                let want = if mid.error().code() == ErrorCode::WANT_WRITE {
                    HandshakeStatus::WantWrite
                } else {
                    HandshakeStatus::WantRead
                };
                self.stage = Stage::Handshaking(mid);
                want
            }
            Err(HandshakeError::Failure(mid)) => {
                let code = mid.error().code().as_raw();
                tracing::debug!(code, error = %mid.error(), "TLS handshake failed");
                self.stage = Stage::Failed;
                HandshakeStatus::Failed(code)
            }
            Err(HandshakeError::SetupFailure(e)) => {
                tracing::warn!(error = %e, "TLS handshake setup failed");
                self.stage = Stage::Failed;
                HandshakeStatus::Failed(ErrorCode::SSL.as_raw())
            }
        }
    }

    fn established(&self) -> Option<&SslStream<S>> {
        match &self.stage {
            Stage::Established(stream) => Some(stream),
            _ => None,
        }
    }
}

impl<S> TlsEngine for BoringEngine<S>
where
    S: Read + Write + AsRawFd,
{
    fn socket_fd(&self) -> RawFd {
        self.fd
    }

    fn handshake(&mut self) -> HandshakeStatus {
        match std::mem::replace(&mut self.stage, Stage::Failed) {
            Stage::Configured {
                config,
                domain,
                stream,
            } => {
                let result = config.connect(&domain, stream);
                self.on_handshake_result(result)
            }
            Stage::Handshaking(mid) => {
                let result = mid.handshake();
                self.on_handshake_result(result)
            }
            Stage::Established(stream) => {
                self.stage = Stage::Established(stream);
                HandshakeStatus::Done
            }
            other => {
                self.stage = other;
                HandshakeStatus::Failed(ErrorCode::SSL.as_raw())
            }
        }
    }

    fn peer_facts(&self) -> PeerCertificateFacts {
        self.established()
            .map(|stream| PeerCertificateFacts::from_ssl(stream.ssl(), self.chain_status()))
            .unwrap_or_else(PeerCertificateFacts::no_certificate)
    }

    fn negotiated_cipher(&self) -> Option<String> {
        self.established()
            .and_then(|stream| stream.ssl().current_cipher())
            .map(|cipher| cipher.name().to_string())
    }

    fn read(&mut self, buf: &mut [u8]) -> ReadStatus {
        let Stage::Established(stream) = &mut self.stage else {
            return ReadStatus::Error(NetError::SocketNotConnected);
        };
        if buf.is_empty() {
            return ReadStatus::Normal(0);
        }
        match stream.ssl_read(buf) {
            Ok(0) => ReadStatus::Eof,
            Ok(n) => ReadStatus::Normal(n),
            Err(e) => match e.code() {
                ErrorCode::ZERO_RETURN => ReadStatus::Eof,
                ErrorCode::WANT_READ | ErrorCode::WANT_WRITE => ReadStatus::Again,
                ErrorCode::SYSCALL => match e.io_error() {
                    Some(io) if is_retryable(io) => ReadStatus::Again,
                    Some(io) => ReadStatus::Error(io_to_net_error(io)),
                    // EOF without close_notify
                    None => ReadStatus::Eof,
                },
                _ => {
                    tracing::debug!(error = %e, "TLS read failed");
                    ReadStatus::Error(NetError::SslProtocolError)
                }
            },
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, WriteError> {
        let Stage::Established(stream) = &mut self.stage else {
            return Err(WriteError::Fatal(NetError::SocketNotConnected));
        };
        match stream.ssl_write(buf) {
            Ok(n) => Ok(n),
            Err(e) => match e.code() {
                ErrorCode::WANT_READ | ErrorCode::WANT_WRITE => Err(WriteError::Retry),
                ErrorCode::SYSCALL => match e.io_error() {
                    Some(io) if is_retryable(io) => Err(WriteError::Retry),
                    Some(io) => Err(WriteError::Fatal(io_to_net_error(io))),
                    None => Err(WriteError::Fatal(NetError::ConnectionClosed)),
                },
                _ => {
                    tracing::debug!(error = %e, "TLS write failed");
                    Err(WriteError::Fatal(NetError::SslProtocolError))
                }
            },
        }
    }

    fn teardown(&mut self) {
        if let Stage::Established(mut stream) = std::mem::replace(&mut self.stage, Stage::TornDown)
        {
            // close_notify is best effort on a non-blocking socket
            if let Err(e) = stream.shutdown() {
                tracing::debug!(error = %e, "close_notify not sent");
            }
        }
    }
}

fn is_retryable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

fn io_to_net_error(e: &io::Error) -> NetError {
    match e.kind() {
        io::ErrorKind::ConnectionReset => NetError::ConnectionReset,
        io::ErrorKind::ConnectionRefused => NetError::ConnectionRefused,
        io::ErrorKind::TimedOut => NetError::ConnectionTimedOut,
        io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof => NetError::ConnectionClosed,
        io::ErrorKind::NotConnected => NetError::SocketNotConnected,
        _ => NetError::ConnectionFailed,
    }
}
