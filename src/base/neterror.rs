use crate::tls::credentials::CredentialError;
use crate::tls::verifier::Anomaly;
use std::io;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum NetError {
    // Connection Errors
    #[error("Connection closed (TCP FIN)")]
    ConnectionClosed,
    #[error("Connection reset (TCP RST)")]
    ConnectionReset,
    #[error("Connection refused")]
    ConnectionRefused,
    #[error("Connection failed")]
    ConnectionFailed,
    #[error("Connection to {host}:{port} failed: {source}")]
    ConnectionFailedTo {
        host: String,
        port: u16,
        source: Arc<io::Error>,
    },
    #[error("Name not resolved")]
    NameNotResolved,
    #[error("Name {domain} not resolved: {source}")]
    NameNotResolvedFor {
        domain: String,
        source: Arc<io::Error>,
    },
    #[error("Socket not connected")]
    SocketNotConnected,
    #[error("Connection timed out")]
    ConnectionTimedOut,
    #[error("Name resolution failed")]
    NameResolutionFailed,

    // SSL Errors
    #[error("SSL protocol error")]
    SslProtocolError,
    #[error("SSL version or cipher mismatch")]
    SslVersionOrCipherMismatch,
    #[error("SSL handshake failed (code {code})")]
    SslHandshakeFailed { code: i32 },
    #[error("SSL client auth cert bad format")]
    SslClientAuthCertBadFormat,

    // Certificate Errors
    #[error("Certificate rejected: {anomaly}")]
    CertificateRejected { anomaly: Anomaly },
    #[error("Trust anchors could not be loaded: {0}")]
    CertificateLoad(#[from] CredentialError),
    #[error("Invalid certificate fingerprint")]
    InvalidFingerprint,

    // DNS Errors
    #[error("DNS malformed response")]
    DnsMalformedResponse,
    #[error("DNS resolver could not be initialised")]
    DnsInitFailed,
    #[error("DNS query is no longer known to the backend")]
    DnsUnknownQuery,

    #[error("Invalid connection configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Unknown error: {0}")]
    Unknown(i32),
}

impl NetError {
    pub fn as_i32(&self) -> i32 {
        match self {
            NetError::ConnectionClosed => -100,
            NetError::ConnectionReset => -101,
            NetError::ConnectionRefused => -102,
            NetError::ConnectionFailed => -104,
            NetError::ConnectionFailedTo { .. } => -104,
            NetError::NameNotResolved => -105,
            NetError::NameNotResolvedFor { .. } => -105,
            NetError::SslProtocolError => -107,
            NetError::SslHandshakeFailed { .. } => -107,
            NetError::SocketNotConnected => -112,
            NetError::SslVersionOrCipherMismatch => -113,
            NetError::ConnectionTimedOut => -118,
            NetError::NameResolutionFailed => -137,
            NetError::SslClientAuthCertBadFormat => -164,

            NetError::CertificateRejected { anomaly } => anomaly.net_error_code(),

            NetError::DnsMalformedResponse => -800,

            // Library-specific codes (custom range starting at -10000)
            NetError::DnsInitFailed => -10000,
            NetError::DnsUnknownQuery => -10001,
            NetError::CertificateLoad(_) => -10002,
            NetError::InvalidFingerprint => -10003,
            NetError::InvalidConfiguration(_) => -10004,
            NetError::Unknown(code) => *code,
        }
    }

    /// Wrap an IO error raised while connecting to `host:port`.
    pub fn connection_failed_to(host: &str, port: u16, source: io::Error) -> Self {
        NetError::ConnectionFailedTo {
            host: host.to_string(),
            port,
            source: Arc::new(source),
        }
    }

    /// Wrap an IO error raised while resolving `domain`.
    pub fn dns_failed(domain: &str, source: io::Error) -> Self {
        NetError::NameNotResolvedFor {
            domain: domain.to_string(),
            source: Arc::new(source),
        }
    }

    /// True for failures that mean "connected to an untrusted party" rather
    /// than "could not connect".
    pub fn is_certificate_error(&self) -> bool {
        matches!(
            self,
            NetError::CertificateRejected { .. }
        )
    }

    pub fn is_dns_error(&self) -> bool {
        matches!(
            self,
            NetError::NameNotResolved
                | NetError::NameNotResolvedFor { .. }
                | NetError::NameResolutionFailed
                | NetError::DnsMalformedResponse
                | NetError::DnsInitFailed
                | NetError::DnsUnknownQuery
        )
    }
}

impl From<i32> for NetError {
    fn from(code: i32) -> Self {
        match code {
            -100 => NetError::ConnectionClosed,
            -101 => NetError::ConnectionReset,
            -102 => NetError::ConnectionRefused,
            -104 => NetError::ConnectionFailed,
            -105 => NetError::NameNotResolved,
            -107 => NetError::SslProtocolError,
            -112 => NetError::SocketNotConnected,
            -113 => NetError::SslVersionOrCipherMismatch,
            -118 => NetError::ConnectionTimedOut,
            -137 => NetError::NameResolutionFailed,
            -164 => NetError::SslClientAuthCertBadFormat,

            -800 => NetError::DnsMalformedResponse,

            -10000 => NetError::DnsInitFailed,
            -10001 => NetError::DnsUnknownQuery,
            -10003 => NetError::InvalidFingerprint,
            _ => NetError::Unknown(code),
        }
    }
}
