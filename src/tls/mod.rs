//! TLS sessions, trust anchors, and peer certificate verification.
//!
//! - [`credentials`]: trust anchors from the system store, a PEM file, or a
//!   directory of PEM files
//! - [`engine`]: the TLS library seam and its BoringSSL implementation
//! - [`session`]: handshake, verification and encrypted I/O state machine
//! - [`verifier`]: the accept/reject decision over [`facts`]
//! - [`fingerprint`]: SHA-256 leaf digests for pinning

pub mod credentials;
pub mod engine;
pub mod facts;
pub mod fingerprint;
pub mod session;
pub mod verifier;

pub use credentials::{CredentialError, TlsCredentials, TrustAnchors};
pub use engine::{library_init, BoringEngine, HandshakeStatus, ReadStatus, TlsEngine, WriteError};
pub use facts::{ChainFlags, ChainStatus, PeerCertificateFacts};
pub use fingerprint::Fingerprint;
pub use session::{
    abort_on_anomaly, AnomalyHandler, HandshakeProgress, SessionOptions, SessionState, TlsSession,
};
pub use verifier::{verify, Anomaly, AnomalyResponse, Verdict, Verification};
