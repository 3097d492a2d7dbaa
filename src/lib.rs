//! # xmppconnect
//!
//! Connection establishment for XMPP clients: find the server, open a TCP
//! connection, and negotiate a verified TLS session over it.
//!
//! ## Features
//!
//! - **Service discovery**: `_xmpp-client._tcp` SRV lookup with RFC 2782
//!   target selection and fallback to the bare domain
//! - **Pluggable DNS**: any [`dns::AsyncDnsBackend`] with a readiness
//!   descriptor; hickory-dns out of the box
//! - **Event-loop friendly**: resolver and TLS handshake are state machines
//!   driven by readiness notifications, with tokio glue included
//! - **TLS with BoringSSL**: system, file, or directory trust anchors,
//!   certificate pinning, and a per-anomaly accept/abort policy
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use xmppconnect::config::ConnectionConfig;
//! use xmppconnect::socket::ConnectJob;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), xmppconnect::base::neterror::NetError> {
//!     let config = ConnectionConfig::builder().domain("example.com").build()?;
//!     let mut conn = ConnectJob::connect(&config).await?;
//!     conn.write_all(b"<?xml version='1.0'?>").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error definitions and error context helpers
//! - [`config`] - Connection configuration
//! - [`dns`] - DNS backends, the resolver state machine, SRV handling
//! - [`socket`] - Readiness watches and the connect job
//! - [`tls`] - Credentials, TLS sessions, and certificate verification

pub mod base;
pub mod config;
pub mod dns;
pub mod socket;
pub mod tls;
