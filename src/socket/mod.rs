//! Sockets and connection establishment.
//!
//! - [`watch`]: readiness watches on file descriptors (the event-loop seam)
//! - [`connectjob`]: DNS → TCP → TLS connection flow

pub mod connectjob;
pub mod watch;

pub use connectjob::{ConnectJob, Connection, TcpTlsSession};
pub use watch::{IoWatch, TokioWatch, WatchId};
