//! DNS Resolution Module
//!
//! Turns a host name or an XMPP service triple into something connectable:
//! - [`AsyncDnsBackend`]: pluggable asynchronous resolver context with a
//!   readiness descriptor
//! - [`HickoryBackend`]: the hickory-dns implementation
//! - [`Resolver`]: single-use state machine delivering one [`ResolverResult`]
//! - [`srv`]: SRV answer parsing and RFC 2782 target selection
//! - [`driver`]: runs a resolver on the tokio reactor
//!
//! # Example
//!
//! ```rust,ignore
//! use xmppconnect::dns::{driver, HickoryBackend, ResolverRequest, ResolverResult};
//!
//! let request = ResolverRequest::service("example.com", "xmpp-client", "tcp");
//! match driver::resolve(request, HickoryBackend::open).await? {
//!     ResolverResult::Service { host, port } => println!("{host}:{port}"),
//!     other => println!("no SRV target: {other:?}"),
//! }
//! ```

mod backend;
pub mod driver;
mod hickory;
mod resolver;
pub mod srv;

pub use backend::{
    AddressFamily, AddressHints, AsyncDnsBackend, PollStatus, QueryId, CLASS_IN,
    TYPE_SRV,
};
pub use hickory::HickoryBackend;
pub use resolver::{
    BackendOpener, Resolver, ResolverRequest, ResolverResult, ResolverState, ResultCallback,
};
pub use srv::SrvTarget;
