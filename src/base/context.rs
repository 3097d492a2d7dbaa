//! Context for IO failures on the way to a server.
//!
//! Name lookups and TCP connects both fail with bare `io::Error`s. These
//! helpers attach the name or endpoint involved so the resulting [`NetError`]
//! says which step of reaching the server broke.

use crate::base::neterror::NetError;
use std::error::Error;
use std::io;

pub trait IoResultExt<T> {
    /// Tag a failure while reaching `host:port`.
    ///
    /// ```ignore
    /// use xmppconnect::base::context::IoResultExt;
    ///
    /// let stream = stream.into_std().connection_context(&host, port)?;
    /// ```
    fn connection_context(self, host: &str, port: u16) -> Result<T, NetError>;

    /// Tag a failure while resolving `name`, a host or an SRV owner name.
    fn dns_context(self, name: &str) -> Result<T, NetError>;
}

impl<T> IoResultExt<T> for Result<T, io::Error> {
    fn connection_context(self, host: &str, port: u16) -> Result<T, NetError> {
        self.map_err(|e| NetError::connection_failed_to(host, port, e))
    }

    fn dns_context(self, name: &str) -> Result<T, NetError> {
        self.map_err(|e| NetError::dns_failed(name, e))
    }
}

/// Turn a resolver library error (or a message) into a `NotFound` IO error
/// ready for [`IoResultExt::dns_context`].
pub fn lookup_failure<E>(error: E) -> io::Error
where
    E: Into<Box<dyn Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::NotFound, error)
}
