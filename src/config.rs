//! Connection configuration.

use crate::base::neterror::NetError;
use crate::dns::ResolverRequest;
use crate::tls::fingerprint::Fingerprint;
use crate::tls::session::SessionOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default XMPP client-to-server port.
pub const DEFAULT_PORT: u16 = 5222;
pub const DEFAULT_SERVICE: &str = "xmpp-client";
pub const DEFAULT_PROTOCOL: &str = "tcp";

/// Cipher suites offered during the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CipherPolicy {
    /// The TLS library's default list.
    #[default]
    Normal,
    /// An explicit cipher-suite string in the library's syntax.
    Custom(String),
}

/// Everything needed to reach and authenticate an XMPP server.
///
/// With `host` set the connection goes straight to `host:port`. Otherwise
/// `domain` is resolved through SRV (`_service._protocol.domain`) and falls
/// back to `domain:port`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: Option<String>,
    pub port: u16,
    pub domain: Option<String>,
    pub service: String,
    pub protocol: String,
    pub cipher_policy: CipherPolicy,
    pub ca_path: Option<PathBuf>,
    pub fingerprint: Option<Fingerprint>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            domain: None,
            service: DEFAULT_SERVICE.to_string(),
            protocol: DEFAULT_PROTOCOL.to_string(),
            cipher_policy: CipherPolicy::Normal,
            ca_path: None,
            fingerprint: None,
        }
    }
}

impl ConnectionConfig {
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::new()
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, NetError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| NetError::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), NetError> {
        if self.host().is_none() && self.domain().is_none() {
            return Err(NetError::InvalidConfiguration(
                "either host or domain must be set".into(),
            ));
        }
        if self.port == 0 {
            return Err(NetError::InvalidConfiguration("port must not be 0".into()));
        }
        if self.service.is_empty() || self.protocol.is_empty() {
            return Err(NetError::InvalidConfiguration(
                "service and protocol must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// SRV lookup to perform, if any.
    pub fn srv_request(&self) -> Option<ResolverRequest> {
        if self.host().is_some() {
            return None;
        }
        let domain = self.domain()?;
        Some(ResolverRequest::service(domain, &self.service, &self.protocol))
    }

    /// Host to connect to when SRV is skipped or fails.
    pub fn fallback_host(&self) -> Option<&str> {
        self.host().or(self.domain())
    }

    /// Name the peer certificate must carry: the XMPP domain when known.
    pub fn tls_server_name(&self) -> Option<&str> {
        self.domain().or(self.host())
    }

    // Empty strings count as unset.
    fn host(&self) -> Option<&str> {
        self.host.as_deref().filter(|h| !h.is_empty())
    }

    fn domain(&self) -> Option<&str> {
        self.domain.as_deref().filter(|d| !d.is_empty())
    }

    pub fn ca_path(&self) -> Option<&Path> {
        self.ca_path.as_deref()
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            cipher_policy: self.cipher_policy.clone(),
            pinned: self.fingerprint,
        }
    }
}

/// Builder for [`ConnectionConfig`].
#[must_use]
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ConnectionConfig::default(),
        }
    }

    pub fn host(mut self, host: &str) -> Self {
        self.config.host = Some(host.to_string());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn domain(mut self, domain: &str) -> Self {
        self.config.domain = Some(domain.to_string());
        self
    }

    pub fn service(mut self, service: &str) -> Self {
        self.config.service = service.to_string();
        self
    }

    pub fn protocol(mut self, protocol: &str) -> Self {
        self.config.protocol = protocol.to_string();
        self
    }

    pub fn cipher_list(mut self, ciphers: &str) -> Self {
        self.config.cipher_policy = CipherPolicy::Custom(ciphers.to_string());
        self
    }

    pub fn ca_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.ca_path = Some(path.into());
        self
    }

    pub fn fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.config.fingerprint = Some(fingerprint);
        self
    }

    pub fn build(self) -> Result<ConnectionConfig, NetError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
