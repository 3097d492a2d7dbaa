//! Trust anchors and client identity for TLS sessions.
//!
//! Anchors come from one of three places:
//! - the platform's default store when no CA path is configured
//! - a single PEM bundle
//! - a directory of PEM files, scanned non-recursively; unreadable or
//!   corrupt files are logged and skipped as long as one anchor loads

use crate::base::neterror::NetError;
use boring::pkey::{PKey, Private};
use boring::ssl::SslConnectorBuilder;
use boring::x509::store::X509StoreBuilder;
use boring::x509::X509;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Why trust anchors could not be loaded.
#[derive(Debug, Error, Clone)]
pub enum CredentialError {
    #[error("ca_path '{}': no such file or directory", .0.display())]
    NoSuchPath(PathBuf),
    #[error("no certificates in ca_path '{}'; are they in PEM format?", .0.display())]
    NoUsableCertificates(PathBuf),
    #[error("couldn't read '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: Arc<io::Error>,
    },
    #[error("loading of certificate '{}' failed", .0.display())]
    InvalidPem(PathBuf),
    #[error("client identity is not a valid PEM certificate and matching private key")]
    InvalidIdentity,
}

/// Where the session's trust anchors come from.
#[derive(Clone)]
pub enum TrustAnchors {
    /// The platform's default verify paths.
    System,
    /// Explicitly loaded certificates.
    Certificates(Vec<X509>),
}

#[derive(Clone)]
struct ClientIdentity {
    certificate: X509,
    key: PKey<Private>,
}

/// Credentials attached to a TLS session.
#[derive(Clone)]
pub struct TlsCredentials {
    anchors: TrustAnchors,
    identity: Option<ClientIdentity>,
}

impl TlsCredentials {
    /// Credentials trusting the platform's default store.
    pub fn system() -> Self {
        Self {
            anchors: TrustAnchors::System,
            identity: None,
        }
    }

    /// Credentials trusting exactly `certificates`.
    pub fn from_certificates(certificates: Vec<X509>) -> Self {
        Self {
            anchors: TrustAnchors::Certificates(certificates),
            identity: None,
        }
    }

    /// Load trust anchors from `ca_path`, or the system store when `None`.
    pub fn load(ca_path: Option<&Path>) -> Result<Self, CredentialError> {
        let Some(path) = ca_path else {
            tracing::debug!("using system trust anchors");
            return Ok(Self::system());
        };

        let meta = fs::metadata(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), "ca_path: no such file or directory");
                CredentialError::NoSuchPath(path.to_path_buf())
            } else {
                CredentialError::Read {
                    path: path.to_path_buf(),
                    source: Arc::new(e),
                }
            }
        })?;

        let certificates = if meta.is_dir() {
            load_directory(path)?
        } else if meta.is_file() {
            let certificates = load_pem_file(path)?;
            if certificates.is_empty() {
                tracing::warn!(path = %path.display(), "loading of ca_path failed");
                return Err(CredentialError::InvalidPem(path.to_path_buf()));
            }
            certificates
        } else {
            return Err(CredentialError::NoUsableCertificates(path.to_path_buf()));
        };

        tracing::debug!(
            path = %path.display(),
            count = certificates.len(),
            "loaded trust anchors"
        );
        Ok(Self::from_certificates(certificates))
    }

    /// Attach a client certificate and its private key, both PEM encoded.
    pub fn with_client_identity(
        mut self,
        certificate_pem: &[u8],
        key_pem: &[u8],
    ) -> Result<Self, CredentialError> {
        let certificate =
            X509::from_pem(certificate_pem).map_err(|_| CredentialError::InvalidIdentity)?;
        let key =
            PKey::private_key_from_pem(key_pem).map_err(|_| CredentialError::InvalidIdentity)?;
        self.identity = Some(ClientIdentity { certificate, key });
        Ok(self)
    }

    pub fn anchors(&self) -> &TrustAnchors {
        &self.anchors
    }

    /// Number of explicitly loaded anchors; `None` for the system store.
    pub fn anchor_count(&self) -> Option<usize> {
        match &self.anchors {
            TrustAnchors::System => None,
            TrustAnchors::Certificates(certs) => Some(certs.len()),
        }
    }

    pub fn has_client_identity(&self) -> bool {
        self.identity.is_some()
    }

    /// Install anchors and identity on a connector builder.
    pub(crate) fn apply_to_builder(&self, builder: &mut SslConnectorBuilder) -> Result<(), NetError> {
        match &self.anchors {
            TrustAnchors::System => {
                builder
                    .set_default_verify_paths()
                    .map_err(|_| NetError::SslProtocolError)?;
            }
            TrustAnchors::Certificates(certificates) => {
                let mut store = X509StoreBuilder::new().map_err(|_| NetError::SslProtocolError)?;
                for certificate in certificates {
                    store
                        .add_cert(certificate.clone())
                        .map_err(|_| NetError::SslProtocolError)?;
                }
                builder.set_cert_store(store.build());
            }
        }

        if let Some(identity) = &self.identity {
            builder
                .set_certificate(&identity.certificate)
                .map_err(|_| NetError::SslClientAuthCertBadFormat)?;
            builder
                .set_private_key(&identity.key)
                .map_err(|_| NetError::SslClientAuthCertBadFormat)?;
            builder
                .check_private_key()
                .map_err(|_| NetError::SslClientAuthCertBadFormat)?;
        }

        Ok(())
    }
}

impl fmt::Debug for TlsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsCredentials")
            .field("anchor_count", &self.anchor_count())
            .field("client_identity", &self.identity.is_some())
            .finish()
    }
}

fn load_pem_file(path: &Path) -> Result<Vec<X509>, CredentialError> {
    let pem = fs::read(path).map_err(|e| CredentialError::Read {
        path: path.to_path_buf(),
        source: Arc::new(e),
    })?;
    X509::stack_from_pem(&pem).map_err(|_| CredentialError::InvalidPem(path.to_path_buf()))
}

fn load_directory(dir: &Path) -> Result<Vec<X509>, CredentialError> {
    let entries = fs::read_dir(dir).map_err(|e| {
        tracing::warn!(path = %dir.display(), error = %e, "couldn't open ca_path");
        CredentialError::Read {
            path: dir.to_path_buf(),
            source: Arc::new(e),
        }
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| fs::metadata(path).map(|m| m.is_file()).unwrap_or(false))
        .collect();
    paths.sort();

    let mut anchors = Vec::new();
    for path in paths {
        match load_pem_file(&path) {
            Ok(certificates) if !certificates.is_empty() => anchors.extend(certificates),
            Ok(_) => {
                tracing::warn!(path = %path.display(), "no certificate found in file");
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "loading of certificate failed");
            }
        }
    }

    if anchors.is_empty() {
        tracing::warn!(path = %dir.display(), "no certificates in ca_path, are they in PEM format?");
        return Err(CredentialError::NoUsableCertificates(dir.to_path_buf()));
    }
    Ok(anchors)
}
