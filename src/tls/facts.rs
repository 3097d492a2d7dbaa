//! Snapshot of what the handshake told us about the peer certificate.

use boring::asn1::{Asn1Time, Asn1TimeRef};
use boring::nid::Nid;
use boring::ssl::SslRef;
use boring::x509::X509Ref;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use time::OffsetDateTime;

// X509_V_ERR_* values shared by OpenSSL and BoringSSL.
const X509_V_ERR_UNSPECIFIED: i32 = 1;
const X509_V_ERR_CERT_NOT_YET_VALID: i32 = 9;
const X509_V_ERR_CERT_HAS_EXPIRED: i32 = 10;
const X509_V_ERR_OUT_OF_MEM: i32 = 17;
const X509_V_ERR_CERT_REVOKED: i32 = 23;

/// Outcome of chain-of-trust verification against the loaded anchors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStatus {
    /// Verification ran; the flags say whether the chain is usable.
    Verified { invalid: bool, revoked: bool },
    /// The peer sent no certificate.
    NoCertificate,
    /// Verification itself could not run; carries the library error code.
    Error(i32),
}

impl ChainStatus {
    pub fn trusted() -> Self {
        ChainStatus::Verified {
            invalid: false,
            revoked: false,
        }
    }
}

/// Chain problems gathered across every verify-callback invocation.
///
/// BoringSSL keeps only the last error of a chain, so one verification that
/// hits several problems has to be folded in as it happens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainFlags {
    invalid: bool,
    revoked: bool,
    error: Option<i32>,
}

impl ChainFlags {
    /// Fold in one error reported for the certificate at `depth` (0 is the leaf).
    pub fn record(&mut self, code: i32, depth: u32) {
        match code {
            X509_V_ERR_UNSPECIFIED | X509_V_ERR_OUT_OF_MEM => {
                self.error.get_or_insert(code);
            }
            X509_V_ERR_CERT_REVOKED => {
                self.invalid = true;
                self.revoked = true;
            }
            // The leaf's validity window has its own checks.
            X509_V_ERR_CERT_NOT_YET_VALID | X509_V_ERR_CERT_HAS_EXPIRED if depth == 0 => {}
            _ => self.invalid = true,
        }
    }

    pub fn status(&self) -> ChainStatus {
        match self.error {
            Some(code) => ChainStatus::Error(code),
            None => ChainStatus::Verified {
                invalid: self.invalid,
                revoked: self.revoked,
            },
        }
    }
}

/// Read-only facts about the peer's leaf certificate, built once per handshake.
#[derive(Debug, Clone)]
pub struct PeerCertificateFacts {
    pub(crate) chain: ChainStatus,
    pub(crate) is_x509: bool,
    pub(crate) not_before: Option<OffsetDateTime>,
    pub(crate) not_after: Option<OffsetDateTime>,
    pub(crate) dns_names: Vec<String>,
    pub(crate) ip_addresses: Vec<IpAddr>,
    pub(crate) common_name: Option<String>,
    pub(crate) leaf_der: Vec<u8>,
}

impl PeerCertificateFacts {
    /// Facts for a peer that presented nothing.
    pub fn no_certificate() -> Self {
        Self {
            chain: ChainStatus::NoCertificate,
            is_x509: false,
            not_before: None,
            not_after: None,
            dns_names: Vec::new(),
            ip_addresses: Vec::new(),
            common_name: None,
            leaf_der: Vec::new(),
        }
    }

    /// Collect facts from a connection whose handshake has completed, with
    /// the chain status its verify callback accumulated.
    pub fn from_ssl(ssl: &SslRef, chain: ChainStatus) -> Self {
        match ssl.peer_certificate() {
            Some(leaf) => Self::from_x509(&leaf, chain),
            None => Self::no_certificate(),
        }
    }

    /// Collect facts from a leaf certificate and an already known chain status.
    pub fn from_x509(leaf: &X509Ref, chain: ChainStatus) -> Self {
        let mut dns_names = Vec::new();
        let mut ip_addresses = Vec::new();
        if let Some(names) = leaf.subject_alt_names() {
            for name in names.iter() {
                if let Some(dns) = name.dnsname() {
                    dns_names.push(dns.to_string());
                } else if let Some(ip) = name.ipaddress().and_then(ip_from_bytes) {
                    ip_addresses.push(ip);
                }
            }
        }

        let common_name = leaf
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .and_then(|entry| entry.data().as_utf8().ok())
            .map(|cn| cn.to_string());

        let leaf_der = leaf.to_der().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "couldn't re-encode peer certificate");
            Vec::new()
        });

        Self {
            chain,
            is_x509: true,
            not_before: asn1_to_datetime(leaf.not_before()),
            not_after: asn1_to_datetime(leaf.not_after()),
            dns_names,
            ip_addresses,
            common_name,
            leaf_der,
        }
    }

    pub fn chain(&self) -> ChainStatus {
        self.chain
    }

    pub fn is_x509(&self) -> bool {
        self.is_x509
    }

    pub fn not_before(&self) -> Option<OffsetDateTime> {
        self.not_before
    }

    pub fn not_after(&self) -> Option<OffsetDateTime> {
        self.not_after
    }

    pub fn dns_names(&self) -> &[String] {
        &self.dns_names
    }

    pub fn ip_addresses(&self) -> &[IpAddr] {
        &self.ip_addresses
    }

    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    pub fn leaf_der(&self) -> &[u8] {
        &self.leaf_der
    }
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

fn asn1_to_datetime(t: &Asn1TimeRef) -> Option<OffsetDateTime> {
    let epoch = Asn1Time::from_unix(0).ok()?;
    let diff = epoch.diff(t).ok()?;
    let seconds = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    OffsetDateTime::from_unix_timestamp(seconds).ok()
}
