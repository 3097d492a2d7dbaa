//! Accept/reject decision over a peer certificate.
//!
//! [`verify`] runs a fixed sequence of checks against [`PeerCertificateFacts`].
//! Every failed check is reported to the caller's anomaly handler, which
//! decides whether to abort or keep going. Nothing here touches the network
//! or the TLS library, so the whole decision is testable with synthetic facts.

use super::facts::{ChainStatus, PeerCertificateFacts};
use super::fingerprint::Fingerprint;
use std::fmt;
use std::net::IpAddr;
use time::OffsetDateTime;

/// Something wrong with the peer certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Anomaly {
    NoCertificate,
    GenericError,
    UntrustedCertificate,
    CertificateExpired,
    CertificateNotYetActive,
    HostnameMismatch,
    FingerprintMismatch,
}

impl Anomaly {
    /// Net error code reported when a session is rejected for this anomaly.
    pub fn net_error_code(&self) -> i32 {
        match self {
            Anomaly::NoCertificate => -207,
            Anomaly::GenericError => -207,
            Anomaly::UntrustedCertificate => -202,
            Anomaly::CertificateExpired => -201,
            Anomaly::CertificateNotYetActive => -201,
            Anomaly::HostnameMismatch => -200,
            Anomaly::FingerprintMismatch => -150,
        }
    }
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Anomaly::NoCertificate => "peer presented no certificate",
            Anomaly::GenericError => "certificate could not be verified",
            Anomaly::UntrustedCertificate => "certificate is not trusted",
            Anomaly::CertificateExpired => "certificate has expired",
            Anomaly::CertificateNotYetActive => "certificate is not yet active",
            Anomaly::HostnameMismatch => "certificate does not match the server name",
            Anomaly::FingerprintMismatch => "certificate does not match the pinned fingerprint",
        };
        f.write_str(text)
    }
}

/// Answer from the anomaly handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyResponse {
    Continue,
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(Anomaly),
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept)
    }
}

/// Verdict plus the leaf fingerprint, when one could be computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    pub verdict: Verdict,
    pub fingerprint: Option<Fingerprint>,
}

/// Run every check in order, consulting `on_anomaly` for each failure.
///
/// The first `Abort` ends verification with `Reject`; the remaining checks
/// are skipped.
pub fn verify(
    facts: &PeerCertificateFacts,
    server_name: &str,
    pinned: Option<&Fingerprint>,
    now: OffsetDateTime,
    on_anomaly: &mut dyn FnMut(Anomaly) -> AnomalyResponse,
) -> Verification {
    let mut fingerprint = None;
    let verdict = match run_checks(facts, server_name, pinned, now, on_anomaly, &mut fingerprint) {
        Ok(()) => Verdict::Accept,
        Err(anomaly) => Verdict::Reject(anomaly),
    };
    tracing::debug!(server_name, ?verdict, "certificate verification finished");
    Verification {
        verdict,
        fingerprint,
    }
}

fn run_checks(
    facts: &PeerCertificateFacts,
    server_name: &str,
    pinned: Option<&Fingerprint>,
    now: OffsetDateTime,
    on_anomaly: &mut dyn FnMut(Anomaly) -> AnomalyResponse,
    fingerprint: &mut Option<Fingerprint>,
) -> Result<(), Anomaly> {
    match facts.chain() {
        ChainStatus::NoCertificate => raise(on_anomaly, Anomaly::NoCertificate)?,
        ChainStatus::Error(code) => {
            tracing::debug!(code, "chain verification error");
            raise(on_anomaly, Anomaly::GenericError)?;
        }
        ChainStatus::Verified { invalid, revoked } => {
            if invalid || revoked {
                raise(on_anomaly, Anomaly::UntrustedCertificate)?;
            }
        }
    }

    if facts.not_after().is_some_and(|t| t < now) {
        raise(on_anomaly, Anomaly::CertificateExpired)?;
    }
    if facts.not_before().is_some_and(|t| t > now) {
        raise(on_anomaly, Anomaly::CertificateNotYetActive)?;
    }

    if !facts.is_x509() {
        return Ok(());
    }

    if !matches_hostname(facts, server_name) {
        raise(on_anomaly, Anomaly::HostnameMismatch)?;
    }

    match Fingerprint::of_der(facts.leaf_der()) {
        Ok(digest) => {
            *fingerprint = Some(digest);
            if pinned.is_some_and(|expected| *expected != digest) {
                raise(on_anomaly, Anomaly::FingerprintMismatch)?;
            }
        }
        Err(_) => raise(on_anomaly, Anomaly::GenericError)?,
    }

    Ok(())
}

fn raise(
    on_anomaly: &mut dyn FnMut(Anomaly) -> AnomalyResponse,
    anomaly: Anomaly,
) -> Result<(), Anomaly> {
    match on_anomaly(anomaly) {
        AnomalyResponse::Continue => {
            tracing::debug!(%anomaly, "certificate anomaly waived");
            Ok(())
        }
        AnomalyResponse::Abort => Err(anomaly),
    }
}

/// Does the certificate name `server_name`?
///
/// IP literals match IP SAN entries only. DNS names match SAN DNS entries,
/// falling back to the subject CN when the certificate carries none.
pub fn matches_hostname(facts: &PeerCertificateFacts, server_name: &str) -> bool {
    let host = server_name.trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() {
        return false;
    }

    if let Ok(ip) = host.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
        return facts.ip_addresses().contains(&ip);
    }

    if !facts.dns_names().is_empty() {
        return facts
            .dns_names()
            .iter()
            .any(|pattern| name_matches(pattern, &host));
    }

    facts
        .common_name()
        .is_some_and(|cn| name_matches(cn, &host))
}

// `host` is already lowercased without a trailing dot.
fn name_matches(pattern: &str, host: &str) -> bool {
    let pattern = pattern.trim_end_matches('.').to_ascii_lowercase();

    let Some(suffix) = pattern.strip_prefix("*.") else {
        return pattern == host;
    };
    // A wildcard never covers a bare public suffix like `*.com`.
    if !suffix.contains('.') {
        return false;
    }
    match host.split_once('.') {
        Some((label, rest)) => !label.is_empty() && rest == suffix,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn facts(dns: &[&str], cn: Option<&str>) -> PeerCertificateFacts {
        let now = OffsetDateTime::now_utc();
        PeerCertificateFacts {
            chain: ChainStatus::trusted(),
            is_x509: true,
            not_before: Some(now - Duration::days(30)),
            not_after: Some(now + Duration::days(30)),
            dns_names: dns.iter().map(|s| s.to_string()).collect(),
            ip_addresses: vec!["192.0.2.10".parse().unwrap()],
            common_name: cn.map(str::to_string),
            leaf_der: b"leaf certificate".to_vec(),
        }
    }

    fn collect(
        facts: &PeerCertificateFacts,
        server_name: &str,
        pinned: Option<&Fingerprint>,
        response: AnomalyResponse,
    ) -> (Verification, Vec<Anomaly>) {
        let mut seen = Vec::new();
        let verification = verify(facts, server_name, pinned, OffsetDateTime::now_utc(), &mut |a: Anomaly| {
            seen.push(a);
            response
        });
        (verification, seen)
    }

    #[test]
    fn test_clean_certificate_is_accepted() {
        let facts = facts(&["chat.example.com"], None);
        let (verification, seen) = collect(&facts, "chat.example.com", None, AnomalyResponse::Abort);
        assert_eq!(verification.verdict, Verdict::Accept);
        assert!(seen.is_empty());
        assert_eq!(
            verification.fingerprint,
            Some(Fingerprint::of_der(b"leaf certificate").unwrap())
        );
    }

    #[test]
    fn test_no_certificate_reported_once() {
        let facts = PeerCertificateFacts::no_certificate();
        let (verification, seen) = collect(&facts, "chat.example.com", None, AnomalyResponse::Continue);
        assert_eq!(verification.verdict, Verdict::Accept);
        assert_eq!(seen, vec![Anomaly::NoCertificate]);
        assert_eq!(verification.fingerprint, None);

        let (verification, _) = collect(&facts, "chat.example.com", None, AnomalyResponse::Abort);
        assert_eq!(verification.verdict, Verdict::Reject(Anomaly::NoCertificate));
    }

    #[test]
    fn test_generic_error() {
        let mut facts = facts(&["chat.example.com"], None);
        facts.chain = ChainStatus::Error(1);
        let (verification, _) = collect(&facts, "chat.example.com", None, AnomalyResponse::Abort);
        assert_eq!(verification.verdict, Verdict::Reject(Anomaly::GenericError));
    }

    #[test]
    fn test_revoked_is_untrusted() {
        let mut facts = facts(&["chat.example.com"], None);
        facts.chain = ChainStatus::Verified {
            invalid: false,
            revoked: true,
        };
        let (verification, _) = collect(&facts, "chat.example.com", None, AnomalyResponse::Abort);
        assert_eq!(verification.verdict, Verdict::Reject(Anomaly::UntrustedCertificate));
    }

    #[test]
    fn test_expired_independent_of_trust() {
        let mut facts = facts(&["chat.example.com"], None);
        facts.not_after = Some(OffsetDateTime::now_utc() - Duration::days(1));

        let (verification, _) = collect(&facts, "chat.example.com", None, AnomalyResponse::Abort);
        assert_eq!(verification.verdict, Verdict::Reject(Anomaly::CertificateExpired));

        facts.chain = ChainStatus::Verified {
            invalid: true,
            revoked: false,
        };
        let (_, seen) = collect(&facts, "chat.example.com", None, AnomalyResponse::Continue);
        assert_eq!(
            seen,
            vec![Anomaly::UntrustedCertificate, Anomaly::CertificateExpired]
        );
    }

    #[test]
    fn test_not_yet_active() {
        let mut facts = facts(&["chat.example.com"], None);
        facts.not_before = Some(OffsetDateTime::now_utc() + Duration::days(1));
        let (verification, _) = collect(&facts, "chat.example.com", None, AnomalyResponse::Abort);
        assert_eq!(verification.verdict, Verdict::Reject(Anomaly::CertificateNotYetActive));
    }

    #[test]
    fn test_pin_mismatch_then_waived() {
        let facts = facts(&["chat.example.com"], None);
        let wrong = Fingerprint::from_bytes([0u8; 32]);

        let (verification, _) = collect(&facts, "chat.example.com", Some(&wrong), AnomalyResponse::Abort);
        assert_eq!(verification.verdict, Verdict::Reject(Anomaly::FingerprintMismatch));

        let (verification, seen) =
            collect(&facts, "chat.example.com", Some(&wrong), AnomalyResponse::Continue);
        assert_eq!(verification.verdict, Verdict::Accept);
        assert_eq!(seen, vec![Anomaly::FingerprintMismatch]);
    }

    #[test]
    fn test_pin_match() {
        let facts = facts(&["chat.example.com"], None);
        let right = Fingerprint::of_der(b"leaf certificate").unwrap();
        let (verification, _) = collect(&facts, "chat.example.com", Some(&right), AnomalyResponse::Abort);
        assert!(verification.verdict.is_accept());
    }

    #[test]
    fn test_hostname_matching() {
        let san = facts(&["chat.example.com", "*.example.org"], Some("ignored.example.net"));
        assert!(matches_hostname(&san, "chat.example.com"));
        assert!(matches_hostname(&san, "CHAT.Example.com."));
        assert!(matches_hostname(&san, "xmpp.example.org"));
        assert!(!matches_hostname(&san, "a.b.example.org"));
        assert!(!matches_hostname(&san, "example.org"));
        // CN is ignored once SAN DNS entries exist
        assert!(!matches_hostname(&san, "ignored.example.net"));
        assert!(matches_hostname(&san, "192.0.2.10"));
        assert!(!matches_hostname(&san, "192.0.2.11"));

        let cn_only = facts(&[], Some("example.net"));
        assert!(matches_hostname(&cn_only, "example.net"));
        assert!(!matches_hostname(&cn_only, "www.example.net"));

        let bare = facts(&["*.com"], None);
        assert!(!matches_hostname(&bare, "example.com"));
    }

    #[test]
    fn test_hostname_mismatch_anomaly() {
        let facts = facts(&["chat.example.com"], None);
        let (verification, _) = collect(&facts, "evil.example.com", None, AnomalyResponse::Abort);
        assert_eq!(verification.verdict, Verdict::Reject(Anomaly::HostnameMismatch));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Anomaly::CertificateExpired.net_error_code(), -201);
        assert_eq!(Anomaly::FingerprintMismatch.net_error_code(), -150);
        assert_eq!(Anomaly::HostnameMismatch.net_error_code(), -200);
    }
}
