//! Shared helpers for integration tests: runtime-generated certificates.
#![allow(dead_code)]

use boring::asn1::Asn1Time;
use boring::bn::BigNum;
use boring::hash::MessageDigest;
use boring::nid::Nid;
use boring::pkey::{PKey, Private};
use boring::rsa::Rsa;
use boring::x509::extension::{BasicConstraints, SubjectAlternativeName};
use boring::x509::{X509NameBuilder, X509};
use std::sync::atomic::{AtomicU32, Ordering};
use time::{Duration, OffsetDateTime};

static SERIAL: AtomicU32 = AtomicU32::new(1);

pub struct TestCert {
    pub cert: X509,
    pub key: PKey<Private>,
}

impl TestCert {
    pub fn cert_pem(&self) -> Vec<u8> {
        self.cert.to_pem().unwrap()
    }

    pub fn key_pem(&self) -> Vec<u8> {
        self.key.private_key_to_pem_pkcs8().unwrap()
    }
}

fn build(
    name: &str,
    issuer: Option<&TestCert>,
    is_ca: bool,
    not_before: Duration,
    not_after: Duration,
) -> TestCert {
    let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

    let mut subject = X509NameBuilder::new().unwrap();
    subject.append_entry_by_nid(Nid::COMMONNAME, name).unwrap();
    let subject = subject.build();

    let now = OffsetDateTime::now_utc();
    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(SERIAL.fetch_add(1, Ordering::Relaxed))
        .unwrap()
        .to_asn1_integer()
        .unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&subject).unwrap();
    match issuer {
        Some(issuer) => builder.set_issuer_name(issuer.cert.subject_name()).unwrap(),
        None => builder.set_issuer_name(&subject).unwrap(),
    }
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::from_unix((now + not_before).unix_timestamp()).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::from_unix((now + not_after).unix_timestamp()).unwrap())
        .unwrap();

    if is_ca {
        let constraints = BasicConstraints::new().critical().ca().build().unwrap();
        builder.append_extension(constraints).unwrap();
    } else {
        let san = SubjectAlternativeName::new()
            .dns(name)
            .build(&builder.x509v3_context(issuer.map(|i| &*i.cert), None))
            .unwrap();
        builder.append_extension(san).unwrap();
    }

    let signer = issuer.map_or(&key, |i| &i.key);
    builder.sign(signer, MessageDigest::sha256()).unwrap();
    TestCert {
        cert: builder.build(),
        key,
    }
}

/// Self-signed certificate for `name`, valid between the two offsets from now.
pub fn self_signed_between(name: &str, not_before: Duration, not_after: Duration) -> TestCert {
    build(name, None, false, not_before, not_after)
}

/// Self-signed CA certificate valid for the next thirty days.
pub fn authority(name: &str) -> TestCert {
    build(name, None, true, Duration::days(-1), Duration::days(30))
}

/// CA certificate signed by `issuer`, valid between the two offsets from now.
pub fn intermediate_between(
    name: &str,
    issuer: &TestCert,
    not_before: Duration,
    not_after: Duration,
) -> TestCert {
    build(name, Some(issuer), true, not_before, not_after)
}

/// Server certificate for `name` signed by `issuer`.
pub fn issued_between(
    name: &str,
    issuer: &TestCert,
    not_before: Duration,
    not_after: Duration,
) -> TestCert {
    build(name, Some(issuer), false, not_before, not_after)
}

/// Self-signed certificate for `name`, valid for the next thirty days.
pub fn self_signed(name: &str) -> TestCert {
    self_signed_between(name, Duration::days(-1), Duration::days(30))
}
