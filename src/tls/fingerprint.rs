//! Leaf certificate fingerprints for pinning.
//!
//! A fingerprint is the SHA-256 digest of the leaf certificate's DER encoding.
//! Pinning compares it byte-for-byte against a value the caller obtained out
//! of band, independent of whether the chain is trusted.

use crate::base::neterror::NetError;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Length of a SHA-256 digest.
pub const FINGERPRINT_LEN: usize = 32;

/// SHA-256 digest of a DER-encoded certificate.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    pub fn from_bytes(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }

    /// Build from a slice, which must be exactly 32 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, NetError> {
        let bytes: [u8; FINGERPRINT_LEN] =
            bytes.try_into().map_err(|_| NetError::InvalidFingerprint)?;
        Ok(Self(bytes))
    }

    /// Digest a DER-encoded certificate.
    pub fn of_der(cert_der: &[u8]) -> Result<Self, NetError> {
        use boring::hash::{hash, MessageDigest};

        let digest = hash(MessageDigest::sha256(), cert_der).map_err(|e| {
            tracing::warn!(error = %e, "certificate digest failed");
            NetError::SslProtocolError
        })?;
        Self::from_slice(&digest)
    }

    /// Parse a base64-encoded digest.
    pub fn from_base64(encoded: &str) -> Result<Self, NetError> {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|_| NetError::InvalidFingerprint)?;
        Self::from_slice(&decoded)
    }

    /// Parse hex, with or without `:` separators, in either case.
    pub fn from_hex(encoded: &str) -> Result<Self, NetError> {
        let digits: Vec<u8> = encoded
            .trim()
            .bytes()
            .filter(|b| *b != b':')
            .collect();
        if digits.len() != FINGERPRINT_LEN * 2 {
            return Err(NetError::InvalidFingerprint);
        }

        let mut bytes = [0u8; FINGERPRINT_LEN];
        hex::decode_to_slice(&digits, &mut bytes).map_err(|_| NetError::InvalidFingerprint)?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    /// Colon-separated uppercase hex, e.g. `AB:CD:...`.
    pub fn to_hex(&self) -> String {
        self.0
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":")
    }
}

impl FromStr for Fingerprint {
    type Err = NetError;

    /// Accepts hex (64 digits, optional colons) or base64.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s).or_else(|_| Self::from_base64(s))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        encoded.parse().map_err(serde::de::Error::custom)
    }
}
