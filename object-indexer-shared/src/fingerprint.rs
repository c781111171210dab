//! Content fingerprinting.
//!
//! A fingerprint is a SHA-256 over the object bytes followed by the
//! little-endian byte count. It is the idempotency dimension that separates
//! "same key, same content" from "same key, new content".

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length of the hex-encoded digest.
const FINGERPRINT_HEX_LEN: usize = 64;

/// Errors from parsing a fingerprint string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FingerprintError {
    #[error("Invalid fingerprint length: expected {FINGERPRINT_HEX_LEN}, got {0}")]
    InvalidLength(usize),

    #[error("Invalid fingerprint encoding: {0}")]
    InvalidEncoding(String),
}

/// Hex-encoded hash over an object's bytes and size.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentFingerprint(String);

impl ContentFingerprint {
    /// Fingerprint an in-memory buffer.
    pub fn of(bytes: &[u8]) -> Self {
        let mut builder = FingerprintBuilder::new();
        builder.update(bytes);
        builder.finish()
    }

    /// Parse a previously rendered fingerprint.
    pub fn parse(value: &str) -> Result<Self, FingerprintError> {
        if value.len() != FINGERPRINT_HEX_LEN {
            return Err(FingerprintError::InvalidLength(value.len()));
        }
        hex::decode(value).map_err(|e| FingerprintError::InvalidEncoding(e.to_string()))?;
        Ok(Self(value.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First twelve hex characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Incremental fingerprint over a chunked byte stream.
#[derive(Debug, Clone, Default)]
pub struct FingerprintBuilder {
    hasher: Sha256,
    bytes_seen: u64,
}

impl FingerprintBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes_seen += chunk.len() as u64;
    }

    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }

    pub fn finish(mut self) -> ContentFingerprint {
        self.hasher.update(self.bytes_seen.to_le_bytes());
        ContentFingerprint(hex::encode(self.hasher.finalize()))
    }
}
