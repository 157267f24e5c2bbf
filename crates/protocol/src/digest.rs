//! MD5 content digests.
//!
//! Used both as the per-chunk integrity check (`Content-MD5`) and as the
//! stable identity of a whole file across restarts (`Content-File-MD5`,
//! resume-store keys).

use std::fmt;
use std::str::FromStr;

use md5::{Digest as _, Md5};

use crate::ProtocolError;

/// Length of a digest in raw bytes.
pub const DIGEST_LEN: usize = 16;

/// Length of a digest in hex characters.
pub const DIGEST_HEX_LEN: usize = DIGEST_LEN * 2;

/// A 16-byte MD5 digest.
///
/// Displays as 32 lowercase hex characters and parses case-insensitively.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Md5Digest([u8; DIGEST_LEN]);

impl Md5Digest {
    /// Computes the digest of `data`.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = DigestHasher::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// Wraps raw digest bytes.
    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Lowercase hex encoding (32 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a 32-character hex string (either case).
    pub fn from_hex(s: &str) -> Result<Self, ProtocolError> {
        let s = s.trim();
        if s.len() != DIGEST_HEX_LEN {
            return Err(ProtocolError::InvalidDigest(s.to_string()));
        }
        let mut bytes = [0u8; DIGEST_LEN];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|_| ProtocolError::InvalidDigest(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Md5Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Md5Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Md5Digest({})", self.to_hex())
    }
}

impl FromStr for Md5Digest {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// Incremental digest over a byte stream.
#[derive(Clone, Default)]
pub struct DigestHasher {
    inner: Md5,
}

impl DigestHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finalize(self) -> Md5Digest {
        Md5Digest(self.inner.finalize().into())
    }
}
