//! Hash primitives consumed by hashing opcodes and signing serialization.
//!
//! Wraps the `sha2`, `sha1` and `ripemd` digests behind fixed-output helpers and
//! an incremental [`HashBuilder`] that doubles as an [`EncodeSink`], so
//! encodable types can be hashed without an intermediate buffer.

use crate::types::encoding::EncodeSink;
use ripemd::Ripemd160;
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// SHA-256 digest length in bytes.
pub const SHA256_LEN: usize = 32;

/// RIPEMD-160 and SHA-1 digest length in bytes.
pub const SHORT_HASH_LEN: usize = 20;

/// Block size of the Merkle–Damgård hashes used for digest-iteration counting.
const DIGEST_BLOCK_LEN: usize = 64;

/// Length-padding overhead added to every message before block splitting.
const DIGEST_PADDING_LEN: usize = 8;

pub fn sha256(data: &[u8]) -> [u8; SHA256_LEN] {
    Sha256::digest(data).into()
}

pub fn sha1(data: &[u8]) -> [u8; SHORT_HASH_LEN] {
    Sha1::digest(data).into()
}

pub fn ripemd160(data: &[u8]) -> [u8; SHORT_HASH_LEN] {
    Ripemd160::digest(data).into()
}

/// `RIPEMD-160(SHA-256(data))`, used by P2PKH and P2SH20.
pub fn hash160(data: &[u8]) -> [u8; SHORT_HASH_LEN] {
    ripemd160(&sha256(data))
}

/// `SHA-256(SHA-256(data))`, used by P2SH32 and signing serialization.
pub fn hash256(data: &[u8]) -> [u8; SHA256_LEN] {
    sha256(&sha256(data))
}

/// Number of compression-function iterations needed to digest `message_len` bytes.
///
/// Counts `1 + (len + 8) / 64` blocks; two-round hashes (`HASH160`,
/// `HASH256`) add one iteration for the second round.
pub fn digest_iterations(message_len: usize, two_rounds: bool) -> u64 {
    let blocks = 1 + (message_len + DIGEST_PADDING_LEN) / DIGEST_BLOCK_LEN;
    blocks as u64 + u64::from(two_rounds)
}

/// Incremental SHA-256 builder.
///
/// Feeds data in chunks and finalizes to a single or double SHA-256 digest.
pub struct HashBuilder {
    hasher: Sha256,
}

impl HashBuilder {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Chains an update, for building digests in a single expression.
    pub fn chain(mut self, data: &[u8]) -> Self {
        self.update(data);
        self
    }

    pub fn finalize(self) -> [u8; SHA256_LEN] {
        self.hasher.finalize().into()
    }

    /// Finalizes and hashes the digest once more (`HASH256`).
    pub fn finalize_double(self) -> [u8; SHA256_LEN] {
        sha256(&self.finalize())
    }
}

impl Default for HashBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EncodeSink for HashBuilder {
    fn write(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }
}
