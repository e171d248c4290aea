//! secp256k1 signing and verification on top of `k256`.
//!
//! The VM treats signature checking as an opaque oracle behind the
//! [`Secp256k1`] trait. [`K256`] is the default implementation; it verifies
//! strict-DER ECDSA signatures (low-S only) and 64-byte BCH Schnorr signatures.
//! [`PrivateKey`] signs message hashes and derives public keys, which the CLI,
//! benchmarks and tests use to build satisfiable programs.

use crate::types::hash::sha256;
use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::ops::Reduce;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::elliptic_curve::{Field, PrimeField};
use k256::{AffinePoint, FieldBytes, FieldElement, ProjectivePoint, PublicKey, Scalar, SecretKey, U256};
use rand_core::OsRng;

/// Length of a Schnorr signature without its signing-serialization type byte.
pub const SCHNORR_SIGNATURE_LEN: usize = 64;

/// Compressed public key length.
pub const COMPRESSED_PUBLIC_KEY_LEN: usize = 33;

/// Uncompressed public key length.
pub const UNCOMPRESSED_PUBLIC_KEY_LEN: usize = 65;

/// Domain tag mixed into deterministic Schnorr nonces.
const SCHNORR_NONCE_TAG: &[u8; 16] = b"Schnorr+SHA256  ";

/// Signature verification oracle consumed by signature-checking opcodes.
///
/// Implementations must be deterministic and side-effect free.
pub trait Secp256k1 {
    /// Verifies a DER-encoded ECDSA signature over a 32-byte message hash.
    fn verify_ecdsa(&self, message_hash: &[u8; 32], signature: &[u8], public_key: &[u8]) -> bool;

    /// Verifies a 64-byte Schnorr signature over a 32-byte message hash.
    fn verify_schnorr(&self, message_hash: &[u8; 32], signature: &[u8], public_key: &[u8]) -> bool;

    /// Returns true if `public_key` decodes to a point on the curve.
    fn is_valid_public_key(&self, public_key: &[u8]) -> bool;
}

/// Default [`Secp256k1`] oracle backed by the `k256` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct K256;

impl Secp256k1 for K256 {
    fn verify_ecdsa(&self, message_hash: &[u8; 32], signature: &[u8], public_key: &[u8]) -> bool {
        let Ok(key) = VerifyingKey::from_sec1_bytes(public_key) else {
            return false;
        };
        let Ok(sig) = Signature::from_der(signature) else {
            return false;
        };
        // High-S signatures are malleable and rejected outright.
        if sig.normalize_s().is_some() {
            return false;
        }
        key.verify_prehash(message_hash, &sig).is_ok()
    }

    fn verify_schnorr(&self, message_hash: &[u8; 32], signature: &[u8], public_key: &[u8]) -> bool {
        if signature.len() != SCHNORR_SIGNATURE_LEN {
            return false;
        }
        let Ok(key) = PublicKey::from_sec1_bytes(public_key) else {
            return false;
        };
        let (r_bytes, s_bytes) = signature.split_at(32);
        let Some(s) = Option::<Scalar>::from(Scalar::from_repr(*FieldBytes::from_slice(s_bytes)))
        else {
            return false;
        };
        if Option::<FieldElement>::from(FieldElement::from_bytes(FieldBytes::from_slice(r_bytes)))
            .is_none()
        {
            return false;
        }

        let e = schnorr_challenge(r_bytes, &key, message_hash);
        let point = ProjectivePoint::GENERATOR * s - key.to_projective() * e;
        if point == ProjectivePoint::IDENTITY {
            return false;
        }
        let affine = point.to_affine();
        has_square_y(&affine) && affine_x(&affine).as_slice() == r_bytes
    }

    fn is_valid_public_key(&self, public_key: &[u8]) -> bool {
        PublicKey::from_sec1_bytes(public_key).is_ok()
    }
}

/// Computes `e = SHA256(r || compressed(P) || m) mod n`.
fn schnorr_challenge(r: &[u8], key: &PublicKey, message_hash: &[u8; 32]) -> Scalar {
    let mut preimage = Vec::with_capacity(32 + COMPRESSED_PUBLIC_KEY_LEN + 32);
    preimage.extend_from_slice(r);
    preimage.extend_from_slice(key.to_encoded_point(true).as_bytes());
    preimage.extend_from_slice(message_hash);
    reduce_hash(sha256(&preimage))
}

fn reduce_hash(digest: [u8; 32]) -> Scalar {
    <Scalar as Reduce<U256>>::reduce_bytes(&FieldBytes::from(digest))
}

fn affine_x(point: &AffinePoint) -> FieldBytes {
    let encoded = point.to_encoded_point(false);
    encoded.x().copied().unwrap_or_default()
}

/// Returns true if the point's y coordinate is a quadratic residue modulo p.
fn has_square_y(point: &AffinePoint) -> bool {
    let encoded = point.to_encoded_point(false);
    let Some(y) = encoded.y() else {
        return false;
    };
    Option::<FieldElement>::from(FieldElement::from_bytes(y))
        .map(|y| bool::from(y.sqrt().is_some()))
        .unwrap_or(false)
}

/// Private key used to produce signatures for test programs and tooling.
#[derive(Clone)]
pub struct PrivateKey {
    key: SecretKey,
}

impl PrivateKey {
    /// Generates a new random private key using OS-provided entropy.
    pub fn new() -> Self {
        Self {
            key: SecretKey::random(&mut OsRng),
        }
    }

    /// Creates a private key from raw bytes.
    ///
    /// Returns `None` if the bytes are not a valid non-zero scalar.
    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        SecretKey::from_slice(bytes).ok().map(|key| Self { key })
    }

    /// Serialized public key, compressed (33 bytes) or uncompressed (65 bytes).
    pub fn public_key(&self, compressed: bool) -> Vec<u8> {
        self.key
            .public_key()
            .to_encoded_point(compressed)
            .as_bytes()
            .to_vec()
    }

    /// Signs a message hash with ECDSA, returning a low-S DER signature.
    pub fn sign_ecdsa(&self, message_hash: &[u8; 32]) -> Option<Vec<u8>> {
        let signing_key = SigningKey::from(&self.key);
        let signature: Signature = signing_key.sign_prehash(message_hash).ok()?;
        let signature = signature.normalize_s().unwrap_or(signature);
        Some(signature.to_der().as_bytes().to_vec())
    }

    /// Signs a message hash with BCH Schnorr, returning `r || s`.
    ///
    /// The nonce is derived deterministically from the key and message.
    pub fn sign_schnorr(&self, message_hash: &[u8; 32]) -> Option<[u8; SCHNORR_SIGNATURE_LEN]> {
        let secret: Scalar = *self.key.to_nonzero_scalar();
        let mut nonce_preimage = Vec::with_capacity(32 + 32 + SCHNORR_NONCE_TAG.len());
        nonce_preimage.extend_from_slice(&secret.to_bytes());
        nonce_preimage.extend_from_slice(message_hash);
        nonce_preimage.extend_from_slice(SCHNORR_NONCE_TAG);
        let mut nonce = reduce_hash(sha256(&nonce_preimage));
        if bool::from(nonce.is_zero()) {
            return None;
        }

        let r_point = (ProjectivePoint::GENERATOR * nonce).to_affine();
        if !has_square_y(&r_point) {
            nonce = -nonce;
        }
        let r = affine_x(&r_point);
        let e = schnorr_challenge(&r, &self.key.public_key(), message_hash);
        let s = nonce + e * secret;

        let mut signature = [0u8; SCHNORR_SIGNATURE_LEN];
        signature[..32].copy_from_slice(&r);
        signature[32..].copy_from_slice(&s.to_bytes());
        Some(signature)
    }
}

impl Default for PrivateKey {
    fn default() -> Self {
        Self::new()
    }
}
