//! Cryptographic primitives for signature-checking opcodes.

pub mod key_pair;
