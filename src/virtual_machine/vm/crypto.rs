//! Hashing and signature-checking opcodes.

use super::{Vm, require};
use crate::core::sighash::SighashType;
use crate::crypto::key_pair::{SCHNORR_SIGNATURE_LEN, Secp256k1};
use crate::types::hash::{self, digest_iterations};
use crate::virtual_machine::errors::VmError;
use crate::virtual_machine::isa::Opcode;
use crate::virtual_machine::state::VmState;
use crate::virtual_machine::vm::context::ProgramContext;
use num_traits::ToPrimitive;

/// Maximum number of public keys in an `OP_CHECKMULTISIG`.
const MAX_MULTISIG_KEYS: usize = 20;

/// Shortest and longest possible DER-encoded ECDSA signatures.
const MIN_DER_SIGNATURE_LEN: usize = 8;
const MAX_DER_SIGNATURE_LEN: usize = 72;

/// Splits a transaction signature into its body and signing serialization type.
fn decode_transaction_signature(signature: &[u8]) -> Result<(&[u8], SighashType), VmError> {
    let (&type_byte, body) = signature
        .split_last()
        .ok_or(VmError::InvalidSignatureEncoding)?;
    let sighash_type =
        SighashType::from_byte(type_byte).map_err(|_| VmError::InvalidSignatureEncoding)?;
    check_signature_body(body)?;
    Ok((body, sighash_type))
}

fn check_signature_body(body: &[u8]) -> Result<(), VmError> {
    let is_schnorr = body.len() == SCHNORR_SIGNATURE_LEN;
    let is_der = (MIN_DER_SIGNATURE_LEN..=MAX_DER_SIGNATURE_LEN).contains(&body.len());
    if is_schnorr || is_der {
        Ok(())
    } else {
        Err(VmError::InvalidSignatureEncoding)
    }
}

impl<C: Secp256k1> Vm<C> {
    pub(super) fn op_hash(&self, state: &mut VmState, opcode: Opcode) -> Result<(), VmError> {
        let data = self.pop(state)?;
        let (digest, two_rounds) = match opcode {
            Opcode::Ripemd160 => (hash::ripemd160(&data).to_vec(), false),
            Opcode::Sha1 => (hash::sha1(&data).to_vec(), false),
            Opcode::Sha256 => (hash::sha256(&data).to_vec(), false),
            Opcode::Hash160 => (hash::hash160(&data).to_vec(), true),
            _ => (hash::hash256(&data).to_vec(), true),
        };
        state
            .metrics
            .record_hash(digest_iterations(data.len(), two_rounds), &self.config);
        self.push(state, digest)
    }

    /// Verifies a non-empty transaction signature against the active bytecode.
    ///
    /// Encoding problems are errors; a well-formed signature that does not
    /// verify returns `Ok(false)`.
    fn verify_transaction_signature(
        &self,
        ctx: &ProgramContext,
        state: &mut VmState,
        signature: &[u8],
        public_key: &[u8],
    ) -> Result<bool, VmError> {
        let (body, sighash_type) = decode_transaction_signature(signature)?;
        if !self.crypto.is_valid_public_key(public_key) {
            return Err(VmError::InvalidPublicKeyEncoding);
        }
        let preimage = ctx
            .signing_context()
            .serialize(&state.active_bytecode(), sighash_type)?;
        state
            .metrics
            .record_hash(digest_iterations(preimage.len(), true), &self.config);
        let message_hash = hash::hash256(&preimage);
        Ok(if body.len() == SCHNORR_SIGNATURE_LEN {
            self.crypto.verify_schnorr(&message_hash, body, public_key)
        } else {
            self.crypto.verify_ecdsa(&message_hash, body, public_key)
        })
    }

    pub(super) fn op_check_sig(
        &self,
        ctx: &ProgramContext,
        state: &mut VmState,
        opcode: Opcode,
    ) -> Result<(), VmError> {
        let public_key = self.pop(state)?;
        let signature = self.pop(state)?;
        let valid = !signature.is_empty();
        if valid {
            let verified = self.verify_transaction_signature(ctx, state, &signature, &public_key)?;
            state.metrics.record_signature_checks(1, &self.config);
            if !verified {
                return Err(VmError::NonNullSignatureFailure);
            }
        }
        if opcode == Opcode::CheckSigVerify {
            return require(valid, opcode);
        }
        self.push_bool(state, valid)
    }

    /// `OP_CHECKDATASIG`: verifies a signature over `SHA-256(message)`.
    pub(super) fn op_check_data_sig(
        &self,
        state: &mut VmState,
        opcode: Opcode,
    ) -> Result<(), VmError> {
        let public_key = self.pop(state)?;
        let message = self.pop(state)?;
        let signature = self.pop(state)?;
        let valid = !signature.is_empty();
        if valid {
            check_signature_body(&signature)?;
            if !self.crypto.is_valid_public_key(&public_key) {
                return Err(VmError::InvalidPublicKeyEncoding);
            }
            state
                .metrics
                .record_hash(digest_iterations(message.len(), false), &self.config);
            let message_hash = hash::sha256(&message);
            let verified = if signature.len() == SCHNORR_SIGNATURE_LEN {
                self.crypto
                    .verify_schnorr(&message_hash, &signature, &public_key)
            } else {
                self.crypto.verify_ecdsa(&message_hash, &signature, &public_key)
            };
            state.metrics.record_signature_checks(1, &self.config);
            if !verified {
                return Err(VmError::NonNullSignatureFailure);
            }
        }
        if opcode == Opcode::CheckDataSigVerify {
            return require(valid, opcode);
        }
        self.push_bool(state, valid)
    }

    /// `OP_CHECKMULTISIG` in legacy (null dummy) or Schnorr bitfield mode.
    pub(super) fn op_check_multisig(
        &self,
        ctx: &ProgramContext,
        state: &mut VmState,
        opcode: Opcode,
    ) -> Result<(), VmError> {
        let key_count = self.pop_count(state, MAX_MULTISIG_KEYS)?;
        let keys = self.pop_items(state, key_count)?;
        let signature_count = self.pop_count(state, key_count)?;
        let signatures = self.pop_items(state, signature_count)?;
        let dummy = self.pop(state)?;

        let valid = if dummy.is_empty() {
            self.legacy_multisig(ctx, state, &keys, &signatures)?
        } else {
            self.schnorr_multisig(ctx, state, &dummy, &keys, &signatures)?
        };
        if opcode == Opcode::CheckMultiSigVerify {
            return require(valid, opcode);
        }
        self.push_bool(state, valid)
    }

    fn pop_count(&self, state: &mut VmState, max: usize) -> Result<usize, VmError> {
        self.pop_number(state)?
            .to_usize()
            .filter(|&count| count <= max)
            .ok_or(VmError::InvalidMultisigCount)
    }

    /// Pops `count` items, returned in the order they were pushed.
    fn pop_items(&self, state: &mut VmState, count: usize) -> Result<Vec<Vec<u8>>, VmError> {
        self.require_depth(state, count)?;
        let start = state.stack.len() - count;
        Ok(state.stack.split_off(start))
    }

    /// Matches ECDSA signatures to keys in order, walking down from the last of each.
    fn legacy_multisig(
        &self,
        ctx: &ProgramContext,
        state: &mut VmState,
        keys: &[Vec<u8>],
        signatures: &[Vec<u8>],
    ) -> Result<bool, VmError> {
        let any_non_null = signatures.iter().any(|signature| !signature.is_empty());
        if any_non_null {
            state
                .metrics
                .record_signature_checks(keys.len() as u64, &self.config);
        }

        let mut remaining_signatures = signatures.len();
        let mut remaining_keys = keys.len();
        let mut success = true;
        while success && remaining_signatures > 0 {
            let signature = &signatures[remaining_signatures - 1];
            let public_key = &keys[remaining_keys - 1];
            if signature.len() == SCHNORR_SIGNATURE_LEN + 1 {
                return Err(VmError::SchnorrInLegacyMultisig);
            }
            let verified = !signature.is_empty()
                && self.verify_transaction_signature(ctx, state, signature, public_key)?;
            if verified {
                remaining_signatures -= 1;
            }
            remaining_keys -= 1;
            if remaining_signatures > remaining_keys {
                success = false;
            }
        }

        if !success && any_non_null {
            return Err(VmError::NonNullSignatureFailure);
        }
        Ok(success)
    }

    /// Verifies one Schnorr signature per set bit of `bitfield`, in key order.
    fn schnorr_multisig(
        &self,
        ctx: &ProgramContext,
        state: &mut VmState,
        bitfield: &[u8],
        keys: &[Vec<u8>],
        signatures: &[Vec<u8>],
    ) -> Result<bool, VmError> {
        if bitfield.len() != keys.len().div_ceil(8) {
            return Err(VmError::InvalidSchnorrBitfield);
        }
        let bits = bitfield
            .iter()
            .rev()
            .fold(0u32, |acc, &byte| (acc << 8) | u32::from(byte));
        if bits >> keys.len() != 0 || bits.count_ones() as usize != signatures.len() {
            return Err(VmError::InvalidSchnorrBitfield);
        }

        let mut pending = signatures.iter();
        for (index, public_key) in keys.iter().enumerate() {
            if bits & (1 << index) == 0 {
                continue;
            }
            let Some(signature) = pending.next() else {
                return Err(VmError::InvalidSchnorrBitfield);
            };
            if signature.len() != SCHNORR_SIGNATURE_LEN + 1 {
                return Err(VmError::InvalidSignatureEncoding);
            }
            if !self.verify_transaction_signature(ctx, state, signature, public_key)? {
                return Err(VmError::NonNullSignatureFailure);
            }
        }
        state
            .metrics
            .record_signature_checks(signatures.len() as u64, &self.config);
        Ok(true)
    }
}
