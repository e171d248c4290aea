//! BCH signing serialization.
//!
//! Builds the message committed to by `OP_CHECKSIG`-family opcodes. The
//! serialization follows the replay-protected (`FORKID`) algorithm:
//!
//! ```text
//! version || hashPrevouts || [hashUtxos] || hashSequence || outpoint ||
//! coveredBytecode || value || sequence || hashOutputs || locktime || type
//! ```
//!
//! `hashUtxos` is only present when the `UTXOS` flag is set.

use crate::core::transaction::{Output, Transaction};
use crate::types::encoding::{Encode, EncodeSink};
use crate::types::hash::{HashBuilder, SHA256_LEN};

/// Errors produced while building a signing serialization.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SighashError {
    #[error("input index {index} is out of range for a transaction with {inputs} inputs")]
    InputIndexOutOfRange { index: usize, inputs: usize },
    #[error("expected {expected} source outputs, got {actual}")]
    SourceOutputCountMismatch { expected: usize, actual: usize },
    #[error("invalid signing serialization type 0x{0:02x}")]
    InvalidType(u8),
}

/// Signing serialization type byte appended to every transaction signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SighashType(u8);

impl SighashType {
    pub const ALL: u8 = 0x01;
    pub const NONE: u8 = 0x02;
    pub const SINGLE: u8 = 0x03;
    pub const UTXOS: u8 = 0x20;
    pub const FORKID: u8 = 0x40;
    pub const ANYONECANPAY: u8 = 0x80;

    const BASE_MASK: u8 = 0x1f;

    /// `ALL | FORKID`, the default type for wallet signatures.
    pub const fn all() -> Self {
        Self(Self::ALL | Self::FORKID)
    }

    /// Validates a type byte.
    ///
    /// The base type must be `ALL`, `NONE` or `SINGLE`, `FORKID` must be set,
    /// and `UTXOS` cannot be combined with `ANYONECANPAY`.
    pub fn from_byte(byte: u8) -> Result<Self, SighashError> {
        let base = byte & Self::BASE_MASK;
        let known = Self::BASE_MASK | Self::UTXOS | Self::FORKID | Self::ANYONECANPAY;
        let valid = (Self::ALL..=Self::SINGLE).contains(&base)
            && byte & Self::FORKID != 0
            && byte & !known == 0
            && !(byte & Self::UTXOS != 0 && byte & Self::ANYONECANPAY != 0);
        if valid {
            Ok(Self(byte))
        } else {
            Err(SighashError::InvalidType(byte))
        }
    }

    pub const fn byte(self) -> u8 {
        self.0
    }

    fn base(self) -> u8 {
        self.0 & Self::BASE_MASK
    }

    fn anyone_can_pay(self) -> bool {
        self.0 & Self::ANYONECANPAY != 0
    }

    fn utxos(self) -> bool {
        self.0 & Self::UTXOS != 0
    }
}

/// Inputs to a signing serialization.
pub struct SigningContext<'a> {
    pub transaction: &'a Transaction,
    pub source_outputs: &'a [Output],
    pub input_index: usize,
}

impl SigningContext<'_> {
    /// Serializes the message covered by a signature of type `sighash_type`.
    ///
    /// `covered_bytecode` is the active bytecode of the evaluation.
    pub fn serialize(
        &self,
        covered_bytecode: &[u8],
        sighash_type: SighashType,
    ) -> Result<Vec<u8>, SighashError> {
        let mut out = Vec::new();
        self.write(&mut out, covered_bytecode, sighash_type)?;
        Ok(out)
    }

    /// `HASH256` of the serialization, the message hash passed to verification.
    pub fn message_hash(
        &self,
        covered_bytecode: &[u8],
        sighash_type: SighashType,
    ) -> Result<[u8; SHA256_LEN], SighashError> {
        let mut builder = HashBuilder::new();
        self.write(&mut builder, covered_bytecode, sighash_type)?;
        Ok(builder.finalize_double())
    }

    fn write<S: EncodeSink>(
        &self,
        out: &mut S,
        covered_bytecode: &[u8],
        sighash_type: SighashType,
    ) -> Result<(), SighashError> {
        let tx = self.transaction;
        let input = tx
            .inputs
            .get(self.input_index)
            .ok_or(SighashError::InputIndexOutOfRange {
                index: self.input_index,
                inputs: tx.inputs.len(),
            })?;
        if self.source_outputs.len() != tx.inputs.len() {
            return Err(SighashError::SourceOutputCountMismatch {
                expected: tx.inputs.len(),
                actual: self.source_outputs.len(),
            });
        }
        let spent = &self.source_outputs[self.input_index];

        tx.version.encode(out);
        self.hash_prevouts(sighash_type).encode(out);
        if sighash_type.utxos() {
            self.hash_utxos().encode(out);
        }
        self.hash_sequence(sighash_type).encode(out);
        input.outpoint.encode(out);
        covered_bytecode.encode(out);
        spent.value.encode(out);
        input.sequence_number.encode(out);
        self.hash_outputs(sighash_type).encode(out);
        tx.locktime.encode(out);
        u32::from(sighash_type.byte()).encode(out);
        Ok(())
    }

    fn hash_prevouts(&self, sighash_type: SighashType) -> [u8; SHA256_LEN] {
        if sighash_type.anyone_can_pay() {
            return [0; SHA256_LEN];
        }
        let mut builder = HashBuilder::new();
        for input in &self.transaction.inputs {
            input.outpoint.encode(&mut builder);
        }
        builder.finalize_double()
    }

    fn hash_utxos(&self) -> [u8; SHA256_LEN] {
        let mut builder = HashBuilder::new();
        for output in self.source_outputs {
            output.encode(&mut builder);
        }
        builder.finalize_double()
    }

    fn hash_sequence(&self, sighash_type: SighashType) -> [u8; SHA256_LEN] {
        if sighash_type.anyone_can_pay() || sighash_type.base() != SighashType::ALL {
            return [0; SHA256_LEN];
        }
        let mut builder = HashBuilder::new();
        for input in &self.transaction.inputs {
            input.sequence_number.encode(&mut builder);
        }
        builder.finalize_double()
    }

    fn hash_outputs(&self, sighash_type: SighashType) -> [u8; SHA256_LEN] {
        let outputs = &self.transaction.outputs;
        match sighash_type.base() {
            SighashType::ALL => {
                let mut builder = HashBuilder::new();
                for output in outputs {
                    output.encode(&mut builder);
                }
                builder.finalize_double()
            }
            SighashType::SINGLE if self.input_index < outputs.len() => {
                let mut builder = HashBuilder::new();
                outputs[self.input_index].encode(&mut builder);
                builder.finalize_double()
            }
            _ => [0; SHA256_LEN],
        }
    }
}
