//! Read-only transaction context consumed by the VM.
//!
//! Only the fields an evaluation can observe are modelled: outpoints,
//! unlocking bytecode, sequence numbers, outputs, version and locktime.
//! Token prefixes are not represented.

use crate::types::encoding::{CompactSize, Encode, EncodeSink, compact_size_len};
use crate::types::hash::{HashBuilder, SHA256_LEN};

/// Reference to an output of a previous transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Outpoint {
    /// Transaction hash in its serialized (little-endian) byte order.
    pub transaction_hash: [u8; SHA256_LEN],
    pub index: u32,
}

/// Transaction input spending an [`Outpoint`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Input {
    pub outpoint: Outpoint,
    pub unlocking_bytecode: Vec<u8>,
    pub sequence_number: u32,
}

/// Transaction output: a value in satoshis locked by bytecode.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Output {
    pub value: u64,
    pub locking_bytecode: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    pub locktime: u32,
}

impl Encode for Outpoint {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.transaction_hash.encode(out);
        self.index.encode(out);
    }
}

impl Encode for Input {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.outpoint.encode(out);
        self.unlocking_bytecode.encode(out);
        self.sequence_number.encode(out);
    }
}

impl Encode for Output {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.value.encode(out);
        self.locking_bytecode.encode(out);
    }
}

impl Encode for Transaction {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.version.encode(out);
        CompactSize(self.inputs.len() as u64).encode(out);
        for input in &self.inputs {
            input.encode(out);
        }
        CompactSize(self.outputs.len() as u64).encode(out);
        for output in &self.outputs {
            output.encode(out);
        }
        self.locktime.encode(out);
    }
}

impl Input {
    /// Serialized size of this input, which scales its evaluation budget.
    pub fn density_control_length(&self) -> usize {
        density_control_length(self.unlocking_bytecode.len())
    }
}

impl Transaction {
    /// Double SHA-256 of the serialized transaction, in serialized byte order.
    pub fn hash(&self) -> [u8; SHA256_LEN] {
        let mut builder = HashBuilder::new();
        self.encode(&mut builder);
        builder.finalize_double()
    }
}

/// Serialized size of an input carrying `unlocking_len` bytes of unlocking bytecode.
///
/// Outpoint (36 bytes), compact-size length, the bytecode, and the 4-byte
/// sequence number.
pub fn density_control_length(unlocking_len: usize) -> usize {
    36 + compact_size_len(unlocking_len as u64) + unlocking_len + 4
}
