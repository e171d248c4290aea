use crate::core::sighash::SigningContext;
use crate::core::transaction::{self, Input, Output, Transaction};
use crate::virtual_machine::errors::VmError;

/// Read-only transaction context of an evaluation.
///
/// Evaluations never mutate it, so one context may back any number of
/// concurrent evaluations.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProgramContext {
    pub transaction: Transaction,
    /// Outputs spent by each input, in input order.
    pub source_outputs: Vec<Output>,
    pub input_index: usize,
}

impl ProgramContext {
    pub fn new(transaction: Transaction, source_outputs: Vec<Output>, input_index: usize) -> Self {
        Self {
            transaction,
            source_outputs,
            input_index,
        }
    }

    /// Single-input, single-output transaction spending `locking_bytecode`.
    pub fn single_input(unlocking_bytecode: Vec<u8>, locking_bytecode: Vec<u8>) -> Self {
        let transaction = Transaction {
            version: 2,
            inputs: vec![Input {
                unlocking_bytecode,
                sequence_number: 0,
                ..Input::default()
            }],
            outputs: vec![Output {
                value: 0,
                locking_bytecode: Vec::new(),
            }],
            locktime: 0,
        };
        let source_outputs = vec![Output {
            value: 10_000,
            locking_bytecode,
        }];
        Self::new(transaction, source_outputs, 0)
    }

    pub fn input(&self) -> Result<&Input, VmError> {
        self.transaction
            .inputs
            .get(self.input_index)
            .ok_or(VmError::MissingTransactionContext)
    }

    pub fn source_output(&self) -> Result<&Output, VmError> {
        self.source_outputs
            .get(self.input_index)
            .ok_or(VmError::MissingTransactionContext)
    }

    /// Serialized size of the evaluated input, or of a bare input carrying
    /// `fallback_len` bytes when the context has no such input.
    pub fn density_control_length(&self, fallback_len: usize) -> u64 {
        match self.input() {
            Ok(input) => input.density_control_length() as u64,
            Err(_) => transaction::density_control_length(fallback_len) as u64,
        }
    }

    pub fn signing_context(&self) -> SigningContext<'_> {
        SigningContext {
            transaction: &self.transaction,
            source_outputs: &self.source_outputs,
            input_index: self.input_index,
        }
    }
}
