//! Time-lock and native transaction introspection opcodes.

use super::Vm;
use crate::crypto::key_pair::Secp256k1;
use crate::virtual_machine::errors::VmError;
use crate::virtual_machine::isa::Opcode;
use crate::virtual_machine::number;
use crate::virtual_machine::state::VmState;
use crate::virtual_machine::vm::context::ProgramContext;
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive};

/// Locktimes below this value are block heights, above it timestamps.
const LOCKTIME_THRESHOLD: i64 = 500_000_000;
const SEQUENCE_FINAL: u32 = 0xffff_ffff;
const SEQUENCE_DISABLE_FLAG: i64 = 1 << 31;
const SEQUENCE_TYPE_FLAG: i64 = 1 << 22;
const SEQUENCE_VALUE_MASK: i64 = 0x0000_ffff;
/// Time-lock operands may be up to 5 bytes, one more than a 32-bit number.
const LOCKTIME_NUMBER_LENGTH: usize = 5;

impl<C: Secp256k1> Vm<C> {
    /// Reads the time-lock operand on top of the stack without popping it.
    fn peek_locktime(&self, state: &VmState) -> Result<i64, VmError> {
        let bytes = self.peek(state, 0)?;
        let value = number::decode(&bytes, LOCKTIME_NUMBER_LENGTH, true)?;
        if value.is_negative() {
            return Err(VmError::NegativeNumber);
        }
        value.to_i64().ok_or(VmError::NumberOverflow {
            limit: LOCKTIME_NUMBER_LENGTH,
        })
    }

    pub(super) fn op_check_locktime(
        &self,
        ctx: &ProgramContext,
        state: &mut VmState,
    ) -> Result<(), VmError> {
        let required = self.peek_locktime(state)?;
        let input = ctx.input()?;
        let locktime = i64::from(ctx.transaction.locktime);
        if (required < LOCKTIME_THRESHOLD) != (locktime < LOCKTIME_THRESHOLD) {
            return Err(VmError::LocktimeTypeMismatch);
        }
        if required > locktime {
            return Err(VmError::UnsatisfiedLocktime);
        }
        if input.sequence_number == SEQUENCE_FINAL {
            return Err(VmError::LocktimeDisabled);
        }
        Ok(())
    }

    pub(super) fn op_check_sequence(
        &self,
        ctx: &ProgramContext,
        state: &mut VmState,
    ) -> Result<(), VmError> {
        let required = self.peek_locktime(state)?;
        if required & SEQUENCE_DISABLE_FLAG != 0 {
            return Ok(());
        }
        let input = ctx.input()?;
        let sequence = i64::from(input.sequence_number);
        if ctx.transaction.version < 2 || sequence & SEQUENCE_DISABLE_FLAG != 0 {
            return Err(VmError::UnsatisfiedSequenceNumber);
        }
        let mask = SEQUENCE_TYPE_FLAG | SEQUENCE_VALUE_MASK;
        let (required, sequence) = (required & mask, sequence & mask);
        if required & SEQUENCE_TYPE_FLAG != sequence & SEQUENCE_TYPE_FLAG {
            return Err(VmError::LocktimeTypeMismatch);
        }
        if required > sequence {
            return Err(VmError::UnsatisfiedSequenceNumber);
        }
        Ok(())
    }

    /// Pops an index into a list of `count` inputs or outputs.
    fn pop_introspection_index(&self, state: &mut VmState, count: usize) -> Result<usize, VmError> {
        let index = self.pop_number(state)?;
        index
            .to_usize()
            .filter(|&i| i < count)
            .ok_or(VmError::InvalidIntrospectionIndex {
                index: index.to_i64().unwrap_or(i64::MAX),
            })
    }

    pub(super) fn op_introspect(
        &self,
        ctx: &ProgramContext,
        state: &mut VmState,
        opcode: Opcode,
    ) -> Result<(), VmError> {
        ctx.input()?;
        let tx = &ctx.transaction;
        match opcode {
            Opcode::InputIndex => self.push_number(state, &BigInt::from(ctx.input_index)),
            Opcode::ActiveBytecode => {
                let bytecode = state.active_bytecode();
                self.push(state, bytecode)
            }
            Opcode::TxVersion => self.push_number(state, &BigInt::from(tx.version)),
            Opcode::TxInputCount => self.push_number(state, &BigInt::from(tx.inputs.len())),
            Opcode::TxOutputCount => self.push_number(state, &BigInt::from(tx.outputs.len())),
            Opcode::TxLocktime => self.push_number(state, &BigInt::from(tx.locktime)),
            Opcode::UtxoValue | Opcode::UtxoBytecode => {
                let index = self.pop_introspection_index(state, tx.inputs.len())?;
                let utxo = ctx
                    .source_outputs
                    .get(index)
                    .ok_or(VmError::MissingTransactionContext)?;
                if opcode == Opcode::UtxoValue {
                    self.push_number(state, &BigInt::from(utxo.value))
                } else {
                    self.push(state, utxo.locking_bytecode.clone())
                }
            }
            Opcode::OutpointTxHash
            | Opcode::OutpointIndex
            | Opcode::InputBytecode
            | Opcode::InputSequenceNumber => {
                let index = self.pop_introspection_index(state, tx.inputs.len())?;
                let input = &tx.inputs[index];
                match opcode {
                    Opcode::OutpointTxHash => {
                        self.push(state, input.outpoint.transaction_hash.to_vec())
                    }
                    Opcode::OutpointIndex => {
                        self.push_number(state, &BigInt::from(input.outpoint.index))
                    }
                    Opcode::InputBytecode => self.push(state, input.unlocking_bytecode.clone()),
                    _ => self.push_number(state, &BigInt::from(input.sequence_number)),
                }
            }
            Opcode::OutputValue | Opcode::OutputBytecode => {
                let index = self.pop_introspection_index(state, tx.outputs.len())?;
                let output = &tx.outputs[index];
                if opcode == Opcode::OutputValue {
                    self.push_number(state, &BigInt::from(output.value))
                } else {
                    self.push(state, output.locking_bytecode.clone())
                }
            }
            _ => Err(VmError::UnknownOpcode {
                opcode: opcode.byte(),
            }),
        }
    }
}
