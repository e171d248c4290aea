//! Evaluation state machine.
//!
//! [`Vm::step`] is a pure function from one [`VmState`] to the next: it
//! evaluates the instruction at the instruction pointer, charges its
//! operation cost, and checks every limit. Failures never escape a step; they
//! are stored in the returned snapshot, which halts the evaluation.
//!
//! ```text
//! Idle ──step──> Running ──step──> ... ──> Success | Error
//! ```
//!
//! [`Vm::debug`] collects every snapshot into a trace and appends one final
//! copy of the last state carrying the completion verdict.

pub mod config;
pub mod context;
mod crypto;
mod introspection;
pub mod metrics;
#[cfg(test)]
mod tests;

use crate::crypto::key_pair::{K256, Secp256k1};
use crate::virtual_machine::errors::VmError;
use crate::virtual_machine::instruction::{Instruction, parse};
use crate::virtual_machine::isa::{MAX_PUSH_ONLY_OPCODE, Opcode};
use crate::virtual_machine::number;
use crate::virtual_machine::state::{ControlMarker, VmState};
use config::VmConfig;
use context::ProgramContext;
use metrics::{CostCategory, Metrics};
use num_bigint::BigInt;
use num_traits::{One, Signed, ToPrimitive, Zero};
use std::sync::Arc;

/// How strictly [`Vm::debug`] judges a completed evaluation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Completion {
    /// The stack must hold exactly one truthy item.
    Final,
    /// Only the control stack must be balanced; used for unlocking bytecode
    /// and compile-time evaluations.
    Partial,
}

/// Script virtual machine.
///
/// Holds only the evaluation policy and the signature oracle; all evaluation
/// state lives in [`VmState`] snapshots, so one `Vm` can serve concurrent
/// evaluations.
#[derive(Clone, Debug, Default)]
pub struct Vm<C: Secp256k1 = K256> {
    config: VmConfig,
    crypto: C,
}

impl Vm<K256> {
    pub fn new(config: VmConfig) -> Self {
        Self {
            config,
            crypto: K256,
        }
    }
}

impl<C: Secp256k1> Vm<C> {
    /// Creates a VM verifying signatures with `crypto`.
    pub fn with_crypto(config: VmConfig, crypto: C) -> Self {
        Self { config, crypto }
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Initial snapshot for evaluating `bytecode` on an empty stack.
    ///
    /// Budgets derive from the density control length of the context's input.
    pub fn initial_state(&self, bytecode: &[u8], ctx: &ProgramContext) -> VmState {
        let metrics = Metrics::new(ctx.density_control_length(bytecode.len()), &self.config);
        self.initial_state_with(bytecode, Vec::new(), metrics)
    }

    /// Initial snapshot continuing from `stack` and `metrics` of an earlier phase.
    pub fn initial_state_with(
        &self,
        bytecode: &[u8],
        stack: Vec<Vec<u8>>,
        metrics: Metrics,
    ) -> VmState {
        let mut state = VmState::new(parse(bytecode), stack, metrics);
        let limit = self.config.limits.max_bytecode_length;
        if bytecode.len() > limit {
            state.error = Some(VmError::ExceededMaximumBytecodeLength { limit });
        }
        state
    }

    /// Evaluates one instruction, returning the next snapshot.
    ///
    /// A halted state is returned unchanged.
    pub fn step(&self, ctx: &ProgramContext, state: &VmState) -> VmState {
        let mut next = state.clone();
        self.advance(ctx, &mut next);
        next
    }

    /// Runs `state` until it halts, returning only the final snapshot.
    pub fn evaluate(&self, ctx: &ProgramContext, mut state: VmState) -> VmState {
        while !state.is_halted() {
            self.advance(ctx, &mut state);
        }
        state
    }

    /// Runs `state` until it halts, returning every snapshot.
    ///
    /// The trace ends with a duplicate of the final state; if that state had
    /// no error, the duplicate carries the verdict of [`Vm::completion_error`].
    pub fn debug(
        &self,
        ctx: &ProgramContext,
        initial: VmState,
        completion: Completion,
    ) -> Vec<VmState> {
        let mut trace = vec![initial];
        while let Some(last) = trace.last()
            && !last.is_halted()
        {
            let next = self.step(ctx, last);
            trace.push(next);
        }
        if let Some(last) = trace.last() {
            let mut complete = last.clone();
            if complete.error.is_none() {
                complete.error = self.completion_error(&complete, completion);
            }
            trace.push(complete);
        }
        trace
    }

    /// Error that makes a halted `state` unsuccessful, if any.
    pub fn completion_error(&self, state: &VmState, completion: Completion) -> Option<VmError> {
        if let Some(error) = &state.error {
            return Some(error.clone());
        }
        if !state.control_stack.is_empty() {
            return Some(VmError::NonEmptyControlStack {
                depth: state.control_stack.len(),
            });
        }
        if completion == Completion::Partial {
            return None;
        }
        match state.stack.as_slice() {
            [top] if number::is_truthy(top) => None,
            [_] => Some(VmError::UnsuccessfulEvaluation),
            items => Some(VmError::RequiresCleanStack { found: items.len() }),
        }
    }

    /// Evaluates `bytecode` to completion and returns its verdict.
    pub fn verify(&self, ctx: &ProgramContext, bytecode: &[u8]) -> Result<(), VmError> {
        let state = self.evaluate(ctx, self.initial_state(bytecode, ctx));
        match self.completion_error(&state, Completion::Final) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn advance(&self, ctx: &ProgramContext, state: &mut VmState) {
        if state.is_halted() {
            return;
        }
        if let Err(error) = self.execute_next(ctx, state) {
            state.error = Some(error);
        }
    }

    fn execute_next(&self, ctx: &ProgramContext, state: &mut VmState) -> Result<(), VmError> {
        let instructions = Arc::clone(&state.instructions);
        let index = state.instruction_pointer;
        let Some(instruction) = instructions.get(index) else {
            return Ok(());
        };
        let executing = state.is_executing();

        state.instruction_pointer += 1;
        state.metrics.executed_instruction_count += 1;
        state
            .metrics
            .charge(CostCategory::Base, self.config.costs.base_instruction_cost);

        match instruction {
            Instruction::MalformedPush { .. } => return Err(VmError::MalformedPush),
            Instruction::Push { data, .. } => {
                let limit = self.config.limits.max_stack_item_length;
                if data.len() > limit {
                    return Err(VmError::ExceededMaximumStackItemLength {
                        length: data.len(),
                        limit,
                    });
                }
                if executing {
                    if !instruction.is_minimal_push() {
                        return Err(VmError::NonMinimalPush);
                    }
                    self.push(state, data.clone())?;
                }
            }
            Instruction::OpcodeOnly { opcode } => {
                self.execute_opcode(ctx, state, index, *opcode, executing)?
            }
        }
        self.check_limits(state)
    }

    fn check_limits(&self, state: &mut VmState) -> Result<(), VmError> {
        let limits = &self.config.limits;
        if state.stack_depth() > limits.max_stack_depth {
            return Err(VmError::ExceededMaximumStackDepth {
                limit: limits.max_stack_depth,
            });
        }
        if let Some(limit) = limits.max_control_stack_depth
            && state.control_stack.len() > limit
        {
            return Err(VmError::ExceededMaximumControlStackDepth { limit });
        }
        let usage = state.memory_usage();
        state.metrics.observe_memory(usage);
        state.metrics.check_budgets()
    }

    fn execute_opcode(
        &self,
        ctx: &ProgramContext,
        state: &mut VmState,
        index: usize,
        byte: u8,
        executing: bool,
    ) -> Result<(), VmError> {
        if byte > MAX_PUSH_ONLY_OPCODE {
            state.operation_count += 1;
            if let Some(limit) = self.config.limits.max_operation_count
                && state.operation_count > limit
            {
                return Err(VmError::ExceededMaximumOperationCount { limit });
            }
        }
        let Some(opcode) = Opcode::decode(byte, self.config.version) else {
            return if executing {
                Err(VmError::UnknownOpcode { opcode: byte })
            } else {
                Ok(())
            };
        };
        if opcode.is_disabled() {
            return Err(VmError::DisabledOpcode {
                opcode: opcode.mnemonic(),
            });
        }
        if matches!(opcode, Opcode::Verif | Opcode::VerNotIf) {
            return Err(VmError::CalledReserved {
                opcode: opcode.mnemonic(),
            });
        }
        if !executing && !opcode.is_conditional() {
            return Ok(());
        }

        match opcode {
            // Pushes are decoded as `Instruction::Push`.
            Opcode::Op0 | Opcode::PushData1 | Opcode::PushData2 | Opcode::PushData4 => {
                Err(VmError::MalformedPush)
            }
            Opcode::Op1Negate => self.push_number(state, &BigInt::from(-1)),
            Opcode::Op1
            | Opcode::Op2
            | Opcode::Op3
            | Opcode::Op4
            | Opcode::Op5
            | Opcode::Op6
            | Opcode::Op7
            | Opcode::Op8
            | Opcode::Op9
            | Opcode::Op10
            | Opcode::Op11
            | Opcode::Op12
            | Opcode::Op13
            | Opcode::Op14
            | Opcode::Op15
            | Opcode::Op16 => {
                let value = opcode.byte() - Opcode::Op1.byte() + 1;
                self.push_number(state, &BigInt::from(value))
            }
            Opcode::Reserved
            | Opcode::Ver
            | Opcode::Reserved1
            | Opcode::Reserved2
            | Opcode::Verif
            | Opcode::VerNotIf => Err(VmError::CalledReserved {
                opcode: opcode.mnemonic(),
            }),
            Opcode::Nop => Ok(()),
            Opcode::Nop1
            | Opcode::Nop4
            | Opcode::Nop5
            | Opcode::Nop6
            | Opcode::Nop7
            | Opcode::Nop8
            | Opcode::Nop9
            | Opcode::Nop10 => {
                if self.config.standard {
                    Err(VmError::CalledUpgradableNop {
                        opcode: opcode.mnemonic(),
                    })
                } else {
                    Ok(())
                }
            }

            Opcode::If | Opcode::NotIf => self.op_if(state, executing, opcode == Opcode::NotIf),
            Opcode::Else => self.op_else(state),
            Opcode::EndIf => self.op_end_if(state),
            Opcode::Begin => {
                state.control_stack.push(ControlMarker::Loop { begin: index + 1 });
                Ok(())
            }
            Opcode::Until => self.op_until(state, index, executing),
            Opcode::Verify => self.verify_top(state, opcode),
            Opcode::Return => Err(VmError::CalledReturn),

            Opcode::ToAltStack
            | Opcode::FromAltStack
            | Opcode::Op2Drop
            | Opcode::Op2Dup
            | Opcode::Op3Dup
            | Opcode::Op2Over
            | Opcode::Op2Rot
            | Opcode::Op2Swap
            | Opcode::IfDup
            | Opcode::Depth
            | Opcode::Drop
            | Opcode::Dup
            | Opcode::Nip
            | Opcode::Over
            | Opcode::Pick
            | Opcode::Roll
            | Opcode::Rot
            | Opcode::Swap
            | Opcode::Tuck => self.op_stack(state, opcode),

            Opcode::Cat
            | Opcode::Split
            | Opcode::Num2Bin
            | Opcode::Bin2Num
            | Opcode::Size
            | Opcode::ReverseBytes => self.op_splice(state, opcode),

            Opcode::And | Opcode::Or | Opcode::Xor => self.op_bitwise(state, opcode),
            Opcode::Equal | Opcode::EqualVerify => {
                let b = self.pop(state)?;
                let a = self.pop(state)?;
                if opcode == Opcode::EqualVerify {
                    return require(a == b, opcode);
                }
                self.push_bool(state, a == b)
            }

            Opcode::Op1Add
            | Opcode::Op1Sub
            | Opcode::Negate
            | Opcode::Abs
            | Opcode::Not
            | Opcode::Op0NotEqual => self.op_unary(state, opcode),
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::BoolAnd
            | Opcode::BoolOr
            | Opcode::NumEqual
            | Opcode::NumEqualVerify
            | Opcode::NumNotEqual
            | Opcode::LessThan
            | Opcode::GreaterThan
            | Opcode::LessThanOrEqual
            | Opcode::GreaterThanOrEqual
            | Opcode::Min
            | Opcode::Max => self.op_binary(state, opcode),
            Opcode::Within => self.op_within(state),

            Opcode::Ripemd160
            | Opcode::Sha1
            | Opcode::Sha256
            | Opcode::Hash160
            | Opcode::Hash256 => self.op_hash(state, opcode),
            Opcode::CodeSeparator => {
                state.last_code_separator_index = Some(index);
                Ok(())
            }
            Opcode::CheckSig | Opcode::CheckSigVerify => self.op_check_sig(ctx, state, opcode),
            Opcode::CheckMultiSig | Opcode::CheckMultiSigVerify => {
                self.op_check_multisig(ctx, state, opcode)
            }
            Opcode::CheckDataSig | Opcode::CheckDataSigVerify => {
                self.op_check_data_sig(state, opcode)
            }

            Opcode::CheckLockTimeVerify => self.op_check_locktime(ctx, state),
            Opcode::CheckSequenceVerify => self.op_check_sequence(ctx, state),
            Opcode::InputIndex
            | Opcode::ActiveBytecode
            | Opcode::TxVersion
            | Opcode::TxInputCount
            | Opcode::TxOutputCount
            | Opcode::TxLocktime
            | Opcode::UtxoValue
            | Opcode::UtxoBytecode
            | Opcode::OutpointTxHash
            | Opcode::OutpointIndex
            | Opcode::InputBytecode
            | Opcode::InputSequenceNumber
            | Opcode::OutputValue
            | Opcode::OutputBytecode => self.op_introspect(ctx, state, opcode),

            Opcode::Invert
            | Opcode::Op2Mul
            | Opcode::Op2Div
            | Opcode::LShift
            | Opcode::RShift => Err(VmError::DisabledOpcode {
                opcode: opcode.mnemonic(),
            }),
        }
    }

    // ---------------------------------------------------------------------
    // Stack helpers
    // ---------------------------------------------------------------------

    fn pop(&self, state: &mut VmState) -> Result<Vec<u8>, VmError> {
        state.stack.pop().ok_or(VmError::EmptyStack)
    }

    /// Copy of the item `depth` positions below the top.
    fn peek(&self, state: &VmState, depth: usize) -> Result<Vec<u8>, VmError> {
        let index = self.index_from_top(state, depth)?;
        Ok(state.stack[index].clone())
    }

    fn index_from_top(&self, state: &VmState, depth: usize) -> Result<usize, VmError> {
        state
            .stack
            .len()
            .checked_sub(depth + 1)
            .ok_or(VmError::EmptyStack)
    }

    fn require_depth(&self, state: &VmState, depth: usize) -> Result<(), VmError> {
        if state.stack.len() < depth {
            return Err(VmError::EmptyStack);
        }
        Ok(())
    }

    /// Pushes a new item, charging its bytes.
    fn push(&self, state: &mut VmState, item: Vec<u8>) -> Result<(), VmError> {
        let limit = self.config.limits.max_stack_item_length;
        if item.len() > limit {
            return Err(VmError::ExceededMaximumStackItemLength {
                length: item.len(),
                limit,
            });
        }
        state.metrics.record_push(item.len(), &self.config);
        state.stack.push(item);
        Ok(())
    }

    fn push_bool(&self, state: &mut VmState, value: bool) -> Result<(), VmError> {
        self.push(state, if value { vec![1] } else { Vec::new() })
    }

    fn push_number(&self, state: &mut VmState, value: &BigInt) -> Result<(), VmError> {
        let bytes = number::encode(value);
        let limit = self.config.limits.max_number_length;
        if bytes.len() > limit {
            return Err(VmError::NumberOverflow { limit });
        }
        self.push(state, bytes)
    }

    fn pop_number(&self, state: &mut VmState) -> Result<BigInt, VmError> {
        self.pop_number_with_len(state).map(|(value, _)| value)
    }

    fn pop_number_with_len(&self, state: &mut VmState) -> Result<(BigInt, usize), VmError> {
        let bytes = self.pop(state)?;
        let value = number::decode(&bytes, self.config.limits.max_number_length, true)?;
        Ok((value, bytes.len()))
    }

    /// Pops a stack index for `OP_PICK`/`OP_ROLL`, counted from the top.
    fn pop_stack_index(&self, state: &mut VmState) -> Result<usize, VmError> {
        let value = self.pop_number(state)?;
        let depth = state.stack.len();
        match value.to_i64() {
            Some(index) if index >= 0 && (index as usize) < depth => Ok(index as usize),
            index => Err(VmError::InvalidStackIndex {
                index: index.unwrap_or(i64::MAX),
                depth,
            }),
        }
    }

    /// Pops the top item and fails unless it is truthy.
    fn verify_top(&self, state: &mut VmState, opcode: Opcode) -> Result<(), VmError> {
        let top = self.pop(state)?;
        require(number::is_truthy(&top), opcode)
    }

    // ---------------------------------------------------------------------
    // Flow control
    // ---------------------------------------------------------------------

    fn op_if(&self, state: &mut VmState, executing: bool, negate: bool) -> Result<(), VmError> {
        let branch = if executing {
            let condition = self.pop(state)?;
            number::is_truthy(&condition) != negate
        } else {
            false
        };
        state
            .control_stack
            .push(ControlMarker::If { executing: branch });
        Ok(())
    }

    fn op_else(&self, state: &mut VmState) -> Result<(), VmError> {
        match state.control_stack.last_mut() {
            Some(marker @ ControlMarker::If { .. }) => {
                *marker = ControlMarker::Else {
                    executing: !marker.is_executing(),
                };
                Ok(())
            }
            Some(ControlMarker::Else { .. }) => Err(VmError::RepeatedElse),
            Some(ControlMarker::Loop { .. }) | None => Err(VmError::UnexpectedElse),
        }
    }

    fn op_end_if(&self, state: &mut VmState) -> Result<(), VmError> {
        match state.control_stack.last() {
            Some(ControlMarker::If { .. } | ControlMarker::Else { .. }) => {
                state.control_stack.pop();
                Ok(())
            }
            Some(ControlMarker::Loop { .. }) | None => Err(VmError::UnexpectedEndIf),
        }
    }

    /// Closes or repeats the innermost loop.
    ///
    /// A falsy condition jumps back to the loop body and charges every
    /// repeated byte, so total loop work stays within the operation budget.
    fn op_until(&self, state: &mut VmState, index: usize, executing: bool) -> Result<(), VmError> {
        let Some(&ControlMarker::Loop { begin }) = state.control_stack.last() else {
            return Err(VmError::UnexpectedUntil);
        };
        if !executing {
            state.control_stack.pop();
            return Ok(());
        }
        let condition = self.pop(state)?;
        if number::is_truthy(&condition) {
            state.control_stack.pop();
            return Ok(());
        }
        let repeated: usize = state.instructions[begin..=index]
            .iter()
            .map(Instruction::encoded_len)
            .sum();
        state.metrics.record_repeated(repeated, &self.config);
        state.instruction_pointer = begin;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Stack operations
    // ---------------------------------------------------------------------

    fn op_stack(&self, state: &mut VmState, opcode: Opcode) -> Result<(), VmError> {
        match opcode {
            Opcode::ToAltStack => {
                let item = self.pop(state)?;
                state.alt_stack.push(item);
            }
            Opcode::FromAltStack => {
                let item = state.alt_stack.pop().ok_or(VmError::EmptyAlternateStack)?;
                self.push(state, item)?;
            }
            Opcode::Op2Drop => {
                self.require_depth(state, 2)?;
                state.stack.truncate(state.stack.len() - 2);
            }
            Opcode::Op2Dup => {
                let a = self.peek(state, 1)?;
                let b = self.peek(state, 0)?;
                self.push(state, a)?;
                self.push(state, b)?;
            }
            Opcode::Op3Dup => {
                let a = self.peek(state, 2)?;
                let b = self.peek(state, 1)?;
                let c = self.peek(state, 0)?;
                self.push(state, a)?;
                self.push(state, b)?;
                self.push(state, c)?;
            }
            Opcode::Op2Over => {
                let a = self.peek(state, 3)?;
                let b = self.peek(state, 2)?;
                self.push(state, a)?;
                self.push(state, b)?;
            }
            Opcode::Op2Rot => {
                self.require_depth(state, 6)?;
                let start = state.stack.len() - 6;
                let moved: Vec<_> = state.stack.drain(start..start + 2).collect();
                state.stack.extend(moved);
            }
            Opcode::Op2Swap => {
                self.require_depth(state, 4)?;
                let len = state.stack.len();
                state.stack.swap(len - 4, len - 2);
                state.stack.swap(len - 3, len - 1);
            }
            Opcode::IfDup => {
                let top = self.peek(state, 0)?;
                if number::is_truthy(&top) {
                    self.push(state, top)?;
                }
            }
            Opcode::Depth => {
                let depth = BigInt::from(state.stack.len());
                self.push_number(state, &depth)?;
            }
            Opcode::Drop => {
                self.pop(state)?;
            }
            Opcode::Dup => {
                let top = self.peek(state, 0)?;
                self.push(state, top)?;
            }
            Opcode::Nip => {
                let index = self.index_from_top(state, 1)?;
                state.stack.remove(index);
            }
            Opcode::Over => {
                let item = self.peek(state, 1)?;
                self.push(state, item)?;
            }
            Opcode::Pick => {
                let depth = self.pop_stack_index(state)?;
                let item = self.peek(state, depth)?;
                self.push(state, item)?;
            }
            Opcode::Roll => {
                let depth = self.pop_stack_index(state)?;
                let index = self.index_from_top(state, depth)?;
                let item = state.stack.remove(index);
                state.stack.push(item);
            }
            Opcode::Rot => {
                let index = self.index_from_top(state, 2)?;
                let item = state.stack.remove(index);
                state.stack.push(item);
            }
            Opcode::Swap => {
                let index = self.index_from_top(state, 1)?;
                state.stack.swap(index, index + 1);
            }
            Opcode::Tuck => {
                let index = self.index_from_top(state, 1)?;
                let top = self.peek(state, 0)?;
                state.metrics.record_push(top.len(), &self.config);
                state.stack.insert(index, top);
            }
            _ => return Err(VmError::UnknownOpcode { opcode: opcode.byte() }),
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Splice and bitwise operations
    // ---------------------------------------------------------------------

    fn op_splice(&self, state: &mut VmState, opcode: Opcode) -> Result<(), VmError> {
        match opcode {
            Opcode::Cat => {
                let b = self.pop(state)?;
                let mut a = self.pop(state)?;
                a.extend_from_slice(&b);
                self.push(state, a)
            }
            Opcode::Split => {
                let position = self.pop_number(state)?;
                let data = self.pop(state)?;
                let split = position
                    .to_usize()
                    .filter(|&index| index <= data.len())
                    .ok_or(VmError::InvalidSplitIndex {
                        index: position.to_i64().unwrap_or(i64::MAX),
                        length: data.len(),
                    })?;
                let (left, right) = data.split_at(split);
                self.push(state, left.to_vec())?;
                self.push(state, right.to_vec())
            }
            Opcode::Num2Bin => {
                let size = self.pop_number(state)?;
                let value = number::decode_unchecked(&self.pop(state)?);
                if size.is_negative() {
                    return Err(VmError::NegativeNumber);
                }
                let limit = self.config.limits.max_stack_item_length;
                let size = size.to_usize().unwrap_or(usize::MAX);
                if size > limit {
                    return Err(VmError::ExceededMaximumStackItemLength {
                        length: size,
                        limit,
                    });
                }
                let padded = number::pad(&value, size)?;
                self.push(state, padded)
            }
            Opcode::Bin2Num => {
                let minimized = number::minimize(&self.pop(state)?);
                let limit = self.config.limits.max_number_length;
                if minimized.len() > limit {
                    return Err(VmError::NumberOverflow { limit });
                }
                self.push(state, minimized)
            }
            Opcode::Size => {
                let length = BigInt::from(self.peek(state, 0)?.len());
                self.push_number(state, &length)
            }
            Opcode::ReverseBytes => {
                let mut item = self.pop(state)?;
                item.reverse();
                self.push(state, item)
            }
            _ => Err(VmError::UnknownOpcode { opcode: opcode.byte() }),
        }
    }

    fn op_bitwise(&self, state: &mut VmState, opcode: Opcode) -> Result<(), VmError> {
        let b = self.pop(state)?;
        let a = self.pop(state)?;
        if a.len() != b.len() {
            return Err(VmError::MismatchedBitwiseOperandLength);
        }
        let combine: fn(u8, u8) -> u8 = match opcode {
            Opcode::And => |x, y| x & y,
            Opcode::Or => |x, y| x | y,
            _ => |x, y| x ^ y,
        };
        let result = a.iter().zip(&b).map(|(&x, &y)| combine(x, y)).collect();
        self.push(state, result)
    }

    // ---------------------------------------------------------------------
    // Arithmetic
    // ---------------------------------------------------------------------

    fn op_unary(&self, state: &mut VmState, opcode: Opcode) -> Result<(), VmError> {
        let (value, length) = self.pop_number_with_len(state)?;
        state
            .metrics
            .record_arithmetic(length as u64, &self.config);
        let result = match opcode {
            Opcode::Op1Add => value + BigInt::one(),
            Opcode::Op1Sub => value - BigInt::one(),
            Opcode::Negate => -value,
            Opcode::Abs => value.abs(),
            Opcode::Not => BigInt::from(u8::from(value.is_zero())),
            _ => BigInt::from(u8::from(!value.is_zero())),
        };
        self.push_number(state, &result)
    }

    fn op_binary(&self, state: &mut VmState, opcode: Opcode) -> Result<(), VmError> {
        let (b, b_len) = self.pop_number_with_len(state)?;
        let (a, a_len) = self.pop_number_with_len(state)?;
        let cost = match opcode {
            Opcode::Mul | Opcode::Div | Opcode::Mod => a_len.saturating_mul(b_len),
            _ => a_len.max(b_len),
        };
        state.metrics.record_arithmetic(cost as u64, &self.config);

        let flag = |value: bool| BigInt::from(u8::from(value));
        let result = match opcode {
            Opcode::Add => a + b,
            Opcode::Sub => a - b,
            Opcode::Mul => a * b,
            Opcode::Div | Opcode::Mod if b.is_zero() => return Err(VmError::DivisionByZero),
            Opcode::Div => a / b,
            Opcode::Mod => a % b,
            Opcode::BoolAnd => flag(!a.is_zero() && !b.is_zero()),
            Opcode::BoolOr => flag(!a.is_zero() || !b.is_zero()),
            Opcode::NumEqual => flag(a == b),
            Opcode::NumEqualVerify => return require(a == b, opcode),
            Opcode::NumNotEqual => flag(a != b),
            Opcode::LessThan => flag(a < b),
            Opcode::GreaterThan => flag(a > b),
            Opcode::LessThanOrEqual => flag(a <= b),
            Opcode::GreaterThanOrEqual => flag(a >= b),
            Opcode::Min => a.min(b),
            _ => a.max(b),
        };
        self.push_number(state, &result)
    }

    fn op_within(&self, state: &mut VmState) -> Result<(), VmError> {
        let (max, max_len) = self.pop_number_with_len(state)?;
        let (min, min_len) = self.pop_number_with_len(state)?;
        let (value, value_len) = self.pop_number_with_len(state)?;
        let cost = value_len.max(min_len).max(max_len);
        state.metrics.record_arithmetic(cost as u64, &self.config);
        self.push_bool(state, min <= value && value < max)
    }
}

/// Fails with [`VmError::FailedVerify`] unless `condition` holds.
fn require(condition: bool, opcode: Opcode) -> Result<(), VmError> {
    if condition {
        Ok(())
    } else {
        Err(VmError::FailedVerify {
            opcode: opcode.mnemonic(),
        })
    }
}
