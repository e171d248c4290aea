//! Full verification of one transaction input.
//!
//! A [`Program`] pairs an input's unlocking bytecode with the locking bytecode
//! of the output it spends. Verification runs up to three phases, each on the
//! stack left by the previous one:
//!
//! 1. unlocking bytecode, which must be push-only
//! 2. locking bytecode
//! 3. redeem bytecode, the last unlocking push, when the locking bytecode is a
//!    P2SH20 or P2SH32 template
//!
//! Metrics carry over between phases, so the whole input shares one budget.

use crate::crypto::key_pair::Secp256k1;
use crate::virtual_machine::errors::VmError;
use crate::virtual_machine::instruction::{is_push_only, parse};
use crate::virtual_machine::isa::Opcode;
use crate::virtual_machine::number;
use crate::virtual_machine::state::VmState;
use crate::virtual_machine::vm::context::ProgramContext;
use crate::virtual_machine::vm::{Completion, Vm};

/// Phase of an input's evaluation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    Unlocking,
    Locking,
    Redeem,
}

/// Trace of a single phase.
#[derive(Clone, Debug, PartialEq)]
pub struct PhaseTrace {
    pub phase: Phase,
    pub bytecode: Vec<u8>,
    pub trace: Vec<VmState>,
}

/// Traces of every phase that ran, in order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProgramTrace {
    pub phases: Vec<PhaseTrace>,
}

impl ProgramTrace {
    /// The completion state of the last phase that ran.
    pub fn final_state(&self) -> Option<&VmState> {
        self.phases.last().and_then(|phase| phase.trace.last())
    }

    pub fn verify(&self) -> Result<(), VmError> {
        match self.final_state() {
            Some(state) => match &state.error {
                Some(error) => Err(error.clone()),
                None => Ok(()),
            },
            None => Err(VmError::UnsuccessfulEvaluation),
        }
    }
}

/// Unlocking and locking bytecode of one input.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Program {
    pub unlocking_bytecode: Vec<u8>,
    pub locking_bytecode: Vec<u8>,
}

/// Length of a 20-byte P2SH locking bytecode: `OP_HASH160 <20 bytes> OP_EQUAL`.
const P2SH20_LEN: usize = 23;
/// Length of a 32-byte P2SH locking bytecode: `OP_HASH256 <32 bytes> OP_EQUAL`.
const P2SH32_LEN: usize = 35;

/// Returns `true` for P2SH20 and P2SH32 locking bytecode.
pub fn is_p2sh(locking_bytecode: &[u8]) -> bool {
    match locking_bytecode {
        [hash, 0x14, .., last] if locking_bytecode.len() == P2SH20_LEN => {
            *hash == Opcode::Hash160.byte() && *last == Opcode::Equal.byte()
        }
        [hash, 0x20, .., last] if locking_bytecode.len() == P2SH32_LEN => {
            *hash == Opcode::Hash256.byte() && *last == Opcode::Equal.byte()
        }
        _ => false,
    }
}

impl Program {
    pub fn new(unlocking_bytecode: Vec<u8>, locking_bytecode: Vec<u8>) -> Self {
        Self {
            unlocking_bytecode,
            locking_bytecode,
        }
    }

    /// Program of the input `ctx` evaluates.
    pub fn from_context(ctx: &ProgramContext) -> Result<Self, VmError> {
        Ok(Self::new(
            ctx.input()?.unlocking_bytecode.clone(),
            ctx.source_output()?.locking_bytecode.clone(),
        ))
    }

    /// Runs every phase, stopping after the first that fails.
    pub fn debug<C: Secp256k1>(&self, vm: &Vm<C>, ctx: &ProgramContext) -> ProgramTrace {
        let mut result = ProgramTrace::default();

        let mut unlocking = vm.initial_state(&self.unlocking_bytecode, ctx);
        if unlocking.error.is_none() && !is_push_only(&parse(&self.unlocking_bytecode)) {
            unlocking.error = Some(VmError::RequiresPushOnly);
        }
        let trace = vm.debug(ctx, unlocking, Completion::Partial);
        let Some(unlocked) = push_phase(&mut result, Phase::Unlocking, &self.unlocking_bytecode, trace)
        else {
            return result;
        };

        let p2sh = is_p2sh(&self.locking_bytecode);
        let initial = vm.initial_state_with(
            &self.locking_bytecode,
            unlocked.stack.clone(),
            unlocked.metrics.clone(),
        );
        let completion = if p2sh {
            Completion::Partial
        } else {
            Completion::Final
        };
        let mut trace = vm.debug(ctx, initial, completion);
        if p2sh
            && let Some(last) = trace.last_mut()
            && last.error.is_none()
            && !last.top().is_some_and(number::is_truthy)
        {
            last.error = Some(VmError::UnsuccessfulEvaluation);
        }
        let Some(locked) = push_phase(&mut result, Phase::Locking, &self.locking_bytecode, trace)
        else {
            return result;
        };
        if !p2sh {
            return result;
        }

        let mut stack = unlocked.stack;
        let Some(redeem_bytecode) = stack.pop() else {
            return result;
        };
        let initial = vm.initial_state_with(&redeem_bytecode, stack, locked.metrics);
        let trace = vm.debug(ctx, initial, Completion::Final);
        push_phase(&mut result, Phase::Redeem, &redeem_bytecode, trace);
        result
    }

    pub fn verify<C: Secp256k1>(&self, vm: &Vm<C>, ctx: &ProgramContext) -> Result<(), VmError> {
        self.debug(vm, ctx).verify()
    }
}

/// Records a phase, returning its final state if the evaluation may continue.
fn push_phase(
    result: &mut ProgramTrace,
    phase: Phase,
    bytecode: &[u8],
    trace: Vec<VmState>,
) -> Option<VmState> {
    let last = trace.last().cloned();
    result.phases.push(PhaseTrace {
        phase,
        bytecode: bytecode.to_vec(),
        trace,
    });
    last.filter(|state| state.error.is_none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::hash;
    use crate::virtual_machine::instruction::encode_data_push;
    use crate::virtual_machine::vm::config::VmConfig;

    fn vm() -> Vm {
        Vm::new(VmConfig::bch_2025())
    }

    fn run(unlocking: Vec<u8>, locking: Vec<u8>) -> ProgramTrace {
        let ctx = ProgramContext::single_input(unlocking, locking);
        let program = Program::from_context(&ctx).unwrap();
        program.debug(&vm(), &ctx)
    }

    fn p2sh20(redeem: &[u8]) -> Vec<u8> {
        [vec![0xa9, 0x14], hash::hash160(redeem).to_vec(), vec![0x87]].concat()
    }

    fn p2sh32(redeem: &[u8]) -> Vec<u8> {
        [vec![0xaa, 0x20], hash::hash256(redeem).to_vec(), vec![0x87]].concat()
    }

    #[test]
    fn locking_runs_on_unlocking_stack() {
        // <2> | OP_2 OP_EQUAL
        let result = run(vec![0x52], vec![0x52, 0x87]);
        assert_eq!(result.phases.len(), 2);
        assert_eq!(result.verify(), Ok(()));
        let last = result.final_state().unwrap();
        assert_eq!(last.metrics.executed_instruction_count, 3);

        let failing = run(vec![0x51], vec![0x52, 0x87]);
        assert_eq!(failing.verify(), Err(VmError::UnsuccessfulEvaluation));
    }

    #[test]
    fn unlocking_must_be_push_only() {
        let result = run(vec![0x51, 0x76], vec![0x51]);
        assert_eq!(result.phases.len(), 1);
        let trace = &result.phases[0].trace;
        assert_eq!(trace.len(), 2);
        assert_eq!(trace[0].error, Some(VmError::RequiresPushOnly));
        assert_eq!(result.verify(), Err(VmError::RequiresPushOnly));
    }

    #[test]
    fn unlocking_may_leave_many_items() {
        let result = run(vec![0x51, 0x52], vec![0x93, 0x53, 0x87]);
        assert_eq!(result.verify(), Ok(()));
    }

    #[test]
    fn p2sh_runs_redeem_bytecode() {
        // Redeem: OP_2 OP_EQUAL, satisfied by <2>.
        let redeem = vec![0x52, 0x87];
        let unlocking = [vec![0x52], encode_data_push(&redeem)].concat();
        for locking in [p2sh20(&redeem), p2sh32(&redeem)] {
            assert!(is_p2sh(&locking));
            let result = run(unlocking.clone(), locking);
            let phases: Vec<_> = result.phases.iter().map(|p| p.phase).collect();
            assert_eq!(phases, vec![Phase::Unlocking, Phase::Locking, Phase::Redeem]);
            assert_eq!(result.phases[2].bytecode, redeem);
            assert_eq!(result.verify(), Ok(()));
        }

        let wrong_input = [vec![0x53], encode_data_push(&redeem)].concat();
        assert_eq!(
            run(wrong_input, p2sh20(&redeem)).verify(),
            Err(VmError::UnsuccessfulEvaluation)
        );
    }

    #[test]
    fn p2sh_rejects_wrong_redeem_hash() {
        let redeem = vec![0x51];
        let unlocking = encode_data_push(&redeem);
        let result = run(unlocking, p2sh20(&[0x52]));
        assert_eq!(result.phases.len(), 2);
        assert_eq!(result.verify(), Err(VmError::UnsuccessfulEvaluation));
    }

    #[test]
    fn metrics_accumulate_across_phases() {
        let redeem = vec![0x52, 0x87];
        let unlocking = [vec![0x52], encode_data_push(&redeem)].concat();
        let result = run(unlocking, p2sh32(&redeem));
        let costs: Vec<u64> = result
            .phases
            .iter()
            .map(|phase| phase.trace.last().unwrap().metrics.operation_cost)
            .collect();
        assert!(costs.windows(2).all(|pair| pair[0] < pair[1]));
        // 2 unlocking pushes, 3 locking instructions, 2 redeem instructions.
        assert_eq!(
            result.final_state().unwrap().metrics.executed_instruction_count,
            7
        );
        let budget = result.phases[0].trace[0].metrics.maximum_operation_cost;
        assert_eq!(
            result.final_state().unwrap().metrics.maximum_operation_cost,
            budget
        );
    }

    #[test]
    fn p2sh_detection() {
        assert!(!is_p2sh(&[0xa9, 0x14, 0x87]));
        assert!(!is_p2sh(&[0u8; 23]));
        assert!(is_p2sh(&p2sh20(&[])));
    }
}
