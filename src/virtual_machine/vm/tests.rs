use super::*;
use crate::core::sighash::SighashType;
use crate::types::hash;
use crate::utils::test_utils::utils::{context_with_unlocking_len, sign_input, test_key};
use crate::virtual_machine::assembler::{assemble_bytecode, disassemble_instruction};
use crate::virtual_machine::instruction::encode_data_push;
use crate::virtual_machine::isa::InstructionSetVersion;
use crate::virtual_machine::state::summarize_trace;

const V: InstructionSetVersion = InstructionSetVersion::Bch2025;

/// Oracle accepting a signature iff its first byte equals the key's first byte.
#[derive(Clone, Copy, Debug, Default)]
struct FirstByteOracle;

impl Secp256k1 for FirstByteOracle {
    fn verify_ecdsa(&self, _: &[u8; 32], signature: &[u8], public_key: &[u8]) -> bool {
        signature.first() == public_key.first()
    }

    fn verify_schnorr(&self, message_hash: &[u8; 32], signature: &[u8], public_key: &[u8]) -> bool {
        self.verify_ecdsa(message_hash, signature, public_key)
    }

    fn is_valid_public_key(&self, public_key: &[u8]) -> bool {
        public_key.len() == 33
    }
}

fn vm() -> Vm {
    Vm::new(VmConfig::bch_2025())
}

/// Context with a minimal input: density 41, one signature check, 32,800 operation cost.
fn ctx() -> ProgramContext {
    ProgramContext::single_input(Vec::new(), Vec::new())
}

fn assemble_with(vm: &Vm<impl Secp256k1>, source: &str) -> Vec<u8> {
    assemble_bytecode(source, vm.config().version).expect("assembly failed")
}

fn trace_with<C: Secp256k1>(vm: &Vm<C>, ctx: &ProgramContext, source: &str) -> Vec<VmState> {
    let bytecode = assemble_bytecode(source, vm.config().version).expect("assembly failed");
    vm.debug(ctx, vm.initial_state(&bytecode, ctx), Completion::Final)
}

fn run_trace(source: &str) -> Vec<VmState> {
    trace_with(&vm(), &ctx(), source)
}

/// Evaluates `source` and returns the final state, which must not carry an error.
fn run_vm_with(vm: &Vm, ctx: &ProgramContext, source: &str) -> VmState {
    let bytecode = assemble_with(vm, source);
    let state = vm.evaluate(ctx, vm.initial_state(&bytecode, ctx));
    assert_eq!(state.error, None, "evaluating `{source}`");
    state
}

fn run_vm(source: &str) -> VmState {
    run_vm_with(&vm(), &ctx(), source)
}

fn run_stack(source: &str) -> Vec<Vec<u8>> {
    run_vm(source).stack
}

/// Final verdict of a finalizing evaluation, which must be an error.
fn run_expect_err_with<C: Secp256k1>(vm: &Vm<C>, ctx: &ProgramContext, source: &str) -> VmError {
    let trace = trace_with(vm, ctx, source);
    trace
        .last()
        .and_then(|state| state.error.clone())
        .expect("expected error")
}

fn run_expect_err(source: &str) -> VmError {
    run_expect_err_with(&vm(), &ctx(), source)
}

fn verify(source: &str) -> Result<(), VmError> {
    let vm = vm();
    vm.verify(&ctx(), &assemble_with(&vm, source))
}

fn push(bytes: &[u8]) -> String {
    disassemble_instruction(&Instruction::minimal_push(bytes), V)
}

fn num(value: i64) -> Vec<u8> {
    number::encode_i64(value)
}

// ==================== Pushes ====================

#[test]
fn push_and_compare() {
    assert_eq!(
        verify("OP_PUSHBYTES_2 0xabcd OP_PUSHBYTES_2 0xabcd OP_EQUAL"),
        Ok(())
    );
    assert_eq!(run_stack("OP_0 OP_1NEGATE OP_16"), vec![vec![], vec![0x81], vec![16]]);
}

#[test]
fn executed_pushes_must_be_minimal() {
    assert_eq!(run_expect_err("OP_PUSHBYTES_1 0x05"), VmError::NonMinimalPush);
    assert_eq!(run_expect_err("OP_PUSHDATA_1 1 0xab"), VmError::NonMinimalPush);
    assert_eq!(verify("OP_0 OP_IF OP_PUSHBYTES_1 0x05 OP_ENDIF OP_1"), Ok(()));
}

#[test]
fn malformed_push_fails_when_reached() {
    let trace = run_trace("OP_1 OP_PUSHBYTES_2 0xab[missing 1 byte]");
    assert_eq!(trace.len(), 4);
    assert_eq!(trace[2].error, Some(VmError::MalformedPush));
    assert_eq!(trace[1].error, None);
}

#[test]
fn empty_program_is_not_clean() {
    assert_eq!(run_expect_err(""), VmError::RequiresCleanStack { found: 0 });
}

// ==================== Flow Control ====================

#[test]
fn if_else_branches() {
    assert_eq!(run_stack("OP_1 OP_IF OP_2 OP_ELSE OP_3 OP_ENDIF"), vec![num(2)]);
    assert_eq!(run_stack("OP_0 OP_IF OP_2 OP_ELSE OP_3 OP_ENDIF"), vec![num(3)]);
    assert_eq!(run_stack("OP_0 OP_NOTIF OP_2 OP_ENDIF"), vec![num(2)]);
}

#[test]
fn nested_branches_inside_unexecuted_branch() {
    let source = "OP_0 OP_IF OP_1 OP_IF OP_2 OP_ELSE OP_3 OP_ENDIF OP_ENDIF OP_4";
    assert_eq!(run_stack(source), vec![num(4)]);
}

#[test]
fn else_and_endif_must_match() {
    assert_eq!(
        run_expect_err("OP_1 OP_IF OP_ELSE OP_ELSE OP_ENDIF OP_1"),
        VmError::RepeatedElse
    );
    assert_eq!(run_expect_err("OP_1 OP_ELSE"), VmError::UnexpectedElse);
    assert_eq!(run_expect_err("OP_1 OP_ENDIF"), VmError::UnexpectedEndIf);
    assert_eq!(
        run_expect_err("OP_1 OP_IF OP_1"),
        VmError::NonEmptyControlStack { depth: 1 }
    );
}

#[test]
fn return_halts_with_trace() {
    let trace = run_trace("OP_0 OP_RETURN OP_0");
    assert_eq!(trace.len(), 4);
    let last = trace.last().unwrap();
    assert_eq!(last.error, Some(VmError::CalledReturn));
    assert_eq!(
        last.error.as_ref().map(ToString::to_string).as_deref(),
        Some("Program called an OP_RETURN operation.")
    );
    assert_eq!(trace[2], trace[3]);
    assert_eq!(trace[2].instruction_pointer, 2);
}

#[test]
fn unexecuted_branch_is_skipped_in_summary() {
    let trace = run_trace("OP_0 OP_IF OP_2 OP_ELSE OP_3 OP_ENDIF");
    assert!(trace[2].skips_next());
    assert!(!trace[4].skips_next());

    let lines = summarize_trace(&trace, |i| disassemble_instruction(i, V));
    assert_eq!(
        lines,
        vec![
            "     (initial) []",
            "   0 OP_0 => [0x]",
            "   1 OP_IF => []",
            "   2 OP_2 (skip) => []",
            "   3 OP_ELSE => []",
            "   4 OP_3 => [0x03]",
            "   5 OP_ENDIF => [0x03]",
            "     (complete) [0x03]",
        ]
    );
}

#[test]
fn disabled_and_reserved_opcodes() {
    assert_eq!(
        run_expect_err("OP_0 OP_IF OP_INVERT OP_ENDIF OP_1"),
        VmError::DisabledOpcode {
            opcode: "OP_INVERT"
        }
    );
    assert_eq!(
        run_expect_err("OP_0 OP_IF OP_VERIF OP_ENDIF OP_1"),
        VmError::CalledReserved { opcode: "OP_VERIF" }
    );
    assert_eq!(
        run_expect_err("OP_RESERVED"),
        VmError::CalledReserved {
            opcode: "OP_RESERVED"
        }
    );
    assert_eq!(verify("OP_0 OP_IF OP_RESERVED OP_ENDIF OP_1"), Ok(()));
}

#[test]
fn unknown_opcodes_fail_only_when_executed() {
    assert_eq!(verify("OP_0 OP_IF OP_UNKNOWN255 OP_ENDIF OP_1"), Ok(()));
    assert_eq!(
        run_expect_err("OP_UNKNOWN255"),
        VmError::UnknownOpcode { opcode: 0xff }
    );
}

#[test]
fn upgradable_nops_depend_on_standardness() {
    assert_eq!(
        run_expect_err("OP_1 OP_NOP4"),
        VmError::CalledUpgradableNop { opcode: "OP_NOP4" }
    );
    let permissive = Vm::new(VmConfig::bch_2025().nonstandard());
    assert_eq!(
        permissive.verify(&ctx(), &assemble_with(&permissive, "OP_1 OP_NOP4")),
        Ok(())
    );
}

#[test]
fn verify_opcodes() {
    assert_eq!(verify("OP_1 OP_VERIFY OP_1"), Ok(()));
    assert_eq!(
        run_expect_err("OP_0 OP_VERIFY OP_1"),
        VmError::FailedVerify {
            opcode: "OP_VERIFY"
        }
    );
    assert_eq!(
        run_expect_err("OP_1 OP_2 OP_EQUALVERIFY OP_1"),
        VmError::FailedVerify {
            opcode: "OP_EQUALVERIFY"
        }
    );
}

// ==================== Loops ====================

fn loop_vm() -> Vm {
    Vm::new(VmConfig::bch_2026())
}

#[test]
fn loop_repeats_until_truthy() {
    let vm = loop_vm();
    let state = run_vm_with(
        &vm,
        &ctx(),
        "OP_0 OP_BEGIN OP_1ADD OP_DUP OP_3 OP_EQUAL OP_UNTIL",
    );
    assert_eq!(state.stack, vec![num(3)]);
    assert!(state.control_stack.is_empty());
    // Two repeats of the five-byte body.
    assert_eq!(state.metrics.repeated_bytes, 10);
    assert_eq!(state.metrics.executed_instruction_count, 2 + 5 * 3);
}

#[test]
fn loop_opcodes_require_loop_version() {
    let bytecode = [0x51, 0x65, 0x51, 0x66];
    let legacy = vm().evaluate(&ctx(), vm().initial_state(&bytecode, &ctx()));
    assert_eq!(
        legacy.error,
        Some(VmError::CalledReserved { opcode: "OP_VERIF" })
    );
    let vm = loop_vm();
    assert_eq!(vm.verify(&ctx(), &bytecode), Ok(()));
}

#[test]
fn until_without_begin() {
    assert_eq!(
        run_expect_err_with(&loop_vm(), &ctx(), "OP_1 OP_UNTIL"),
        VmError::UnexpectedUntil
    );
    assert_eq!(
        run_expect_err_with(&loop_vm(), &ctx(), "OP_1 OP_IF OP_BEGIN OP_ENDIF"),
        VmError::UnexpectedEndIf
    );
}

#[test]
fn unbounded_loop_exhausts_operation_budget() {
    let trace = trace_with(&loop_vm(), &ctx(), "OP_BEGIN OP_0 OP_UNTIL");
    let last = trace.last().unwrap();
    assert_eq!(
        last.error,
        Some(VmError::ExceededMaximumOperationCost { limit: 32_800 })
    );
    let failing = &trace[trace.len() - 2];
    assert!(failing.metrics.operation_cost > failing.metrics.maximum_operation_cost);
    for state in &trace[..trace.len() - 2] {
        assert!(state.metrics.operation_cost <= state.metrics.maximum_operation_cost);
        assert_eq!(state.error, None);
    }
}

// ==================== Stack ====================

#[test]
fn stack_shuffles() {
    assert_eq!(run_stack("OP_1 OP_2 OP_3 OP_ROT"), vec![num(2), num(3), num(1)]);
    assert_eq!(
        run_stack("OP_1 OP_2 OP_3 OP_4 OP_2SWAP"),
        vec![num(3), num(4), num(1), num(2)]
    );
    assert_eq!(
        run_stack("OP_1 OP_2 OP_3 OP_4 OP_5 OP_6 OP_2ROT"),
        vec![num(3), num(4), num(5), num(6), num(1), num(2)]
    );
    assert_eq!(run_stack("OP_1 OP_2 OP_TUCK"), vec![num(2), num(1), num(2)]);
    assert_eq!(run_stack("OP_1 OP_2 OP_NIP"), vec![num(2)]);
    assert_eq!(run_stack("OP_1 OP_2 OP_OVER"), vec![num(1), num(2), num(1)]);
    assert_eq!(
        run_stack("OP_1 OP_2 OP_2DUP"),
        vec![num(1), num(2), num(1), num(2)]
    );
}

#[test]
fn pick_and_roll() {
    assert_eq!(
        run_stack("OP_1 OP_2 OP_3 OP_2 OP_PICK"),
        vec![num(1), num(2), num(3), num(1)]
    );
    assert_eq!(
        run_stack("OP_1 OP_2 OP_3 OP_2 OP_ROLL"),
        vec![num(2), num(3), num(1)]
    );
    assert_eq!(
        run_expect_err("OP_1 OP_5 OP_PICK"),
        VmError::InvalidStackIndex { index: 5, depth: 1 }
    );
}

#[test]
fn alt_stack_and_depth() {
    let state = run_vm("OP_1 OP_2 OP_TOALTSTACK OP_DEPTH");
    assert_eq!(state.stack, vec![num(1), num(1)]);
    assert_eq!(state.alt_stack, vec![num(2)]);
    assert_eq!(run_stack("OP_1 OP_TOALTSTACK OP_FROMALTSTACK"), vec![num(1)]);
    assert_eq!(run_expect_err("OP_FROMALTSTACK"), VmError::EmptyAlternateStack);
    assert_eq!(run_expect_err("OP_DROP"), VmError::EmptyStack);
}

#[test]
fn ifdup_only_duplicates_truthy() {
    assert_eq!(run_stack("OP_0 OP_IFDUP"), vec![vec![]]);
    assert_eq!(run_stack("OP_7 OP_IFDUP"), vec![num(7), num(7)]);
}

// ==================== Splice / Bitwise ====================

#[test]
fn cat_split_size() {
    assert_eq!(
        run_stack("OP_PUSHBYTES_1 0xab OP_PUSHBYTES_1 0xcd OP_CAT"),
        vec![vec![0xab, 0xcd]]
    );
    assert_eq!(
        run_stack("OP_PUSHBYTES_3 0x010203 OP_1 OP_SPLIT"),
        vec![vec![0x01], vec![0x02, 0x03]]
    );
    assert_eq!(
        run_expect_err("OP_PUSHBYTES_1 0xab OP_2 OP_SPLIT"),
        VmError::InvalidSplitIndex {
            index: 2,
            length: 1
        }
    );
    assert_eq!(
        run_stack("OP_PUSHBYTES_3 0x010203 OP_SIZE"),
        vec![vec![1, 2, 3], num(3)]
    );
    assert_eq!(
        run_stack("OP_PUSHBYTES_3 0x010203 OP_REVERSEBYTES"),
        vec![vec![3, 2, 1]]
    );
}

#[test]
fn num2bin_and_bin2num() {
    assert_eq!(run_stack("OP_1 OP_4 OP_NUM2BIN"), vec![vec![1, 0, 0, 0]]);
    assert_eq!(run_stack("OP_1NEGATE OP_2 OP_NUM2BIN"), vec![vec![1, 0x80]]);
    assert_eq!(
        run_expect_err("OP_PUSHBYTES_2 0xff7f OP_1 OP_NUM2BIN"),
        VmError::InsufficientLength { size: 1 }
    );
    assert_eq!(
        run_stack("OP_PUSHBYTES_4 0x01000000 OP_BIN2NUM"),
        vec![num(1)]
    );
    assert_eq!(
        run_stack("OP_PUSHBYTES_4 0x01000080 OP_BIN2NUM"),
        vec![num(-1)]
    );
}

#[test]
fn bitwise_operations() {
    assert_eq!(
        run_stack("OP_PUSHBYTES_2 0x0ff0 OP_PUSHBYTES_2 0x3c3c OP_AND"),
        vec![vec![0x0c, 0x30]]
    );
    assert_eq!(
        run_stack("OP_PUSHBYTES_2 0x0ff0 OP_PUSHBYTES_2 0x3c3c OP_OR"),
        vec![vec![0x3f, 0xfc]]
    );
    assert_eq!(
        run_stack("OP_PUSHBYTES_2 0x0ff0 OP_PUSHBYTES_2 0x3c3c OP_XOR"),
        vec![vec![0x33, 0xcc]]
    );
    assert_eq!(
        run_expect_err("OP_PUSHBYTES_2 0x0ff0 OP_PUSHBYTES_1 0x3c OP_AND"),
        VmError::MismatchedBitwiseOperandLength
    );
}

// ==================== Arithmetic ====================

#[test]
fn arithmetic() {
    assert_eq!(verify("OP_2 OP_3 OP_ADD OP_5 OP_NUMEQUAL"), Ok(()));
    assert_eq!(run_stack("OP_2 OP_5 OP_SUB"), vec![num(-3)]);
    assert_eq!(run_stack("OP_6 OP_7 OP_MUL"), vec![num(42)]);
    assert_eq!(run_stack("OP_7 OP_3 OP_DIV"), vec![num(2)]);
    assert_eq!(run_stack("OP_7 OP_3 OP_MOD"), vec![num(1)]);
    assert_eq!(run_stack("OP_PUSHBYTES_1 0x87 OP_2 OP_DIV"), vec![num(-3)]);
    assert_eq!(run_stack("OP_3 OP_9 OP_MIN"), vec![num(3)]);
    assert_eq!(run_stack("OP_1NEGATE OP_ABS"), vec![num(1)]);
    assert_eq!(run_stack("OP_5 OP_NEGATE"), vec![num(-5)]);
    assert_eq!(run_stack("OP_0 OP_NOT"), vec![num(1)]);
    assert_eq!(run_stack("OP_2 OP_1 OP_3 OP_WITHIN"), vec![num(1)]);
    assert_eq!(run_stack("OP_3 OP_1 OP_3 OP_WITHIN"), vec![vec![]]);
}

#[test]
fn division_by_zero() {
    assert_eq!(run_expect_err("OP_1 OP_0 OP_DIV"), VmError::DivisionByZero);
    assert_eq!(run_expect_err("OP_1 OP_0 OP_MOD"), VmError::DivisionByZero);
}

#[test]
fn numbers_must_be_minimal() {
    assert_eq!(
        run_expect_err("OP_PUSHBYTES_2 0x0100 OP_1ADD"),
        VmError::NonMinimalNumber
    );
}

#[test]
fn number_length_depends_on_version() {
    let source = "OP_PUSHBYTES_9 0x010203040506070801 OP_1ADD";
    assert_eq!(
        run_stack(source),
        vec![vec![0x02, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x01]]
    );
    let legacy = Vm::new(VmConfig::bch_2023());
    assert_eq!(
        run_expect_err_with(&legacy, &ctx(), source),
        VmError::ExceededMaximumNumberLength {
            length: 9,
            limit: 8
        }
    );
}

#[test]
fn arithmetic_operation_cost() {
    // Cost table values here (100 per instruction, 1 per pushed or
    // arithmetic byte) follow the 2025 policy and are asserted exactly.
    let state = run_vm("OP_2 OP_3 OP_ADD");
    assert_eq!(state.metrics.arithmetic_cost, 1);
    assert_eq!(state.metrics.stack_pushed_bytes, 3);
    assert_eq!(state.metrics.operation_cost, 304);
    assert_eq!(state.metrics.profile.get(CostCategory::Base), 300);
}

// ==================== Hashing ====================

#[test]
fn hash_opcodes() {
    assert_eq!(run_stack("OP_0 OP_SHA256"), vec![hash::sha256(&[]).to_vec()]);
    assert_eq!(
        run_stack("OP_1 OP_HASH160"),
        vec![hash::hash160(&[1]).to_vec()]
    );
    assert_eq!(
        run_stack("OP_1 OP_RIPEMD160"),
        vec![hash::ripemd160(&[1]).to_vec()]
    );
    assert_eq!(run_stack("OP_1 OP_SHA1"), vec![hash::sha1(&[1]).to_vec()]);
}

#[test]
fn hash_digest_iterations_are_charged() {
    // Policy values: 192 per digest iteration (standard), 1 per pushed byte.
    let state = run_vm("OP_0 OP_HASH256");
    assert_eq!(state.metrics.hash_digest_iterations, 2);
    assert_eq!(state.metrics.operation_cost, 200 + 2 * 192 + 32);
}

#[test]
fn hash_iteration_budget() {
    // A 41-byte input allows 20 standard iterations; hashing 1,000 bytes takes 16.
    let item = |byte: &str| format!("OP_PUSHDATA_2 1000 0x{}", byte.repeat(1000));
    let source = format!("{} OP_SHA256 OP_DROP {} OP_SHA256", item("ab"), item("cd"));
    assert_eq!(
        run_expect_err(&source),
        VmError::ExceededMaximumHashDigestIterations { limit: 20 }
    );

    let relaxed = Vm::new(VmConfig::bch_2025().nonstandard());
    let state = run_vm_with(&relaxed, &ctx(), &source);
    assert_eq!(state.metrics.hash_digest_iterations, 32);
}

// ==================== Code Separator ====================

#[test]
fn active_bytecode_follows_executed_separator() {
    assert_eq!(
        run_stack("OP_1 OP_CODESEPARATOR OP_ACTIVEBYTECODE"),
        vec![num(1), vec![0xc1]]
    );
    assert_eq!(
        run_stack("OP_0 OP_IF OP_CODESEPARATOR OP_ENDIF OP_ACTIVEBYTECODE"),
        vec![vec![0x00, 0x63, 0xab, 0x68, 0xc1]]
    );
}

// ==================== Signatures ====================

/// `<sig> OP_CODESEPARATOR <pubkey> OP_CHECKSIG`, signed over the bytecode after the separator.
fn checksig_program(ctx: &ProgramContext, schnorr: bool, tamper: bool) -> Vec<u8> {
    let key = test_key(1);
    let pubkey = key.public_key(true);
    let covered = [encode_data_push(&pubkey), vec![Opcode::CheckSig.byte()]].concat();
    let signed = if tamper { vec![0x51] } else { covered.clone() };
    let signature = sign_input(ctx, &key, &signed, schnorr);
    [
        encode_data_push(&signature),
        vec![Opcode::CodeSeparator.byte()],
        covered,
    ]
    .concat()
}

#[test]
fn checksig_ecdsa_and_schnorr() {
    let ctx = context_with_unlocking_len(100);
    for schnorr in [false, true] {
        let bytecode = checksig_program(&ctx, schnorr, false);
        let state = vm().evaluate(&ctx, vm().initial_state(&bytecode, &ctx));
        assert_eq!(state.error, None);
        assert_eq!(state.stack, vec![vec![1]]);
        assert_eq!(state.metrics.signature_check_count, 1);
        assert!(state.metrics.hash_digest_iterations > 0);
    }
}

#[test]
fn checksig_rejects_wrong_message() {
    let ctx = context_with_unlocking_len(100);
    let bytecode = checksig_program(&ctx, false, true);
    assert_eq!(
        vm().verify(&ctx, &bytecode),
        Err(VmError::NonNullSignatureFailure)
    );
}

#[test]
fn null_signature_pushes_false() {
    let pubkey = test_key(1).public_key(true);
    let state = run_vm(&format!("OP_0 {} OP_CHECKSIG", push(&pubkey)));
    assert_eq!(state.stack, vec![vec![]]);
    assert_eq!(state.metrics.signature_check_count, 0);
}

#[test]
fn signature_encoding_errors() {
    let signature = [vec![0x30; 70], vec![SighashType::all().byte()]].concat();
    assert_eq!(
        run_expect_err(&format!("{} OP_PUSHBYTES_2 0x0201 OP_CHECKSIG", push(&signature))),
        VmError::InvalidPublicKeyEncoding
    );
    let pubkey = test_key(1).public_key(true);
    assert_eq!(
        run_expect_err(&format!("OP_PUSHBYTES_3 0x300141 {} OP_CHECKSIG", push(&pubkey))),
        VmError::InvalidSignatureEncoding
    );
}

#[test]
fn signature_check_budget() {
    // A minimal input allows a single signature check.
    let ctx = ctx();
    let key = test_key(1);
    let covered = [
        encode_data_push(&key.public_key(true)),
        vec![Opcode::CheckSig.byte()],
    ]
    .concat();
    let second = [
        encode_data_push(&sign_input(&ctx, &key, &covered, true)),
        vec![Opcode::CodeSeparator.byte()],
        covered.clone(),
    ]
    .concat();
    // The first signature covers everything after the first separator.
    let first_covered = [covered, vec![Opcode::Verify.byte()], second].concat();
    let bytecode = [
        encode_data_push(&sign_input(&ctx, &key, &first_covered, true)),
        vec![Opcode::CodeSeparator.byte()],
        first_covered,
    ]
    .concat();

    let trace = vm().debug(&ctx, vm().initial_state(&bytecode, &ctx), Completion::Final);
    let verified = trace
        .iter()
        .find(|state| state.metrics.signature_check_count == 1)
        .unwrap();
    assert_eq!(verified.error, None);
    assert_eq!(verified.stack, vec![vec![1]]);
    let last = trace.last().unwrap();
    assert!(matches!(
        last.error,
        Some(VmError::ExceededMaximumSignatureCheckCount { limit: 1 })
            | Some(VmError::ExceededMaximumOperationCost { .. })
    ));
}

#[test]
fn checkdatasig() {
    let ctx = context_with_unlocking_len(100);
    let key = test_key(2);
    let message = b"message";
    let message_hash = hash::sha256(message);
    let signature = key.sign_schnorr(&message_hash).unwrap();
    let source = format!(
        "{} {} {} OP_CHECKDATASIG",
        push(&signature),
        push(message),
        push(&key.public_key(true))
    );
    let state = run_vm_with(&vm(), &ctx, &source);
    assert_eq!(state.stack, vec![vec![1]]);
    assert_eq!(state.metrics.signature_check_count, 1);

    let wrong = format!(
        "{} {} {} OP_CHECKDATASIGVERIFY",
        push(&signature),
        push(b"other"),
        push(&key.public_key(true))
    );
    assert_eq!(
        run_expect_err_with(&vm(), &ctx, &wrong),
        VmError::NonNullSignatureFailure
    );
}

// ==================== Multisig ====================

fn fake_vm() -> Vm<FirstByteOracle> {
    Vm::with_crypto(VmConfig::bch_2025(), FirstByteOracle)
}

fn fake_key(tag: u8) -> Vec<u8> {
    vec![tag; 33]
}

fn fake_ecdsa(tag: u8) -> Vec<u8> {
    [vec![tag; 9], vec![SighashType::all().byte()]].concat()
}

fn fake_schnorr(tag: u8) -> Vec<u8> {
    [vec![tag; 64], vec![SighashType::all().byte()]].concat()
}

fn multisig_trace(source: &str) -> Vec<VmState> {
    trace_with(&fake_vm(), &context_with_unlocking_len(100), source)
}

#[test]
fn legacy_multisig_one_of_two() {
    let source = format!(
        "OP_0 {} OP_1 {} {} OP_2 OP_CHECKMULTISIG",
        push(&fake_ecdsa(2)),
        push(&fake_key(2)),
        push(&fake_key(3))
    );
    let trace = multisig_trace(&source);
    let last = trace.last().unwrap();
    assert_eq!(last.error, None);
    assert_eq!(last.stack, vec![vec![1]]);
    // Legacy mode counts every key.
    assert_eq!(last.metrics.signature_check_count, 2);
}

#[test]
fn legacy_multisig_failures() {
    let unmatched = format!(
        "OP_0 {} OP_1 {} OP_1 OP_CHECKMULTISIG",
        push(&fake_ecdsa(9)),
        push(&fake_key(2))
    );
    assert_eq!(
        multisig_trace(&unmatched).last().unwrap().error,
        Some(VmError::NonNullSignatureFailure)
    );

    let null = format!("OP_0 OP_0 OP_1 {} OP_1 OP_CHECKMULTISIG", push(&fake_key(2)));
    let last = multisig_trace(&null).pop().unwrap();
    assert_eq!(last.error, Some(VmError::UnsuccessfulEvaluation));
    assert_eq!(last.metrics.signature_check_count, 0);

    let schnorr = format!(
        "OP_0 {} OP_1 {} OP_1 OP_CHECKMULTISIG",
        push(&fake_schnorr(2)),
        push(&fake_key(2))
    );
    assert_eq!(
        multisig_trace(&schnorr).last().unwrap().error,
        Some(VmError::SchnorrInLegacyMultisig)
    );
}

#[test]
fn schnorr_multisig_two_of_three() {
    // Bitfield 0b101 selects the first and third keys.
    let keys = format!(
        "{} {} {}",
        push(&fake_key(2)),
        push(&fake_key(3)),
        push(&fake_key(4))
    );
    let source = format!(
        "OP_5 {} {} OP_2 {keys} OP_3 OP_CHECKMULTISIG",
        push(&fake_schnorr(2)),
        push(&fake_schnorr(4))
    );
    let last = multisig_trace(&source).pop().unwrap();
    assert_eq!(last.error, None);
    assert_eq!(last.metrics.signature_check_count, 2);

    let wrong_count = source.replacen("OP_5", "OP_7", 1);
    assert_eq!(
        multisig_trace(&wrong_count).pop().unwrap().error,
        Some(VmError::InvalidSchnorrBitfield)
    );

    let wrong_keys = source.replacen("OP_5", "OP_3", 1);
    assert_eq!(
        multisig_trace(&wrong_keys).pop().unwrap().error,
        Some(VmError::NonNullSignatureFailure)
    );
}

#[test]
fn multisig_counts_are_bounded() {
    assert_eq!(
        run_expect_err_with(&fake_vm(), &ctx(), "OP_0 OP_0 OP_PUSHBYTES_1 0x15 OP_CHECKMULTISIG"),
        VmError::InvalidMultisigCount
    );
    assert_eq!(
        run_expect_err_with(&fake_vm(), &ctx(), "OP_0 OP_2 OP_1 OP_1 OP_CHECKMULTISIG"),
        VmError::InvalidMultisigCount
    );
}

// ==================== Introspection ====================

#[test]
fn transaction_introspection() {
    assert_eq!(verify("OP_INPUTINDEX OP_0 OP_NUMEQUAL"), Ok(()));
    assert_eq!(verify("OP_TXVERSION OP_2 OP_NUMEQUAL"), Ok(()));
    assert_eq!(verify("OP_TXINPUTCOUNT OP_1 OP_NUMEQUAL"), Ok(()));
    assert_eq!(run_stack("OP_0 OP_UTXOVALUE"), vec![num(10_000)]);
    assert_eq!(run_stack("OP_0 OP_OUTPUTBYTECODE"), vec![vec![]]);
    assert_eq!(run_stack("OP_0 OP_INPUTSEQUENCENUMBER"), vec![vec![]]);
    assert_eq!(
        run_expect_err("OP_1 OP_UTXOVALUE"),
        VmError::InvalidIntrospectionIndex { index: 1 }
    );
}

#[test]
fn introspection_requires_context() {
    let default = ProgramContext::default();
    assert_eq!(
        run_expect_err_with(&vm(), &default, "OP_INPUTINDEX"),
        VmError::MissingTransactionContext
    );
}

// ==================== Locktime ====================

fn locktime_ctx(locktime: u32, sequence_number: u32) -> ProgramContext {
    let mut ctx = ctx();
    ctx.transaction.locktime = locktime;
    ctx.transaction.inputs[0].sequence_number = sequence_number;
    ctx
}

#[test]
fn check_locktime_verify() {
    let ctx = locktime_ctx(100, 0);
    let check = |source: &str| run_expect_err_with(&vm(), &ctx, source);
    assert_eq!(
        vm().verify(&ctx, &assemble_with(&vm(), "OP_PUSHBYTES_1 0x32 OP_CHECKLOCKTIMEVERIFY")),
        Ok(())
    );
    assert_eq!(
        check("OP_PUSHBYTES_2 0xc800 OP_CHECKLOCKTIMEVERIFY"),
        VmError::UnsatisfiedLocktime
    );
    assert_eq!(
        check("OP_PUSHBYTES_4 0x0065cd1d OP_CHECKLOCKTIMEVERIFY"),
        VmError::LocktimeTypeMismatch
    );
    assert_eq!(check("OP_1NEGATE OP_CHECKLOCKTIMEVERIFY"), VmError::NegativeNumber);

    let finalized = locktime_ctx(100, u32::MAX);
    assert_eq!(
        run_expect_err_with(&vm(), &finalized, "OP_1 OP_CHECKLOCKTIMEVERIFY"),
        VmError::LocktimeDisabled
    );
}

#[test]
fn check_sequence_verify() {
    let ctx = locktime_ctx(0, 10);
    assert_eq!(
        vm().verify(&ctx, &assemble_with(&vm(), "OP_5 OP_CHECKSEQUENCEVERIFY")),
        Ok(())
    );
    assert_eq!(
        run_expect_err_with(&vm(), &ctx, "OP_PUSHBYTES_1 0x14 OP_CHECKSEQUENCEVERIFY"),
        VmError::UnsatisfiedSequenceNumber
    );
    // Disable flag set in the operand: no-op.
    assert_eq!(
        vm().verify(
            &ctx,
            &assemble_with(&vm(), "OP_PUSHBYTES_5 0x0000008000 OP_CHECKSEQUENCEVERIFY")
        ),
        Ok(())
    );

    let mut legacy = ctx.clone();
    legacy.transaction.version = 1;
    assert_eq!(
        run_expect_err_with(&vm(), &legacy, "OP_5 OP_CHECKSEQUENCEVERIFY"),
        VmError::UnsatisfiedSequenceNumber
    );
}

// ==================== Limits ====================

#[test]
fn bytecode_length_limit() {
    let bytecode = vec![Opcode::Nop.byte(); 10_001];
    let trace = vm().debug(&ctx(), vm().initial_state(&bytecode, &ctx()), Completion::Final);
    assert_eq!(trace.len(), 2);
    assert_eq!(
        trace[0].error,
        Some(VmError::ExceededMaximumBytecodeLength { limit: 10_000 })
    );
}

#[test]
fn stack_item_length_depends_on_version() {
    let bytecode = [vec![0x4d, 0x09, 0x02], vec![0xab; 521]].concat();
    let legacy = Vm::new(VmConfig::bch_2023());
    let state = legacy.evaluate(&ctx(), legacy.initial_state(&bytecode, &ctx()));
    assert_eq!(
        state.error,
        Some(VmError::ExceededMaximumStackItemLength {
            length: 521,
            limit: 520
        })
    );
    assert_eq!(vm().verify(&ctx(), &bytecode), Ok(()));
}

#[test]
fn legacy_operation_count_limit() {
    let bytecode = [vec![Opcode::Nop.byte(); 202], vec![Opcode::Op1.byte()]].concat();
    let legacy = Vm::new(VmConfig::bch_2023());
    assert_eq!(
        legacy.verify(&ctx(), &bytecode),
        Err(VmError::ExceededMaximumOperationCount { limit: 201 })
    );
    assert_eq!(legacy.verify(&ctx(), &bytecode[1..]), Ok(()));
}

#[test]
fn stack_depth_limit() {
    let bytecode = vec![Opcode::Op1.byte(); 1_001];
    let legacy = Vm::new(VmConfig::bch_2023());
    assert_eq!(
        legacy.verify(&ctx(), &bytecode),
        Err(VmError::ExceededMaximumStackDepth { limit: 1_000 })
    );
}

#[test]
fn control_stack_depth_limit() {
    let bytecode = [Opcode::Op1.byte(), Opcode::If.byte()].repeat(101);
    assert_eq!(
        vm().verify(&ctx(), &bytecode),
        Err(VmError::ExceededMaximumControlStackDepth { limit: 100 })
    );
}

// ==================== Trace Properties ====================

const SAMPLE_PROGRAMS: &[&str] = &[
    "OP_0 OP_IF OP_2 OP_ELSE OP_3 OP_ENDIF",
    "OP_2 OP_3 OP_ADD OP_5 OP_NUMEQUALVERIFY OP_1",
    "OP_0 OP_HASH256 OP_SIZE OP_NIP",
    "OP_1 OP_2 OP_3 OP_2ROT",
    "OP_0 OP_RETURN OP_0",
    "OP_1 OP_CODESEPARATOR OP_ACTIVEBYTECODE OP_CAT",
];

#[test]
fn traces_are_deterministic() {
    for source in SAMPLE_PROGRAMS {
        assert_eq!(run_trace(source), run_trace(source), "{source}");
    }
}

#[test]
fn metrics_never_decrease() {
    for source in SAMPLE_PROGRAMS {
        let trace = run_trace(source);
        for pair in trace.windows(2) {
            let (before, after) = (&pair[0].metrics, &pair[1].metrics);
            assert!(after.operation_cost >= before.operation_cost, "{source}");
            assert!(after.executed_instruction_count >= before.executed_instruction_count);
            assert!(after.hash_digest_iterations >= before.hash_digest_iterations);
            assert!(after.max_memory_usage >= before.max_memory_usage);
        }
    }
}

#[test]
fn step_is_pure() {
    let ctx = ctx();
    let initial = vm().initial_state(&[0x51, 0x52], &ctx);
    let first = vm().step(&ctx, &initial);
    assert_eq!(initial.instruction_pointer, 0);
    assert_eq!(first.instruction_pointer, 1);
    assert_eq!(vm().step(&ctx, &initial), first);

    let done = vm().evaluate(&ctx, first);
    assert!(done.is_halted());
    assert_eq!(vm().step(&ctx, &done), done);
}

#[test]
fn partial_completion_skips_clean_stack() {
    let vm = vm();
    let ctx = ctx();
    let bytecode = assemble_with(&vm, "OP_1 OP_2");
    let partial = vm.debug(&ctx, vm.initial_state(&bytecode, &ctx), Completion::Partial);
    assert_eq!(partial.last().unwrap().error, None);
    let last = partial.last().unwrap();
    assert_eq!(
        vm.completion_error(last, Completion::Final),
        Some(VmError::RequiresCleanStack { found: 2 })
    );
    assert_eq!(run_expect_err("OP_0"), VmError::UnsuccessfulEvaluation);
}
