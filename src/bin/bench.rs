//! VM benchmark binary.
//!
//! Measures evaluation time for representative scripts.
//! Run with: `cargo run --release --bin bench`

use std::time::{Duration, Instant};

use bch_vm::core::sighash::SighashType;
use bch_vm::crypto::key_pair::PrivateKey;
use bch_vm::source_map::compiler::{Compilation, compile};
use bch_vm::source_map::extract::extract_recursive;
use bch_vm::virtual_machine::instruction::encode_data_push;
use bch_vm::virtual_machine::isa::Opcode;
use bch_vm::virtual_machine::state::VmState;
use bch_vm::virtual_machine::vm::config::VmConfig;
use bch_vm::virtual_machine::vm::context::ProgramContext;
use bch_vm::virtual_machine::vm::{Completion, Vm};

/// Unlocking length of the benchmark input; sets the density-based budgets.
const UNLOCKING_LEN: usize = 1_000;

// ---------------------------------------------------------------------------
// Benchmark harness
// ---------------------------------------------------------------------------

struct BenchResult {
    name: String,
    iterations: u64,
    total: Duration,
    operation_cost: u64,
    instructions: u64,
}

impl BenchResult {
    fn avg(&self) -> Duration {
        self.total / self.iterations as u32
    }

    fn print(&self) {
        let avg = self.avg();
        let ns_per_op = avg.as_nanos();
        let ns_per_instr = if self.instructions > 0 {
            format!("{:>8.1}", ns_per_op as f64 / self.instructions as f64)
        } else {
            "       -".to_string()
        };
        println!(
            "  {:<30} {:>7} iters {:>10.3} us/iter {:>12} cost  {} ns/instr",
            self.name,
            self.iterations,
            ns_per_op as f64 / 1000.0,
            self.operation_cost,
            ns_per_instr,
        );
    }
}

/// Runs `f` for at least `min_duration`, returning aggregated results.
fn bench<F>(name: impl Into<String>, min_duration: Duration, mut f: F) -> BenchResult
where
    F: FnMut() -> VmState,
{
    // Warmup
    let mut last = f();
    for _ in 0..4 {
        last = f();
    }
    if let Some(error) = &last.error {
        eprintln!("  benchmark script failed: {error}");
    }

    let mut iterations = 0u64;
    let start = Instant::now();
    while start.elapsed() < min_duration {
        last = f();
        iterations += 1;
    }
    let total = start.elapsed();

    BenchResult {
        name: name.into(),
        iterations,
        total,
        operation_cost: last.metrics.operation_cost,
        instructions: last.metrics.executed_instruction_count,
    }
}

// ---------------------------------------------------------------------------
// Benchmark scripts
// ---------------------------------------------------------------------------

fn arithmetic_mix(rounds: usize) -> String {
    let body = "OP_DUP OP_1ADD OP_MUL <1000003> OP_MOD\n".repeat(rounds);
    format!("<7>\n{body}OP_DROP OP_1")
}

fn hash_chain(rounds: usize) -> String {
    format!("<0x00>\n{}OP_DROP OP_1", "OP_SHA256\n".repeat(rounds))
}

fn branch_heavy(rounds: usize) -> String {
    let body = "OP_1 OP_IF OP_0 OP_IF OP_1 OP_ELSE OP_0 OP_ENDIF OP_DROP OP_ENDIF\n";
    format!("{}OP_1", body.repeat(rounds))
}

fn counting_loop(iterations: usize) -> String {
    format!("<0> OP_BEGIN OP_1ADD OP_DUP <{iterations}> OP_NUMEQUAL OP_UNTIL OP_DROP OP_1")
}

fn stack_shuffle(rounds: usize) -> String {
    let body = "OP_2DUP OP_SWAP OP_ROT OP_2DROP OP_OVER OP_NIP OP_TOALTSTACK OP_FROMALTSTACK\n";
    format!("<1> <2>\n{}OP_2DROP OP_1", body.repeat(rounds))
}

/// `<sig> OP_CODESEPARATOR <pubkey> OP_CHECKSIG` signed over the code after the separator.
fn checksig(ctx: &ProgramContext, schnorr: bool) -> Vec<u8> {
    let Some(key) = PrivateKey::from_bytes(&[7; 32]) else {
        return Vec::new();
    };
    let covered = [
        encode_data_push(&key.public_key(true)),
        vec![Opcode::CheckSig.byte()],
    ]
    .concat();
    let sighash_type = SighashType::all();
    let Ok(message_hash) = ctx
        .signing_context()
        .message_hash(&covered, sighash_type)
    else {
        return Vec::new();
    };
    let signature = if schnorr {
        key.sign_schnorr(&message_hash).map(|s| s.to_vec())
    } else {
        key.sign_ecdsa(&message_hash)
    };
    let Some(mut signature) = signature else {
        return Vec::new();
    };
    signature.push(sighash_type.byte());
    [
        encode_data_push(&signature),
        vec![Opcode::CodeSeparator.byte()],
        covered,
    ]
    .concat()
}

fn compiled(vm: &Vm, source: &str) -> Compilation {
    compile(source, vm).unwrap_or_else(|e| panic!("benchmark script: {e}"))
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() {
    let min = Duration::from_secs(2);
    let ctx = ProgramContext::single_input(vec![0; UNLOCKING_LEN], Vec::new());
    let vm = Vm::new(VmConfig::bch_2025());
    let loop_vm = Vm::new(VmConfig::bch_2026());

    println!("VM Benchmarks (each runs for >= 2s)\n");
    println!(
        "  {:<30} {:>7}       {:>14} {:>12}  {:>10}",
        "benchmark", "iters", "avg time", "cost/run", "ns/instr"
    );
    println!("  {}", "-".repeat(84));

    // Pre-compile scripts (compilation excluded from evaluation benchmarks)
    let scripts = [
        ("arithmetic_mix(50)", &vm, compiled(&vm, &arithmetic_mix(50))),
        ("hash_chain(100)", &vm, compiled(&vm, &hash_chain(100))),
        ("branch_heavy(50)", &vm, compiled(&vm, &branch_heavy(50))),
        ("stack_shuffle(50)", &vm, compiled(&vm, &stack_shuffle(50))),
        ("loop(200)", &loop_vm, compiled(&loop_vm, &counting_loop(200))),
    ];

    // 1. Full evaluation, final state only
    for (name, vm, script) in &scripts {
        let r = bench(format!("evaluate {name}"), min, || {
            vm.evaluate(&ctx, vm.initial_state(script.bytecode(), &ctx))
        });
        r.print();
    }

    // 2. Signature checks
    for (name, schnorr) in [("checksig(ecdsa)", false), ("checksig(schnorr)", true)] {
        let bytecode = checksig(&ctx, schnorr);
        let r = bench(format!("evaluate {name}"), min, || {
            vm.evaluate(&ctx, vm.initial_state(&bytecode, &ctx))
        });
        r.print();
    }

    // 3. Traced evaluation with sample extraction
    for (name, vm, script) in &scripts {
        let r = bench(format!("debug+extract {name}"), min, || {
            let trace = vm.debug(
                &ctx,
                vm.initial_state(script.bytecode(), &ctx),
                Completion::Final,
            );
            let extraction = extract_recursive(
                &script.tree,
                script.script.range,
                &script.script.script,
                &trace,
            );
            std::hint::black_box(extraction);
            trace.last().cloned().expect("trace")
        });
        r.print();
    }

    println!();
}
