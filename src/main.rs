//! Script debugger.
//!
//! Compiles a script source file, evaluates it and reports how the
//! evaluation maps back to the source.
//!
//! # Usage
//! ```text
//! bch-vm <script> [OPTIONS]
//! ```
//!
//! # Arguments
//! - `script`: Source file containing the script to evaluate
//!
//! # Options
//! - `--vm <version>`: Instruction set, one of `2023`, `2025`, `2026` (default `2025`)
//! - `--nonstandard`: Evaluate under consensus rules only
//! - `--trace`: Print every step of the evaluation
//! - `--quiet`: Only log warnings and errors

use crate::source_map::compiler::{compile, source_range};
use crate::source_map::coverage::unexecuted_ranges;
use crate::source_map::extract::extract_recursive;
use crate::types::range::Range;
use crate::utils::log::{Level, set_min_level};
use crate::virtual_machine::assembler::{disassemble_instruction, render_assembly_diagnostic};
use crate::virtual_machine::instruction::Instruction;
use crate::virtual_machine::isa::InstructionSetVersion;
use crate::virtual_machine::state::{VmState, summarize_trace};
use crate::virtual_machine::vm::config::VmConfig;
use crate::virtual_machine::vm::context::ProgramContext;
use crate::virtual_machine::vm::{Completion, Vm};
use std::env;
use std::fs;
use std::process;

mod core;
mod crypto;
mod source_map;
mod types;
mod utils;
mod virtual_machine;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let script_path = &args[1];
    let mut version = InstructionSetVersion::default();
    let mut nonstandard = false;
    let mut show_trace = false;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--vm" => {
                i += 1;
                if i >= args.len() {
                    error!("--vm requires an argument");
                    process::exit(1);
                }
                version = InstructionSetVersion::from_label(&args[i]).unwrap_or_else(|| {
                    error!("Unknown instruction set: '{}'", args[i]);
                    process::exit(1);
                });
                i += 1;
            }
            "--nonstandard" => {
                nonstandard = true;
                i += 1;
            }
            "--trace" => {
                show_trace = true;
                i += 1;
            }
            "--quiet" => {
                set_min_level(Level::Warn);
                i += 1;
            }
            other => {
                error!("Unexpected argument: {}\n", other);
                print_usage(&args[0]);
                process::exit(1);
            }
        }
    }

    let source = match fs::read_to_string(script_path) {
        Ok(source) => source,
        Err(e) => {
            error!("Failed to read {}: {}", script_path, e);
            process::exit(1);
        }
    };

    let mut config = VmConfig::for_version(version);
    if nonstandard {
        config = config.nonstandard();
    }
    let vm = Vm::new(config);

    let compiled = match compile(&source, &vm) {
        Ok(compiled) => compiled,
        Err(e) => {
            let at = e.range().start();
            eprint!(
                "{}",
                render_assembly_diagnostic(
                    script_path,
                    &source,
                    at.line as usize,
                    at.column as usize,
                    &e.to_string(),
                )
            );
            print_ranges(
                "Unexecuted",
                &unexecuted_ranges(&[], source_range(&source), Some(at)),
            );
            process::exit(1);
        }
    };

    info!(
        "Compiled {} ({} bytes) for {}{}",
        script_path,
        compiled.bytecode().len(),
        version,
        if nonstandard { ", nonstandard" } else { "" }
    );

    let ctx = ProgramContext::default();
    let trace = vm.debug(
        &ctx,
        vm.initial_state(compiled.bytecode(), &ctx),
        Completion::Final,
    );
    let render = |instruction: &Instruction| disassemble_instruction(instruction, version);

    if show_trace {
        println!("Trace:");
        for line in summarize_trace(&trace, render) {
            println!("  {line}");
        }
        println!();
    }

    let extraction = extract_recursive(
        &compiled.tree,
        compiled.script.range,
        &compiled.script.script,
        &trace,
    );

    println!("Samples:");
    for sample in extraction.flatten() {
        let instruction = sample
            .instruction
            .as_ref()
            .map(render)
            .unwrap_or_else(|| "(initial)".to_string());
        let skip = if sample.executed { "" } else { " (skip)" };
        println!(
            "  {:<16} {instruction}{skip} => {}",
            sample.range.to_string(),
            sample.state
        );
    }
    println!();

    let unmatched = extraction.all_unmatched_states();
    if !unmatched.is_empty() {
        warn!(
            "{} state(s) could not be matched to the source",
            unmatched.len()
        );
    }

    print_ranges(
        "Unexecuted",
        &unexecuted_ranges(&extraction.samples, compiled.script.range, None),
    );

    let Some(last) = trace.last() else {
        return;
    };
    print_metrics(last);

    match &last.error {
        Some(e) => {
            error!("Evaluation failed: {}", e);
            process::exit(1);
        }
        None => info!("Evaluation succeeded"),
    }
}

fn print_ranges(label: &str, ranges: &[Range]) {
    println!("{label}:");
    if ranges.is_empty() {
        println!("  (none)");
    }
    for range in ranges {
        println!("  {range}");
    }
    println!();
}

fn print_metrics(state: &VmState) {
    let metrics = &state.metrics;
    let profile = &metrics.profile;
    let total = profile.total();

    let cat_w = 2 + profile
        .iter()
        .map(|(c, _)| c.as_str().chars().count())
        .max()
        .unwrap_or(0)
        .max("total".len());
    let amt_w = format_with_commas(total).chars().count();
    let dash_w = cat_w + 1 + amt_w + 2 + "( 100.0%)".len();

    println!("Operation Cost:");
    println!("{}", "-".repeat(dash_w));
    for (category, amount) in profile.iter() {
        if amount == 0 {
            continue;
        }
        let percent = (amount as f64 / total as f64) * 100.0;
        println!(
            "{:<cat_w$} {:>amt_w$} ({:>5.1}%)",
            category.as_str(),
            format_with_commas(amount),
            percent,
        );
    }
    println!("{}", "-".repeat(dash_w));
    println!(
        "{:<cat_w$} {:>amt_w$} ({:>5.1}%)",
        "total",
        format_with_commas(total),
        100.0,
    );
    println!();

    println!(
        "instructions {}, hash iterations {}/{}, signature checks {}/{}, max memory {} bytes",
        metrics.executed_instruction_count,
        metrics.hash_digest_iterations,
        format_limit(metrics.maximum_hash_digest_iterations),
        metrics.signature_check_count,
        format_limit(metrics.maximum_signature_check_count),
        metrics.max_memory_usage,
    );
}

fn format_limit(limit: u64) -> String {
    if limit == u64::MAX {
        "unlimited".to_string()
    } else {
        format_with_commas(limit)
    }
}

fn format_with_commas(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i).is_multiple_of(3) {
            result.push(',');
        }
        result.push(c);
    }
    result
}

const USAGE: &str = "\
Script Debugger

USAGE:
    {program} <script> [OPTIONS]

ARGS:
    <script>    Script source file to evaluate

OPTIONS:
    --vm <version>    Instruction set: 2023, 2025 or 2026 (default 2025)
    --nonstandard     Evaluate under consensus rules only
    --trace           Print every evaluation step
    --quiet           Only log warnings and errors
    -h, --help        Print this help message

SOURCE SYNTAX:
    OP_ADD OP_1           opcodes
    0xabcd 42 \"text\"      raw bytes
    <1> <0xabcd>          minimal pushes
    $(<1> <2> OP_ADD)     compile-time evaluation, replaced by its top item
    // comment

EXAMPLES:
    {program} script.bch --trace
    {program} loop.bch --vm 2026
";

fn print_usage(program: &str) {
    info!("{}", USAGE.replace("{program}", program));
}
