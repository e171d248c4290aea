//! Mnemonic assembler and disassembler CLI.
//!
//! Assembles mnemonic source files to hex-encoded bytecode, or renders
//! hex-encoded bytecode back as mnemonics.
//!
//! # Usage
//! ```text
//! assembler <input> [OPTIONS]
//! ```
//!
//! # Arguments
//! - `input`: Mnemonic source file, or a hex file with `--disassemble`
//!
//! # Options
//! - `-o, --output <file>`: Output file path (defaults to standard output)
//! - `-d, --disassemble`: Treat the input as hex and print mnemonics
//! - `--vm <version>`: Instruction set, one of `2023`, `2025`, `2026` (default `2025`)
//!
//! # Examples
//! ```text
//! assembler script.asm
//! assembler script.asm -o script.hex
//! assembler script.hex --disassemble --vm 2026
//! ```

use bch_vm::virtual_machine::assembler::{
    assemble_bytecode, describe_assembly_error, disassemble_bytecode,
};
use bch_vm::virtual_machine::isa::InstructionSetVersion;
use bch_vm::{error, info};
use std::env;
use std::fs;
use std::path::Path;
use std::process;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let input_path = &args[1];
    let mut output_path: Option<String> = None;
    let mut disassemble = false;
    let mut version = InstructionSetVersion::default();

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            k @ ("--output" | "-o" | "--vm") => {
                i += 1;
                if i >= args.len() {
                    error!("{k} requires an argument");
                    process::exit(1);
                }
                if k == "--vm" {
                    version = InstructionSetVersion::from_label(&args[i]).unwrap_or_else(|| {
                        error!("Unknown instruction set: '{}'", args[i]);
                        process::exit(1);
                    });
                } else {
                    output_path = Some(args[i].clone());
                }
                i += 1;
            }
            "--disassemble" | "-d" => {
                disassemble = true;
                i += 1;
            }
            other => {
                error!("Unexpected argument: {}\n", other);
                print_usage(&args[0]);
                process::exit(1);
            }
        }
    }

    let source = match fs::read_to_string(input_path) {
        Ok(source) => source,
        Err(e) => {
            error!("Failed to read {}: {}", input_path, e);
            process::exit(1);
        }
    };

    if let Some(output) = &output_path
        && let Some(parent) = Path::new(output).parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        error!("Output directory does not exist: {}", parent.display());
        process::exit(1);
    }

    let (output, summary) = if disassemble {
        let hex_text: String = source.split_whitespace().collect();
        let hex_text = hex_text.trim_start_matches("0x");
        let bytecode = hex::decode(hex_text).unwrap_or_else(|e| {
            error!("Invalid hex in {}: {}", input_path, e);
            process::exit(1);
        });
        (
            disassemble_bytecode(&bytecode, version),
            format!("Disassembled {} bytes", bytecode.len()),
        )
    } else {
        let bytecode = assemble_bytecode(&source, version).unwrap_or_else(|e| {
            eprint!("{}", describe_assembly_error(input_path, &source, &e));
            process::exit(1);
        });
        (
            hex::encode(&bytecode),
            format!("Assembled {} bytes", bytecode.len()),
        )
    };

    match &output_path {
        Some(path) => {
            if let Err(e) = fs::write(path, format!("{output}\n")) {
                error!("Failed to write output file: {}", e);
                process::exit(1);
            }
            info!("{} from {} -> {}", summary, input_path, path);
        }
        None => println!("{output}"),
    }
}

const USAGE: &str = "\
Script Assembler

USAGE:
    {program} <input> [OPTIONS]

ARGS:
    <input>    Mnemonic source file (hex file with --disassemble)

OPTIONS:
    -o, --output <file>    Output file path (defaults to standard output)
    -d, --disassemble      Read hex bytecode and print mnemonics
    --vm <version>         Instruction set: 2023, 2025 or 2026 (default 2025)
    -h, --help             Print this help message

EXAMPLES:
    # Assemble to standard output
    {program} script.asm

    # Assemble to a file
    {program} script.asm -o script.hex

    # Disassemble with loop opcodes enabled
    {program} script.hex --disassemble --vm 2026
";

fn print_usage(program: &str) {
    info!("{}", USAGE.replace("{program}", program));
}
