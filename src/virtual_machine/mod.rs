//! Stack-based script virtual machine.
//!
//! Bytecode is parsed into [`instruction::Instruction`]s and evaluated one
//! step at a time by [`vm::Vm`]. Every step produces an immutable
//! [`state::VmState`] snapshot; a full evaluation is the ordered trace of
//! those snapshots, ending in either success or a recorded error.
//!
//! # Architecture
//!
//! - **Stacks**: a main stack and an alternate stack of byte strings, plus a
//!   control stack of branch and loop markers
//! - **Numbers**: sign-magnitude little-endian script numbers, minimally encoded
//! - **Metering**: every instruction is charged an operation cost against a
//!   budget scaled by the size of the input being evaluated
//! - **Versions**: limits, costs and the opcode table follow the selected
//!   [`isa::InstructionSetVersion`]
//!
//! # Modules
//!
//! - [`assembler`]: mnemonic text to instructions and back, with diagnostics
//! - [`errors`]: evaluation and assembly error types
//! - [`instruction`]: bytecode parsing and serialization
//! - [`isa`]: opcode table and instruction set versions
//! - [`number`]: script number encoding
//! - [`program`]: unlocking, locking and redeem phases of an input
//! - [`state`]: evaluation snapshots and trace summaries
//! - [`vm`]: the evaluation state machine, its configuration and metrics

pub mod assembler;
pub mod errors;
pub mod instruction;
pub mod isa;
pub mod number;
pub mod program;
pub mod state;
pub mod vm;
