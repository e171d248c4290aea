//! Evaluation snapshots.
//!
//! A [`VmState`] is an immutable snapshot of one point in an evaluation. The
//! VM never mutates a state in place: every step clones the previous snapshot,
//! applies one instruction, and returns the result, so a trace is simply the
//! ordered list of snapshots.

use crate::virtual_machine::errors::VmError;
use crate::virtual_machine::instruction::{Instruction, serialize};
use crate::virtual_machine::isa::Opcode;
use crate::virtual_machine::vm::metrics::Metrics;
use std::fmt;
use std::sync::Arc;

/// Entry of the control stack.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ControlMarker {
    /// Branch opened by `OP_IF`/`OP_NOTIF`, before any `OP_ELSE`.
    If { executing: bool },
    /// Branch following `OP_ELSE`. A second `OP_ELSE` is rejected.
    Else { executing: bool },
    /// Loop opened by `OP_BEGIN`; `begin` is the index of the first body instruction.
    Loop { begin: usize },
}

impl ControlMarker {
    pub const fn is_executing(self) -> bool {
        match self {
            ControlMarker::If { executing } | ControlMarker::Else { executing } => executing,
            ControlMarker::Loop { .. } => true,
        }
    }
}

/// Coarse lifecycle of an evaluation, derived from a snapshot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    /// No instruction evaluated yet.
    Idle,
    Running,
    /// Every instruction evaluated without error.
    Success,
    Error,
}

/// Snapshot of an evaluation after some number of steps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VmState {
    pub stack: Vec<Vec<u8>>,
    pub alt_stack: Vec<Vec<u8>>,
    pub control_stack: Vec<ControlMarker>,
    /// Instructions of the evaluation, shared by every snapshot of it.
    pub instructions: Arc<[Instruction]>,
    /// Index of the next instruction to evaluate.
    pub instruction_pointer: usize,
    /// Index of the most recently executed `OP_CODESEPARATOR`.
    pub last_code_separator_index: Option<usize>,
    pub metrics: Metrics,
    /// Executed opcodes above `OP_16`, bounded by the legacy operation limit.
    pub operation_count: usize,
    pub error: Option<VmError>,
}

impl VmState {
    pub fn new(instructions: Vec<Instruction>, stack: Vec<Vec<u8>>, metrics: Metrics) -> Self {
        Self {
            stack,
            alt_stack: Vec::new(),
            control_stack: Vec::new(),
            instructions: instructions.into(),
            instruction_pointer: 0,
            last_code_separator_index: None,
            metrics,
            operation_count: 0,
            error: None,
        }
    }

    /// True when every control marker is executing.
    pub fn is_executing(&self) -> bool {
        self.control_stack.iter().all(|marker| marker.is_executing())
    }

    /// True when every marker but the innermost is executing.
    pub fn is_enclosing_executing(&self) -> bool {
        match self.control_stack.split_last() {
            Some((_, enclosing)) => enclosing.iter().all(|marker| marker.is_executing()),
            None => true,
        }
    }

    pub fn is_halted(&self) -> bool {
        self.error.is_some() || self.instruction_pointer >= self.instructions.len()
    }

    pub fn status(&self) -> Status {
        if self.error.is_some() {
            Status::Error
        } else if self.instruction_pointer >= self.instructions.len() {
            Status::Success
        } else if self.metrics.executed_instruction_count == 0 {
            Status::Idle
        } else {
            Status::Running
        }
    }

    pub fn next_instruction(&self) -> Option<&Instruction> {
        self.instructions.get(self.instruction_pointer)
    }

    /// True if the next instruction only advances the instruction pointer.
    ///
    /// Conditional opcodes are evaluated even inside unexecuted branches.
    pub fn skips_next(&self) -> bool {
        !self.is_executing()
            && self
                .next_instruction()
                .is_some_and(|instruction| !is_conditional_byte(instruction.opcode()))
    }

    /// True if the next instruction takes effect.
    ///
    /// Opening conditionals take effect only inside executing code, and
    /// closing ones only when the construct they close was reached.
    pub fn executes_next(&self) -> bool {
        let Some(instruction) = self.next_instruction() else {
            return false;
        };
        let opcode = instruction.opcode();
        if [Opcode::Else, Opcode::EndIf, Opcode::Until]
            .iter()
            .any(|closing| closing.byte() == opcode)
        {
            self.is_enclosing_executing()
        } else {
            self.is_executing()
        }
    }

    /// Serialized instructions following the last executed `OP_CODESEPARATOR`.
    pub fn active_bytecode(&self) -> Vec<u8> {
        let start = self.last_code_separator_index.map_or(0, |index| index + 1);
        serialize(self.instructions.get(start..).unwrap_or_default())
    }

    /// Combined byte size of both stacks.
    pub fn memory_usage(&self) -> u64 {
        self.stack
            .iter()
            .chain(&self.alt_stack)
            .map(|item| item.len() as u64)
            .sum()
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len() + self.alt_stack.len()
    }

    pub fn top(&self) -> Option<&[u8]> {
        self.stack.last().map(Vec::as_slice)
    }
}

/// Bytes whose opcodes are evaluated inside unexecuted branches.
///
/// `0x65`/`0x66` are included for loop-enabled versions; in other versions
/// they fail regardless of branch state.
fn is_conditional_byte(byte: u8) -> bool {
    [
        Opcode::If,
        Opcode::NotIf,
        Opcode::Else,
        Opcode::EndIf,
        Opcode::Begin,
        Opcode::Until,
    ]
    .iter()
    .any(|opcode| opcode.byte() == byte)
}

fn write_items(f: &mut fmt::Formatter<'_>, items: &[Vec<u8>]) -> fmt::Result {
    f.write_str("[")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "0x{}", hex::encode(item))?;
    }
    f.write_str("]")
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_items(f, &self.stack)?;
        if !self.alt_stack.is_empty() {
            f.write_str(" alt: ")?;
            write_items(f, &self.alt_stack)?;
        }
        if let Some(error) = &self.error {
            write!(f, " error: {error}")?;
        }
        Ok(())
    }
}

/// One line per step of `trace`: the instruction, `(skip)` when it had no
/// effect inside an unexecuted branch, and the resulting stack.
///
/// `render` formats the instruction; the disassembler provides the usual one.
pub fn summarize_trace(trace: &[VmState], render: impl Fn(&Instruction) -> String) -> Vec<String> {
    let mut lines = Vec::with_capacity(trace.len());
    let Some(initial) = trace.first() else {
        return lines;
    };
    lines.push(format!("     (initial) {initial}"));
    for pair in trace.windows(2) {
        let (before, after) = (&pair[0], &pair[1]);
        let Some(instruction) = before.next_instruction() else {
            lines.push(format!("     (complete) {after}"));
            continue;
        };
        let skip = if before.executes_next() { "" } else { " (skip)" };
        lines.push(format!(
            "{:>4} {}{skip} => {after}",
            before.instruction_pointer,
            render(instruction)
        ));
    }
    lines
}
