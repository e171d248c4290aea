//! Source front-end producing a [`ScriptTree`] with byte-accurate ranges.
//!
//! # Syntax
//!
//! ```text
//! OP_DUP OP_HASH160          // opcode identifiers
//! 0x0102                     // raw bytes
//! 42  -1                     // script numbers, as raw bytes
//! "text"                     // UTF-8 string, as raw bytes
//! <OP_1 0x02>                // push of the compiled contents
//! $(<1> <2> OP_ADD)          // evaluation: the top stack item becomes the bytecode
//! ```
//!
//! Evaluations run on the same [`Vm`] as the compiled script, without a
//! transaction context. Their traces are kept on the node so samples can be
//! extracted for them later.

use crate::crypto::key_pair::Secp256k1;
use crate::source_map::ast::{NestedScript, NodeId, ScriptNode, ScriptTree};
use crate::types::range::{Position, Range};
use crate::virtual_machine::errors::VmError;
use crate::virtual_machine::instruction::{Instruction, serialize};
use crate::virtual_machine::isa::opcode_byte;
use crate::virtual_machine::number;
use crate::virtual_machine::state::VmState;
use crate::virtual_machine::vm::context::ProgramContext;
use crate::virtual_machine::vm::{Completion, Vm};
use num_bigint::BigInt;
use thiserror::Error;

const HEX_PREFIX: &str = "0x";
const LINE_COMMENT: &str = "//";

/// Characters ending a word even without surrounding whitespace.
const DELIMITERS: [char; 6] = ['<', '>', '(', ')', '"', '$'];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("unknown identifier `{name}` at {range}")]
    UnknownIdentifier { name: String, range: Range },

    #[error("invalid hex literal `{token}` at {range}")]
    InvalidHex { token: String, range: Range },

    #[error("invalid number `{token}` at {range}")]
    InvalidNumber { token: String, range: Range },

    #[error("unexpected `{token}` at {range}")]
    UnexpectedToken { token: String, range: Range },

    #[error("unterminated string starting at {range}")]
    UnterminatedString { range: Range },

    #[error("unterminated push starting at {range}")]
    UnterminatedPush { range: Range },

    #[error("unterminated evaluation starting at {range}")]
    UnterminatedEvaluation { range: Range },

    #[error("evaluation at {range} failed: {error}")]
    FailedEvaluation { error: VmError, range: Range },

    #[error("evaluation at {range} left an empty stack")]
    EmptyEvaluation { range: Range },
}

impl CompileError {
    pub fn range(&self) -> Range {
        match self {
            CompileError::UnknownIdentifier { range, .. }
            | CompileError::InvalidHex { range, .. }
            | CompileError::InvalidNumber { range, .. }
            | CompileError::UnexpectedToken { range, .. }
            | CompileError::UnterminatedString { range }
            | CompileError::UnterminatedPush { range }
            | CompileError::UnterminatedEvaluation { range }
            | CompileError::FailedEvaluation { range, .. }
            | CompileError::EmptyEvaluation { range } => *range,
        }
    }
}

/// A compiled source text.
#[derive(Clone, Debug, PartialEq)]
pub struct Compilation {
    pub tree: ScriptTree,
    /// Top-level nodes; `range` spans the whole source.
    pub script: NestedScript,
}

impl Compilation {
    pub fn bytecode(&self) -> &[u8] {
        &self.script.bytecode
    }
}

/// Compiles `source` for the instruction set of `vm`.
pub fn compile<C: Secp256k1>(source: &str, vm: &Vm<C>) -> Result<Compilation, CompileError> {
    let mut compiler = Compiler {
        chars: source.chars().collect(),
        offset: 0,
        line: 1,
        column: 1,
        vm,
        tree: ScriptTree::new(),
    };
    let start = compiler.position();
    let script = compiler.script(None)?;
    let range = Range::from_positions(start, compiler.position());
    let bytecode = compiler.tree.bytecode(&script);
    Ok(Compilation {
        tree: compiler.tree,
        script: NestedScript {
            bytecode,
            range,
            script,
        },
    })
}

/// Range spanning all of `source`, in the positions [`compile`] reports.
pub fn source_range(source: &str) -> Range {
    let line = 1 + source.matches('\n').count() as u32;
    let tail = source.rsplit('\n').next().unwrap_or_default();
    Range::new(1, 1, line, 1 + tail.chars().count() as u32)
}

struct Compiler<'a, C: Secp256k1> {
    chars: Vec<char>,
    offset: usize,
    line: u32,
    column: u32,
    vm: &'a Vm<C>,
    tree: ScriptTree,
}

impl<C: Secp256k1> Compiler<'_, C> {
    fn position(&self) -> Position {
        Position::new(self.line, self.column)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.offset).copied()
    }

    fn starts_with(&self, text: &str) -> bool {
        text.chars()
            .enumerate()
            .all(|(i, c)| self.chars.get(self.offset + i) == Some(&c))
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.offset += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Skips whitespace and line comments.
    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else if self.starts_with(LINE_COMMENT) {
                while self.peek().is_some_and(|c| c != '\n') {
                    self.bump();
                }
            } else {
                break;
            }
        }
    }

    /// Compiles nodes until `closer` (left unconsumed) or the end of input.
    fn script(&mut self, closer: Option<char>) -> Result<Vec<NodeId>, CompileError> {
        let mut nodes = Vec::new();
        loop {
            self.skip_trivia();
            match self.peek() {
                None => break,
                Some(c) if Some(c) == closer => break,
                Some(c @ ('>' | ')' | '(')) => {
                    let start = self.position();
                    self.bump();
                    return Err(CompileError::UnexpectedToken {
                        token: c.to_string(),
                        range: Range::from_positions(start, self.position()),
                    });
                }
                Some(_) => nodes.push(self.node()?),
            }
        }
        Ok(nodes)
    }

    fn node(&mut self) -> Result<NodeId, CompileError> {
        let start = self.position();
        let node = match self.peek() {
            Some('<') => self.push(start)?,
            Some('$') => self.evaluation(start)?,
            Some('"') => self.string(start)?,
            _ => self.word(start)?,
        };
        Ok(self.tree.add(node))
    }

    /// Compiles the nested script between an opener and `closer`.
    fn nested(
        &mut self,
        start: Position,
        closer: char,
        unterminated: fn(Range) -> CompileError,
    ) -> Result<(NestedScript, Range), CompileError> {
        let inner_start = self.position();
        let script = self.script(Some(closer))?;
        let inner_end = self.position();
        if self.bump() != Some(closer) {
            return Err(unterminated(Range::from_positions(start, inner_end)));
        }
        let nested = NestedScript {
            bytecode: self.tree.bytecode(&script),
            range: Range::from_positions(inner_start, inner_end),
            script,
        };
        Ok((nested, Range::from_positions(start, self.position())))
    }

    fn push(&mut self, start: Position) -> Result<ScriptNode, CompileError> {
        self.bump();
        let (contents, range) =
            self.nested(start, '>', |range| CompileError::UnterminatedPush { range })?;
        let bytecode = serialize(&[Instruction::minimal_push(&contents.bytecode)]);
        let mut node = ScriptNode::new(bytecode, range);
        node.push = Some(contents);
        Ok(node)
    }

    fn evaluation(&mut self, start: Position) -> Result<ScriptNode, CompileError> {
        self.bump();
        if self.peek() != Some('(') {
            return Err(CompileError::UnexpectedToken {
                token: "$".to_string(),
                range: Range::from_positions(start, self.position()),
            });
        }
        self.bump();
        let (source, range) =
            self.nested(start, ')', |range| CompileError::UnterminatedEvaluation { range })?;
        let (bytecode, trace) = self.evaluate(&source.bytecode, range)?;
        let mut node = ScriptNode::new(bytecode, range);
        node.source = Some(source);
        node.trace = Some(trace);
        Ok(node)
    }

    /// Evaluates `bytecode`, returning the top stack item and the trace.
    fn evaluate(
        &self,
        bytecode: &[u8],
        range: Range,
    ) -> Result<(Vec<u8>, Vec<VmState>), CompileError> {
        let ctx = ProgramContext::default();
        let initial = self.vm.initial_state(bytecode, &ctx);
        let trace = self.vm.debug(&ctx, initial, Completion::Partial);
        let Some(last) = trace.last() else {
            return Err(CompileError::EmptyEvaluation { range });
        };
        if let Some(error) = &last.error {
            return Err(CompileError::FailedEvaluation {
                error: error.clone(),
                range,
            });
        }
        let top = last
            .top()
            .ok_or(CompileError::EmptyEvaluation { range })?
            .to_vec();
        Ok((top, trace))
    }

    fn string(&mut self, start: Position) -> Result<ScriptNode, CompileError> {
        self.bump();
        let mut text = String::new();
        loop {
            match self.bump() {
                Some('"') => break,
                Some(c) => text.push(c),
                None => {
                    return Err(CompileError::UnterminatedString {
                        range: Range::from_positions(start, self.position()),
                    });
                }
            }
        }
        Ok(ScriptNode::new(
            text.into_bytes(),
            Range::from_positions(start, self.position()),
        ))
    }

    fn word(&mut self, start: Position) -> Result<ScriptNode, CompileError> {
        let mut token = String::new();
        while let Some(c) = self.peek() {
            if c.is_whitespace() || DELIMITERS.contains(&c) || self.starts_with(LINE_COMMENT) {
                break;
            }
            token.push(c);
            self.bump();
        }
        let range = Range::from_positions(start, self.position());

        if let Some(digits) = token.strip_prefix(HEX_PREFIX) {
            let bytes = hex::decode(digits).map_err(|_| CompileError::InvalidHex {
                token: token.clone(),
                range,
            })?;
            return Ok(ScriptNode::new(bytes, range));
        }
        let numeric = token
            .trim_start_matches('-')
            .starts_with(|c: char| c.is_ascii_digit());
        if numeric {
            let value: BigInt = token.parse().map_err(|_| CompileError::InvalidNumber {
                token: token.clone(),
                range,
            })?;
            return Ok(ScriptNode::new(number::encode(&value), range));
        }
        match opcode_byte(&token, self.vm.config().version) {
            Some(byte) => Ok(ScriptNode::new(vec![byte], range)),
            None => Err(CompileError::UnknownIdentifier { name: token, range }),
        }
    }
}
