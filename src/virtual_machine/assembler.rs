//! Mnemonic assembly and disassembly.
//!
//! Converts instruction sequences into human-readable text and back. Every
//! text produced by [`disassemble`] assembles to the same instructions.
//!
//! # Syntax
//!
//! ```text
//! OP_1 OP_IF OP_PUSHBYTES_2 0xabcd OP_ENDIF   # optional comment
//! OP_PUSHDATA_1 2 0xabcd
//! OP_PUSHBYTES_3 0xab[missing 2 bytes]
//! ```
//!
//! - Opcodes use their mnemonic under the selected [`InstructionSetVersion`]
//! - `OP_PUSHBYTES_N` is followed by exactly `N` hex-encoded bytes
//! - `OP_PUSHDATA_N` is followed by the decimal payload length and the payload
//! - A truncated push ends with `[missing N byte(s)]` and must be last
//! - Comments start with `#`; commas and newlines are whitespace

use crate::virtual_machine::errors::AssemblyError;
use crate::virtual_machine::instruction::{Instruction, length_prefix_width, parse, serialize};
use crate::virtual_machine::isa::{
    InstructionSetVersion, MAX_PUSHBYTES_OPCODE, Opcode, opcode_byte, opcode_name,
};
use std::fmt::Write;
use std::fs;
use std::path::Path;

const COMMENT_CHAR: char = '#';
const HEX_PREFIX: &str = "0x";
const MISSING_PREFIX: &str = "[missing ";

fn missing_marker(count: usize) -> String {
    let unit = if count == 1 { "byte" } else { "bytes" };
    format!("{MISSING_PREFIX}{count} {unit}]")
}

fn hex_literal(bytes: &[u8]) -> String {
    format!("{HEX_PREFIX}{}", hex::encode(bytes))
}

/// Hex of `bytes` immediately followed by the missing-bytes marker.
///
/// The hex part is omitted when nothing is present.
fn truncated_literal(bytes: &[u8], missing: usize) -> String {
    let present = if bytes.is_empty() {
        String::new()
    } else {
        hex_literal(bytes)
    };
    format!("{present}{}", missing_marker(missing))
}

/// Renders one instruction in mnemonic form.
pub fn disassemble_instruction(instruction: &Instruction, version: InstructionSetVersion) -> String {
    let name = opcode_name(instruction.opcode(), version);
    match instruction {
        Instruction::OpcodeOnly { .. } => name.into_owned(),
        Instruction::Push { opcode: 0, .. } => name.into_owned(),
        Instruction::Push { opcode, data } => {
            if *opcode <= MAX_PUSHBYTES_OPCODE {
                format!("{name} {}", hex_literal(data))
            } else {
                format!("{name} {} {}", data.len(), hex_literal(data))
            }
        }
        Instruction::MalformedPush {
            opcode,
            data,
            expected_data_bytes,
            length_prefix,
            expected_length_bytes,
        } => {
            if let Some(prefix) = length_prefix {
                let width = expected_length_bytes.unwrap_or(prefix.len());
                let missing = width.saturating_sub(prefix.len());
                return format!("{name} {}", truncated_literal(prefix, missing));
            }
            let expected = expected_data_bytes.unwrap_or(data.len());
            let missing = truncated_literal(data, expected.saturating_sub(data.len()));
            if *opcode <= MAX_PUSHBYTES_OPCODE {
                format!("{name} {missing}")
            } else {
                format!("{name} {expected} {missing}")
            }
        }
    }
}

/// Renders instructions separated by single spaces.
pub fn disassemble(instructions: &[Instruction], version: InstructionSetVersion) -> String {
    instructions
        .iter()
        .map(|instruction| disassemble_instruction(instruction, version))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses `bytecode` and renders it in mnemonic form.
pub fn disassemble_bytecode(bytecode: &[u8], version: InstructionSetVersion) -> String {
    disassemble(&parse(bytecode), version)
}

#[derive(Debug, Clone)]
struct Token<'a> {
    text: &'a str,
    /// 1-based line number.
    line: usize,
    /// 1-based column offset in the line.
    column: usize,
}

/// Tokenize a single line of assembly.
///
/// Rules:
/// - `#` starts a comment
/// - commas are ignored
/// - `[ ... ]` is part of the surrounding token, spaces included
fn tokenize(line_no: usize, line: &str) -> Result<Vec<Token<'_>>, AssemblyError> {
    let mut out = Vec::with_capacity(8);
    let mut start: Option<usize> = None;
    let mut in_marker = false;

    for (i, c) in line.char_indices() {
        if c == COMMENT_CHAR && !in_marker {
            break;
        }
        match c {
            '[' => {
                start.get_or_insert(i);
                in_marker = true;
            }
            ']' => {
                start.get_or_insert(i);
                in_marker = false;
            }
            ',' | ' ' | '\t' | '\r' if !in_marker => {
                if let Some(s) = start.take() {
                    out.push(Token {
                        text: &line[s..i],
                        line: line_no,
                        column: s + 1,
                    });
                }
            }
            _ => {
                start.get_or_insert(i);
            }
        }
    }

    if let Some(s) = start {
        let end = line.find(COMMENT_CHAR).filter(|_| !in_marker).unwrap_or(line.len());
        let text = &line[s..end.max(s)];
        if in_marker {
            return Err(AssemblyError::InvalidMissingBytes {
                line: line_no,
                column: s + 1,
                token: text.to_string(),
            });
        }
        out.push(Token {
            text: text.trim_end(),
            line: line_no,
            column: s + 1,
        });
    }

    Ok(out)
}

fn tokenize_source(source: &str) -> Result<Vec<Token<'_>>, AssemblyError> {
    let mut tokens = Vec::new();
    for (index, line) in source.lines().enumerate() {
        tokens.extend(tokenize(index + 1, line)?);
    }
    Ok(tokens)
}

/// A hex payload, possibly followed by a missing-bytes marker.
struct Literal {
    bytes: Vec<u8>,
    missing: Option<usize>,
}

fn parse_hex(token: &Token<'_>, text: &str) -> Result<Vec<u8>, AssemblyError> {
    if text.is_empty() {
        return Ok(Vec::new());
    }
    text.strip_prefix(HEX_PREFIX)
        .and_then(|digits| hex::decode(digits).ok())
        .ok_or_else(|| AssemblyError::InvalidHex {
            line: token.line,
            column: token.column,
            token: token.text.to_string(),
        })
}

fn parse_missing(token: &Token<'_>, marker: &str) -> Result<usize, AssemblyError> {
    let count = marker
        .strip_prefix(MISSING_PREFIX)
        .and_then(|rest| rest.strip_suffix(']'))
        .and_then(|rest| {
            rest.strip_suffix(" bytes")
                .or_else(|| rest.strip_suffix(" byte"))
        })
        .and_then(|digits| digits.parse::<usize>().ok())
        .filter(|&count| count > 0);
    count.ok_or_else(|| AssemblyError::InvalidMissingBytes {
        line: token.line,
        column: token.column,
        token: token.text.to_string(),
    })
}

fn parse_literal(token: &Token<'_>) -> Result<Literal, AssemblyError> {
    match token.text.find('[') {
        Some(split) => {
            let (hex_part, marker) = token.text.split_at(split);
            Ok(Literal {
                bytes: parse_hex(token, hex_part)?,
                missing: Some(parse_missing(token, marker)?),
            })
        }
        None if token.text.starts_with(HEX_PREFIX) => Ok(Literal {
            bytes: parse_hex(token, token.text)?,
            missing: None,
        }),
        None => Err(AssemblyError::InvalidHex {
            line: token.line,
            column: token.column,
            token: token.text.to_string(),
        }),
    }
}

struct Assembler<'a> {
    tokens: std::iter::Peekable<std::vec::IntoIter<Token<'a>>>,
    version: InstructionSetVersion,
}

impl<'a> Assembler<'a> {
    fn operand(&mut self, mnemonic: &Token<'_>, expected: &'static str) -> Result<Token<'a>, AssemblyError> {
        self.tokens.next().ok_or_else(|| AssemblyError::ExpectedOperand {
            line: mnemonic.line,
            column: mnemonic.column,
            opcode: mnemonic.text.to_string(),
            expected,
        })
    }

    fn instruction(&mut self, mnemonic: Token<'a>) -> Result<Instruction, AssemblyError> {
        let opcode =
            opcode_byte(mnemonic.text, self.version).ok_or_else(|| AssemblyError::UnknownOpcode {
                line: mnemonic.line,
                column: mnemonic.column,
                name: mnemonic.text.to_string(),
            })?;
        match length_prefix_width(opcode) {
            None => Ok(Instruction::OpcodeOnly { opcode }),
            Some(_) if opcode == Opcode::Op0.byte() => Ok(Instruction::Push {
                opcode,
                data: Vec::new(),
            }),
            Some(0) => {
                let token = self.operand(&mnemonic, "a hex payload")?;
                let literal = parse_literal(&token)?;
                push_with_length(&mnemonic, opcode, opcode as usize, literal)
            }
            Some(width) => self.push_data(mnemonic, opcode, width),
        }
    }

    /// `OP_PUSHDATA_N <length> <payload>`, or `OP_PUSHDATA_N <prefix>[missing ..]`.
    fn push_data(&mut self, mnemonic: Token<'a>, opcode: u8, width: usize) -> Result<Instruction, AssemblyError> {
        let token = self.operand(&mnemonic, "a length or truncated length prefix")?;
        if !token.text.bytes().all(|b| b.is_ascii_digit()) {
            let literal = parse_literal(&token)?;
            return match literal.missing {
                Some(missing) if literal.bytes.len() + missing == width => Ok(Instruction::MalformedPush {
                    opcode,
                    data: Vec::new(),
                    expected_data_bytes: None,
                    length_prefix: Some(literal.bytes),
                    expected_length_bytes: Some(width),
                }),
                _ => Err(AssemblyError::InvalidLength {
                    line: token.line,
                    column: token.column,
                    token: token.text.to_string(),
                }),
            };
        }

        let max_length = if width >= 4 {
            u32::MAX as u64
        } else {
            (1u64 << (8 * width)) - 1
        };
        let length = token
            .text
            .parse::<u64>()
            .ok()
            .filter(|&length| length <= max_length)
            .ok_or_else(|| AssemblyError::InvalidLength {
                line: token.line,
                column: token.column,
                token: token.text.to_string(),
            })?;
        let payload = self.operand(&mnemonic, "a hex payload")?;
        let literal = parse_literal(&payload)?;
        push_with_length(&mnemonic, opcode, length as usize, literal)
    }
}

fn push_with_length(
    mnemonic: &Token<'_>,
    opcode: u8,
    expected: usize,
    literal: Literal,
) -> Result<Instruction, AssemblyError> {
    let provided = literal.bytes.len() + literal.missing.unwrap_or(0);
    if provided != expected {
        return Err(AssemblyError::PushLengthMismatch {
            line: mnemonic.line,
            column: mnemonic.column,
            opcode: mnemonic.text.to_string(),
            expected,
            actual: provided,
        });
    }
    Ok(match literal.missing {
        None => Instruction::Push {
            opcode,
            data: literal.bytes,
        },
        Some(_) => Instruction::MalformedPush {
            opcode,
            data: literal.bytes,
            expected_data_bytes: Some(expected),
            length_prefix: None,
            expected_length_bytes: None,
        },
    })
}

/// Assembles mnemonic text into instructions.
pub fn assemble(source: &str, version: InstructionSetVersion) -> Result<Vec<Instruction>, AssemblyError> {
    let mut assembler = Assembler {
        tokens: tokenize_source(source)?.into_iter().peekable(),
        version,
    };
    let mut instructions = Vec::new();
    while let Some(mnemonic) = assembler.tokens.next() {
        if mnemonic.text.starts_with(HEX_PREFIX) || mnemonic.text.starts_with('[') {
            return Err(AssemblyError::UnexpectedToken {
                line: mnemonic.line,
                column: mnemonic.column,
                token: mnemonic.text.to_string(),
            });
        }
        let instruction = assembler.instruction(mnemonic)?;
        if instruction.is_malformed()
            && let Some(next) = assembler.tokens.peek()
        {
            return Err(AssemblyError::TrailingAfterMalformed {
                line: next.line,
                column: next.column,
            });
        }
        instructions.push(instruction);
    }
    Ok(instructions)
}

/// Assembles mnemonic text directly into bytecode.
pub fn assemble_bytecode(source: &str, version: InstructionSetVersion) -> Result<Vec<u8>, AssemblyError> {
    assemble(source, version).map(|instructions| serialize(&instructions))
}

/// Convenience: assemble directly from file path.
pub fn assemble_file<P: AsRef<Path>>(path: P, version: InstructionSetVersion) -> Result<Vec<u8>, AssemblyError> {
    let path_ref = path.as_ref();
    let source = fs::read_to_string(path_ref).map_err(|e| AssemblyError::Io {
        path: path_ref.display().to_string(),
        message: e.to_string(),
    })?;
    assemble_bytecode(&source, version)
}

/// Formats a compiler-style diagnostic for assembly failures.
pub fn render_assembly_diagnostic(file: &str, source: &str, line: usize, column: usize, message: &str) -> String {
    let mut diag = String::new();
    let _ = writeln!(diag, "error: {message}");
    let _ = writeln!(diag, " --> {file}:{line}:{column}");

    if let Some(raw_line) = source.lines().nth(line.saturating_sub(1)) {
        let line_text = raw_line.trim_end_matches('\r');
        let underline = " ".repeat(column.saturating_sub(1));
        let _ = writeln!(diag, "  |");
        let _ = writeln!(diag, "{:>4} | {}", line, line_text);
        let _ = writeln!(diag, "  | {}^", underline);
    }

    diag
}

/// Renders `err` as a diagnostic when it points into `source`, else as a one-line message.
pub fn describe_assembly_error(file: &str, source: &str, err: &AssemblyError) -> String {
    match err.location() {
        Some((line, column)) => render_assembly_diagnostic(file, source, line, column, &err.to_string()),
        None => format!("error: {err}"),
    }
}
