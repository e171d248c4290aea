//! Instruction codec.
//!
//! Parses bytecode into [`Instruction`]s and serializes them back. Parsing
//! never fails: a push whose length prefix or payload runs past the end of the
//! bytecode becomes a trailing [`Instruction::MalformedPush`] that keeps every
//! remaining byte, so `serialize(parse(b)) == b` for all byte sequences.
//!
//! # Push encoding
//!
//! | Opcode            | Length prefix            |
//! |-------------------|--------------------------|
//! | `OP_0`            | none, pushes empty item  |
//! | `OP_PUSHBYTES_N`  | none, length is `N`      |
//! | `OP_PUSHDATA_1`   | 1 byte                   |
//! | `OP_PUSHDATA_2`   | 2 bytes, little-endian   |
//! | `OP_PUSHDATA_4`   | 4 bytes, little-endian   |

use crate::virtual_machine::isa::{MAX_PUSH_ONLY_OPCODE, MAX_PUSHBYTES_OPCODE, Opcode};

const OP_0: u8 = Opcode::Op0.byte();
const OP_PUSHDATA_1: u8 = Opcode::PushData1.byte();
const OP_PUSHDATA_2: u8 = Opcode::PushData2.byte();
const OP_PUSHDATA_4: u8 = Opcode::PushData4.byte();
const OP_1NEGATE: u8 = Opcode::Op1Negate.byte();
const OP_1: u8 = Opcode::Op1.byte();

/// A single decoded instruction.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Instruction {
    /// Any opcode that is not a push.
    OpcodeOnly { opcode: u8 },
    /// A push whose payload is fully present.
    Push { opcode: u8, data: Vec<u8> },
    /// A push truncated by the end of the bytecode. Always the last instruction.
    ///
    /// Either the length prefix is incomplete (`length_prefix` holds the bytes
    /// present, `expected_length_bytes` its full width) or the payload is
    /// (`data` holds the bytes present, `expected_data_bytes` the declared length).
    MalformedPush {
        opcode: u8,
        data: Vec<u8>,
        expected_data_bytes: Option<usize>,
        length_prefix: Option<Vec<u8>>,
        expected_length_bytes: Option<usize>,
    },
}

impl Instruction {
    pub fn opcode(&self) -> u8 {
        match self {
            Instruction::OpcodeOnly { opcode }
            | Instruction::Push { opcode, .. }
            | Instruction::MalformedPush { opcode, .. } => *opcode,
        }
    }

    /// Pushed payload of a well-formed push.
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Instruction::Push { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Instruction::MalformedPush { .. })
    }

    /// Builds the shortest push of `data`.
    ///
    /// Single bytes `1..=16` and `0x81` use `OP_1`..`OP_16` / `OP_1NEGATE`.
    pub fn minimal_push(data: &[u8]) -> Instruction {
        match data {
            [] => Instruction::Push {
                opcode: OP_0,
                data: Vec::new(),
            },
            [value @ 1..=16] => Instruction::OpcodeOnly {
                opcode: OP_1 + value - 1,
            },
            [0x81] => Instruction::OpcodeOnly { opcode: OP_1NEGATE },
            _ => Instruction::Push {
                opcode: minimal_push_opcode(data.len()),
                data: data.to_vec(),
            },
        }
    }

    /// Returns false for pushes that another encoding could express in fewer bytes.
    pub fn is_minimal_push(&self) -> bool {
        let Instruction::Push { opcode, data } = self else {
            return true;
        };
        match data.as_slice() {
            [] => *opcode == OP_0,
            [1..=16] | [0x81] => false,
            _ => *opcode == minimal_push_opcode(data.len()),
        }
    }

    /// Number of bytes this instruction occupies when serialized.
    pub fn encoded_len(&self) -> usize {
        match self {
            Instruction::OpcodeOnly { .. } => 1,
            Instruction::Push { opcode, data } => {
                1 + length_prefix_width(*opcode).unwrap_or(0) + data.len()
            }
            Instruction::MalformedPush {
                opcode,
                data,
                length_prefix,
                ..
            } => match length_prefix {
                Some(prefix) => 1 + prefix.len(),
                None => 1 + length_prefix_width(*opcode).unwrap_or(0) + data.len(),
            },
        }
    }

    /// Appends the serialized instruction to `out`.
    pub fn write(&self, out: &mut Vec<u8>) {
        match self {
            Instruction::OpcodeOnly { opcode } => out.push(*opcode),
            Instruction::Push { opcode, data } => {
                out.push(*opcode);
                write_length_prefix(out, *opcode, data.len());
                out.extend_from_slice(data);
            }
            Instruction::MalformedPush {
                opcode,
                data,
                expected_data_bytes,
                length_prefix,
                ..
            } => {
                out.push(*opcode);
                if let Some(prefix) = length_prefix {
                    out.extend_from_slice(prefix);
                    return;
                }
                write_length_prefix(out, *opcode, expected_data_bytes.unwrap_or(data.len()));
                out.extend_from_slice(data);
            }
        }
    }
}

/// Width of the explicit length prefix for push opcode `opcode`.
///
/// `Some(0)` for `OP_0` and `OP_PUSHBYTES_N`, `None` for non-push opcodes.
pub fn length_prefix_width(opcode: u8) -> Option<usize> {
    match opcode {
        0..=MAX_PUSHBYTES_OPCODE => Some(0),
        OP_PUSHDATA_1 => Some(1),
        OP_PUSHDATA_2 => Some(2),
        OP_PUSHDATA_4 => Some(4),
        _ => None,
    }
}

fn write_length_prefix(out: &mut Vec<u8>, opcode: u8, length: usize) {
    match opcode {
        OP_PUSHDATA_1 => out.push(length as u8),
        OP_PUSHDATA_2 => out.extend_from_slice(&(length as u16).to_le_bytes()),
        OP_PUSHDATA_4 => out.extend_from_slice(&(length as u32).to_le_bytes()),
        _ => {}
    }
}

fn minimal_push_opcode(length: usize) -> u8 {
    match length {
        0 => OP_0,
        1..=0x4b => length as u8,
        0x4c..=0xff => OP_PUSHDATA_1,
        0x100..=0xffff => OP_PUSHDATA_2,
        _ => OP_PUSHDATA_4,
    }
}

/// Parses bytecode into instructions.
///
/// Stops at the first truncated push, which becomes the final
/// [`Instruction::MalformedPush`].
pub fn parse(bytecode: &[u8]) -> Vec<Instruction> {
    let mut instructions = Vec::new();
    let mut i = 0;

    while i < bytecode.len() {
        let opcode = bytecode[i];
        i += 1;
        let rest = &bytecode[i..];

        let Some(width) = length_prefix_width(opcode) else {
            instructions.push(Instruction::OpcodeOnly { opcode });
            continue;
        };

        let length = if width == 0 {
            opcode as usize
        } else if rest.len() < width {
            instructions.push(Instruction::MalformedPush {
                opcode,
                data: Vec::new(),
                expected_data_bytes: None,
                length_prefix: Some(rest.to_vec()),
                expected_length_bytes: Some(width),
            });
            break;
        } else {
            let mut le = [0u8; 4];
            le[..width].copy_from_slice(&rest[..width]);
            i += width;
            u32::from_le_bytes(le) as usize
        };

        let rest = &bytecode[i..];
        if rest.len() < length {
            instructions.push(Instruction::MalformedPush {
                opcode,
                data: rest.to_vec(),
                expected_data_bytes: Some(length),
                length_prefix: None,
                expected_length_bytes: None,
            });
            break;
        }
        instructions.push(Instruction::Push {
            opcode,
            data: rest[..length].to_vec(),
        });
        i += length;
    }

    instructions
}

/// Serializes instructions, computing length prefixes from payload lengths.
pub fn serialize(instructions: &[Instruction]) -> Vec<u8> {
    let mut out = Vec::with_capacity(instructions.iter().map(Instruction::encoded_len).sum());
    for instruction in instructions {
        instruction.write(&mut out);
    }
    out
}

/// Minimal push of `data`, serialized.
pub fn encode_data_push(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    Instruction::minimal_push(data).write(&mut out);
    out
}

/// Returns true if every instruction is a push or `OP_1NEGATE`..`OP_16`.
pub fn is_push_only(instructions: &[Instruction]) -> bool {
    instructions
        .iter()
        .all(|instruction| instruction.opcode() <= MAX_PUSH_ONLY_OPCODE)
}
