//! Instruction Set Architecture (ISA) definitions.
//!
//! The [`for_each_opcode!`](crate::for_each_opcode) macro holds the canonical
//! table of named opcodes and invokes a callback macro for code generation.
//!
//! This module generates:
//! - The [`Opcode`] enum with byte and mnemonic mappings
//! - [`Opcode::decode`] for resolving a byte under an [`InstructionSetVersion`]
//!
//! Opcodes without an entry in the table are derived:
//! - `0x01..=0x4b` are `OP_PUSHBYTES_N`, pushing the next `N` bytes
//! - every other unlisted byte is `OP_UNKNOWNN`, failing when executed
//!
//! # Versions
//!
//! `0x65`/`0x66` are `OP_VERIF`/`OP_VERNOTIF` (always failing) until
//! [`InstructionSetVersion::Bch2026`], where they become the loop opcodes
//! `OP_BEGIN`/`OP_UNTIL`.

use std::borrow::Cow;
use std::fmt;

/// Largest opcode encoding its push length in the opcode byte itself.
pub const MAX_PUSHBYTES_OPCODE: u8 = 0x4b;

/// Largest opcode considered a push by push-only checks (`OP_16`).
pub const MAX_PUSH_ONLY_OPCODE: u8 = 0x60;

/// Invokes a callback macro with the complete named-opcode list.
#[macro_export]
macro_rules! for_each_opcode {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Push
            // =========================
            /// Pushes an empty item.
            Op0 = 0x00, "OP_0", Push,
            /// Pushes data with a 1-byte length prefix.
            PushData1 = 0x4c, "OP_PUSHDATA_1", Push,
            /// Pushes data with a 2-byte length prefix.
            PushData2 = 0x4d, "OP_PUSHDATA_2", Push,
            /// Pushes data with a 4-byte length prefix.
            PushData4 = 0x4e, "OP_PUSHDATA_4", Push,
            // =========================
            // Constants
            // =========================
            Op1Negate = 0x4f, "OP_1NEGATE", Constant,
            Reserved = 0x50, "OP_RESERVED", Reserved,
            Op1 = 0x51, "OP_1", Constant,
            Op2 = 0x52, "OP_2", Constant,
            Op3 = 0x53, "OP_3", Constant,
            Op4 = 0x54, "OP_4", Constant,
            Op5 = 0x55, "OP_5", Constant,
            Op6 = 0x56, "OP_6", Constant,
            Op7 = 0x57, "OP_7", Constant,
            Op8 = 0x58, "OP_8", Constant,
            Op9 = 0x59, "OP_9", Constant,
            Op10 = 0x5a, "OP_10", Constant,
            Op11 = 0x5b, "OP_11", Constant,
            Op12 = 0x5c, "OP_12", Constant,
            Op13 = 0x5d, "OP_13", Constant,
            Op14 = 0x5e, "OP_14", Constant,
            Op15 = 0x5f, "OP_15", Constant,
            Op16 = 0x60, "OP_16", Constant,
            // =========================
            // Flow control
            // =========================
            Nop = 0x61, "OP_NOP", Nop,
            Ver = 0x62, "OP_VER", Reserved,
            If = 0x63, "OP_IF", Flow,
            NotIf = 0x64, "OP_NOTIF", Flow,
            /// Fails even when unexecuted; `OP_BEGIN` in loop-enabled versions.
            Verif = 0x65, "OP_VERIF", Reserved,
            /// Fails even when unexecuted; `OP_UNTIL` in loop-enabled versions.
            VerNotIf = 0x66, "OP_VERNOTIF", Reserved,
            Else = 0x67, "OP_ELSE", Flow,
            EndIf = 0x68, "OP_ENDIF", Flow,
            Verify = 0x69, "OP_VERIFY", Flow,
            Return = 0x6a, "OP_RETURN", Flow,
            // =========================
            // Stack
            // =========================
            ToAltStack = 0x6b, "OP_TOALTSTACK", Stack,
            FromAltStack = 0x6c, "OP_FROMALTSTACK", Stack,
            Op2Drop = 0x6d, "OP_2DROP", Stack,
            Op2Dup = 0x6e, "OP_2DUP", Stack,
            Op3Dup = 0x6f, "OP_3DUP", Stack,
            Op2Over = 0x70, "OP_2OVER", Stack,
            Op2Rot = 0x71, "OP_2ROT", Stack,
            Op2Swap = 0x72, "OP_2SWAP", Stack,
            IfDup = 0x73, "OP_IFDUP", Stack,
            Depth = 0x74, "OP_DEPTH", Stack,
            Drop = 0x75, "OP_DROP", Stack,
            Dup = 0x76, "OP_DUP", Stack,
            Nip = 0x77, "OP_NIP", Stack,
            Over = 0x78, "OP_OVER", Stack,
            Pick = 0x79, "OP_PICK", Stack,
            Roll = 0x7a, "OP_ROLL", Stack,
            Rot = 0x7b, "OP_ROT", Stack,
            Swap = 0x7c, "OP_SWAP", Stack,
            Tuck = 0x7d, "OP_TUCK", Stack,
            // =========================
            // Splice
            // =========================
            Cat = 0x7e, "OP_CAT", Splice,
            Split = 0x7f, "OP_SPLIT", Splice,
            Num2Bin = 0x80, "OP_NUM2BIN", Splice,
            Bin2Num = 0x81, "OP_BIN2NUM", Splice,
            Size = 0x82, "OP_SIZE", Splice,
            // =========================
            // Bitwise
            // =========================
            Invert = 0x83, "OP_INVERT", Disabled,
            And = 0x84, "OP_AND", Bitwise,
            Or = 0x85, "OP_OR", Bitwise,
            Xor = 0x86, "OP_XOR", Bitwise,
            Equal = 0x87, "OP_EQUAL", Bitwise,
            EqualVerify = 0x88, "OP_EQUALVERIFY", Bitwise,
            Reserved1 = 0x89, "OP_RESERVED1", Reserved,
            Reserved2 = 0x8a, "OP_RESERVED2", Reserved,
            // =========================
            // Arithmetic
            // =========================
            Op1Add = 0x8b, "OP_1ADD", Arithmetic,
            Op1Sub = 0x8c, "OP_1SUB", Arithmetic,
            Op2Mul = 0x8d, "OP_2MUL", Disabled,
            Op2Div = 0x8e, "OP_2DIV", Disabled,
            Negate = 0x8f, "OP_NEGATE", Arithmetic,
            Abs = 0x90, "OP_ABS", Arithmetic,
            Not = 0x91, "OP_NOT", Arithmetic,
            Op0NotEqual = 0x92, "OP_0NOTEQUAL", Arithmetic,
            Add = 0x93, "OP_ADD", Arithmetic,
            Sub = 0x94, "OP_SUB", Arithmetic,
            Mul = 0x95, "OP_MUL", Arithmetic,
            Div = 0x96, "OP_DIV", Arithmetic,
            Mod = 0x97, "OP_MOD", Arithmetic,
            LShift = 0x98, "OP_LSHIFT", Disabled,
            RShift = 0x99, "OP_RSHIFT", Disabled,
            BoolAnd = 0x9a, "OP_BOOLAND", Arithmetic,
            BoolOr = 0x9b, "OP_BOOLOR", Arithmetic,
            NumEqual = 0x9c, "OP_NUMEQUAL", Arithmetic,
            NumEqualVerify = 0x9d, "OP_NUMEQUALVERIFY", Arithmetic,
            NumNotEqual = 0x9e, "OP_NUMNOTEQUAL", Arithmetic,
            LessThan = 0x9f, "OP_LESSTHAN", Arithmetic,
            GreaterThan = 0xa0, "OP_GREATERTHAN", Arithmetic,
            LessThanOrEqual = 0xa1, "OP_LESSTHANOREQUAL", Arithmetic,
            GreaterThanOrEqual = 0xa2, "OP_GREATERTHANOREQUAL", Arithmetic,
            Min = 0xa3, "OP_MIN", Arithmetic,
            Max = 0xa4, "OP_MAX", Arithmetic,
            Within = 0xa5, "OP_WITHIN", Arithmetic,
            // =========================
            // Crypto
            // =========================
            Ripemd160 = 0xa6, "OP_RIPEMD160", Crypto,
            Sha1 = 0xa7, "OP_SHA1", Crypto,
            Sha256 = 0xa8, "OP_SHA256", Crypto,
            Hash160 = 0xa9, "OP_HASH160", Crypto,
            Hash256 = 0xaa, "OP_HASH256", Crypto,
            CodeSeparator = 0xab, "OP_CODESEPARATOR", Crypto,
            CheckSig = 0xac, "OP_CHECKSIG", Crypto,
            CheckSigVerify = 0xad, "OP_CHECKSIGVERIFY", Crypto,
            CheckMultiSig = 0xae, "OP_CHECKMULTISIG", Crypto,
            CheckMultiSigVerify = 0xaf, "OP_CHECKMULTISIGVERIFY", Crypto,
            // =========================
            // Locktime and upgradable no-ops
            // =========================
            Nop1 = 0xb0, "OP_NOP1", Nop,
            CheckLockTimeVerify = 0xb1, "OP_CHECKLOCKTIMEVERIFY", Locktime,
            CheckSequenceVerify = 0xb2, "OP_CHECKSEQUENCEVERIFY", Locktime,
            Nop4 = 0xb3, "OP_NOP4", Nop,
            Nop5 = 0xb4, "OP_NOP5", Nop,
            Nop6 = 0xb5, "OP_NOP6", Nop,
            Nop7 = 0xb6, "OP_NOP7", Nop,
            Nop8 = 0xb7, "OP_NOP8", Nop,
            Nop9 = 0xb8, "OP_NOP9", Nop,
            Nop10 = 0xb9, "OP_NOP10", Nop,
            CheckDataSig = 0xba, "OP_CHECKDATASIG", Crypto,
            CheckDataSigVerify = 0xbb, "OP_CHECKDATASIGVERIFY", Crypto,
            ReverseBytes = 0xbc, "OP_REVERSEBYTES", Splice,
            // =========================
            // Native introspection
            // =========================
            InputIndex = 0xc0, "OP_INPUTINDEX", Introspection,
            ActiveBytecode = 0xc1, "OP_ACTIVEBYTECODE", Introspection,
            TxVersion = 0xc2, "OP_TXVERSION", Introspection,
            TxInputCount = 0xc3, "OP_TXINPUTCOUNT", Introspection,
            TxOutputCount = 0xc4, "OP_TXOUTPUTCOUNT", Introspection,
            TxLocktime = 0xc5, "OP_TXLOCKTIME", Introspection,
            UtxoValue = 0xc6, "OP_UTXOVALUE", Introspection,
            UtxoBytecode = 0xc7, "OP_UTXOBYTECODE", Introspection,
            OutpointTxHash = 0xc8, "OP_OUTPOINTTXHASH", Introspection,
            OutpointIndex = 0xc9, "OP_OUTPOINTINDEX", Introspection,
            InputBytecode = 0xca, "OP_INPUTBYTECODE", Introspection,
            InputSequenceNumber = 0xcb, "OP_INPUTSEQUENCENUMBER", Introspection,
            OutputValue = 0xcc, "OP_OUTPUTVALUE", Introspection,
            OutputBytecode = 0xcd, "OP_OUTPUTBYTECODE", Introspection,
        }
    };
}

/// Coarse opcode grouping used for dispatch rules and documentation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Category {
    Push,
    Constant,
    Flow,
    Loop,
    Stack,
    Splice,
    Bitwise,
    Arithmetic,
    Crypto,
    Locktime,
    Introspection,
    Nop,
    Reserved,
    Disabled,
}

#[macro_export]
macro_rules! define_opcodes {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $byte:literal, $mnemonic:literal, $category:ident
        ),* $(,)?
    ) => {
        /// A named opcode.
        ///
        /// `OP_PUSHBYTES_N` and unassigned bytes have no variant; see
        /// [`opcode_name`].
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
        pub enum Opcode {
            $(
                $(#[$doc])*
                $name,
            )*
            /// Opens a loop (loop-enabled versions only, byte `0x65`).
            Begin,
            /// Closes a loop (loop-enabled versions only, byte `0x66`).
            Until,
        }

        impl Opcode {
            /// All table opcodes, excluding the version-dependent loop opcodes.
            pub const TABLE: &'static [Opcode] = &[$( Opcode::$name, )*];

            /// Returns the byte encoding of this opcode.
            pub const fn byte(self) -> u8 {
                match self {
                    $( Opcode::$name => $byte, )*
                    Opcode::Begin => 0x65,
                    Opcode::Until => 0x66,
                }
            }

            /// Returns the assembly mnemonic for this opcode.
            pub const fn mnemonic(self) -> &'static str {
                match self {
                    $( Opcode::$name => $mnemonic, )*
                    Opcode::Begin => "OP_BEGIN",
                    Opcode::Until => "OP_UNTIL",
                }
            }

            pub const fn category(self) -> Category {
                match self {
                    $( Opcode::$name => Category::$category, )*
                    Opcode::Begin | Opcode::Until => Category::Loop,
                }
            }

            const fn from_table(byte: u8) -> Option<Opcode> {
                match byte {
                    $( $byte => Some(Opcode::$name), )*
                    _ => None,
                }
            }
        }
    };
}

for_each_opcode!(define_opcodes);

/// Protocol upgrade whose instruction set and limits apply to an evaluation.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum InstructionSetVersion {
    /// 2023 rules: 520-byte items, 8-byte numbers, 201-operation limit.
    Bch2023,
    /// 2025 rules: VM limits with density-based operation cost, big integers.
    #[default]
    Bch2025,
    /// 2025 rules plus `OP_BEGIN`/`OP_UNTIL` loops.
    Bch2026,
}

impl InstructionSetVersion {
    pub const fn has_loops(self) -> bool {
        matches!(self, InstructionSetVersion::Bch2026)
    }

    /// Parses a CLI version label (`2023`, `2025`, `2026`).
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "2023" | "bch_2023" => Some(InstructionSetVersion::Bch2023),
            "2025" | "bch_2025" => Some(InstructionSetVersion::Bch2025),
            "2026" | "bch_2026" => Some(InstructionSetVersion::Bch2026),
            _ => None,
        }
    }
}

impl fmt::Display for InstructionSetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            InstructionSetVersion::Bch2023 => "BCH_2023",
            InstructionSetVersion::Bch2025 => "BCH_2025",
            InstructionSetVersion::Bch2026 => "BCH_2026",
        };
        f.write_str(label)
    }
}

impl Opcode {
    /// Resolves `byte` under `version`.
    ///
    /// Returns `None` for `OP_PUSHBYTES_N` and unassigned bytes.
    pub fn decode(byte: u8, version: InstructionSetVersion) -> Option<Opcode> {
        if version.has_loops() {
            match byte {
                0x65 => return Some(Opcode::Begin),
                0x66 => return Some(Opcode::Until),
                _ => {}
            }
        }
        Opcode::from_table(byte)
    }

    /// Resolves a mnemonic under `version`, accepting the `OP_FALSE`/`OP_TRUE` aliases.
    pub fn from_mnemonic(name: &str, version: InstructionSetVersion) -> Option<Opcode> {
        match name {
            "OP_FALSE" => return Some(Opcode::Op0),
            "OP_TRUE" => return Some(Opcode::Op1),
            _ => {}
        }
        if version.has_loops() {
            match name {
                "OP_BEGIN" => return Some(Opcode::Begin),
                "OP_UNTIL" => return Some(Opcode::Until),
                "OP_VERIF" | "OP_VERNOTIF" => return None,
                _ => {}
            }
        }
        Opcode::TABLE
            .iter()
            .copied()
            .find(|opcode| opcode.mnemonic() == name)
    }

    /// Opcodes that fail even inside unexecuted branches.
    pub const fn is_disabled(self) -> bool {
        matches!(self.category(), Category::Disabled)
    }

    /// Opcodes evaluated even inside unexecuted branches.
    pub const fn is_conditional(self) -> bool {
        matches!(
            self,
            Opcode::If | Opcode::NotIf | Opcode::Else | Opcode::EndIf | Opcode::Begin | Opcode::Until
        )
    }
}

/// Returns the mnemonic of `byte` under `version`.
pub fn opcode_name(byte: u8, version: InstructionSetVersion) -> Cow<'static, str> {
    match Opcode::decode(byte, version) {
        Some(opcode) => Cow::Borrowed(opcode.mnemonic()),
        None if (1..=MAX_PUSHBYTES_OPCODE).contains(&byte) => {
            Cow::Owned(format!("OP_PUSHBYTES_{byte}"))
        }
        None => Cow::Owned(format!("OP_UNKNOWN{byte}")),
    }
}

/// Returns the byte for a mnemonic under `version`, including derived names.
pub fn opcode_byte(name: &str, version: InstructionSetVersion) -> Option<u8> {
    if let Some(opcode) = Opcode::from_mnemonic(name, version) {
        return Some(opcode.byte());
    }
    if let Some(length) = name.strip_prefix("OP_PUSHBYTES_") {
        let byte = parse_canonical_u8(length)?;
        return (1..=MAX_PUSHBYTES_OPCODE).contains(&byte).then_some(byte);
    }
    let byte = parse_canonical_u8(name.strip_prefix("OP_UNKNOWN")?)?;
    let assigned = Opcode::decode(byte, version).is_some() || byte <= MAX_PUSHBYTES_OPCODE;
    (!assigned).then_some(byte)
}

fn parse_canonical_u8(digits: &str) -> Option<u8> {
    if digits.is_empty() || (digits.len() > 1 && digits.starts_with('0')) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_VERSIONS: [InstructionSetVersion; 3] = [
        InstructionSetVersion::Bch2023,
        InstructionSetVersion::Bch2025,
        InstructionSetVersion::Bch2026,
    ];

    #[test]
    fn table_bytes_are_unique() {
        let mut seen = [false; 256];
        for opcode in Opcode::TABLE {
            let byte = opcode.byte() as usize;
            assert!(!seen[byte], "duplicate opcode byte 0x{byte:02x}");
            seen[byte] = true;
        }
    }

    #[test]
    fn every_byte_name_round_trips() {
        for version in ALL_VERSIONS {
            for byte in 0..=u8::MAX {
                let name = opcode_name(byte, version);
                assert_eq!(opcode_byte(&name, version), Some(byte), "{name} under {version}");
            }
        }
    }

    #[test]
    fn loop_opcodes_depend_on_version() {
        assert_eq!(
            Opcode::decode(0x65, InstructionSetVersion::Bch2025),
            Some(Opcode::Verif)
        );
        assert_eq!(
            Opcode::decode(0x65, InstructionSetVersion::Bch2026),
            Some(Opcode::Begin)
        );
        assert_eq!(opcode_name(0x66, InstructionSetVersion::Bch2026), "OP_UNTIL");
        assert_eq!(opcode_byte("OP_BEGIN", InstructionSetVersion::Bch2023), None);
    }

    #[test]
    fn derived_names() {
        let version = InstructionSetVersion::Bch2025;
        assert_eq!(opcode_name(0x01, version), "OP_PUSHBYTES_1");
        assert_eq!(opcode_name(0x4b, version), "OP_PUSHBYTES_75");
        assert_eq!(opcode_name(0xce, version), "OP_UNKNOWN206");
        assert_eq!(opcode_name(0xff, version), "OP_UNKNOWN255");
        assert_eq!(opcode_byte("OP_PUSHBYTES_76", version), None);
        assert_eq!(opcode_byte("OP_PUSHBYTES_01", version), None);
        assert_eq!(opcode_byte("OP_UNKNOWN118", version), None);
        assert_eq!(opcode_byte("OP_TRUE", version), Some(0x51));
    }

    #[test]
    fn disabled_and_conditional_opcodes() {
        assert!(Opcode::Op2Mul.is_disabled());
        assert!(Opcode::Invert.is_disabled());
        assert!(!Opcode::Mul.is_disabled());
        assert!(Opcode::Else.is_conditional());
        assert!(!Opcode::Verify.is_conditional());
    }
}
