use crate::core::sighash::SighashError;

/// Errors that terminate an evaluation.
///
/// Stored in [`VmState::error`](super::state::VmState::error) rather than
/// propagated, so a trace always ends with the state that failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmError {
    // =========================
    // Structure
    // =========================
    #[error("Program must be long enough to push the requested number of bytes.")]
    MalformedPush,
    #[error("Push operations must use the smallest possible encoding.")]
    NonMinimalPush,
    #[error("Program exceeded the maximum bytecode length ({limit} bytes).")]
    ExceededMaximumBytecodeLength { limit: usize },
    #[error("Unlocking bytecode may contain only push operations.")]
    RequiresPushOnly,

    // =========================
    // Opcodes
    // =========================
    #[error("Program called an OP_RETURN operation.")]
    CalledReturn,
    #[error("Program contains a disabled opcode: {opcode}.")]
    DisabledOpcode { opcode: &'static str },
    #[error("Program called a reserved opcode: {opcode}.")]
    CalledReserved { opcode: &'static str },
    #[error("Program called an unassigned opcode: 0x{opcode:02x}.")]
    UnknownOpcode { opcode: u8 },
    #[error("Program called a disallowed upgradable non-operation: {opcode}.")]
    CalledUpgradableNop { opcode: &'static str },
    #[error("Program failed an {opcode} operation.")]
    FailedVerify { opcode: &'static str },

    // =========================
    // Control flow
    // =========================
    #[error("Encountered an OP_ELSE outside of an OP_IF ... OP_ENDIF block.")]
    UnexpectedElse,
    #[error("Encountered a second OP_ELSE in the same OP_IF ... OP_ENDIF block.")]
    RepeatedElse,
    #[error("Encountered an OP_ENDIF which is not following a matching OP_IF.")]
    UnexpectedEndIf,
    #[error("Encountered an OP_UNTIL which is not following a matching OP_BEGIN.")]
    UnexpectedUntil,
    #[error("Program completed with an unbalanced conditional or loop (control stack depth {depth}).")]
    NonEmptyControlStack { depth: usize },
    #[error("Program completed with an unexpected number of items on the stack (must be exactly 1, found {found}).")]
    RequiresCleanStack { found: usize },
    #[error("Program completed with a non-truthy value on top of the stack.")]
    UnsuccessfulEvaluation,

    // =========================
    // Stack
    // =========================
    #[error("Tried to read from an empty stack.")]
    EmptyStack,
    #[error("Tried to read from an empty alternate stack.")]
    EmptyAlternateStack,
    #[error("Tried to access stack index {index} with a stack depth of {depth}.")]
    InvalidStackIndex { index: i64, depth: usize },
    #[error("Program attempted to split an item of length {length} at index {index}.")]
    InvalidSplitIndex { index: i64, length: usize },
    #[error("Program attempted a bitwise operation on items of different lengths.")]
    MismatchedBitwiseOperandLength,
    #[error("Program attempted an OP_NUM2BIN into {size} bytes, which cannot encode the number.")]
    InsufficientLength { size: usize },

    // =========================
    // Numbers
    // =========================
    #[error("Program attempted to read a number encoded in more than the minimum number of bytes.")]
    NonMinimalNumber,
    #[error("Program attempted to read a {length}-byte number (maximum {limit} bytes).")]
    ExceededMaximumNumberLength { length: usize, limit: usize },
    #[error("Program produced a number exceeding the maximum length ({limit} bytes).")]
    NumberOverflow { limit: usize },
    #[error("Program attempted to divide a number by zero.")]
    DivisionByZero,
    #[error("Program expected a non-negative number.")]
    NegativeNumber,

    // =========================
    // Resource limits
    // =========================
    #[error("Program attempted to push an item of {length} bytes (maximum {limit} bytes).")]
    ExceededMaximumStackItemLength { length: usize, limit: usize },
    #[error("Program exceeded the maximum stack depth ({limit} items).")]
    ExceededMaximumStackDepth { limit: usize },
    #[error("Program exceeded the maximum control stack depth ({limit} items).")]
    ExceededMaximumControlStackDepth { limit: usize },
    #[error("Program exceeded the maximum operation count ({limit} operations).")]
    ExceededMaximumOperationCount { limit: usize },
    #[error("Program exceeded the maximum operation cost ({limit}).")]
    ExceededMaximumOperationCost { limit: u64 },
    #[error("Program exceeded the maximum hash digest iterations ({limit}).")]
    ExceededMaximumHashDigestIterations { limit: u64 },
    #[error("Program exceeded the maximum signature check count ({limit}).")]
    ExceededMaximumSignatureCheckCount { limit: u64 },

    // =========================
    // Signatures
    // =========================
    #[error("Program attempted to use a public key with an invalid encoding.")]
    InvalidPublicKeyEncoding,
    #[error("Program attempted to use a signature with an invalid encoding.")]
    InvalidSignatureEncoding,
    #[error("Program failed a signature verification with a non-null signature.")]
    NonNullSignatureFailure,
    #[error("Program requested an invalid number of keys or signatures for OP_CHECKMULTISIG.")]
    InvalidMultisigCount,
    #[error("Program provided an invalid OP_CHECKMULTISIG signature bitfield.")]
    InvalidSchnorrBitfield,
    #[error("Program used a Schnorr signature in legacy OP_CHECKMULTISIG mode.")]
    SchnorrInLegacyMultisig,
    #[error("Invalid signing serialization: {0}")]
    SigningSerialization(#[from] SighashError),

    // =========================
    // Transaction context
    // =========================
    #[error("Program requested transaction introspection index {index}, which is out of range.")]
    InvalidIntrospectionIndex { index: i64 },
    #[error("Program requested introspection without a valid transaction input.")]
    MissingTransactionContext,
    #[error("Program used a locktime of a different type than the transaction.")]
    LocktimeTypeMismatch,
    #[error("The transaction locktime is lower than the required locktime.")]
    UnsatisfiedLocktime,
    #[error("Program requires a locktime, but the input has a finalized sequence number.")]
    LocktimeDisabled,
    #[error("The input sequence number does not satisfy the required relative locktime.")]
    UnsatisfiedSequenceNumber,
}

/// Errors produced while assembling mnemonic text into instructions.
///
/// Every variant carries the 1-based line and column of the offending token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssemblyError {
    #[error("unknown opcode `{name}`")]
    UnknownOpcode {
        line: usize,
        column: usize,
        name: String,
    },
    #[error("invalid hex literal `{token}`")]
    InvalidHex {
        line: usize,
        column: usize,
        token: String,
    },
    #[error("invalid push length `{token}`")]
    InvalidLength {
        line: usize,
        column: usize,
        token: String,
    },
    #[error("{opcode} expects {expected}")]
    ExpectedOperand {
        line: usize,
        column: usize,
        opcode: String,
        expected: &'static str,
    },
    #[error("{opcode} declares {expected} bytes but {actual} were provided")]
    PushLengthMismatch {
        line: usize,
        column: usize,
        opcode: String,
        expected: usize,
        actual: usize,
    },
    #[error("invalid missing-bytes marker `{token}`")]
    InvalidMissingBytes {
        line: usize,
        column: usize,
        token: String,
    },
    #[error("unexpected `{token}`")]
    UnexpectedToken {
        line: usize,
        column: usize,
        token: String,
    },
    #[error("malformed instruction must be the last instruction")]
    TrailingAfterMalformed { line: usize, column: usize },
    #[error("io error reading {path}: {message}")]
    Io { path: String, message: String },
}

impl AssemblyError {
    /// Returns the 1-based line/column of the error, if it refers to source text.
    pub fn location(&self) -> Option<(usize, usize)> {
        match self {
            AssemblyError::UnknownOpcode { line, column, .. }
            | AssemblyError::InvalidHex { line, column, .. }
            | AssemblyError::InvalidLength { line, column, .. }
            | AssemblyError::ExpectedOperand { line, column, .. }
            | AssemblyError::PushLengthMismatch { line, column, .. }
            | AssemblyError::InvalidMissingBytes { line, column, .. }
            | AssemblyError::UnexpectedToken { line, column, .. }
            | AssemblyError::TrailingAfterMalformed { line, column } => Some((*line, *column)),
            AssemblyError::Io { .. } => None,
        }
    }
}
