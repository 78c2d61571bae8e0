//! Error taxonomy.
//!
//! `CompileError` covers everything that can go wrong while building a
//! catalog or encoding a unit; these are fatal and mean the operation set
//! exceeds the fixed encoding budget or the tree is malformed. `Fault` is
//! what execution surfaces to the caller. Boxing mismatches are neither:
//! they are recovered internally (see `frame::FrameTypeMismatch`).

use crate::value::Value;

/// Generation-time failure. Never produced during execution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("operation {name:?} registered twice")]
    DuplicateOperation { name: &'static str },

    #[error("opcode space exhausted: more than 256 instruction kinds")]
    OpcodeSpaceExhausted,

    #[error("state bits exceed {max_words} word(s) for operation {name:?}")]
    StateBitOverflow { name: &'static str, max_words: usize },

    #[error("{table} table exceeds 16-bit index space")]
    TableOverflow { table: &'static str },

    #[error("encoded stream exceeds 16-bit branch target space")]
    StreamTooLarge,

    #[error("operation {name:?} expects {expected} {what}, got {found}")]
    ArityMismatch {
        name: &'static str,
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("local {local} out of range ({num_locals} locals)")]
    LocalOutOfRange { local: u16, num_locals: u16 },
}

/// Run-time fault surfaced to the caller of `execute`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Fault {
    /// Stream corruption: should be unreachable for well-formed units.
    #[error("unknown opcode 0x{opcode:02x} at bci {bci}: stream corrupted")]
    UnknownOpcode { opcode: u8, bci: u32 },

    #[error("type error: expected {expected}, got {got}")]
    TypeError { expected: &'static str, got: Value },

    #[error("division by zero")]
    DivisionByZero,

    /// Fault raised by a user operation.
    #[error("operation fault: {0}")]
    Operation(String),
}
