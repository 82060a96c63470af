//! Bytecode format shared by the compiler, the VM and the disassembler

pub mod encoding;
mod instruction;
mod op;

pub use encoding::{StorageEntry, read_storage, runtime_hash};
pub use instruction::Instruction;
pub use op::{ErrorCode, Op, OperandWidth, instruction_len};

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, BytecodeError>;

/// Malformed bytecode
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BytecodeError {
    #[error("unexpected end of bytecode at offset {offset}")]
    UnexpectedEnd { offset: usize },

    #[error("unknown opcode {byte} at offset {offset}")]
    UnknownOpcode { byte: u8, offset: usize },

    #[error("unknown error code {code} at offset {offset}")]
    UnknownErrorCode { code: u16, offset: usize },

    #[error("storage entry of {len} bytes exceeds the u16 length field")]
    StorageTooLarge { len: usize },

    #[error("malformed header: {message}")]
    MalformedHeader { message: String },
}
