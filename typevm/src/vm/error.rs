//! Fatal runtime errors
//!
//! User-facing type errors never show up here; they are collected as
//! [`DiagnosticMessage`](super::DiagnosticMessage)s on the module and the run
//! continues. A `VmError` means the bytecode or the VM itself is broken and
//! aborts the run.

use thiserror::Error;

use crate::bytecode::{BytecodeError, Op};

/// Result type alias
pub type Result<T> = std::result::Result<T, VmError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    #[error("Stack overflow: frame pool exhausted at {capacity} frames")]
    FramePoolOverflow { capacity: usize },

    #[error("Stack overflow: loop pool exhausted at {capacity} loops")]
    LoopPoolOverflow { capacity: usize },

    #[error("Stack underflow: {pool} pool is empty")]
    PoolUnderflow { pool: &'static str },

    #[error("Stack overflow: operand stack exhausted at {capacity} entries")]
    StackOverflow { capacity: usize },

    #[error("Stack underflow at ip {ip}")]
    StackUnderflow { ip: usize },

    #[error("Double release of deleted type #{index}")]
    DoubleRelease { index: u32 },

    #[error("Unknown subroutine #{index}")]
    UnknownSubroutine { index: u32 },

    #[error("Unexpected {op} at ip {ip}")]
    UnexpectedOp { op: Op, ip: usize },

    #[error("Malformed operand for {op} at ip {ip}: {message}")]
    MalformedOperand { op: Op, ip: usize, message: String },

    #[error("Step limit of {limit} exceeded")]
    StepLimitExceeded { limit: u64 },

    #[error(transparent)]
    Bytecode(#[from] BytecodeError),
}

impl VmError {
    pub fn malformed(op: Op, ip: usize, message: impl Into<String>) -> Self {
        Self::MalformedOperand {
            op,
            ip,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            VmError::FramePoolOverflow { capacity: 4 }.to_string(),
            "Stack overflow: frame pool exhausted at 4 frames"
        );
        assert_eq!(
            VmError::malformed(Op::Tuple, 12, "expected tuple member").to_string(),
            "Malformed operand for Tuple at ip 12: expected tuple member"
        );
    }

    #[test]
    fn test_bytecode_error_converts() {
        let err: VmError = BytecodeError::UnexpectedEnd { offset: 3 }.into();
        assert_eq!(err.to_string(), "unexpected end of bytecode at offset 3");
    }
}
