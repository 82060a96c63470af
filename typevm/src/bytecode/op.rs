//! Opcodes and the operand-width table
//!
//! Every consumer that walks a binary image (the compiler's instruction
//! encoder, the VM dispatch loop and the disassembler) skips operands through
//! [`Op::operand_width`], so the table below is the single source of truth
//! for the instruction format.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::encoding::read_u32;
use super::{BytecodeError, Result};

/// Bytecode opcode. Discriminants are contiguous and start at zero.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    Noop = 0,
    /// i32 relative jump
    Jump,
    Halt,
    /// u16 error code
    Error,
    Pop,

    // Header
    Main,
    /// u32 name address, u32 code address, u8 flags
    Subroutine,
    /// u32 table size, followed by the table itself
    SourceMap,

    // Frames and calls
    Return,
    /// u32 subroutine index, u16 argument count
    Call,
    /// u32 subroutine index, u16 argument count
    TailCall,
    /// u16 slot count
    Slots,
    /// u16 frame offset, u16 symbol index
    Loads,
    TypeArgument,
    /// u32 subroutine index of the default expression
    TypeArgumentDefault,
    /// u16 slot, u32 relative end offset
    Distribute,
    /// u32 relative offset of the false branch
    JumpCondition,
    Extends,

    // Keywords
    Never,
    Any,
    Unknown,
    Undefined,
    Null,
    Void,
    String,
    Number,
    BigInt,
    Boolean,
    Symbol,

    // Literals
    True,
    False,
    /// u32 storage address
    StringLiteral,
    /// u32 storage address
    NumberLiteral,
    /// u32 storage address
    BigIntLiteral,

    // Composites
    /// u16 member count
    Union,
    /// u16 member count
    Tuple,
    TupleMember,
    Optional,
    Readonly,
    Array,
    Rest,
    RestReuse,
    /// u16 segment count
    TemplateLiteral,
    PropertySignature,
    /// u16 member count
    ObjectLiteral,
    /// u16 member count
    Class,
    /// u32 subroutine index
    ClassRef,
    /// u32 storage address of the parameter name
    Parameter,
    /// u16 size (return type + parameters)
    Function,
    /// u16 size (return type + parameters)
    Method,
    /// u32 subroutine index
    FunctionRef,

    // Bodies, calls and checks
    /// u32 subroutine index of the body
    CheckBody,
    /// u32 subroutine index of the body
    InferBody,
    UnwrapInferBody,
    ReturnStatement,
    /// u16 type argument count
    Instantiate,
    /// u16 argument count
    CallExpression,
    Assign,
}

/// Operand width of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandWidth {
    Fixed(usize),
    /// A u32 byte size followed by that many bytes.
    LengthPrefixed,
}

impl Op {
    /// All opcodes in discriminant order.
    pub const ALL: [Op; 58] = [
        Op::Noop,
        Op::Jump,
        Op::Halt,
        Op::Error,
        Op::Pop,
        Op::Main,
        Op::Subroutine,
        Op::SourceMap,
        Op::Return,
        Op::Call,
        Op::TailCall,
        Op::Slots,
        Op::Loads,
        Op::TypeArgument,
        Op::TypeArgumentDefault,
        Op::Distribute,
        Op::JumpCondition,
        Op::Extends,
        Op::Never,
        Op::Any,
        Op::Unknown,
        Op::Undefined,
        Op::Null,
        Op::Void,
        Op::String,
        Op::Number,
        Op::BigInt,
        Op::Boolean,
        Op::Symbol,
        Op::True,
        Op::False,
        Op::StringLiteral,
        Op::NumberLiteral,
        Op::BigIntLiteral,
        Op::Union,
        Op::Tuple,
        Op::TupleMember,
        Op::Optional,
        Op::Readonly,
        Op::Array,
        Op::Rest,
        Op::RestReuse,
        Op::TemplateLiteral,
        Op::PropertySignature,
        Op::ObjectLiteral,
        Op::Class,
        Op::ClassRef,
        Op::Parameter,
        Op::Function,
        Op::Method,
        Op::FunctionRef,
        Op::CheckBody,
        Op::InferBody,
        Op::UnwrapInferBody,
        Op::ReturnStatement,
        Op::Instantiate,
        Op::CallExpression,
        Op::Assign,
    ];

    pub fn from_byte(byte: u8) -> Option<Op> {
        Op::ALL.get(byte as usize).copied()
    }

    pub fn operand_width(self) -> OperandWidth {
        use OperandWidth::*;
        match self {
            Op::SourceMap => LengthPrefixed,
            Op::Subroutine => Fixed(4 + 4 + 1),
            Op::Call | Op::TailCall | Op::Distribute => Fixed(4 + 2),
            Op::Jump
            | Op::JumpCondition
            | Op::Loads
            | Op::TypeArgumentDefault
            | Op::StringLiteral
            | Op::NumberLiteral
            | Op::BigIntLiteral
            | Op::ClassRef
            | Op::FunctionRef
            | Op::Parameter
            | Op::CheckBody
            | Op::InferBody => Fixed(4),
            Op::Error
            | Op::Slots
            | Op::Union
            | Op::Tuple
            | Op::TemplateLiteral
            | Op::ObjectLiteral
            | Op::Class
            | Op::Function
            | Op::Method
            | Op::Instantiate
            | Op::CallExpression => Fixed(2),
            _ => Fixed(0),
        }
    }

    /// Whether this opcode only appears in the binary header.
    pub fn is_header(self) -> bool {
        matches!(self, Op::Main | Op::Subroutine | Op::SourceMap)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Total length in bytes (opcode included) of the instruction at `ip`.
pub fn instruction_len(bin: &[u8], ip: usize) -> Result<usize> {
    let byte = *bin.get(ip).ok_or(BytecodeError::UnexpectedEnd { offset: ip })?;
    let op = Op::from_byte(byte).ok_or(BytecodeError::UnknownOpcode { byte, offset: ip })?;
    Ok(match op.operand_width() {
        OperandWidth::Fixed(width) => 1 + width,
        OperandWidth::LengthPrefixed => 1 + 4 + read_u32(bin, ip + 1)? as usize,
    })
}

/// Error codes carried by the `Error` opcode.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    CannotFind = 0,
    NotCallable = 1,
    ReturnOutsideFunction = 2,
}

impl ErrorCode {
    pub fn from_u16(code: u16) -> Option<ErrorCode> {
        match code {
            0 => Some(ErrorCode::CannotFind),
            1 => Some(ErrorCode::NotCallable),
            2 => Some(ErrorCode::ReturnOutsideFunction),
            _ => None,
        }
    }

    /// Message used when the code needs no further context.
    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::CannotFind => "Cannot find name",
            ErrorCode::NotCallable => "This expression is not callable",
            ErrorCode::ReturnOutsideFunction => {
                "A 'return' statement can only be used within a function body"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discriminants_are_contiguous() {
        for (i, op) in Op::ALL.iter().enumerate() {
            assert_eq!(*op as u8 as usize, i);
            assert_eq!(Op::from_byte(i as u8), Some(*op));
        }
        assert_eq!(Op::from_byte(Op::ALL.len() as u8), None);
    }

    #[test]
    fn test_call_width_matches_address_and_count() {
        assert_eq!(Op::Call.operand_width(), OperandWidth::Fixed(6));
        assert_eq!(Op::TailCall.operand_width(), Op::Call.operand_width());
        assert_eq!(Op::Rest.operand_width(), Op::RestReuse.operand_width());
    }

    #[test]
    fn test_instruction_len_source_map() {
        let bin = [Op::SourceMap as u8, 12, 0, 0, 0];
        assert_eq!(instruction_len(&bin, 0).unwrap(), 17);
    }

    #[test]
    fn test_instruction_len_unknown_opcode() {
        let bin = [250u8];
        assert!(matches!(
            instruction_len(&bin, 0),
            Err(BytecodeError::UnknownOpcode { byte: 250, offset: 0 })
        ));
    }

    #[test]
    fn test_error_code_roundtrip() {
        for code in [ErrorCode::CannotFind, ErrorCode::NotCallable, ErrorCode::ReturnOutsideFunction] {
            assert_eq!(ErrorCode::from_u16(code as u16), Some(code));
        }
        assert_eq!(ErrorCode::from_u16(99), None);
    }
}
