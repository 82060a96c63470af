//! Typed instructions
//!
//! The compiler works on [`Instruction`] values with typed operand fields and
//! only flattens them into the tagged-byte form when the binary is built.
//! Both directions go through [`Op::operand_width`].

use super::encoding::{
    push_i32, push_u16, push_u32, read_i32, read_u16, read_u32, read_u8,
};
use super::op::{ErrorCode, Op, OperandWidth, instruction_len};
use super::{BytecodeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Noop,
    Jump { offset: i32 },
    Halt,
    Error { code: ErrorCode },
    Pop,
    Main,
    Subroutine { name: u32, address: u32, flags: u8 },
    SourceMap { size: u32 },
    Return,
    Call { routine: u32, args: u16 },
    TailCall { routine: u32, args: u16 },
    Slots { count: u16 },
    Loads { frame: u16, symbol: u16 },
    TypeArgument,
    TypeArgumentDefault { routine: u32 },
    Distribute { slot: u16, offset: u32 },
    JumpCondition { offset: u32 },
    Extends,
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
    True,
    False,
    StringLiteral { address: u32 },
    NumberLiteral { address: u32 },
    BigIntLiteral { address: u32 },
    Union { count: u16 },
    Tuple { count: u16 },
    TupleMember,
    Optional,
    Readonly,
    Array,
    Rest,
    RestReuse,
    TemplateLiteral { count: u16 },
    PropertySignature,
    ObjectLiteral { count: u16 },
    Class { count: u16 },
    ClassRef { routine: u32 },
    Parameter { address: u32 },
    Function { size: u16 },
    Method { size: u16 },
    FunctionRef { routine: u32 },
    CheckBody { routine: u32 },
    InferBody { routine: u32 },
    UnwrapInferBody,
    ReturnStatement,
    Instantiate { count: u16 },
    CallExpression { args: u16 },
    Assign,
}

impl Instruction {
    pub fn op(&self) -> Op {
        match self {
            Instruction::Noop => Op::Noop,
            Instruction::Jump { .. } => Op::Jump,
            Instruction::Halt => Op::Halt,
            Instruction::Error { .. } => Op::Error,
            Instruction::Pop => Op::Pop,
            Instruction::Main => Op::Main,
            Instruction::Subroutine { .. } => Op::Subroutine,
            Instruction::SourceMap { .. } => Op::SourceMap,
            Instruction::Return => Op::Return,
            Instruction::Call { .. } => Op::Call,
            Instruction::TailCall { .. } => Op::TailCall,
            Instruction::Slots { .. } => Op::Slots,
            Instruction::Loads { .. } => Op::Loads,
            Instruction::TypeArgument => Op::TypeArgument,
            Instruction::TypeArgumentDefault { .. } => Op::TypeArgumentDefault,
            Instruction::Distribute { .. } => Op::Distribute,
            Instruction::JumpCondition { .. } => Op::JumpCondition,
            Instruction::Extends => Op::Extends,
            Instruction::Never => Op::Never,
            Instruction::Any => Op::Any,
            Instruction::Unknown => Op::Unknown,
            Instruction::Undefined => Op::Undefined,
            Instruction::Null => Op::Null,
            Instruction::Void => Op::Void,
            Instruction::String => Op::String,
            Instruction::Number => Op::Number,
            Instruction::BigInt => Op::BigInt,
            Instruction::Boolean => Op::Boolean,
            Instruction::Symbol => Op::Symbol,
            Instruction::True => Op::True,
            Instruction::False => Op::False,
            Instruction::StringLiteral { .. } => Op::StringLiteral,
            Instruction::NumberLiteral { .. } => Op::NumberLiteral,
            Instruction::BigIntLiteral { .. } => Op::BigIntLiteral,
            Instruction::Union { .. } => Op::Union,
            Instruction::Tuple { .. } => Op::Tuple,
            Instruction::TupleMember => Op::TupleMember,
            Instruction::Optional => Op::Optional,
            Instruction::Readonly => Op::Readonly,
            Instruction::Array => Op::Array,
            Instruction::Rest => Op::Rest,
            Instruction::RestReuse => Op::RestReuse,
            Instruction::TemplateLiteral { .. } => Op::TemplateLiteral,
            Instruction::PropertySignature => Op::PropertySignature,
            Instruction::ObjectLiteral { .. } => Op::ObjectLiteral,
            Instruction::Class { .. } => Op::Class,
            Instruction::ClassRef { .. } => Op::ClassRef,
            Instruction::Parameter { .. } => Op::Parameter,
            Instruction::Function { .. } => Op::Function,
            Instruction::Method { .. } => Op::Method,
            Instruction::FunctionRef { .. } => Op::FunctionRef,
            Instruction::CheckBody { .. } => Op::CheckBody,
            Instruction::InferBody { .. } => Op::InferBody,
            Instruction::UnwrapInferBody => Op::UnwrapInferBody,
            Instruction::ReturnStatement => Op::ReturnStatement,
            Instruction::Instantiate { .. } => Op::Instantiate,
            Instruction::CallExpression { .. } => Op::CallExpression,
            Instruction::Assign => Op::Assign,
        }
    }

    /// Encoded size of this instruction. For `SourceMap` only the opcode and
    /// size prefix are counted; the table is written separately.
    pub fn encoded_len(&self) -> usize {
        match self.op().operand_width() {
            OperandWidth::Fixed(width) => 1 + width,
            OperandWidth::LengthPrefixed => 1 + 4,
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.op() as u8);
        match *self {
            Instruction::Jump { offset } => push_i32(out, offset),
            Instruction::Error { code } => push_u16(out, code as u16),
            Instruction::Subroutine { name, address, flags } => {
                push_u32(out, name);
                push_u32(out, address);
                out.push(flags);
            }
            Instruction::SourceMap { size } => push_u32(out, size),
            Instruction::Call { routine, args } | Instruction::TailCall { routine, args } => {
                push_u32(out, routine);
                push_u16(out, args);
            }
            Instruction::Loads { frame, symbol } => {
                push_u16(out, frame);
                push_u16(out, symbol);
            }
            Instruction::Distribute { slot, offset } => {
                push_u16(out, slot);
                push_u32(out, offset);
            }
            Instruction::JumpCondition { offset } => push_u32(out, offset),
            Instruction::TypeArgumentDefault { routine }
            | Instruction::ClassRef { routine }
            | Instruction::FunctionRef { routine }
            | Instruction::CheckBody { routine }
            | Instruction::InferBody { routine } => push_u32(out, routine),
            Instruction::StringLiteral { address }
            | Instruction::NumberLiteral { address }
            | Instruction::BigIntLiteral { address }
            | Instruction::Parameter { address } => push_u32(out, address),
            Instruction::Slots { count }
            | Instruction::Union { count }
            | Instruction::Tuple { count }
            | Instruction::TemplateLiteral { count }
            | Instruction::ObjectLiteral { count }
            | Instruction::Class { count }
            | Instruction::Instantiate { count } => push_u16(out, count),
            Instruction::Function { size } | Instruction::Method { size } => push_u16(out, size),
            Instruction::CallExpression { args } => push_u16(out, args),
            _ => {}
        }
    }

    /// Decode the instruction at `ip`, returning it with the offset of the
    /// next instruction.
    pub fn decode(bin: &[u8], ip: usize) -> Result<(Instruction, usize)> {
        let byte = read_u8(bin, ip)?;
        let op = Op::from_byte(byte).ok_or(BytecodeError::UnknownOpcode { byte, offset: ip })?;
        let at = ip + 1;
        let instruction = match op {
            Op::Noop => Instruction::Noop,
            Op::Jump => Instruction::Jump { offset: read_i32(bin, at)? },
            Op::Halt => Instruction::Halt,
            Op::Error => {
                let raw = read_u16(bin, at)?;
                let code = ErrorCode::from_u16(raw).ok_or(BytecodeError::UnknownErrorCode { code: raw, offset: ip })?;
                Instruction::Error { code }
            }
            Op::Pop => Instruction::Pop,
            Op::Main => Instruction::Main,
            Op::Subroutine => Instruction::Subroutine {
                name: read_u32(bin, at)?,
                address: read_u32(bin, at + 4)?,
                flags: read_u8(bin, at + 8)?,
            },
            Op::SourceMap => Instruction::SourceMap { size: read_u32(bin, at)? },
            Op::Return => Instruction::Return,
            Op::Call => Instruction::Call { routine: read_u32(bin, at)?, args: read_u16(bin, at + 4)? },
            Op::TailCall => Instruction::TailCall { routine: read_u32(bin, at)?, args: read_u16(bin, at + 4)? },
            Op::Slots => Instruction::Slots { count: read_u16(bin, at)? },
            Op::Loads => Instruction::Loads { frame: read_u16(bin, at)?, symbol: read_u16(bin, at + 2)? },
            Op::TypeArgument => Instruction::TypeArgument,
            Op::TypeArgumentDefault => Instruction::TypeArgumentDefault { routine: read_u32(bin, at)? },
            Op::Distribute => Instruction::Distribute { slot: read_u16(bin, at)?, offset: read_u32(bin, at + 2)? },
            Op::JumpCondition => Instruction::JumpCondition { offset: read_u32(bin, at)? },
            Op::Extends => Instruction::Extends,
            Op::Never => Instruction::Never,
            Op::Any => Instruction::Any,
            Op::Unknown => Instruction::Unknown,
            Op::Undefined => Instruction::Undefined,
            Op::Null => Instruction::Null,
            Op::Void => Instruction::Void,
            Op::String => Instruction::String,
            Op::Number => Instruction::Number,
            Op::BigInt => Instruction::BigInt,
            Op::Boolean => Instruction::Boolean,
            Op::Symbol => Instruction::Symbol,
            Op::True => Instruction::True,
            Op::False => Instruction::False,
            Op::StringLiteral => Instruction::StringLiteral { address: read_u32(bin, at)? },
            Op::NumberLiteral => Instruction::NumberLiteral { address: read_u32(bin, at)? },
            Op::BigIntLiteral => Instruction::BigIntLiteral { address: read_u32(bin, at)? },
            Op::Union => Instruction::Union { count: read_u16(bin, at)? },
            Op::Tuple => Instruction::Tuple { count: read_u16(bin, at)? },
            Op::TupleMember => Instruction::TupleMember,
            Op::Optional => Instruction::Optional,
            Op::Readonly => Instruction::Readonly,
            Op::Array => Instruction::Array,
            Op::Rest => Instruction::Rest,
            Op::RestReuse => Instruction::RestReuse,
            Op::TemplateLiteral => Instruction::TemplateLiteral { count: read_u16(bin, at)? },
            Op::PropertySignature => Instruction::PropertySignature,
            Op::ObjectLiteral => Instruction::ObjectLiteral { count: read_u16(bin, at)? },
            Op::Class => Instruction::Class { count: read_u16(bin, at)? },
            Op::ClassRef => Instruction::ClassRef { routine: read_u32(bin, at)? },
            Op::Parameter => Instruction::Parameter { address: read_u32(bin, at)? },
            Op::Function => Instruction::Function { size: read_u16(bin, at)? },
            Op::Method => Instruction::Method { size: read_u16(bin, at)? },
            Op::FunctionRef => Instruction::FunctionRef { routine: read_u32(bin, at)? },
            Op::CheckBody => Instruction::CheckBody { routine: read_u32(bin, at)? },
            Op::InferBody => Instruction::InferBody { routine: read_u32(bin, at)? },
            Op::UnwrapInferBody => Instruction::UnwrapInferBody,
            Op::ReturnStatement => Instruction::ReturnStatement,
            Op::Instantiate => Instruction::Instantiate { count: read_u16(bin, at)? },
            Op::CallExpression => Instruction::CallExpression { args: read_u16(bin, at)? },
            Op::Assign => Instruction::Assign,
        };
        Ok((instruction, ip + instruction_len(bin, ip)?))
    }
}
