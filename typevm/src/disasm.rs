//! Disassembler for built images
//!
//! Walks a binary produced by the compiler and renders the storage pool,
//! the source map and every subroutine's instructions with storage strings
//! and subroutine names resolved.

use std::fmt::Write;

use serde::Serialize;

use crate::bytecode::encoding::read_u32;
use crate::bytecode::{BytecodeError, Instruction, Op, Result, read_storage};

/// One decoded instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebugOperation {
    pub address: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebugSubroutine {
    pub name: String,
    pub address: u32,
    pub operations: Vec<DebugOperation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DebugSourceMapEntry {
    /// Opcode found at `bytecode_pos`
    pub op: Option<Op>,
    pub bytecode_pos: u32,
    pub source_pos: u32,
    pub source_end: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DebugBinResult {
    pub storages: Vec<String>,
    pub subroutines: Vec<DebugSubroutine>,
    pub source_map: Vec<DebugSourceMapEntry>,
    /// Every rendered line, header included, in image order.
    pub operations: Vec<String>,
}

/// Decode a whole image.
pub fn parse_bin(bin: &[u8]) -> Result<DebugBinResult> {
    let mut result = DebugBinResult::default();

    let (header, mut ip) = Instruction::decode(bin, 0)?;
    let Instruction::Jump { offset } = header else {
        return Err(BytecodeError::MalformedHeader { message: "image does not start with a jump".into() });
    };
    let storage_end = usize::try_from(offset)
        .map_err(|_| BytecodeError::MalformedHeader { message: "negative header jump".into() })?;
    result.operations.push(format!("[0] Jump +{offset}"));

    while ip < storage_end {
        let entry = read_storage(bin, ip)?;
        let text = entry.text().into_owned();
        result.operations.push(format!("[{ip}] (Storage ({})\"{text}\")", entry.bytes.len()));
        result.storages.push(text);
        ip += 8 + 2 + entry.bytes.len();
    }

    // header: source map, descriptors, main marker
    loop {
        let (instruction, next) = Instruction::decode(bin, ip)?;
        match instruction {
            Instruction::SourceMap { size } => {
                let mut at = ip + 5;
                while at + 12 <= ip + 5 + size as usize {
                    let bytecode_pos = read_u32(bin, at)?;
                    result.source_map.push(DebugSourceMapEntry {
                        op: bin.get(bytecode_pos as usize).copied().and_then(Op::from_byte),
                        bytecode_pos,
                        source_pos: read_u32(bin, at + 4)?,
                        source_end: read_u32(bin, at + 8)?,
                    });
                    at += 12;
                }
                result.operations.push(format!("[{ip}] SourceMap {size} ({} entries)", size / 12));
            }
            Instruction::Subroutine { name, address, flags } => {
                let name = if name == 0 { String::new() } else { read_storage(bin, name as usize)?.text().into_owned() };
                result.operations.push(format!("[{ip}] Subroutine {name}[{address}] flags={flags}"));
                result.subroutines.push(DebugSubroutine { name, address, operations: Vec::new() });
            }
            Instruction::Main => {
                result.operations.push(format!("[{ip}] Main"));
                ip = next;
                break;
            }
            other => {
                return Err(BytecodeError::MalformedHeader {
                    message: format!("unexpected {} in header at {ip}", other.op()),
                });
            }
        }
        ip = next;
    }

    let mut active = None;
    while ip < bin.len() {
        if let Some(index) = result.subroutines.iter().position(|routine| routine.address as usize == ip) {
            let routine = &result.subroutines[index];
            result.operations.push(format!("&{index} {}():", display_name(&routine.name, index)));
            active = Some(index);
        }
        let (instruction, next) = Instruction::decode(bin, ip)?;
        let text = render(bin, ip, instruction, &result.subroutines)?;
        result.operations.push(format!("  [{ip}] {text}"));
        if let Some(routine) = active.and_then(|index| result.subroutines.get_mut(index)) {
            routine.operations.push(DebugOperation { address: ip, text });
        }
        ip = next;
    }
    Ok(result)
}

/// Render a whole image as text, one instruction per line.
pub fn print_bin(bin: &[u8]) -> Result<String> {
    let result = parse_bin(bin)?;
    let mut out = String::new();
    for line in &result.operations {
        let _ = writeln!(out, "{line}");
    }
    Ok(out)
}

fn display_name(name: &str, index: usize) -> &str {
    match (index, name.is_empty()) {
        (0, _) => "main",
        (_, true) => "anonymous",
        _ => name,
    }
}

fn routine_name(subroutines: &[DebugSubroutine], routine: u32) -> String {
    let index = routine as usize;
    match subroutines.get(index) {
        Some(target) => format!("&{routine} {}", display_name(&target.name, index)),
        None => format!("&{routine} ?"),
    }
}

fn render(bin: &[u8], ip: usize, instruction: Instruction, subroutines: &[DebugSubroutine]) -> Result<String> {
    let op = instruction.op();
    Ok(match instruction {
        Instruction::Jump { offset } => format!("{op} [{}, {offset:+}]", ip as i64 + i64::from(offset)),
        Instruction::JumpCondition { offset } => format!("{op} [{}, +{offset}]", ip + offset as usize),
        Instruction::Distribute { slot, offset } => {
            format!("{op} slot={slot} [{}, +{offset}]", ip + offset as usize)
        }
        Instruction::Error { code } => format!("{op} {code:?}"),
        Instruction::Call { routine, args } | Instruction::TailCall { routine, args } => {
            format!("{op} {}, {args}", routine_name(subroutines, routine))
        }
        Instruction::TypeArgumentDefault { routine }
        | Instruction::ClassRef { routine }
        | Instruction::FunctionRef { routine }
        | Instruction::CheckBody { routine }
        | Instruction::InferBody { routine } => format!("{op} {}", routine_name(subroutines, routine)),
        Instruction::StringLiteral { address }
        | Instruction::NumberLiteral { address }
        | Instruction::BigIntLiteral { address }
        | Instruction::Parameter { address } => {
            format!("{op} \"{}\"", read_storage(bin, address as usize)?.text())
        }
        Instruction::Loads { frame, symbol } => format!("{op} {frame}, {symbol}"),
        Instruction::Slots { count }
        | Instruction::Union { count }
        | Instruction::Tuple { count }
        | Instruction::TemplateLiteral { count }
        | Instruction::ObjectLiteral { count }
        | Instruction::Class { count }
        | Instruction::Instantiate { count } => format!("{op} {count}"),
        Instruction::Function { size } | Instruction::Method { size } => format!("{op} {size}"),
        Instruction::CallExpression { args } => format!("{op} {args}"),
        _ => op.to_string(),
    })
}
