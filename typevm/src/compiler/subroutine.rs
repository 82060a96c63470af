//! Per-subroutine instruction buffers

use super::section::SectionTracker;
use super::symbol::{Symbol, SymbolKind};
use crate::ast::Span;
use crate::bytecode::Instruction;
use crate::error::{CompileError, Result};
use crate::vm::{SUBROUTINE_FLAG_INLINE, SUBROUTINE_FLAG_MAIN};

/// Source span of the instruction at a subroutine-relative byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceMapEntry {
    pub offset: u32,
    pub start: u32,
    pub end: u32,
}

#[derive(Debug, Clone)]
pub struct Subroutine {
    pub name: String,
    /// Storage address of the name, 0 when anonymous
    pub name_address: u32,
    pub kind: SymbolKind,
    pub index: usize,
    pub instructions: Vec<Instruction>,
    /// Byte offset of every instruction
    positions: Vec<u32>,
    len: u32,
    pub source_map: Vec<SourceMapEntry>,
    pub symbols: Vec<Symbol>,
    /// Stack slots reserved for type variables
    pub slots: u16,
    /// Instruction index of the `Slots` placeholder
    pub slots_instruction: Option<usize>,
    pub sections: SectionTracker,
}

impl Subroutine {
    pub fn new(name: impl Into<String>, kind: SymbolKind, index: usize) -> Self {
        Self {
            name: name.into(),
            name_address: 0,
            kind,
            index,
            instructions: Vec::new(),
            positions: Vec::new(),
            len: 0,
            source_map: Vec::new(),
            symbols: Vec::new(),
            slots: 0,
            slots_instruction: None,
            sections: SectionTracker::new(),
        }
    }

    /// Byte offset of the next instruction.
    pub fn ip(&self) -> u32 {
        self.len
    }

    /// Byte offset of instruction `index`.
    pub fn position(&self, index: usize) -> u32 {
        self.positions.get(index).copied().unwrap_or(self.len)
    }

    pub fn byte_len(&self) -> u32 {
        self.len
    }

    pub fn push_source_map(&mut self, span: Span) {
        self.source_map.push(SourceMapEntry {
            offset: self.len,
            start: span.start as u32,
            end: span.end as u32,
        });
    }

    /// Append and track an instruction; returns its index.
    pub fn push_op(&mut self, instruction: Instruction) -> usize {
        let index = self.push_untracked(instruction);
        self.sections.record(instruction.op(), index);
        index
    }

    /// Append without touching section bookkeeping.
    pub fn push_untracked(&mut self, instruction: Instruction) -> usize {
        let index = self.instructions.len();
        self.positions.push(self.len);
        self.len += instruction.encoded_len() as u32;
        self.instructions.push(instruction);
        index
    }

    /// Replace instruction `index` with one of the same opcode.
    pub fn patch(&mut self, index: usize, instruction: Instruction) {
        debug_assert_eq!(self.instructions[index].op(), instruction.op());
        self.instructions[index] = instruction;
    }

    pub fn flags(&self) -> u8 {
        if self.index == 0 {
            SUBROUTINE_FLAG_MAIN
        } else if self.kind == SymbolKind::Inline {
            SUBROUTINE_FLAG_INLINE
        } else {
            0
        }
    }

    /// Finish the subroutine: close its last section, rewrite tail calls and
    /// append the terminal `Return`.
    pub fn close(&mut self) -> Result<usize> {
        if self.instructions.is_empty() {
            let name = if self.name.is_empty() { format!("#{}", self.index) } else { self.name.clone() };
            return Err(CompileError::empty_subroutine(name));
        }
        self.sections.end(self.instructions.len());
        let rewrites = self.sections.optimise(&mut self.instructions);
        self.push_untracked(Instruction::Return);
        Ok(rewrites)
    }

    /// Serialize the instructions with the final slot count.
    pub fn encode(&self, out: &mut Vec<u8>) {
        for (index, instruction) in self.instructions.iter().enumerate() {
            if Some(index) == self.slots_instruction {
                Instruction::Slots { count: self.slots }.encode(out);
            } else {
                instruction.encode(out);
            }
        }
    }
}
