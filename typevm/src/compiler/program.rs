//! Emitter state and binary assembly
//!
//! The program owns every subroutine and the storage pool. Emission always
//! targets the innermost active subroutine; `build` lays everything out as
//!
//! ```text
//! Jump <end of storage>
//! storage entries           u64 hash, u16 len, bytes
//! SourceMap <size>          (u32 offset, u32 start, u32 end)*
//! Subroutine <name> <address> <flags>   one per subroutine
//! Main
//! subroutine code           in index order, main first
//! ```

use tracing::debug;

use super::section::NESTED_READ;
use super::subroutine::Subroutine;
use super::symbol::{FoundSymbol, Symbol, SymbolKind, SymbolRef};
use crate::ast::Span;
use crate::bytecode::encoding::{STORAGE_ENTRY_HEADER, push_storage_entry, push_u32};
use crate::bytecode::{ErrorCode, Instruction};
use crate::error::{CompileError, Result, operand_u16};

/// `Jump` + u32 target
const HEADER_JUMP_SIZE: u32 = 5;
/// `Subroutine` + u32 name + u32 address + u8 flags
const SUBROUTINE_DESCRIPTOR_SIZE: usize = 10;
const SOURCE_MAP_ENTRY_SIZE: usize = 12;

#[derive(Debug, Clone)]
pub struct Program {
    pub subroutines: Vec<Subroutine>,
    active: Vec<usize>,
    storage: Vec<String>,
    storage_cursor: u32,
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

impl Program {
    /// A program with an active, empty main subroutine.
    pub fn new() -> Self {
        let mut program = Self {
            subroutines: Vec::new(),
            active: Vec::new(),
            storage: Vec::new(),
            storage_cursor: HEADER_JUMP_SIZE,
        };
        program.push_subroutine_nameless();
        program
    }

    pub fn main(&self) -> &Subroutine {
        &self.subroutines[0]
    }

    pub fn storage(&self) -> &[String] {
        &self.storage
    }

    fn current_index(&self) -> Result<usize> {
        self.active.last().copied().ok_or(CompileError::NoActiveSubroutine)
    }

    pub fn current(&self) -> Result<&Subroutine> {
        Ok(&self.subroutines[self.current_index()?])
    }

    fn current_mut(&mut self) -> Result<&mut Subroutine> {
        let index = self.current_index()?;
        Ok(&mut self.subroutines[index])
    }

    pub fn symbol(&self, symbol: SymbolRef) -> &Symbol {
        &self.subroutines[symbol.subroutine].symbols[symbol.index]
    }

    /// Declare `name` in the active subroutine, or count another declaration
    /// of an existing symbol. Type variables are always fresh and take a
    /// stack slot.
    pub fn push_symbol(&mut self, name: &str, kind: SymbolKind, span: Span) -> Result<SymbolRef> {
        let subroutine = self.current_index()?;
        let routine = &mut self.subroutines[subroutine];
        if kind != SymbolKind::TypeVariable {
            if let Some(index) = routine.symbols.iter().position(|s| s.name == name) {
                routine.symbols[index].declarations += 1;
                return Ok(SymbolRef { subroutine, index });
            }
        }
        let index = routine.symbols.len();
        let slot = operand_u16("symbols", index)?;
        if kind == SymbolKind::TypeVariable {
            routine.slots = operand_u16("slots", usize::from(routine.slots) + 1)?;
        }
        routine.symbols.push(Symbol::new(name, kind, span, slot));
        Ok(SymbolRef { subroutine, index })
    }

    /// Like [`push_symbol`](Self::push_symbol), and give the symbol its own
    /// named subroutine.
    pub fn push_symbol_for_routine(&mut self, name: &str, kind: SymbolKind, span: Span) -> Result<SymbolRef> {
        let symbol = self.push_symbol(name, kind, span)?;
        if self.symbol(symbol).routine.is_some() {
            return Ok(symbol);
        }
        let index = self.subroutines.len();
        let mut routine = Subroutine::new(name, kind, index);
        routine.name_address = self.register_storage(name);
        self.subroutines.push(routine);
        self.subroutines[symbol.subroutine].symbols[symbol.index].routine = Some(index);
        Ok(symbol)
    }

    /// Enter the subroutine owned by `symbol`.
    pub fn push_subroutine(&mut self, symbol: SymbolRef) -> Result<usize> {
        let symbol = self.symbol(symbol);
        let index = symbol.routine.ok_or_else(|| CompileError::no_routine(symbol.name.clone()))?;
        self.active.push(index);
        Ok(index)
    }

    /// Create and enter an anonymous subroutine.
    pub fn push_subroutine_nameless(&mut self) -> usize {
        let index = self.subroutines.len();
        self.subroutines.push(Subroutine::new("", SymbolKind::Inline, index));
        self.active.push(index);
        index
    }

    /// Create and enter an anonymous subroutine that still carries `label` in
    /// the header, so references to it can be rendered.
    pub fn push_subroutine_labelled(&mut self, label: &str) -> usize {
        let index = self.push_subroutine_nameless();
        let address = self.register_storage(label);
        let routine = &mut self.subroutines[index];
        routine.name = label.to_string();
        routine.name_address = address;
        index
    }

    /// Close the innermost active subroutine.
    pub fn pop_subroutine(&mut self) -> Result<usize> {
        let index = self.active.pop().ok_or(CompileError::NoActiveSubroutine)?;
        let rewrites = self.subroutines[index].close()?;
        if rewrites > 0 {
            debug!(subroutine = index, rewrites, "optimised tail sections");
        }
        Ok(index)
    }

    /// Emit an instruction into the active subroutine, mapping it to `span`.
    pub fn push_op(&mut self, instruction: Instruction, span: Option<Span>) -> Result<usize> {
        let routine = self.current_mut()?;
        if let Some(span) = span {
            routine.push_source_map(span);
        }
        Ok(routine.push_op(instruction))
    }

    /// Register `text` in storage and emit the instruction addressing it.
    pub fn push_storage(
        &mut self,
        text: &str,
        span: Option<Span>,
        instruction: impl FnOnce(u32) -> Instruction,
    ) -> Result<usize> {
        let address = self.register_storage(text);
        self.push_op(instruction(address), span)
    }

    pub fn push_string_literal(&mut self, text: &str, span: Span) -> Result<usize> {
        self.push_storage(text, Some(span), |address| Instruction::StringLiteral { address })
    }

    /// Errors always go to main; the source map entry sits on the `Error`
    /// instruction itself.
    pub fn push_error(&mut self, code: ErrorCode, span: Span) {
        let main = &mut self.subroutines[0];
        main.push_source_map(span);
        main.push_untracked(Instruction::Error { code });
    }

    /// Emit the `Slots` placeholder patched with the final count at build.
    pub fn push_slots(&mut self) -> Result<()> {
        let routine = self.current_mut()?;
        let index = routine.push_op(Instruction::Slots { count: 0 });
        routine.slots_instruction = Some(index);
        Ok(())
    }

    pub fn ignore_next_section_op(&mut self) -> Result<()> {
        self.current_mut()?.sections.ignore_next_op();
        Ok(())
    }

    pub fn push_section(&mut self) -> Result<()> {
        let routine = self.current_mut()?;
        let at = routine.instructions.len();
        routine.sections.push_section(at);
        Ok(())
    }

    pub fn pop_section(&mut self) -> Result<()> {
        let routine = self.current_mut()?;
        let at = routine.instructions.len();
        routine.sections.pop_section(at);
        Ok(())
    }

    pub fn block_tail_call(&mut self) -> Result<()> {
        self.current_mut()?.sections.block_tail_call();
        Ok(())
    }

    pub fn register_type_argument_usage(&mut self, symbol: u16, instruction: usize) -> Result<()> {
        self.current_mut()?.sections.register_type_argument_usage(symbol, instruction);
        Ok(())
    }

    /// Record a read of `symbol` made from a subroutine nested `frame_offset`
    /// levels inside the one declaring it.
    pub fn register_nested_type_argument_usage(&mut self, frame_offset: u16, symbol: u16) -> Result<()> {
        let depth = self
            .active
            .len()
            .checked_sub(1 + usize::from(frame_offset))
            .ok_or(CompileError::NoActiveSubroutine)?;
        let index = self.active[depth];
        self.subroutines[index].sections.register_type_argument_usage(symbol, NESTED_READ);
        Ok(())
    }

    /// Byte offset of the next instruction in the active subroutine.
    pub fn ip(&self) -> Result<u32> {
        Ok(self.current()?.ip())
    }

    pub fn position(&self, index: usize) -> Result<u32> {
        Ok(self.current()?.position(index))
    }

    pub fn patch(&mut self, index: usize, instruction: Instruction) -> Result<()> {
        self.current_mut()?.patch(index, instruction);
        Ok(())
    }

    /// Resolve `name` from the innermost active subroutine outward, most
    /// recent declaration first.
    pub fn find_symbol(&self, name: &str) -> Option<FoundSymbol> {
        for (frame_offset, &subroutine) in self.active.iter().rev().enumerate() {
            let symbols = &self.subroutines[subroutine].symbols;
            if let Some(index) = symbols.iter().rposition(|s| s.active && s.name == name) {
                return Some(FoundSymbol {
                    symbol: SymbolRef { subroutine, index },
                    frame_offset: u16::try_from(frame_offset).ok()?,
                });
            }
        }
        None
    }

    pub fn create_symbol_checkout(&self) -> Result<usize> {
        Ok(self.current()?.symbols.len())
    }

    /// Deactivate every symbol declared since `checkpoint`.
    pub fn restore_symbol_checkout(&mut self, checkpoint: usize) -> Result<()> {
        for symbol in self.current_mut()?.symbols.iter_mut().skip(checkpoint) {
            symbol.active = false;
        }
        Ok(())
    }

    /// Append `text` to storage and return its address in the binary.
    pub fn register_storage(&mut self, text: &str) -> u32 {
        let address = self.storage_cursor;
        self.storage.push(text.to_string());
        self.storage_cursor += (STORAGE_ENTRY_HEADER + text.len()) as u32;
        address
    }

    /// Assemble the binary image.
    pub fn build(&self) -> Result<Vec<u8>> {
        let storage_end = self.storage_cursor as usize;
        let source_map_size: usize =
            self.subroutines.iter().map(|r| r.source_map.len() * SOURCE_MAP_ENTRY_SIZE).sum();
        let header_end =
            storage_end + 1 + 4 + source_map_size + self.subroutines.len() * SUBROUTINE_DESCRIPTOR_SIZE + 1;

        let mut addresses = Vec::with_capacity(self.subroutines.len());
        let mut address = header_end;
        for routine in &self.subroutines {
            addresses.push(to_u32(address)?);
            address += routine.byte_len() as usize;
        }

        let mut bin = Vec::with_capacity(address);
        let jump = i32::try_from(storage_end).map_err(|_| overflow(storage_end))?;
        Instruction::Jump { offset: jump }.encode(&mut bin);
        for text in &self.storage {
            push_storage_entry(&mut bin, text)?;
        }

        Instruction::SourceMap { size: to_u32(source_map_size)? }.encode(&mut bin);
        for (routine, base) in self.subroutines.iter().zip(&addresses) {
            for entry in &routine.source_map {
                push_u32(&mut bin, base + entry.offset);
                push_u32(&mut bin, entry.start);
                push_u32(&mut bin, entry.end);
            }
        }

        for (routine, base) in self.subroutines.iter().zip(&addresses) {
            Instruction::Subroutine {
                name: routine.name_address,
                address: *base,
                flags: routine.flags(),
            }
            .encode(&mut bin);
        }
        Instruction::Main.encode(&mut bin);
        debug_assert_eq!(bin.len(), header_end);

        for routine in &self.subroutines {
            routine.encode(&mut bin);
        }
        debug!(
            bytes = bin.len(),
            subroutines = self.subroutines.len(),
            storage = self.storage.len(),
            "built program"
        );
        Ok(bin)
    }
}

fn overflow(count: usize) -> CompileError {
    CompileError::OperandOverflow { what: "bytes", count }
}

fn to_u32(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| overflow(value))
}
