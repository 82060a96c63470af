//! Control-flow sections and the tail-call optimizer
//!
//! Each subroutine's instruction stream is split into sections: a branch
//! opens a child section, closing it opens a continuation of the parent.
//! A section is a tail section when nothing runs after it before the
//! subroutine returns. In a tail section a final `Call` becomes `TailCall`
//! and a `Rest` spreading a type argument becomes `RestReuse`.

use tracing::trace;

use crate::bytecode::{Instruction, Op};

/// Usage index for a read made by a nested subroutine; it is never an
/// instruction of this one, so it only stops earlier spreads from being
/// rewritten.
pub const NESTED_READ: usize = usize::MAX;

/// Last use of a type argument within a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeArgumentUsage {
    pub symbol: u16,
    pub instruction: usize,
}

#[derive(Debug, Clone)]
pub struct Section {
    /// First instruction index
    pub start: usize,
    /// One past the last instruction index, set on close
    pub end: usize,
    pub last_op: Op,
    pub last_op_index: usize,
    /// Tracked instructions emitted into this section
    pub ops: usize,
    /// Continuation opened when a child section closed
    pub next: Option<usize>,
    /// Lexical parent
    pub up: Option<usize>,
    pub has_child: bool,
    pub block_tail_call: bool,
    pub type_argument_usages: Vec<TypeArgumentUsage>,
}

impl Section {
    fn new(start: usize, up: Option<usize>) -> Self {
        Self {
            start,
            end: start,
            last_op: Op::Noop,
            last_op_index: 0,
            ops: 0,
            next: None,
            up,
            has_child: false,
            block_tail_call: false,
            type_argument_usages: Vec::new(),
        }
    }

    fn register_type_argument_usage(&mut self, symbol: u16, instruction: usize) {
        match self.type_argument_usages.iter_mut().find(|usage| usage.symbol == symbol) {
            Some(usage) => usage.instruction = instruction,
            None => self.type_argument_usages.push(TypeArgumentUsage { symbol, instruction }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SectionTracker {
    sections: Vec<Section>,
    active: usize,
    ignore_next: bool,
}

impl Default for SectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SectionTracker {
    pub fn new() -> Self {
        Self {
            sections: vec![Section::new(0, None)],
            active: 0,
            ignore_next: false,
        }
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn active(&self) -> usize {
        self.active
    }

    /// Exclude the next recorded instruction from section bookkeeping.
    pub fn ignore_next_op(&mut self) {
        self.ignore_next = true;
    }

    pub fn record(&mut self, op: Op, index: usize) {
        if std::mem::take(&mut self.ignore_next) {
            return;
        }
        let section = &mut self.sections[self.active];
        section.last_op = op;
        section.last_op_index = index;
        section.ops += 1;
    }

    pub fn block_tail_call(&mut self) {
        self.sections[self.active].block_tail_call = true;
    }

    pub fn register_type_argument_usage(&mut self, symbol: u16, instruction: usize) {
        self.sections[self.active].register_type_argument_usage(symbol, instruction);
    }

    /// Open a child of the active section starting at instruction `at`.
    pub fn push_section(&mut self, at: usize) {
        let parent = self.active;
        self.sections[parent].has_child = true;
        self.sections.push(Section::new(at, Some(parent)));
        self.active = self.sections.len() - 1;
    }

    /// Close the active section at `at` and continue in a fresh
    /// continuation of its parent.
    pub fn pop_section(&mut self, at: usize) {
        let closing = self.active;
        self.sections[closing].end = at;
        let Some(mut parent) = self.sections[closing].up else {
            return;
        };
        while let Some(next) = self.sections[parent].next {
            parent = next;
        }
        let up = self.sections[parent].up;
        let mut continuation = Section::new(at, up);
        // a continuation stays inside whatever loop its parent runs in
        continuation.block_tail_call = self.sections[parent].block_tail_call;
        self.sections.push(continuation);
        let next = self.sections.len() - 1;
        self.sections[parent].next = Some(next);
        self.active = next;
    }

    /// Close the active section at `at`.
    pub fn end(&mut self, at: usize) {
        self.sections[self.active].end = at;
    }

    /// A section is ended when its continuation chain runs out without
    /// emitting anything.
    pub fn ended(&self, index: usize) -> bool {
        let mut section = &self.sections[index];
        while let Some(next) = section.next {
            section = &self.sections[next];
        }
        section.ops == 0
    }

    fn is_tail(&self, index: usize) -> bool {
        let section = &self.sections[index];
        if section.has_child || section.block_tail_call {
            return false;
        }
        if section.next.is_some() && !self.ended(index) {
            return false;
        }
        let mut current = section.up;
        while let Some(up) = current {
            if self.sections[up].block_tail_call || !self.ended(up) {
                return false;
            }
            current = self.sections[up].up;
        }
        true
    }

    /// Rewrite calls and rest reads of every tail section. Returns the
    /// number of rewritten instructions; running it again rewrites nothing.
    pub fn optimise(&self, instructions: &mut [Instruction]) -> usize {
        let mut rewrites = 0;
        for (index, section) in self.sections.iter().enumerate() {
            if section.ops == 0 || !self.is_tail(index) {
                continue;
            }
            if section.last_op == Op::Call {
                if let Some(Instruction::Call { routine, args }) = instructions.get(section.last_op_index).copied() {
                    trace!(section = index, routine, "tail call");
                    instructions[section.last_op_index] = Instruction::TailCall { routine, args };
                    rewrites += 1;
                }
            }
            for usage in &section.type_argument_usages {
                if matches!(instructions.get(usage.instruction), Some(Instruction::Rest)) {
                    trace!(section = index, symbol = usage.symbol, "rest reuse");
                    instructions[usage.instruction] = Instruction::RestReuse;
                    rewrites += 1;
                }
            }
        }
        rewrites
    }
}
