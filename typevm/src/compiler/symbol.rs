//! Compile-time symbols

use serde::Serialize;

use crate::ast::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SymbolKind {
    /// `const x = true;`
    Variable,
    /// `function x() {}`
    Function,
    /// `class X {}`
    Class,
    /// Anonymous subroutines: defaults, bodies, generic wrappers
    Inline,
    /// `type A = string;`
    Type,
    /// `T` in `function f<T>(a: T)`
    TypeArgument,
    /// Per-iteration binding of a distributive conditional; owns a slot
    TypeVariable,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub span: Span,
    /// Position in the owning subroutine's symbol list. For type arguments
    /// and type variables this is also the stack slot read by `Loads`.
    pub index: u16,
    pub declarations: u32,
    pub active: bool,
    /// Subroutine owned by this symbol
    pub routine: Option<usize>,
}

impl Symbol {
    pub fn new(name: impl Into<String>, kind: SymbolKind, span: Span, index: u16) -> Self {
        Self {
            name: name.into(),
            kind,
            span,
            index,
            declarations: 1,
            active: true,
            routine: None,
        }
    }

    /// Whether the symbol names a stack slot rather than a subroutine.
    pub fn is_slot(&self) -> bool {
        matches!(self.kind, SymbolKind::TypeArgument | SymbolKind::TypeVariable)
    }
}

/// Location of a symbol: owning subroutine and index within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolRef {
    pub subroutine: usize,
    pub index: usize,
}

/// Result of a scoped lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoundSymbol {
    pub symbol: SymbolRef,
    /// Number of subroutine levels crossed to reach the symbol
    pub frame_offset: u16,
}
