//! TypeVM Library
//!
//! Structural type checker for a TypeScript-like declaration language.
//! Source is lexed and parsed into an AST, lowered to a compact bytecode
//! image and run on a stack VM that builds reference-counted type graphs
//! and reports assignability errors.

pub mod ast;
pub mod bytecode;
pub mod compiler;
pub mod disasm;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod types;
pub mod vm;

pub use ast::Span;
pub use error::{CompileError, Result};
pub use vm::{Module, Vm, VmConfig, VmError};

/// Remaining stack below which deep recursion grows a new segment.
pub const STACK_RED_ZONE: usize = 128 * 1024;
/// Size of each segment grown by `stacker`.
pub const STACK_GROW_SIZE: usize = 4 * 1024 * 1024;

/// Lex, parse, compile and build `source` into a runnable [`Module`].
pub fn build_module(filename: &str, source: &str) -> Result<Module> {
    let tokens = lexer::tokenize(source)?;
    let file = parser::parse(filename, source, tokens)?;
    let bin = compiler::compile(&file)?.build()?;
    let mut module = Module::new(bin, filename, source);
    module.parse_header()?;
    Ok(module)
}
