//! Error types and reporting

use crate::ast::Span;
use crate::bytecode::BytecodeError;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, CompileError>;

/// Compile error
///
/// `Lexer`, `Parser` and `Io` are user errors. The remaining variants are
/// internal invariant violations of the emitter; any of them aborts the
/// compilation.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Lexer error at {span:?}: {message}")]
    Lexer { message: String, span: Span },

    #[error("Parser error at {span:?}: {message}")]
    Parser { message: String, span: Span },

    #[error("IO error: {message}")]
    Io { message: String },

    #[error("Unsupported at {span:?}: {message}")]
    Unsupported { message: String, span: Span },

    #[error("Routine is empty: {name}")]
    EmptySubroutine { name: String },

    #[error("No active subroutine found")]
    NoActiveSubroutine,

    #[error("No routine for symbol {name}")]
    NoRoutineForSymbol { name: String },

    #[error("Too many {what}: {count} does not fit the operand")]
    OperandOverflow { what: &'static str, count: usize },

    #[error(transparent)]
    Bytecode(#[from] BytecodeError),
}

impl CompileError {
    pub fn lexer(message: impl Into<String>, span: Span) -> Self {
        Self::Lexer {
            message: message.into(),
            span,
        }
    }

    pub fn parser(message: impl Into<String>, span: Span) -> Self {
        Self::Parser {
            message: message.into(),
            span,
        }
    }

    pub fn io_error(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>, span: Span) -> Self {
        Self::Unsupported {
            message: message.into(),
            span,
        }
    }

    pub fn empty_subroutine(name: impl Into<String>) -> Self {
        Self::EmptySubroutine { name: name.into() }
    }

    pub fn no_routine(name: impl Into<String>) -> Self {
        Self::NoRoutineForSymbol { name: name.into() }
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            Self::Lexer { span, .. } | Self::Parser { span, .. } | Self::Unsupported { span, .. } => {
                Some(*span)
            }
            _ => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Lexer { message, .. }
            | Self::Parser { message, .. }
            | Self::Unsupported { message, .. }
            | Self::Io { message } => message.clone(),
            other => other.to_string(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            CompileError::Lexer { .. } => "Lexer",
            CompileError::Parser { .. } => "Parser",
            CompileError::Io { .. } => "IO",
            CompileError::Unsupported { .. } => "Unsupported",
            CompileError::Bytecode(_) => "Bytecode",
            _ => "Internal",
        }
    }
}

/// Convert a u16-sized count, failing with `OperandOverflow`.
pub(crate) fn operand_u16(what: &'static str, count: usize) -> Result<u16> {
    u16::try_from(count).map_err(|_| CompileError::OperandOverflow { what, count })
}

/// Report error with ariadne
pub fn report_error(filename: &str, source: &str, error: &CompileError) -> std::io::Result<()> {
    use ariadne::{Color, Label, Report, ReportKind, Source};

    let kind = error.kind();
    if let Some(span) = error.span() {
        Report::build(ReportKind::Error, (filename, span.start..span.end))
            .with_message(format!("{kind} error"))
            .with_label(
                Label::new((filename, span.start..span.end))
                    .with_message(error.message())
                    .with_color(Color::Red),
            )
            .finish()
            .eprint((filename, Source::from(source)))
    } else {
        Report::build(ReportKind::Error, (filename, 0..0))
            .with_message(format!("{kind} error: {}", error.message()))
            .finish()
            .eprint((filename, Source::from(source)))
    }
}
