//! Binary image plus the source it was compiled from
//!
//! The module owns the diagnostics produced while running its bytecode and
//! maps bytecode offsets back to source spans through the embedded source
//! map.

use std::io::Write;
use std::ops::Range;

use ariadne::{Color, Config, Label, Report, ReportKind, Source};

use crate::bytecode::encoding::read_u32;
use crate::bytecode::{BytecodeError, Instruction, Result, read_storage};

pub const SUBROUTINE_FLAG_MAIN: u8 = 1 << 0;
pub const SUBROUTINE_FLAG_INLINE: u8 = 1 << 1;

/// Size of one source map triple: offset, start, end.
const SOURCE_MAP_ENTRY: usize = 12;

/// A subroutine descriptor from the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSubroutine {
    pub name: String,
    pub address: u32,
    pub flags: u8,
}

impl ModuleSubroutine {
    pub fn is_main(&self) -> bool {
        self.flags & SUBROUTINE_FLAG_MAIN != 0
    }
}

/// A user-facing type error raised at a bytecode offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticMessage {
    pub message: String,
    pub ip: usize,
}

impl DiagnosticMessage {
    pub fn new(message: impl Into<String>, ip: usize) -> Self {
        Self {
            message: message.into(),
            ip,
        }
    }
}

/// Zero-based line and character offsets of a mapped span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineCharacter {
    pub line: usize,
    pub pos: usize,
    pub end: usize,
}

#[derive(Debug)]
pub struct Module {
    pub bin: Vec<u8>,
    pub file_name: String,
    pub code: String,
    pub subroutines: Vec<ModuleSubroutine>,
    source_map: Range<usize>,
    errors: Vec<DiagnosticMessage>,
}

impl Module {
    pub fn new(bin: Vec<u8>, file_name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            bin,
            file_name: file_name.into(),
            code: code.into(),
            subroutines: Vec::new(),
            source_map: 0..0,
            errors: Vec::new(),
        }
    }

    /// Read the source map location and the subroutine descriptors.
    pub fn parse_header(&mut self) -> Result<()> {
        let (header, _) = Instruction::decode(&self.bin, 0)?;
        let Instruction::Jump { offset } = header else {
            return Err(malformed("image does not start with a jump"));
        };
        let mut ip = usize::try_from(offset).map_err(|_| malformed("negative header jump"))?;

        self.subroutines.clear();
        loop {
            let (instruction, next) = Instruction::decode(&self.bin, ip)?;
            match instruction {
                Instruction::SourceMap { size } => {
                    self.source_map = ip + 5..ip + 5 + size as usize;
                }
                Instruction::Subroutine { name, address, flags } => {
                    let name = if name == 0 {
                        String::new()
                    } else {
                        read_storage(&self.bin, name as usize)?.text().into_owned()
                    };
                    self.subroutines.push(ModuleSubroutine { name, address, flags });
                }
                Instruction::Main => break,
                other => {
                    return Err(malformed(format!("unexpected {} in header at {ip}", other.op())));
                }
            }
            ip = next;
        }
        if self.subroutines.first().is_none_or(|main| !main.is_main()) {
            return Err(malformed("first subroutine is not main"));
        }
        Ok(())
    }

    pub fn main(&self) -> Option<&ModuleSubroutine> {
        self.subroutines.first()
    }

    /// Index of the named subroutine.
    pub fn find_subroutine(&self, name: &str) -> Option<usize> {
        self.subroutines.iter().position(|routine| !routine.name.is_empty() && routine.name == name)
    }

    /// Source span recorded for the instruction at `ip`.
    pub fn find_map(&self, ip: usize) -> Option<Range<usize>> {
        let mut at = self.source_map.start;
        while at + SOURCE_MAP_ENTRY <= self.source_map.end {
            if read_u32(&self.bin, at).ok()? as usize == ip {
                let start = read_u32(&self.bin, at + 4).ok()? as usize;
                let end = read_u32(&self.bin, at + 8).ok()? as usize;
                return Some(start..end);
            }
            at += SOURCE_MAP_ENTRY;
        }
        None
    }

    /// Like [`find_map`](Self::find_map), with leading whitespace skipped.
    pub fn find_normalized_map(&self, ip: usize) -> Option<Range<usize>> {
        let mut map = self.find_map(ip)?;
        let bytes = self.code.as_bytes();
        while map.start < map.end && bytes.get(map.start).is_some_and(|b| b.is_ascii_whitespace()) {
            map.start += 1;
        }
        Some(map)
    }

    /// Source text at `ip`; empty when unmapped.
    pub fn find_identifier(&self, ip: usize) -> &str {
        self.find_normalized_map(ip)
            .and_then(|map| self.code.get(map))
            .unwrap_or("")
    }

    pub fn map_to_line_character(&self, map: &Range<usize>) -> LineCharacter {
        let before = &self.code[..map.start.min(self.code.len())];
        let line = before.matches('\n').count();
        let line_start = before.rfind('\n').map_or(0, |i| i + 1);
        LineCharacter {
            line,
            pos: map.start - line_start,
            end: map.end.saturating_sub(line_start),
        }
    }

    pub fn report(&mut self, message: DiagnosticMessage) {
        self.errors.push(message);
    }

    pub fn errors(&self) -> &[DiagnosticMessage] {
        &self.errors
    }

    pub fn clear(&mut self) {
        self.errors.clear();
        self.subroutines.clear();
    }

    /// Render every diagnostic followed by the error count.
    pub fn write_errors(&self, out: &mut impl Write, color: bool) -> std::io::Result<()> {
        let file = self.file_name.as_str();
        for error in &self.errors {
            let span = self.find_normalized_map(error.ip).unwrap_or(0..0);
            let mut report = Report::build(ReportKind::Error, (file, span.clone()))
                .with_config(Config::default().with_color(color))
                .with_message(&error.message);
            if !span.is_empty() {
                report = report.with_label(
                    Label::new((file, span))
                        .with_message(&error.message)
                        .with_color(Color::Red),
                );
            }
            report.finish().write((file, Source::from(self.code.as_str())), &mut *out)?;
        }
        writeln!(out, "Found {} errors in {}", self.errors.len(), self.file_name)
    }

    pub fn print_errors(&self) -> std::io::Result<()> {
        self.write_errors(&mut std::io::stderr(), true)
    }
}

fn malformed(message: impl Into<String>) -> BytecodeError {
    BytecodeError::MalformedHeader { message: message.into() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Op;
    use crate::bytecode::encoding::{push_storage_entry, push_u32};

    /// Jump, one storage entry, a source map with one triple, main.
    fn image() -> Vec<u8> {
        let mut bin = Vec::new();
        let storage_end = 5 + 10 + 3;
        Instruction::Jump { offset: storage_end }.encode(&mut bin);
        push_storage_entry(&mut bin, "foo").unwrap();
        Instruction::SourceMap { size: 12 }.encode(&mut bin);
        push_u32(&mut bin, 40);
        push_u32(&mut bin, 9);
        push_u32(&mut bin, 14);
        Instruction::Subroutine { name: 0, address: 40, flags: SUBROUTINE_FLAG_MAIN }.encode(&mut bin);
        Instruction::Subroutine { name: 5, address: 41, flags: 0 }.encode(&mut bin);
        Instruction::Main.encode(&mut bin);
        bin
    }

    #[test]
    fn test_parse_header() {
        let mut module = Module::new(image(), "a.ts", "type A = \n  Foo;");
        module.parse_header().unwrap();
        assert_eq!(module.subroutines.len(), 2);
        assert!(module.subroutines[0].is_main());
        assert_eq!(module.subroutines[1].name, "foo");
        assert_eq!(module.subroutines[1].address, 41);
        assert_eq!(module.find_subroutine("foo"), Some(1));
        assert_eq!(module.find_subroutine(""), None);
    }

    #[test]
    fn test_parse_header_rejects_garbage() {
        let mut module = Module::new(vec![Op::Halt as u8], "a.ts", "");
        assert!(module.parse_header().is_err());
    }

    #[test]
    fn test_find_map_and_identifier() {
        let mut module = Module::new(image(), "a.ts", "type A = \n  Foo;");
        module.parse_header().unwrap();
        assert_eq!(module.find_map(40), Some(9..14));
        assert_eq!(module.find_map(41), None);
        assert_eq!(module.find_normalized_map(40), Some(12..14));
        assert_eq!(module.find_identifier(40), "Fo");
        assert_eq!(module.find_identifier(99), "");
    }

    #[test]
    fn test_map_to_line_character() {
        let module = Module::new(Vec::new(), "a.ts", "type A = 1;\ntype B = Foo;");
        let at = module.map_to_line_character(&(21..24));
        assert_eq!(at, LineCharacter { line: 1, pos: 9, end: 12 });
        let first = module.map_to_line_character(&(0..4));
        assert_eq!(first, LineCharacter { line: 0, pos: 0, end: 4 });
    }

    #[test]
    fn test_write_errors_counts() {
        let mut module = Module::new(image(), "a.ts", "type A = \n  Foo;");
        module.parse_header().unwrap();
        module.report(DiagnosticMessage::new("Cannot find name 'Fo'", 40));
        let mut out = Vec::new();
        module.write_errors(&mut out, false).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Cannot find name 'Fo'"));
        assert!(text.ends_with("Found 1 errors in a.ts\n"));
        module.clear();
        assert!(module.errors().is_empty());
    }
}
