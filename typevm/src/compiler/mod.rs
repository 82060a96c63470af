//! Lowering of the syntax tree into bytecode subroutines
//!
//! Compilation runs in two passes over the top-level statements. The first
//! declares a symbol and an empty subroutine for every alias, function,
//! variable and class so references resolve regardless of order. The second
//! fills those subroutines and emits the checks that run from main.

mod program;
mod section;
mod subroutine;
mod symbol;

pub use program::Program;
pub use section::{NESTED_READ, Section, SectionTracker, TypeArgumentUsage};
pub use subroutine::{SourceMapEntry, Subroutine};
pub use symbol::{FoundSymbol, Symbol, SymbolKind, SymbolRef};

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::ast::*;
use crate::bytecode::{ErrorCode, Instruction, Op};
use crate::error::{CompileError, Result, operand_u16};

/// Compile a parsed file into a program ready to [`build`](Program::build).
pub fn compile(file: &SourceFile) -> Result<Program> {
    let mut compiler = Compiler::new();
    compiler.compile_source_file(file)?;
    Ok(compiler.into_program())
}

/// Parameters visible to the function body being compiled.
#[derive(Debug, Default)]
struct BodyScope {
    params: Vec<Param>,
}

impl BodyScope {
    fn find(&self, name: &str) -> Option<&Param> {
        self.params.iter().rev().find(|param| param.name.node == name)
    }
}

pub struct Compiler {
    program: Program,
    bodies: Vec<BodyScope>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            program: Program::new(),
            bodies: Vec::new(),
        }
    }

    pub fn into_program(self) -> Program {
        self.program
    }

    pub fn compile_source_file(&mut self, file: &SourceFile) -> Result<()> {
        debug!(statements = file.statements.len(), "compiling source file");

        // pass 1: declare
        let mut symbols = Vec::with_capacity(file.statements.len());
        let mut last: FxHashMap<&str, usize> = FxHashMap::default();
        for (index, statement) in file.statements.iter().enumerate() {
            let kind = match &statement.node {
                Statement::TypeAlias(_) => SymbolKind::Type,
                Statement::Function(_) => SymbolKind::Function,
                Statement::Variable(_) => SymbolKind::Variable,
                Statement::Class(_) => SymbolKind::Class,
                Statement::Return(_) | Statement::Expression(_) => {
                    symbols.push(None);
                    continue;
                }
            };
            let Some(name) = statement.node.declared_name() else {
                symbols.push(None);
                continue;
            };
            symbols.push(Some(self.program.push_symbol_for_routine(&name.node, kind, name.span)?));
            last.insert(name.node.as_str(), index);
        }

        // pass 2: only the last declaration of a name owns the subroutine
        for (index, (statement, symbol)) in file.statements.iter().zip(symbols).enumerate() {
            if let Some(name) = statement.node.declared_name() {
                if last.get(name.node.as_str()) != Some(&index) {
                    continue;
                }
            }
            self.statement(statement, symbol)?;
        }

        self.program.push_op(Instruction::Halt, None)?;
        self.program.pop_subroutine()?;
        debug!(subroutines = self.program.subroutines.len(), "compiled source file");
        Ok(())
    }

    fn routine_of(&self, symbol: SymbolRef) -> Result<u32> {
        let symbol = self.program.symbol(symbol);
        match symbol.routine {
            Some(routine) => Ok(routine as u32),
            None => Err(CompileError::no_routine(symbol.name.clone())),
        }
    }

    fn statement(&mut self, statement: &Spanned<Statement>, symbol: Option<SymbolRef>) -> Result<()> {
        match (&statement.node, symbol) {
            (Statement::TypeAlias(alias), Some(symbol)) => {
                self.program.push_subroutine(symbol)?;
                self.type_params(&alias.type_params)?;
                self.type_node(&alias.ty)?;
                self.program.pop_subroutine()?;
            }
            (Statement::Function(func), Some(symbol)) => {
                self.program.push_subroutine(symbol)?;
                self.push_function(Op::Function, &func.signature, Some(&func.name), statement.span)?;
                self.program.pop_subroutine()?;
                if func.signature.body.is_some() {
                    self.check_declaration(symbol, func.name.span)?;
                }
            }
            (Statement::Class(class), Some(symbol)) => {
                self.program.push_subroutine(symbol)?;
                self.type_params(&class.type_params)?;
                for member in &class.members {
                    self.member(member)?;
                }
                let count = operand_u16("class members", class.members.len())?;
                self.program.push_op(Instruction::Class { count }, Some(class.name.span))?;
                self.program.pop_subroutine()?;
                let has_body = class.members.iter().any(
                    |member| matches!(&member.node, Member::Method { signature, .. } if signature.body.is_some()),
                );
                if has_body {
                    self.check_declaration(symbol, class.name.span)?;
                }
            }
            (Statement::Variable(var), Some(symbol)) => self.variable(var, symbol)?,
            (Statement::Return(_), _) => {
                self.program.push_error(ErrorCode::ReturnOutsideFunction, statement.span);
            }
            (Statement::Expression(expr), _) => {
                self.expression(expr)?;
                self.program.push_op(Instruction::Pop, None)?;
            }
            (_, None) => return Err(CompileError::unsupported("declaration without a symbol", statement.span)),
        }
        Ok(())
    }

    /// Evaluate a declaration from main so the bodies it contains get checked.
    fn check_declaration(&mut self, symbol: SymbolRef, span: Span) -> Result<()> {
        let routine = self.routine_of(symbol)?;
        self.program.push_op(Instruction::Call { routine, args: 0 }, Some(span))?;
        self.program.push_op(Instruction::Pop, None)?;
        Ok(())
    }

    fn variable(&mut self, var: &VariableDecl, symbol: SymbolRef) -> Result<()> {
        self.program.push_subroutine(symbol)?;
        match (&var.ty, &var.init) {
            (Some(ty), _) => self.type_node(ty)?,
            (None, Some(init)) => self.expression(init)?,
            (None, None) => {
                self.program.push_op(Instruction::Any, Some(var.name.span))?;
            }
        }
        self.program.pop_subroutine()?;

        if let (Some(_), Some(init)) = (&var.ty, &var.init) {
            let routine = self.routine_of(symbol)?;
            self.program.push_op(Instruction::Call { routine, args: 0 }, Some(var.name.span))?;
            self.expression(init)?;
            self.program.push_op(Instruction::Assign, Some(init.span))?;
        }
        Ok(())
    }

    fn body_statement(&mut self, statement: &Spanned<Statement>) -> Result<()> {
        match &statement.node {
            Statement::Return(expr) => {
                match expr {
                    Some(expr) => self.expression(expr)?,
                    None => {
                        self.program.push_op(Instruction::Undefined, Some(statement.span))?;
                    }
                }
                self.program.push_op(Instruction::ReturnStatement, Some(statement.span))?;
            }
            Statement::Expression(expr) => {
                self.expression(expr)?;
                self.program.push_op(Instruction::Pop, None)?;
            }
            _ => {
                return Err(CompileError::unsupported(
                    "declarations inside function bodies",
                    statement.span,
                ));
            }
        }
        Ok(())
    }

    fn expression(&mut self, expr: &Spanned<Expr>) -> Result<()> {
        let span = Some(expr.span);
        match &expr.node {
            Expr::Literal(literal) => match literal {
                Literal::String(text) => {
                    self.program.push_string_literal(text, expr.span)?;
                }
                Literal::Number(text) => {
                    self.program.push_storage(text, span, |address| Instruction::NumberLiteral { address })?;
                }
                Literal::BigInt(text) => {
                    self.program.push_storage(text, span, |address| Instruction::BigIntLiteral { address })?;
                }
                Literal::Boolean(true) => {
                    self.program.push_op(Instruction::True, span)?;
                }
                Literal::Boolean(false) => {
                    self.program.push_op(Instruction::False, span)?;
                }
                Literal::Null => {
                    self.program.push_op(Instruction::Null, span)?;
                }
                Literal::Undefined => {
                    self.program.push_op(Instruction::Undefined, span)?;
                }
            },
            Expr::Identifier(name) => self.identifier(name, expr.span)?,
            Expr::Call { callee, type_args, args } => {
                if let Expr::Identifier(name) = &callee.node {
                    if self.is_type_only(name) {
                        self.program.push_error(ErrorCode::NotCallable, callee.span);
                        self.program.push_op(Instruction::Never, None)?;
                        return Ok(());
                    }
                }
                self.expression(callee)?;
                for arg in type_args {
                    self.type_node(arg)?;
                }
                let count = operand_u16("type arguments", type_args.len())?;
                self.program.push_op(Instruction::Instantiate { count }, Some(callee.span))?;
                for arg in args {
                    self.expression(arg)?;
                }
                let args = operand_u16("arguments", args.len())?;
                self.program.push_op(Instruction::CallExpression { args }, span)?;
            }
        }
        Ok(())
    }

    /// Whether `name` resolves to something that only exists as a type.
    fn is_type_only(&self, name: &str) -> bool {
        if self.bodies.last().is_some_and(|scope| scope.find(name).is_some()) {
            return false;
        }
        self.program.find_symbol(name).is_some_and(|found| {
            matches!(
                self.program.symbol(found.symbol).kind,
                SymbolKind::Type | SymbolKind::Class | SymbolKind::TypeArgument | SymbolKind::TypeVariable
            )
        })
    }

    fn identifier(&mut self, name: &str, span: Span) -> Result<()> {
        // parameters of the enclosing body evaluate to their declared type
        if let Some(param) = self.bodies.last().and_then(|scope| scope.find(name)).cloned() {
            match &param.ty {
                Some(ty) => self.type_node(ty)?,
                None => {
                    self.program.push_op(Instruction::Any, Some(span))?;
                }
            }
            return Ok(());
        }

        let Some(found) = self.program.find_symbol(name) else {
            self.program.push_error(ErrorCode::CannotFind, span);
            self.program.push_op(Instruction::Never, None)?;
            return Ok(());
        };
        let Symbol { kind, index, .. } = *self.program.symbol(found.symbol);
        match kind {
            SymbolKind::TypeArgument | SymbolKind::TypeVariable => {
                let loads = Instruction::Loads { frame: found.frame_offset, symbol: index };
                let instruction = self.program.push_op(loads, Some(span))?;
                self.register_read(found, index, instruction)?;
            }
            SymbolKind::Class => {
                let routine = self.routine_of(found.symbol)?;
                self.program.push_op(Instruction::ClassRef { routine }, Some(span))?;
            }
            _ => {
                let routine = self.routine_of(found.symbol)?;
                self.program.push_op(Instruction::Call { routine, args: 0 }, Some(span))?;
            }
        }
        Ok(())
    }

    fn type_node(&mut self, node: &Spanned<TypeNode>) -> Result<()> {
        stacker::maybe_grow(crate::STACK_RED_ZONE, crate::STACK_GROW_SIZE, || self.type_node_inner(node))
    }

    fn type_node_inner(&mut self, node: &Spanned<TypeNode>) -> Result<()> {
        let span = Some(node.span);
        match &node.node {
            TypeNode::Keyword(keyword) => {
                self.program.push_op(keyword_instruction(*keyword), span)?;
            }
            TypeNode::StringLiteral(text) => {
                self.program.push_string_literal(text, node.span)?;
            }
            TypeNode::NumberLiteral(text) => {
                self.program.push_storage(text, span, |address| Instruction::NumberLiteral { address })?;
            }
            TypeNode::BigIntLiteral(text) => {
                self.program.push_storage(text, span, |address| Instruction::BigIntLiteral { address })?;
            }
            TypeNode::BooleanLiteral(value) => {
                let instruction = if *value { Instruction::True } else { Instruction::False };
                self.program.push_op(instruction, span)?;
            }
            TypeNode::Reference { name, type_args } => self.type_reference(name, type_args)?,
            TypeNode::Union(members) => {
                for member in members {
                    self.type_node(member)?;
                }
                let count = operand_u16("union members", members.len())?;
                self.program.push_op(Instruction::Union { count }, span)?;
            }
            TypeNode::Tuple(elements) => {
                for element in elements {
                    self.tuple_element(element)?;
                }
                let count = operand_u16("tuple members", elements.len())?;
                self.program.push_op(Instruction::Tuple { count }, span)?;
            }
            TypeNode::Array(element) => {
                self.type_node(element)?;
                self.program.push_op(Instruction::Array, span)?;
            }
            TypeNode::Readonly(inner) => {
                self.type_node(inner)?;
                self.program.push_op(Instruction::Readonly, span)?;
            }
            TypeNode::TemplateLiteral(spans) => {
                for part in spans {
                    match part {
                        TemplateSpan::Text(text) => {
                            self.program.push_string_literal(&text.node, text.span)?;
                        }
                        TemplateSpan::Type(ty) => self.type_node(ty)?,
                    }
                }
                let count = operand_u16("template spans", spans.len())?;
                self.program.push_op(Instruction::TemplateLiteral { count }, span)?;
            }
            TypeNode::Conditional { check, extends_type, true_type, false_type } => {
                match self.distributed_argument(check)? {
                    Some(argument) => self.distributive_conditional(argument, node, extends_type, true_type, false_type)?,
                    None => self.conditional(check, extends_type, true_type, false_type, node.span)?,
                }
            }
            TypeNode::Object(members) => {
                for member in members {
                    self.member(member)?;
                }
                let count = operand_u16("object members", members.len())?;
                self.program.push_op(Instruction::ObjectLiteral { count }, span)?;
            }
            TypeNode::Function(signature) => self.push_function(Op::Function, signature, None, node.span)?,
        }
        Ok(())
    }

    fn type_reference(&mut self, name: &Spanned<String>, type_args: &[Spanned<TypeNode>]) -> Result<()> {
        let span = Some(name.span);
        let Some(found) = self.program.find_symbol(&name.node) else {
            if name.node == "Array" && type_args.len() == 1 {
                self.type_node(&type_args[0])?;
                self.program.push_op(Instruction::Array, span)?;
            } else {
                self.program.push_error(ErrorCode::CannotFind, name.span);
                self.program.push_op(Instruction::Never, None)?;
            }
            return Ok(());
        };

        let symbol = self.program.symbol(found.symbol);
        if symbol.is_slot() {
            let index = symbol.index;
            let loads = Instruction::Loads { frame: found.frame_offset, symbol: index };
            let instruction = self.program.push_op(loads, span)?;
            self.register_read(found, index, instruction)?;
            return Ok(());
        }

        let routine = self.routine_of(found.symbol)?;
        for arg in type_args {
            self.type_node(arg)?;
        }
        let args = operand_u16("type arguments", type_args.len())?;
        self.program.push_op(Instruction::Call { routine, args }, span)?;
        Ok(())
    }

    /// Track a slot read for the tail-section rewrite. A read from a nested
    /// subroutine counts against the subroutine that owns the slot.
    fn register_read(&mut self, found: FoundSymbol, index: u16, instruction: usize) -> Result<()> {
        match found.frame_offset {
            0 => self.program.register_type_argument_usage(index, instruction),
            offset => self.program.register_nested_type_argument_usage(offset, index),
        }
    }

    fn tuple_element(&mut self, element: &TupleElement) -> Result<()> {
        let span = Some(element.ty.span);
        self.type_node(&element.ty)?;
        if element.rest {
            let rest = self.program.push_op(Instruction::Rest, span)?;
            if let Some(symbol) = self.local_type_argument(&element.ty) {
                self.program.register_type_argument_usage(symbol, rest)?;
            }
        }
        self.program.push_op(Instruction::TupleMember, span)?;
        if element.optional {
            self.program.push_op(Instruction::Optional, span)?;
        }
        Ok(())
    }

    /// Slot of a bare reference to a type argument of the current subroutine.
    fn local_type_argument(&self, node: &Spanned<TypeNode>) -> Option<u16> {
        let TypeNode::Reference { name, type_args } = &node.node else {
            return None;
        };
        if !type_args.is_empty() {
            return None;
        }
        let found = self.program.find_symbol(&name.node)?;
        let symbol = self.program.symbol(found.symbol);
        (found.frame_offset == 0 && symbol.is_slot()).then_some(symbol.index)
    }

    /// A conditional distributes when its check type is a bare type argument
    /// of the subroutine being compiled, which must have reserved slots.
    fn distributed_argument(&self, check: &Spanned<TypeNode>) -> Result<Option<(String, u16)>> {
        let TypeNode::Reference { name, type_args } = &check.node else {
            return Ok(None);
        };
        if !type_args.is_empty() || self.program.current()?.slots_instruction.is_none() {
            return Ok(None);
        }
        let Some(found) = self.program.find_symbol(&name.node) else {
            return Ok(None);
        };
        let symbol = self.program.symbol(found.symbol);
        if found.frame_offset != 0 || symbol.kind != SymbolKind::TypeArgument {
            return Ok(None);
        }
        Ok(Some((name.node.clone(), symbol.index)))
    }

    fn conditional(
        &mut self,
        check: &Spanned<TypeNode>,
        extends_type: &Spanned<TypeNode>,
        true_type: &Spanned<TypeNode>,
        false_type: &Spanned<TypeNode>,
        span: Span,
    ) -> Result<()> {
        self.type_node(check)?;
        self.type_node(extends_type)?;
        self.program.push_op(Instruction::Extends, Some(span))?;

        let condition = self.program.push_op(Instruction::JumpCondition { offset: 0 }, None)?;
        let condition_at = self.program.position(condition)?;
        self.program.push_section()?;
        self.type_node(true_type)?;
        self.program.ignore_next_section_op()?;
        let jump = self.program.push_op(Instruction::Jump { offset: 0 }, None)?;
        let jump_at = self.program.position(jump)?;
        self.program.pop_section()?;

        let false_start = self.program.ip()?;
        self.program
            .patch(condition, Instruction::JumpCondition { offset: false_start - condition_at })?;
        self.program.push_section()?;
        self.type_node(false_type)?;
        self.program.pop_section()?;

        let end = self.program.ip()?;
        self.program.patch(jump, Instruction::Jump { offset: jump_offset(jump_at, end)? })?;
        Ok(())
    }

    /// `T extends U ? X : Y` over a union `T`: every member is bound to a
    /// fresh type variable shadowing `T` and the results are joined.
    fn distributive_conditional(
        &mut self,
        (name, slot): (String, u16),
        node: &Spanned<TypeNode>,
        extends_type: &Spanned<TypeNode>,
        true_type: &Spanned<TypeNode>,
        false_type: &Spanned<TypeNode>,
    ) -> Result<()> {
        let TypeNode::Conditional { check, .. } = &node.node else {
            return Err(CompileError::unsupported("expected a conditional type", node.span));
        };
        let loads = self.program.push_op(Instruction::Loads { frame: 0, symbol: slot }, Some(check.span))?;
        self.program.register_type_argument_usage(slot, loads)?;

        let checkout = self.program.create_symbol_checkout()?;
        let variable = self.program.push_symbol(&name, SymbolKind::TypeVariable, check.span)?;
        let variable_slot = self.program.symbol(variable).index;

        let distribute = self
            .program
            .push_op(Instruction::Distribute { slot: variable_slot, offset: 0 }, Some(node.span))?;
        let distribute_at = self.program.position(distribute)?;
        self.program.push_section()?;
        self.program.block_tail_call()?;

        self.conditional(check, extends_type, true_type, false_type, node.span)?;

        self.program.ignore_next_section_op()?;
        let back = jump_offset(self.program.ip()?, distribute_at)?;
        self.program.push_op(Instruction::Jump { offset: back }, None)?;
        self.program.pop_section()?;

        let end = self.program.ip()?;
        self.program
            .patch(distribute, Instruction::Distribute { slot: variable_slot, offset: end - distribute_at })?;
        self.program.restore_symbol_checkout(checkout)?;
        Ok(())
    }

    fn member(&mut self, member: &Spanned<Member>) -> Result<()> {
        match &member.node {
            Member::Property { name, ty, optional, readonly } => {
                match ty {
                    Some(ty) => self.type_node(ty)?,
                    None => {
                        self.program.push_op(Instruction::Any, Some(name.span))?;
                    }
                }
                self.program.push_string_literal(&name.node, name.span)?;
                self.program.push_op(Instruction::PropertySignature, Some(member.span))?;
                if *optional {
                    self.program.push_op(Instruction::Optional, None)?;
                }
                if *readonly {
                    self.program.push_op(Instruction::Readonly, None)?;
                }
            }
            Member::Method { name, signature } => {
                self.push_function(Op::Method, signature, Some(name), member.span)?;
            }
        }
        Ok(())
    }

    /// Lower a signature to `Function`/`Method`. Generic signatures are
    /// wrapped in their own subroutine and referenced by `FunctionRef`.
    fn push_function(
        &mut self,
        op: Op,
        signature: &FunctionSignature,
        name: Option<&Spanned<String>>,
        span: Span,
    ) -> Result<()> {
        let size = operand_u16("parameters", 1 + signature.params.len())?;
        let instruction = match op {
            Op::Method => Instruction::Method { size },
            _ => Instruction::Function { size },
        };

        if signature.type_params.is_empty() {
            self.function_parts(signature, name)?;
            self.program.push_op(instruction, Some(span))?;
            return Ok(());
        }

        let label = match op {
            Op::Method => signature.display(name.map(|name| name.node.as_str())).to_string(),
            _ => signature.display(None).to_string(),
        };
        let wrapper = self.program.push_subroutine_labelled(&label);
        self.type_params(&signature.type_params)?;
        self.function_parts(signature, name)?;
        self.program.push_op(instruction, Some(span))?;
        self.program.pop_subroutine()?;
        self.program.push_op(Instruction::FunctionRef { routine: wrapper as u32 }, Some(span))?;
        Ok(())
    }

    /// Return type (checked against or inferred from the body), parameters
    /// and the name, in the order `Function`/`Method` pops them.
    fn function_parts(&mut self, signature: &FunctionSignature, name: Option<&Spanned<String>>) -> Result<()> {
        let body = match &signature.body {
            Some(statements) => {
                let routine = self.program.push_subroutine_nameless();
                self.program.push_op(Instruction::TypeArgument, None)?;
                self.bodies.push(BodyScope { params: signature.params.clone() });
                let compiled = statements.iter().try_for_each(|statement| self.body_statement(statement));
                self.bodies.pop();
                compiled?;
                self.program.push_op(Instruction::Loads { frame: 0, symbol: 0 }, None)?;
                self.program.push_op(Instruction::UnwrapInferBody, None)?;
                self.program.pop_subroutine()?;
                Some(routine as u32)
            }
            None => None,
        };

        match (&signature.return_type, body) {
            (Some(ty), Some(routine)) => {
                self.type_node(ty)?;
                self.program.push_op(Instruction::CheckBody { routine }, Some(ty.span))?;
            }
            (Some(ty), None) => self.type_node(ty)?,
            (None, Some(routine)) => {
                self.program.push_op(Instruction::InferBody { routine }, None)?;
            }
            (None, None) => {
                self.program.push_op(Instruction::Unknown, None)?;
            }
        }

        for param in &signature.params {
            let span = Some(param.name.span);
            match &param.ty {
                Some(ty) => self.type_node(ty)?,
                None => {
                    self.program.push_op(Instruction::Any, span)?;
                }
            }
            if param.rest {
                self.program.push_op(Instruction::Rest, span)?;
            }
            self.program
                .push_storage(&param.name.node, span, |address| Instruction::Parameter { address })?;
            if param.optional {
                self.program.push_op(Instruction::Optional, None)?;
            }
        }

        match name {
            Some(name) => {
                self.program.push_string_literal(&name.node, name.span)?;
            }
            None => {
                self.program.push_op(Instruction::Never, None)?;
            }
        }
        Ok(())
    }

    /// Bind generic parameters in order, then reserve the slots for type
    /// variables declared later in the subroutine.
    fn type_params(&mut self, params: &[TypeParam]) -> Result<()> {
        if params.is_empty() {
            return Ok(());
        }
        for param in params {
            let span = Some(param.name.span);
            match &param.default {
                Some(default) => {
                    let routine = self.program.push_subroutine_nameless();
                    self.type_node(default)?;
                    self.program.pop_subroutine()?;
                    self.program
                        .push_op(Instruction::TypeArgumentDefault { routine: routine as u32 }, span)?;
                }
                None => {
                    self.program.push_op(Instruction::TypeArgument, span)?;
                }
            }
            self.program.push_symbol(&param.name.node, SymbolKind::TypeArgument, param.name.span)?;
        }
        self.program.push_slots()
    }
}

fn keyword_instruction(keyword: Keyword) -> Instruction {
    match keyword {
        Keyword::Any => Instruction::Any,
        Keyword::Unknown => Instruction::Unknown,
        Keyword::Never => Instruction::Never,
        Keyword::Null => Instruction::Null,
        Keyword::Undefined => Instruction::Undefined,
        Keyword::Void => Instruction::Void,
        Keyword::String => Instruction::String,
        Keyword::Number => Instruction::Number,
        Keyword::BigInt => Instruction::BigInt,
        Keyword::Boolean => Instruction::Boolean,
        Keyword::Symbol => Instruction::Symbol,
    }
}

/// Relative offset of a jump from `from` to `to`.
fn jump_offset(from: u32, to: u32) -> Result<i32> {
    let offset = i64::from(to) - i64::from(from);
    i32::try_from(offset).map_err(|_| CompileError::OperandOverflow { what: "jump bytes", count: offset.unsigned_abs() as usize })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse;

    fn compile_source(source: &str) -> Program {
        let tokens = tokenize(source).unwrap();
        let file = parse("test.ts", source, tokens).unwrap();
        compile(&file).unwrap()
    }

    fn routine<'a>(program: &'a Program, name: &str) -> &'a Subroutine {
        program
            .subroutines
            .iter()
            .find(|routine| routine.name == name)
            .unwrap_or_else(|| panic!("no subroutine {name}"))
    }

    #[test]
    fn test_alias_without_type_emits_keyword() {
        let program = compile_source("type A = string;");
        assert_eq!(routine(&program, "A").instructions, vec![Instruction::String, Instruction::Return]);
        assert_eq!(program.main().instructions, vec![Instruction::Halt, Instruction::Return]);
    }

    #[test]
    fn test_function_without_type_or_body_emits_unknown() {
        let program = compile_source("function f(a: string);");
        let f = routine(&program, "f");
        assert_eq!(f.instructions[0], Instruction::Unknown);
        assert_eq!(f.instructions[1], Instruction::String);
        assert!(matches!(f.instructions[2], Instruction::Parameter { .. }));
        assert!(matches!(f.instructions[3], Instruction::StringLiteral { .. }));
        assert_eq!(f.instructions[4], Instruction::Function { size: 2 });
    }

    #[test]
    fn test_generic_function_emits_function_ref() {
        let program = compile_source("function f<T, U = string>(a: T): U;");
        let f = routine(&program, "f");
        let Instruction::FunctionRef { routine: wrapper } = f.instructions[0] else {
            panic!("expected FunctionRef, got {:?}", f.instructions);
        };
        let wrapper = &program.subroutines[wrapper as usize];
        assert_eq!(wrapper.kind, SymbolKind::Inline);
        assert_eq!(wrapper.instructions[0], Instruction::TypeArgument);
        assert!(matches!(wrapper.instructions[1], Instruction::TypeArgumentDefault { .. }));
        assert!(matches!(wrapper.instructions[2], Instruction::Slots { .. }));
        assert_eq!(wrapper.instructions[3], Instruction::Loads { frame: 0, symbol: 1 });
        assert_eq!(wrapper.name, "<T, U = string>(a: T) => U");
        assert_ne!(wrapper.name_address, 0);
    }

    #[test]
    fn test_generic_method_wrapper_is_labelled_with_its_name() {
        let program = compile_source("type O = { m<U>(x: U): U };");
        assert!(program.subroutines.iter().any(|routine| routine.name == "m<U>(x: U): U"));
    }

    #[test]
    fn test_forward_reference_becomes_tail_call() {
        let program = compile_source("type A = B; type B = number;");
        let b = routine(&program, "B").index as u32;
        assert_eq!(
            routine(&program, "A").instructions,
            vec![Instruction::TailCall { routine: b, args: 0 }, Instruction::Return]
        );
    }

    #[test]
    fn test_unknown_name_reports_in_main() {
        let program = compile_source("type A = Missing;");
        assert_eq!(routine(&program, "A").instructions[0], Instruction::Never);
        assert_eq!(program.main().instructions[0], Instruction::Error { code: ErrorCode::CannotFind });
        assert_eq!(program.main().source_map[0].start, 9);
    }

    #[test]
    fn test_type_arguments_load_from_frame_zero() {
        let program = compile_source("type Box<T> = [T];");
        let instructions = &routine(&program, "Box").instructions;
        assert_eq!(instructions[0], Instruction::TypeArgument);
        assert_eq!(instructions[1], Instruction::Slots { count: 0 });
        assert_eq!(instructions[2], Instruction::Loads { frame: 0, symbol: 0 });
        assert_eq!(instructions[3], Instruction::TupleMember);
        assert_eq!(instructions[4], Instruction::Tuple { count: 1 });
    }

    #[test]
    fn test_default_reads_enclosing_frame() {
        let program = compile_source("type A<T, U = T[]> = U;");
        let a = routine(&program, "A");
        let Instruction::TypeArgumentDefault { routine: default } = a.instructions[1] else {
            panic!("expected default, got {:?}", a.instructions);
        };
        assert_eq!(
            program.subroutines[default as usize].instructions,
            vec![Instruction::Loads { frame: 1, symbol: 0 }, Instruction::Array, Instruction::Return]
        );
    }

    #[test]
    fn test_conditional_jumps_and_tail_calls() {
        let program = compile_source("type A = string extends string ? B : C; type B = 1; type C = 2;");
        let a = routine(&program, "A");
        let b = routine(&program, "B").index as u32;
        let c = routine(&program, "C").index as u32;
        assert_eq!(
            a.instructions,
            vec![
                Instruction::String,
                Instruction::String,
                Instruction::Extends,
                Instruction::JumpCondition { offset: 5 + 7 + 5 },
                Instruction::TailCall { routine: b, args: 0 },
                Instruction::Jump { offset: 5 + 7 },
                Instruction::TailCall { routine: c, args: 0 },
                Instruction::Return,
            ]
        );
    }

    #[test]
    fn test_distributive_conditional_loops() {
        let program = compile_source("type D<T> = T extends string ? B : never; type B = 1;");
        let d = routine(&program, "D");
        assert_eq!(d.slots, 1);
        assert_eq!(d.instructions[2], Instruction::Loads { frame: 0, symbol: 0 });
        let Instruction::Distribute { slot, offset } = d.instructions[3] else {
            panic!("expected Distribute, got {:?}", d.instructions);
        };
        assert_eq!(slot, 1);
        // the check type inside the loop reads the type variable
        assert_eq!(d.instructions[4], Instruction::Loads { frame: 0, symbol: 1 });
        // calls inside the loop body stay plain calls
        assert!(d.instructions.iter().all(|i| !matches!(i, Instruction::TailCall { .. })));
        let distribute_at = d.position(3);
        let back = d.instructions.len() - 2;
        let Instruction::Jump { offset: back_offset } = d.instructions[back] else {
            panic!("expected back jump, got {:?}", d.instructions);
        };
        assert_eq!(i64::from(d.position(back)) + i64::from(back_offset), i64::from(distribute_at));
        assert_eq!(distribute_at + offset, d.position(d.instructions.len() - 1));
    }

    #[test]
    fn test_rest_of_type_argument_is_reused_in_tail() {
        let program = compile_source("type Append<T> = [...T, string];");
        let instructions = &routine(&program, "Append").instructions;
        assert!(instructions.contains(&Instruction::RestReuse));
        assert!(!instructions.contains(&Instruction::Rest));
    }

    #[test]
    fn test_rest_read_again_by_nested_function_is_kept() {
        let program = compile_source("type A<T> = [...T, <U>(a: T) => U];");
        let instructions = &routine(&program, "A").instructions;
        assert!(instructions.contains(&Instruction::Rest));
        assert!(!instructions.contains(&Instruction::RestReuse));
    }

    #[test]
    fn test_variable_with_annotation_and_initializer_assigns_in_main() {
        let program = compile_source("const x: string = \"a\";");
        let x = routine(&program, "x").index as u32;
        let main = &program.main().instructions;
        assert_eq!(main[0], Instruction::Call { routine: x, args: 0 });
        assert!(matches!(main[1], Instruction::StringLiteral { .. }));
        assert_eq!(main[2], Instruction::Assign);
        assert_eq!(routine(&program, "x").instructions[0], Instruction::String);
    }

    #[test]
    fn test_return_outside_function() {
        let program = compile_source("return;");
        assert_eq!(
            program.main().instructions[0],
            Instruction::Error { code: ErrorCode::ReturnOutsideFunction }
        );
    }

    #[test]
    fn test_calling_a_type_is_not_callable() {
        let program = compile_source("type A = string; A();");
        let main = &program.main().instructions;
        assert_eq!(main[0], Instruction::Error { code: ErrorCode::NotCallable });
        assert_eq!(main[1], Instruction::Never);
        assert_eq!(main[2], Instruction::Pop);
    }

    #[test]
    fn test_function_body_is_inferred_and_checked_from_main() {
        let program = compile_source("function f(a: number) { return a; }");
        let f = routine(&program, "f");
        let Instruction::InferBody { routine: body } = f.instructions[0] else {
            panic!("expected InferBody, got {:?}", f.instructions);
        };
        assert_eq!(
            program.subroutines[body as usize].instructions,
            vec![
                Instruction::TypeArgument,
                Instruction::Number,
                Instruction::ReturnStatement,
                Instruction::Loads { frame: 0, symbol: 0 },
                Instruction::UnwrapInferBody,
                Instruction::Return,
            ]
        );
        let main = &program.main().instructions;
        assert_eq!(main[0], Instruction::Call { routine: f.index as u32, args: 0 });
        assert_eq!(main[1], Instruction::Pop);
    }

    #[test]
    fn test_redeclaration_compiles_last() {
        let program = compile_source("type A = string; type A = number;");
        assert_eq!(program.subroutines.len(), 2);
        assert_eq!(routine(&program, "A").instructions[0], Instruction::Number);
        assert_eq!(program.symbol(SymbolRef { subroutine: 0, index: 0 }).declarations, 2);
    }

    #[test]
    fn test_call_expression_instantiates() {
        let program = compile_source("function id<T>(a: T): T; id<string>(\"a\");");
        let id = routine(&program, "id").index as u32;
        let main = &program.main().instructions;
        assert_eq!(main[0], Instruction::Call { routine: id, args: 0 });
        assert_eq!(main[1], Instruction::String);
        assert_eq!(main[2], Instruction::Instantiate { count: 1 });
        assert!(matches!(main[3], Instruction::StringLiteral { .. }));
        assert_eq!(main[4], Instruction::CallExpression { args: 1 });
        assert_eq!(main[5], Instruction::Pop);
    }
}
