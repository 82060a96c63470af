//! Recursive descent parser
//!
//! Consumes the token stream produced by [`crate::lexer::tokenize`] and
//! builds a [`SourceFile`]. Template literal types arrive as one token; their
//! `${...}` holes are lexed and parsed on the spot with shifted spans.

use crate::ast::*;
use crate::error::{CompileError, Result};
use crate::lexer::{Token, tokenize_at};

#[cfg(test)]
mod tests;

/// Parse tokens into AST
pub fn parse(_filename: &str, source: &str, tokens: Vec<(Token, Span)>) -> Result<SourceFile> {
    let mut parser = Parser::new(tokens, Span::new(source.len(), source.len()));
    let mut statements = Vec::new();
    while parser.peek().is_some() {
        statements.push(parser.statement()?);
    }
    Ok(SourceFile { statements })
}

/// Parse a single type expression. Used by tests and tooling.
pub fn parse_type(source: &str) -> Result<Spanned<TypeNode>> {
    let tokens = tokenize_at(source, 0)?;
    let mut parser = Parser::new(tokens, Span::new(source.len(), source.len()));
    let ty = parser.type_node()?;
    parser.expect_end()?;
    Ok(ty)
}

struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
    eof: Span,
}

impl Parser {
    fn new(tokens: Vec<(Token, Span)>, eof: Span) -> Self {
        Self { tokens, pos: 0, eof }
    }

    // ====================================================================
    // Token cursor
    // ====================================================================

    fn peek(&self) -> Option<&Token> {
        self.peek_nth(0)
    }

    fn peek_nth(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|(t, _)| t)
    }

    fn span(&self) -> Span {
        self.tokens.get(self.pos).map(|(_, s)| *s).unwrap_or(self.eof)
    }

    fn prev_span(&self) -> Span {
        match self.pos.checked_sub(1).and_then(|i| self.tokens.get(i)) {
            Some((_, span)) => *span,
            None => Span::new(0, 0),
        }
    }

    fn advance(&mut self) -> Option<(Token, Span)> {
        let item = self.tokens.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    fn at(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.at(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, expected: &str) -> CompileError {
        let message = match self.peek() {
            Some(found) => format!("expected {expected}, found `{found}`"),
            None => format!("expected {expected}, found end of input"),
        };
        CompileError::parser(message, self.span())
    }

    fn expect(&mut self, token: Token) -> Result<Span> {
        if self.at(&token) {
            let span = self.span();
            self.pos += 1;
            Ok(span)
        } else {
            Err(self.error(&format!("`{token}`")))
        }
    }

    fn expect_end(&self) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            Some(_) => Err(self.error("end of input")),
        }
    }

    fn ident(&mut self, what: &str) -> Result<Spanned<String>> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = Spanned::new(name.clone(), self.span());
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error(what)),
        }
    }

    /// Property and method names also accept keywords and string literals.
    fn member_name(&mut self) -> Result<Spanned<String>> {
        let span = self.span();
        let name = match self.peek() {
            Some(Token::Ident(name)) | Some(Token::StringLit(name)) => name.clone(),
            Some(Token::NumberLit(n)) => n.clone(),
            Some(
                tok @ (Token::Type
                | Token::Function
                | Token::Const
                | Token::Let
                | Token::Var
                | Token::Class
                | Token::Return
                | Token::Extends
                | Token::Readonly
                | Token::True
                | Token::False),
            ) => tok.to_string(),
            _ => return Err(self.error("property name")),
        };
        self.pos += 1;
        Ok(Spanned::new(name, span))
    }

    // ====================================================================
    // Statements
    // ====================================================================

    fn statement(&mut self) -> Result<Spanned<Statement>> {
        let start = self.span();
        let statement = match self.peek() {
            Some(Token::Type) if matches!(self.peek_nth(1), Some(Token::Ident(_))) => {
                self.pos += 1;
                let name = self.ident("type alias name")?;
                let type_params = self.type_params()?;
                self.expect(Token::Eq)?;
                let ty = self.type_node()?;
                Statement::TypeAlias(TypeAlias { name, type_params, ty })
            }
            Some(Token::Function) => {
                self.pos += 1;
                let name = self.ident("function name")?;
                let signature = self.signature(true)?;
                Statement::Function(FunctionDecl { name, signature })
            }
            Some(Token::Const) | Some(Token::Let) | Some(Token::Var) => {
                let kind = match self.advance() {
                    Some((Token::Const, _)) => VariableKind::Const,
                    Some((Token::Let, _)) => VariableKind::Let,
                    _ => VariableKind::Var,
                };
                let name = self.ident("variable name")?;
                let ty = if self.eat(&Token::Colon) { Some(self.type_node()?) } else { None };
                let init = if self.eat(&Token::Eq) { Some(self.expr()?) } else { None };
                Statement::Variable(VariableDecl { kind, name, ty, init })
            }
            Some(Token::Class) => {
                self.pos += 1;
                let name = self.ident("class name")?;
                let type_params = self.type_params()?;
                self.expect(Token::LBrace)?;
                let members = self.members(true)?;
                self.expect(Token::RBrace)?;
                Statement::Class(ClassDecl { name, type_params, members })
            }
            Some(Token::Return) => {
                self.pos += 1;
                let value = match self.peek() {
                    None | Some(Token::Semi) | Some(Token::RBrace) => None,
                    Some(_) => Some(self.expr()?),
                };
                Statement::Return(value)
            }
            Some(_) => Statement::Expression(self.expr()?),
            None => return Err(self.error("statement")),
        };
        self.eat(&Token::Semi);
        Ok(Spanned::new(statement, start.merge(self.prev_span())))
    }

    fn block(&mut self) -> Result<Vec<Spanned<Statement>>> {
        self.expect(Token::LBrace)?;
        let mut statements = Vec::new();
        while !self.at(&Token::RBrace) {
            if self.peek().is_none() {
                return Err(self.error("`}`"));
            }
            statements.push(self.statement()?);
        }
        self.expect(Token::RBrace)?;
        Ok(statements)
    }

    fn type_params(&mut self) -> Result<Vec<TypeParam>> {
        let mut params = Vec::new();
        if !self.eat(&Token::Lt) {
            return Ok(params);
        }
        while !self.at(&Token::Gt) {
            let name = self.ident("type parameter")?;
            let constraint = if self.eat(&Token::Extends) { Some(self.type_node()?) } else { None };
            let default = if self.eat(&Token::Eq) { Some(self.type_node()?) } else { None };
            params.push(TypeParam { name, constraint, default });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(Token::Gt)?;
        Ok(params)
    }

    fn params(&mut self) -> Result<Vec<Param>> {
        self.expect(Token::LParen)?;
        let mut params = Vec::new();
        while !self.at(&Token::RParen) {
            let rest = self.eat(&Token::Ellipsis);
            let name = self.ident("parameter name")?;
            let optional = self.eat(&Token::Question);
            let ty = if self.eat(&Token::Colon) { Some(self.type_node()?) } else { None };
            params.push(Param { name, ty, optional, rest });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(Token::RParen)?;
        Ok(params)
    }

    /// `<T>(a: T): R { ... }` as used by declarations and methods.
    fn signature(&mut self, allow_body: bool) -> Result<FunctionSignature> {
        let type_params = self.type_params()?;
        let params = self.params()?;
        let return_type = if self.eat(&Token::Colon) { Some(self.type_node()?) } else { None };
        let body = if allow_body && self.at(&Token::LBrace) { Some(self.block()?) } else { None };
        Ok(FunctionSignature { type_params, params, return_type, body })
    }

    fn members(&mut self, allow_body: bool) -> Result<Vec<Spanned<Member>>> {
        let mut members = Vec::new();
        while !self.at(&Token::RBrace) && self.peek().is_some() {
            let start = self.span();
            let readonly = self.at(&Token::Readonly)
                && !matches!(
                    self.peek_nth(1),
                    Some(Token::LParen | Token::Lt | Token::Colon | Token::Question)
                );
            if readonly {
                self.pos += 1;
            }
            let name = self.member_name()?;
            let optional = self.eat(&Token::Question);
            let member = if self.at(&Token::LParen) || self.at(&Token::Lt) {
                let signature = self.signature(allow_body)?;
                Member::Method { name, signature }
            } else {
                let ty = if self.eat(&Token::Colon) { Some(self.type_node()?) } else { None };
                if self.eat(&Token::Eq) {
                    self.expr()?;
                }
                Member::Property { name, ty, optional, readonly }
            };
            members.push(Spanned::new(member, start.merge(self.prev_span())));
            if !self.eat(&Token::Semi) {
                self.eat(&Token::Comma);
            }
        }
        Ok(members)
    }

    // ====================================================================
    // Types
    // ====================================================================

    fn type_node(&mut self) -> Result<Spanned<TypeNode>> {
        stacker::maybe_grow(crate::STACK_RED_ZONE, crate::STACK_GROW_SIZE, || self.conditional_type())
    }

    fn conditional_type(&mut self) -> Result<Spanned<TypeNode>> {
        let check = self.union_type()?;
        if !self.eat(&Token::Extends) {
            return Ok(check);
        }
        let extends_type = self.union_type()?;
        self.expect(Token::Question)?;
        let true_type = self.type_node()?;
        self.expect(Token::Colon)?;
        let false_type = self.type_node()?;
        let span = check.span.merge(false_type.span);
        Ok(Spanned::new(
            TypeNode::Conditional {
                check: Box::new(check),
                extends_type: Box::new(extends_type),
                true_type: Box::new(true_type),
                false_type: Box::new(false_type),
            },
            span,
        ))
    }

    fn union_type(&mut self) -> Result<Spanned<TypeNode>> {
        self.eat(&Token::Pipe);
        let first = self.postfix_type()?;
        if !self.at(&Token::Pipe) {
            return Ok(first);
        }
        let mut span = first.span;
        let mut members = vec![first];
        while self.eat(&Token::Pipe) {
            let member = self.postfix_type()?;
            span = span.merge(member.span);
            members.push(member);
        }
        Ok(Spanned::new(TypeNode::Union(members), span))
    }

    fn postfix_type(&mut self) -> Result<Spanned<TypeNode>> {
        let mut ty = self.primary_type()?;
        while self.at(&Token::LBracket) && self.peek_nth(1) == Some(&Token::RBracket) {
            self.pos += 2;
            let span = ty.span.merge(self.prev_span());
            ty = Spanned::new(TypeNode::Array(Box::new(ty)), span);
        }
        Ok(ty)
    }

    fn primary_type(&mut self) -> Result<Spanned<TypeNode>> {
        let start = self.span();
        let node = match self.peek().cloned() {
            Some(Token::Readonly) => {
                self.pos += 1;
                let inner = self.postfix_type()?;
                TypeNode::Readonly(Box::new(inner))
            }
            Some(Token::LParen) if self.is_function_type() => self.function_type()?,
            Some(Token::Lt) => self.function_type()?,
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.type_node()?;
                self.expect(Token::RParen)?;
                return Ok(inner);
            }
            Some(Token::LBracket) => {
                self.pos += 1;
                let elements = self.tuple_elements()?;
                self.expect(Token::RBracket)?;
                TypeNode::Tuple(elements)
            }
            Some(Token::LBrace) => {
                self.pos += 1;
                let members = self.members(false)?;
                self.expect(Token::RBrace)?;
                TypeNode::Object(members)
            }
            Some(Token::StringLit(s)) => {
                self.pos += 1;
                TypeNode::StringLiteral(s)
            }
            Some(Token::NumberLit(n)) => {
                self.pos += 1;
                TypeNode::NumberLiteral(n)
            }
            Some(Token::BigIntLit(n)) => {
                self.pos += 1;
                TypeNode::BigIntLiteral(n)
            }
            Some(Token::True) => {
                self.pos += 1;
                TypeNode::BooleanLiteral(true)
            }
            Some(Token::False) => {
                self.pos += 1;
                TypeNode::BooleanLiteral(false)
            }
            Some(Token::Template(raw)) => {
                self.pos += 1;
                TypeNode::TemplateLiteral(self.template_spans(&raw, start.start + 1)?)
            }
            Some(Token::Ident(name)) => {
                let name = Spanned::new(name, start);
                self.pos += 1;
                if self.at(&Token::Lt) {
                    let type_args = self.type_args()?;
                    TypeNode::Reference { name, type_args }
                } else if let Some(keyword) = Keyword::from_name(&name.node) {
                    TypeNode::Keyword(keyword)
                } else {
                    TypeNode::Reference { name, type_args: Vec::new() }
                }
            }
            _ => return Err(self.error("type")),
        };
        Ok(Spanned::new(node, start.merge(self.prev_span())))
    }

    /// Scan to the `)` matching the current `(` and check for a `=>`.
    fn is_function_type(&self) -> bool {
        let mut depth = 0usize;
        let mut i = self.pos;
        while let Some((token, _)) = self.tokens.get(i) {
            match token {
                Token::LParen => depth += 1,
                Token::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        return matches!(self.tokens.get(i + 1), Some((Token::FatArrow, _)));
                    }
                }
                _ => {}
            }
            i += 1;
        }
        false
    }

    fn function_type(&mut self) -> Result<TypeNode> {
        let type_params = self.type_params()?;
        let params = self.params()?;
        self.expect(Token::FatArrow)?;
        let return_type = Some(self.type_node()?);
        Ok(TypeNode::Function(Box::new(FunctionSignature {
            type_params,
            params,
            return_type,
            body: None,
        })))
    }

    fn type_args(&mut self) -> Result<Vec<Spanned<TypeNode>>> {
        self.expect(Token::Lt)?;
        let mut args = Vec::new();
        while !self.at(&Token::Gt) {
            args.push(self.type_node()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(Token::Gt)?;
        Ok(args)
    }

    fn tuple_elements(&mut self) -> Result<Vec<TupleElement>> {
        let mut elements = Vec::new();
        while !self.at(&Token::RBracket) {
            let rest = self.eat(&Token::Ellipsis);
            let ty = self.type_node()?;
            let optional = self.eat(&Token::Question);
            elements.push(TupleElement { ty, optional, rest });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(elements)
    }

    /// Split the raw template text into text pieces and parsed holes.
    /// `base` is the byte offset of `raw` in the source.
    fn template_spans(&self, raw: &str, base: usize) -> Result<Vec<TemplateSpan>> {
        let mut spans = Vec::new();
        let mut cursor = 0;
        while let Some(found) = raw[cursor..].find("${") {
            let open = cursor + found;
            if open > cursor {
                let text = raw[cursor..open].to_string();
                spans.push(TemplateSpan::Text(Spanned::new(text, Span::new(base + cursor, base + open))));
            }
            let hole_start = open + 2;
            let close = matching_brace(raw, hole_start).ok_or_else(|| {
                CompileError::parser("unterminated template hole", Span::new(base + open, base + raw.len()))
            })?;
            let tokens = tokenize_at(&raw[hole_start..close], base + hole_start)?;
            let mut hole = Parser::new(tokens, Span::new(base + close, base + close));
            let ty = hole.type_node()?;
            hole.expect_end()?;
            spans.push(TemplateSpan::Type(ty));
            cursor = close + 1;
        }
        if cursor < raw.len() {
            let text = raw[cursor..].to_string();
            spans.push(TemplateSpan::Text(Spanned::new(text, Span::new(base + cursor, base + raw.len()))));
        }
        Ok(spans)
    }

    // ====================================================================
    // Expressions
    // ====================================================================

    fn expr(&mut self) -> Result<Spanned<Expr>> {
        let mut expr = self.primary_expr()?;
        loop {
            let type_args = if self.at(&Token::Lt) {
                self.type_args()?
            } else if self.at(&Token::LParen) {
                Vec::new()
            } else {
                break;
            };
            self.expect(Token::LParen)?;
            let mut args = Vec::new();
            while !self.at(&Token::RParen) {
                args.push(self.expr()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            self.expect(Token::RParen)?;
            let span = expr.span.merge(self.prev_span());
            expr = Spanned::new(
                Expr::Call {
                    callee: Box::new(expr),
                    type_args,
                    args,
                },
                span,
            );
        }
        Ok(expr)
    }

    fn primary_expr(&mut self) -> Result<Spanned<Expr>> {
        let span = self.span();
        let expr = match self.peek().cloned() {
            Some(Token::StringLit(s)) => Expr::Literal(Literal::String(s)),
            Some(Token::NumberLit(n)) => Expr::Literal(Literal::Number(n)),
            Some(Token::BigIntLit(n)) => Expr::Literal(Literal::BigInt(n)),
            Some(Token::True) => Expr::Literal(Literal::Boolean(true)),
            Some(Token::False) => Expr::Literal(Literal::Boolean(false)),
            Some(Token::Ident(name)) => match name.as_str() {
                "null" => Expr::Literal(Literal::Null),
                "undefined" => Expr::Literal(Literal::Undefined),
                _ => Expr::Identifier(name),
            },
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                return Ok(inner);
            }
            _ => return Err(self.error("expression")),
        };
        self.pos += 1;
        Ok(Spanned::new(expr, span))
    }
}

/// Index of the `}` closing a hole whose body starts at `start`.
fn matching_brace(raw: &str, start: usize) -> Option<usize> {
    let mut depth = 1usize;
    for (i, c) in raw[start..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + i);
                }
            }
            _ => {}
        }
    }
    None
}
