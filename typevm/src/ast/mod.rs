//! Abstract Syntax Tree definitions
//!
//! The tree covers the subset of the structural type language the compiler
//! lowers: type aliases, function and class declarations, variable
//! declarations and simple call expressions.

mod span;

pub use span::*;

use std::fmt;

use serde::{Deserialize, Serialize};

/// A parsed source file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub statements: Vec<Spanned<Statement>>,
}

/// Statement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Statement {
    TypeAlias(TypeAlias),
    Function(FunctionDecl),
    Variable(VariableDecl),
    Class(ClassDecl),
    Return(Option<Spanned<Expr>>),
    Expression(Spanned<Expr>),
}

/// `type Name<T> = ...`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeAlias {
    pub name: Spanned<String>,
    pub type_params: Vec<TypeParam>,
    pub ty: Spanned<TypeNode>,
}

/// Generic parameter with optional constraint and default
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeParam {
    pub name: Spanned<String>,
    pub constraint: Option<Spanned<TypeNode>>,
    pub default: Option<Spanned<TypeNode>>,
}

/// Function parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: Spanned<String>,
    pub ty: Option<Spanned<TypeNode>>,
    pub optional: bool,
    pub rest: bool,
}

/// Signature shared by function declarations, methods and function types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSignature {
    pub type_params: Vec<TypeParam>,
    pub params: Vec<Param>,
    pub return_type: Option<Spanned<TypeNode>>,
    /// Only declarations and methods carry a body.
    pub body: Option<Vec<Spanned<Statement>>>,
}

/// `function name(...) {}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: Spanned<String>,
    pub signature: FunctionSignature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableKind {
    Const,
    Let,
    Var,
}

/// `const name: T = init`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableDecl {
    pub kind: VariableKind,
    pub name: Spanned<String>,
    pub ty: Option<Spanned<TypeNode>>,
    pub init: Option<Spanned<Expr>>,
}

/// `class Name<T> { ... }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassDecl {
    pub name: Spanned<String>,
    pub type_params: Vec<TypeParam>,
    pub members: Vec<Spanned<Member>>,
}

/// Member of a class body or an object type literal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Member {
    Property {
        name: Spanned<String>,
        ty: Option<Spanned<TypeNode>>,
        optional: bool,
        readonly: bool,
    },
    Method {
        name: Spanned<String>,
        signature: FunctionSignature,
    },
}

/// Keyword types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Keyword {
    Any,
    Unknown,
    Never,
    Null,
    Undefined,
    Void,
    String,
    Number,
    BigInt,
    Boolean,
    Symbol,
}

impl Keyword {
    pub fn from_name(name: &str) -> Option<Keyword> {
        Some(match name {
            "any" => Keyword::Any,
            "unknown" => Keyword::Unknown,
            "never" => Keyword::Never,
            "null" => Keyword::Null,
            "undefined" => Keyword::Undefined,
            "void" => Keyword::Void,
            "string" => Keyword::String,
            "number" => Keyword::Number,
            "bigint" => Keyword::BigInt,
            "boolean" => Keyword::Boolean,
            "symbol" => Keyword::Symbol,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Keyword::Any => "any",
            Keyword::Unknown => "unknown",
            Keyword::Never => "never",
            Keyword::Null => "null",
            Keyword::Undefined => "undefined",
            Keyword::Void => "void",
            Keyword::String => "string",
            Keyword::Number => "number",
            Keyword::BigInt => "bigint",
            Keyword::Boolean => "boolean",
            Keyword::Symbol => "symbol",
        }
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Type expression
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TypeNode {
    Keyword(Keyword),
    StringLiteral(String),
    NumberLiteral(String),
    BigIntLiteral(String),
    BooleanLiteral(bool),
    /// Named reference, possibly with type arguments: `Foo<string>`
    Reference {
        name: Spanned<String>,
        type_args: Vec<Spanned<TypeNode>>,
    },
    Union(Vec<Spanned<TypeNode>>),
    Tuple(Vec<TupleElement>),
    /// `T[]`
    Array(Box<Spanned<TypeNode>>),
    /// `readonly T`
    Readonly(Box<Spanned<TypeNode>>),
    TemplateLiteral(Vec<TemplateSpan>),
    /// `check extends extends_type ? true_type : false_type`
    Conditional {
        check: Box<Spanned<TypeNode>>,
        extends_type: Box<Spanned<TypeNode>>,
        true_type: Box<Spanned<TypeNode>>,
        false_type: Box<Spanned<TypeNode>>,
    },
    Object(Vec<Spanned<Member>>),
    Function(Box<FunctionSignature>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TupleElement {
    pub ty: Spanned<TypeNode>,
    pub optional: bool,
    pub rest: bool,
}

/// Piece of a template literal type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TemplateSpan {
    Text(Spanned<String>),
    Type(Spanned<TypeNode>),
}

/// Literal expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    String(String),
    Number(String),
    BigInt(String),
    Boolean(bool),
    Null,
    Undefined,
}

/// Expression
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal),
    Identifier(String),
    Call {
        callee: Box<Spanned<Expr>>,
        type_args: Vec<Spanned<TypeNode>>,
        args: Vec<Spanned<Expr>>,
    },
}

impl fmt::Display for TypeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeNode::Keyword(keyword) => write!(f, "{keyword}"),
            TypeNode::StringLiteral(text) => write!(f, "\"{text}\""),
            TypeNode::NumberLiteral(text) => f.write_str(text),
            TypeNode::BigIntLiteral(text) => write!(f, "{text}n"),
            TypeNode::BooleanLiteral(value) => write!(f, "{value}"),
            TypeNode::Reference { name, type_args } => {
                f.write_str(&name.node)?;
                if !type_args.is_empty() {
                    f.write_str("<")?;
                    write_joined(f, type_args.iter().map(|arg| &arg.node), ", ")?;
                    f.write_str(">")?;
                }
                Ok(())
            }
            TypeNode::Union(members) => write_joined(f, members.iter().map(|m| Grouped(&m.node)), " | "),
            TypeNode::Tuple(elements) => {
                f.write_str("[")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    if element.rest {
                        f.write_str("...")?;
                    }
                    write!(f, "{}", element.ty.node)?;
                    if element.optional {
                        f.write_str("?")?;
                    }
                }
                f.write_str("]")
            }
            TypeNode::Array(element) => write!(f, "{}[]", Grouped(&element.node)),
            TypeNode::Readonly(inner) => write!(f, "readonly {}", inner.node),
            TypeNode::TemplateLiteral(spans) => {
                f.write_str("`")?;
                for span in spans {
                    match span {
                        TemplateSpan::Text(text) => f.write_str(&text.node)?,
                        TemplateSpan::Type(ty) => write!(f, "${{{}}}", ty.node)?,
                    }
                }
                f.write_str("`")
            }
            TypeNode::Conditional { check, extends_type, true_type, false_type } => write!(
                f,
                "{} extends {} ? {} : {}",
                Grouped(&check.node),
                extends_type.node,
                true_type.node,
                false_type.node
            ),
            TypeNode::Object(members) if members.is_empty() => f.write_str("{}"),
            TypeNode::Object(members) => {
                f.write_str("{ ")?;
                write_joined(f, members.iter().map(|member| &member.node), "; ")?;
                f.write_str(" }")
            }
            TypeNode::Function(signature) => write!(f, "{}", signature.display(None)),
        }
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Member::Property { name, ty, optional, readonly } => {
                if *readonly {
                    f.write_str("readonly ")?;
                }
                f.write_str(&name.node)?;
                if *optional {
                    f.write_str("?")?;
                }
                match ty {
                    Some(ty) => write!(f, ": {}", ty.node),
                    None => Ok(()),
                }
            }
            Member::Method { name, signature } => write!(f, "{}", signature.display(Some(&name.node))),
        }
    }
}

impl FunctionSignature {
    /// Render as a method `name<T>(a: T): R` when named, otherwise as a
    /// function type `<T>(a: T) => R`. Bodies are left out.
    pub fn display<'a>(&'a self, name: Option<&'a str>) -> SignatureDisplay<'a> {
        SignatureDisplay { signature: self, name }
    }
}

pub struct SignatureDisplay<'a> {
    signature: &'a FunctionSignature,
    name: Option<&'a str>,
}

impl fmt::Display for SignatureDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let signature = self.signature;
        if let Some(name) = self.name {
            f.write_str(name)?;
        }
        if !signature.type_params.is_empty() {
            f.write_str("<")?;
            for (i, param) in signature.type_params.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                f.write_str(&param.name.node)?;
                if let Some(constraint) = &param.constraint {
                    write!(f, " extends {}", constraint.node)?;
                }
                if let Some(default) = &param.default {
                    write!(f, " = {}", default.node)?;
                }
            }
            f.write_str(">")?;
        }
        f.write_str("(")?;
        for (i, param) in signature.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            if param.rest {
                f.write_str("...")?;
            }
            f.write_str(&param.name.node)?;
            if param.optional {
                f.write_str("?")?;
            }
            if let Some(ty) = &param.ty {
                write!(f, ": {}", ty.node)?;
            }
        }
        f.write_str(")")?;
        match (&signature.return_type, self.name) {
            (Some(ret), Some(_)) => write!(f, ": {}", ret.node),
            (Some(ret), None) => write!(f, " => {}", ret.node),
            (None, Some(_)) => Ok(()),
            (None, None) => f.write_str(" => unknown"),
        }
    }
}

/// Parenthesizes types that bind looser than `|` and `[]`.
struct Grouped<'a>(&'a TypeNode);

impl fmt::Display for Grouped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            TypeNode::Union(_) | TypeNode::Function(_) | TypeNode::Conditional { .. } => write!(f, "({})", self.0),
            other => write!(f, "{other}"),
        }
    }
}

fn write_joined<T: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    items: impl Iterator<Item = T>,
    separator: &str,
) -> fmt::Result {
    for (i, item) in items.enumerate() {
        if i > 0 {
            f.write_str(separator)?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl Statement {
    /// Declared name, for statements that introduce one.
    pub fn declared_name(&self) -> Option<&Spanned<String>> {
        match self {
            Statement::TypeAlias(alias) => Some(&alias.name),
            Statement::Function(func) => Some(&func.name),
            Statement::Variable(var) => Some(&var.name),
            Statement::Class(class) => Some(&class.name),
            Statement::Return(_) | Statement::Expression(_) => None,
        }
    }
}
