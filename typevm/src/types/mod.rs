//! Runtime type graph
//!
//! Types built by the VM live in a [`TypeArena`] and are addressed through
//! generation-checked [`TypeId`] handles. Every node carries a structural
//! hash, a reference count and a flag set; its payload shape is fixed by its
//! [`TypeKind`].

mod arena;
pub mod relation;
mod stringify;

pub use arena::{TypeArena, TypeId, table};
pub use relation::is_assignable;
pub use stringify::{STRINGIFY_SIBLING_CAP, stringify};

use std::hash::Hasher;

use rustc_hash::FxHasher;
use serde::Serialize;

use crate::bytecode::runtime_hash;

/// Node kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TypeKind {
    Unknown,
    Never,
    Any,
    Null,
    Undefined,
    Void,
    String,
    Number,
    BigInt,
    Boolean,
    Symbol,
    Literal,
    Union,
    Tuple,
    TupleMember,
    Array,
    Rest,
    TemplateLiteral,
    Function,
    FunctionRef,
    Method,
    Class,
    ClassRef,
    ObjectLiteral,
    PropertySignature,
    Parameter,
}

impl TypeKind {
    /// Name of a keyword kind, as written in source.
    pub fn keyword(self) -> Option<&'static str> {
        Some(match self {
            TypeKind::Unknown => "unknown",
            TypeKind::Never => "never",
            TypeKind::Any => "any",
            TypeKind::Null => "null",
            TypeKind::Undefined => "undefined",
            TypeKind::Void => "void",
            TypeKind::String => "string",
            TypeKind::Number => "number",
            TypeKind::BigInt => "bigint",
            TypeKind::Boolean => "boolean",
            TypeKind::Symbol => "symbol",
            _ => return None,
        })
    }
}

/// Flag bit set of a type node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize)]
pub struct TypeFlags(u16);

impl TypeFlags {
    pub const NONE: TypeFlags = TypeFlags(0);
    pub const READONLY: TypeFlags = TypeFlags(1 << 0);
    pub const OPTIONAL: TypeFlags = TypeFlags(1 << 1);
    pub const STRING_LITERAL: TypeFlags = TypeFlags(1 << 2);
    pub const NUMBER_LITERAL: TypeFlags = TypeFlags(1 << 3);
    pub const BOOLEAN_LITERAL: TypeFlags = TypeFlags(1 << 4);
    pub const BIGINT_LITERAL: TypeFlags = TypeFlags(1 << 5);
    pub const TRUE: TypeFlags = TypeFlags(1 << 6);
    pub const FALSE: TypeFlags = TypeFlags(1 << 7);
    /// Held by a cache or a subroutine result; never mutated in place.
    pub const STORED: TypeFlags = TypeFlags(1 << 8);
    /// The members of `...T` may be stolen instead of copied.
    pub const REST_REUSE: TypeFlags = TypeFlags(1 << 9);
    pub const DELETED: TypeFlags = TypeFlags(1 << 10);
    pub const STATIC: TypeFlags = TypeFlags(1 << 11);

    pub fn contains(self, other: TypeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: TypeFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: TypeFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: TypeFlags) {
        self.0 &= !other.0;
    }

    pub fn bits(self) -> u16 {
        self.0
    }
}

impl std::ops::BitOr for TypeFlags {
    type Output = TypeFlags;

    fn bitor(self, rhs: TypeFlags) -> TypeFlags {
        TypeFlags(self.0 | rhs.0)
    }
}

/// Kind-dependent payload
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Payload {
    #[default]
    None,
    Child(TypeId),
    List(Vec<TypeId>),
    /// Subroutine index (`FunctionRef`, `ClassRef`)
    Address(u32),
    /// A generic function's wrapper subroutine plus the slots of every frame
    /// it was declared in, innermost first.
    Closure { routine: u32, scopes: Vec<Vec<TypeId>> },
    /// Fixed bucket count; `bucket[0]` is the head, later collisions follow.
    Table(Vec<Vec<TypeId>>),
}

/// A node of the type graph
#[derive(Debug, Clone)]
pub struct Type {
    pub kind: TypeKind,
    pub hash: u64,
    pub ref_count: u32,
    pub flags: TypeFlags,
    /// Literal text, or the name of a parameter/property/member.
    pub text: String,
    pub payload: Payload,
}

impl Type {
    pub fn new(kind: TypeKind, hash: u64) -> Self {
        Self {
            kind,
            hash,
            ref_count: 0,
            flags: TypeFlags::NONE,
            text: String::new(),
            payload: Payload::None,
        }
    }

    /// Keyword node hashed by its name.
    pub fn keyword(kind: TypeKind) -> Self {
        Self::new(kind, keyword_hash(kind))
    }

    /// Literal node. String literals hash like their storage entry; other
    /// categories mix in the flag so `"1"` and `1` stay distinct.
    pub fn literal(flag: TypeFlags, text: impl Into<String>) -> Self {
        let text = text.into();
        let text_hash = runtime_hash(text.as_bytes());
        let hash = if flag.contains(TypeFlags::STRING_LITERAL) {
            text_hash
        } else {
            combine_hash(TypeKind::Literal, &[u64::from(flag.bits()), text_hash])
        };
        let mut ty = Self::new(TypeKind::Literal, hash);
        ty.flags = flag;
        ty.text = text;
        ty
    }

    pub fn string_literal(text: impl Into<String>) -> Self {
        Self::literal(TypeFlags::STRING_LITERAL, text)
    }

    pub fn boolean_literal(value: bool) -> Self {
        if value {
            Self::literal(TypeFlags::BOOLEAN_LITERAL | TypeFlags::TRUE, "true")
        } else {
            Self::literal(TypeFlags::BOOLEAN_LITERAL | TypeFlags::FALSE, "false")
        }
    }

    pub fn is_literal(&self) -> bool {
        self.kind == TypeKind::Literal
    }

    pub fn is_string_literal(&self) -> bool {
        self.is_literal() && self.flags.contains(TypeFlags::STRING_LITERAL)
    }

    pub fn is_optional(&self) -> bool {
        self.flags.contains(TypeFlags::OPTIONAL)
    }

    /// Child references held by this node, in order.
    pub fn children(&self) -> Vec<TypeId> {
        match &self.payload {
            Payload::Child(child) => vec![*child],
            Payload::List(children) => children.clone(),
            Payload::Table(buckets) => buckets.iter().flatten().copied().collect(),
            Payload::Closure { scopes, .. } => scopes.iter().flatten().copied().collect(),
            Payload::None | Payload::Address(_) => Vec::new(),
        }
    }

    /// The single child of `Child` payloads.
    pub fn child(&self) -> Option<TypeId> {
        match &self.payload {
            Payload::Child(child) => Some(*child),
            _ => None,
        }
    }
}

/// Hash of a keyword kind.
pub fn keyword_hash(kind: TypeKind) -> u64 {
    kind.keyword().map_or(kind as u64, |name| runtime_hash(name.as_bytes()))
}

/// Structural hash of a composite node from its kind and member hashes.
pub fn combine_hash(kind: TypeKind, parts: &[u64]) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write_u8(kind as u8);
    for part in parts {
        hasher.write_u64(*part);
    }
    hasher.finish()
}
