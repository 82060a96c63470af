//! Human-readable rendering of type nodes

use super::{TypeArena, TypeFlags, TypeId, TypeKind};

/// Siblings rendered before the remainder collapses into `...`.
pub const STRINGIFY_SIBLING_CAP: usize = 20;

pub fn stringify(arena: &TypeArena, id: TypeId) -> String {
    let mut out = String::new();
    write_type(arena, id, &mut out);
    out
}

fn write_list(arena: &TypeArena, children: &[TypeId], separator: &str, out: &mut String) {
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            out.push_str(separator);
        }
        if i == STRINGIFY_SIBLING_CAP {
            out.push_str("...");
            return;
        }
        write_type(arena, *child, out);
    }
}

fn write_type(arena: &TypeArena, id: TypeId, out: &mut String) {
    stacker::maybe_grow(crate::STACK_RED_ZONE, crate::STACK_GROW_SIZE, || write_type_inner(arena, id, out))
}

fn write_type_inner(arena: &TypeArena, id: TypeId, out: &mut String) {
    let ty = arena.get(id);
    if let Some(keyword) = ty.kind.keyword() {
        out.push_str(keyword);
        return;
    }
    let children = ty.children();
    match ty.kind {
        TypeKind::Literal => {
            if ty.flags.contains(TypeFlags::STRING_LITERAL) {
                out.push('"');
                out.push_str(&ty.text);
                out.push('"');
            } else if ty.flags.contains(TypeFlags::BIGINT_LITERAL) {
                out.push_str(&ty.text);
                out.push('n');
            } else if ty.flags.contains(TypeFlags::TRUE) {
                out.push_str("true");
            } else if ty.flags.contains(TypeFlags::FALSE) {
                out.push_str("false");
            } else {
                out.push_str(&ty.text);
            }
        }
        TypeKind::Union => write_list(arena, &children, " | ", out),
        TypeKind::Tuple => {
            if ty.flags.contains(TypeFlags::READONLY) {
                out.push_str("readonly ");
            }
            out.push('[');
            write_list(arena, &children, ", ", out);
            out.push(']');
        }
        TypeKind::TupleMember => {
            if let Some(child) = ty.child() {
                write_type(arena, child, out);
            }
            if ty.is_optional() {
                out.push('?');
            }
        }
        TypeKind::Array => {
            if ty.flags.contains(TypeFlags::READONLY) {
                out.push_str("readonly ");
            }
            out.push_str("Array<");
            if let Some(child) = ty.child() {
                write_type(arena, child, out);
            }
            out.push('>');
        }
        TypeKind::Rest => {
            out.push_str("...");
            if let Some(child) = ty.child() {
                write_type(arena, child, out);
            }
        }
        TypeKind::TemplateLiteral => {
            out.push('`');
            for child in &children {
                let part = arena.get(*child);
                if part.is_string_literal() {
                    out.push_str(&part.text);
                } else {
                    out.push_str("${");
                    write_type(arena, *child, out);
                    out.push('}');
                }
            }
            out.push('`');
        }
        TypeKind::Parameter | TypeKind::PropertySignature => {
            if ty.flags.contains(TypeFlags::READONLY) {
                out.push_str("readonly ");
            }
            out.push_str(&ty.text);
            if ty.is_optional() {
                out.push('?');
            }
            out.push_str(": ");
            if let Some(child) = ty.child() {
                write_type(arena, child, out);
            }
        }
        TypeKind::Function | TypeKind::Method => {
            // children: return type, then parameters
            let (ret, params) = match children.split_first() {
                Some((ret, params)) => (Some(*ret), params),
                None => (None, &children[..]),
            };
            if ty.kind == TypeKind::Method {
                out.push_str(&ty.text);
            }
            out.push('(');
            write_list(arena, params, ", ", out);
            out.push_str(if ty.kind == TypeKind::Method { "): " } else { ") => " });
            match ret {
                Some(ret) => write_type(arena, ret, out),
                None => out.push_str("unknown"),
            }
        }
        TypeKind::ObjectLiteral | TypeKind::Class => {
            out.push('{');
            write_list(arena, &children, ", ", out);
            out.push('}');
        }
        TypeKind::FunctionRef | TypeKind::ClassRef => {
            if ty.text.is_empty() {
                out.push_str(if ty.kind == TypeKind::FunctionRef { "Function" } else { "Class" });
            } else {
                out.push_str(&ty.text);
            }
        }
        _ => out.push_str(ty.kind.keyword().unwrap_or("unknown")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::runtime_hash;
    use crate::types::{Payload, Type, keyword_hash};

    fn keyword(arena: &mut TypeArena, kind: TypeKind) -> TypeId {
        arena.alloc(Type::new(kind, keyword_hash(kind)))
    }

    fn string_literal(arena: &mut TypeArena, text: &str) -> TypeId {
        let mut ty = Type::new(TypeKind::Literal, runtime_hash(text.as_bytes()));
        ty.flags.insert(TypeFlags::STRING_LITERAL);
        ty.text = text.to_string();
        arena.alloc(ty)
    }

    fn list(arena: &mut TypeArena, kind: TypeKind, children: Vec<TypeId>) -> TypeId {
        let mut ty = Type::new(kind, 0);
        ty.payload = Payload::List(children);
        arena.alloc(ty)
    }

    #[test]
    fn test_stringify_union_of_literals() {
        let mut arena = TypeArena::new();
        let a = string_literal(&mut arena, "a");
        let n = keyword(&mut arena, TypeKind::Number);
        let union = list(&mut arena, TypeKind::Union, vec![a, n]);
        assert_eq!(stringify(&arena, union), "\"a\" | number");
    }

    #[test]
    fn test_stringify_function() {
        let mut arena = TypeArena::new();
        let ret = keyword(&mut arena, TypeKind::Void);
        let param_ty = keyword(&mut arena, TypeKind::String);
        let mut param = Type::new(TypeKind::Parameter, 0);
        param.text = "a".to_string();
        param.payload = Payload::Child(param_ty);
        let param = arena.alloc(param);
        let func = list(&mut arena, TypeKind::Function, vec![ret, param]);
        assert_eq!(stringify(&arena, func), "(a: string) => void");
    }

    #[test]
    fn test_stringify_template_literal() {
        let mut arena = TypeArena::new();
        let a = string_literal(&mut arena, "id-");
        let n = keyword(&mut arena, TypeKind::Number);
        let template = list(&mut arena, TypeKind::TemplateLiteral, vec![a, n]);
        assert_eq!(stringify(&arena, template), "`id-${number}`");
    }

    #[test]
    fn test_stringify_caps_siblings() {
        let mut arena = TypeArena::new();
        let members: Vec<_> = (0..25).map(|_| keyword(&mut arena, TypeKind::String)).collect();
        let tuple = list(&mut arena, TypeKind::Tuple, members);
        let rendered = stringify(&arena, tuple);
        assert_eq!(rendered.matches("string").count(), STRINGIFY_SIBLING_CAP);
        assert!(rendered.ends_with("...]"));
    }
}
