//! Structural assignability

use super::{Payload, TypeArena, TypeFlags, TypeId, TypeKind};

/// Whether a value of type `source` can be used where `target` is expected.
pub fn is_assignable(arena: &TypeArena, source: TypeId, target: TypeId) -> bool {
    stacker::maybe_grow(crate::STACK_RED_ZONE, crate::STACK_GROW_SIZE, || {
        assignable(arena, source, target)
    })
}

fn assignable(arena: &TypeArena, source: TypeId, target: TypeId) -> bool {
    if source == target {
        return true;
    }
    let s = arena.get(source);
    let t = arena.get(target);
    if matches!(t.kind, TypeKind::Any | TypeKind::Unknown) {
        return true;
    }
    if matches!(s.kind, TypeKind::Any | TypeKind::Never) {
        return true;
    }
    if s.kind == TypeKind::Union {
        return s.children().iter().all(|member| is_assignable(arena, *member, target));
    }
    if t.kind == TypeKind::Union {
        return t.children().iter().any(|member| is_assignable(arena, source, *member));
    }
    // wrappers compare by their inner type
    if matches!(s.kind, TypeKind::TupleMember | TypeKind::Parameter | TypeKind::PropertySignature) {
        if let Some(inner) = s.child() {
            if s.kind != t.kind {
                return is_assignable(arena, inner, target);
            }
        }
    }

    match t.kind {
        TypeKind::Never => false,
        TypeKind::Void => matches!(s.kind, TypeKind::Void | TypeKind::Undefined),
        TypeKind::String => {
            matches!(s.kind, TypeKind::String | TypeKind::TemplateLiteral)
                || literal_of(arena, source, TypeFlags::STRING_LITERAL)
        }
        TypeKind::Number => s.kind == TypeKind::Number || literal_of(arena, source, TypeFlags::NUMBER_LITERAL),
        TypeKind::BigInt => s.kind == TypeKind::BigInt || literal_of(arena, source, TypeFlags::BIGINT_LITERAL),
        TypeKind::Boolean => {
            s.kind == TypeKind::Boolean || literal_of(arena, source, TypeFlags::TRUE) || literal_of(arena, source, TypeFlags::FALSE)
        }
        TypeKind::Null | TypeKind::Undefined | TypeKind::Symbol => s.kind == t.kind,
        TypeKind::Literal => {
            s.kind == TypeKind::Literal
                && literal_category(s.flags) == literal_category(t.flags)
                && s.text == t.text
        }
        TypeKind::TemplateLiteral => match s.kind {
            TypeKind::Literal if s.flags.contains(TypeFlags::STRING_LITERAL) => {
                match_template(arena, &t.children(), &s.text)
            }
            TypeKind::TemplateLiteral => s.hash == t.hash,
            _ => false,
        },
        TypeKind::Array => {
            let Some(element) = t.child() else { return false };
            match s.kind {
                TypeKind::Array => s.child().is_some_and(|inner| is_assignable(arena, inner, element)),
                TypeKind::Tuple => s.children().iter().all(|member| {
                    let member_ty = arena.get(*member);
                    match member_ty.child() {
                        Some(inner) if arena.get(inner).kind == TypeKind::Rest => arena
                            .get(inner)
                            .child()
                            .is_some_and(|spread| is_assignable(arena, spread, target)),
                        Some(inner) => is_assignable(arena, inner, element),
                        None => false,
                    }
                }),
                _ => false,
            }
        }
        TypeKind::Rest => t.child().is_some_and(|inner| match s.kind {
            TypeKind::Rest => s.child().is_some_and(|s_inner| is_assignable(arena, s_inner, inner)),
            _ => is_assignable(arena, source, inner),
        }),
        TypeKind::Tuple => s.kind == TypeKind::Tuple && tuple_assignable(arena, &s.children(), &t.children()),
        TypeKind::TupleMember | TypeKind::Parameter | TypeKind::PropertySignature => {
            match (s.child(), t.child()) {
                (Some(s_inner), Some(t_inner)) => is_assignable(arena, s_inner, t_inner),
                (None, Some(t_inner)) => is_assignable(arena, source, t_inner),
                _ => false,
            }
        }
        TypeKind::ObjectLiteral | TypeKind::Class => {
            matches!(s.kind, TypeKind::ObjectLiteral | TypeKind::Class)
                && t.children().iter().all(|member| {
                    let wanted = arena.get(*member);
                    match arena.find_child(source, wanted.hash) {
                        Some(found) => is_assignable(arena, found, *member),
                        None => wanted.is_optional(),
                    }
                })
        }
        TypeKind::Function | TypeKind::Method => {
            matches!(s.kind, TypeKind::Function | TypeKind::Method)
                && function_assignable(arena, &s.children(), &t.children())
        }
        TypeKind::FunctionRef | TypeKind::ClassRef => s.kind == t.kind && same_reference(arena, &s.payload, &t.payload),
        _ => false,
    }
}

/// Generic functions match when they come from the same declaration and
/// captured structurally equal outer arguments.
fn same_reference(arena: &TypeArena, source: &Payload, target: &Payload) -> bool {
    match (source, target) {
        (Payload::Closure { routine: s, scopes: s_scopes }, Payload::Closure { routine: t, scopes: t_scopes }) => {
            let hashes = |scopes: &Vec<Vec<TypeId>>| -> Vec<u64> {
                scopes.iter().flatten().map(|id| arena.get(*id).hash).collect()
            };
            s == t && hashes(s_scopes) == hashes(t_scopes)
        }
        _ => source == target,
    }
}

fn literal_of(arena: &TypeArena, id: TypeId, flag: TypeFlags) -> bool {
    let ty = arena.get(id);
    ty.is_literal() && ty.flags.contains(flag)
}

fn literal_category(flags: TypeFlags) -> u16 {
    let mask = TypeFlags::STRING_LITERAL
        | TypeFlags::NUMBER_LITERAL
        | TypeFlags::BIGINT_LITERAL
        | TypeFlags::TRUE
        | TypeFlags::FALSE;
    flags.bits() & mask.bits()
}

fn member_inner(arena: &TypeArena, member: TypeId) -> TypeId {
    arena.get(member).child().unwrap_or(member)
}

fn tuple_assignable(arena: &TypeArena, source: &[TypeId], target: &[TypeId]) -> bool {
    let mut i = 0;
    for wanted in target {
        let wanted_inner = member_inner(arena, *wanted);
        if arena.get(wanted_inner).kind == TypeKind::Rest {
            // a trailing rest absorbs whatever remains
            let element = arena.get(wanted_inner).child();
            let remaining = &source[i.min(source.len())..];
            return remaining.iter().all(|member| {
                let inner = member_inner(arena, *member);
                match (element, arena.get(inner).kind) {
                    (_, TypeKind::Rest) => is_assignable(arena, inner, wanted_inner),
                    (Some(element), _) => match arena.get(element).kind {
                        TypeKind::Array => arena
                            .get(element)
                            .child()
                            .is_some_and(|e| is_assignable(arena, inner, e)),
                        _ => is_assignable(arena, inner, element),
                    },
                    (None, _) => false,
                }
            });
        }
        match source.get(i) {
            Some(member) => {
                if !is_assignable(arena, member_inner(arena, *member), wanted_inner) {
                    return false;
                }
            }
            None => {
                if !arena.get(*wanted).is_optional() {
                    return false;
                }
            }
        }
        i += 1;
    }
    i >= source.len()
}

fn function_assignable(arena: &TypeArena, source: &[TypeId], target: &[TypeId]) -> bool {
    let (Some((s_ret, s_params)), Some((t_ret, t_params))) = (source.split_first(), target.split_first()) else {
        return false;
    };
    let t_void = arena.get(*t_ret).kind == TypeKind::Void;
    if !t_void && !is_assignable(arena, *s_ret, *t_ret) {
        return false;
    }
    let is_rest = |param: TypeId| arena.get(member_inner(arena, param)).kind == TypeKind::Rest;
    let required = s_params
        .iter()
        .filter(|p| !arena.get(**p).is_optional() && !is_rest(**p))
        .count();
    let target_has_rest = t_params.iter().any(|p| is_rest(*p));
    if required > t_params.len() && !target_has_rest {
        return false;
    }
    s_params.iter().zip(t_params.iter()).all(|(s, t)| {
        let s_inner = member_inner(arena, *s);
        let t_inner = member_inner(arena, *t);
        is_assignable(arena, s_inner, t_inner) || is_assignable(arena, t_inner, s_inner)
    })
}

/// Match a string against template literal parts: string literal text must
/// appear verbatim, `string` holes take any substring, `number` holes a
/// numeric one.
fn match_template(arena: &TypeArena, parts: &[TypeId], text: &str) -> bool {
    let Some((first, rest)) = parts.split_first() else {
        return text.is_empty();
    };
    let part = arena.get(*first);
    if part.is_literal() {
        let literal = part.text.as_str();
        return text.starts_with(literal) && match_template(arena, rest, &text[literal.len()..]);
    }
    (0..=text.len()).filter(|end| text.is_char_boundary(*end)).any(|end| {
        let (head, tail) = text.split_at(end);
        hole_accepts(arena, *first, head) && match_template(arena, rest, tail)
    })
}

fn hole_accepts(arena: &TypeArena, hole: TypeId, text: &str) -> bool {
    let ty = arena.get(hole);
    match ty.kind {
        TypeKind::String | TypeKind::Any | TypeKind::Unknown => true,
        TypeKind::Number => !text.is_empty() && text.trim() == text && text.parse::<f64>().is_ok(),
        TypeKind::BigInt => !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()),
        TypeKind::Boolean => text == "true" || text == "false",
        TypeKind::Null => text == "null",
        TypeKind::Undefined => text == "undefined",
        TypeKind::Literal => ty.text == text,
        TypeKind::Union => ty.children().iter().any(|member| hole_accepts(arena, *member, text)),
        TypeKind::TemplateLiteral => match_template(arena, &ty.children(), text),
        _ => false,
    }
}
