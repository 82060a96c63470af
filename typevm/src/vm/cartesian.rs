//! Cartesian product of union members
//!
//! Used to expand template literals: every term is turned into a group of
//! alternatives and the rows are enumerated in odometer order, rightmost
//! group first. Distributive conditionals iterate the same groups, minus
//! the string forms of `null` and `undefined`.

use super::error::Result;
use crate::types::{Type, TypeArena, TypeId, TypeKind};

#[derive(Debug, Default)]
struct Group {
    members: Vec<TypeId>,
    cursor: usize,
}

/// Holds one reference to every group member until [`release`](Self::release).
#[derive(Debug, Default)]
pub struct CartesianProduct {
    groups: Vec<Group>,
}

impl CartesianProduct {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a term as the next (rightmost) group.
    pub fn add(&mut self, arena: &mut TypeArena, item: TypeId) {
        let mut members = Vec::new();
        expand(arena, item, Expansion::Template, &mut members);
        self.groups.push(Group { members, cursor: 0 });
    }

    /// All combinations, one row per combination. Template literal members
    /// are spliced into their row. The returned ids are borrowed from the
    /// engine and from the nodes it was fed.
    pub fn calculate(&mut self, arena: &TypeArena) -> Vec<Vec<TypeId>> {
        let mut rows = Vec::new();
        if self.groups.iter().any(|group| group.members.is_empty()) {
            return rows;
        }
        for group in &mut self.groups {
            group.cursor = 0;
        }
        loop {
            let mut row = Vec::new();
            for group in &self.groups {
                let item = group.members[group.cursor];
                let ty = arena.get(item);
                if ty.kind == TypeKind::TemplateLiteral {
                    row.extend(ty.children());
                } else {
                    row.push(item);
                }
            }
            rows.push(row);

            // advance like an odometer; stop when the leftmost wraps
            let mut carried = true;
            for group in self.groups.iter_mut().rev() {
                group.cursor += 1;
                if group.cursor < group.members.len() {
                    carried = false;
                    break;
                }
                group.cursor = 0;
            }
            if carried {
                return rows;
            }
        }
    }

    pub fn release(self, arena: &mut TypeArena) -> Result<()> {
        for group in self.groups {
            for member in group.members {
                arena.release(member)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expansion {
    Template,
    Distribution,
}

/// Members a distributive conditional binds in turn: nested unions are
/// flattened, `boolean` becomes `true` then `false` and `never` has none.
/// Every returned id holds one reference.
pub fn distribution_members(arena: &mut TypeArena, item: TypeId) -> Vec<TypeId> {
    let mut members = Vec::new();
    expand(arena, item, Expansion::Distribution, &mut members);
    members
}

fn expand(arena: &mut TypeArena, item: TypeId, mode: Expansion, out: &mut Vec<TypeId>) {
    let text = match (arena.get(item).kind, mode) {
        (TypeKind::Boolean, _) => {
            for value in [true, false] {
                let literal = arena.alloc(Type::boolean_literal(value));
                out.push(arena.use_type(literal));
            }
            return;
        }
        (TypeKind::Union, _) => {
            for member in arena.get(item).children() {
                expand(arena, member, mode, out);
            }
            return;
        }
        (TypeKind::Never, Expansion::Distribution) => return,
        (TypeKind::Null, Expansion::Template) => "null",
        (TypeKind::Undefined, Expansion::Template) => "undefined",
        _ => {
            out.push(arena.use_type(item));
            return;
        }
    };
    let literal = arena.alloc(Type::string_literal(text));
    out.push(arena.use_type(literal));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Payload, stringify};

    fn union(arena: &mut TypeArena, members: Vec<TypeId>) -> TypeId {
        for member in &members {
            arena.use_type(*member);
        }
        let mut ty = Type::new(TypeKind::Union, 0);
        ty.payload = Payload::List(members);
        arena.alloc(ty)
    }

    fn render(arena: &TypeArena, rows: &[Vec<TypeId>]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|row| row.iter().map(|id| stringify(arena, *id)).collect())
            .collect()
    }

    #[test]
    fn test_boolean_expands_true_then_false() {
        let mut arena = TypeArena::new();
        let boolean = arena.alloc(Type::keyword(TypeKind::Boolean));
        let a = arena.alloc(Type::string_literal("a"));
        arena.use_type(a);
        let mut product = CartesianProduct::new();
        product.add(&mut arena, boolean);
        product.add(&mut arena, a);
        let rows = product.calculate(&arena);
        assert_eq!(render(&arena, &rows), vec![vec!["true", "\"a\""], vec!["false", "\"a\""]]);
        product.release(&mut arena).unwrap();
        assert!(arena.is_live(a));
    }

    #[test]
    fn test_odometer_order_and_cardinality() {
        let mut arena = TypeArena::new();
        let a = arena.alloc(Type::string_literal("a"));
        let b = arena.alloc(Type::string_literal("b"));
        let one = arena.alloc(Type::string_literal("1"));
        let two = arena.alloc(Type::string_literal("2"));
        let three = arena.alloc(Type::string_literal("3"));
        let left = union(&mut arena, vec![a, b]);
        let right = union(&mut arena, vec![one, two, three]);

        let mut product = CartesianProduct::new();
        product.add(&mut arena, left);
        product.add(&mut arena, right);
        let rows = product.calculate(&arena);
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0], vec![a, one]);
        assert_eq!(rows[1], vec![a, two]);
        assert_eq!(rows[3], vec![b, one]);
        assert_eq!(rows[5], vec![b, three]);
        product.release(&mut arena).unwrap();
    }

    #[test]
    fn test_null_and_undefined_become_strings() {
        let mut arena = TypeArena::new();
        let null = arena.alloc(Type::keyword(TypeKind::Null));
        let undefined = arena.alloc(Type::keyword(TypeKind::Undefined));
        let both = union(&mut arena, vec![null, undefined]);
        let mut product = CartesianProduct::new();
        product.add(&mut arena, both);
        let rows = product.calculate(&arena);
        assert_eq!(render(&arena, &rows), vec![vec!["\"null\""], vec!["\"undefined\""]]);
        product.release(&mut arena).unwrap();
    }

    #[test]
    fn test_template_member_is_spliced() {
        let mut arena = TypeArena::new();
        let x = arena.alloc(Type::string_literal("x"));
        let number = arena.alloc(Type::keyword(TypeKind::Number));
        arena.use_type(x);
        arena.use_type(number);
        let mut template = Type::new(TypeKind::TemplateLiteral, 0);
        template.payload = Payload::List(vec![x, number]);
        let template = arena.alloc(template);
        let end = arena.alloc(Type::string_literal("!"));

        let mut product = CartesianProduct::new();
        product.add(&mut arena, template);
        product.add(&mut arena, end);
        let rows = product.calculate(&arena);
        assert_eq!(rows, vec![vec![x, number, end]]);
        product.release(&mut arena).unwrap();
    }

    #[test]
    fn test_distribution_splits_boolean_and_flattens() {
        let mut arena = TypeArena::new();
        let boolean = arena.alloc(Type::keyword(TypeKind::Boolean));
        let x = arena.alloc(Type::string_literal("x"));
        let null = arena.alloc(Type::keyword(TypeKind::Null));
        let inner = union(&mut arena, vec![x, null]);
        let outer = union(&mut arena, vec![boolean, inner]);
        arena.use_type(outer);

        let members = distribution_members(&mut arena, outer);
        let rendered: Vec<String> = members.iter().map(|id| stringify(&arena, *id)).collect();
        assert_eq!(rendered, vec!["true", "false", "\"x\"", "null"]);
        for member in members {
            arena.release(member).unwrap();
        }
        arena.release(outer).unwrap();
        assert_eq!(arena.live_count(), 0);
    }

    #[test]
    fn test_distribution_of_never_is_empty() {
        let mut arena = TypeArena::new();
        let never = arena.alloc(Type::keyword(TypeKind::Never));
        assert!(distribution_members(&mut arena, never).is_empty());
    }

    #[test]
    fn test_release_balances_references() {
        let mut arena = TypeArena::new();
        let boolean = arena.alloc(Type::keyword(TypeKind::Boolean));
        arena.use_type(boolean);
        let mut product = CartesianProduct::new();
        product.add(&mut arena, boolean);
        assert_eq!(arena.live_count(), 3);
        product.release(&mut arena).unwrap();
        assert_eq!(arena.live_count(), 1);
        arena.release(boolean).unwrap();
        assert_eq!(arena.live_count(), 0);
    }
}
