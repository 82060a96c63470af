//! Parser tests

use crate::ast::*;
use crate::lexer::tokenize;
use crate::parser::{parse, parse_type};

/// Helper to parse a source file
fn parse_source(source: &str) -> crate::Result<SourceFile> {
    let tokens = tokenize(source)?;
    parse("test.ts", source, tokens)
}

/// Helper to parse and expect success
fn parse_ok(source: &str) -> SourceFile {
    parse_source(source).expect("Parse should succeed")
}

fn type_ok(source: &str) -> TypeNode {
    parse_type(source).expect("Type should parse").node
}

// ============================================
// Statements
// ============================================

#[test]
fn test_parse_type_alias() {
    let file = parse_ok("type A = string;");
    assert_eq!(file.statements.len(), 1);
    let Statement::TypeAlias(alias) = &file.statements[0].node else {
        panic!("Expected TypeAlias");
    };
    assert_eq!(alias.name.node, "A");
    assert!(matches!(alias.ty.node, TypeNode::Keyword(Keyword::String)));
    assert_eq!(file.statements[0].span, Span::new(0, 16));
}

#[test]
fn test_parse_generic_alias_with_constraint_and_default() {
    let file = parse_ok("type Box<T extends string, U = T[]> = [T, U]");
    let Statement::TypeAlias(alias) = &file.statements[0].node else {
        panic!("Expected TypeAlias");
    };
    assert_eq!(alias.type_params.len(), 2);
    assert!(alias.type_params[0].constraint.is_some());
    assert!(alias.type_params[0].default.is_none());
    assert!(matches!(
        alias.type_params[1].default.as_ref().map(|d| &d.node),
        Some(TypeNode::Array(_))
    ));
}

#[test]
fn test_parse_function_declaration() {
    let file = parse_ok("function f<T>(a: T, ...rest: string[]): T { return a; }");
    let Statement::Function(func) = &file.statements[0].node else {
        panic!("Expected Function");
    };
    let sig = &func.signature;
    assert_eq!(sig.type_params.len(), 1);
    assert_eq!(sig.params.len(), 2);
    assert!(sig.params[1].rest);
    assert!(sig.return_type.is_some());
    let body = sig.body.as_ref().expect("body");
    assert!(matches!(body[0].node, Statement::Return(Some(_))));
}

#[test]
fn test_parse_function_without_body() {
    let file = parse_ok("function f(a?: number): void;");
    let Statement::Function(func) = &file.statements[0].node else {
        panic!("Expected Function");
    };
    assert!(func.signature.body.is_none());
    assert!(func.signature.params[0].optional);
}

#[test]
fn test_parse_variable_declarations() {
    let file = parse_ok("const a: string = 'x'; let b = 1; var c: number;");
    assert_eq!(file.statements.len(), 3);
    let Statement::Variable(a) = &file.statements[0].node else {
        panic!("Expected Variable");
    };
    assert_eq!(a.kind, VariableKind::Const);
    assert!(a.ty.is_some());
    assert!(matches!(a.init.as_ref().map(|e| &e.node), Some(Expr::Literal(Literal::String(s))) if s == "x"));
    let Statement::Variable(c) = &file.statements[2].node else {
        panic!("Expected Variable");
    };
    assert_eq!(c.kind, VariableKind::Var);
    assert!(c.init.is_none());
}

#[test]
fn test_parse_class() {
    let file = parse_ok("class A<T> { readonly name: string; value?: T; get(): T { return 1; } }");
    let Statement::Class(class) = &file.statements[0].node else {
        panic!("Expected Class");
    };
    assert_eq!(class.members.len(), 3);
    assert!(matches!(
        &class.members[0].node,
        Member::Property { readonly: true, optional: false, .. }
    ));
    assert!(matches!(&class.members[1].node, Member::Property { optional: true, .. }));
    assert!(matches!(&class.members[2].node, Member::Method { signature, .. } if signature.body.is_some()));
}

#[test]
fn test_parse_readonly_as_property_name() {
    let file = parse_ok("class A { readonly: string }");
    let Statement::Class(class) = &file.statements[0].node else {
        panic!("Expected Class");
    };
    assert!(matches!(&class.members[0].node, Member::Property { name, readonly: false, .. } if name.node == "readonly"));
}

#[test]
fn test_parse_call_expression_statement() {
    let file = parse_ok("f<string>('a', 2);");
    let Statement::Expression(expr) = &file.statements[0].node else {
        panic!("Expected Expression");
    };
    let Expr::Call { callee, type_args, args } = &expr.node else {
        panic!("Expected Call");
    };
    assert!(matches!(&callee.node, Expr::Identifier(name) if name == "f"));
    assert_eq!(type_args.len(), 1);
    assert_eq!(args.len(), 2);
    assert_eq!(expr.span, Span::new(0, 17));
}

#[test]
fn test_parse_null_and_undefined_expressions() {
    let file = parse_ok("const a = null; const b = undefined;");
    let inits: Vec<_> = file
        .statements
        .iter()
        .filter_map(|s| match &s.node {
            Statement::Variable(v) => v.init.as_ref().map(|e| e.node.clone()),
            _ => None,
        })
        .collect();
    assert!(matches!(inits[0], Expr::Literal(Literal::Null)));
    assert!(matches!(inits[1], Expr::Literal(Literal::Undefined)));
}

// ============================================
// Types
// ============================================

#[test]
fn test_parse_union_with_leading_pipe() {
    let TypeNode::Union(members) = type_ok("| 'a' | 'b' | number") else {
        panic!("Expected Union");
    };
    assert_eq!(members.len(), 3);
}

#[test]
fn test_parse_tuple_optional_and_rest() {
    let TypeNode::Tuple(elements) = type_ok("[string, number?, ...boolean[]]") else {
        panic!("Expected Tuple");
    };
    assert_eq!(elements.len(), 3);
    assert!(elements[1].optional);
    assert!(elements[2].rest);
    assert!(matches!(elements[2].ty.node, TypeNode::Array(_)));
}

#[test]
fn test_parse_nested_array() {
    let TypeNode::Array(inner) = type_ok("string[][]") else {
        panic!("Expected Array");
    };
    assert!(matches!(inner.node, TypeNode::Array(_)));
}

#[test]
fn test_parse_conditional() {
    let TypeNode::Conditional { check, extends_type, false_type, .. } =
        type_ok("T extends string ? 'yes' : T extends number ? 1 : never")
    else {
        panic!("Expected Conditional");
    };
    assert!(matches!(&check.node, TypeNode::Reference { name, .. } if name.node == "T"));
    assert!(matches!(extends_type.node, TypeNode::Keyword(Keyword::String)));
    assert!(matches!(false_type.node, TypeNode::Conditional { .. }));
}

#[test]
fn test_parse_template_literal_holes() {
    let ty = parse_type("`a${T}-${number}`").unwrap();
    let TypeNode::TemplateLiteral(spans) = ty.node else {
        panic!("Expected TemplateLiteral");
    };
    assert_eq!(spans.len(), 4);
    assert!(matches!(&spans[0], TemplateSpan::Text(t) if t.node == "a"));
    let TemplateSpan::Type(hole) = &spans[1] else {
        panic!("Expected hole");
    };
    assert_eq!(hole.span, Span::new(4, 5));
    assert!(matches!(&spans[2], TemplateSpan::Text(t) if t.node == "-"));
    assert!(matches!(&spans[3], TemplateSpan::Type(t) if matches!(t.node, TypeNode::Keyword(Keyword::Number))));
}

#[test]
fn test_parse_template_unterminated_hole() {
    assert!(parse_type("`a${T`").is_err());
}

#[test]
fn test_parse_function_type_vs_parenthesized() {
    assert!(matches!(type_ok("(a: string) => void"), TypeNode::Function(_)));
    assert!(matches!(type_ok("(string | number)"), TypeNode::Union(_)));
    assert!(matches!(type_ok("<T>(a: T) => T"), TypeNode::Function(sig) if sig.type_params.len() == 1));
}

#[test]
fn test_parse_object_type() {
    let TypeNode::Object(members) = type_ok("{ a: string; b?: number, m(x: string): void }") else {
        panic!("Expected Object");
    };
    assert_eq!(members.len(), 3);
    assert!(matches!(&members[2].node, Member::Method { signature, .. } if signature.body.is_none()));
}

#[test]
fn test_parse_readonly_type_operator() {
    assert!(matches!(type_ok("readonly string[]"), TypeNode::Readonly(_)));
}

#[test]
fn test_parse_reference_with_args() {
    let TypeNode::Reference { name, type_args } = type_ok("Map<string, Array<number>>") else {
        panic!("Expected Reference");
    };
    assert_eq!(name.node, "Map");
    assert_eq!(type_args.len(), 2);
}

// ============================================
// Errors
// ============================================

#[test]
fn test_parse_error_reports_found_token() {
    let err = parse_source("type A = ;").unwrap_err();
    assert!(err.message().contains("expected type"));
    assert_eq!(err.span(), Some(Span::new(9, 10)));
}

#[test]
fn test_parse_error_at_eof() {
    let err = parse_source("type A =").unwrap_err();
    assert!(err.message().contains("end of input"));
    assert_eq!(err.span(), Some(Span::new(8, 8)));
}
