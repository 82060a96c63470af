//! Integration tests for the TypeVM pipeline
//!
//! Source text is lexed, parsed, compiled, built into an image and run:
//! - Type evaluation of aliases
//! - Diagnostics reported while running main
//! - Fatal VM limits

use typevm::vm::{LineCharacter, Module, Vm, VmConfig, VmError};

fn module(source: &str) -> Module {
    typevm::build_module("test.ts", source).unwrap()
}

/// Run main and return the diagnostics, checking nothing leaks.
fn check(source: &str) -> Vec<String> {
    let mut module = module(source);
    let mut vm = Vm::default();
    vm.run(&mut module).unwrap();
    vm.clear_cache().unwrap();
    assert_eq!(vm.arena().live_count(), 0, "type nodes leaked");
    module.errors().iter().map(|error| error.message.clone()).collect()
}

/// Evaluate the alias `name` and render it.
fn evaluate(source: &str, name: &str) -> String {
    let mut module = module(source);
    let mut vm = Vm::default();
    let routine = module.find_subroutine(name).unwrap();
    let id = vm.evaluate(&mut module, routine).unwrap();
    let text = vm.stringify(id);
    vm.release(id).unwrap();
    text
}

// ============================================
// Evaluation
// ============================================

#[test]
fn test_clean_program_has_no_errors() {
    let source = r#"
type Name = string;
type Pair<A, B = A> = [A, B];
type Names = Pair<Name>;
type IsString<T> = T extends string ? true : false;
const label: Name = "label";
const flag: IsString<"x"> = true;
function greet(name: Name): string { return name; }
"#;
    assert!(check(source).is_empty());
}

#[test]
fn test_distribution_over_never_is_never() {
    let source = "type F<T> = T extends string ? 1 : 2; type R = F<never>;";
    insta::assert_snapshot!(evaluate(source, "R"), @"never");
}

#[test]
fn test_distribution_keeps_member_order() {
    let source = "type F<T> = T extends string ? [T] : never; type R = F<\"a\" | 1 | \"b\">;";
    insta::assert_snapshot!(evaluate(source, "R"), @r#"["a"] | ["b"]"#);
}

#[test]
fn test_distribution_splits_boolean() {
    let source = "type D<T> = T extends true ? 1 : 2; type R = D<boolean>; type S = D<boolean | never>;";
    insta::assert_snapshot!(evaluate(source, "R"), @"1 | 2");
    insta::assert_snapshot!(evaluate(source, "S"), @"1 | 2");
}

#[test]
fn test_generic_function_type_keeps_outer_arguments() {
    let source = "type Make<T> = <U>(a: T, b: U) => T;\nlet f: Make<string>;\nf<number>(\"x\", 1);";
    assert!(check(source).is_empty());
    insta::assert_snapshot!(evaluate(source, "Make"), @"<U>(a: T, b: U) => T");
}

#[test]
fn test_generic_function_type_rejects_outer_mismatch() {
    let source = "type Make<T> = <U>(a: T, b: U) => T;\nlet f: Make<string>;\nf<number>(1, 2);";
    assert_eq!(check(source), vec!["Argument of type '1' is not assignable to parameter of type 'string'."]);
}

#[test]
fn test_template_over_two_unions() {
    let source = "type T = `${\"a\" | \"b\"}-${1 | 2}`;";
    insta::assert_snapshot!(evaluate(source, "T"), @r#""a-1" | "a-2" | "b-1" | "b-2""#);
}

#[test]
fn test_object_missing_property_fails_conditional() {
    let source = "type O = { a: string; b: number };\n\
                  type Missing = { a: string } extends O ? 1 : 2;\n\
                  type Present = { b: number; a: \"x\" } extends O ? 1 : 2;";
    assert_eq!(evaluate(source, "Missing"), "2");
    assert_eq!(evaluate(source, "Present"), "1");
}

#[test]
fn test_spread_of_two_type_arguments() {
    let source = "type Concat<A, B> = [...A, ...B]; type R = Concat<[1, 2], [\"x\"]>;";
    insta::assert_snapshot!(evaluate(source, "R"), @r#"[1, 2, "x"]"#);
}

// ============================================
// Diagnostics
// ============================================

#[test]
fn test_cannot_find_maps_to_source() {
    let source = "type A = string;\ntype B = Nope;";
    let mut module = module(source);
    let mut vm = Vm::default();
    vm.run(&mut module).unwrap();
    assert_eq!(module.errors().len(), 1);
    let error = &module.errors()[0];
    assert_eq!(error.message, "Cannot find name 'Nope'");
    let map = module.find_normalized_map(error.ip).unwrap();
    assert_eq!(&source[map.clone()], "Nope");
    assert_eq!(module.map_to_line_character(&map), LineCharacter { line: 1, pos: 9, end: 13 });
}

#[test]
fn test_redeclaration_uses_last() {
    let source = "type A = string;\ntype A = number;\nconst x: A = \"a\";";
    assert_eq!(check(source), vec!["Type '\"a\"' is not assignable to type 'number'."]);
}

#[test]
fn test_template_pattern_assignment() {
    let source = "type Id = `id-${number}`;\nconst a: Id = \"id-42\";\nconst b: Id = \"x\";";
    assert_eq!(check(source), vec!["Type '\"x\"' is not assignable to type '`id-${number}`'."]);
}

#[test]
fn test_class_method_body_is_checked() {
    let source = "class Foo { name: string; m(): string { return 1; } }";
    assert_eq!(check(source), vec!["Type '1' is not assignable to type 'string'."]);
}

#[test]
fn test_rest_parameter_arguments() {
    let source = "function f(...xs: string[]): void;\nf(\"a\", \"b\");\nf(\"a\", 1);";
    assert_eq!(
        check(source),
        vec!["Argument of type '1' is not assignable to parameter of type 'string'."]
    );
}

#[test]
fn test_too_many_arguments() {
    let source = "function g(a: string): void;\ng(\"a\", \"b\");";
    assert_eq!(check(source), vec!["Expected 1 arguments, but got 2."]);
}

#[test]
fn test_report_counts_errors() {
    let mut module = module("const a: string = 1;\nconst b: number = \"b\";\ntype C = D;");
    let mut vm = Vm::default();
    vm.run(&mut module).unwrap();
    assert_eq!(module.errors().len(), 3);
    let mut out = Vec::new();
    module.write_errors(&mut out, false).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("Cannot find name 'D'"));
    assert!(text.ends_with("Found 3 errors in test.ts\n"));
}

#[test]
fn test_rerun_reuses_vm() {
    let mut module = module("type A = [string]; const x: A = 1;");
    let mut vm = Vm::default();
    vm.run(&mut module).unwrap();
    module.clear();
    vm.run(&mut module).unwrap();
    assert_eq!(module.errors().len(), 1);
}

// ============================================
// Limits
// ============================================

#[test]
fn test_infinite_alias_hits_step_limit() {
    let mut module = module("type A = B; type B = A; const x: A = 1;");
    let mut vm = Vm::new(VmConfig::default().with_step_limit(10_000));
    assert_eq!(vm.run(&mut module), Err(VmError::StepLimitExceeded { limit: 10_000 }));
}

#[test]
fn test_unbounded_generic_recursion_is_stopped() {
    let mut module = module("type Deep<T> = Deep<[T]>; type R = [Deep<string>];");
    let mut vm = Vm::new(VmConfig::default().with_step_limit(100_000));
    let routine = module.find_subroutine("R").unwrap();
    assert_eq!(vm.evaluate(&mut module, routine), Err(VmError::StepLimitExceeded { limit: 100_000 }));
}

#[test]
fn test_non_tail_recursion_overflows_frames() {
    let mut module = module("type Deep<T> = [Deep<[T]>]; type R = Deep<string>;");
    let mut vm = Vm::default();
    let routine = module.find_subroutine("R").unwrap();
    assert_eq!(vm.evaluate(&mut module, routine), Err(VmError::FramePoolOverflow { capacity: 1024 }));
}

// ============================================
// Disassembly
// ============================================

#[test]
fn test_disasm_names_every_subroutine() {
    let module = module("type A = string; type B<T> = [T, A];");
    let result = typevm::disasm::parse_bin(&module.bin).unwrap();
    assert_eq!(result.subroutines.len(), module.subroutines.len());
    let text = typevm::disasm::print_bin(&module.bin).unwrap();
    assert!(text.contains("&1 A():"));
    assert!(text.contains("&2 B():"));
    assert!(text.contains("Loads 0, 0"));
}
