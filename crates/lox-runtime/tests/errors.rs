//! Compile-time diagnostics and runtime type errors

mod common;

use common::{compile_errors, has_error, runtime_error};
use pretty_assertions::assert_eq;
use rstest::rstest;

// === Compile errors ===

#[test]
fn missing_expression() {
    let errors = compile_errors("1 +;");
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0].to_string(),
        "[line 1] Error at ';': Expect expression."
    );
}

#[test]
fn error_at_end_of_input() {
    let errors = compile_errors("print 1");
    assert_eq!(errors[0].to_string(), "[line 1] Error at end: Expect ';' after value.");
}

#[test]
fn error_lines_are_tracked() {
    let errors = compile_errors("var ok = 1;\nvar broken = ;\n");
    assert_eq!(
        errors[0].to_string(),
        "[line 2] Error at ';': Expect expression."
    );
}

#[test]
fn unterminated_string_reports_without_a_lexeme() {
    let errors = compile_errors("var s = \"oops;");
    assert_eq!(errors[0].to_string(), "[line 1] Error: Unterminated string.");
}

#[test]
fn unexpected_character() {
    let errors = compile_errors("var a = 1 @ 2;");
    assert!(has_error(&errors, "Unexpected character."));
}

#[test]
fn synchronization_reports_multiple_errors() {
    let errors = compile_errors("var a = ;\nvar b = ;\n");
    assert_eq!(errors.len(), 2);
}

#[test]
fn invalid_assignment_target() {
    let errors = compile_errors("var a = 1; var b = 2; a + b = 3;");
    assert!(has_error(&errors, "Invalid assignment target."));
}

#[test]
fn duplicate_declaration_in_scope() {
    let errors = compile_errors("{ var a = 1; var a = 2; }");
    assert!(has_error(
        &errors,
        "Already a variable with this name in this scope."
    ));
}

#[test]
fn shadowing_across_scopes_is_fine() {
    // Same name in a nested scope is not a redeclaration.
    common::eval("{ var a = 1; { var a = 2; print a; } print a; }");
}

#[test]
fn local_cannot_read_itself_in_its_initializer() {
    let errors = compile_errors("{ var a = 1; { var a = a; } }");
    assert!(has_error(
        &errors,
        "Can't read local variable in its own initializer."
    ));
}

#[rstest]
#[case("print this;", "Can't use 'this' outside of a class.")]
#[case("fun f() { return this; }", "Can't use 'this' outside of a class.")]
#[case("print super.x;", "Can't use 'super' outside of a class.")]
#[case(
    "class C { m() { super.m(); } }",
    "Can't use 'super' in a class with no superclass."
)]
fn this_and_super_misuse(#[case] source: &str, #[case] message: &str) {
    let errors = compile_errors(source);
    assert!(has_error(&errors, message), "diagnostics: {:?}", errors);
}

#[test]
fn class_cannot_inherit_from_itself() {
    let errors = compile_errors("class A < A {}");
    assert!(has_error(&errors, "A class can't inherit from itself."));
}

#[test]
fn top_level_return_is_rejected() {
    let errors = compile_errors("return 1;");
    assert!(has_error(&errors, "Can't return from top-level code."));
}

#[test]
fn initializer_cannot_return_a_value() {
    let errors = compile_errors("class C { init() { return 5; } }");
    assert!(has_error(
        &errors,
        "Can't return a value from an initializer."
    ));
}

#[test]
fn too_many_locals_in_one_function() {
    let mut source = String::from("fun f() {\n");
    for i in 0..257 {
        source.push_str(&format!("var v{} = 0;\n", i));
    }
    source.push_str("}\n");
    let errors = compile_errors(&source);
    assert!(has_error(&errors, "Too many local variables in function."));
}

#[test]
fn too_many_constants_in_one_chunk() {
    // Each distinct number literal lands in the constant pool.
    let mut source = String::new();
    for i in 0..300 {
        source.push_str(&format!("print {};\n", i));
    }
    let errors = compile_errors(&source);
    assert!(has_error(&errors, "Too many constants in one chunk."));
}

#[test]
fn jump_distance_is_capped_at_sixteen_bits() {
    // A then-branch bigger than 65535 bytes cannot be jumped over. Each
    // `print nil;` is two bytes, so 33000 of them overflow the offset.
    let mut source = String::from("if (true) {\n");
    for _ in 0..33000 {
        source.push_str("print nil;\n");
    }
    source.push_str("}\n");
    let errors = compile_errors(&source);
    assert!(has_error(&errors, "Too much code to jump over."));
}

#[test]
fn too_many_parameters() {
    let mut source = String::from("fun f(");
    for i in 0..256 {
        if i > 0 {
            source.push_str(", ");
        }
        source.push_str(&format!("p{}", i));
    }
    source.push_str(") {}\n");
    let errors = compile_errors(&source);
    assert!(has_error(&errors, "Can't have more than 255 parameters."));
}

// === Runtime type errors ===

#[rstest]
#[case("print -\"a\";", "Operand must be a number.")]
#[case("print 1 < \"a\";", "Operands must be numbers.")]
#[case("print \"a\" > \"b\";", "Operands must be numbers.")]
#[case("print 1 + \"a\";", "Operands must be two numbers or two strings.")]
#[case("print \"a\" + 1;", "Operands must be two numbers or two strings.")]
#[case("print nil + nil;", "Operands must be two numbers or two strings.")]
#[case("print 1 * nil;", "Operands must be numbers.")]
fn operand_type_errors(#[case] source: &str, #[case] message: &str) {
    assert_eq!(runtime_error(source).message, message);
}

#[test]
fn undefined_global_read() {
    assert_eq!(
        runtime_error("print missing;").message,
        "Undefined variable 'missing'."
    );
}

#[test]
fn undefined_global_assignment() {
    assert_eq!(
        runtime_error("missing = 1;").message,
        "Undefined variable 'missing'."
    );
}

#[test]
fn assignment_to_undefined_does_not_create_it() {
    let mut vm = lox_runtime::Vm::new();
    assert!(vm.interpret("ghost = 1;").is_err());
    assert!(vm.interpret("print ghost;").is_err());
}
