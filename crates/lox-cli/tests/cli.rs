//! End-to-end tests for the `lox` binary: exit codes and output streams

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::NamedTempFile;

fn lox() -> Command {
    Command::cargo_bin("lox").expect("lox binary builds")
}

fn script(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp script");
    write!(file, "{}", contents).expect("write temp script");
    file
}

#[test]
fn runs_a_script_and_prints_to_stdout() {
    let file = script("print 1 + 2;\n");
    lox()
        .arg(file.path())
        .assert()
        .success()
        .stdout("3\n");
}

#[test]
fn compile_errors_exit_65() {
    let file = script("1 +;\n");
    lox()
        .arg(file.path())
        .assert()
        .code(65)
        .stderr(predicate::str::contains("[line 1] Error at ';': Expect expression."));
}

#[test]
fn runtime_errors_exit_70_with_a_trace() {
    let file = script("print missing;\n");
    lox()
        .arg(file.path())
        .assert()
        .code(70)
        .stderr(predicate::str::contains("Undefined variable 'missing'."))
        .stderr(predicate::str::contains("[line 1] in script"));
}

#[test]
fn extra_arguments_exit_64_with_usage() {
    let first = script("print 1;\n");
    let second = script("print 2;\n");
    lox()
        .arg(first.path())
        .arg(second.path())
        .assert()
        .code(64)
        .stderr(predicate::str::contains("Usage: lox [script]"));
}

#[test]
fn unreadable_file_exits_74() {
    lox()
        .arg("does-not-exist.lox")
        .assert()
        .code(74)
        .stderr(predicate::str::contains("Could not read"));
}

#[test]
fn dump_prints_bytecode_instead_of_executing() {
    let file = script("print 1 + 2;\n");
    lox()
        .arg("--dump")
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("OP_ADD"))
        .stdout(predicate::str::contains("OP_PRINT"))
        .stdout(predicate::str::contains("== <script> =="));
}

#[test]
fn gc_stress_flag_is_accepted() {
    let file = script("var s = \"a\" + \"b\"; print s;\n");
    lox()
        .arg("--gc-stress")
        .arg(file.path())
        .assert()
        .success()
        .stdout("ab\n");
}

#[test]
fn multi_line_scripts_report_correct_lines() {
    let file = script("var ok = 1;\nprint ok;\nprint broken;\n");
    lox()
        .arg(file.path())
        .assert()
        .code(70)
        .stdout("1\n")
        .stderr(predicate::str::contains("[line 3] in script"));
}
