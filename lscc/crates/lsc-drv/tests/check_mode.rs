//! End-to-end check-mode scenarios: diagnostics, kind tags, exit codes.
//!
//! These tests never invoke a real C toolchain; everything stops at or
//! before the backend.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::NamedTempFile;

fn source_file(content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".lsc")
        .tempfile()
        .expect("temp file");
    file.write_all(content.as_bytes()).expect("write source");
    file
}

fn lsc() -> Command {
    Command::cargo_bin("lsc").expect("binary builds")
}

#[test]
fn check_accepts_well_typed_program() {
    let file = source_file("declare s = 0\nfor i in 0..5 do s += i end\nprintln(s)\n");
    lsc().arg(file.path()).arg("--check").assert().success();
}

#[test]
fn check_accepts_functions_classes_and_throws() {
    let source = "class Point do\n\
                  x: i64\n\
                  y: i64\n\
                  constructor(x0: i64, y0: i64) do\nx = x0\ny = y0\nend\n\
                  norm1() -> i64 do\nreturn abs(x) + abs(y)\nend\n\
                  end\n\
                  fetch(url: str) -> str throws NetError do\nreturn http_get(url)\nend\n\
                  main() -> i64 do\n\
                  declare p = Point(3, -4)\n\
                  println(p.norm1())\n\
                  return 0\n\
                  end\n";
    let file = source_file(source);
    lsc().arg(file.path()).arg("--check").assert().success();
}

#[test]
fn const_division_by_zero_is_exit_3() {
    let file = source_file("declare x = 10 / 0\n");
    lsc()
        .arg(file.path())
        .arg("--check")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("ConstDivByZeroError"));
}

#[test]
fn const_float_division_by_zero_is_exit_3() {
    let file = source_file("declare x = 1.0 / 0.0\n");
    lsc()
        .arg(file.path())
        .arg("--check")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("ConstDivByZeroError"));
}

#[test]
fn parallel_for_break_is_exit_3() {
    let file = source_file("parallel for i in 0..10 do break end\n");
    lsc()
        .arg(file.path())
        .arg("--check")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("ParallelLoopConstraintError"));
}

#[test]
fn parallel_for_outer_assignment_is_exit_3() {
    let file = source_file("declare s = 0\nparallel for i in 0..10 do s = s + i end\n");
    lsc()
        .arg(file.path())
        .arg("--check")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("ParallelLoopConstraintError"));
}

#[test]
fn zero_step_loop_is_accepted() {
    let file = source_file("for i in 0..10 step 0 do println(i) end\n");
    lsc().arg(file.path()).arg("--check").assert().success();
}

#[test]
fn syntax_error_is_exit_3_with_location() {
    let file = source_file("declare = 1\n");
    lsc()
        .arg(file.path())
        .arg("--check")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("SyntaxError"))
        .stderr(predicate::str::contains(":1:"));
}

#[test]
fn type_error_is_exit_3() {
    let file = source_file("declare x: i64 = 1.5\n");
    lsc()
        .arg(file.path())
        .arg("--check")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("TypeError"));
}

#[test]
fn undeclared_throws_is_exit_3() {
    let file = source_file("fetch() -> str do\nreturn http_get(\"u\")\nend\nprintln(1)\n");
    lsc()
        .arg(file.path())
        .arg("--check")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("ThrowsContractError"));
}

#[test]
fn use_after_move_is_exit_3() {
    let file = source_file(
        "declare owned a = array_new()\ndeclare owned b = a\narray_push(a, 1)\n",
    );
    lsc()
        .arg(file.path())
        .arg("--check")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("OwnedHandleEscapeError"));
}

#[test]
fn missing_input_file_is_exit_1() {
    lsc()
        .arg("definitely_not_here_xyz.lsc")
        .arg("--check")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("IoError"));
}

#[test]
fn check_is_idempotent() {
    let file = source_file("declare x: i64 = 1.5\nprintln(nope)\n");
    let first = lsc().arg(file.path()).arg("--check").output().unwrap();
    let second = lsc().arg(file.path()).arg("--check").output().unwrap();
    assert_eq!(first.status.code(), second.status.code());
    assert_eq!(first.stdout, second.stdout);
    assert_eq!(first.stderr, second.stderr);
}

#[test]
fn multiple_files_merge_in_order() {
    let lib = source_file("double(n: i64) -> i64 do\nreturn n * 2\nend\n");
    let app = source_file("println(double(21))\n");
    lsc()
        .arg(lib.path())
        .arg(app.path())
        .arg("--check")
        .assert()
        .success();
}

#[test]
fn parse_recovery_reports_several_errors() {
    let file = source_file("declare = 1\ndeclare = 2\ndeclare = 3\n");
    let output = lsc().arg(file.path()).arg("--check").output().unwrap();
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.matches("SyntaxError").count() >= 2, "{stderr}");
}

#[test]
fn unknown_flag_warns_but_does_not_fail_check() {
    let file = source_file("println(1)\n");
    lsc()
        .arg(file.path())
        .arg("--check")
        .arg("--mystery")
        .assert()
        .success()
        .stderr(predicate::str::contains("warning:"))
        .stderr(predicate::str::contains("--mystery"));
}

#[test]
fn declared_flag_is_not_warned_about() {
    let file = source_file("flag mystery() do\nprintln(2)\nend\nprintln(1)\n");
    lsc()
        .arg(file.path())
        .arg("--check")
        .arg("--mystery")
        .assert()
        .success()
        .stderr(predicate::str::contains("warning:").not());
}
