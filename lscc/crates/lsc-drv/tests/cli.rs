//! CLI hardening: misuse exits with code 2 before any real work runs.

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
fn no_inputs_is_exit_2() {
    lsc()
        .arg("--check")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("CliError"));
}

#[test]
fn wrong_extension_is_exit_2() {
    lsc()
        .arg("program.txt")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("CliError"));
}

#[test]
fn cc_with_shell_metacharacters_is_exit_2() {
    // Rejected during argument parsing, before any subprocess exists.
    for evil in ["cc;id", "cc&", "cc|id", "cc`id`", "cc$X", "cc(", "cc)", "cc<f", "cc>f"] {
        let file = source_file("println(1)\n");
        lsc()
            .arg(file.path())
            .arg("--cc")
            .arg(evil)
            .assert()
            .code(2)
            .stderr(predicate::str::contains("CliError"));
    }
}

#[test]
fn unbalanced_group_brackets_are_exit_2() {
    let file = source_file("println(1)\n");
    lsc()
        .arg(file.path())
        .arg("-O")
        .arg("[")
        .arg("-p")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unbalanced"));
}

#[test]
fn grouped_tokens_are_accepted() {
    let file = source_file("println(1)\n");
    lsc()
        .arg(file.path())
        .arg("--check")
        .arg("-O")
        .arg("[")
        .arg("-p")
        .arg("max")
        .arg("]")
        .assert()
        .success();
}

#[test]
fn invalid_backend_is_exit_2() {
    let file = source_file("println(1)\n");
    lsc()
        .arg(file.path())
        .arg("--backend")
        .arg("llvm")
        .assert()
        .code(2);
}

#[test]
fn ambiguous_entry_is_exit_3_on_build() {
    let file = source_file("a() do\nend\nb() do\nend\n");
    lsc()
        .arg(file.path())
        .arg("--build")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("NameError"));
}
