//! Integration tests for CLI commands.
//!
//! Each test runs the real binary against CIL sources written to a
//! temporary directory.

#![allow(deprecated)] // Command::cargo_bin is deprecated but replacement requires newer assert_cmd

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const POLICY: &str = "\
(class file (read write))
(classorder (file))
(sid kernel)
(sidorder (kernel))
(sensitivity s0)
(sensitivityorder (s0))
(user u)
(role r)
(type t)
(userrole u r)
(roletype r t)
(userlevel u (s0))
(userrange u ((s0) (s0)))
(sidcontext kernel (u r t ((s0) (s0))))
(allow t t (file (read)))
(filecon \"/usr(/.*)?\" any (u r t ((s0) (s0))))
";

fn secilc(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("secilc").unwrap();
    cmd.current_dir(dir.path()).env("NO_COLOR", "1");
    cmd
}

fn write_policy(dir: &TempDir, extra: &str) -> PathBuf {
    let path = dir.path().join("policy.cil");
    fs::write(&path, format!("{POLICY}{extra}")).unwrap();
    path
}

// ============================================================================
// Compile
// ============================================================================

#[test]
fn compile_writes_default_outputs() {
    let temp = TempDir::new().unwrap();
    write_policy(&temp, "");

    secilc(&temp)
        .args(["compile", "policy.cil"])
        .assert()
        .success()
        .stdout(predicate::str::contains("policy.33"));

    assert!(temp.path().join("policy.33").is_file());
    let fc = fs::read_to_string(temp.path().join("file_contexts")).unwrap();
    assert_eq!(fc, "/usr(/.*)?\tu:r:t\n");
}

#[test]
fn compile_honors_output_paths_and_version() {
    let temp = TempDir::new().unwrap();
    write_policy(&temp, "");

    secilc(&temp)
        .args(["compile", "policy.cil", "-c", "30", "-o", "out/kernel.bin", "-f", "out/fc"])
        .assert()
        .success();

    assert!(temp.path().join("out/fc").is_file());
    secilc(&temp)
        .args(["info", "out/kernel.bin", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"version\": 30"))
        .stdout(predicate::str::contains("\"target\": \"SE Linux\""));
}

#[test]
fn compile_mls_flag_is_recorded_in_header() {
    let temp = TempDir::new().unwrap();
    write_policy(&temp, "");

    secilc(&temp)
        .args(["compile", "policy.cil", "-M", "true", "-U", "reject", "-o", "mls.bin"])
        .assert()
        .success();

    secilc(&temp)
        .args(["info", "mls.bin", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"mls\": true"))
        .stdout(predicate::str::contains("\"handle_unknown\": \"reject\""));
}

#[test]
fn failed_file_contexts_write_leaves_no_policy() {
    let temp = TempDir::new().unwrap();
    write_policy(&temp, "");
    fs::create_dir(temp.path().join("fc_dir")).unwrap();

    secilc(&temp)
        .args(["compile", "policy.cil", "-f", "fc_dir"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to write fc_dir"));
    assert!(!temp.path().join("policy.33").exists());

    secilc(&temp)
        .args(["compile", "policy.cil", "-f", "policy.cil/file_contexts"])
        .assert()
        .failure();
    assert!(!temp.path().join("policy.33").exists());
    let leftovers: Vec<_> = fs::read_dir(temp.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .filter(|name| name != "policy.cil" && name != "fc_dir")
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

#[test]
fn compile_rejects_unsupported_version() {
    let temp = TempDir::new().unwrap();
    write_policy(&temp, "");

    secilc(&temp)
        .args(["compile", "policy.cil", "-c", "12"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("24..=33"));
}

#[test]
fn compile_requires_input_files() {
    let temp = TempDir::new().unwrap();
    secilc(&temp)
        .arg("compile")
        .assert()
        .failure()
        .stderr(predicate::str::contains("required"));
}

#[test]
fn compile_reports_missing_file() {
    let temp = TempDir::new().unwrap();
    secilc(&temp)
        .args(["compile", "absent.cil"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("absent.cil"));
}

// ============================================================================
// Check
// ============================================================================

#[test]
fn check_accepts_valid_policy() {
    let temp = TempDir::new().unwrap();
    write_policy(&temp, "");

    secilc(&temp)
        .args(["check", "policy.cil"])
        .assert()
        .success()
        .stdout(predicate::str::contains("passed all checks"));
    assert!(!temp.path().join("policy.33").exists());
}

#[test]
fn check_reports_unresolved_names_with_location() {
    let temp = TempDir::new().unwrap();
    write_policy(&temp, "(allow t t (fiel (read)))\n");

    let line = POLICY.lines().count() + 1;
    secilc(&temp)
        .args(["check", "policy.cil"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(format!(
            "Failed to resolve class fiel in allow statement at policy.cil:{line}"
        )));
}

#[test]
fn neverallow_violation_can_be_disabled() {
    let temp = TempDir::new().unwrap();
    write_policy(&temp, "(neverallow t t (file (read)))\n");

    secilc(&temp)
        .args(["check", "policy.cil"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("neverallow check failed"));

    secilc(&temp).args(["check", "policy.cil", "-N"]).assert().success();
}

#[test]
fn verbose_shows_warnings() {
    let temp = TempDir::new().unwrap();
    write_policy(&temp, "(typetransition t t file t)\n(typetransition t t file t)\n");

    secilc(&temp)
        .args(["check", "policy.cil"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Duplicate").not());

    secilc(&temp)
        .args(["-v", "check", "policy.cil"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Duplicate typetransition rule"));
}

// ============================================================================
// Info and Stats
// ============================================================================

#[test]
fn info_rejects_non_policy_files() {
    let temp = TempDir::new().unwrap();
    let path = write_policy(&temp, "");

    secilc(&temp)
        .arg("info")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("is not a binary policy"));
}

#[test]
fn info_text_shows_header() {
    let temp = TempDir::new().unwrap();
    write_policy(&temp, "");
    secilc(&temp).args(["compile", "policy.cil"]).assert().success();

    secilc(&temp)
        .args(["info", "policy.33"])
        .assert()
        .success()
        .stdout(predicate::str::contains("SE Linux"))
        .stdout(predicate::str::contains("Handle unknown"));
}

#[test]
fn stats_reports_counts_as_json() {
    let temp = TempDir::new().unwrap();
    write_policy(&temp, "");

    secilc(&temp)
        .args(["stats", "policy.cil", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"av_rules\": 1"))
        .stdout(predicate::str::contains("\"types\": 1"));
}

// ============================================================================
// Config and Version
// ============================================================================

#[test]
fn config_show_reads_project_file() {
    let temp = TempDir::new().unwrap();
    fs::write(
        temp.path().join("secilc.toml"),
        "[compiler]\npolicy_version = 31\ntarget = \"xen\"\n",
    )
    .unwrap();

    secilc(&temp)
        .args(["config", "show", "--format", "toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("policy_version = 31"))
        .stdout(predicate::str::contains("target = \"xen\""));
}

#[test]
fn config_show_applies_environment() {
    let temp = TempDir::new().unwrap();

    secilc(&temp)
        .args(["config", "show", "--format", "json"])
        .env("SECILC_COMPILER__POLICY_VERSION", "30")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"policy_version\": 30"));
}

#[test]
fn config_show_text_lists_sections() {
    let temp = TempDir::new().unwrap();

    secilc(&temp)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Compiler:"))
        .stdout(predicate::str::contains("Policy file:"));
}

#[test]
fn project_config_drives_compile() {
    let temp = TempDir::new().unwrap();
    write_policy(&temp, "");
    fs::write(
        temp.path().join("secilc.toml"),
        "[compiler]\npolicy_version = 29\n\n[output]\npolicy_file = \"build/policy\"\n",
    )
    .unwrap();

    secilc(&temp).args(["compile", "policy.cil"]).assert().success();
    secilc(&temp)
        .args(["info", "build/policy", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"version\": 29"));
}

#[test]
fn version_command_succeeds() {
    let temp = TempDir::new().unwrap();
    secilc(&temp)
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("Policy versions: 24-33"));
}

#[test]
fn version_flag_shows_version() {
    let temp = TempDir::new().unwrap();
    secilc(&temp)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("secilc"));
}

#[test]
fn help_flag_shows_usage() {
    let temp = TempDir::new().unwrap();
    secilc(&temp)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Common Intermediate Language"));
}
