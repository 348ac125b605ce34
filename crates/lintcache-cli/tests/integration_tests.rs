use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn lintcache_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("lintcache"))
}

fn write(root: &Path, name: &str, text: &str) {
    let path = root.join(name);
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).unwrap();
    }
    fs::write(path, text).unwrap();
}

/// a.ts imports b.ts; c.ts has a trailing-whitespace finding
fn project() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.ts", "import \"./b\"\nexport const a = 1\n");
    write(dir.path(), "b.ts", "export const b = 2\n");
    write(dir.path(), "c.ts", "export const c = 3 \n");
    dir
}

fn check(dir: &Path) -> assert_cmd::assert::Assert {
    lintcache_cmd().arg("check").arg(dir).assert()
}

#[test]
fn test_clean_project_succeeds() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.ts", "export const a = 1\n");

    check(dir.path())
        .success()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("checked 1 files (0 cached, 1 analyzed): 0 findings"));
}

#[test]
fn test_findings_fail_the_check() {
    let dir = project();

    check(dir.path())
        .code(1)
        .stdout(predicate::str::contains("c.ts:1: no-trailing-whitespace"));
}

#[test]
fn test_second_run_uses_cache() {
    let dir = project();

    check(dir.path())
        .code(1)
        .stderr(predicate::str::contains("(0 cached, 3 analyzed)"));
    assert!(dir.path().join(".lintcache/lintcache.yaml.state").is_file());

    // results come back from the cache, findings included
    check(dir.path())
        .code(1)
        .stderr(predicate::str::contains("(3 cached, 0 analyzed)"))
        .stdout(predicate::str::contains("c.ts:1: no-trailing-whitespace"));
}

#[test]
fn test_changed_dependency_invalidates_importer() {
    let dir = project();
    check(dir.path()).code(1);

    write(dir.path(), "b.ts", "export const b = 20\n");
    check(dir.path())
        .code(1)
        .stderr(predicate::str::contains("(1 cached, 2 analyzed)"));
}

#[test]
fn test_no_cache_leaves_no_state() {
    let dir = project();

    lintcache_cmd()
        .args(["check", "--no-cache"])
        .arg(dir.path())
        .assert()
        .code(1);
    assert!(!dir.path().join(".lintcache").exists());
}

#[test]
fn test_config_change_invalidates_results() {
    let dir = project();
    check(dir.path()).code(1);

    write(dir.path(), "lintcache.yaml", "max_line_length: 10\n");
    check(dir.path())
        .code(1)
        .stderr(predicate::str::contains("(0 cached, 3 analyzed)"))
        .stdout(predicate::str::contains("a.ts:2: max-line-length"));
}

#[test]
fn test_case_sensitivity_change_keeps_cache() {
    let dir = project();
    check(dir.path()).code(1);

    write(dir.path(), "lintcache.yaml", "case_sensitive: false\n");
    check(dir.path())
        .code(1)
        .stderr(predicate::str::contains("(3 cached, 0 analyzed)"));
}

#[test]
fn test_json_output() {
    let dir = project();

    let output = lintcache_cmd()
        .args(["check", "--format", "json"])
        .arg(dir.path())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["checked"], 3);
    let files = report["files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["file"], "c.ts");
    assert_eq!(files[0]["findings"][0]["rule"], "no-trailing-whitespace");
}

#[test]
fn test_parallel_matches_sequential() {
    let dir = project();
    let sequential = lintcache_cmd()
        .args(["check", "--no-cache"])
        .arg(dir.path())
        .output()
        .unwrap();
    let parallel = lintcache_cmd()
        .args(["check", "--no-cache", "--parallel"])
        .arg(dir.path())
        .output()
        .unwrap();
    assert_eq!(sequential.stdout, parallel.stdout);
}

#[test]
fn test_state_and_clean() {
    let dir = project();

    lintcache_cmd()
        .arg("state")
        .arg(dir.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("No usable cache state"));

    check(dir.path()).code(1);
    lintcache_cmd()
        .arg("state")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"environmentMarker\""))
        .stdout(predicate::str::contains("\"a.ts\""));

    lintcache_cmd()
        .arg("clean")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed"));
    assert!(!dir.path().join(".lintcache").exists());
}

#[test]
fn test_missing_directory_is_error() {
    lintcache_cmd()
        .args(["check", "/nonexistent/lintcache-project"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Cannot open project directory"));
}
