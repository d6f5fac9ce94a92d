//! CLI integration tests for the kubekit binary
//!
//! Each test lays out a small project in a temporary directory and runs the
//! binary against it with `--project-dir`.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const INVENTORY: &str = r#"
hosts:
  localhost: {}
groups:
  nodes:
    hosts: [localhost]
"#;

const SITE: &str = r#"
- name: site
  hosts: nodes
  tasks:
    - name: greet
      tags: [greet]
      debug:
        msg: "hello {{ inventory_hostname }}"
    - name: inspect
      tags: [inspect]
      debug:
        var: inventory_hostname
"#;

fn write(root: &Path, path: &str, content: &str) {
    let path = root.join(path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn project(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "inventory.yaml", INVENTORY);
    for (path, content) in files {
        write(dir.path(), path, content);
    }
    dir
}

fn kubekit(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("kubekit").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("KUBEKIT_CONFIG")
        .env_remove("KUBEKIT_INVENTORY")
        .env_remove("RUST_LOG")
        .arg("--project-dir")
        .arg(dir.path());
    cmd
}

fn inventory(dir: &TempDir) -> String {
    dir.path().join("inventory.yaml").display().to_string()
}

#[test]
fn test_help() {
    Command::cargo_bin("kubekit")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("compile"))
        .stdout(predicate::str::contains("check"))
        .stdout(predicate::str::contains("run"));
}

#[test]
fn test_compile_prints_yaml_records() {
    let dir = project(&[("site.yaml", SITE)]);
    kubekit(&dir)
        .args(["compile", "site.yaml", "-i", &inventory(&dir)])
        .assert()
        .success()
        .stdout(predicate::str::contains("name: greet"))
        .stdout(predicate::str::contains("name: inspect"))
        .stdout(predicate::str::contains("kubekit.io/sequence"));
}

#[test]
fn test_compile_json_honors_tags() {
    let dir = project(&[("site.yaml", SITE)]);
    let output = kubekit(&dir)
        .args([
            "compile",
            "site.yaml",
            "-i",
            &inventory(&dir),
            "--tags",
            "inspect",
            "--format",
            "json",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());

    let records: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let records = records.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["spec"]["name"], "inspect");
    assert_eq!(records[0]["spec"]["hosts"], serde_json::json!(["localhost"]));
}

#[test]
fn test_check_reports_counts() {
    let dir = project(&[("site.yaml", SITE)]);
    kubekit(&dir)
        .args(["check", "site.yaml", "-i", &inventory(&dir)])
        .assert()
        .success()
        .stdout(predicate::str::contains("site.yaml: ok (2 tasks, 1 hosts)"));
}

#[test]
fn test_compile_error_exit_code() {
    let dir = project(&[(
        "site.yaml",
        "- name: site\n  hosts: nodes\n  tasks:\n    - name: empty\n      vars: {a: 1}\n",
    )]);
    kubekit(&dir)
        .args(["check", "site.yaml", "-i", &inventory(&dir)])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("empty"));
}

#[test]
fn test_missing_playbook_and_inventory() {
    let dir = project(&[("site.yaml", SITE)]);
    kubekit(&dir)
        .args(["check", "absent.yaml", "-i", &inventory(&dir)])
        .assert()
        .failure()
        .stderr(predicate::str::contains("absent.yaml"));

    kubekit(&dir)
        .args(["check", "site.yaml", "-i", "no-such-inventory.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load inventory"));
}

#[test]
fn test_inventory_is_required() {
    let dir = project(&[("site.yaml", SITE)]);
    kubekit(&dir)
        .args(["check", "site.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--inventory"));
}

#[test]
fn test_run_locally() {
    let dir = project(&[("site.yaml", SITE)]);
    kubekit(&dir)
        .args(["run", "site.yaml", "-i", &inventory(&dir)])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("Succeeded"))
        .stdout(predicate::str::contains("total=2 success=2"));
}

#[test]
fn test_run_failure_exit_code() {
    let dir = project(&[(
        "site.yaml",
        "- hosts: nodes\n  tasks:\n    - name: fails\n      command: \"false\"\n",
    )]);
    kubekit(&dir)
        .args(["run", "site.yaml", "-i", &inventory(&dir)])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("Failed"));
}

#[test]
fn test_run_executes_rescue_and_always_after_failure() {
    let dir = project(&[]);
    let rescued = dir.path().join("rescued.marker");
    let cleaned = dir.path().join("always.marker");
    let site = format!(
        r#"
- hosts: nodes
  tasks:
    - name: guarded
      block:
        - name: body
          command: "false"
      rescue:
        - name: recover
          command: touch {}
      always:
        - name: cleanup
          command: touch {}
"#,
        rescued.display(),
        cleaned.display()
    );
    write(dir.path(), "site.yaml", &site);

    kubekit(&dir)
        .args(["run", "site.yaml", "-i", &inventory(&dir)])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("Pending").not());
    assert!(rescued.exists());
    assert!(cleaned.exists());
}
