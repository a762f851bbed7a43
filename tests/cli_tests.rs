use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const PROGRAM: &str = r#"
export default async function collect() {
  return [
    { title: "Release notes", url: "https://example.com/releases/1" },
    { title: "Roadmap", url: "https://example.com/roadmap" },
  ];
}
"#;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("harvest").unwrap();
        cmd.env("HARVEST_DB_PATH", self.dir.path().join("test.db"))
            .env("HARVEST_LOG", "off");
        cmd
    }

    fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    /// Subscription 1 with source 1 registered from `PROGRAM`.
    fn with_source(self) -> Self {
        let program = self.write("blog.js", PROGRAM);
        self.cmd()
            .args(["subscribe", "--name", "Rust", "--criteria", "release"])
            .assert()
            .success();
        self.cmd()
            .args(["add", "--subscription", "1", "--schedule", "*/30 * * * *", "--file"])
            .arg(&program)
            .assert()
            .success()
            .stdout(predicate::str::contains("Source added: blog (id 1)"));
        self
    }
}

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("harvest")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("daemon"))
        .stdout(predicate::str::contains("check"))
        .stdout(predicate::str::contains("notifications"));
}

#[test]
fn test_list_empty() {
    Workspace::new()
        .cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No sources configured."));
}

#[test]
fn test_add_then_list() {
    let ws = Workspace::new().with_source();

    ws.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("1. blog [active]"))
        .stdout(predicate::str::contains("Schedule: */30 * * * *"));
}

#[test]
fn test_add_rejects_bad_schedule() {
    let ws = Workspace::new();
    let program = ws.write("blog.js", PROGRAM);
    ws.cmd()
        .args(["subscribe", "--name", "Rust"])
        .assert()
        .success();

    ws.cmd()
        .args(["add", "--subscription", "1", "--schedule", "every day", "--file"])
        .arg(&program)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid schedule expression"));
}

#[test]
fn test_add_rejects_unknown_subscription() {
    let ws = Workspace::new();
    let program = ws.write("blog.js", PROGRAM);

    ws.cmd()
        .args(["add", "--subscription", "9", "--schedule", "0 * * * *", "--file"])
        .arg(&program)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Subscription not found: 9"));
}

#[test]
fn test_disable_and_enable() {
    let ws = Workspace::new().with_source();

    ws.cmd()
        .args(["disable", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Source 1 disabled"));
    ws.cmd()
        .arg("list")
        .assert()
        .stdout(predicate::str::contains("[disabled]"));

    ws.cmd()
        .args(["enable", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Source 1 enabled"));
}

#[test]
fn test_run_collects_and_deduplicates() {
    let ws = Workspace::new().with_source();

    ws.cmd()
        .args(["run", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Collected 2 new items (0 already seen)."));

    ws.cmd()
        .args(["run", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Collected 0 new items (2 already seen)."));

    ws.cmd()
        .args(["items", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("* Release notes"))
        .stdout(predicate::str::contains("https://example.com/roadmap"));

    ws.cmd()
        .arg("notifications")
        .assert()
        .success()
        .stdout(predicate::str::contains("[cards_collected] blog collected 2 new items"));
}

#[test]
fn test_run_unknown_source_fails() {
    Workspace::new()
        .cmd()
        .args(["run", "42"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Source not found: 42"));
}

#[test]
fn test_remove_source() {
    let ws = Workspace::new().with_source();

    ws.cmd()
        .args(["remove", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed: blog"));
    ws.cmd()
        .arg("list")
        .assert()
        .stdout(predicate::str::contains("No sources configured."));
}

#[test]
fn test_check_accepts_and_rejects() {
    let ws = Workspace::new();
    let good = ws.write("good.js", PROGRAM);
    let bad = ws.write(
        "bad.js",
        "export default async function collect() { return require('fs'); }",
    );

    ws.cmd()
        .arg("check")
        .arg(&good)
        .assert()
        .success()
        .stdout(predicate::str::contains("Program OK"));

    ws.cmd()
        .arg("check")
        .arg(&bad)
        .assert()
        .failure()
        .stderr(predicate::str::contains("[Safety]"));
}

#[test]
fn test_exec_prints_items_without_storing() {
    let ws = Workspace::new();
    let program = ws.write("blog.js", PROGRAM);

    ws.cmd()
        .arg("exec")
        .arg(&program)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"title\": \"Release notes\""));

    ws.cmd()
        .arg("notifications")
        .assert()
        .success()
        .stdout(predicate::str::contains("No notifications."));
}
