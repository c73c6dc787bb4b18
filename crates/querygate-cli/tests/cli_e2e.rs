#![allow(deprecated)]

use assert_cmd::cargo::cargo_bin;
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn qgate(data: &Path) -> Command {
    let mut cmd = Command::new(cargo_bin("qgate"));
    for var in [
        "RUST_LOG",
        "QUERYGATE_ROUTE_PREFIX",
        "QUERYGATE_PER_PAGE",
        "QUERYGATE_MAX_PER_PAGE",
        "QUERYGATE_CACHE",
    ] {
        cmd.env_remove(var);
    }
    cmd.arg("--data").arg(data);
    cmd
}

fn seed_user(data: &Path) {
    qgate(data)
        .args(["action", "users", "create", "--payload"])
        .arg(r#"{"name": "Ada", "email": "ada@example.com", "password": "hunter2"}"#)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\": 201"))
        .stdout(predicate::str::contains("hunter2").not());
}

#[test]
fn test_routes_lists_every_entity() {
    let temp = TempDir::new().unwrap();
    qgate(&temp.path().join("blog.json"))
        .arg("routes")
        .assert()
        .success()
        .stdout(predicate::str::contains("/query/posts/{id}/publish"))
        .stdout(predicate::str::contains("/query/posts/actions/bulk-publish"))
        .stdout(predicate::str::contains("/query/comments/{id}/mark-spam"));
}

#[test]
fn test_config_template_and_prefix_override() {
    let temp = TempDir::new().unwrap();
    let data = temp.path().join("blog.json");
    qgate(&data)
        .args(["config", "template"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[pagination]"));

    let config = temp.path().join("querygate.toml");
    std::fs::write(&config, "[route]\nprefix = \"api\"\n").unwrap();
    qgate(&data)
        .arg("--config")
        .arg(&config)
        .arg("routes")
        .assert()
        .success()
        .stdout(predicate::str::contains("/api/tags"));
}

#[test]
fn test_writes_persist_between_runs() {
    let temp = TempDir::new().unwrap();
    let data = temp.path().join("blog.json");
    seed_user(&data);
    assert!(data.exists());

    qgate(&data)
        .args(["list", "users", "name[eq]=Ada"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown_filter_field"));

    qgate(&data)
        .args(["--actor", "1", "action", "posts", "create", "--payload"])
        .arg(r#"{"title": "Hello World", "content": "First post"}"#)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"slug\": \"hello-world\""));

    qgate(&data)
        .args(["--actor", "1", "list", "posts", "title[like]=hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Hello World"))
        .stdout(predicate::str::contains("\"version\": \"2025-01-01\""));
}

#[test]
fn test_dry_run_leaves_the_data_file_alone() {
    let temp = TempDir::new().unwrap();
    let data = temp.path().join("blog.json");
    seed_user(&data);
    let before = std::fs::read_to_string(&data).unwrap();

    qgate(&data)
        .args(["action", "tags", "create", "--dry-run", "--payload"])
        .arg(r#"{"name": "Rust", "slug": "rust"}"#)
        .assert()
        .success();
    assert_eq!(std::fs::read_to_string(&data).unwrap(), before);
}

#[test]
fn test_posts_require_an_actor() {
    let temp = TempDir::new().unwrap();
    qgate(&temp.path().join("blog.json"))
        .args(["list", "posts"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("\"code\": \"forbidden\""))
        .stderr(predicate::str::contains("\"status\": 403"));
}

#[test]
fn test_archiving_twice_reports_the_precondition() {
    let temp = TempDir::new().unwrap();
    let data = temp.path().join("blog.json");
    seed_user(&data);
    qgate(&data)
        .args(["--actor", "1", "action", "posts", "create", "--payload"])
        .arg(r#"{"title": "Old news", "content": "..."}"#)
        .assert()
        .success();

    let archive = |data: &Path| {
        let mut cmd = qgate(data);
        cmd.args(["--actor", "1", "action", "posts", "archive", "--id", "1"]);
        cmd
    };
    archive(&data)
        .assert()
        .success()
        .stdout(predicate::str::contains("Post archived successfully"));
    archive(&data)
        .assert()
        .failure()
        .stderr(predicate::str::contains("precondition_failed"))
        .stderr(predicate::str::contains("Post is already archived"));
}

#[test]
fn test_malformed_params_are_rejected() {
    let temp = TempDir::new().unwrap();
    qgate(&temp.path().join("blog.json"))
        .args(["list", "tags", "oops"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected KEY=VALUE"));
}
