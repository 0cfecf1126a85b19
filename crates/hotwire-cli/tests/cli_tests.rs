//! Integration tests for the `hotwire` binary against a temporary plugin root.

#![allow(deprecated)]

use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::contains;
use std::fs;
use std::path::Path;
use tempfile::{TempDir, tempdir};

const PING: &str = r#"
fn register(r) {
    r.plugin("Ping", 10)
        .handle("^ping$", "ping")
        .handle("^secret$", #{ handler: "secret", owner_only: true })
        .web_page(#{ path: "/ping", menu_name: "Ping board" });
}
fn ping(event) { event.reply("pong"); }
fn secret(event) { event.reply(`hello ${event.user_id}`); }
"#;

fn plugin_root() -> TempDir {
    let root = tempdir().expect("tempdir");
    write_plugin(root.path(), "base/ping.rhai", PING);
    root
}

fn write_plugin(root: &Path, rel: &str, source: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().expect("parent")).expect("plugin dir");
    fs::write(path, source).expect("write plugin");
}

fn hotwire(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("hotwire").expect("hotwire bin");
    cmd.arg("--plugin-root").arg(root).env_remove("HOTWIRE_CONFIG");
    cmd
}

#[test]
fn dispatch_prints_replies() {
    let root = plugin_root();
    hotwire(root.path())
        .args(["dispatch", "ping"])
        .assert()
        .success()
        .stdout(contains("pong"))
        .stdout(contains("matched:"));
}

#[test]
fn dispatch_without_match_reports_denials() {
    let root = plugin_root();
    hotwire(root.path())
        .args(["dispatch", "secret", "--user", "mallory"])
        .assert()
        .success()
        .stdout(contains("no handler matched"))
        .stdout(contains("owner only"));
}

#[test]
fn owner_flag_unlocks_owner_only_handlers() {
    let root = plugin_root();
    hotwire(root.path())
        .args(["dispatch", "secret", "--user", "alice", "--owner"])
        .assert()
        .success()
        .stdout(contains("hello alice"));
}

#[test]
fn owner_ids_come_from_the_config_file() {
    let root = plugin_root();
    let config = root.path().join("hotwire.toml");
    fs::write(&config, "owner_ids = [\"alice\"]\nhandler_timeout_ms = 1000\n").unwrap();

    hotwire(root.path())
        .arg("--config")
        .arg(&config)
        .args(["dispatch", "secret", "--user", "alice"])
        .assert()
        .success()
        .stdout(contains("hello alice"));
}

#[test]
fn dispatch_json_report() {
    let root = plugin_root();
    let output = hotwire(root.path())
        .args(["dispatch", "ping", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let text = String::from_utf8(output).unwrap();
    let json_start = text.find('{').expect("json object");
    let value: serde_json::Value = serde_json::from_str(&text[json_start..]).unwrap();
    assert_eq!(value["matched"], true);
    assert_eq!(value["executed"][0]["handler"], "ping");
    assert_eq!(value["replies"][0]["text"], "pong");
}

#[test]
fn list_shows_loaded_files() {
    let root = plugin_root();
    hotwire(root.path())
        .arg("list")
        .assert()
        .success()
        .stdout(contains("base/ping.rhai"))
        .stdout(contains("Ping"))
        .stdout(contains("active"));
}

#[test]
fn list_counts_failed_files() {
    let root = plugin_root();
    write_plugin(root.path(), "base/broken.rhai", "fn register(r) {");
    hotwire(root.path())
        .arg("list")
        .assert()
        .success()
        .stdout(contains("1 file(s) failed to load"));
}

#[test]
fn routes_lists_dashboard_pages() {
    let root = plugin_root();
    hotwire(root.path())
        .arg("routes")
        .assert()
        .success()
        .stdout(contains("/ping"))
        .stdout(contains("Ping board"));
}

#[test]
fn check_reports_declarations() {
    let root = plugin_root();
    hotwire(root.path())
        .arg("check")
        .arg(root.path().join("base/ping.rhai"))
        .assert()
        .success()
        .stdout(contains("^ping$"))
        .stdout(contains("secret"));
}

#[test]
fn check_fails_on_bad_pattern() {
    let root = plugin_root();
    write_plugin(
        root.path(),
        "base/bad.rhai",
        r#"
        fn register(r) { r.plugin("Bad").handle("(oops", "oops"); }
        fn oops(event) { }
        "#,
    );
    hotwire(root.path())
        .arg("check")
        .arg(root.path().join("base/bad.rhai"))
        .assert()
        .failure()
        .stdout(contains("invalid pattern"))
        .stderr(contains("would be rejected"));
}

#[test]
fn check_fails_on_syntax_error() {
    let root = plugin_root();
    write_plugin(root.path(), "base/broken.rhai", "fn register(r) {");
    hotwire(root.path())
        .arg("check")
        .arg(root.path().join("base/broken.rhai"))
        .assert()
        .failure()
        .stderr(contains("failed to load"));
}

#[test]
fn run_serves_stdin_lines() {
    let root = plugin_root();
    hotwire(root.path())
        .arg("run")
        .write_stdin("alice: ping\nbob@g1: nothing here\n")
        .assert()
        .success()
        .stdout(contains("pong"))
        .stdout(contains("(no match)"));
}

#[test]
fn show_logs_echoes_framework_messages() {
    let root = plugin_root();
    hotwire(root.path())
        .args(["--show-logs", "dispatch", "ping"])
        .assert()
        .success()
        .stdout(contains("[framework]"))
        .stdout(contains("loaded: base/ping.rhai"))
        .stdout(contains("[plugin]").and(contains("pong")));
}
