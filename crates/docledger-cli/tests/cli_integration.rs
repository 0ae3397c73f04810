use std::ffi::OsStr;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;

fn run_cli<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_docledger"))
        .args(args)
        .output()
        .unwrap_or_else(|err| panic!("failed to execute docledger binary: {err}"))
}

fn run_json<I, S>(args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_cli(args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "docledger command failed (status={}):\nstdout:\n{stdout}\nstderr:\n{stderr}",
            output.status
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn db_arg(dir: &Path) -> String {
    dir.join("cli.sqlite3").to_str().unwrap().to_string()
}

#[test]
fn migrate_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let db = db_arg(dir.path());

    let first = run_json(["--db", &db, "migrate"]);
    assert_eq!(first["migrated"], Value::Bool(true));

    let second = run_json(["--db", &db, "migrate"]);
    assert_eq!(second["migrated"], Value::Bool(true));
}

#[test]
fn api_key_add_and_deactivate() {
    let dir = tempfile::tempdir().unwrap();
    let db = db_arg(dir.path());

    let added = run_json([
        "--db", &db, "api-key", "add", "--token", "s3cret", "--tenant", "t1", "--name", "ci",
    ]);
    assert_eq!(added["tenant_id"], Value::String("t1".into()));
    assert_eq!(added["active"], Value::Bool(true));
    // Never the raw token, only its hash.
    let hash = added["token_hash"].as_str().unwrap();
    assert_eq!(hash.len(), 64);
    assert_ne!(hash, "s3cret");

    let deactivated = run_json(["--db", &db, "api-key", "deactivate", "--token", "s3cret"]);
    assert_eq!(deactivated["active"], Value::Bool(false));
}

#[test]
fn record_put_feeds_outbox_and_replay() {
    let dir = tempfile::tempdir().unwrap();
    let db = db_arg(dir.path());

    let put = run_json([
        "--db",
        &db,
        "record",
        "put",
        "--tenant",
        "t1",
        "--collection",
        "users",
        "--id",
        "u1",
        "--data",
        r#"{"name":"A"}"#,
    ]);
    assert_eq!(put["id"], Value::String("u1".into()));
    assert_eq!(put["data"]["name"], Value::String("A".into()));

    run_json([
        "--db",
        &db,
        "record",
        "put",
        "--tenant",
        "t1",
        "--collection",
        "users",
        "--id",
        "u1",
        "--data",
        r#"{"name":"B"}"#,
    ]);

    let stats = run_json(["--db", &db, "outbox", "stats"]);
    assert_eq!(stats["pending"], Value::Number(2.into()));
    assert_eq!(stats["dispatched"], Value::Number(0.into()));
    assert_eq!(stats["total"], Value::Number(2.into()));

    let output = run_cli(["--db", &db, "replay", "--tenant", "t1"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["envelope"]["event_type"], Value::String("record.created".into()));
    assert_eq!(lines[1]["envelope"]["event_type"], Value::String("record.updated".into()));
    assert_eq!(lines[0]["envelope"]["aggregate_version"], Value::Number(1.into()));
    assert_eq!(lines[1]["envelope"]["aggregate_version"], Value::Number(2.into()));
}

#[test]
fn record_delete_reports_missing_rows() {
    let dir = tempfile::tempdir().unwrap();
    let db = db_arg(dir.path());

    let deleted = run_json([
        "--db", &db, "record", "delete", "--tenant", "t1", "--collection", "users", "--id", "ghost",
    ]);
    assert_eq!(deleted["deleted"], Value::Bool(false));
}

#[test]
fn replay_of_unknown_tenant_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let db = db_arg(dir.path());
    run_json(["--db", &db, "migrate"]);

    let output = run_cli(["--db", &db, "replay", "--tenant", "nobody"]);
    assert!(output.status.success());
    assert!(output.stdout.is_empty());
}
