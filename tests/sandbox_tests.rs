//! Wire-protocol behavior against real subprocesses.
//!
//! Each test stands in a small shell script for the runner executable,
//! which keeps the full spawn/stdin/timeout/kill path honest without
//! needing a language runtime installed.

#![cfg(unix)]

use serde_json::json;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use lumen::binding::{BindingSource, Runner, ToolBinding};
use lumen::error::EngineError;
use lumen::{SubprocessWorker, WorkerProcess};

fn script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("runner.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn binding(timeout_seconds: u64) -> ToolBinding {
    ToolBinding {
        tool: "fetch_page".to_string(),
        runner: Runner::Python,
        entry: "tools.fetch".to_string(),
        timeout_seconds,
        source: BindingSource::Project,
    }
}

fn worker(dir: &Path, body: &str) -> SubprocessWorker {
    let command = script(dir, body);
    SubprocessWorker::new(dir, dir.join("runners")).with_command(command)
}

#[test]
fn successful_response_unwraps_result() {
    let dir = tempfile::tempdir().unwrap();
    let worker = worker(
        dir.path(),
        r#"cat > /dev/null; echo '{"ok": true, "result": {"body": "hello"}}'"#,
    );
    let result = worker.run(&binding(5), &json!({"url": "x"})).unwrap();
    assert_eq!(result, json!({"body": "hello"}));
}

#[test]
fn request_arrives_on_stdin_with_protocol_fields() {
    let dir = tempfile::tempdir().unwrap();
    // Echo the request back as the result payload.
    let worker = worker(
        dir.path(),
        r#"req=$(cat); printf '{"ok": true, "result": %s}' "$req""#,
    );
    let result = worker.run(&binding(5), &json!({"url": "x"})).unwrap();
    assert_eq!(result["protocol_version"], json!(1));
    assert_eq!(result["tool"], json!("fetch_page"));
    assert_eq!(result["entry"], json!("tools.fetch"));
    assert_eq!(result["payload"]["url"], json!("x"));
}

#[test]
fn tool_error_is_typed() {
    let dir = tempfile::tempdir().unwrap();
    let worker = worker(
        dir.path(),
        r#"cat > /dev/null; echo '{"ok": false, "error": {"type": "value_error", "message": "bad input"}}'"#,
    );
    let err = worker.run(&binding(5), &json!({})).unwrap_err();
    match err {
        EngineError::ToolFailed {
            error_type, message, ..
        } => {
            assert_eq!(error_type, "value_error");
            assert_eq!(message, "bad input");
        }
        other => panic!("expected tool failure, got {other}"),
    }
}

#[test]
fn garbage_output_is_a_process_error() {
    let dir = tempfile::tempdir().unwrap();
    let worker = worker(dir.path(), r#"cat > /dev/null; echo 'Segmentation fault'"#);
    let err = worker.run(&binding(5), &json!({})).unwrap_err();
    assert!(matches!(err, EngineError::ToolProcess { .. }));
}

#[test]
fn nonzero_exit_with_no_output_reports_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let worker = worker(dir.path(), r#"cat > /dev/null; echo 'module not found' >&2; exit 3"#);
    let err = worker.run(&binding(5), &json!({})).unwrap_err();
    assert!(err.to_string().contains("module not found"));
}

#[test]
fn timeout_kills_the_process() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("still-alive");
    let worker = worker(
        dir.path(),
        &format!(
            "cat > /dev/null; sleep 30; touch {}",
            marker.display()
        ),
    );
    let started = Instant::now();
    let err = worker.run(&binding(1), &json!({})).unwrap_err();
    assert!(matches!(err, EngineError::ToolTimeout { seconds: 1, .. }));
    assert!(err.is_retryable());
    // Killed promptly, well before the sleep would finish.
    assert!(started.elapsed().as_secs() < 10);
    std::thread::sleep(std::time::Duration::from_millis(200));
    assert!(!marker.exists());
}

#[test]
fn large_response_completes_without_timing_out() {
    let dir = tempfile::tempdir().unwrap();
    // A result well past the OS pipe buffer must stream through while
    // the worker waits, not wedge the child until the timeout fires.
    let worker = worker(
        dir.path(),
        r#"cat > /dev/null
printf '{"ok": true, "result": "'
head -c 200000 /dev/zero | tr '\0' 'a'
printf '"}'"#,
    );
    let started = Instant::now();
    let result = worker.run(&binding(3), &json!({})).unwrap();
    let text = result.as_str().expect("string result");
    assert_eq!(text.len(), 200_000);
    assert!(text.bytes().all(|b| b == b'a'));
    assert!(started.elapsed().as_secs() < 3);
}

#[test]
fn each_call_is_a_fresh_process() {
    let dir = tempfile::tempdir().unwrap();
    // A counter file increments per invocation; two calls see two
    // different values, proving state does not persist in the runner.
    let counter = dir.path().join("count");
    std::fs::write(&counter, "0").unwrap();
    let worker = worker(
        dir.path(),
        &format!(
            r#"cat > /dev/null
n=$(cat {path})
n=$((n + 1))
echo "$n" > {path}
printf '{{"ok": true, "result": %s}}' "$n""#,
            path = counter.display()
        ),
    );
    let first = worker.run(&binding(5), &json!({})).unwrap();
    let second = worker.run(&binding(5), &json!({})).unwrap();
    assert_eq!(first, json!(1));
    assert_eq!(second, json!(2));
}

#[test]
fn spawn_failure_is_a_process_error() {
    let dir = tempfile::tempdir().unwrap();
    let worker = SubprocessWorker::new(dir.path(), dir.path().join("runners"))
        .with_command(dir.path().join("does-not-exist"));
    let err = worker.run(&binding(5), &json!({})).unwrap_err();
    match err {
        EngineError::ToolProcess { message, .. } => {
            assert!(message.contains("spawn"), "unexpected message: {message}");
        }
        other => panic!("expected process error, got {other}"),
    }
}
