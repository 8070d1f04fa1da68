//! Sandboxed tool execution.
//!
//! Each tool call spawns one fresh runner process and speaks a fixed wire
//! protocol: a single JSON request on stdin, a single JSON object with an
//! `ok` discriminator on stdout. Anything else (non-JSON output, a
//! missing discriminator, a non-zero exit with empty stdout) is a
//! process-level error attributed to the runtime, not the tool author.
//! Timeouts kill and reap the child; a tool process is never left running.

use serde::Serialize;
use serde_json::Value;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::debug;
use wait_timeout::ChildExt;

use crate::binding::ToolBinding;
use crate::error::EngineError;

pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize)]
pub struct ToolRequest<'a> {
    pub protocol_version: u32,
    pub tool: &'a str,
    pub entry: &'a str,
    pub payload: &'a Value,
}

/// Narrow seam over "run this tool body somewhere else". The default
/// implementation is a subprocess per call; tests substitute their own.
pub trait WorkerProcess {
    fn run(&self, binding: &ToolBinding, payload: &Value) -> Result<Value, EngineError>;
}

/// Subprocess worker: spawns the binding's runner with a constrained
/// environment whose module search path is limited to the project root
/// plus the engine's own runner support directory.
pub struct SubprocessWorker {
    project_root: PathBuf,
    runners_dir: PathBuf,
    command_override: Option<PathBuf>,
}

impl SubprocessWorker {
    pub fn new(project_root: impl Into<PathBuf>, runners_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            runners_dir: runners_dir.into(),
            command_override: None,
        }
    }

    /// Replace the runner executable; used by tests to stand in a script.
    pub fn with_command(mut self, command: impl Into<PathBuf>) -> Self {
        self.command_override = Some(command.into());
        self
    }

    fn build_command(&self, binding: &ToolBinding) -> Command {
        let mut cmd = match &self.command_override {
            Some(path) => Command::new(path),
            None => Command::new(binding.runner.command()),
        };
        cmd.arg(self.runners_dir.join(binding.runner.harness()))
            .arg(&binding.entry)
            .current_dir(&self.project_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let module_path = format!(
            "{}:{}",
            self.project_root.display(),
            self.runners_dir.display()
        );
        cmd.env_clear()
            .env("PATH", std::env::var("PATH").unwrap_or_default())
            .env("PYTHONPATH", &module_path)
            .env("NODE_PATH", &module_path);
        cmd
    }
}

impl WorkerProcess for SubprocessWorker {
    fn run(&self, binding: &ToolBinding, payload: &Value) -> Result<Value, EngineError> {
        let request = ToolRequest {
            protocol_version: PROTOCOL_VERSION,
            tool: &binding.tool,
            entry: &binding.entry,
            payload,
        };
        let request_json =
            serde_json::to_string(&request).map_err(|e| EngineError::ToolProcess {
                tool: binding.tool.clone(),
                message: format!("could not encode request: {e}"),
            })?;

        debug!(tool = %binding.tool, runner = %binding.runner, "spawning tool process");
        let mut child = self
            .build_command(binding)
            .spawn()
            .map_err(|e| EngineError::ToolProcess {
                tool: binding.tool.clone(),
                message: format!("could not spawn {} runner: {e}", binding.runner),
            })?;

        // The pipes are serviced on their own threads so a response (or
        // request) larger than the OS pipe buffer cannot wedge the child
        // against a full pipe while we wait on it.
        let stdin_pipe = child.stdin.take();
        let writer = std::thread::spawn(move || {
            if let Some(mut stdin) = stdin_pipe {
                // A child that exits before reading stdin closes the pipe;
                // the write error is reported through the exit path below.
                let _ = stdin.write_all(request_json.as_bytes());
            }
        });
        let stdout_pipe = child.stdout.take();
        let stdout_reader = std::thread::spawn(move || drain_pipe(stdout_pipe));
        let stderr_pipe = child.stderr.take();
        let stderr_reader = std::thread::spawn(move || drain_pipe(stderr_pipe));

        let timeout = Duration::from_secs(binding.timeout_seconds);
        match child.wait_timeout(timeout).map_err(EngineError::Io)? {
            Some(status) => {
                let _ = writer.join();
                let stdout = stdout_reader.join().unwrap_or_default();
                let stderr = stderr_reader.join().unwrap_or_default();
                parse_response(
                    &binding.tool,
                    &stdout,
                    status.success(),
                    &stderr,
                    &self.project_root,
                )
            }
            None => {
                let _ = child.kill();
                let _ = child.wait();
                // Killing the child closes its pipe ends, so the helper
                // threads finish on their own.
                let _ = writer.join();
                let _ = stdout_reader.join();
                let _ = stderr_reader.join();
                Err(EngineError::ToolTimeout {
                    tool: binding.tool.clone(),
                    seconds: binding.timeout_seconds,
                })
            }
        }
    }
}

fn drain_pipe<R: Read>(pipe: Option<R>) -> String {
    pipe.map(|mut s| {
        let mut buf = String::new();
        s.read_to_string(&mut buf).ok();
        buf
    })
    .unwrap_or_default()
}

/// Decode one wire response. `ok=true` unwraps `result` (or `output`);
/// `ok=false` unwraps `error.{type,message}` as a tool-author error.
fn parse_response(
    tool: &str,
    stdout: &str,
    exit_success: bool,
    stderr: &str,
    project_root: &Path,
) -> Result<Value, EngineError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        let detail = if exit_success {
            "runner produced no output".to_string()
        } else {
            format!("runner exited with failure: {}", first_line(stderr))
        };
        return Err(EngineError::ToolProcess {
            tool: tool.to_string(),
            message: scrub(&detail, project_root),
        });
    }

    let value: Value = serde_json::from_str(trimmed).map_err(|_| EngineError::ToolProcess {
        tool: tool.to_string(),
        message: "runner produced non-JSON output".to_string(),
    })?;
    let object = value.as_object().ok_or_else(|| EngineError::ToolProcess {
        tool: tool.to_string(),
        message: "runner response was not a JSON object".to_string(),
    })?;
    let ok = object
        .get("ok")
        .and_then(Value::as_bool)
        .ok_or_else(|| EngineError::ToolProcess {
            tool: tool.to_string(),
            message: "runner response is missing the 'ok' field".to_string(),
        })?;

    if ok {
        let result = object
            .get("result")
            .or_else(|| object.get("output"))
            .cloned()
            .unwrap_or(Value::Null);
        return Ok(result);
    }

    match object.get("error").and_then(Value::as_object) {
        Some(error) => {
            let error_type = error
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("tool_error");
            let message = error.get("message").and_then(Value::as_str).unwrap_or("");
            Err(EngineError::ToolFailed {
                tool: tool.to_string(),
                error_type: error_type.to_string(),
                message: scrub(message, project_root),
            })
        }
        None => Err(EngineError::ToolProcess {
            tool: tool.to_string(),
            message: "runner reported failure without an error object".to_string(),
        }),
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("").trim()
}

/// Strip absolute project paths from messages before they can reach a
/// trace or log.
fn scrub(message: &str, project_root: &Path) -> String {
    let root = project_root.display().to_string();
    if root.len() > 1 {
        message.replace(&root, "<project>")
    } else {
        message.to_string()
    }
}
