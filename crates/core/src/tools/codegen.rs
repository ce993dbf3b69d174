//! # External Code Generator
//!
//! Delegate-mode roles hand their whole task to an external coding process.
//! The process receives the composed prompt on stdin, runs inside the
//! session's working directory and is killed when its deadline passes.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Output substituted when the process printed nothing useful
pub const EMPTY_OUTPUT: &str = "(Code generator returned empty output)";

/// Default cap on output shown inside a conversation
pub const DISPLAY_LIMIT: usize = 4000;

#[derive(Debug, Error)]
pub enum CodeGenError {
    #[error("code generator timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("code generator '{0}' not found in PATH")]
    NotFound(String),
    #[error("working directory does not exist: {0:?}")]
    MissingWorkingDir(PathBuf),
    #[error("not a directory: {0:?}")]
    NotADirectory(PathBuf),
    #[error("code generator I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Raw process result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CodeGenOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
}

impl CodeGenOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Text for the task result: the extracted result, stderr appended on
    /// failure, or [`EMPTY_OUTPUT`].
    pub fn render(&self) -> String {
        let mut text = extract_result_text(&self.stdout);
        let err = self.stderr.trim();
        if !self.success() && !err.is_empty() {
            if text.is_empty() {
                text = format!("[stderr]\n{}", err);
            } else {
                text.push_str(&format!("\n\n[stderr]\n{}", err));
            }
        }
        if text.is_empty() {
            EMPTY_OUTPUT.to_string()
        } else {
            text
        }
    }
}

/// Prefer a `result` or `content` field when stdout is a JSON object.
/// Anything else is returned trimmed, as-is.
pub fn extract_result_text(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
        for field in ["result", "content"] {
            match map.get(field) {
                Some(Value::String(s)) => return s.trim().to_string(),
                Some(other) if !other.is_null() => return other.to_string(),
                _ => {}
            }
        }
    }
    trimmed.to_string()
}

/// Cut `text` to `max_chars` characters, noting the original length
pub fn truncate_output(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{}\n\n... (truncated, {} characters total)", kept, total)
}

/// Runs a coding task in a working directory
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn execute(
        &self,
        prompt: &str,
        working_dir: &Path,
        timeout: Duration,
    ) -> Result<CodeGenOutput, CodeGenError>;
}

/// Program and arguments of the external coding CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeGenCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for CodeGenCommand {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            args: vec![
                "--print".to_string(),
                "--output-format".to_string(),
                "json".to_string(),
            ],
        }
    }
}

/// [`CodeGenerator`] backed by a subprocess
#[derive(Debug, Clone, Default)]
pub struct CliCodeGenerator {
    command: CodeGenCommand,
}

impl CliCodeGenerator {
    pub fn new(command: CodeGenCommand) -> Self {
        Self { command }
    }
}

#[async_trait]
impl CodeGenerator for CliCodeGenerator {
    #[tracing::instrument(skip(self, prompt), fields(program = %self.command.program))]
    async fn execute(
        &self,
        prompt: &str,
        working_dir: &Path,
        timeout: Duration,
    ) -> Result<CodeGenOutput, CodeGenError> {
        if !working_dir.exists() {
            return Err(CodeGenError::MissingWorkingDir(working_dir.to_path_buf()));
        }
        if !working_dir.is_dir() {
            return Err(CodeGenError::NotADirectory(working_dir.to_path_buf()));
        }

        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args)
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CodeGenError::NotFound(self.command.program.clone())
            } else {
                CodeGenError::Io(e)
            }
        })?;

        // Feed stdin concurrently so a chatty child cannot block on a full pipe
        if let Some(mut stdin) = child.stdin.take() {
            let prompt = prompt.to_string();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                    tracing::warn!(error = %e, "failed to write prompt to code generator");
                }
                let _ = stdin.shutdown().await;
            });
        }

        tracing::info!(dir = ?working_dir, "code generator started");
        // Dropping the child on timeout kills it
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(timeout_secs = timeout.as_secs(), "code generator timed out");
                return Err(CodeGenError::Timeout(timeout));
            }
        };

        let result = CodeGenOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        };
        tracing::info!(exit_code = ?result.exit_code, bytes = result.stdout.len(), "code generator finished");
        Ok(result)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records prompts and replays a fixed outcome
    pub(crate) struct FakeCodeGenerator {
        pub(crate) outcome: Mutex<Option<Result<CodeGenOutput, CodeGenError>>>,
        pub(crate) prompts: Mutex<Vec<String>>,
        pub(crate) hang: bool,
    }

    impl FakeCodeGenerator {
        pub(crate) fn replying(stdout: &str, stderr: &str, exit_code: i32) -> Self {
            Self {
                outcome: Mutex::new(Some(Ok(CodeGenOutput {
                    stdout: stdout.to_string(),
                    stderr: stderr.to_string(),
                    exit_code: Some(exit_code),
                }))),
                prompts: Mutex::new(Vec::new()),
                hang: false,
            }
        }

        pub(crate) fn hanging() -> Self {
            Self {
                outcome: Mutex::new(None),
                prompts: Mutex::new(Vec::new()),
                hang: true,
            }
        }
    }

    #[async_trait]
    impl CodeGenerator for FakeCodeGenerator {
        async fn execute(
            &self,
            prompt: &str,
            _working_dir: &Path,
            timeout: Duration,
        ) -> Result<CodeGenOutput, CodeGenError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if self.hang {
                tokio::time::sleep(timeout).await;
                return Err(CodeGenError::Timeout(timeout));
            }
            self.outcome
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Ok(CodeGenOutput::default()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_prefers_result_then_content() {
        assert_eq!(extract_result_text(r#"{"result": " done "}"#), "done");
        assert_eq!(extract_result_text(r#"{"content": "body"}"#), "body");
        assert_eq!(extract_result_text(r#"{"other": 1}"#), r#"{"other": 1}"#);
        assert_eq!(extract_result_text("plain text\n"), "plain text");
        assert_eq!(extract_result_text("[1, 2]"), "[1, 2]");
    }

    #[test]
    fn test_render_appends_stderr_on_failure() {
        let failed = CodeGenOutput {
            stdout: "partial work".into(),
            stderr: "compile error".into(),
            exit_code: Some(1),
        };
        assert_eq!(failed.render(), "partial work\n\n[stderr]\ncompile error");

        let ok_with_noise = CodeGenOutput {
            stdout: "all good".into(),
            stderr: "warning".into(),
            exit_code: Some(0),
        };
        assert_eq!(ok_with_noise.render(), "all good");

        assert_eq!(CodeGenOutput::default().render(), EMPTY_OUTPUT);
    }

    #[test]
    fn test_truncate_output() {
        assert_eq!(truncate_output("short", 10), "short");
        let long = "é".repeat(12);
        let cut = truncate_output(&long, 10);
        assert!(cut.starts_with(&"é".repeat(10)));
        assert!(cut.ends_with("(truncated, 12 characters total)"));
    }

    #[tokio::test]
    async fn test_missing_working_dir() {
        let generator = CliCodeGenerator::default();
        let err = generator
            .execute("x", Path::new("/no/such/dir"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CodeGenError::MissingWorkingDir(_)));
    }

    #[tokio::test]
    async fn test_binary_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let generator = CliCodeGenerator::new(CodeGenCommand {
            program: "hive-test-no-such-binary".into(),
            args: Vec::new(),
        });
        let err = generator
            .execute("x", dir.path(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CodeGenError::NotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_prompt_goes_to_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let generator = CliCodeGenerator::new(CodeGenCommand {
            program: "cat".into(),
            args: Vec::new(),
        });
        let output = generator
            .execute("hello from stdin", dir.path(), Duration::from_secs(10))
            .await
            .unwrap();
        assert!(output.success());
        assert_eq!(output.render(), "hello from stdin");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let generator = CliCodeGenerator::new(CodeGenCommand {
            program: "sleep".into(),
            args: vec!["30".into()],
        });
        let err = generator
            .execute("", dir.path(), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, CodeGenError::Timeout(_)));
    }
}
