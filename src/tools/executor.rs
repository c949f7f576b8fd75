//! Tool Executor
//!
//! Subprocess execution for built-in tools: list invocation, timeout, and
//! bounded output capture. Whether a command *may* run is decided before it
//! gets here, by the classifier and enforcer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command as TokioCommand;
use tracing::{debug, info, warn};

/// Default timeout for tool execution in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum output size in bytes (1MB)
const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("empty command")]
    EmptyCommand,

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while running '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result of tool execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether the process exited with status 0
    pub success: bool,

    /// Standard output (truncated if too large)
    pub stdout: String,

    /// Standard error (truncated if too large)
    pub stderr: String,

    /// Exit code (None if the process was killed)
    pub exit_code: Option<i32>,

    pub duration_ms: u64,

    pub timed_out: bool,

    /// Whether either stream was cut at the output limit
    pub truncated: bool,
}

impl ExecutionResult {
    fn timeout(duration_ms: u64) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            duration_ms,
            timed_out: true,
            truncated: false,
        }
    }

    /// Short audit summary, e.g. `exit 0 in 120ms`
    pub fn summary(&self) -> String {
        if self.timed_out {
            format!("timeout after {}ms", self.duration_ms)
        } else {
            match self.exit_code {
                Some(code) => format!("exit {} in {}ms", code, self.duration_ms),
                None => format!("killed after {}ms", self.duration_ms),
            }
        }
    }

    /// stdout, followed by stderr when there is any
    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// Configuration for tool execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Timeout for execution (default: 30 seconds)
    pub timeout: Duration,

    /// Maximum bytes kept per stream (default: 1MB)
    pub max_output_size: usize,

    /// Working directory for command execution (default: current directory)
    pub working_dir: Option<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_output_size: MAX_OUTPUT_SIZE,
            working_dir: None,
        }
    }
}

/// Runs an argv to completion.
///
/// The seam between built-in tools and real processes; tests substitute a
/// recording runner.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, argv: &[String]) -> Result<ExecutionResult, ExecutorError>;
}

/// Runs commands as child processes, never through an implicit shell.
///
/// # Example
///
/// ```ignore
/// let runner = ProcessRunner::new(ExecutorConfig::default());
/// let result = runner.run(&["echo".into(), "hello".into()]).await?;
/// assert_eq!(result.stdout, "hello\n");
/// ```
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    config: ExecutorConfig,
}

impl ProcessRunner {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, argv: &[String]) -> Result<ExecutionResult, ExecutorError> {
        let Some((program, args)) = argv.split_first() else {
            return Err(ExecutorError::EmptyCommand);
        };
        let start = Instant::now();
        info!(program = %program, args = args.len(), "executing command");

        let mut process = TokioCommand::new(program);
        process
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = self.config.working_dir {
            process.current_dir(dir);
        }

        let child = process.spawn().map_err(|source| ExecutorError::Spawn {
            program: program.clone(),
            source,
        })?;

        // Dropping the wait future on timeout drops the child, which kills it
        let output = match tokio::time::timeout(self.config.timeout, child.wait_with_output()).await
        {
            Ok(result) => result.map_err(|source| ExecutorError::Io {
                program: program.clone(),
                source,
            })?,
            Err(_) => {
                warn!(program = %program, timeout = ?self.config.timeout, "command timed out");
                return Ok(ExecutionResult::timeout(elapsed_ms(start)));
            }
        };

        let (stdout, stdout_cut) = truncate_output(
            &String::from_utf8_lossy(&output.stdout),
            self.config.max_output_size,
        );
        let (stderr, stderr_cut) = truncate_output(
            &String::from_utf8_lossy(&output.stderr),
            self.config.max_output_size,
        );

        let result = ExecutionResult {
            success: output.status.success(),
            stdout,
            stderr,
            exit_code: output.status.code(),
            duration_ms: elapsed_ms(start),
            timed_out: false,
            truncated: stdout_cut || stderr_cut,
        };
        if result.success {
            debug!(program = %program, summary = %result.summary(), "command succeeded");
        } else {
            warn!(program = %program, summary = %result.summary(), "command failed");
        }
        Ok(result)
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Cut `s` to at most `max_len` bytes on a char boundary, appending a
/// marker when anything was dropped. Returns whether it was cut.
pub fn truncate_output(s: &str, max_len: usize) -> (String, bool) {
    if s.len() <= max_len {
        return (s.to_string(), false);
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    let dropped = s.len() - end;
    (
        format!("{}\n... [truncated {} bytes]", &s[..end], dropped),
        true,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_execute_echo() {
        let runner = ProcessRunner::default();
        let result = runner.run(&argv(&["echo", "hello world"])).await.unwrap();

        assert!(result.success);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stdout, "hello world\n");
        assert!(!result.timed_out);
        assert!(result.summary().starts_with("exit 0 in"));
    }

    #[tokio::test]
    async fn test_execute_is_not_a_shell() {
        let runner = ProcessRunner::default();
        let result = runner
            .run(&argv(&["echo", "$(whoami)", ";", "ls"]))
            .await
            .unwrap();
        assert_eq!(result.stdout, "$(whoami) ; ls\n");
    }

    #[tokio::test]
    async fn test_execute_nonzero_exit() {
        let runner = ProcessRunner::default();
        let result = runner
            .run(&argv(&["sh", "-c", "echo oops >&2; exit 3"]))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.stderr, "oops\n");
        assert_eq!(result.combined_output(), "oops\n");
    }

    #[tokio::test]
    async fn test_execute_timeout() {
        let runner = ProcessRunner::new(ExecutorConfig {
            timeout: Duration::from_millis(100),
            ..ExecutorConfig::default()
        });
        let result = runner.run(&argv(&["sleep", "5"])).await.unwrap();
        assert!(result.timed_out);
        assert!(!result.success);
        assert_eq!(result.exit_code, None);
        assert!(result.summary().starts_with("timeout after"));
    }

    #[tokio::test]
    async fn test_execute_output_truncated() {
        let runner = ProcessRunner::new(ExecutorConfig {
            max_output_size: 10,
            ..ExecutorConfig::default()
        });
        let result = runner
            .run(&argv(&["sh", "-c", "printf 'abcdefghijklmnopqrstuvwxyz'"]))
            .await
            .unwrap();
        assert!(result.truncated);
        assert!(result.stdout.starts_with("abcdefghij\n... [truncated 16 bytes]"));
    }

    #[tokio::test]
    async fn test_execute_spawn_failure() {
        let runner = ProcessRunner::default();
        let err = runner
            .run(&argv(&["/nonexistent/kubeguard-binary"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_execute_empty_command() {
        let runner = ProcessRunner::default();
        assert!(matches!(
            runner.run(&[]).await.unwrap_err(),
            ExecutorError::EmptyCommand
        ));
    }

    #[tokio::test]
    async fn test_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new(ExecutorConfig {
            working_dir: Some(dir.path().display().to_string()),
            ..ExecutorConfig::default()
        });
        let result = runner.run(&argv(&["pwd"])).await.unwrap();
        let expected = dir.path().canonicalize().unwrap();
        let actual = std::path::PathBuf::from(result.stdout.trim())
            .canonicalize()
            .unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_truncate_output_char_boundary() {
        let (out, cut) = truncate_output("héllo", 2);
        assert!(cut);
        assert!(out.starts_with("h\n"));
        let (out, cut) = truncate_output("short", 100);
        assert!(!cut);
        assert_eq!(out, "short");
    }

    proptest! {
        #[test]
        fn prop_truncate_never_panics(s in ".*", max in 0usize..64) {
            let (out, cut) = truncate_output(&s, max);
            prop_assert_eq!(cut, s.len() > max);
            if !cut {
                prop_assert_eq!(out, s);
            }
        }
    }
}
