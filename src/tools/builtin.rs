//! Built-in tools: `kubectl` (cluster query) and `bash` (shell).
//!
//! Both take `{"command": "<text>"}`. The text is what the classifier sees,
//! so the approval decision is made on exactly what would run.

use crate::approval::parser::{self, Command};
use crate::tools::executor::{CommandRunner, ExecutionResult, ExecutorConfig, ProcessRunner};
use crate::tools::registry::{ToolDefinition, ToolError, ToolOrigin, ToolOutput};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Settings shared by the built-in tools
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinSettings {
    pub kubectl_path: String,
    pub shell: String,
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

impl Default for BuiltinSettings {
    fn default() -> Self {
        Self {
            kubectl_path: "kubectl".to_string(),
            shell: "/bin/sh".to_string(),
            timeout: Duration::from_secs(30),
            max_output_bytes: 1024 * 1024,
        }
    }
}

/// A tool executed in-process by the agent
#[async_trait]
pub trait BuiltinTool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    /// Shell text this invocation would run, if the tool is shell-like.
    fn command_text(&self, arguments: &serde_json::Value) -> Result<Option<String>, ToolError>;

    async fn invoke(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError>;
}

/// The standard built-in tools over a real process runner
pub fn default_builtins(settings: &BuiltinSettings) -> Vec<Arc<dyn BuiltinTool>> {
    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new(ExecutorConfig {
        timeout: settings.timeout,
        max_output_size: settings.max_output_bytes,
        working_dir: None,
    }));
    vec![
        Arc::new(KubectlTool::new(settings.kubectl_path.clone(), runner.clone())),
        Arc::new(BashTool::new(settings.shell.clone(), runner)),
    ]
}

fn command_schema(description: &str) -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "command": {"type": "string", "description": description}
        },
        "required": ["command"]
    })
}

fn command_argument(arguments: &serde_json::Value) -> Result<&str, ToolError> {
    match arguments.get("command") {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Ok(s.trim()),
        Some(serde_json::Value::String(_)) => {
            Err(ToolError::InvalidArguments("'command' is empty".to_string()))
        }
        Some(_) => Err(ToolError::InvalidArguments(
            "'command' must be a string".to_string(),
        )),
        None => Err(ToolError::InvalidArguments(
            "missing 'command' argument".to_string(),
        )),
    }
}

fn into_output(result: ExecutionResult) -> Result<ToolOutput, ToolError> {
    let summary = result.summary();
    if result.timed_out {
        return Err(ToolError::ExecutionFailed(summary));
    }
    if !result.success {
        let output = result.combined_output();
        return Err(ToolError::ExecutionFailed(if output.trim().is_empty() {
            summary
        } else {
            format!("{}: {}", summary, output.trim_end())
        }));
    }
    Ok(ToolOutput {
        content: result.combined_output(),
        summary,
    })
}

/// Runs a single `kubectl` invocation without a shell.
pub struct KubectlTool {
    path: String,
    runner: Arc<dyn CommandRunner>,
}

impl KubectlTool {
    pub fn new(path: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            path: path.into(),
            runner,
        }
    }

    /// Full command line, with a leading `kubectl` added when missing.
    fn full_command(arguments: &serde_json::Value) -> Result<String, ToolError> {
        let command = command_argument(arguments)?;
        if command == "kubectl" || command.starts_with("kubectl ") {
            Ok(command.to_string())
        } else {
            Ok(format!("kubectl {}", command))
        }
    }

    /// Split into argv. Anything beyond one plain command is refused;
    /// pipelines and redirects belong to the `bash` tool.
    fn argv(command: &str) -> Result<Vec<String>, ToolError> {
        let script = parser::parse(command)
            .map_err(|e| ToolError::InvalidArguments(format!("cannot parse command: {}", e)))?;
        let not_plain = || {
            ToolError::InvalidArguments(
                "kubectl takes a single command without pipes, lists, redirects or substitutions"
                    .to_string(),
            )
        };
        let [item] = script.items.as_slice() else {
            return Err(not_plain());
        };
        if item.background || !item.and_or.rest.is_empty() {
            return Err(not_plain());
        }
        let [Command::Simple(simple)] = item.and_or.first.commands.as_slice() else {
            return Err(not_plain());
        };
        if !simple.redirects.is_empty()
            || simple.assignments().next().is_some()
            || simple.words.iter().any(|w| !w.substitutions.is_empty())
        {
            return Err(not_plain());
        }
        Ok(simple.argv())
    }
}

#[async_trait]
impl BuiltinTool for KubectlTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "kubectl".to_string(),
            description: "Run a kubectl command against the current cluster".to_string(),
            input_schema: command_schema("kubectl arguments, e.g. \"get pods -n default\""),
            origin: ToolOrigin::BuiltIn,
            safety_hint: None,
        }
    }

    /// Refuses shell syntax here too, so such a call is rejected before
    /// anyone is asked to approve it.
    fn command_text(&self, arguments: &serde_json::Value) -> Result<Option<String>, ToolError> {
        let command = Self::full_command(arguments)?;
        Self::argv(&command)?;
        Ok(Some(command))
    }

    async fn invoke(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let command = Self::full_command(&arguments)?;
        let mut argv = Self::argv(&command)?;
        if let Some(program) = argv.first_mut() {
            *program = self.path.clone();
        }
        let result = self
            .runner
            .run(&argv)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        into_output(result)
    }
}

/// Runs arbitrary shell text through the configured shell.
pub struct BashTool {
    shell: String,
    runner: Arc<dyn CommandRunner>,
}

impl BashTool {
    pub fn new(shell: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            shell: shell.into(),
            runner,
        }
    }
}

#[async_trait]
impl BuiltinTool for BashTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "bash".to_string(),
            description: "Run a shell command".to_string(),
            input_schema: command_schema("shell command line"),
            origin: ToolOrigin::BuiltIn,
            safety_hint: None,
        }
    }

    fn command_text(&self, arguments: &serde_json::Value) -> Result<Option<String>, ToolError> {
        command_argument(arguments).map(|c| Some(c.to_string()))
    }

    async fn invoke(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let command = command_argument(&arguments)?;
        let argv = vec![self.shell.clone(), "-c".to_string(), command.to_string()];
        let result = self
            .runner
            .run(&argv)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        into_output(result)
    }
}
