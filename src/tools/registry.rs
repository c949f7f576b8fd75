//! Tool Registry
//!
//! One name -> tool map shared by every session. Built-in tools are
//! registered at startup; MCP tools come and go with their server's
//! connection, namespaced as `mcp_<server>_<tool>`.
//!
//! All mutations happen under a single write lock, so a reader sees a
//! server's tools either all present or all gone.

use crate::approval::classifier::CommandClassifier;
use crate::approval::report::ClassificationReport;
use crate::mcp::client::{ClientError, ConnectionObserver, McpConnection};
use crate::mcp::protocol::Tool;
use crate::tools::builtin::BuiltinTool;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

/// JSON-RPC "invalid params"
const INVALID_PARAMS: i32 = -32602;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("denied: {0}")]
    Denied(String),
}

/// Where a tool comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolOrigin {
    BuiltIn,
    Mcp { server: String },
}

impl std::fmt::Display for ToolOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolOrigin::BuiltIn => write!(f, "builtin"),
            ToolOrigin::Mcp { server } => write!(f, "mcp:{}", server),
        }
    }
}

/// Safety claim made by a tool's origin. Advisory only: approval decisions
/// come from the classifier and enforcer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyHint {
    ReadOnly,
    Destructive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub origin: ToolOrigin,
    pub safety_hint: Option<SafetyHint>,
}

/// Uniform result of a successful invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Text returned to the model
    pub content: String,
    /// Short audit summary, e.g. `exit 0 in 12ms`
    pub summary: String,
}

/// How an invocation is carried out
#[derive(Clone)]
pub enum ToolHandler {
    BuiltIn(Arc<dyn BuiltinTool>),
    McpProxy {
        server: String,
        remote_name: String,
        connection: Arc<McpConnection>,
    },
}

struct RegisteredTool {
    definition: ToolDefinition,
    handler: ToolHandler,
}

/// Registry name for an MCP tool. Characters outside `[A-Za-z0-9_-]` are
/// replaced with `_`.
pub fn mcp_tool_name(server: &str, tool: &str) -> String {
    let sanitize = |s: &str| -> String {
        s.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    };
    format!("mcp_{}_{}", sanitize(server), sanitize(tool))
}

fn hint_from(tool: &Tool) -> Option<SafetyHint> {
    let annotations = tool.annotations.as_ref()?;
    if annotations.destructive_hint == Some(true) {
        Some(SafetyHint::Destructive)
    } else if annotations.read_only_hint == Some(true) {
        Some(SafetyHint::ReadOnly)
    } else {
        None
    }
}

/// Concurrent tool map
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<RegisteredTool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<RegisteredTool>>> {
        self.tools.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<RegisteredTool>>> {
        self.tools.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a built-in tool, replacing any tool of the same name.
    pub fn register_builtin(&self, tool: Arc<dyn BuiltinTool>) {
        let definition = tool.definition();
        let name = definition.name.clone();
        let previous = self.write().insert(
            name.clone(),
            Arc::new(RegisteredTool {
                definition,
                handler: ToolHandler::BuiltIn(tool),
            }),
        );
        if previous.is_some() {
            warn!(tool = %name, "built-in tool replaced an existing registration");
        }
        info!(tool = %name, "registered built-in tool");
    }

    /// Replace every tool of `connection`'s server with its current tool set.
    ///
    /// Skipped when the connection is no longer ready, so a late `on_ready`
    /// cannot resurrect tools of a failed server.
    pub fn register_server_tools(&self, connection: &Arc<McpConnection>) -> usize {
        let server = connection.name().to_string();
        let tools = connection.tools();

        let mut map = self.write();
        if !connection.is_ready() {
            debug!(server = %server, "connection no longer ready, not registering tools");
            return 0;
        }
        map.retain(|_, t| !matches!(&t.definition.origin, ToolOrigin::Mcp { server: s } if *s == server));

        let mut registered = 0;
        for tool in tools {
            let name = mcp_tool_name(&server, &tool.name);
            if map.contains_key(&name) {
                warn!(server = %server, tool = %name, "tool name collision, skipping");
                continue;
            }
            map.insert(
                name.clone(),
                Arc::new(RegisteredTool {
                    definition: ToolDefinition {
                        name: name.clone(),
                        description: tool.description.clone(),
                        input_schema: tool.input_schema.clone(),
                        origin: ToolOrigin::Mcp {
                            server: server.clone(),
                        },
                        safety_hint: hint_from(&tool),
                    },
                    handler: ToolHandler::McpProxy {
                        server: server.clone(),
                        remote_name: tool.name.clone(),
                        connection: Arc::clone(connection),
                    },
                }),
            );
            registered += 1;
        }
        info!(server = %server, tools = registered, "registered MCP tools");
        registered
    }

    /// Drop every tool owned by `server`. Returns how many were removed.
    pub fn remove_server(&self, server: &str) -> usize {
        let mut map = self.write();
        let before = map.len();
        map.retain(|_, t| !matches!(&t.definition.origin, ToolOrigin::Mcp { server: s } if s == server));
        let removed = before - map.len();
        if removed > 0 {
            info!(server, tools = removed, "removed MCP tools");
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<ToolDefinition> {
        self.read().get(name).map(|t| t.definition.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// All definitions, sorted by name
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.read().values().map(|t| t.definition.clone()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Names of the tools owned by one server, sorted
    pub fn server_tools(&self, server: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .read()
            .values()
            .filter(|t| matches!(&t.definition.origin, ToolOrigin::Mcp { server: s } if s == server))
            .map(|t| t.definition.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, name: &str) -> Result<Arc<RegisteredTool>, ToolError> {
        self.read()
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    /// Shell text an invocation would run, for shell-like tools.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown tools, `InvalidArguments` when a shell-like
    /// tool's arguments lack a usable command.
    pub fn command_for(
        &self,
        name: &str,
        arguments: &serde_json::Value,
    ) -> Result<Option<String>, ToolError> {
        match &self.lookup(name)?.handler {
            ToolHandler::BuiltIn(tool) => tool.command_text(arguments),
            ToolHandler::McpProxy { .. } => Ok(None),
        }
    }

    /// Classify an invocation: shell-like tools by their command text, all
    /// other tools as opaque (always needing a human).
    ///
    /// # Errors
    ///
    /// Same as [`ToolRegistry::command_for`].
    pub fn classify_call(
        &self,
        name: &str,
        arguments: &serde_json::Value,
    ) -> Result<(ClassificationReport, Option<String>), ToolError> {
        let command = self.command_for(name, arguments)?;
        let report = match &command {
            Some(text) => CommandClassifier::classify(text),
            None => ClassificationReport::opaque_tool(name),
        };
        Ok((report, command))
    }

    /// Invoke a tool.
    ///
    /// The map lock is released before the tool runs, so long invocations
    /// never block registration changes.
    ///
    /// # Errors
    ///
    /// Returns a [`ToolError`]; an MCP connection failure is reported as
    /// `ExecutionFailed`, never as success.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self.lookup(name)?;
        debug!(tool = name, origin = %tool.definition.origin, "invoking tool");
        match &tool.handler {
            ToolHandler::BuiltIn(builtin) => builtin.invoke(arguments).await,
            ToolHandler::McpProxy {
                server,
                remote_name,
                connection,
            } => {
                let arguments = normalize_mcp_arguments(&tool.definition, arguments)?;
                let result = connection
                    .call_tool(remote_name, arguments)
                    .await
                    .map_err(|e| map_client_error(server, e))?;
                let content = result.text();
                if result.is_error {
                    return Err(ToolError::ExecutionFailed(content));
                }
                Ok(ToolOutput {
                    content,
                    summary: format!("mcp:{} ok", server),
                })
            }
        }
    }
}

/// Objects pass through, `null` becomes `{}`, and keys listed as `required`
/// by the tool's schema must be present.
fn normalize_mcp_arguments(
    definition: &ToolDefinition,
    arguments: serde_json::Value,
) -> Result<serde_json::Value, ToolError> {
    let arguments = match arguments {
        serde_json::Value::Null => serde_json::json!({}),
        serde_json::Value::Object(_) => arguments,
        other => {
            return Err(ToolError::InvalidArguments(format!(
                "expected an object, got {}",
                other
            )))
        }
    };
    if let Some(required) = definition
        .input_schema
        .get("required")
        .and_then(|r| r.as_array())
    {
        let missing: Vec<&str> = required
            .iter()
            .filter_map(|key| key.as_str())
            .filter(|key| arguments.get(key).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(ToolError::InvalidArguments(format!(
                "missing required argument(s): {}",
                missing.join(", ")
            )));
        }
    }
    Ok(arguments)
}

fn map_client_error(server: &str, error: ClientError) -> ToolError {
    match error {
        ClientError::Server { code, message } if code == INVALID_PARAMS => {
            ToolError::InvalidArguments(message)
        }
        ClientError::Server { code, message } => {
            ToolError::ExecutionFailed(format!("MCP server '{}' error {}: {}", server, code, message))
        }
        other => ToolError::ExecutionFailed(format!("MCP server '{}': {}", server, other)),
    }
}

impl ConnectionObserver for ToolRegistry {
    fn on_ready(&self, connection: &Arc<McpConnection>) {
        self.register_server_tools(connection);
    }

    fn on_failed(&self, server: &str, reason: &str) {
        let removed = self.remove_server(server);
        warn!(server, reason, removed, "MCP server failed, tools withdrawn");
    }
}
