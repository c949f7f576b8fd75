// Configuration File Support
//
// This module provides configuration file parsing for the KubeGuard agent.
// Supports TOML format with environment variable overrides.
// Configuration files are loaded from the platform config directory: ~/.config/kubeguard/config.toml

use crate::agent::orchestrator::AgentSettings;
use crate::approval::enforcer::ApprovalPolicy;
use crate::mcp::client::ConnectionSettings;
use crate::retry::RetryConfig;
use crate::tools::builtin::BuiltinSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Approval policy
    pub tool_approval: ToolApprovalConfig,

    /// Orchestrator limits and provider retry
    pub agent: AgentConfig,

    /// MCP server configurations
    pub mcp: McpConfig,

    /// Built-in tool settings
    pub tools: ToolsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (pretty, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Approval policy configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolApprovalConfig {
    /// Run Read-classified commands without asking
    pub auto_approve_read_only: bool,

    /// Refuse Dangerous commands outright instead of asking
    pub block_dangerous: bool,

    /// Regexes matched against the raw command text; a match is a denial
    pub blocked_patterns: Vec<String>,

    /// How long to wait for a human decision
    pub approval_timeout_secs: u64,
}

impl Default for ToolApprovalConfig {
    fn default() -> Self {
        Self {
            auto_approve_read_only: true,
            block_dangerous: false,
            blocked_patterns: Vec::new(),
            approval_timeout_secs: 30,
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// LLM round-trips allowed per user turn
    pub max_iterations: usize,

    /// Deadline for one provider call
    pub provider_timeout_secs: u64,

    /// Attempts per provider call before the session errors
    pub provider_max_attempts: u32,

    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,

    /// Per-session event channel capacity
    pub event_buffer: usize,

    /// Most recent messages sent to the provider
    pub history_window: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            provider_timeout_secs: 120,
            provider_max_attempts: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 8000,
            event_buffer: 256,
            history_window: 40,
        }
    }
}

/// MCP configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct McpConfig {
    /// Bound on each handshake step
    pub init_timeout_secs: u64,

    /// Bound on each tool call
    pub call_timeout_secs: u64,

    pub servers: Vec<McpServerConfig>,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            init_timeout_secs: 10,
            call_timeout_secs: 30,
            servers: Vec::new(),
        }
    }
}

/// MCP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct McpServerConfig {
    /// Server name; tools are exposed as `mcp_<name>_<tool>`
    pub name: String,

    pub enabled: bool,

    /// Command to spawn the MCP server (e.g., "npx")
    pub command: String,

    /// Arguments for the MCP server
    pub args: Vec<String>,

    pub description: String,

    /// Extra environment for the child process
    pub env: HashMap<String, String>,
}

impl Default for McpServerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            enabled: true,
            command: String::new(),
            args: Vec::new(),
            description: String::new(),
            env: HashMap::new(),
        }
    }
}

/// Built-in tool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolsConfig {
    pub kubectl_path: String,

    /// Shell used by the `bash` tool
    pub shell: String,

    pub command_timeout_secs: u64,

    /// Output beyond this is truncated
    pub max_output_bytes: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            kubectl_path: "kubectl".to_string(),
            shell: "/bin/sh".to_string(),
            command_timeout_secs: 30,
            max_output_bytes: 1024 * 1024,
        }
    }
}

impl Config {
    /// Load configuration from the default config directory
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    /// If the config file does not exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// Environment overrides are applied and the result is validated, also
    /// when the file is missing and defaults are used.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// resulting configuration is invalid.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::info!(path = ?path, "loaded configuration");
            config
        } else {
            tracing::debug!(path = ?path, "config file not found, using defaults");
            Self::default()
        };

        let config = config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/kubeguard/config.toml` on Linux
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("io", "kubeguard", "kubeguard") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home)
                .join(".config")
                .join("kubeguard")
                .join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - KUBEGUARD_LOG_LEVEL
    /// - KUBEGUARD_LOG_FORMAT
    /// - KUBEGUARD_AUTO_APPROVE_READ_ONLY
    /// - KUBEGUARD_BLOCK_DANGEROUS
    /// - KUBEGUARD_APPROVAL_TIMEOUT_SECS
    /// - KUBEGUARD_MAX_ITERATIONS
    /// - KUBEGUARD_MCP_CALL_TIMEOUT_SECS
    /// - KUBEGUARD_KUBECTL_PATH
    ///
    /// Unparseable values are ignored.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(level) = std::env::var("KUBEGUARD_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("KUBEGUARD_LOG_FORMAT") {
            self.logging.format = format;
        }

        if let Ok(value) = std::env::var("KUBEGUARD_AUTO_APPROVE_READ_ONLY") {
            self.tool_approval.auto_approve_read_only = value
                .parse()
                .unwrap_or(self.tool_approval.auto_approve_read_only);
        }
        if let Ok(value) = std::env::var("KUBEGUARD_BLOCK_DANGEROUS") {
            self.tool_approval.block_dangerous =
                value.parse().unwrap_or(self.tool_approval.block_dangerous);
        }
        if let Ok(value) = std::env::var("KUBEGUARD_APPROVAL_TIMEOUT_SECS") {
            if let Ok(secs) = value.parse::<u64>() {
                self.tool_approval.approval_timeout_secs = secs;
            }
        }

        if let Ok(value) = std::env::var("KUBEGUARD_MAX_ITERATIONS") {
            if let Ok(iterations) = value.parse::<usize>() {
                self.agent.max_iterations = iterations;
            }
        }

        if let Ok(value) = std::env::var("KUBEGUARD_MCP_CALL_TIMEOUT_SECS") {
            if let Ok(secs) = value.parse::<u64>() {
                self.mcp.call_timeout_secs = secs;
            }
        }

        if let Ok(path) = std::env::var("KUBEGUARD_KUBECTL_PATH") {
            self.tools.kubectl_path = path;
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }
        if self.logging.format.parse::<crate::logging::LogFormat>().is_err() {
            anyhow::bail!(
                "Invalid log format: {}. Must be one of: pretty, json",
                self.logging.format
            );
        }

        if self.tool_approval.approval_timeout_secs == 0 {
            anyhow::bail!("tool_approval.approval_timeout_secs must be > 0");
        }
        for pattern in &self.tool_approval.blocked_patterns {
            regex::Regex::new(pattern)
                .with_context(|| format!("Invalid blocked pattern: {}", pattern))?;
        }

        if self.agent.max_iterations == 0 {
            anyhow::bail!("agent.max_iterations must be > 0");
        }
        if self.agent.provider_timeout_secs == 0 {
            anyhow::bail!("agent.provider_timeout_secs must be > 0");
        }
        if self.agent.provider_max_attempts == 0 {
            anyhow::bail!("agent.provider_max_attempts must be > 0");
        }
        if self.agent.event_buffer == 0 {
            anyhow::bail!("agent.event_buffer must be > 0");
        }
        if self.agent.history_window == 0 {
            anyhow::bail!("agent.history_window must be > 0");
        }
        if self.agent.retry_base_delay_ms > self.agent.retry_max_delay_ms {
            anyhow::bail!("agent.retry_base_delay_ms must not exceed agent.retry_max_delay_ms");
        }

        if self.mcp.init_timeout_secs == 0 || self.mcp.call_timeout_secs == 0 {
            anyhow::bail!("MCP timeouts must be > 0");
        }
        let mut names = HashSet::new();
        for server in &self.mcp.servers {
            if server.name.is_empty() {
                anyhow::bail!("MCP server with command '{}' has no name", server.command);
            }
            if !server
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                anyhow::bail!(
                    "MCP server name '{}' may only contain letters, digits, '_' and '-'",
                    server.name
                );
            }
            if !names.insert(server.name.as_str()) {
                anyhow::bail!("Duplicate MCP server name: {}", server.name);
            }
            if server.enabled && server.command.trim().is_empty() {
                anyhow::bail!("MCP server '{}' has empty command", server.name);
            }
        }

        if self.tools.command_timeout_secs == 0 {
            anyhow::bail!("tools.command_timeout_secs must be > 0");
        }
        if self.tools.max_output_bytes == 0 {
            anyhow::bail!("tools.max_output_bytes must be > 0");
        }

        Ok(())
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }

    pub fn approval_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy {
            auto_approve_read_only: self.tool_approval.auto_approve_read_only,
            block_dangerous: self.tool_approval.block_dangerous,
            blocked_patterns: self.tool_approval.blocked_patterns.clone(),
            approval_timeout: Duration::from_secs(self.tool_approval.approval_timeout_secs),
        }
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            init_timeout: Duration::from_secs(self.mcp.init_timeout_secs),
            call_timeout: Duration::from_secs(self.mcp.call_timeout_secs),
        }
    }

    pub fn builtin_settings(&self) -> BuiltinSettings {
        BuiltinSettings {
            kubectl_path: self.tools.kubectl_path.clone(),
            shell: self.tools.shell.clone(),
            timeout: Duration::from_secs(self.tools.command_timeout_secs),
            max_output_bytes: self.tools.max_output_bytes,
        }
    }

    pub fn agent_settings(&self) -> AgentSettings {
        AgentSettings {
            max_iterations: self.agent.max_iterations,
            provider_timeout: Duration::from_secs(self.agent.provider_timeout_secs),
            provider_retry: RetryConfig {
                max_attempts: self.agent.provider_max_attempts,
                base_delay: Duration::from_millis(self.agent.retry_base_delay_ms),
                max_delay: Duration::from_millis(self.agent.retry_max_delay_ms),
                jitter: 0.1,
            },
            event_buffer: self.agent.event_buffer,
            history_window: self.agent.history_window,
            max_output_bytes: self.tools.max_output_bytes,
        }
    }
}
