//! KubeGuard Agent Library
//!
//! Tool-execution core for an agentic Kubernetes assistant:
//!
//! - [`approval`]: shell command safety classification, approval policy,
//!   single-flight human approval and audit records
//! - [`mcp`]: JSON-RPC 2.0 client for stdio MCP tool servers
//! - [`tools`]: registry merging built-in and MCP tools
//! - [`agent`]: per-session orchestrator driving model, tools and approvals
//!
//! Ambient pieces: [`config`] (TOML + `KUBEGUARD_*` overrides),
//! [`logging`] and [`retry`].

pub mod agent;
pub mod approval;
pub mod config;
pub mod logging;
pub mod mcp;
pub mod retry;
pub mod tools;

pub use agent::{Agent, AgentError, AgentEvent, AgentSettings, AgentState, TurnOutcome};
pub use approval::{classify, ClassificationReport, PolicyEnforcer, Severity};
pub use config::Config;
pub use tools::ToolRegistry;
