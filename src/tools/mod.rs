//! Tool Execution Subsystem
//!
//! The registry of everything the model may call, and the machinery that
//! runs built-in tools.
//!
//! # Architecture
//!
//! The module is organized into:
//! - `registry.rs`: name -> tool map merging built-ins with MCP tools
//! - `builtin.rs`: the `kubectl` and `bash` tools
//! - `executor.rs`: subprocess execution with timeout and output cap
//!
//! # Example
//!
//! ```no_run
//! use kubeguard_agent::tools::{default_builtins, BuiltinSettings, ToolRegistry};
//!
//! # async fn run() -> Result<(), kubeguard_agent::tools::ToolError> {
//! let registry = ToolRegistry::new();
//! for tool in default_builtins(&BuiltinSettings::default()) {
//!     registry.register_builtin(tool);
//! }
//! let output = registry
//!     .invoke("kubectl", serde_json::json!({"command": "get pods"}))
//!     .await?;
//! println!("{}", output.content);
//! # Ok(())
//! # }
//! ```

pub mod builtin;
pub mod executor;
pub mod registry;

pub use builtin::{default_builtins, BashTool, BuiltinSettings, BuiltinTool, KubectlTool};
pub use executor::{CommandRunner, ExecutionResult, ExecutorConfig, ExecutorError, ProcessRunner};
pub use registry::{
    mcp_tool_name, SafetyHint, ToolDefinition, ToolError, ToolHandler, ToolOrigin, ToolOutput,
    ToolRegistry,
};
