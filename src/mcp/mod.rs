//! MCP (Model Context Protocol) Client Implementation
//!
//! Connects the agent to external tool servers over stdio, built directly
//! on Tokio and Serde (no external SDK).
//!
//! # Architecture
//!
//! The implementation is organized into four layers:
//!
//! 1. **Protocol Layer** (`protocol`): JSON-RPC 2.0 message types and MCP payloads
//! 2. **Transport Layer** (`transport`): line-framed stdio of a child process
//! 3. **Client Layer** (`client`): one multiplexed connection per server
//! 4. **Manager Layer** (`manager`): the set of configured servers
//!
//! Connections report lifecycle changes through [`ConnectionObserver`]; the
//! tool registry implements it to add and drop each server's tools.

// Protocol layer: JSON-RPC 2.0 message types
pub mod protocol;

// Transport layer: stdio of a spawned server
pub mod transport;

// Client layer: reader task, id correlation, per-call timeout
pub mod client;

// Manager layer: start, stop and report on configured servers
pub mod manager;

pub use client::{
    ClientError, ConnectionObserver, ConnectionSettings, ConnectionState, McpConnection,
    ServerStatus,
};
pub use manager::McpManager;
pub use protocol::{
    CallToolResult, McpError, McpMethod, McpRequest, McpResponse, Tool, ToolAnnotations,
};
pub use transport::{StdioTransport, TransportError};

// Property-based tests module
#[cfg(test)]
mod proptests;
