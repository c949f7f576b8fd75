//! Events published to session subscribers.

use crate::agent::state::{AgentState, ToolCallStatus};
use crate::approval::handshake::ApprovalRequest;
use crate::approval::report::Severity;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Streamed model output
    TextChunk { session_id: String, text: String },

    ToolCallRequested {
        session_id: String,
        tool_call_id: String,
        tool: String,
        arguments: serde_json::Value,
        severity: Severity,
    },

    ToolCallCompleted {
        session_id: String,
        tool_call_id: String,
        tool: String,
        status: ToolCallStatus,
        output: String,
    },

    ApprovalRequested {
        session_id: String,
        request: Box<ApprovalRequest>,
    },

    ApprovalTimeout {
        session_id: String,
        choice_id: String,
        tool_call_id: String,
    },

    StateChanged {
        session_id: String,
        from: AgentState,
        to: AgentState,
    },

    Error { session_id: String, message: String },
}

impl AgentEvent {
    pub fn session_id(&self) -> &str {
        match self {
            AgentEvent::TextChunk { session_id, .. }
            | AgentEvent::ToolCallRequested { session_id, .. }
            | AgentEvent::ToolCallCompleted { session_id, .. }
            | AgentEvent::ApprovalRequested { session_id, .. }
            | AgentEvent::ApprovalTimeout { session_id, .. }
            | AgentEvent::StateChanged { session_id, .. }
            | AgentEvent::Error { session_id, .. } => session_id,
        }
    }
}
