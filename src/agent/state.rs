//! Turn and tool-call state machines.
//!
//! ```text
//! Idle -> Running -> Done
//!            |  ^
//!            v  |
//!       ToolAnalysis -> WaitingForApproval
//!            |                |
//!            v                v
//!         Executing <---------'
//! ```
//!
//! Any non-terminal state may move to `Error`. `Done` and `Error` are
//! terminal for the turn; the next turn starts from `Idle` again.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Running,
    ToolAnalysis,
    WaitingForApproval,
    Executing,
    Done,
    Error,
}

impl AgentState {
    pub fn is_terminal(self) -> bool {
        matches!(self, AgentState::Done | AgentState::Error)
    }

    pub fn can_transition_to(self, next: AgentState) -> bool {
        use AgentState::*;
        match (self, next) {
            (Done | Error, _) => false,
            (_, Error) => true,
            (Idle, Running)
            | (Running, ToolAnalysis)
            | (Running, Done)
            | (ToolAnalysis, Executing)
            | (ToolAnalysis, WaitingForApproval)
            // Denied by policy, or the call itself was invalid
            | (ToolAnalysis, Running)
            | (WaitingForApproval, Executing)
            | (WaitingForApproval, Running)
            | (Executing, Running) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AgentState::Idle => "idle",
            AgentState::Running => "running",
            AgentState::ToolAnalysis => "tool_analysis",
            AgentState::WaitingForApproval => "waiting_for_approval",
            AgentState::Executing => "executing",
            AgentState::Done => "done",
            AgentState::Error => "error",
        }
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("illegal state transition {from} -> {to}")]
    State { from: AgentState, to: AgentState },

    #[error("illegal status change for tool call {id}: {from} -> {to}")]
    ToolCall {
        id: String,
        from: ToolCallStatus,
        to: ToolCallStatus,
    },
}

/// Lifecycle of one tool call.
///
/// `Approved` leads to `Executed` or `Failed` exactly once. Every other
/// non-pending status is final, so a rejected or timed-out call can never
/// be approved later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    Approved,
    Executed,
    Failed,
    Rejected,
    TimedOut,
    Denied,
    Cancelled,
}

impl ToolCallStatus {
    pub fn is_final(self) -> bool {
        !matches!(self, ToolCallStatus::Pending | ToolCallStatus::Approved)
    }

    pub fn can_transition_to(self, next: ToolCallStatus) -> bool {
        use ToolCallStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Pending, TimedOut)
                | (Pending, Denied)
                | (Pending, Cancelled)
                | (Pending, Failed)
                | (Approved, Executed)
                | (Approved, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ToolCallStatus::Pending => "pending",
            ToolCallStatus::Approved => "approved",
            ToolCallStatus::Executed => "executed",
            ToolCallStatus::Failed => "failed",
            ToolCallStatus::Rejected => "rejected",
            ToolCallStatus::TimedOut => "timed_out",
            ToolCallStatus::Denied => "denied",
            ToolCallStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ToolCallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
