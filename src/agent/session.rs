//! Conversation history and per-session state.

use crate::agent::state::{AgentState, ToolCallStatus, TransitionError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
    /// Assistant message that carried the request
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Set on tool results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Assistant reply; each call's `message_id` is set to this message.
    pub fn assistant(content: impl Into<String>, calls: Vec<(String, String, serde_json::Value)>) -> Self {
        let mut message = Self::new(Role::Assistant, content);
        message.tool_calls = calls
            .into_iter()
            .map(|(id, name, arguments)| ToolCallRequest {
                id,
                name,
                arguments,
                message_id: message.id.clone(),
            })
            .collect();
        message
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut message = Self::new(Role::Tool, content);
        message.tool_call_id = Some(tool_call_id.into());
        message
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSession {
    pub id: String,
    pub provider: String,
    pub model: String,
    pub messages: Vec<Message>,
    pub state: AgentState,
    /// Choice id of the approval currently awaiting a human
    pub pending_approval: Option<String>,
    pub tool_calls: HashMap<String, ToolCallStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentSession {
    pub fn new(id: impl Into<String>, provider: impl Into<String>, model: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            provider: provider.into(),
            model: model.into(),
            messages: Vec::new(),
            state: AgentState::Idle,
            pending_approval: None,
            tool_calls: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    /// Move to `next`, returning the previous state.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::State`] if the move is not legal.
    pub fn transition(&mut self, next: AgentState) -> Result<AgentState, TransitionError> {
        let from = self.state;
        if !from.can_transition_to(next) {
            return Err(TransitionError::State { from, to: next });
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(from)
    }

    /// Put a finished (or never started) session back to `Idle` for a new
    /// turn. Returns false if a turn is still in progress.
    pub fn reset_for_turn(&mut self) -> bool {
        if self.state == AgentState::Idle || self.state.is_terminal() {
            self.state = AgentState::Idle;
            self.pending_approval = None;
            true
        } else {
            false
        }
    }

    /// Record a new tool call as `Pending`.
    ///
    /// # Errors
    ///
    /// An id that is already tracked keeps its status and yields
    /// [`TransitionError::ToolCall`]; a decided call never becomes pending again.
    pub fn track_tool_call(&mut self, id: &str) -> Result<(), TransitionError> {
        match self.tool_calls.entry(id.to_string()) {
            Entry::Occupied(existing) => Err(TransitionError::ToolCall {
                id: id.to_string(),
                from: *existing.get(),
                to: ToolCallStatus::Pending,
            }),
            Entry::Vacant(slot) => {
                slot.insert(ToolCallStatus::Pending);
                Ok(())
            }
        }
    }

    /// # Errors
    ///
    /// Returns [`TransitionError::ToolCall`] for an illegal change, including
    /// any change of an unknown call.
    pub fn set_tool_status(&mut self, id: &str, next: ToolCallStatus) -> Result<(), TransitionError> {
        let current = self
            .tool_calls
            .get(id)
            .copied()
            .unwrap_or(ToolCallStatus::Cancelled);
        if !current.can_transition_to(next) {
            return Err(TransitionError::ToolCall {
                id: id.to_string(),
                from: current,
                to: next,
            });
        }
        self.tool_calls.insert(id.to_string(), next);
        Ok(())
    }

    pub fn tool_status(&self, id: &str) -> Option<ToolCallStatus> {
        self.tool_calls.get(id).copied()
    }

    /// The last `limit` messages
    pub fn window(&self, limit: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(limit);
        &self.messages[start..]
    }
}
