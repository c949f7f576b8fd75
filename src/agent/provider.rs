//! LLM provider interface.
//!
//! Backends stream text through `on_token` and return the full response,
//! including any tool calls, once the completion ends.

use crate::agent::session::Message;
use crate::tools::registry::ToolDefinition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub session_id: String,
    pub model: String,
    /// Most recent history, oldest first
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub text: String,
    #[serde(default)]
    pub tool_calls: Vec<ProviderToolCall>,
}

impl CompletionResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            text: String::new(),
            tool_calls: vec![ProviderToolCall {
                id: id.into(),
                name: name.into(),
                arguments,
            }],
        }
    }

    pub fn is_final(&self) -> bool {
        self.tool_calls.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Rate limits, 5xx, dropped connections
    #[error("transient provider error: {0}")]
    Transient(String),

    #[error("provider did not respond within {0:?}")]
    Timeout(Duration),

    #[error("provider error: {0}")]
    Fatal(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transient(_) | ProviderError::Timeout(_))
    }
}

/// Callback receiving streamed text
pub type TokenSink<'a> = &'a (dyn Fn(&str) + Send + Sync);

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Backend identifier recorded on sessions
    fn name(&self) -> &str;

    async fn complete(
        &self,
        request: CompletionRequest,
        on_token: TokenSink<'_>,
    ) -> Result<CompletionResponse, ProviderError>;
}
