// Agent Module
//
// Per-session conversation loop between the model, the tool registry and
// the approval layer.
//
// Components:
// - state: turn state machine and tool-call status
// - session: messages and session state
// - events: typed per-session event stream
// - provider: LLM backend interface
// - store: history persistence interface
// - orchestrator: the Agent itself

pub mod events;
pub mod orchestrator;
pub mod provider;
pub mod session;
pub mod state;
pub mod store;

pub use events::AgentEvent;
pub use orchestrator::{Agent, AgentError, AgentSettings, TurnOutcome};
pub use provider::{
    CompletionRequest, CompletionResponse, LlmProvider, ProviderError, ProviderToolCall,
    TokenSink,
};
pub use session::{AgentSession, Message, Role, ToolCallRequest};
pub use state::{AgentState, ToolCallStatus, TransitionError};
pub use store::{InMemorySessionStore, SessionStore, StoreError};
