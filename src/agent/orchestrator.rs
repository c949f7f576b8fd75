//! Agent Orchestrator
//!
//! Runs the conversation loop for each session:
//!
//! 1. append the user message, ask the provider for a completion
//! 2. for every requested tool call, in order: classify, evaluate policy,
//!    ask a human if required, execute, append the result
//! 3. repeat until the model answers without tool calls
//!
//! Turns of one session are serialised behind a per-session lock; separate
//! sessions run concurrently. Policy refusals, rejections, timeouts and tool
//! errors are fed back to the model as tool results. Only provider
//! exhaustion, the iteration limit, session close and internal faults end a
//! turn in `Error`.

use crate::agent::events::AgentEvent;
use crate::agent::provider::{
    CompletionRequest, CompletionResponse, LlmProvider, ProviderError, TokenSink,
};
use crate::agent::session::{AgentSession, Message, ToolCallRequest};
use crate::agent::state::{AgentState, ToolCallStatus, TransitionError};
use crate::agent::store::{SessionStore, StoreError};
use crate::approval::enforcer::{PolicyDecision, PolicyEnforcer};
use crate::approval::handshake::{
    ApprovalGate, ApprovalListener, ApprovalOutcome, ApprovalRequest, APPROVAL_OPTIONS,
};
use crate::approval::history::{AuditDecision, AuditRecord, AuditSink, TracingAuditSink};
use crate::approval::report::{ClassificationReport, Severity};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::tools::executor::truncate_output;
use crate::tools::registry::ToolRegistry;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

/// Orchestrator tuning, usually built by `Config::agent_settings`
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSettings {
    /// Provider round-trips allowed per turn
    pub max_iterations: usize,
    /// Deadline for a single provider call
    pub provider_timeout: Duration,
    pub provider_retry: RetryConfig,
    /// Per-session event buffer; slow subscribers lose the oldest events
    pub event_buffer: usize,
    /// Messages sent to the provider per call
    pub history_window: usize,
    /// Tool output beyond this is truncated before entering history
    pub max_output_bytes: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            provider_timeout: Duration::from_secs(120),
            provider_retry: RetryConfig::default(),
            event_buffer: 256,
            history_window: 40,
            max_output_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("session {0} is closed")]
    SessionClosed(String),

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("no pending approval with choice id {0}")]
    UnknownChoice(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of one `send_user_message` call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnOutcome {
    /// `Done` or `Error`
    pub state: AgentState,
    /// Final model text, when the turn completed
    pub reply: Option<String>,
    /// Messages appended during this turn, oldest first
    pub transcript: Vec<Message>,
    pub error: Option<String>,
}

impl TurnOutcome {
    pub fn is_done(&self) -> bool {
        self.state == AgentState::Done
    }
}

/// Reasons a turn ends in `Error`
#[derive(Debug, Error)]
enum TurnError {
    #[error("provider failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("no final answer after {0} iterations")]
    MaxIterations(usize),

    #[error("session closed")]
    Closed,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

struct SessionHandle {
    id: String,
    session: Mutex<AgentSession>,
    /// Held for a whole turn; the flag records whether stored history has
    /// been loaded
    turn: tokio::sync::Mutex<bool>,
    gate: ApprovalGate,
    events: broadcast::Sender<AgentEvent>,
    cancel: watch::Sender<bool>,
}

impl SessionHandle {
    fn lock_session(&self) -> MutexGuard<'_, AgentSession> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: AgentEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn is_closed(&self) -> bool {
        *self.cancel.borrow()
    }
}

/// Publishes `ApprovalRequested` once the gate is open, then hands the
/// request to the real listener.
struct EventForwarder<'a> {
    inner: &'a dyn ApprovalListener,
    events: &'a broadcast::Sender<AgentEvent>,
}

#[async_trait]
impl<'a> ApprovalListener for EventForwarder<'a> {
    async fn notify(&self, request: ApprovalRequest) {
        let _ = self.events.send(AgentEvent::ApprovalRequested {
            session_id: request.session_id.clone(),
            request: Box::new(request.clone()),
        });
        self.inner.notify(request).await;
    }
}

/// The orchestrator. Cheap to share behind an `Arc`.
pub struct Agent {
    provider: Arc<dyn LlmProvider>,
    registry: Arc<ToolRegistry>,
    enforcer: Arc<PolicyEnforcer>,
    listener: Arc<dyn ApprovalListener>,
    store: Arc<dyn SessionStore>,
    audit: Arc<dyn AuditSink>,
    settings: AgentSettings,
    model: String,
    sessions: Mutex<HashMap<String, Arc<SessionHandle>>>,
}

impl Agent {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        registry: Arc<ToolRegistry>,
        enforcer: Arc<PolicyEnforcer>,
        listener: Arc<dyn ApprovalListener>,
        store: Arc<dyn SessionStore>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            provider,
            registry,
            enforcer,
            listener,
            store,
            audit: Arc::new(TracingAuditSink),
            settings,
            model: "default".to_string(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Arc<SessionHandle>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn handle(&self, session_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions().get(session_id).cloned()
    }

    fn get_or_create(&self, session_id: &str) -> Arc<SessionHandle> {
        let mut sessions = self.sessions();
        let handle = sessions.entry(session_id.to_string()).or_insert_with(|| {
            debug!(session_id, "creating session");
            let (events, _) = broadcast::channel(self.settings.event_buffer.max(1));
            let (cancel, _) = watch::channel(false);
            Arc::new(SessionHandle {
                id: session_id.to_string(),
                session: Mutex::new(AgentSession::new(
                    session_id,
                    self.provider.name(),
                    self.model.clone(),
                )),
                turn: tokio::sync::Mutex::new(false),
                gate: ApprovalGate::new(),
                events,
                cancel,
            })
        });
        Arc::clone(handle)
    }

    /// Ids of open sessions, sorted
    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Copy of a session's current state and history
    pub fn session_snapshot(&self, session_id: &str) -> Option<AgentSession> {
        self.handle(session_id).map(|h| h.lock_session().clone())
    }

    /// Event stream for a session, creating the session if needed.
    pub fn subscribe(&self, session_id: &str) -> broadcast::Receiver<AgentEvent> {
        self.get_or_create(session_id).events.subscribe()
    }

    /// Run one turn for `text`. A turn already in progress on the same
    /// session is waited for, never interleaved.
    ///
    /// # Errors
    ///
    /// `SessionClosed` if the session was closed before this turn started,
    /// `Store` if stored history could not be loaded. Failures during the
    /// turn are reported in the returned [`TurnOutcome`].
    pub async fn send_user_message(
        &self,
        session_id: &str,
        text: &str,
    ) -> Result<TurnOutcome, AgentError> {
        let handle = self.get_or_create(session_id);
        let mut loaded = handle.turn.lock().await;
        if handle.is_closed() {
            return Err(AgentError::SessionClosed(session_id.to_string()));
        }
        if !*loaded {
            let history = self.store.load(session_id).await?;
            if !history.is_empty() {
                debug!(session_id, messages = history.len(), "restored session history");
                handle.lock_session().messages = history;
            }
            *loaded = true;
        }

        let start = handle.lock_session().messages.len();
        let result = self.run_turn(&handle, text).await;
        let (reply, error) = match result {
            Ok(reply) => (Some(reply), None),
            Err(e) => {
                let message = e.to_string();
                self.fail_turn(&handle, &message).await;
                (None, Some(message))
            }
        };

        let session = handle.lock_session();
        Ok(TurnOutcome {
            state: session.state,
            reply,
            transcript: session.messages.get(start..).unwrap_or_default().to_vec(),
            error,
        })
    }

    /// Deliver a human decision for a pending approval.
    ///
    /// # Errors
    ///
    /// `UnknownSession` for sessions that do not exist, `UnknownChoice` when
    /// nothing is pending under `choice_id` (already decided or timed out).
    pub fn send_approval(
        &self,
        session_id: &str,
        choice_id: &str,
        approved: bool,
    ) -> Result<(), AgentError> {
        let handle = self
            .handle(session_id)
            .ok_or_else(|| AgentError::UnknownSession(session_id.to_string()))?;
        handle
            .gate
            .decide(choice_id, approved)
            .map_err(|_| AgentError::UnknownChoice(choice_id.to_string()))?;
        info!(session_id, choice_id, approved, "approval decision received");
        Ok(())
    }

    /// Close a session. A pending approval resolves as `Cancelled` at once
    /// and the running turn ends in `Error`. Stored history is kept.
    pub fn close_session(&self, session_id: &str) -> bool {
        let Some(handle) = self.sessions().remove(session_id) else {
            return false;
        };
        handle.cancel.send_replace(true);
        handle.gate.cancel();
        info!(session_id, "session closed");
        true
    }

    fn set_state(&self, handle: &SessionHandle, next: AgentState) -> Result<(), TransitionError> {
        let from = handle.lock_session().transition(next)?;
        info!(session_id = %handle.id, from = %from, to = %next, "state changed");
        handle.emit(AgentEvent::StateChanged {
            session_id: handle.id.clone(),
            from,
            to: next,
        });
        Ok(())
    }

    /// Add to history, then persist.
    async fn append(&self, handle: &SessionHandle, message: Message) -> Result<(), StoreError> {
        handle.lock_session().push(message.clone());
        self.store.append(&handle.id, message).await
    }

    async fn fail_turn(&self, handle: &SessionHandle, reason: &str) {
        error!(session_id = %handle.id, error = reason, "turn failed");
        if let Err(e) = self
            .append(handle, Message::system(format!("error: {}", reason)))
            .await
        {
            warn!(session_id = %handle.id, error = %e, "could not persist error entry");
        }
        if self.set_state(handle, AgentState::Error).is_err() {
            handle.lock_session().state = AgentState::Error;
        }
        handle.emit(AgentEvent::Error {
            session_id: handle.id.clone(),
            message: reason.to_string(),
        });
    }

    async fn run_turn(&self, handle: &SessionHandle, text: &str) -> Result<String, TurnError> {
        {
            let mut session = handle.lock_session();
            if !session.reset_for_turn() {
                // A previous turn's future was dropped mid-flight
                warn!(session_id = %handle.id, state = %session.state, "resetting abandoned turn");
                session.state = AgentState::Idle;
                session.pending_approval = None;
            }
        }

        self.append(handle, Message::user(text)).await?;
        self.set_state(handle, AgentState::Running)?;

        for iteration in 1..=self.settings.max_iterations {
            let response = self.complete(handle).await?;
            let assistant = {
                let session = handle.lock_session();
                let mut seen = HashSet::new();
                let calls = response
                    .tool_calls
                    .iter()
                    .map(|call| {
                        // Ids must be unique within the session, this response included
                        let reused = call.id.is_empty()
                            || session.tool_status(&call.id).is_some()
                            || !seen.insert(call.id.clone());
                        let id = if reused {
                            uuid::Uuid::new_v4().to_string()
                        } else {
                            call.id.clone()
                        };
                        (id, call.name.clone(), call.arguments.clone())
                    })
                    .collect();
                Message::assistant(response.text.clone(), calls)
            };
            let requests = assistant.tool_calls.clone();
            self.append(handle, assistant).await?;

            if requests.is_empty() {
                self.set_state(handle, AgentState::Done)?;
                return Ok(response.text);
            }

            debug!(session_id = %handle.id, iteration, calls = requests.len(), "model requested tools");
            for call in &requests {
                if handle.is_closed() {
                    return Err(TurnError::Closed);
                }
                self.set_state(handle, AgentState::ToolAnalysis)?;
                self.handle_tool_call(handle, call).await?;
            }
            if handle.is_closed() {
                return Err(TurnError::Closed);
            }
        }

        Err(TurnError::MaxIterations(self.settings.max_iterations))
    }

    /// One provider call with deadline and retries. Streams text chunks to
    /// subscribers. Session close aborts it.
    async fn complete(&self, handle: &SessionHandle) -> Result<CompletionResponse, TurnError> {
        let request = {
            let session = handle.lock_session();
            CompletionRequest {
                session_id: handle.id.clone(),
                model: session.model.clone(),
                messages: session.window(self.settings.history_window).to_vec(),
                tools: self.registry.definitions(),
            }
        };

        let events = handle.events.clone();
        let session_id = handle.id.clone();
        let forward = move |chunk: &str| {
            let _ = events.send(AgentEvent::TextChunk {
                session_id: session_id.clone(),
                text: chunk.to_string(),
            });
        };
        let on_token: TokenSink<'_> = &forward;

        let provider = Arc::clone(&self.provider);
        let timeout = self.settings.provider_timeout;
        let operation = move || {
            let provider = Arc::clone(&provider);
            let request = request.clone();
            async move {
                match tokio::time::timeout(timeout, provider.complete(request, on_token)).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout(timeout)),
                }
            }
        };

        let mut cancel = handle.cancel.subscribe();
        tokio::select! {
            result = retry_with_backoff(
                &self.settings.provider_retry,
                ProviderError::is_retryable,
                operation,
            ) => result.map_err(TurnError::Provider),
            _ = async {
                let _ = cancel.wait_for(|closed| *closed).await;
            } => Err(TurnError::Closed),
        }
    }

    async fn handle_tool_call(
        &self,
        handle: &SessionHandle,
        call: &ToolCallRequest,
    ) -> Result<(), TurnError> {
        handle.lock_session().track_tool_call(&call.id)?;

        let (report, command) = match self.registry.classify_call(&call.name, &call.arguments) {
            Ok(classified) => classified,
            Err(e) => {
                // Unknown tool or bad arguments: the model may retry
                warn!(session_id = %handle.id, tool = %call.name, error = %e, "tool call rejected before analysis");
                self.emit_requested(handle, call, Severity::Unknown);
                self.audit.record(AuditRecord::new(
                    &handle.id,
                    &call.id,
                    &call.name,
                    None,
                    Severity::Unknown,
                    AuditDecision::Denied,
                    format!("invalid:{}", e),
                ));
                return self
                    .finish_call(handle, call, ToolCallStatus::Failed, format!("error: {}", e))
                    .await;
            }
        };
        self.emit_requested(handle, call, report.severity);

        match self.enforcer.evaluate(&report) {
            PolicyDecision::Deny { reason } => {
                warn!(
                    session_id = %handle.id,
                    tool = %call.name,
                    severity = %report.severity,
                    reason = %reason,
                    "tool call denied by policy"
                );
                self.audit.record(AuditRecord::new(
                    &handle.id,
                    &call.id,
                    &call.name,
                    command.as_deref(),
                    report.severity,
                    AuditDecision::Denied,
                    reason.clone(),
                ));
                self.finish_call(
                    handle,
                    call,
                    ToolCallStatus::Denied,
                    format!("Tool call denied by policy ({}). It was not executed.", reason),
                )
                .await
            }
            PolicyDecision::AutoApprove { reason } => {
                debug!(session_id = %handle.id, tool = %call.name, reason = %reason, "tool call auto-approved");
                handle
                    .lock_session()
                    .set_tool_status(&call.id, ToolCallStatus::Approved)?;
                self.set_state(handle, AgentState::Executing)?;
                self.execute(
                    handle,
                    call,
                    command.as_deref(),
                    report.severity,
                    AuditDecision::AutoApproved,
                    reason,
                )
                .await
            }
            PolicyDecision::RequireApproval { reason } => {
                debug!(session_id = %handle.id, tool = %call.name, reason = %reason, "tool call needs approval");
                self.set_state(handle, AgentState::WaitingForApproval)?;
                let severity = report.severity;
                let (choice_id, outcome) = self
                    .await_approval(handle, call, command.clone(), report)
                    .await;

                if outcome == ApprovalOutcome::Approved {
                    handle
                        .lock_session()
                        .set_tool_status(&call.id, ToolCallStatus::Approved)?;
                    self.set_state(handle, AgentState::Executing)?;
                    return self
                        .execute(
                            handle,
                            call,
                            command.as_deref(),
                            severity,
                            AuditDecision::Approved,
                            "human:approved".to_string(),
                        )
                        .await;
                }

                let (status, audit_reason, content) = match outcome {
                    ApprovalOutcome::Timeout => {
                        handle.emit(AgentEvent::ApprovalTimeout {
                            session_id: handle.id.clone(),
                            choice_id,
                            tool_call_id: call.id.clone(),
                        });
                        (
                            ToolCallStatus::TimedOut,
                            "timeout",
                            format!(
                                "Tool call rejected: no approval within {}s. It was not executed.",
                                self.enforcer.approval_timeout().as_secs()
                            ),
                        )
                    }
                    ApprovalOutcome::Cancelled => (
                        ToolCallStatus::Cancelled,
                        "cancelled",
                        "Tool call cancelled: the session was closed. It was not executed."
                            .to_string(),
                    ),
                    _ => (
                        ToolCallStatus::Rejected,
                        "human:rejected",
                        "Tool call rejected by the user. It was not executed.".to_string(),
                    ),
                };
                self.audit.record(AuditRecord::new(
                    &handle.id,
                    &call.id,
                    &call.name,
                    command.as_deref(),
                    severity,
                    AuditDecision::from(outcome),
                    audit_reason,
                ));
                self.finish_call(handle, call, status, content).await
            }
        }
    }

    fn emit_requested(&self, handle: &SessionHandle, call: &ToolCallRequest, severity: Severity) {
        handle.emit(AgentEvent::ToolCallRequested {
            session_id: handle.id.clone(),
            tool_call_id: call.id.clone(),
            tool: call.name.clone(),
            arguments: call.arguments.clone(),
            severity,
        });
    }

    /// Suspend the turn until a human decides, the approval times out, or
    /// the session closes. Returns the choice id and outcome.
    async fn await_approval(
        &self,
        handle: &SessionHandle,
        call: &ToolCallRequest,
        command: Option<String>,
        report: ClassificationReport,
    ) -> (String, ApprovalOutcome) {
        let choice_id = uuid::Uuid::new_v4().to_string();
        let requested_at = Utc::now();
        let expires_at = requested_at
            + chrono::Duration::from_std(self.enforcer.approval_timeout())
                .unwrap_or_else(|_| chrono::Duration::zero());
        let request = ApprovalRequest {
            choice_id: choice_id.clone(),
            session_id: handle.id.clone(),
            tool_call_id: call.id.clone(),
            tool: call.name.clone(),
            arguments: call.arguments.clone(),
            command,
            report,
            options: APPROVAL_OPTIONS.iter().map(|o| o.to_string()).collect(),
            requested_at,
            expires_at,
        };

        handle.lock_session().pending_approval = Some(choice_id.clone());
        let forwarder = EventForwarder {
            inner: self.listener.as_ref(),
            events: &handle.events,
        };
        let result = self
            .enforcer
            .request_approval(&handle.gate, &forwarder, request, handle.cancel.subscribe())
            .await;
        handle.lock_session().pending_approval = None;

        match result {
            Ok(decision) => (choice_id, decision.outcome),
            Err(e) => {
                // Never execute without a decision
                warn!(session_id = %handle.id, error = %e, "approval slot unavailable");
                (choice_id, ApprovalOutcome::Rejected)
            }
        }
    }

    async fn execute(
        &self,
        handle: &SessionHandle,
        call: &ToolCallRequest,
        command: Option<&str>,
        severity: Severity,
        decision: AuditDecision,
        reason: String,
    ) -> Result<(), TurnError> {
        let record = AuditRecord::new(
            &handle.id,
            &call.id,
            &call.name,
            command,
            severity,
            decision,
            reason,
        );
        let (status, content) = match self
            .registry
            .invoke(&call.name, call.arguments.clone())
            .await
        {
            Ok(output) => {
                let (content, truncated) =
                    truncate_output(&output.content, self.settings.max_output_bytes);
                if truncated {
                    debug!(session_id = %handle.id, tool = %call.name, "tool output truncated");
                }
                self.audit.record(record.with_result(output.summary));
                (ToolCallStatus::Executed, content)
            }
            Err(e) => {
                warn!(session_id = %handle.id, tool = %call.name, error = %e, "tool execution failed");
                self.audit.record(record.with_result(format!("error: {}", e)));
                (ToolCallStatus::Failed, format!("error: {}", e))
            }
        };
        self.finish_call(handle, call, status, content).await
    }

    /// Record the call's final status, append its result and resume.
    async fn finish_call(
        &self,
        handle: &SessionHandle,
        call: &ToolCallRequest,
        status: ToolCallStatus,
        content: String,
    ) -> Result<(), TurnError> {
        handle.lock_session().set_tool_status(&call.id, status)?;
        self.append(handle, Message::tool_result(&call.id, content.clone()))
            .await?;
        self.set_state(handle, AgentState::Running)?;
        handle.emit(AgentEvent::ToolCallCompleted {
            session_id: handle.id.clone(),
            tool_call_id: call.id.clone(),
            tool: call.name.clone(),
            status,
            output: content,
        });
        Ok(())
    }
}
