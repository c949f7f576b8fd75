//! Human approval handshake.
//!
//! Each session owns one [`ApprovalGate`]. The gate holds at most one
//! pending request; the orchestrator parks on [`ApprovalGate::wait`] until
//! the UI calls [`ApprovalGate::decide`], the approval timeout elapses, or
//! the session is cancelled.
//!
//! A decision accepted by `decide` is never dropped: if it races with the
//! timeout, the waiter observes the decision rather than the timeout.

use crate::approval::report::ClassificationReport;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

/// Options offered to the human for every request.
pub const APPROVAL_OPTIONS: [&str; 2] = ["approve", "reject"];

/// Payload published to the approval listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Identifier the UI passes back to `decide`
    pub choice_id: String,
    pub session_id: String,
    pub tool_call_id: String,
    pub tool: String,
    pub arguments: serde_json::Value,
    /// Shell text when the tool is shell-like
    pub command: Option<String>,
    pub report: ClassificationReport,
    pub options: Vec<String>,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// How an approval wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalOutcome {
    Approved,
    Rejected,
    /// No decision within the approval timeout; treated as a rejection
    Timeout,
    /// Session closed while waiting; treated as a rejection
    Cancelled,
}

impl ApprovalOutcome {
    pub fn allows_execution(self) -> bool {
        self == ApprovalOutcome::Approved
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalOutcome::Approved => "approved",
            ApprovalOutcome::Rejected => "rejected",
            ApprovalOutcome::Timeout => "timeout",
            ApprovalOutcome::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ApprovalOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final record of one approval handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub choice_id: String,
    pub tool_call_id: String,
    pub outcome: ApprovalOutcome,
    /// "user" for human decisions, "timeout" or "system" otherwise
    pub decided_by: String,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApprovalError {
    #[error("approval already pending for tool call {0}")]
    AlreadyPending(String),

    #[error("no pending approval with choice id {0}")]
    UnknownChoice(String),
}

/// External UI that presents approval requests.
///
/// The UI answers later, out of band, through the owning session's
/// `decide` entry point.
#[async_trait]
pub trait ApprovalListener: Send + Sync {
    async fn notify(&self, request: ApprovalRequest);
}

struct PendingSlot {
    choice_id: String,
    tool_call_id: String,
    sender: oneshot::Sender<bool>,
}

/// Ticket returned by [`ApprovalGate::open`]; consumed by [`ApprovalGate::wait`].
pub struct PendingApproval {
    choice_id: String,
    receiver: oneshot::Receiver<bool>,
}

impl PendingApproval {
    pub fn choice_id(&self) -> &str {
        &self.choice_id
    }
}

/// Single-flight approval slot for one session.
pub struct ApprovalGate {
    slot: Mutex<Option<PendingSlot>>,
    /// Serialises requests so a second one queues behind the first
    lane: tokio::sync::Mutex<()>,
}

impl Default for ApprovalGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            lane: tokio::sync::Mutex::new(()),
        }
    }

    /// Wait for exclusive use of the gate. Hold the guard across
    /// `open` + `wait` to queue behind any request already outstanding.
    pub async fn acquire(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.lane.lock().await
    }

    /// Open the slot for a new request.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::AlreadyPending`] if another request is
    /// outstanding.
    pub fn open(
        &self,
        choice_id: &str,
        tool_call_id: &str,
    ) -> Result<PendingApproval, ApprovalError> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = slot.as_ref() {
            return Err(ApprovalError::AlreadyPending(existing.tool_call_id.clone()));
        }
        let (sender, receiver) = oneshot::channel();
        *slot = Some(PendingSlot {
            choice_id: choice_id.to_string(),
            tool_call_id: tool_call_id.to_string(),
            sender,
        });
        Ok(PendingApproval {
            choice_id: choice_id.to_string(),
            receiver,
        })
    }

    /// Deliver a human decision for the pending request.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::UnknownChoice`] when nothing is pending under
    /// `choice_id` (already decided, timed out, or never opened).
    pub fn decide(&self, choice_id: &str, approved: bool) -> Result<(), ApprovalError> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        match slot.take() {
            Some(pending) if pending.choice_id == choice_id => {
                pending
                    .sender
                    .send(approved)
                    .map_err(|_| ApprovalError::UnknownChoice(choice_id.to_string()))
            }
            other => {
                *slot = other;
                Err(ApprovalError::UnknownChoice(choice_id.to_string()))
            }
        }
    }

    /// Drop any pending request; its waiter resolves as `Cancelled`.
    pub fn cancel(&self) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.take().is_some()
    }

    /// Choice id of the outstanding request, if any.
    pub fn pending_choice(&self) -> Option<String> {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.as_ref().map(|p| p.choice_id.clone())
    }

    pub fn is_pending(&self) -> bool {
        self.pending_choice().is_some()
    }

    /// Remove the slot if it still belongs to `choice_id`.
    fn clear(&self, choice_id: &str) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|p| p.choice_id == choice_id) {
            *slot = None;
            true
        } else {
            false
        }
    }

    /// Wait for the decision on `pending`.
    ///
    /// Resolves at the latest after `timeout`, or immediately when `cancel`
    /// becomes `true` (or its sender is dropped).
    pub async fn wait(
        &self,
        pending: PendingApproval,
        timeout: Duration,
        mut cancel: watch::Receiver<bool>,
    ) -> ApprovalOutcome {
        let PendingApproval {
            choice_id,
            mut receiver,
        } = pending;

        let outcome = tokio::select! {
            result = &mut receiver => match result {
                Ok(true) => ApprovalOutcome::Approved,
                Ok(false) => ApprovalOutcome::Rejected,
                Err(_) => ApprovalOutcome::Cancelled,
            },
            _ = tokio::time::sleep(timeout) => ApprovalOutcome::Timeout,
            _ = async {
                let _ = cancel.wait_for(|cancelled| *cancelled).await;
            } => ApprovalOutcome::Cancelled,
        };

        if matches!(outcome, ApprovalOutcome::Timeout | ApprovalOutcome::Cancelled)
            && !self.clear(&choice_id)
        {
            // decide() won the race and took the slot
            if let Ok(approved) = receiver.try_recv() {
                debug!(choice_id = %choice_id, approved, "decision arrived at deadline");
                return if approved {
                    ApprovalOutcome::Approved
                } else {
                    ApprovalOutcome::Rejected
                };
            }
        }
        if outcome == ApprovalOutcome::Timeout {
            warn!(choice_id = %choice_id, timeout_ms = timeout.as_millis() as u64, "approval timed out");
        }
        outcome
    }
}
