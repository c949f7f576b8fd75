//! Approval policy enforcement.
//!
//! Decision table, evaluated in order:
//!
//! 1. Command matches a blocked pattern -> deny (`blocked:pattern:<regex>`)
//! 2. Dangerous and `block_dangerous` -> deny (`blocked:dangerous`)
//! 3. Read and `auto_approve_read_only` -> approve (`auto:read`)
//! 4. Otherwise -> ask a human, bounded by `approval_timeout`
//!
//! Policy is passed in at construction; there is no process-wide enforcer.

use crate::approval::handshake::{
    ApprovalDecision, ApprovalError, ApprovalGate, ApprovalListener, ApprovalOutcome,
    ApprovalRequest,
};
use crate::approval::classifier::CommandClassifier;
use crate::approval::report::{ClassificationReport, Severity};
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

/// Default time a human has to answer.
pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Approval policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalPolicy {
    /// Read commands run without asking
    pub auto_approve_read_only: bool,
    /// Dangerous commands are refused outright instead of asking
    pub block_dangerous: bool,
    /// Regexes matched against the command text; a match always denies
    pub blocked_patterns: Vec<String>,
    pub approval_timeout: Duration,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            auto_approve_read_only: true,
            block_dangerous: false,
            blocked_patterns: Vec::new(),
            approval_timeout: DEFAULT_APPROVAL_TIMEOUT,
        }
    }
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("invalid blocked pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// What the policy says about one invocation, before any human is involved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PolicyDecision {
    AutoApprove { reason: String },
    Deny { reason: String },
    RequireApproval { reason: String },
}

impl PolicyDecision {
    pub fn reason(&self) -> &str {
        match self {
            PolicyDecision::AutoApprove { reason }
            | PolicyDecision::Deny { reason }
            | PolicyDecision::RequireApproval { reason } => reason,
        }
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, PolicyDecision::Deny { .. })
    }
}

/// Applies an [`ApprovalPolicy`] to classification reports and runs the
/// human handshake when the policy asks for one.
#[derive(Debug)]
pub struct PolicyEnforcer {
    policy: ApprovalPolicy,
    blocked: Vec<Regex>,
}

impl PolicyEnforcer {
    /// Build an enforcer, compiling every blocked pattern.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidPattern`] for the first pattern that is
    /// not a valid regex. A policy that cannot be enforced as written is
    /// refused rather than partially applied.
    pub fn new(policy: ApprovalPolicy) -> Result<Self, PolicyError> {
        let blocked = policy
            .blocked_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| PolicyError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { policy, blocked })
    }

    pub fn policy(&self) -> &ApprovalPolicy {
        &self.policy
    }

    pub fn approval_timeout(&self) -> Duration {
        self.policy.approval_timeout
    }

    /// Apply the decision table to a report.
    pub fn evaluate(&self, report: &ClassificationReport) -> PolicyDecision {
        if let Some(re) = self.blocked.iter().find(|re| re.is_match(&report.command)) {
            return PolicyDecision::Deny {
                reason: format!("blocked:pattern:{}", re.as_str()),
            };
        }

        match report.severity {
            Severity::Dangerous if self.policy.block_dangerous => PolicyDecision::Deny {
                reason: "blocked:dangerous".to_string(),
            },
            Severity::Read if self.policy.auto_approve_read_only => PolicyDecision::AutoApprove {
                reason: "auto:read".to_string(),
            },
            severity => PolicyDecision::RequireApproval {
                reason: format!("approval:{}", severity),
            },
        }
    }

    /// Classify and evaluate a command in one step.
    pub fn evaluate_command(&self, command: &str) -> (ClassificationReport, PolicyDecision) {
        let report = CommandClassifier::classify(command);
        let decision = self.evaluate(&report);
        (report, decision)
    }

    /// Publish `request` to the listener and wait for the human.
    ///
    /// Requests on the same gate queue behind one another; only one is ever
    /// visible to the listener at a time. The wait ends at the approval
    /// timeout or when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::AlreadyPending`] if the gate was opened
    /// outside of this queue.
    pub async fn request_approval(
        &self,
        gate: &ApprovalGate,
        listener: &dyn ApprovalListener,
        request: ApprovalRequest,
        cancel: watch::Receiver<bool>,
    ) -> Result<ApprovalDecision, ApprovalError> {
        let _lane = gate.acquire().await;
        let pending = gate.open(&request.choice_id, &request.tool_call_id)?;
        let choice_id = request.choice_id.clone();
        let tool_call_id = request.tool_call_id.clone();

        info!(
            session_id = %request.session_id,
            tool_call_id = %tool_call_id,
            choice_id = %choice_id,
            severity = %request.report.severity,
            "approval requested"
        );
        listener.notify(request).await;

        let outcome = gate
            .wait(pending, self.policy.approval_timeout, cancel)
            .await;
        let decided_by = match outcome {
            ApprovalOutcome::Approved | ApprovalOutcome::Rejected => "user",
            ApprovalOutcome::Timeout => "timeout",
            ApprovalOutcome::Cancelled => "system",
        };
        match outcome {
            ApprovalOutcome::Approved => info!(choice_id = %choice_id, "approval granted"),
            other => warn!(choice_id = %choice_id, outcome = %other, "approval not granted"),
        }

        Ok(ApprovalDecision {
            choice_id,
            tool_call_id,
            outcome,
            decided_by: decided_by.to_string(),
            decided_at: Utc::now(),
        })
    }
}
