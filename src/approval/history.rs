//! Approval Audit Trail
//!
//! Every tool invocation that reaches the enforcer produces one
//! [`AuditRecord`]: auto-approvals, denials, human decisions and timeouts
//! alike. Records are immutable once written.
//!
//! Sinks are fire-and-forget: [`AuditSink::record`] never fails and never
//! blocks the orchestrator on I/O.

use crate::approval::handshake::ApprovalOutcome;
use crate::approval::report::Severity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::info;

/// Final decision for one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditDecision {
    /// Policy allowed it without a prompt
    AutoApproved,
    /// Human approved it
    Approved,
    /// Human rejected it
    Rejected,
    /// Nobody answered before the approval timeout
    Timeout,
    /// Policy refused it without a prompt
    Denied,
    /// Session closed while the approval was pending
    Cancelled,
}

impl From<ApprovalOutcome> for AuditDecision {
    fn from(outcome: ApprovalOutcome) -> Self {
        match outcome {
            ApprovalOutcome::Approved => AuditDecision::Approved,
            ApprovalOutcome::Rejected => AuditDecision::Rejected,
            ApprovalOutcome::Timeout => AuditDecision::Timeout,
            ApprovalOutcome::Cancelled => AuditDecision::Cancelled,
        }
    }
}

impl std::fmt::Display for AuditDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditDecision::AutoApproved => write!(f, "AutoApproved"),
            AuditDecision::Approved => write!(f, "Approved"),
            AuditDecision::Rejected => write!(f, "Rejected"),
            AuditDecision::Timeout => write!(f, "Timeout"),
            AuditDecision::Denied => write!(f, "Denied"),
            AuditDecision::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// A single audited invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unique identifier for this record (UUID)
    pub id: String,

    /// When the decision was made (UTC)
    pub timestamp: DateTime<Utc>,

    pub session_id: String,
    pub tool_call_id: String,
    pub tool: String,

    /// Shell text, for shell-like tools
    pub command: Option<String>,

    /// Classified severity
    pub severity: Severity,

    pub decision: AuditDecision,

    /// Machine-readable reason, e.g. `blocked:dangerous` or `auto:read`
    pub reason: String,

    /// Result of execution (if it ran)
    /// Example: "exit 0 in 120ms", "error: tool not found"
    pub result_summary: Option<String>,
}

impl AuditRecord {
    pub fn new(
        session_id: &str,
        tool_call_id: &str,
        tool: &str,
        command: Option<&str>,
        severity: Severity,
        decision: AuditDecision,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
            tool_call_id: tool_call_id.to_string(),
            tool: tool.to_string(),
            command: command.map(str::to_string),
            severity,
            decision,
            reason: reason.into(),
            result_summary: None,
        }
    }

    pub fn with_result(mut self, summary: impl Into<String>) -> Self {
        self.result_summary = Some(summary.into());
        self
    }
}

/// Destination for audit records
pub trait AuditSink: Send + Sync {
    fn record(&self, record: AuditRecord);
}

/// Writes audit records to the `audit` tracing target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: AuditRecord) {
        info!(
            target: "audit",
            id = %record.id,
            session_id = %record.session_id,
            tool_call_id = %record.tool_call_id,
            tool = %record.tool,
            severity = %record.severity,
            decision = %record.decision,
            reason = %record.reason,
            result = record.result_summary.as_deref().unwrap_or(""),
            "tool invocation audited"
        );
    }
}

/// In-memory audit log
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records in insertion order
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Most recent records, newest first
    pub fn recent(&self, limit: usize) -> Vec<AuditRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.iter().rev().take(limit).cloned().collect()
    }

    /// Records for one tool call
    pub fn for_tool_call(&self, tool_call_id: &str) -> Vec<AuditRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records
            .iter()
            .filter(|r| r.tool_call_id == tool_call_id)
            .cloned()
            .collect()
    }

    /// Count records with the given decision
    pub fn count_by_decision(&self, decision: AuditDecision) -> usize {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.iter().filter(|r| r.decision == decision).count()
    }

    /// Export the log as pretty JSON (for auditing)
    pub fn export_json(&self) -> serde_json::Result<String> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        serde_json::to_string_pretty(&*records)
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemoryAuditLog {
    fn record(&self, record: AuditRecord) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }
}
