// Approval Module
//
// Safety boundary between commands the agent may run on its own and
// commands that need a human.
//
// Pipeline:
// - classifier: command text -> ClassificationReport (pure, never fails)
// - enforcer: report + policy -> auto-approve / deny / ask
// - handshake: per-session single-flight approval slot with timeout
// - history: audit records for every decision
//
// Severity precedence: Dangerous > Interactive > Write > Unknown > Read.
// Unknown is never auto-approved.

pub mod classifier;
pub mod enforcer;
pub mod handshake;
pub mod history;
pub mod parser;
pub mod report;
pub(crate) mod rules;

pub use classifier::{classify, CommandClassifier};
pub use enforcer::{ApprovalPolicy, PolicyDecision, PolicyEnforcer, PolicyError};
pub use handshake::{
    ApprovalDecision, ApprovalError, ApprovalGate, ApprovalListener, ApprovalOutcome,
    ApprovalRequest,
};
pub use history::{AuditDecision, AuditRecord, AuditSink, MemoryAuditLog, TracingAuditSink};
pub use report::{ClassificationReport, Severity, CLASSIFIER_VERSION};
