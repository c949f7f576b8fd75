//! Classification report types.
//!
//! A [`ClassificationReport`] is the only thing the classifier ever returns:
//! parse failures, unknown programs and nesting limits all surface as a
//! report with [`Severity::Unknown`] rather than an error.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Version of the rule tables. Two reports for the same command text are
/// identical whenever this value is identical.
pub const CLASSIFIER_VERSION: &str = "2024.1";

/// Risk taxonomy for a command.
///
/// Variant order is the precedence order, lowest first, so `Ord` gives
/// `Dangerous > Interactive > Write > Unknown > Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Observes cluster or local state without changing it
    Read,
    /// Not recognised; always requires a human decision
    Unknown,
    /// Mutates cluster or filesystem state
    Write,
    /// Attaches a TTY or long-lived stream
    Interactive,
    /// Irreversible or wide-blast-radius mutation
    Dangerous,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Read => "read",
            Severity::Unknown => "unknown",
            Severity::Write => "write",
            Severity::Interactive => "interactive",
            Severity::Dangerous => "dangerous",
        }
    }

    /// Raise a read-only severity to `Write`; anything else is unchanged.
    pub fn escalate_read(self) -> Self {
        if self == Severity::Read {
            Severity::Write
        } else {
            self
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of expansion that runs (or may run) a nested command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubstitutionKind {
    /// `$(...)`
    Command,
    /// `` `...` ``
    Backquote,
    /// `<(...)`
    ProcessInput,
    /// `>(...)`
    ProcessOutput,
    /// `$((...))`
    Arithmetic,
    /// `${...}` whose body contains a command substitution
    Parameter,
    /// Unquoted here-document body containing a command substitution
    HereDocument,
}

impl SubstitutionKind {
    /// Whether the body is shell source that can be parsed and classified.
    pub fn is_script(self) -> bool {
        matches!(
            self,
            SubstitutionKind::Command
                | SubstitutionKind::Backquote
                | SubstitutionKind::ProcessInput
                | SubstitutionKind::ProcessOutput
        )
    }
}

/// One simple command found anywhere in the tree, including inside
/// substitutions and `sh -c` strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubCommandReport {
    /// Words after quote removal, leading assignments excluded
    pub argv: Vec<String>,
    /// Program after wrappers (`sudo`, `xargs`, ...) were stripped
    pub program: Option<String>,
    pub severity: Severity,
    pub rationale: String,
    /// 0 for top level, +1 per substitution or `sh -c` level
    pub depth: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectReport {
    pub operator: String,
    pub target: String,
    /// True when the redirect creates or overwrites a file
    pub writes: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstitutionReport {
    pub kind: SubstitutionKind,
    pub body: String,
    /// Maximum severity of the commands inside the body
    pub severity: Severity,
}

/// Result of classifying one command string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationReport {
    /// Literal command text as received
    pub command: String,
    /// Overall severity: maximum over every sub-command and substitution
    pub severity: Severity,
    pub sub_commands: Vec<SubCommandReport>,
    pub redirects: Vec<RedirectReport>,
    pub substitutions: Vec<SubstitutionReport>,
    /// Human-readable explanation of the overall severity
    pub rationale: String,
    pub classifier_version: String,
}

impl ClassificationReport {
    /// Report for input that could not be analysed at all.
    pub fn unknown(command: impl Into<String>, rationale: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            severity: Severity::Unknown,
            sub_commands: Vec::new(),
            redirects: Vec::new(),
            substitutions: Vec::new(),
            rationale: rationale.into(),
            classifier_version: CLASSIFIER_VERSION.to_string(),
        }
    }

    /// Report for a tool invocation that is not shell-like (e.g. an MCP tool).
    ///
    /// The tool's own safety hints are advisory, so the invocation is
    /// treated as unrecognised and will always reach a human.
    pub fn opaque_tool(tool_name: &str) -> Self {
        Self::unknown(
            tool_name,
            format!("tool '{}' is not a shell command; risk cannot be analysed", tool_name),
        )
    }

    /// True for pipelines, lists and anything with substitutions.
    pub fn is_compound(&self) -> bool {
        self.sub_commands.len() > 1 || !self.substitutions.is_empty()
    }

    /// True when any redirect writes to a file.
    pub fn has_write_redirect(&self) -> bool {
        self.redirects.iter().any(|r| r.writes)
    }

    /// One-line summary for logs and approval prompts.
    pub fn summary(&self) -> String {
        format!(
            "{} ({} sub-command{}): {}",
            self.severity,
            self.sub_commands.len(),
            if self.sub_commands.len() == 1 { "" } else { "s" },
            self.rationale
        )
    }
}
