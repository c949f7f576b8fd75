//! Command Safety Classifier
//!
//! Turns a candidate shell/CLI command into a [`ClassificationReport`].
//!
//! # Classification Strategy
//!
//! 1. Parse the text with the shell grammar subset in [`crate::approval::parser`]
//! 2. Walk every simple command, including those inside `$(...)`, backquotes,
//!    process substitutions and `sh -c` strings
//! 3. Map each program and its leading verb through [`crate::approval::rules`]
//! 4. Overall severity is the maximum under
//!    `Dangerous > Interactive > Write > Unknown > Read`
//! 5. A file-writing redirect or any substitution raises a Read command to Write
//!
//! # Principle: Conservative Default
//!
//! Anything that cannot be parsed or recognised is [`Severity::Unknown`],
//! which is never auto-approved. The classifier holds no state and never
//! fails: every input produces a report.

use crate::approval::parser::{self, Command, Redirect, Script, SimpleCommand, Substitution};
use crate::approval::report::{
    ClassificationReport, RedirectReport, Severity, SubCommandReport, SubstitutionKind,
    SubstitutionReport, CLASSIFIER_VERSION,
};
use crate::approval::rules::{self, Verdict};

/// Maximum substitution / `sh -c` nesting that is analysed.
const MAX_NESTING: usize = 8;

/// Stateless classifier for shell commands
pub struct CommandClassifier;

impl CommandClassifier {
    /// Classify a command string
    ///
    /// # Arguments
    ///
    /// * `command` - Raw command text proposed for execution
    ///
    /// # Returns
    ///
    /// A report with the overall severity, every sub-command found, and any
    /// redirects and substitutions
    ///
    /// # Examples
    ///
    /// ```
    /// use kubeguard_agent::approval::classifier::CommandClassifier;
    /// use kubeguard_agent::approval::report::Severity;
    ///
    /// let report = CommandClassifier::classify("kubectl get pods -n default");
    /// assert_eq!(report.severity, Severity::Read);
    ///
    /// let report = CommandClassifier::classify("kubectl get pods | xargs kubectl delete pod");
    /// assert_eq!(report.severity, Severity::Dangerous);
    /// ```
    pub fn classify(command: &str) -> ClassificationReport {
        if command.trim().is_empty() {
            return ClassificationReport::unknown(command, "empty command");
        }

        let script = match parser::parse(command) {
            Ok(script) => script,
            Err(e) => {
                return ClassificationReport::unknown(command, format!("parse error: {}", e));
            }
        };

        let mut walk = Walk::default();
        let mut severity = walk.script(&script, 0);

        if walk.sub_commands.is_empty() {
            return ClassificationReport::unknown(command, "no executable command found");
        }

        let escalated = severity == Severity::Read
            && (walk.redirects.iter().any(|r| r.writes) || !walk.substitutions.is_empty());
        if escalated {
            severity = Severity::Write;
            walk.notes
                .push("output redirect or substitution raises read to write".to_string());
        }

        let rationale = walk.rationale(severity);
        ClassificationReport {
            command: command.to_string(),
            severity,
            sub_commands: walk.sub_commands,
            redirects: walk.redirects,
            substitutions: walk.substitutions,
            rationale,
            classifier_version: CLASSIFIER_VERSION.to_string(),
        }
    }

    /// Severity of several commands that would run together.
    pub fn classify_batch(commands: &[&str]) -> Severity {
        commands
            .iter()
            .map(|c| Self::classify(c).severity)
            .max()
            .unwrap_or(Severity::Unknown)
    }
}

/// Shorthand for [`CommandClassifier::classify`].
pub fn classify(command: &str) -> ClassificationReport {
    CommandClassifier::classify(command)
}

#[derive(Default)]
struct Walk {
    sub_commands: Vec<SubCommandReport>,
    redirects: Vec<RedirectReport>,
    substitutions: Vec<SubstitutionReport>,
    notes: Vec<String>,
}

impl Walk {
    fn script(&mut self, script: &Script, depth: usize) -> Severity {
        let mut severity = Severity::Read;
        for item in &script.items {
            for pipeline in item.and_or.pipelines() {
                for command in &pipeline.commands {
                    severity = severity.max(self.command(command, depth));
                }
            }
        }
        severity
    }

    fn command(&mut self, command: &Command, depth: usize) -> Severity {
        match command {
            Command::Simple(simple) => self.simple(simple, depth),
            Command::Subshell { body, redirects } => {
                let inner = self.script(body, depth);
                let (escalate, nested) = self.redirects(redirects, depth);
                let severity = inner.max(nested);
                if escalate {
                    severity.escalate_read()
                } else {
                    severity
                }
            }
        }
    }

    /// Record redirects. Returns whether any of them escalates a Read command
    /// and the highest severity found in substitutions inside their targets.
    fn redirects(&mut self, redirects: &[Redirect], depth: usize) -> (bool, Severity) {
        let mut escalate = false;
        let mut nested = Severity::Read;
        for redirect in redirects {
            let writes = redirect.writes_file();
            escalate |= writes;
            self.redirects.push(RedirectReport {
                operator: redirect.display(),
                target: redirect.target.text.clone(),
                writes,
            });
            for sub in &redirect.target.substitutions {
                nested = nested.max(self.substitution(sub, depth));
                escalate = true;
            }
        }
        (escalate, nested)
    }

    fn simple(&mut self, command: &SimpleCommand, depth: usize) -> Severity {
        let mut nested = Severity::Read;
        let mut escalate = false;
        for word in &command.words {
            for sub in &word.substitutions {
                nested = nested.max(self.substitution(sub, depth));
                escalate = true;
            }
        }
        let (redirect_escalate, redirect_nested) = self.redirects(&command.redirects, depth);
        escalate |= redirect_escalate;
        nested = nested.max(redirect_nested);

        let argv = command.argv();
        let (program, mut severity, mut rationale) = if argv.is_empty() {
            let what = if command.assignments().next().is_some() {
                "variable assignment"
            } else {
                "redirect without a command"
            };
            (None, Severity::Read, what.to_string())
        } else {
            match rules::classify_argv(&argv) {
                Verdict::Leaf {
                    program,
                    severity,
                    rationale,
                } => (program, severity, rationale),
                Verdict::Script {
                    program,
                    source,
                    floor,
                } => {
                    let inner = self.source(&source, depth + 1);
                    let rationale = format!("{} -c runs an inline script ({})", program, inner);
                    (Some(program), inner.max(floor), rationale)
                }
                Verdict::NoOp => {
                    if !escalate && command.redirects.is_empty() {
                        return nested;
                    }
                    (None, Severity::Read, "shell keyword".to_string())
                }
            }
        };

        if escalate && severity == Severity::Read {
            severity = Severity::Write;
            rationale.push_str("; output redirect or substitution");
        }

        self.sub_commands.push(SubCommandReport {
            argv,
            program,
            severity,
            rationale,
            depth,
        });
        severity.max(nested)
    }

    fn substitution(&mut self, sub: &Substitution, depth: usize) -> Severity {
        let severity = match sub.kind {
            kind if kind.is_script() => self.source(&sub.body, depth + 1),
            SubstitutionKind::Arithmetic => {
                if sub.body.contains("$(") || sub.body.contains('`') {
                    self.notes
                        .push("arithmetic expansion contains a command substitution".to_string());
                    Severity::Unknown
                } else {
                    Severity::Read
                }
            }
            SubstitutionKind::HereDocument => Severity::Read,
            _ => {
                self.notes
                    .push("command substitution inside parameter expansion".to_string());
                Severity::Unknown
            }
        };
        self.substitutions.push(SubstitutionReport {
            kind: sub.kind,
            body: sub.body.clone(),
            severity,
        });
        severity
    }

    /// Parse and walk nested shell source.
    fn source(&mut self, source: &str, depth: usize) -> Severity {
        if depth > MAX_NESTING {
            self.notes
                .push(format!("nesting deeper than {} levels not analysed", MAX_NESTING));
            return Severity::Unknown;
        }
        match parser::parse(source) {
            Ok(script) => self.script(&script, depth),
            Err(e) => {
                self.notes.push(format!("nested parse error: {}", e));
                Severity::Unknown
            }
        }
    }

    fn rationale(&self, severity: Severity) -> String {
        let worst = self
            .sub_commands
            .iter()
            .filter(|s| s.severity == severity)
            .min_by_key(|s| s.depth)
            .or_else(|| self.sub_commands.iter().max_by_key(|s| s.severity));

        let mut text = match worst {
            Some(entry) if self.sub_commands.len() == 1 => entry.rationale.clone(),
            Some(entry) => format!(
                "{} sub-commands; highest risk '{}': {}",
                self.sub_commands.len(),
                entry.argv.join(" "),
                entry.rationale
            ),
            None => String::from("no executable command found"),
        };
        for note in &self.notes {
            text.push_str("; ");
            text.push_str(note);
        }
        text
    }
}
