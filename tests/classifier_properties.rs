//! Classifier Property Tests
//!
//! Properties that must hold for any input, not just the curated tables.

use kubeguard_agent::approval::{classify, ApprovalPolicy, PolicyDecision, PolicyEnforcer, Severity};
use proptest::prelude::*;

/// Simple commands with no redirects or substitutions, so a compound of
/// them classifies as the maximum of its parts.
const SIMPLE: &[&str] = &[
    "kubectl get pods -n default",
    "kubectl describe node worker-1",
    "kubectl logs web-0",
    "kubectl apply -f deploy.yaml",
    "kubectl scale deployment web --replicas=3",
    "kubectl delete namespace prod",
    "kubectl exec -it web-0 -- sh",
    "helm list -A",
    "helm uninstall web",
    "cat values.yaml",
    "grep -c Running",
    "wc -l",
    "ls -la",
    "mkdir out",
    "rm -rf build",
    "vim notes.txt",
    "frobnicate --all",
    "curl https://example.com",
];

const SEPARATORS: &[&str] = &[" | ", " && ", " || ", "; "];

fn compound() -> impl Strategy<Value = (Vec<&'static str>, String)> {
    (
        prop::collection::vec(prop::sample::select(SIMPLE), 1..5),
        prop::collection::vec(prop::sample::select(SEPARATORS), 4),
    )
        .prop_map(|(parts, seps)| {
            let mut text = parts[0].to_string();
            for (part, sep) in parts.iter().skip(1).zip(seps.iter()) {
                text.push_str(sep);
                text.push_str(part);
            }
            (parts, text)
        })
}

proptest! {
    #[test]
    fn classification_is_deterministic(command in ".{0,120}") {
        let first = classify(&command);
        let second = classify(&command);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn compound_severity_is_maximum_of_parts((parts, text) in compound()) {
        let expected = parts
            .iter()
            .map(|p| classify(p).severity)
            .max()
            .unwrap();
        prop_assert_eq!(classify(&text).severity, expected, "command: {}", text);
    }

    #[test]
    fn unbalanced_quotes_are_unknown(prefix in "[a-z ]{0,20}", quote in prop::sample::select(vec!['\'', '"'])) {
        let command = format!("kubectl get pods {}{}never closed", prefix, quote);
        let report = classify(&command);
        prop_assert_eq!(report.severity, Severity::Unknown);
        prop_assert!(report.rationale.starts_with("parse error"), "{}", report.rationale);
    }

    #[test]
    fn dangling_operators_are_unknown(part in prop::sample::select(SIMPLE), op in prop::sample::select(vec!["|", "&&", "||"])) {
        let command = format!("{} {}", part, op);
        prop_assert_eq!(classify(&command).severity, Severity::Unknown);
    }

    #[test]
    fn read_is_always_auto_approved_under_default_policy(part in prop::sample::select(SIMPLE)) {
        let enforcer = PolicyEnforcer::new(ApprovalPolicy::default()).unwrap();
        let (report, decision) = enforcer.evaluate_command(part);
        let is_auto_approve = matches!(decision, PolicyDecision::AutoApprove { .. });
        prop_assert_eq!(is_auto_approve, report.severity == Severity::Read, "command: {}", part);
    }

    #[test]
    fn dangerous_is_always_denied_when_blocked((_, text) in compound()) {
        let enforcer = PolicyEnforcer::new(ApprovalPolicy {
            block_dangerous: true,
            ..Default::default()
        })
        .unwrap();
        let (report, decision) = enforcer.evaluate_command(&text);
        if report.severity == Severity::Dangerous {
            prop_assert_eq!(decision.reason(), "blocked:dangerous");
        } else {
            prop_assert!(!decision.is_denied());
        }
    }
}
