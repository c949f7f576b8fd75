//! Agent Scenario Tests
//!
//! End-to-end turns through the orchestrator with a scripted model, a
//! recording approval UI and a recording command runner, so "nothing was
//! executed" is asserted on the runner itself.

use async_trait::async_trait;
use kubeguard_agent::agent::{
    Agent, AgentEvent, AgentSettings, AgentState, CompletionRequest, CompletionResponse,
    InMemorySessionStore, LlmProvider, ProviderError, Role, TokenSink, ToolCallStatus,
};
use kubeguard_agent::approval::{
    ApprovalListener, ApprovalPolicy, ApprovalRequest, AuditDecision, MemoryAuditLog,
    PolicyEnforcer, Severity,
};
use kubeguard_agent::tools::{
    BashTool, CommandRunner, ExecutionResult, ExecutorError, KubectlTool, ToolRegistry,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Requests one tool call per user message, then answers once a tool
/// result is in.
struct OneToolModel {
    tool: String,
    arguments: serde_json::Value,
    next_id: AtomicUsize,
}

impl OneToolModel {
    fn new(tool: &str, command: &str) -> Arc<Self> {
        Arc::new(Self {
            tool: tool.to_string(),
            arguments: json!({ "command": command }),
            next_id: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl LlmProvider for OneToolModel {
    fn name(&self) -> &str {
        "one-tool"
    }

    async fn complete(
        &self,
        request: CompletionRequest,
        on_token: TokenSink<'_>,
    ) -> Result<CompletionResponse, ProviderError> {
        match request.messages.last().map(|m| m.role) {
            Some(Role::User) => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                Ok(CompletionResponse::tool_call(
                    format!("call-{}", id),
                    self.tool.clone(),
                    self.arguments.clone(),
                ))
            }
            _ => {
                on_token("finished");
                Ok(CompletionResponse::text("finished"))
            }
        }
    }
}

#[derive(Default)]
struct RecordingRunner {
    calls: Mutex<Vec<Vec<String>>>,
}

impl RecordingRunner {
    fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, argv: &[String]) -> Result<ExecutionResult, ExecutorError> {
        self.calls.lock().unwrap().push(argv.to_vec());
        Ok(ExecutionResult {
            success: true,
            stdout: "NAME    READY   STATUS\nweb-0   1/1     Running\n".to_string(),
            stderr: String::new(),
            exit_code: Some(0),
            duration_ms: 3,
            timed_out: false,
            truncated: false,
        })
    }
}

/// Approval UI double: forwards requests to the test and tracks how many
/// are outstanding at once.
struct RecordingListener {
    requests: mpsc::UnboundedSender<ApprovalRequest>,
    outstanding: Arc<AtomicUsize>,
    max_outstanding: AtomicUsize,
    notified: AtomicUsize,
}

#[async_trait]
impl ApprovalListener for RecordingListener {
    async fn notify(&self, request: ApprovalRequest) {
        let now = self.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_outstanding.fetch_max(now, Ordering::SeqCst);
        self.notified.fetch_add(1, Ordering::SeqCst);
        let _ = self.requests.send(request);
    }
}

struct Harness {
    agent: Arc<Agent>,
    runner: Arc<RecordingRunner>,
    listener: Arc<RecordingListener>,
    audit: Arc<MemoryAuditLog>,
    requests: mpsc::UnboundedReceiver<ApprovalRequest>,
}

impl Harness {
    fn new(model: Arc<OneToolModel>, policy: ApprovalPolicy) -> Self {
        let runner = Arc::new(RecordingRunner::default());
        let registry = Arc::new(ToolRegistry::new());
        registry.register_builtin(Arc::new(KubectlTool::new("kubectl", runner.clone())));
        registry.register_builtin(Arc::new(BashTool::new("/bin/sh", runner.clone())));

        let (tx, requests) = mpsc::unbounded_channel();
        let listener = Arc::new(RecordingListener {
            requests: tx,
            outstanding: Arc::new(AtomicUsize::new(0)),
            max_outstanding: AtomicUsize::new(0),
            notified: AtomicUsize::new(0),
        });
        let audit = Arc::new(MemoryAuditLog::new());
        let agent = Agent::new(
            model,
            registry,
            Arc::new(PolicyEnforcer::new(policy).unwrap()),
            listener.clone(),
            Arc::new(InMemorySessionStore::new()),
            AgentSettings::default(),
        )
        .with_audit_sink(audit.clone());

        Self {
            agent: Arc::new(agent),
            runner,
            listener,
            audit,
            requests,
        }
    }

    fn prompts(&self) -> usize {
        self.listener.notified.load(Ordering::SeqCst)
    }
}

fn drain(events: &mut broadcast::Receiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

#[tokio::test]
async fn scenario_a_read_command_auto_approved() {
    let h = Harness::new(
        OneToolModel::new("kubectl", "kubectl get pods -n default"),
        ApprovalPolicy::default(),
    );

    let outcome = h.agent.send_user_message("a", "what is running?").await.unwrap();

    assert_eq!(outcome.state, AgentState::Done);
    assert_eq!(outcome.reply.as_deref(), Some("finished"));
    assert_eq!(h.prompts(), 0);
    assert_eq!(
        h.runner.calls(),
        vec![vec!["kubectl", "get", "pods", "-n", "default"]]
    );

    let records = h.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].severity, Severity::Read);
    assert_eq!(records[0].decision, AuditDecision::AutoApproved);
    assert_eq!(records[0].reason, "auto:read");

    let tool_result = outcome.transcript.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool_result.content.contains("web-0"));
}

#[tokio::test]
async fn scenario_b_dangerous_command_blocked() {
    let h = Harness::new(
        OneToolModel::new("kubectl", "kubectl delete namespace prod"),
        ApprovalPolicy {
            block_dangerous: true,
            ..Default::default()
        },
    );
    let mut events = h.agent.subscribe("b");

    let outcome = h.agent.send_user_message("b", "clean up prod").await.unwrap();

    // The loop continues after the denial and the model answers
    assert_eq!(outcome.state, AgentState::Done);
    assert_eq!(h.prompts(), 0);
    assert!(h.runner.calls().is_empty());

    let records = h.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].decision, AuditDecision::Denied);
    assert_eq!(records[0].reason, "blocked:dangerous");
    assert_eq!(records[0].severity, Severity::Dangerous);

    let tool_result = outcome.transcript.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool_result.content.contains("denied by policy"));

    let completed = drain(&mut events).into_iter().find_map(|e| match e {
        AgentEvent::ToolCallCompleted { status, .. } => Some(status),
        _ => None,
    });
    assert_eq!(completed, Some(ToolCallStatus::Denied));
}

#[tokio::test]
async fn scenario_c_pipeline_escalation_requires_approval() {
    let mut h = Harness::new(
        OneToolModel::new("bash", "kubectl get pods | xargs kubectl delete pod"),
        ApprovalPolicy::default(),
    );
    let mut events = h.agent.subscribe("c");

    let agent = h.agent.clone();
    let turn = tokio::spawn(async move { agent.send_user_message("c", "restart pods").await });

    let request = h.requests.recv().await.unwrap();
    assert_eq!(request.report.severity, Severity::Dangerous);
    assert_eq!(request.report.sub_commands.len(), 2);
    assert_eq!(request.report.sub_commands[0].severity, Severity::Read);
    assert_eq!(request.options, vec!["approve", "reject"]);
    assert!(h.runner.calls().is_empty());

    h.agent.send_approval("c", &request.choice_id, false).unwrap();
    let outcome = turn.await.unwrap().unwrap();

    assert_eq!(outcome.state, AgentState::Done);
    assert!(h.runner.calls().is_empty());
    assert_eq!(h.audit.records()[0].decision, AuditDecision::Rejected);
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, AgentEvent::ApprovalRequested { request, .. } if request.report.severity == Severity::Dangerous)));
}

#[tokio::test(start_paused = true)]
async fn scenario_d_approval_timeout_rejects() {
    let h = Harness::new(
        OneToolModel::new("kubectl", "kubectl rollout restart deployment/web"),
        ApprovalPolicy {
            approval_timeout: Duration::from_secs(30),
            ..Default::default()
        },
    );
    let mut events = h.agent.subscribe("d");

    let started = tokio::time::Instant::now();
    let outcome = h.agent.send_user_message("d", "restart web").await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_secs(30), "{:?}", elapsed);
    assert!(elapsed < Duration::from_secs(31), "{:?}", elapsed);

    assert_eq!(outcome.state, AgentState::Done);
    assert_eq!(h.prompts(), 1);
    assert!(h.runner.calls().is_empty());

    let tool_result = outcome.transcript.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool_result.content.contains("no approval within 30s"));
    // A final answer follows the rejected-tool message
    assert_eq!(outcome.transcript.last().unwrap().role, Role::Assistant);

    let records = h.audit.records();
    assert_eq!(records[0].decision, AuditDecision::Timeout);
    assert_eq!(records[0].reason, "timeout");

    let session = h.agent.session_snapshot("d").unwrap();
    assert_eq!(session.tool_status("call-0"), Some(ToolCallStatus::TimedOut));
    assert!(session.pending_approval.is_none());
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, AgentEvent::ApprovalTimeout { tool_call_id, .. } if tool_call_id == "call-0")));
}

#[tokio::test]
async fn single_flight_approval_under_concurrent_messages() {
    let mut h = Harness::new(
        OneToolModel::new("kubectl", "kubectl scale deployment web --replicas=2"),
        ApprovalPolicy::default(),
    );
    const TURNS: usize = 12;

    let agent = h.agent.clone();
    let outstanding = Arc::clone(&h.listener.outstanding);
    let approver = tokio::spawn(async move {
        let mut decided = 0;
        while decided < TURNS {
            let Some(request) = h.requests.recv().await else {
                break;
            };
            tokio::time::sleep(Duration::from_millis(2)).await;
            outstanding.fetch_sub(1, Ordering::SeqCst);
            agent
                .send_approval(&request.session_id, &request.choice_id, true)
                .unwrap();
            decided += 1;
        }
        decided
    });

    let turns = (0..TURNS).map(|i| {
        let agent = Arc::clone(&h.agent);
        async move { agent.send_user_message("stress", &format!("scale #{}", i)).await }
    });
    let outcomes = futures::future::join_all(turns).await;

    assert_eq!(approver.await.unwrap(), TURNS);
    assert!(outcomes.iter().all(|o| o.as_ref().unwrap().state == AgentState::Done));
    assert_eq!(h.listener.max_outstanding.load(Ordering::SeqCst), 1);
    assert_eq!(h.runner.calls().len(), TURNS);

    // Every call's result directly follows the assistant message that issued it
    let session = h.agent.session_snapshot("stress").unwrap();
    for (i, message) in session.messages.iter().enumerate() {
        if let Some(call) = message.tool_calls.first() {
            let next = &session.messages[i + 1];
            assert_eq!(next.tool_call_id.as_deref(), Some(call.id.as_str()));
        }
    }
}

#[tokio::test]
async fn sessions_run_independently() {
    let mut h = Harness::new(
        OneToolModel::new("kubectl", "kubectl apply -f web.yaml"),
        ApprovalPolicy::default(),
    );

    // Session "slow" waits on a human; session "fast" must not be held up
    let agent = h.agent.clone();
    let slow = tokio::spawn(async move { agent.send_user_message("slow", "deploy").await });
    let pending = h.requests.recv().await.unwrap();
    assert_eq!(pending.session_id, "slow");

    let agent = h.agent.clone();
    let fast = tokio::spawn(async move { agent.send_user_message("fast", "deploy").await });
    let second = h.requests.recv().await.unwrap();
    assert_eq!(second.session_id, "fast");
    h.agent.send_approval("fast", &second.choice_id, true).unwrap();
    assert_eq!(fast.await.unwrap().unwrap().state, AgentState::Done);

    // A choice id from another session is not accepted
    assert!(h.agent.send_approval("fast", &pending.choice_id, true).is_err());

    h.agent.send_approval("slow", &pending.choice_id, false).unwrap();
    assert_eq!(slow.await.unwrap().unwrap().state, AgentState::Done);
    assert_eq!(h.runner.calls().len(), 1);
}
