//! End-to-end orchestrator pipeline tests.
//!
//! Agents run without retrieval (corpus fallback) and the policy gate
//! points at a dead port, so every verdict comes from the deterministic
//! fallback ruleset. No external services are needed.

use std::collections::HashSet;

use cs_agents::{AnalystAgent, ResponderAgent, ScoutAgent};
use cs_core::Severity;
use cs_frame::{Alert, EntityRef, Finding, Frame};
use cs_orchestrator::state::replay_decisions;
use cs_orchestrator::{IncidentStatus, Orchestrator, OrchestratorConfig, Step};
use cs_playbook::PlaybookCatalog;
use cs_policy::PolicyGate;

fn orchestrator_in(dir: &std::path::Path, max_tokens: i64) -> Orchestrator {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let config = OrchestratorConfig {
        max_tokens,
        checkpoint_path: dir.join("checkpoints"),
        ..OrchestratorConfig::default()
    };
    Orchestrator::new(
        config,
        ScoutAgent::new(None),
        AnalystAgent::new(None),
        ResponderAgent::new(
            PlaybookCatalog::builtin(),
            PolicyGate::new("http://127.0.0.1:59999"),
        ),
    )
    .expect("orchestrator")
}

fn ssh_alert_frame(incident: &str, id: &str, ts_ms: i64) -> Frame {
    Frame::alert(
        ts_ms,
        incident,
        Alert {
            ts_ms,
            id: id.to_string(),
            severity: Severity::High,
            entities: vec![
                EntityRef::new("ip", "192.168.1.100"),
                EntityRef::new("host", "web-01"),
                EntityRef::new("user", "admin"),
            ],
            tags: vec!["ssh".into(), "brute_force".into(), "T1110".into()],
            summary: "SSH brute force attack detected".into(),
            evidence_ref: format!("ev://{id}"),
        },
    )
}

fn quiet_alert_frame(incident: &str) -> Frame {
    Frame::alert(
        1_700_000_000_000,
        incident,
        Alert {
            ts_ms: 1_700_000_000_000,
            id: "quiet-1".into(),
            severity: Severity::Low,
            entities: vec![],
            tags: vec![],
            summary: "scheduled certificate rotation".into(),
            evidence_ref: String::new(),
        },
    )
}

fn ransomware_frames(incident: &str) -> Vec<Frame> {
    let ts = 1_700_000_000_000;
    vec![
        Frame::alert(
            ts,
            incident,
            Alert {
                ts_ms: ts,
                id: "ransom-1".into(),
                severity: Severity::Critical,
                entities: vec![
                    EntityRef::new("host", "file-01"),
                    EntityRef::new("proc", "cryptor.exe"),
                ],
                tags: vec!["ransomware".into(), "T1486".into()],
                summary: "Mass file encryption activity detected".into(),
                evidence_ref: "ev://ransom-1".into(),
            },
        ),
        Frame::finding(
            ts + 1000,
            incident,
            Finding {
                ts_ms: ts + 1000,
                id: "rt-finding".into(),
                hypothesis: "Ransomware deployment underway".into(),
                graph_nodes: vec![EntityRef::new("host", "file-01")],
                candidate_ttps: vec!["T1486".into()],
                rationale_json: "{}".into(),
            },
        ),
    ]
}

#[tokio::test]
async fn low_signal_incident_completes_after_scout() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator_in(dir.path(), 10_000);

    let outcome = orchestrator
        .process_incident("inc-quiet", vec![quiet_alert_frame("inc-quiet")])
        .await
        .unwrap();

    assert_eq!(outcome.status, IncidentStatus::Completed);
    let steps: Vec<Step> = outcome.state.decisions.iter().map(|d| d.step).collect();
    assert_eq!(steps, vec![Step::Ingest, Step::Scout, Step::Completed]);
    assert!(outcome.state.confidence <= 0.3);
}

#[tokio::test]
async fn ssh_brute_force_runs_the_full_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator_in(dir.path(), 10_000);

    let frames = vec![
        ssh_alert_frame("inc-ssh", "a1", 1_700_000_000_000),
        ssh_alert_frame("inc-ssh", "a2", 1_700_000_090_000),
    ];
    let outcome = orchestrator
        .process_incident("inc-ssh", frames)
        .await
        .unwrap();

    let steps: HashSet<Step> = outcome.state.decisions.iter().map(|d| d.step).collect();
    assert!(steps.contains(&Step::Scout));
    assert!(steps.contains(&Step::Analyst));
    assert!(steps.contains(&Step::Responder));

    assert!(outcome.state.candidate_ttps.contains(&"T1110".to_string()));
    assert!(outcome.state.confidence > 0.7);
    // Medium assessed risk under the fallback policy needs approval,
    // so the incident lands with a human.
    assert_eq!(outcome.status, IncidentStatus::Escalated);

    let responder_decision = outcome
        .state
        .decisions
        .iter()
        .find(|d| d.step == Step::Responder)
        .unwrap();
    assert_eq!(
        responder_decision.metrics["policy_decision"]["policy_source"],
        "fallback"
    );
}

#[tokio::test]
async fn high_risk_response_is_gated_to_escalation() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator_in(dir.path(), 10_000);

    let outcome = orchestrator
        .process_incident("inc-ransom", ransomware_frames("inc-ransom"))
        .await
        .unwrap();

    assert_eq!(outcome.status, IncidentStatus::Escalated);
    assert!(outcome.state.approval_required);

    let responder_decision = outcome
        .state
        .decisions
        .iter()
        .find(|d| d.step == Step::Responder)
        .expect("responder ran");
    let playbooks = responder_decision.metrics["playbooks_selected"]
        .as_array()
        .unwrap();
    assert!(playbooks.iter().any(|p| p == "isolate_infected_hosts"));
    assert_eq!(responder_decision.metrics["risk_tier"], "high");
    assert!(responder_decision.metrics["policy_decision"]["approval_required"]
        .as_bool()
        .unwrap());
}

#[tokio::test]
async fn budget_exhaustion_routes_to_escalation() {
    let dir = tempfile::tempdir().unwrap();
    // Scout alone costs more than this budget.
    let orchestrator = orchestrator_in(dir.path(), 50);

    let outcome = orchestrator
        .process_incident("inc-budget", vec![ssh_alert_frame("inc-budget", "a1", 1_700_000_000_000)])
        .await
        .unwrap();

    assert_eq!(outcome.status, IncidentStatus::Escalated);
    assert!(outcome.state.budget_tokens <= 0);
    let escalation = outcome
        .state
        .decisions
        .iter()
        .find(|d| d.step == Step::Escalated)
        .unwrap();
    assert!(escalation.metrics["budget_exhausted"].as_bool().unwrap());
    // The analyst never ran.
    assert!(outcome
        .state
        .decisions
        .iter()
        .all(|d| d.step != Step::Analyst));
}

#[tokio::test]
async fn terminal_incident_resumes_from_checkpoint_without_reprocessing() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator_in(dir.path(), 10_000);

    let first = orchestrator
        .process_incident("inc-resume", vec![quiet_alert_frame("inc-resume")])
        .await
        .unwrap();
    let decisions_before = first.state.decisions.len();

    // A redelivered frame after completion is absorbed by the
    // checkpoint short-circuit; the audit log does not grow.
    let second = orchestrator
        .process_incident("inc-resume", vec![quiet_alert_frame("inc-resume")])
        .await
        .unwrap();
    assert_eq!(second.status, first.status);
    assert_eq!(second.state.decisions.len(), decisions_before);
}

#[tokio::test]
async fn decision_log_replay_reproduces_final_state() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator_in(dir.path(), 10_000);

    let outcome = orchestrator
        .process_incident("inc-replay", ransomware_frames("inc-replay"))
        .await
        .unwrap();
    let state = &outcome.state;

    let replayed = replay_decisions(&state.decisions, 10_000);
    assert_eq!(replayed.current_step, state.current_step);
    assert_eq!(replayed.severity, state.severity);
    assert!((replayed.confidence - state.confidence).abs() < 1e-9);
    assert_eq!(replayed.budget_tokens, state.budget_tokens);
    assert_eq!(replayed.approval_required, state.approval_required);

    let replayed_ttps: HashSet<&String> = replayed.candidate_ttps.iter().collect();
    let state_ttps: HashSet<&String> = state.candidate_ttps.iter().collect();
    assert_eq!(replayed_ttps, state_ttps);
}

#[tokio::test]
async fn checkpoints_persist_across_orchestrator_restarts() {
    let dir = tempfile::tempdir().unwrap();
    {
        let orchestrator = orchestrator_in(dir.path(), 10_000);
        orchestrator
            .process_incident("inc-durable", vec![quiet_alert_frame("inc-durable")])
            .await
            .unwrap();
    }

    // A fresh orchestrator over the same checkpoint directory sees the
    // terminal state.
    let orchestrator = orchestrator_in(dir.path(), 10_000);
    let loaded = orchestrator
        .checkpoints()
        .load("inc-durable")
        .unwrap()
        .expect("checkpoint survives restart");
    assert_eq!(loaded.current_step, Step::Completed);
}
