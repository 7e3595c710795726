//! Incident state and the decision audit log

use serde::{Deserialize, Serialize};
use serde_json::Value;

use cs_agents::{AnalystFindings, ResponsePlan, ScoutFindings};
use cs_core::Severity;
use cs_frame::{EntityRef, Frame};

/// Workflow node / position of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    #[default]
    Ingest,
    Scout,
    Analyst,
    Responder,
    Escalated,
    Completed,
}

/// Terminal status of one incident run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Completed,
    Escalated,
    Failed,
}

/// One append-only audit entry per transition. Never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub step: Step,
    pub ts_ms: i64,
    pub decision_text: String,
    /// Structured metrics for the step, including the state deltas
    /// needed to replay the run.
    pub metrics: Value,
}

/// Orchestrator-owned state for one incident. Serialized whole as the
/// checkpoint record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentState {
    pub incident_id: String,
    pub frames: Vec<Frame>,
    pub entities: Vec<EntityRef>,
    pub candidate_ttps: Vec<String>,
    pub evidence_refs: Vec<String>,
    pub severity: Severity,
    pub confidence: f64,
    pub budget_tokens: i64,
    pub budget_seconds: i64,
    pub started_at_ms: i64,
    pub decisions: Vec<Decision>,
    pub scout_findings: Option<ScoutFindings>,
    pub analyst_findings: Option<AnalystFindings>,
    pub responder_plan: Option<ResponsePlan>,
    pub current_step: Step,
    pub should_escalate: bool,
    pub approval_required: bool,
}

impl IncidentState {
    pub fn new(
        incident_id: impl Into<String>,
        budget_tokens: i64,
        budget_seconds: i64,
        started_at_ms: i64,
    ) -> Self {
        Self {
            incident_id: incident_id.into(),
            frames: Vec::new(),
            entities: Vec::new(),
            candidate_ttps: Vec::new(),
            evidence_refs: Vec::new(),
            severity: Severity::Medium,
            confidence: 0.0,
            budget_tokens,
            budget_seconds,
            started_at_ms,
            decisions: Vec::new(),
            scout_findings: None,
            analyst_findings: None,
            responder_plan: None,
            current_step: Step::Ingest,
            should_escalate: false,
            approval_required: false,
        }
    }

    /// Append a frame, keeping the idempotence contract: a frame whose
    /// dedup key was already absorbed is ignored.
    pub fn absorb_frame(&mut self, frame: Frame) -> bool {
        let key = frame.dedup_key();
        if self.frames.iter().any(|f| f.dedup_key() == key) {
            return false;
        }
        self.frames.push(frame);
        true
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.current_step, Step::Escalated | Step::Completed)
    }

    pub fn status(&self) -> Option<IncidentStatus> {
        match self.current_step {
            Step::Escalated => Some(IncidentStatus::Escalated),
            Step::Completed => Some(IncidentStatus::Completed),
            _ => None,
        }
    }

    /// Record one decision. The log is append-only by construction:
    /// this is the only mutation path.
    pub fn record_decision(
        &mut self,
        step: Step,
        ts_ms: i64,
        decision_text: impl Into<String>,
        metrics: Value,
    ) {
        self.decisions.push(Decision {
            step,
            ts_ms,
            decision_text: decision_text.into(),
            metrics,
        });
    }

    pub fn charge_tokens(&mut self, tokens: i64) {
        self.budget_tokens -= tokens;
    }

    pub fn budget_exhausted(&self, now_ms: i64) -> bool {
        if self.budget_tokens <= 0 {
            return true;
        }
        let elapsed_seconds = (now_ms - self.started_at_ms) / 1000;
        elapsed_seconds >= self.budget_seconds
    }
}

/// Replay a decision log onto a fresh state: reproduces the scalar
/// trajectory (step, severity, confidence, TTPs, budget) recorded at
/// each transition. Used to verify the audit trail matches the final
/// checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayedState {
    pub current_step: Step,
    pub severity: Severity,
    pub confidence: f64,
    pub candidate_ttps: Vec<String>,
    pub budget_tokens: i64,
    pub should_escalate: bool,
    pub approval_required: bool,
}

pub fn replay_decisions(
    decisions: &[Decision],
    budget_tokens: i64,
) -> ReplayedState {
    let mut replayed = ReplayedState {
        current_step: Step::Ingest,
        severity: Severity::Medium,
        confidence: 0.0,
        candidate_ttps: Vec::new(),
        budget_tokens,
        should_escalate: false,
        approval_required: false,
    };

    for decision in decisions {
        replayed.current_step = decision.step;
        let metrics = &decision.metrics;
        if let Some(conf) = metrics.get("confidence").and_then(Value::as_f64) {
            replayed.confidence = conf;
        }
        if let Some(sev) = metrics.get("severity").and_then(Value::as_str) {
            if let Ok(parsed) = sev.parse() {
                replayed.severity = parsed;
            }
        }
        if let Some(ttps) = metrics.get("new_ttps").and_then(Value::as_array) {
            for ttp in ttps.iter().filter_map(Value::as_str) {
                if !replayed.candidate_ttps.iter().any(|t| t == ttp) {
                    replayed.candidate_ttps.push(ttp.to_string());
                }
            }
        }
        if let Some(tokens) = metrics.get("tokens_used").and_then(Value::as_i64) {
            replayed.budget_tokens -= tokens;
        }
        if let Some(escalate) = metrics.get("should_escalate").and_then(Value::as_bool) {
            replayed.should_escalate = escalate;
        }
        if let Some(approval) = metrics.get("approval_required").and_then(Value::as_bool) {
            replayed.approval_required = approval;
        }
    }

    replayed
}

#[cfg(test)]
mod tests {
    use super::*;
    use cs_frame::Alert;

    #[test]
    fn absorb_frame_is_idempotent() {
        let mut state = IncidentState::new("inc-1", 10_000, 300, 0);
        let frame = Frame::alert(
            1,
            "inc-1",
            Alert {
                ts_ms: 1,
                id: "a1".into(),
                ..Alert::default()
            },
        );
        assert!(state.absorb_frame(frame.clone()));
        assert!(!state.absorb_frame(frame));
        assert_eq!(state.frames.len(), 1);
    }

    #[test]
    fn budget_exhaustion_by_tokens_and_time() {
        let mut state = IncidentState::new("inc-1", 100, 300, 1_000_000);
        assert!(!state.budget_exhausted(1_000_000));
        state.charge_tokens(100);
        assert!(state.budget_exhausted(1_000_000));

        let state = IncidentState::new("inc-2", 100, 300, 1_000_000);
        assert!(state.budget_exhausted(1_000_000 + 301 * 1000));
    }

    #[test]
    fn state_round_trips_through_json() {
        let mut state = IncidentState::new("inc-1", 10_000, 300, 42);
        state.record_decision(
            Step::Scout,
            100,
            "scouted",
            serde_json::json!({"confidence": 0.8}),
        );
        let raw = serde_json::to_vec(&state).unwrap();
        let back: IncidentState = serde_json::from_slice(&raw).unwrap();
        assert_eq!(back.incident_id, "inc-1");
        assert_eq!(back.decisions.len(), 1);
        assert_eq!(back.decisions[0].step, Step::Scout);
    }

    #[test]
    fn replay_applies_metric_deltas_in_order() {
        let decisions = vec![
            Decision {
                step: Step::Scout,
                ts_ms: 1,
                decision_text: "scout".into(),
                metrics: serde_json::json!({
                    "confidence": 0.8,
                    "severity": "high",
                    "new_ttps": ["T1110"],
                    "tokens_used": 100,
                }),
            },
            Decision {
                step: Step::Analyst,
                ts_ms: 2,
                decision_text: "analyst".into(),
                metrics: serde_json::json!({
                    "confidence": 0.95,
                    "severity": "critical",
                    "tokens_used": 400,
                }),
            },
        ];
        let replayed = replay_decisions(&decisions, 10_000);
        assert_eq!(replayed.current_step, Step::Analyst);
        assert_eq!(replayed.severity, Severity::Critical);
        assert!((replayed.confidence - 0.95).abs() < 1e-9);
        assert_eq!(replayed.candidate_ttps, vec!["T1110"]);
        assert_eq!(replayed.budget_tokens, 9_500);
    }
}
