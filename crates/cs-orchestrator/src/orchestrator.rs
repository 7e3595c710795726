//! The incident state machine

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use cs_agents::{
    AnalystAgent, AnalystInput, ResponderAgent, ResponderInput, ScoutAgent, ScoutInput,
};
use cs_bus::{topics, Bus, Delivery};
use cs_frame::{ActionPlan, Finding, Frame, Payload};

use crate::checkpoint::CheckpointStore;
use crate::lease::LeaseMap;
use crate::state::{IncidentState, IncidentStatus, Step};
use crate::Result;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_tokens: i64,
    pub max_time_seconds: i64,
    pub scout_enabled: bool,
    pub analyst_enabled: bool,
    pub responder_enabled: bool,
    pub checkpoint_path: PathBuf,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tokens: 10_000,
            max_time_seconds: 300,
            scout_enabled: true,
            analyst_enabled: true,
            responder_enabled: true,
            checkpoint_path: PathBuf::from("data/checkpoints"),
        }
    }
}

/// Outcome of one processing pass.
#[derive(Debug, Clone)]
pub struct IncidentOutcome {
    pub incident_id: String,
    pub status: IncidentStatus,
    pub state: IncidentState,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    scout: ScoutAgent,
    analyst: AnalystAgent,
    responder: ResponderAgent,
    checkpoints: CheckpointStore,
    leases: LeaseMap,
    bus: Option<Arc<Bus>>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        scout: ScoutAgent,
        analyst: AnalystAgent,
        responder: ResponderAgent,
    ) -> Result<Self> {
        let checkpoints = CheckpointStore::open(&config.checkpoint_path)?;
        Ok(Self {
            config,
            scout,
            analyst,
            responder,
            checkpoints,
            leases: LeaseMap::new(),
            bus: None,
        })
    }

    /// Attach a bus for publishing finding/plan frames at completion.
    pub fn with_bus(mut self, bus: Arc<Bus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Process a bus delivery: run the pipeline, checkpoint, and only
    /// then ack. A failure naks the delivery for redelivery.
    pub async fn process_delivery(&self, delivery: Delivery) -> Result<IncidentOutcome> {
        let frame = delivery.frame.clone();
        let incident_id = frame.incident_id.clone();
        match self.process_incident(&incident_id, vec![frame]).await {
            Ok(outcome) => {
                // The outcome's final checkpoint is already durable;
                // the ack may now remove the frame from the stream.
                delivery.ack().await?;
                Ok(outcome)
            }
            Err(e) => {
                warn!("incident {incident_id} processing failed: {e}");
                delivery.fail(&e.to_string()).await?;
                Err(e)
            }
        }
    }

    /// Drive one incident to a terminal state, resuming from its last
    /// checkpoint when one exists.
    pub async fn process_incident(
        &self,
        incident_id: &str,
        frames: Vec<Frame>,
    ) -> Result<IncidentOutcome> {
        let _lease = self.leases.acquire(incident_id)?;
        let now_ms = Utc::now().timestamp_millis();

        let mut state = match self.checkpoints.load(incident_id)? {
            Some(existing) => {
                info!(
                    "resuming incident {incident_id} from checkpoint at step {:?}",
                    existing.current_step
                );
                existing
            }
            None => IncidentState::new(
                incident_id,
                self.config.max_tokens,
                self.config.max_time_seconds,
                now_ms,
            ),
        };

        if state.is_terminal() {
            let status = state.status().expect("terminal state has a status");
            return Ok(IncidentOutcome {
                incident_id: incident_id.to_string(),
                status,
                state,
            });
        }

        for frame in frames {
            state.absorb_frame(frame);
        }

        info!("processing incident {incident_id}");
        while !state.is_terminal() {
            match state.current_step {
                Step::Ingest => self.ingest_node(&mut state),
                Step::Scout => self.scout_node(&mut state).await?,
                Step::Analyst => self.analyst_node(&mut state).await?,
                Step::Responder => self.responder_node(&mut state).await?,
                Step::Escalated | Step::Completed => unreachable!("loop exits on terminal"),
            }
            self.checkpoints.save(&state).await?;

            let next = self.route_after(&mut state);
            match next {
                Step::Escalated => self.escalation_node(&mut state),
                Step::Completed => self.completion_node(&mut state),
                other => state.current_step = other,
            }
            self.checkpoints.save(&state).await?;
        }

        if let Err(e) = self.publish_results(&state).await {
            warn!("failed to publish results for {incident_id}: {e}");
        }

        let status = state.status().expect("terminal state has a status");
        info!("incident {incident_id} finished: {status:?}");
        Ok(IncidentOutcome {
            incident_id: incident_id.to_string(),
            status,
            state,
        })
    }

    // -- transition table ---------------------------------------------------

    /// The (state, predicate) -> next-state table. Budget exhaustion is
    /// re-checked at every transition.
    fn route_after(&self, state: &mut IncidentState) -> Step {
        let now_ms = Utc::now().timestamp_millis();
        if state.budget_exhausted(now_ms) && !state.should_escalate {
            warn!(
                "incident {} budget exhausted ({} tokens left)",
                state.incident_id, state.budget_tokens
            );
            state.should_escalate = true;
        }

        match state.current_step {
            Step::Ingest => {
                if self.config.scout_enabled {
                    Step::Scout
                } else {
                    Step::Completed
                }
            }
            Step::Scout => {
                if state.should_escalate {
                    Step::Escalated
                } else if self.config.analyst_enabled && state.confidence > 0.3 {
                    Step::Analyst
                } else {
                    Step::Completed
                }
            }
            Step::Analyst => {
                let findings = state.analyst_findings.as_ref();
                let confidence = findings.map_or(0.0, |f| f.confidence);
                let requires_response = findings.is_some_and(|f| f.requires_response);
                if state.should_escalate {
                    Step::Escalated
                } else if self.config.responder_enabled
                    && confidence > 0.7
                    && requires_response
                {
                    Step::Responder
                } else {
                    Step::Completed
                }
            }
            Step::Responder => {
                if state.approval_required || state.should_escalate {
                    Step::Escalated
                } else {
                    Step::Completed
                }
            }
            terminal => terminal,
        }
    }

    // -- nodes --------------------------------------------------------------

    fn ingest_node(&self, state: &mut IncidentState) {
        let now_ms = Utc::now().timestamp_millis();

        let mut entities = Vec::new();
        let mut evidence_refs = Vec::new();
        let mut ttps = Vec::new();
        for frame in &state.frames {
            match &frame.payload {
                Payload::Alert(alert) => {
                    for entity in &alert.entities {
                        if !entities.contains(entity) {
                            entities.push(entity.clone());
                        }
                    }
                    if !alert.evidence_ref.is_empty() {
                        evidence_refs.push(alert.evidence_ref.clone());
                    }
                }
                Payload::Finding(finding) => {
                    for node in &finding.graph_nodes {
                        if !entities.contains(node) {
                            entities.push(node.clone());
                        }
                    }
                    for ttp in &finding.candidate_ttps {
                        if !ttps.contains(ttp) {
                            ttps.push(ttp.clone());
                        }
                    }
                }
                _ => {}
            }
        }
        state.entities = entities;
        state.evidence_refs = evidence_refs;
        let mut added_ttps = Vec::new();
        for ttp in ttps {
            if !state.candidate_ttps.contains(&ttp) {
                state.candidate_ttps.push(ttp.clone());
                added_ttps.push(ttp);
            }
        }

        state.record_decision(
            Step::Ingest,
            now_ms,
            "Processed frames and extracted entities",
            json!({
                "frames": state.frames.len(),
                "entities_found": state.entities.len(),
                "ttps_found": state.candidate_ttps.len(),
                "new_ttps": added_ttps,
                "budget_remaining": state.budget_tokens,
            }),
        );
        info!(
            "ingest completed: {} entities, {} TTPs",
            state.entities.len(),
            state.candidate_ttps.len()
        );
    }

    async fn scout_node(&self, state: &mut IncidentState) -> Result<()> {
        let now_ms = Utc::now().timestamp_millis();
        let input = ScoutInput {
            frames: state.frames.clone(),
            existing_ttps: state.candidate_ttps.clone(),
        };
        let findings = self.scout.process_alerts(&input).await?;

        for ttp in &findings.new_ttps {
            if !state.candidate_ttps.contains(ttp) {
                state.candidate_ttps.push(ttp.clone());
            }
        }
        state.confidence = findings.confidence;
        state.severity = findings.severity;
        state.charge_tokens(i64::from(findings.tokens_used));

        state.record_decision(
            Step::Scout,
            now_ms,
            "Completed alert analysis and TTP tagging",
            json!({
                "confidence": findings.confidence,
                "severity": findings.severity.as_str(),
                "new_ttps": findings.new_ttps,
                "unique_alerts": findings.unique_alerts,
                "duplicates": findings.duplicates,
                "tokens_used": findings.tokens_used,
                "should_escalate": state.should_escalate,
            }),
        );
        state.scout_findings = Some(findings);
        Ok(())
    }

    async fn analyst_node(&self, state: &mut IncidentState) -> Result<()> {
        let now_ms = Utc::now().timestamp_millis();
        let input = AnalystInput {
            scout: state.scout_findings.clone(),
            entities: state.entities.clone(),
            candidate_ttps: state.candidate_ttps.clone(),
            evidence_refs: state.evidence_refs.clone(),
            severity: state.severity,
        };
        let findings = self.analyst.analyze_incident(&input).await?;

        state.confidence = state.confidence.max(findings.confidence);
        state.severity = findings.severity_assessment;
        state.charge_tokens(i64::from(findings.tokens_used));

        state.record_decision(
            Step::Analyst,
            now_ms,
            "Completed hypothesis building and detection rule generation",
            json!({
                "hypothesis": findings.hypothesis,
                "confidence": state.confidence,
                "severity": findings.severity_assessment.as_str(),
                "requires_response": findings.requires_response,
                "patterns": findings.ttp_analysis.patterns.iter()
                    .map(|p| p.pattern_type.clone()).collect::<Vec<_>>(),
                "sigma_rules_generated": findings.sigma_rules.len(),
                "tokens_used": findings.tokens_used,
                "should_escalate": state.should_escalate,
            }),
        );
        state.analyst_findings = Some(findings);
        Ok(())
    }

    async fn responder_node(&self, state: &mut IncidentState) -> Result<()> {
        let now_ms = Utc::now().timestamp_millis();
        let analyst = state.analyst_findings.as_ref();
        let input = ResponderInput {
            ttps: state.candidate_ttps.clone(),
            entities: state.entities.clone(),
            severity: state.severity,
            confidence: state.confidence,
            requires_response: analyst.is_some_and(|f| f.requires_response),
        };
        let response = self.responder.plan_response(&input).await?;

        state.approval_required = response.approval_required;
        state.charge_tokens(i64::from(response.tokens_used));

        let policy_metrics = response.policy.as_ref().map(|verdict| {
            json!({
                "allow": verdict.allow,
                "approval_required": verdict.approval_required,
                "policy_source": verdict.policy_source,
                "restrictions": verdict.restrictions,
            })
        });
        state.record_decision(
            Step::Responder,
            now_ms,
            "Completed response planning",
            json!({
                "playbooks_selected": response.plan.playbooks.iter()
                    .map(|p| p.id.clone()).collect::<Vec<_>>(),
                "risk_tier": response.plan.risk_tier.as_str(),
                "risk_score": response.risk.risk_score,
                "approval_required": state.approval_required,
                "policy_decision": policy_metrics,
                "tokens_used": response.tokens_used,
                "should_escalate": state.should_escalate,
            }),
        );
        state.responder_plan = Some(response);
        Ok(())
    }

    fn escalation_node(&self, state: &mut IncidentState) {
        let now_ms = Utc::now().timestamp_millis();
        state.current_step = Step::Escalated;
        state.record_decision(
            Step::Escalated,
            now_ms,
            "Incident escalated for human review",
            json!({
                "severity": state.severity.as_str(),
                "confidence": state.confidence,
                "candidate_ttps": state.candidate_ttps,
                "entities_count": state.entities.len(),
                "approval_required": state.approval_required,
                "should_escalate": state.should_escalate,
                "budget_exhausted": state.budget_tokens <= 0,
                "decisions_made": state.decisions.len(),
            }),
        );
        info!("incident {} escalated for human review", state.incident_id);
    }

    fn completion_node(&self, state: &mut IncidentState) {
        let now_ms = Utc::now().timestamp_millis();
        state.current_step = Step::Completed;
        state.record_decision(
            Step::Completed,
            now_ms,
            "Incident processing completed",
            json!({
                "total_steps": state.decisions.len(),
                "confidence": state.confidence,
                "severity": state.severity.as_str(),
                "ttps_identified": state.candidate_ttps.len(),
                "entities_processed": state.entities.len(),
            }),
        );
        info!("incident {} completed", state.incident_id);
    }

    // -- publishing ---------------------------------------------------------

    async fn publish_results(&self, state: &IncidentState) -> Result<()> {
        let Some(bus) = &self.bus else {
            return Ok(());
        };
        let now_ms = Utc::now().timestamp_millis();

        if let Some(analyst) = &state.analyst_findings {
            let rationale = json!({
                "decisions": state.decisions.len(),
                "patterns": analyst.ttp_analysis.patterns.iter()
                    .map(|p| p.pattern_type.clone()).collect::<Vec<_>>(),
                "detection_gaps": analyst.detection_gaps.len(),
            });
            let finding = Frame::finding(
                now_ms,
                state.incident_id.clone(),
                Finding {
                    ts_ms: now_ms,
                    id: format!("finding-{}", state.incident_id),
                    hypothesis: analyst.hypothesis.clone(),
                    graph_nodes: state.entities.clone(),
                    candidate_ttps: state.candidate_ttps.clone(),
                    rationale_json: rationale.to_string(),
                },
            );
            bus.emit(topics::FINDINGS, &finding).await?;
        }

        if let Some(response) = &state.responder_plan {
            if !response.plan.playbooks.is_empty() {
                let plan = Frame::plan(
                    now_ms,
                    state.incident_id.clone(),
                    ActionPlan {
                        ts_ms: now_ms,
                        incident_id: state.incident_id.clone(),
                        playbooks: response
                            .plan
                            .playbooks
                            .iter()
                            .map(|p| p.id.clone())
                            .collect(),
                        change_set_json: json!({
                            "estimated_duration_minutes": response.plan.estimated_duration_minutes,
                            "warnings": response.plan.warnings,
                        })
                        .to_string(),
                        risk_tier: response.plan.risk_tier.as_str().to_string(),
                    },
                );
                bus.emit(topics::PLANS, &plan).await?;
            }
        }

        Ok(())
    }
}
