//! Responder: playbook selection, risk assessment, policy gating
//!
//! Selection consults a static technique-to-playbook table, filters by
//! risk tier against incident severity and by entity availability, and
//! always adds the forensic + notification playbooks on high/critical
//! incidents. The synthesized plan is risk-scored and submitted to the
//! policy gate, whose verdict overrides the local approval decision.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use cs_core::Severity;
use cs_frame::EntityRef;
use cs_playbook::{PlaybookCatalog, RiskTier};
use cs_policy::{
    AuthorizationInput, IncidentContext, PlanContext, PlanPlaybook, PolicyGate, PolicyVerdict,
};

use crate::Result;

/// Static mapping from techniques to candidate playbooks.
const TTP_PLAYBOOKS: &[(&str, &[&str])] = &[
    // Lateral Movement
    ("T1021.004", &["isolate_host", "disable_ssh", "monitor_ssh_activity"]),
    ("T1021.001", &["isolate_host", "disable_rdp", "monitor_rdp_activity"]),
    // Credential Access
    ("T1003", &["isolate_host", "reset_passwords", "monitor_credential_access"]),
    ("T1110", &["block_source_ip", "enable_account_lockout", "monitor_brute_force"]),
    // Initial Access
    ("T1190", &["isolate_service", "patch_vulnerability", "enable_waf"]),
    // Persistence
    ("T1505.003", &["remove_web_shell", "scan_web_directories", "harden_web_server"]),
    // Command and Control
    ("T1071.004", &["block_dns_queries", "monitor_dns_traffic", "update_dns_filters"]),
    // Exfiltration
    ("T1041", &["block_outbound_traffic", "monitor_data_exfiltration"]),
    // Impact
    ("T1486", &["isolate_infected_hosts", "restore_from_backup", "kill_processes"]),
];

/// One selected playbook, as carried in the plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedPlaybook {
    pub id: String,
    pub name: String,
    pub description: String,
    pub risk_tier: RiskTier,
    pub estimated_duration_minutes: u32,
    pub reversible: bool,
    pub step_count: usize,
}

/// Synthesized response plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaybookPlan {
    pub playbooks: Vec<PlannedPlaybook>,
    pub risk_tier: RiskTier,
    pub estimated_duration_minutes: u32,
    pub ttps_addressed: Vec<String>,
    pub warnings: Vec<String>,
}

/// Risk assessment over a plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub overall_risk: String,
    pub risk_score: f64,
    pub approval_required: bool,
    pub risk_factors: Vec<String>,
    pub mitigation_suggestions: Vec<String>,
    pub base_risk_score: f64,
    pub severity_factor: f64,
    pub confidence_factor: f64,
}

/// Responder output for one incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsePlan {
    pub response_required: bool,
    pub plan: PlaybookPlan,
    pub risk: RiskAssessment,
    pub policy: Option<PolicyVerdict>,
    pub approval_required: bool,
    pub execution_ready: bool,
    pub tokens_used: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ResponderInput {
    pub ttps: Vec<String>,
    pub entities: Vec<EntityRef>,
    pub severity: Severity,
    pub confidence: f64,
    pub requires_response: bool,
}

pub struct ResponderAgent {
    catalog: PlaybookCatalog,
    gate: PolicyGate,
}

impl ResponderAgent {
    pub fn new(catalog: PlaybookCatalog, gate: PolicyGate) -> Self {
        Self { catalog, gate }
    }

    pub fn with_defaults() -> Self {
        Self::new(
            PlaybookCatalog::builtin(),
            PolicyGate::new("http://localhost:8181"),
        )
    }

    pub fn catalog(&self) -> &PlaybookCatalog {
        &self.catalog
    }

    /// Plan a response for the incident. Consults the policy gate; its
    /// verdict overrides the local approval decision.
    pub async fn plan_response(&self, input: &ResponderInput) -> Result<ResponsePlan> {
        if !input.requires_response {
            info!("responder: no automated response required");
            return Ok(ResponsePlan {
                response_required: false,
                plan: PlaybookPlan::default(),
                risk: RiskAssessment {
                    overall_risk: "low".to_string(),
                    ..RiskAssessment::default()
                },
                policy: None,
                approval_required: false,
                execution_ready: false,
                tokens_used: 50,
            });
        }

        info!(
            "responder: planning for {} TTPs, severity {}",
            input.ttps.len(),
            input.severity
        );

        let plan = self.plan_playbooks(input);
        let mut risk = assess_risk(&plan, input);

        let verdict = self.gate.evaluate(&authorization_input(&plan, &risk, input)).await;
        risk.approval_required = verdict.approval_required;

        let approval_required = verdict.approval_required;
        let tokens_used = 100 + 30 * plan.playbooks.len() as u32 + 50;

        info!(
            "responder: {} playbooks, risk {}, approval_required={approval_required} (policy={})",
            plan.playbooks.len(),
            risk.overall_risk,
            verdict.policy_source
        );
        Ok(ResponsePlan {
            response_required: true,
            plan,
            risk,
            approval_required,
            execution_ready: !approval_required,
            policy: Some(verdict),
            tokens_used,
        })
    }

    /// Select and synthesize the playbook plan.
    fn plan_playbooks(&self, input: &ResponderInput) -> PlaybookPlan {
        let available_entities: BTreeSet<String> = input
            .entities
            .iter()
            .map(|e| e.entity_type.clone())
            .collect();
        let severity_level = severity_level(input.severity);

        let mut selected: BTreeSet<String> = BTreeSet::new();
        for ttp in &input.ttps {
            let Some((_, candidates)) = TTP_PLAYBOOKS.iter().find(|(id, _)| id == ttp) else {
                debug!("responder: no playbook mapping for {ttp}");
                continue;
            };
            for candidate in *candidates {
                let Ok(playbook) = self.catalog.get(candidate) else {
                    // A mapped id missing from the catalog is a config
                    // defect; never drop it silently.
                    warn!("responder: playbook {candidate} mapped for {ttp} is not in the catalog");
                    continue;
                };
                if playbook.risk_tier.ordinal() > severity_level {
                    continue;
                }
                let required = playbook.required_entity_types();
                if !required.iter().all(|r| available_entities.contains(r)) {
                    continue;
                }
                selected.insert(candidate.to_string());
            }
        }

        // High-severity incidents always get the generic pair.
        if input.severity.is_actionable() {
            selected.insert("collect_forensic_evidence".to_string());
            selected.insert("notify_stakeholders".to_string());
        }

        let mut plan = PlaybookPlan {
            ttps_addressed: input.ttps.clone(),
            ..PlaybookPlan::default()
        };
        plan.risk_tier = RiskTier::Low;
        for id in &selected {
            let Ok(playbook) = self.catalog.get(id) else {
                continue;
            };
            plan.risk_tier = plan.risk_tier.max(playbook.risk_tier);
            plan.estimated_duration_minutes += playbook.estimated_duration_minutes;
            plan.playbooks.push(PlannedPlaybook {
                id: playbook.id.clone(),
                name: playbook.name.clone(),
                description: playbook.description.clone(),
                risk_tier: playbook.risk_tier,
                estimated_duration_minutes: playbook.estimated_duration_minutes,
                reversible: playbook.reversible,
                step_count: playbook.steps.len(),
            });
        }

        if plan.playbooks.is_empty() {
            plan.warnings
                .push("No appropriate playbooks found for the given TTPs".to_string());
        }
        if plan.risk_tier == RiskTier::High {
            plan.warnings
                .push("High-risk playbooks selected - manual approval recommended".to_string());
        }
        if plan.estimated_duration_minutes > 120 {
            plan.warnings.push(format!(
                "Long estimated duration: {} minutes",
                plan.estimated_duration_minutes
            ));
        }
        plan
    }
}

/// Severity bucket used by the risk-tier filter: low and info map to 0,
/// medium to 1, high and critical to 2.
fn severity_level(severity: Severity) -> u8 {
    match severity {
        Severity::Info | Severity::Low => 0,
        Severity::Medium => 1,
        Severity::High | Severity::Critical => 2,
    }
}

fn base_risk(tier: RiskTier) -> f64 {
    match tier {
        RiskTier::Low => 0.3,
        RiskTier::Medium => 0.6,
        RiskTier::High => 0.8,
    }
}

fn severity_multiplier(severity: Severity) -> f64 {
    match severity {
        Severity::Low => 0.8,
        Severity::Medium => 1.0,
        Severity::High => 1.2,
        Severity::Critical => 1.4,
        Severity::Info => 1.0,
    }
}

/// `risk_score = base_risk(max_tier) * severity_multiplier *
/// (2 - clamp(conf, 0.5, 1))`, clamped to [0, 1] and rounded to three
/// decimals before bucketing.
pub fn assess_risk(plan: &PlaybookPlan, input: &ResponderInput) -> RiskAssessment {
    if plan.playbooks.is_empty() {
        return RiskAssessment {
            overall_risk: "low".to_string(),
            risk_score: 0.1,
            approval_required: false,
            ..RiskAssessment::default()
        };
    }

    let base = base_risk(plan.risk_tier);
    let multiplier = severity_multiplier(input.severity);
    let confidence_factor = input.confidence.clamp(0.5, 1.0);
    let raw = base * multiplier * (2.0 - confidence_factor);
    let risk_score = (raw.clamp(0.0, 1.0) * 1000.0).round() / 1000.0;

    let mut risk_factors = Vec::new();
    let mut mitigation_suggestions = Vec::new();

    let high_risk: Vec<&PlannedPlaybook> = plan
        .playbooks
        .iter()
        .filter(|p| p.risk_tier == RiskTier::High)
        .collect();
    if !high_risk.is_empty() {
        risk_factors.push(format!("{} high-risk playbooks selected", high_risk.len()));
        mitigation_suggestions
            .push("Consider manual approval for high-risk actions".to_string());
    }

    let irreversible = plan.playbooks.iter().filter(|p| !p.reversible).count();
    if irreversible > 0 {
        risk_factors.push(format!("{irreversible} irreversible actions planned"));
        mitigation_suggestions
            .push("Ensure adequate backups before irreversible actions".to_string());
    }

    if plan.estimated_duration_minutes > 60 {
        risk_factors.push(format!(
            "Long execution time: {} minutes",
            plan.estimated_duration_minutes
        ));
        mitigation_suggestions
            .push("Consider staging execution during maintenance window".to_string());
    }

    if input.confidence < 0.6 {
        risk_factors.push(format!(
            "Low confidence in incident analysis: {:.2}",
            input.confidence
        ));
        mitigation_suggestions
            .push("Consider additional investigation before automated response".to_string());
    }

    let host_count = input
        .entities
        .iter()
        .filter(|e| e.is_host())
        .map(|e| e.id.as_str())
        .collect::<BTreeSet<_>>()
        .len();
    if host_count > 3 {
        risk_factors.push(format!("Multiple hosts affected: {host_count}"));
        mitigation_suggestions
            .push("Consider phased rollout of containment actions".to_string());
    }

    let overall_risk = if risk_score >= 0.8 {
        "critical"
    } else if risk_score >= 0.6 {
        "high"
    } else if risk_score > 0.3 {
        "medium"
    } else {
        "low"
    };

    let approval_required = matches!(overall_risk, "high" | "critical")
        || risk_score > 0.7
        || !high_risk.is_empty()
        || input.confidence < 0.5;

    RiskAssessment {
        overall_risk: overall_risk.to_string(),
        risk_score,
        approval_required,
        risk_factors,
        mitigation_suggestions,
        base_risk_score: base,
        severity_factor: multiplier,
        confidence_factor,
    }
}

fn authorization_input(
    plan: &PlaybookPlan,
    risk: &RiskAssessment,
    input: &ResponderInput,
) -> AuthorizationInput {
    AuthorizationInput {
        risk_assessment: cs_policy::RiskContext {
            overall_risk: risk.overall_risk.clone(),
            risk_score: risk.risk_score,
            approval_required: risk.approval_required,
        },
        incident: IncidentContext {
            confidence: input.confidence,
            severity: input.severity.as_str().to_string(),
            entities: input
                .entities
                .iter()
                .map(|e| serde_json::json!({"type": e.entity_type, "id": e.id}))
                .collect(),
        },
        playbook_plan: PlanContext {
            playbooks: plan
                .playbooks
                .iter()
                .map(|p| PlanPlaybook {
                    id: p.id.clone(),
                    name: p.name.clone(),
                    risk_tier: p.risk_tier.as_str().to_string(),
                    reversible: p.reversible,
                })
                .collect(),
            estimated_duration_minutes: plan.estimated_duration_minutes,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> ResponderAgent {
        // Port 59999 has no policy engine; the gate falls back to the
        // deterministic local ruleset.
        ResponderAgent::new(
            PlaybookCatalog::builtin(),
            PolicyGate::new("http://127.0.0.1:59999"),
        )
    }

    #[tokio::test]
    async fn low_risk_autonomous_response_scenario() {
        let input = ResponderInput {
            ttps: vec!["T1110".into()],
            entities: vec![
                EntityRef::new("ip", "203.0.113.7"),
                EntityRef::new("host", "web-01"),
            ],
            severity: Severity::Low,
            confidence: 0.75,
            requires_response: true,
        };
        let response = agent().plan_response(&input).await.unwrap();

        assert!(!response.plan.playbooks.is_empty());
        assert_eq!(response.plan.risk_tier, RiskTier::Low);
        assert_eq!(response.plan.estimated_duration_minutes, 15);
        assert_eq!(response.risk.overall_risk, "low");
        assert!(!response.approval_required);
        assert!(response.execution_ready);

        let policy = response.policy.unwrap();
        assert!(policy.allow);
        assert_eq!(policy.policy_source, "fallback");
    }

    #[tokio::test]
    async fn high_risk_gated_response_scenario() {
        let input = ResponderInput {
            ttps: vec!["T1486".into()],
            entities: vec![
                EntityRef::new("host", "file-01"),
                EntityRef::new("proc", "cryptor.exe"),
            ],
            severity: Severity::Critical,
            confidence: 0.9,
            requires_response: true,
        };
        let response = agent().plan_response(&input).await.unwrap();

        let ids: Vec<&str> = response
            .plan
            .playbooks
            .iter()
            .map(|p| p.id.as_str())
            .collect();
        assert!(ids.contains(&"isolate_infected_hosts"));
        assert!(ids.contains(&"collect_forensic_evidence"));
        assert!(ids.contains(&"notify_stakeholders"));

        assert_eq!(response.plan.risk_tier, RiskTier::High);
        assert!(response.approval_required);
        assert!(!response.execution_ready);
        assert!(!response.policy.unwrap().allow);
        assert!(response
            .risk
            .risk_factors
            .iter()
            .any(|f| f.contains("high-risk")));
    }

    #[tokio::test]
    async fn low_severity_filters_high_risk_playbooks() {
        let input = ResponderInput {
            ttps: vec!["T1003".into()],
            entities: vec![EntityRef::new("host", "db-01"), EntityRef::new("user", "svc")],
            severity: Severity::Low,
            confidence: 0.8,
            requires_response: true,
        };
        let response = agent().plan_response(&input).await.unwrap();
        // isolate_host (high) and reset_passwords (medium) are filtered
        // out at low severity; only the monitor playbook survives.
        let ids: Vec<&str> = response
            .plan
            .playbooks
            .iter()
            .map(|p| p.id.as_str())
            .collect();
        assert_eq!(ids, vec!["monitor_credential_access"]);
    }

    #[tokio::test]
    async fn missing_entities_filter_out_playbooks() {
        let input = ResponderInput {
            ttps: vec!["T1110".into()],
            entities: vec![], // no ip entity for block_source_ip
            severity: Severity::Low,
            confidence: 0.8,
            requires_response: true,
        };
        let response = agent().plan_response(&input).await.unwrap();
        let ids: Vec<&str> = response
            .plan
            .playbooks
            .iter()
            .map(|p| p.id.as_str())
            .collect();
        assert!(!ids.contains(&"block_source_ip"));
        assert!(ids.contains(&"monitor_brute_force"));
    }

    #[test]
    fn every_mapped_playbook_exists_in_catalog() {
        let catalog = PlaybookCatalog::builtin();
        for (ttp, candidates) in TTP_PLAYBOOKS {
            for candidate in *candidates {
                assert!(
                    catalog.contains(candidate),
                    "playbook {candidate} mapped for {ttp} is missing from the builtin catalog"
                );
            }
        }
    }

    #[tokio::test]
    async fn web_exploit_selects_technique_specific_playbooks() {
        let input = ResponderInput {
            ttps: vec!["T1190".into()],
            entities: vec![EntityRef::new("host", "web-01")],
            severity: Severity::Medium,
            confidence: 0.8,
            requires_response: true,
        };
        let response = agent().plan_response(&input).await.unwrap();
        let ids: Vec<&str> = response
            .plan
            .playbooks
            .iter()
            .map(|p| p.id.as_str())
            .collect();
        // Medium severity admits the low and medium tiers; no generic
        // playbooks are injected below high.
        assert_eq!(
            ids,
            vec!["enable_waf", "isolate_service", "patch_vulnerability"]
        );
    }

    #[tokio::test]
    async fn web_shell_persistence_selects_removal_chain() {
        let input = ResponderInput {
            ttps: vec!["T1505.003".into()],
            entities: vec![EntityRef::new("host", "web-01")],
            severity: Severity::High,
            confidence: 0.85,
            requires_response: true,
        };
        let response = agent().plan_response(&input).await.unwrap();
        let ids: Vec<&str> = response
            .plan
            .playbooks
            .iter()
            .map(|p| p.id.as_str())
            .collect();
        assert!(ids.contains(&"remove_web_shell"));
        assert!(ids.contains(&"scan_web_directories"));
        assert!(ids.contains(&"harden_web_server"));
        // remove_web_shell is high risk and irreversible, so the plan
        // cannot run autonomously.
        assert_eq!(response.plan.risk_tier, RiskTier::High);
        assert!(response.approval_required);
    }

    #[tokio::test]
    async fn exfiltration_selects_egress_containment() {
        let input = ResponderInput {
            ttps: vec!["T1041".into()],
            entities: vec![EntityRef::new("host", "db-01")],
            severity: Severity::Critical,
            confidence: 0.9,
            requires_response: true,
        };
        let response = agent().plan_response(&input).await.unwrap();
        let ids: Vec<&str> = response
            .plan
            .playbooks
            .iter()
            .map(|p| p.id.as_str())
            .collect();
        assert!(ids.contains(&"block_outbound_traffic"));
        assert!(ids.contains(&"monitor_data_exfiltration"));
        // TTP-specific playbooks survive alongside the generic pair.
        assert!(ids.contains(&"collect_forensic_evidence"));
        assert!(ids.contains(&"notify_stakeholders"));
        assert!(ids.len() >= 4);
    }

    #[tokio::test]
    async fn no_response_required_short_circuits() {
        let response = agent()
            .plan_response(&ResponderInput::default())
            .await
            .unwrap();
        assert!(!response.response_required);
        assert!(response.plan.playbooks.is_empty());
        assert!(response.policy.is_none());
    }

    #[test]
    fn risk_formula_matches_definition() {
        let plan = PlaybookPlan {
            playbooks: vec![PlannedPlaybook {
                id: "x".into(),
                name: "X".into(),
                description: String::new(),
                risk_tier: RiskTier::High,
                estimated_duration_minutes: 10,
                reversible: true,
                step_count: 1,
            }],
            risk_tier: RiskTier::High,
            estimated_duration_minutes: 10,
            ttps_addressed: vec![],
            warnings: vec![],
        };
        let input = ResponderInput {
            severity: Severity::Critical,
            confidence: 0.9,
            ..ResponderInput::default()
        };
        let risk = assess_risk(&plan, &input);
        // 0.8 * 1.4 * 1.1 = 1.232 -> clamped to 1.0
        assert!((risk.risk_score - 1.0).abs() < 1e-9);
        assert_eq!(risk.overall_risk, "critical");
        assert!(risk.approval_required);
    }

    #[test]
    fn low_confidence_forces_approval() {
        let plan = PlaybookPlan {
            playbooks: vec![PlannedPlaybook {
                id: "m".into(),
                name: "M".into(),
                description: String::new(),
                risk_tier: RiskTier::Low,
                estimated_duration_minutes: 5,
                reversible: true,
                step_count: 1,
            }],
            risk_tier: RiskTier::Low,
            estimated_duration_minutes: 5,
            ttps_addressed: vec![],
            warnings: vec![],
        };
        let input = ResponderInput {
            severity: Severity::Low,
            confidence: 0.4,
            ..ResponderInput::default()
        };
        let risk = assess_risk(&plan, &input);
        assert!(risk.approval_required);
        assert!(risk
            .risk_factors
            .iter()
            .any(|f| f.contains("Low confidence")));
    }
}
