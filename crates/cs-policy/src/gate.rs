//! Policy gate client and fallback ruleset

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, warn};

use crate::Result;

/// Risk assessment slice the gate evaluates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RiskContext {
    pub overall_risk: String,
    pub risk_score: f64,
    pub approval_required: bool,
}

/// Incident slice the gate evaluates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct IncidentContext {
    pub confidence: f64,
    pub severity: String,
    #[serde(default)]
    pub entities: Vec<Value>,
}

/// One playbook inside the plan, as the gate sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanPlaybook {
    pub id: String,
    pub name: String,
    pub risk_tier: String,
    pub reversible: bool,
}

/// Plan slice the gate evaluates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PlanContext {
    pub playbooks: Vec<PlanPlaybook>,
    pub estimated_duration_minutes: u32,
}

/// Full authorization query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AuthorizationInput {
    pub risk_assessment: RiskContext,
    pub incident: IncidentContext,
    pub playbook_plan: PlanContext,
}

/// Gate verdict. `policy_source` is `engine` or `fallback`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyVerdict {
    pub allow: bool,
    pub approval_required: bool,
    pub risk_level: String,
    pub restrictions: Vec<String>,
    pub recommendations: Vec<String>,
    pub policy_source: String,
}

#[derive(Debug, Deserialize)]
struct EngineResult {
    #[serde(default)]
    allow: bool,
    #[serde(default = "default_true")]
    approval_required: bool,
    #[serde(default)]
    risk_level: String,
    #[serde(default)]
    restrictions: Vec<String>,
    #[serde(default)]
    recommendations: Vec<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct EngineResponse {
    result: Option<EngineResult>,
}

pub struct PolicyGate {
    client: reqwest::Client,
    base_url: String,
    policy_path: String,
    policy_data: Value,
}

impl PolicyGate {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            policy_path: "countersign/response/authorization".to_string(),
            policy_data: json!({}),
        }
    }

    pub fn with_policy_data(mut self, data: Value) -> Self {
        self.policy_data = data;
        self
    }

    /// Evaluate the authorization policy. Falls back to the local
    /// ruleset when the engine is unreachable or answers garbage; the
    /// caller can tell from `policy_source`.
    pub async fn evaluate(&self, input: &AuthorizationInput) -> PolicyVerdict {
        if !self.engine_available().await {
            warn!("policy engine not available, using fallback evaluation");
            return fallback_evaluate(input);
        }

        match self.evaluate_remote(input).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!("policy engine evaluation failed ({e}), using fallback");
                fallback_evaluate(input)
            }
        }
    }

    async fn engine_available(&self) -> bool {
        let health = format!("{}/health", self.base_url);
        match self
            .client
            .get(&health)
            .timeout(Duration::from_secs(2))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn evaluate_remote(&self, input: &AuthorizationInput) -> Result<PolicyVerdict> {
        let url = format!("{}/v1/data/{}", self.base_url, self.policy_path);
        let body = json!({
            "input": input,
            "data": self.policy_data,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| crate::PolicyError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(crate::PolicyError::Unavailable(format!(
                "engine returned {}",
                response.status()
            )));
        }

        let parsed: EngineResponse = response
            .json()
            .await
            .map_err(|e| crate::PolicyError::Malformed(e.to_string()))?;
        let result = parsed
            .result
            .ok_or_else(|| crate::PolicyError::Malformed("missing result".to_string()))?;

        info!(
            "policy engine verdict: allow={} approval_required={}",
            result.allow, result.approval_required
        );
        Ok(PolicyVerdict {
            allow: result.allow,
            approval_required: result.approval_required,
            risk_level: if result.risk_level.is_empty() {
                input.risk_assessment.overall_risk.clone()
            } else {
                result.risk_level
            },
            restrictions: result.restrictions,
            recommendations: result.recommendations,
            policy_source: "engine".to_string(),
        })
    }
}

/// The documented fallback ruleset. Pure and deterministic: the same
/// input always produces the same verdict.
pub fn fallback_evaluate(input: &AuthorizationInput) -> PolicyVerdict {
    let risk = &input.risk_assessment;
    let incident = &input.incident;
    let plan = &input.playbook_plan;

    let mut allow = false;
    let mut approval_required = true;
    let mut restrictions = Vec::new();
    let mut recommendations = Vec::new();

    if risk.overall_risk == "low" && incident.confidence >= 0.7 && risk.risk_score <= 0.3 {
        allow = true;
        approval_required = false;
    }

    if risk.overall_risk == "high" || risk.overall_risk == "critical" {
        approval_required = true;
        restrictions.push("high_risk_scenario".to_string());
        recommendations.push("Obtain security team approval".to_string());
    }

    if incident.confidence < 0.5 {
        approval_required = true;
        restrictions.push("low_confidence".to_string());
        recommendations.push("Increase investigation confidence before automation".to_string());
    }

    if risk.risk_score > 0.7 {
        approval_required = true;
        restrictions.push("high_risk_score".to_string());
    }

    if plan.playbooks.iter().any(|p| !p.reversible) {
        approval_required = true;
        restrictions.push("irreversible_actions".to_string());
        recommendations.push("Review irreversible actions carefully".to_string());
    }

    if plan.estimated_duration_minutes > 60 {
        approval_required = true;
        restrictions.push("long_execution_time".to_string());
        recommendations.push("Plan for extended execution and monitoring".to_string());
    }

    if approval_required {
        allow = false;
    }

    PolicyVerdict {
        allow,
        approval_required,
        risk_level: risk.overall_risk.clone(),
        restrictions,
        recommendations,
        policy_source: "fallback".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn low_risk_input() -> AuthorizationInput {
        AuthorizationInput {
            risk_assessment: RiskContext {
                overall_risk: "low".to_string(),
                risk_score: 0.3,
                approval_required: false,
            },
            incident: IncidentContext {
                confidence: 0.75,
                severity: "low".to_string(),
                entities: vec![],
            },
            playbook_plan: PlanContext {
                playbooks: vec![PlanPlaybook {
                    id: "block_source_ip".to_string(),
                    name: "Block Source IP".to_string(),
                    risk_tier: "low".to_string(),
                    reversible: true,
                }],
                estimated_duration_minutes: 15,
            },
        }
    }

    #[test]
    fn low_risk_high_confidence_is_allowed() {
        let verdict = fallback_evaluate(&low_risk_input());
        assert!(verdict.allow);
        assert!(!verdict.approval_required);
        assert_eq!(verdict.risk_level, "low");
        assert!(verdict.restrictions.is_empty());
        assert_eq!(verdict.policy_source, "fallback");
    }

    #[test]
    fn high_risk_requires_approval() {
        let mut input = low_risk_input();
        input.risk_assessment.overall_risk = "high".to_string();
        input.risk_assessment.risk_score = 0.75;
        let verdict = fallback_evaluate(&input);
        assert!(!verdict.allow);
        assert!(verdict.approval_required);
        assert!(verdict.restrictions.contains(&"high_risk_scenario".to_string()));
        assert!(verdict.restrictions.contains(&"high_risk_score".to_string()));
    }

    #[test]
    fn irreversible_actions_require_approval() {
        let mut input = low_risk_input();
        input.playbook_plan.playbooks.push(PlanPlaybook {
            id: "restore_from_backup".to_string(),
            name: "Restore From Backup".to_string(),
            risk_tier: "high".to_string(),
            reversible: false,
        });
        let verdict = fallback_evaluate(&input);
        assert!(!verdict.allow);
        assert!(verdict.restrictions.contains(&"irreversible_actions".to_string()));
    }

    #[test]
    fn long_runs_require_approval() {
        let mut input = low_risk_input();
        input.playbook_plan.estimated_duration_minutes = 90;
        let verdict = fallback_evaluate(&input);
        assert!(!verdict.allow);
        assert!(verdict.restrictions.contains(&"long_execution_time".to_string()));
    }

    #[test]
    fn low_confidence_requires_approval() {
        let mut input = low_risk_input();
        input.incident.confidence = 0.4;
        let verdict = fallback_evaluate(&input);
        assert!(!verdict.allow);
        assert!(verdict.restrictions.contains(&"low_confidence".to_string()));
    }

    #[test]
    fn fallback_is_deterministic() {
        let input = low_risk_input();
        let a = fallback_evaluate(&input);
        let b = fallback_evaluate(&input);
        assert_eq!(a, b);
        // Byte-identical under serialization as well.
        assert_eq!(
            serde_json::to_vec(&a).unwrap(),
            serde_json::to_vec(&b).unwrap()
        );
    }

    #[tokio::test]
    async fn unreachable_engine_degrades_to_fallback() {
        // Nothing listens on this port.
        let gate = PolicyGate::new("http://127.0.0.1:59999");
        let verdict = gate.evaluate(&low_risk_input()).await;
        assert_eq!(verdict.policy_source, "fallback");
        assert!(verdict.allow);
    }
}
