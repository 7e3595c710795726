//! Analyst: hypothesis building and detection-gap drafting
//!
//! Takes the scout output plus entities, TTPs, and evidence refs and
//! produces: tactic groupings with named attack patterns, a timeline,
//! the canonical kill-chain ordering, a templated hypothesis sentence,
//! a deterministic confidence score, a reassessed severity, IOC
//! indicators, and drafted detection rules for techniques with no
//! confirmed coverage.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use cs_core::Severity;
use cs_frame::EntityRef;
use cs_knowledge::{corpus, RetrievalEngine};

use crate::scout::ScoutFindings;
use crate::sigma::{self, EvidenceContext, RuleValidation, SigmaDraft};
use crate::Result;

/// Canonical kill-chain order used for attack-chain reconstruction.
pub const TACTIC_ORDER: &[&str] = &[
    "Initial Access",
    "Execution",
    "Persistence",
    "Privilege Escalation",
    "Defense Evasion",
    "Credential Access",
    "Discovery",
    "Lateral Movement",
    "Collection",
    "Command and Control",
    "Exfiltration",
    "Impact",
];

/// Most rules drafted per incident.
const MAX_DRAFTED_RULES: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackPattern {
    pub pattern_type: String,
    pub description: String,
    pub severity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainLink {
    pub technique_id: String,
    pub name: String,
    pub tactic: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TtpAnalysis {
    pub ttps: Vec<String>,
    /// tactic -> techniques in that tactic, in first-seen order.
    pub tactics: BTreeMap<String, Vec<String>>,
    pub patterns: Vec<AttackPattern>,
    pub attack_chain: Vec<ChainLink>,
    pub complexity_score: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub ts: DateTime<Utc>,
    pub event: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indicator {
    pub indicator_type: String,
    pub value: String,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionGap {
    pub technique: String,
    pub gap_description: String,
    pub proposed_detection: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftedRule {
    pub draft: SigmaDraft,
    pub validation: RuleValidation,
    pub gap: DetectionGap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalystFindings {
    pub hypothesis: String,
    pub confidence: f64,
    pub requires_response: bool,
    pub severity_assessment: Severity,
    pub ttp_analysis: TtpAnalysis,
    pub timeline: Vec<TimelineEvent>,
    pub indicators: Vec<Indicator>,
    pub detection_gaps: Vec<DetectionGap>,
    pub sigma_rules: Vec<DraftedRule>,
    pub tokens_used: u32,
}

#[derive(Debug, Clone, Default)]
pub struct AnalystInput {
    pub scout: Option<ScoutFindings>,
    pub entities: Vec<EntityRef>,
    pub candidate_ttps: Vec<String>,
    pub evidence_refs: Vec<String>,
    pub severity: Severity,
}

pub struct AnalystAgent {
    retrieval: Option<Arc<RetrievalEngine>>,
}

impl AnalystAgent {
    pub fn new(retrieval: Option<Arc<RetrievalEngine>>) -> Self {
        Self { retrieval }
    }

    pub async fn analyze_incident(&self, input: &AnalystInput) -> Result<AnalystFindings> {
        info!(
            "analyst: building hypothesis for {} TTPs",
            input.candidate_ttps.len()
        );

        let ttp_analysis = self.analyze_ttp_patterns(&input.candidate_ttps).await;
        let timeline = construct_timeline(input);
        let hypothesis = hypothesis_text(&ttp_analysis, &input.entities, input.severity);

        let scout_confidence = input.scout.as_ref().map_or(0.0, |s| s.confidence);
        let base_confidence =
            hypothesis_confidence(scout_confidence, &ttp_analysis, timeline.len());

        let severity_assessment =
            reassess_severity(input.severity, &ttp_analysis, base_confidence);
        let requires_response =
            assess_response_requirement(base_confidence, severity_assessment, &ttp_analysis);

        let indicators = extract_indicators(input);
        let detection_gaps = self.identify_detection_gaps(&input.candidate_ttps).await;
        let sigma_rules = draft_rules(&detection_gaps, input);

        // Successfully drafted rules and supporting context nudge the
        // confidence, still capped at 0.95.
        let valid_rules = sigma_rules.iter().filter(|r| r.validation.valid).count();
        let mut confidence = base_confidence + (valid_rules as f64 * 0.05).min(0.1);
        if self.retrieval.is_some() {
            confidence += 0.05;
        }
        let confidence = confidence.min(0.95);

        let tokens_used = 100
            + 50 * input.candidate_ttps.len() as u32
            + 150 * sigma_rules.len() as u32;

        info!(
            "analyst: hypothesis built, confidence {confidence:.2}, severity {severity_assessment}, response={requires_response}"
        );
        Ok(AnalystFindings {
            hypothesis,
            confidence,
            requires_response,
            severity_assessment,
            ttp_analysis,
            timeline,
            indicators,
            detection_gaps,
            sigma_rules,
            tokens_used,
        })
    }

    /// Group TTPs by tactic (retrieval first, cached mapping fallback)
    /// and detect named attack patterns.
    async fn analyze_ttp_patterns(&self, candidate_ttps: &[String]) -> TtpAnalysis {
        if candidate_ttps.is_empty() {
            return TtpAnalysis::default();
        }

        let mut tactics: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut details: Vec<(String, String, String, f64)> = Vec::new();

        for ttp in candidate_ttps {
            let mut resolved: Option<(String, String, f64)> = None;
            if let Some(engine) = &self.retrieval {
                if let Ok(results) = engine.query_by_attack_technique(ttp, 1).await {
                    if let Some(result) = results.first() {
                        if let Some(tactic) = result.meta_str("tactic") {
                            resolved = Some((
                                result.meta_str("title").unwrap_or_default().to_string(),
                                tactic.to_string(),
                                f64::from(result.score),
                            ));
                        }
                    }
                }
            }
            if resolved.is_none() {
                resolved = corpus::tactic_for_technique(ttp).map(|tactic| {
                    (
                        corpus::name_for_technique(ttp).unwrap_or_default().to_string(),
                        tactic.to_string(),
                        0.5,
                    )
                });
            }

            let Some((name, tactic, score)) = resolved else {
                debug!("analyst: no tactic known for {ttp}");
                continue;
            };
            tactics.entry(tactic.clone()).or_default().push(ttp.clone());
            details.push((ttp.clone(), name, tactic, score));
        }

        let mut patterns = Vec::new();
        if tactics.len() >= 3 {
            let names: Vec<&str> = tactics.keys().map(String::as_str).collect();
            patterns.push(AttackPattern {
                pattern_type: "multi_tactic_attack".to_string(),
                description: format!(
                    "Attack spans {} tactics: {}",
                    tactics.len(),
                    names.join(", ")
                ),
                severity: "high".to_string(),
            });
        }
        if tactics.contains_key("Lateral Movement") {
            patterns.push(AttackPattern {
                pattern_type: "lateral_movement".to_string(),
                description: "Evidence of lateral movement within network".to_string(),
                severity: "medium".to_string(),
            });
        }
        if tactics.contains_key("Persistence") {
            patterns.push(AttackPattern {
                pattern_type: "persistence_establishment".to_string(),
                description: "Attacker attempting to maintain access".to_string(),
                severity: "high".to_string(),
            });
        }
        if tactics.contains_key("Credential Access") {
            patterns.push(AttackPattern {
                pattern_type: "credential_harvesting".to_string(),
                description: "Evidence of credential dumping or harvesting".to_string(),
                severity: "high".to_string(),
            });
        }

        // Kill-chain ordering: tactics in canonical order, techniques
        // in first-seen order within each tactic.
        let mut attack_chain = Vec::new();
        for tactic in TACTIC_ORDER {
            if let Some(ttps) = tactics.get(*tactic) {
                for ttp in ttps {
                    let detail = details.iter().find(|(id, ..)| id == ttp);
                    attack_chain.push(ChainLink {
                        technique_id: ttp.clone(),
                        name: detail.map(|(_, name, ..)| name.clone()).unwrap_or_default(),
                        tactic: (*tactic).to_string(),
                        confidence: detail.map_or(0.5, |(.., score)| *score),
                    });
                }
            }
        }

        TtpAnalysis {
            ttps: candidate_ttps.to_vec(),
            complexity_score: tactics.len() + patterns.len(),
            tactics,
            patterns,
            attack_chain,
        }
    }

    /// Techniques with no retrieval-confirmed detection rule.
    async fn identify_detection_gaps(&self, candidate_ttps: &[String]) -> Vec<DetectionGap> {
        let mut gaps = Vec::new();
        for ttp in candidate_ttps {
            let mut covered = false;
            if let Some(engine) = &self.retrieval {
                if let Ok(results) = engine
                    .query_for_detection_rules(&format!("detect {ttp} activity"), 3)
                    .await
                {
                    covered = results.iter().any(|r| {
                        r.metadata
                            .get("attack_techniques")
                            .map(|v| v.to_string().contains(ttp.as_str()))
                            .unwrap_or(false)
                    });
                }
            }
            if !covered {
                gaps.push(DetectionGap {
                    technique: ttp.clone(),
                    gap_description: format!("No detection rules found for technique {ttp}"),
                    proposed_detection: format!("Create detection rule for {ttp} activities"),
                });
            }
        }
        gaps
    }
}

// ---------------------------------------------------------------------------
// Pure scoring and templating
// ---------------------------------------------------------------------------

fn construct_timeline(input: &AnalystInput) -> Vec<TimelineEvent> {
    let mut timeline = Vec::new();

    if let Some(scout) = &input.scout {
        // Anchor on the newest tagged alert when present.
        let anchor = scout
            .tagged_alerts
            .iter()
            .map(|t| t.alert.ts_ms)
            .max()
            .unwrap_or(0);
        timeline.push(TimelineEvent {
            ts: Utc.timestamp_millis_opt(anchor).single().unwrap_or_else(Utc::now),
            event: format!(
                "Alert analysis identified {} new techniques",
                scout.new_ttps.len()
            ),
            source: "scout_agent".to_string(),
        });

        for tagged in &scout.tagged_alerts {
            timeline.push(TimelineEvent {
                ts: Utc
                    .timestamp_millis_opt(tagged.alert.ts_ms)
                    .single()
                    .unwrap_or_else(Utc::now),
                event: format!("Alert {}: {}", tagged.alert.id, tagged.alert.summary),
                source: "alert".to_string(),
            });
        }
    }

    for entity in &input.entities {
        let event = match entity.entity_type.as_str() {
            "host" => Some(format!("Host {} involved in incident", entity.id)),
            "ip" => Some(format!("Network activity from IP {}", entity.id)),
            _ => None,
        };
        if let Some(event) = event {
            timeline.push(TimelineEvent {
                ts: Utc::now(),
                event,
                source: "entity_analysis".to_string(),
            });
        }
    }

    timeline.sort_by_key(|e| e.ts);
    timeline
}

fn hypothesis_text(
    analysis: &TtpAnalysis,
    entities: &[EntityRef],
    severity: Severity,
) -> String {
    if analysis.ttps.is_empty() {
        return "Incident requires further investigation to determine attack pattern.".to_string();
    }

    let mut parts = Vec::new();

    if analysis.tactics.len() > 1 {
        let names: Vec<&str> = analysis.tactics.keys().map(String::as_str).collect();
        parts.push(format!(
            "Multi-stage attack involving {} different tactics: {}",
            analysis.tactics.len(),
            names.join(", ")
        ));
    } else {
        let tactic = analysis
            .tactics
            .keys()
            .next()
            .map_or("Unknown", String::as_str);
        parts.push(format!("Attack focused on {tactic} activities"));
    }

    let high_patterns: Vec<&str> = analysis
        .patterns
        .iter()
        .filter(|p| p.severity == "high")
        .map(|p| p.description.as_str())
        .collect();
    if !high_patterns.is_empty() {
        parts.push(format!(
            "Critical activities observed: {}",
            high_patterns.join("; ")
        ));
    }

    let hosts: std::collections::HashSet<&str> = entities
        .iter()
        .filter(|e| e.is_host())
        .map(|e| e.id.as_str())
        .collect();
    match hosts.len() {
        0 => {}
        1 => parts.push(format!(
            "Activity focused on host {}",
            hosts.iter().next().expect("one host")
        )),
        n => parts.push(format!("Attack spans {n} hosts")),
    }

    if severity.is_actionable() {
        parts.push("High-priority incident requiring immediate attention".to_string());
    }

    format!("{}.", parts.join(". "))
}

/// `0.5 + 0.3*scout + min(0.1*|ttps|, 0.2) + min(0.1*|patterns|, 0.2)
/// + 0.1 if |timeline| > 2`, capped at 0.95.
fn hypothesis_confidence(
    scout_confidence: f64,
    analysis: &TtpAnalysis,
    timeline_len: usize,
) -> f64 {
    let mut confidence = 0.5;
    confidence += scout_confidence * 0.3;
    confidence += (analysis.ttps.len() as f64 * 0.1).min(0.2);
    confidence += (analysis.patterns.len() as f64 * 0.1).min(0.2);
    if timeline_len > 2 {
        confidence += 0.1;
    }
    confidence.min(0.95)
}

fn reassess_severity(original: Severity, analysis: &TtpAnalysis, confidence: f64) -> Severity {
    let high_patterns = analysis
        .patterns
        .iter()
        .filter(|p| p.severity == "high")
        .count() as u8;
    let mut severity = original.bump(high_patterns);
    if analysis.tactics.len() > 2 {
        severity = severity.bump(1);
    }
    if confidence > 0.8 {
        severity = severity.bump(1);
    }
    severity
}

fn assess_response_requirement(
    confidence: f64,
    severity: Severity,
    analysis: &TtpAnalysis,
) -> bool {
    if confidence > 0.7 && severity.is_actionable() {
        return true;
    }
    let critical_patterns = analysis.patterns.iter().any(|p| p.severity == "high");
    if critical_patterns && confidence > 0.5 {
        return true;
    }
    analysis.tactics.len() > 2 && confidence > 0.6
}

fn extract_indicators(input: &AnalystInput) -> Vec<Indicator> {
    let mut indicators = Vec::new();

    for entity in &input.entities {
        let (indicator_type, confidence) = match entity.entity_type.as_str() {
            "ip" => ("ip_address", 0.8),
            "domain" => ("domain_name", 0.7),
            "file" => ("file_hash", 0.9),
            "proc" => ("process_name", 0.6),
            _ => continue,
        };
        indicators.push(Indicator {
            indicator_type: indicator_type.to_string(),
            value: entity.id.clone(),
            confidence,
            source: None,
        });
    }

    if let Some(scout) = &input.scout {
        for tagged in &scout.tagged_alerts {
            for ip in scan_ipv4(&tagged.alert.summary) {
                indicators.push(Indicator {
                    indicator_type: "ip_address".to_string(),
                    value: ip,
                    confidence: 0.6,
                    source: Some(format!("alert_{}", tagged.alert.id)),
                });
            }
        }
    }

    indicators
}

/// Dotted-quad scan over free text.
fn scan_ipv4(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for token in text.split(|c: char| !(c.is_ascii_digit() || c == '.')) {
        let octets: Vec<&str> = token.split('.').collect();
        if octets.len() == 4
            && octets
                .iter()
                .all(|o| !o.is_empty() && o.len() <= 3 && o.parse::<u16>().map_or(false, |v| v <= 255))
        {
            out.push(token.to_string());
        }
    }
    out
}

fn draft_rules(gaps: &[DetectionGap], input: &AnalystInput) -> Vec<DraftedRule> {
    let mut rules = Vec::new();
    for gap in gaps.iter().take(MAX_DRAFTED_RULES) {
        let evidence = EvidenceContext {
            telemetry: None,
            alerts: input
                .scout
                .as_ref()
                .map(|s| s.tagged_alerts.iter().map(|t| t.alert.clone()).collect())
                .unwrap_or_default(),
            entities: input.entities.clone(),
        };
        let activity = format!("suspicious activity related to {}", gap.technique);
        let draft = sigma::generate_rule(&activity, &evidence, &[gap.technique.clone()]);
        let validation = sigma::validate_rule(&draft.rule_yaml);
        if validation.valid {
            rules.push(DraftedRule {
                draft,
                validation,
                gap: gap.clone(),
            });
        } else {
            debug!(
                "analyst: drafted rule for {} failed validation: {:?}",
                gap.technique, validation.errors
            );
        }
    }
    rules
}
