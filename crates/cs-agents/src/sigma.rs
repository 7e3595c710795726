//! Detection-rule drafting
//!
//! When the analyst finds a technique with no retrieval-confirmed
//! detection coverage, it drafts a structured sigma-style rule: ECS
//! predicates extracted from the incident evidence, a logsource
//! inferred from the activity keywords, and a minimal positive /
//! negative test-event corpus for quick validation. Drafts are
//! validated before they are accepted.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use cs_frame::{Alert, EntityRef};

/// Predicate operator over an ECS field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateOp {
    Equals,
    Contains,
    In,
}

/// One field/value predicate. `fields` holds alternatives (OR) when an
/// entity can sit on either side of a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EcsPredicate {
    pub fields: Vec<String>,
    pub value: Value,
    pub op: PredicateOp,
}

impl EcsPredicate {
    fn eq(field: &str, value: Value) -> Self {
        Self {
            fields: vec![field.to_string()],
            value,
            op: PredicateOp::Equals,
        }
    }

    fn contains(field: &str, value: Value) -> Self {
        Self {
            fields: vec![field.to_string()],
            value,
            op: PredicateOp::Contains,
        }
    }
}

/// Evidence bundle the extractor works from.
#[derive(Debug, Clone, Default)]
pub struct EvidenceContext {
    /// Parsed ECS telemetry body, when available.
    pub telemetry: Option<Value>,
    pub alerts: Vec<Alert>,
    pub entities: Vec<EntityRef>,
}

/// A drafted detection rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigmaDraft {
    pub rule_id: String,
    pub title: String,
    pub rule_yaml: String,
    pub predicates: Vec<EcsPredicate>,
    pub logsource: BTreeMap<String, String>,
    pub positives: Vec<String>,
    pub negatives: Vec<String>,
    pub activity: String,
    pub generated_at: String,
}

/// Validation verdict for a drafted rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// Predicate extraction
// ---------------------------------------------------------------------------

/// Extract ECS field/value predicates from the evidence bundle.
pub fn ecs_predicates_from_evidence(evidence: &EvidenceContext) -> Vec<EcsPredicate> {
    let mut predicates = Vec::new();

    if let Some(telemetry) = &evidence.telemetry {
        extract_telemetry_predicates(telemetry, &mut predicates);
    }

    for alert in &evidence.alerts {
        let summary = alert.summary.to_lowercase();
        if summary.contains("ssh") {
            predicates.push(EcsPredicate::eq("destination.port", json!(22)));
            predicates.push(EcsPredicate::eq("network.protocol", json!("tcp")));
        }
        if summary.contains("brute") || summary.contains("failed") {
            predicates.push(EcsPredicate::eq("event.outcome", json!("failure")));
        }
        if summary.contains("web") || summary.contains("http") {
            predicates.push(EcsPredicate {
                fields: vec!["destination.port".to_string()],
                value: json!([80, 443, 8080, 8443]),
                op: PredicateOp::In,
            });
        }
    }

    for entity in &evidence.entities {
        match entity.entity_type.as_str() {
            "ip" => predicates.push(EcsPredicate {
                fields: vec!["source.ip".to_string(), "destination.ip".to_string()],
                value: json!(entity.id),
                op: PredicateOp::Equals,
            }),
            "host" => predicates.push(EcsPredicate::eq("host.name", json!(entity.id))),
            "user" => predicates.push(EcsPredicate::eq("user.name", json!(entity.id))),
            "proc" => predicates.push(EcsPredicate::contains("process.name", json!(entity.id))),
            _ => {}
        }
    }

    predicates
}

fn extract_telemetry_predicates(telemetry: &Value, predicates: &mut Vec<EcsPredicate>) {
    if let Some(event) = telemetry.get("event") {
        if let Some(dataset) = event.get("dataset") {
            predicates.push(EcsPredicate::eq("event.dataset", dataset.clone()));
        }
        if let Some(category) = event.get("category") {
            predicates.push(EcsPredicate::contains("event.category", category.clone()));
        }
    }
    if let Some(process) = telemetry.get("process") {
        if let Some(name) = process.get("name") {
            predicates.push(EcsPredicate::eq("process.name", name.clone()));
        }
        if let Some(cmd) = process.get("command_line") {
            predicates.push(EcsPredicate::contains("process.command_line", cmd.clone()));
        }
    }
    if let Some(network) = telemetry.get("network") {
        if let Some(protocol) = network.get("protocol") {
            predicates.push(EcsPredicate::eq("network.protocol", protocol.clone()));
        }
    }
    for (side, prefix) in [("source", "source"), ("destination", "destination")] {
        if let Some(endpoint) = telemetry.get(side) {
            if let Some(ip) = endpoint.get("ip") {
                predicates.push(EcsPredicate::eq(&format!("{prefix}.ip"), ip.clone()));
            }
            if let Some(port) = endpoint.get("port") {
                predicates.push(EcsPredicate::eq(&format!("{prefix}.port"), port.clone()));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Logsource inference
// ---------------------------------------------------------------------------

/// Pick a logsource from the activity description and the predicates.
pub fn determine_logsource(
    activity: &str,
    predicates: &[EcsPredicate],
) -> BTreeMap<String, String> {
    let activity = activity.to_lowercase();
    let mut logsource = BTreeMap::new();

    let windowsish = predicates.iter().any(|p| {
        let text = p.value.to_string().to_lowercase();
        text.contains(".exe") || text.contains("powershell") || text.contains("windows")
    });
    let os = if windowsish { "windows" } else { "linux" };

    if ["auth", "login", "brute", "password"]
        .iter()
        .any(|t| activity.contains(t))
    {
        logsource.insert("service".into(), "sshd".into());
        logsource.insert("product".into(), "linux".into());
    } else if ["ssh", "rdp", "network", "connection", "port"]
        .iter()
        .any(|t| activity.contains(t))
    {
        logsource.insert("category".into(), "network".into());
        logsource.insert("product".into(), os.into());
    } else if ["process", "execution", "command", "binary"]
        .iter()
        .any(|t| activity.contains(t))
    {
        logsource.insert("category".into(), "process_creation".into());
        logsource.insert("product".into(), os.into());
    } else if ["web", "http", "apache", "nginx"]
        .iter()
        .any(|t| activity.contains(t))
    {
        logsource.insert("category".into(), "webserver".into());
        logsource.insert("product".into(), "apache".into());
    } else if ["dns", "domain", "resolution"]
        .iter()
        .any(|t| activity.contains(t))
    {
        logsource.insert("category".into(), "dns".into());
        logsource.insert("product".into(), "linux".into());
    } else if ["file", "access", "modify", "create", "delete"]
        .iter()
        .any(|t| activity.contains(t))
    {
        logsource.insert("category".into(), "file_event".into());
        logsource.insert("product".into(), "linux".into());
    } else {
        logsource.insert("category".into(), "process_creation".into());
        logsource.insert("product".into(), os.into());
    }
    logsource
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn selection_from_predicates(predicates: &[EcsPredicate]) -> serde_yaml::Mapping {
    let mut selection = serde_yaml::Mapping::new();
    for predicate in predicates {
        for field in &predicate.fields {
            let key = serde_yaml::Value::String(field.clone());
            let value = match predicate.op {
                PredicateOp::Equals | PredicateOp::In => {
                    serde_yaml::to_value(&predicate.value).unwrap_or(serde_yaml::Value::Null)
                }
                PredicateOp::Contains => serde_yaml::Value::String(format!(
                    "*{}*",
                    predicate
                        .value
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| predicate.value.to_string())
                )),
            };
            selection.insert(key, value);
        }
    }
    selection
}

/// Render the rule as sigma YAML.
pub fn render_sigma(
    rule_id: &str,
    title: &str,
    logsource: &BTreeMap<String, String>,
    predicates: &[EcsPredicate],
    tags: &[String],
) -> String {
    let frequency_based = predicates
        .iter()
        .any(|p| p.value.to_string().to_lowercase().contains("failure"));

    let mut detection = serde_yaml::Mapping::new();
    detection.insert(
        serde_yaml::Value::String("selection".into()),
        serde_yaml::Value::Mapping(selection_from_predicates(predicates)),
    );
    if frequency_based {
        detection.insert(
            serde_yaml::Value::String("timeframe".into()),
            serde_yaml::Value::String("5m".into()),
        );
        detection.insert(
            serde_yaml::Value::String("condition".into()),
            serde_yaml::Value::String("selection | count() > 5".into()),
        );
    } else {
        detection.insert(
            serde_yaml::Value::String("condition".into()),
            serde_yaml::Value::String("selection".into()),
        );
    }

    let mut rule = serde_yaml::Mapping::new();
    let mut push = |key: &str, value: serde_yaml::Value| {
        rule.insert(serde_yaml::Value::String(key.into()), value);
    };
    push("title", serde_yaml::Value::String(title.into()));
    push("id", serde_yaml::Value::String(rule_id.into()));
    push("status", serde_yaml::Value::String("experimental".into()));
    push(
        "description",
        serde_yaml::Value::String(format!(
            "Detects {} based on observed patterns",
            title.to_lowercase()
        )),
    );
    push("author", serde_yaml::Value::String("Countersign".into()));
    push(
        "date",
        serde_yaml::Value::String(Utc::now().format("%Y/%m/%d").to_string()),
    );
    push(
        "tags",
        serde_yaml::to_value(tags).unwrap_or(serde_yaml::Value::Sequence(vec![])),
    );
    push(
        "logsource",
        serde_yaml::to_value(logsource).unwrap_or(serde_yaml::Value::Null),
    );
    push("detection", serde_yaml::Value::Mapping(detection));
    push("level", serde_yaml::Value::String("medium".into()));
    push(
        "falsepositives",
        serde_yaml::to_value(vec![
            "Legitimate administrative activity",
            "Automated tools and scripts",
        ])
        .unwrap_or(serde_yaml::Value::Null),
    );

    serde_yaml::to_string(&serde_yaml::Value::Mapping(rule)).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Test corpus
// ---------------------------------------------------------------------------

/// Build (positives, negatives) ECS event lines for quick validation.
pub fn build_test_corpus(predicates: &[EcsPredicate]) -> (Vec<String>, Vec<String>) {
    let mut positives = Vec::new();
    let mut negatives = Vec::new();
    const TS: &str = "2023-10-01T12:00:00Z";

    for predicate in predicates {
        let field = predicate.fields[0].as_str();
        match field {
            "process.name" => {
                let name = predicate.value.as_str().unwrap_or("suspicious");
                positives.push(json!({
                    "@timestamp": TS,
                    "process": {"name": name, "pid": 1234},
                    "event": {"category": ["process"], "action": "process_start"},
                }).to_string());
                negatives.push(json!({
                    "@timestamp": TS,
                    "process": {"name": "legitimate_process", "pid": 5678},
                    "event": {"category": ["process"], "action": "process_start"},
                }).to_string());
            }
            "destination.port" => {
                let port = predicate
                    .value
                    .as_i64()
                    .or_else(|| predicate.value.as_array().and_then(|a| a.first()?.as_i64()))
                    .unwrap_or(22);
                positives.push(json!({
                    "@timestamp": TS,
                    "destination": {"port": port, "ip": "192.168.1.100"},
                    "network": {"protocol": "tcp"},
                    "event": {"category": ["network"]},
                }).to_string());
                let other = if port == 443 { 80 } else { 443 };
                negatives.push(json!({
                    "@timestamp": TS,
                    "destination": {"port": other, "ip": "192.168.1.100"},
                    "network": {"protocol": "tcp"},
                    "event": {"category": ["network"]},
                }).to_string());
            }
            "source.ip" => {
                let ip = predicate.value.as_str().unwrap_or("192.168.1.1");
                positives.push(json!({
                    "@timestamp": TS,
                    "source": {"ip": ip},
                    "destination": {"ip": "192.168.1.200"},
                    "event": {"category": ["network"]},
                }).to_string());
                negatives.push(json!({
                    "@timestamp": TS,
                    "source": {"ip": "10.0.0.1"},
                    "destination": {"ip": "192.168.1.200"},
                    "event": {"category": ["network"]},
                }).to_string());
            }
            "event.outcome" => {
                let outcome = predicate.value.as_str().unwrap_or("failure");
                let other = if outcome == "failure" { "success" } else { "failure" };
                positives.push(json!({
                    "@timestamp": TS,
                    "event": {"outcome": outcome, "category": ["authentication"], "action": "login"},
                    "user": {"name": "testuser"},
                }).to_string());
                negatives.push(json!({
                    "@timestamp": TS,
                    "event": {"outcome": other, "category": ["authentication"], "action": "login"},
                    "user": {"name": "testuser"},
                }).to_string());
            }
            _ => {}
        }
    }

    if positives.is_empty() {
        positives.push(json!({
            "@timestamp": TS,
            "event": {"category": ["process"], "action": "process_start"},
            "process": {"name": "suspicious.exe", "pid": 1234},
        }).to_string());
        negatives.push(json!({
            "@timestamp": TS,
            "event": {"category": ["process"], "action": "process_start"},
            "process": {"name": "legitimate.exe", "pid": 5678},
        }).to_string());
    }

    (positives, negatives)
}

// ---------------------------------------------------------------------------
// Generation + validation
// ---------------------------------------------------------------------------

/// Draft a complete rule for an activity description.
pub fn generate_rule(
    activity: &str,
    evidence: &EvidenceContext,
    technique_tags: &[String],
) -> SigmaDraft {
    info!("drafting detection rule for: {activity}");

    let rule_id = Uuid::new_v4().to_string();
    let mut title = titlecase(activity);
    if !title.starts_with("Detect") {
        title = format!("Detect {title}");
    }

    let predicates = ecs_predicates_from_evidence(evidence);
    let logsource = determine_logsource(activity, &predicates);
    let tags: Vec<String> = technique_tags
        .iter()
        .map(|t| format!("attack.{}", t.to_lowercase()))
        .collect();
    let rule_yaml = render_sigma(&rule_id, &title, &logsource, &predicates, &tags);
    let (positives, negatives) = build_test_corpus(&predicates);

    SigmaDraft {
        rule_id,
        title,
        rule_yaml,
        predicates,
        logsource,
        positives,
        negatives,
        activity: activity.to_string(),
        generated_at: Utc::now().to_rfc3339(),
    }
}

/// Validate a rendered rule: required fields and well-formed logsource
/// and detection sections.
pub fn validate_rule(rule_yaml: &str) -> RuleValidation {
    let parsed: serde_yaml::Value = match serde_yaml::from_str(rule_yaml) {
        Ok(value) => value,
        Err(e) => {
            return RuleValidation {
                valid: false,
                errors: vec![format!("yaml parsing error: {e}")],
                warnings: vec![],
            };
        }
    };

    let mut validation = RuleValidation {
        valid: true,
        ..RuleValidation::default()
    };

    for required in ["title", "logsource", "detection"] {
        if parsed.get(required).is_none() {
            validation
                .errors
                .push(format!("missing required field: {required}"));
            validation.valid = false;
        }
    }

    if let Some(logsource) = parsed.get("logsource") {
        match logsource.as_mapping() {
            None => {
                validation.errors.push("logsource must be a mapping".into());
                validation.valid = false;
            }
            Some(map) => {
                let has_scope = map.keys().any(|key| {
                    matches!(key.as_str(), Some("product" | "service" | "category"))
                });
                if !has_scope {
                    validation
                        .warnings
                        .push("logsource should specify product, service, or category".into());
                }
            }
        }
    }

    if let Some(detection) = parsed.get("detection") {
        match detection.as_mapping() {
            None => {
                validation.errors.push("detection must be a mapping".into());
                validation.valid = false;
            }
            Some(map) => {
                let has_condition = map.keys().any(|key| key.as_str() == Some("condition"));
                if !has_condition {
                    validation
                        .errors
                        .push("detection must have a condition field".into());
                    validation.valid = false;
                }
            }
        }
    }

    if parsed.get("level").is_none() {
        validation.warnings.push("missing level field".into());
    }
    if parsed.get("id").is_none() {
        validation.warnings.push("missing id field".into());
    }

    validation
}

fn titlecase(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cs_core::Severity;

    fn brute_force_evidence() -> EvidenceContext {
        EvidenceContext {
            telemetry: None,
            alerts: vec![Alert {
                ts_ms: 0,
                id: "a1".into(),
                severity: Severity::High,
                entities: vec![],
                tags: vec![],
                summary: "SSH brute force with repeated failed logins".into(),
                evidence_ref: String::new(),
            }],
            entities: vec![
                EntityRef::new("ip", "203.0.113.5"),
                EntityRef::new("host", "web-01"),
            ],
        }
    }

    #[test]
    fn predicates_extracted_from_alerts_and_entities() {
        let predicates = ecs_predicates_from_evidence(&brute_force_evidence());
        assert!(predicates
            .iter()
            .any(|p| p.fields == vec!["destination.port"] && p.value == json!(22)));
        assert!(predicates
            .iter()
            .any(|p| p.fields == vec!["event.outcome"] && p.value == json!("failure")));
        assert!(predicates
            .iter()
            .any(|p| p.fields.contains(&"source.ip".to_string())
                && p.value == json!("203.0.113.5")));
        assert!(predicates
            .iter()
            .any(|p| p.fields == vec!["host.name"] && p.value == json!("web-01")));
    }

    #[test]
    fn telemetry_predicates_follow_ecs_fields() {
        let evidence = EvidenceContext {
            telemetry: Some(json!({
                "event": {"dataset": "auditd", "category": ["process"]},
                "process": {"name": "nc", "command_line": "nc -e /bin/sh"},
                "destination": {"ip": "10.0.0.5", "port": 4444},
            })),
            ..EvidenceContext::default()
        };
        let predicates = ecs_predicates_from_evidence(&evidence);
        assert!(predicates
            .iter()
            .any(|p| p.fields == vec!["event.dataset"] && p.value == json!("auditd")));
        assert!(predicates
            .iter()
            .any(|p| p.fields == vec!["process.name"] && p.value == json!("nc")));
        assert!(predicates
            .iter()
            .any(|p| p.fields == vec!["destination.port"] && p.value == json!(4444)));
    }

    #[test]
    fn logsource_inference_by_activity() {
        let auth = determine_logsource("brute force authentication attempts", &[]);
        assert_eq!(auth.get("service").map(String::as_str), Some("sshd"));

        let dns = determine_logsource("suspicious dns resolution pattern", &[]);
        assert_eq!(dns.get("category").map(String::as_str), Some("dns"));

        let windows_proc = determine_logsource(
            "malicious process execution",
            &[EcsPredicate::eq("process.name", json!("rundll32.exe"))],
        );
        assert_eq!(
            windows_proc.get("category").map(String::as_str),
            Some("process_creation")
        );
        assert_eq!(windows_proc.get("product").map(String::as_str), Some("windows"));
    }

    #[test]
    fn generated_rule_validates_and_counts_failures() {
        let draft = generate_rule(
            "suspicious activity related to T1110",
            &brute_force_evidence(),
            &["T1110".to_string()],
        );
        assert!(draft.title.starts_with("Detect "));
        assert!(!draft.positives.is_empty());
        assert_eq!(draft.positives.len(), draft.negatives.len());

        let validation = validate_rule(&draft.rule_yaml);
        assert!(validation.valid, "errors: {:?}", validation.errors);

        // Failure evidence upgraded the rule to frequency-based.
        assert!(draft.rule_yaml.contains("count() > 5"));
        assert!(draft.rule_yaml.contains("timeframe: 5m"));
        assert!(draft.rule_yaml.contains("attack.t1110"));
    }

    #[test]
    fn validation_catches_missing_condition() {
        let broken = "title: X\nlogsource:\n  product: linux\ndetection:\n  selection:\n    a: b\n";
        let validation = validate_rule(broken);
        assert!(!validation.valid);
        assert!(validation
            .errors
            .iter()
            .any(|e| e.contains("condition")));
    }

    #[test]
    fn empty_evidence_still_yields_a_testable_rule() {
        let draft = generate_rule("unknown activity", &EvidenceContext::default(), &[]);
        assert!(!draft.positives.is_empty());
        assert!(!draft.negatives.is_empty());
        assert!(validate_rule(&draft.rule_yaml).valid);
    }
}
