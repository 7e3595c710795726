//! Frame data model
//!
//! Mirrors the wire contract: every frame carries `ts` (unix ms),
//! `incident_id`, and exactly one payload variant. Timestamps are
//! plain `i64` milliseconds in memory; the codecs render the nested
//! `{"unix_ms": ..}` wire shape.

use cs_core::Severity;
use serde::{Deserialize, Serialize};

/// Reference to an entity involved in an incident.
///
/// `entity_type` is an open vocabulary; the well-known values are
/// `host`, `ip`, `user`, `proc`, `file`, and `domain`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub id: String,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn is_host(&self) -> bool {
        self.entity_type == "host"
    }

    pub fn is_ip(&self) -> bool {
        self.entity_type == "ip"
    }

    /// `type:id` form used in dedup hashes and log lines.
    pub fn canonical(&self) -> String {
        format!("{}:{}", self.entity_type, self.id)
    }
}

/// A single normalized telemetry event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct HostTelemetry {
    pub ts_ms: i64,
    pub host: String,
    pub source: String,
    /// The normalized event body; the core never parses it.
    pub ecs_json: String,
}

/// A detection alert produced by an upstream sensor pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Alert {
    pub ts_ms: i64,
    pub id: String,
    pub severity: Severity,
    pub entities: Vec<EntityRef>,
    pub tags: Vec<String>,
    pub summary: String,
    /// Opaque pointer into the evidence store; never dereferenced here.
    pub evidence_ref: String,
}

/// An analyst finding: hypothesis plus supporting graph context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Finding {
    pub ts_ms: i64,
    pub id: String,
    pub hypothesis: String,
    pub graph_nodes: Vec<EntityRef>,
    pub candidate_ttps: Vec<String>,
    pub rationale_json: String,
}

/// A planned response: selected playbooks and the aggregate risk tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ActionPlan {
    pub ts_ms: i64,
    pub incident_id: String,
    pub playbooks: Vec<String>,
    pub change_set_json: String,
    pub risk_tier: String,
}

/// Status record for a playbook execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PlaybookRun {
    pub ts_ms: i64,
    pub playbook_id: String,
    pub status: String,
    pub logs: String,
}

/// Exactly one payload variant per frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    Telemetry(HostTelemetry),
    Alert(Alert),
    Finding(Finding),
    Plan(ActionPlan),
    Run(PlaybookRun),
}

impl Payload {
    /// Wire name of the active variant.
    pub fn variant_name(&self) -> &'static str {
        match self {
            Payload::Telemetry(_) => "telemetry",
            Payload::Alert(_) => "alert",
            Payload::Finding(_) => "finding",
            Payload::Plan(_) => "plan",
            Payload::Run(_) => "run",
        }
    }
}

/// The unit of transport on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub ts_ms: i64,
    pub incident_id: String,
    pub payload: Payload,
}

impl Frame {
    pub fn telemetry(ts_ms: i64, incident_id: impl Into<String>, t: HostTelemetry) -> Self {
        Self {
            ts_ms,
            incident_id: incident_id.into(),
            payload: Payload::Telemetry(t),
        }
    }

    pub fn alert(ts_ms: i64, incident_id: impl Into<String>, a: Alert) -> Self {
        Self {
            ts_ms,
            incident_id: incident_id.into(),
            payload: Payload::Alert(a),
        }
    }

    pub fn finding(ts_ms: i64, incident_id: impl Into<String>, f: Finding) -> Self {
        Self {
            ts_ms,
            incident_id: incident_id.into(),
            payload: Payload::Finding(f),
        }
    }

    pub fn plan(ts_ms: i64, incident_id: impl Into<String>, p: ActionPlan) -> Self {
        Self {
            ts_ms,
            incident_id: incident_id.into(),
            payload: Payload::Plan(p),
        }
    }

    pub fn run(ts_ms: i64, incident_id: impl Into<String>, r: PlaybookRun) -> Self {
        Self {
            ts_ms,
            incident_id: incident_id.into(),
            payload: Payload::Run(r),
        }
    }

    pub fn as_alert(&self) -> Option<&Alert> {
        match &self.payload {
            Payload::Alert(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_finding(&self) -> Option<&Finding> {
        match &self.payload {
            Payload::Finding(f) => Some(f),
            _ => None,
        }
    }

    /// Idempotency key for at-least-once consumers: the payload id when
    /// the variant carries one, otherwise the timestamp.
    pub fn dedup_key(&self) -> String {
        let inner = match &self.payload {
            Payload::Alert(a) => a.id.clone(),
            Payload::Finding(f) => f.id.clone(),
            Payload::Run(r) => format!("{}@{}", r.playbook_id, r.ts_ms),
            Payload::Telemetry(t) => format!("{}@{}", t.host, t.ts_ms),
            Payload::Plan(p) => format!("plan@{}", p.ts_ms),
        };
        format!("{}/{inner}", self.incident_id)
    }
}
