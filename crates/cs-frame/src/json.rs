//! JSON wire codec
//!
//! Shape: `{"ts":{"unix_ms":..},"incident_id":"..","<variant>":{..}}`
//! with exactly one of `telemetry | alert | finding | plan | run`.
//!
//! The wire shape is built explicitly rather than derived so that
//! unknown fields are ignored on decode and the variant-missing case
//! maps to [`CodecError::UnknownVariant`].

use serde_json::{json, Map, Value};

use crate::types::{ActionPlan, Alert, EntityRef, Finding, Frame, HostTelemetry, Payload, PlaybookRun};
use crate::{CodecError, Result};

pub fn encode(frame: &Frame) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&frame_to_value(frame))?)
}

pub fn decode(data: &[u8]) -> Result<Frame> {
    let value: Value = serde_json::from_slice(data)?;
    frame_from_value(&value)
}

fn ts_value(ts_ms: i64) -> Value {
    json!({ "unix_ms": ts_ms })
}

fn entities_value(entities: &[EntityRef]) -> Value {
    Value::Array(
        entities
            .iter()
            .map(|e| json!({ "type": e.entity_type, "id": e.id }))
            .collect(),
    )
}

pub(crate) fn frame_to_value(frame: &Frame) -> Value {
    let mut root = Map::new();
    root.insert("ts".into(), ts_value(frame.ts_ms));
    root.insert("incident_id".into(), Value::String(frame.incident_id.clone()));

    let (key, body) = match &frame.payload {
        Payload::Telemetry(t) => (
            "telemetry",
            json!({
                "ts": ts_value(t.ts_ms),
                "host": t.host,
                "source": t.source,
                "ecs_json": t.ecs_json,
            }),
        ),
        Payload::Alert(a) => (
            "alert",
            json!({
                "ts": ts_value(a.ts_ms),
                "id": a.id,
                "severity": a.severity.as_str(),
                "entities": entities_value(&a.entities),
                "tags": a.tags,
                "summary": a.summary,
                "evidence_ref": a.evidence_ref,
            }),
        ),
        Payload::Finding(f) => (
            "finding",
            json!({
                "ts": ts_value(f.ts_ms),
                "id": f.id,
                "hypothesis": f.hypothesis,
                "graph_nodes": entities_value(&f.graph_nodes),
                "candidate_ttps": f.candidate_ttps,
                "rationale_json": f.rationale_json,
            }),
        ),
        Payload::Plan(p) => (
            "plan",
            json!({
                "ts": ts_value(p.ts_ms),
                "incident_id": p.incident_id,
                "playbooks": p.playbooks,
                "change_set_json": p.change_set_json,
                "risk_tier": p.risk_tier,
            }),
        ),
        Payload::Run(r) => (
            "run",
            json!({
                "ts": ts_value(r.ts_ms),
                "playbook_id": r.playbook_id,
                "status": r.status,
                "logs": r.logs,
            }),
        ),
    };
    root.insert(key.into(), body);
    Value::Object(root)
}

fn ts_from(value: &Value) -> i64 {
    value
        .get("ts")
        .and_then(|t| t.get("unix_ms"))
        .and_then(Value::as_i64)
        .unwrap_or_default()
}

fn str_from(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn strings_from(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn entities_from(value: &Value, key: &str) -> Vec<EntityRef> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|e| EntityRef {
                    entity_type: str_from(e, "type"),
                    id: str_from(e, "id"),
                })
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn frame_from_value(value: &Value) -> Result<Frame> {
    let ts_ms = ts_from(value);
    let incident_id = str_from(value, "incident_id");

    let payload = if let Some(t) = value.get("telemetry") {
        Payload::Telemetry(HostTelemetry {
            ts_ms: ts_from(t),
            host: str_from(t, "host"),
            source: str_from(t, "source"),
            ecs_json: str_from(t, "ecs_json"),
        })
    } else if let Some(a) = value.get("alert") {
        Payload::Alert(Alert {
            ts_ms: ts_from(a),
            id: str_from(a, "id"),
            severity: str_from(a, "severity").parse().unwrap_or_default(),
            entities: entities_from(a, "entities"),
            tags: strings_from(a, "tags"),
            summary: str_from(a, "summary"),
            evidence_ref: str_from(a, "evidence_ref"),
        })
    } else if let Some(f) = value.get("finding") {
        Payload::Finding(Finding {
            ts_ms: ts_from(f),
            id: str_from(f, "id"),
            hypothesis: str_from(f, "hypothesis"),
            graph_nodes: entities_from(f, "graph_nodes"),
            candidate_ttps: strings_from(f, "candidate_ttps"),
            rationale_json: str_from(f, "rationale_json"),
        })
    } else if let Some(p) = value.get("plan") {
        Payload::Plan(ActionPlan {
            ts_ms: ts_from(p),
            incident_id: str_from(p, "incident_id"),
            playbooks: strings_from(p, "playbooks"),
            change_set_json: str_from(p, "change_set_json"),
            risk_tier: str_from(p, "risk_tier"),
        })
    } else if let Some(r) = value.get("run") {
        Payload::Run(PlaybookRun {
            ts_ms: ts_from(r),
            playbook_id: str_from(r, "playbook_id"),
            status: str_from(r, "status"),
            logs: str_from(r, "logs"),
        })
    } else {
        let keys: Vec<&str> = value
            .as_object()
            .map(|m| m.keys().map(String::as_str).collect())
            .unwrap_or_default();
        return Err(CodecError::UnknownVariant(keys.join(",")));
    };

    Ok(Frame {
        ts_ms,
        incident_id,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cs_core::Severity;

    #[test]
    fn unknown_top_level_fields_are_ignored() {
        let raw = br#"{
            "ts": {"unix_ms": 1700000000000},
            "incident_id": "inc-7",
            "trace_id": "extraneous",
            "alert": {
                "ts": {"unix_ms": 1700000000000},
                "id": "a1",
                "severity": "low",
                "entities": [{"type": "ip", "id": "10.0.0.1", "geo": "us"}],
                "tags": [],
                "summary": "test",
                "evidence_ref": "",
                "raw": {"nested": true}
            }
        }"#;
        let frame = decode(raw).unwrap();
        let alert = frame.as_alert().unwrap();
        assert_eq!(alert.id, "a1");
        assert_eq!(alert.severity, Severity::Low);
        assert_eq!(alert.entities[0].id, "10.0.0.1");
    }

    #[test]
    fn missing_variant_is_unknown_variant() {
        let raw = br#"{"ts":{"unix_ms":1},"incident_id":"x","mystery":{}}"#;
        let err = decode(raw).unwrap_err();
        assert!(matches!(err, CodecError::UnknownVariant(_)));
    }

    #[test]
    fn wire_shape_matches_contract() {
        let frame = Frame::run(
            42,
            "inc-9",
            PlaybookRun {
                ts_ms: 42,
                playbook_id: "pb".into(),
                status: "completed".into(),
                logs: String::new(),
            },
        );
        let value = frame_to_value(&frame);
        assert_eq!(value["ts"]["unix_ms"], 42);
        assert_eq!(value["incident_id"], "inc-9");
        assert!(value.get("run").is_some());
        assert!(value.get("telemetry").is_none());
    }
}
