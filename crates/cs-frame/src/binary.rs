//! Compact binary wire codec
//!
//! Layout:
//!
//! ```text
//! [0xC5] [version=0x01] [variant tag u8] [field records...]
//! record := field_id u8 | len u32 LE | payload bytes
//! ```
//!
//! Integers are 8-byte little-endian, strings length-prefixed UTF-8,
//! repeated fields repeat their record. Fields are written in ascending
//! field-id order, so encoding is deterministic. Decoders skip records
//! with unrecognized field ids; an unrecognized variant tag fails with
//! [`CodecError::UnknownVariant`].

use crate::types::{ActionPlan, Alert, EntityRef, Finding, Frame, HostTelemetry, Payload, PlaybookRun};
use crate::{CodecError, Result};

const MAGIC: u8 = 0xC5;
const VERSION: u8 = 0x01;

const TAG_TELEMETRY: u8 = 1;
const TAG_ALERT: u8 = 2;
const TAG_FINDING: u8 = 3;
const TAG_PLAN: u8 = 4;
const TAG_RUN: u8 = 5;

// Frame-level fields
const F_TS: u8 = 1;
const F_INCIDENT_ID: u8 = 2;

// Payload fields start at 16 to keep the two levels visually distinct.
const P_TS: u8 = 16;
const P_A: u8 = 17;
const P_B: u8 = 18;
const P_C: u8 = 19;
const P_D: u8 = 20;
const P_E: u8 = 21;
const P_F: u8 = 22;

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Self { buf: Vec::with_capacity(256) }
    }

    fn record(&mut self, field: u8, payload: &[u8]) {
        self.buf.push(field);
        self.buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(payload);
    }

    fn i64_field(&mut self, field: u8, value: i64) {
        self.record(field, &value.to_le_bytes());
    }

    fn str_field(&mut self, field: u8, value: &str) {
        self.record(field, value.as_bytes());
    }

    fn entity_field(&mut self, field: u8, entity: &EntityRef) {
        let mut inner = Vec::with_capacity(entity.entity_type.len() + entity.id.len() + 8);
        write_lp_str(&mut inner, &entity.entity_type);
        write_lp_str(&mut inner, &entity.id);
        self.record(field, &inner);
    }
}

fn write_lp_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

pub fn encode(frame: &Frame) -> Vec<u8> {
    let mut w = Writer::new();
    w.buf.push(MAGIC);
    w.buf.push(VERSION);
    w.buf.push(match &frame.payload {
        Payload::Telemetry(_) => TAG_TELEMETRY,
        Payload::Alert(_) => TAG_ALERT,
        Payload::Finding(_) => TAG_FINDING,
        Payload::Plan(_) => TAG_PLAN,
        Payload::Run(_) => TAG_RUN,
    });

    w.i64_field(F_TS, frame.ts_ms);
    w.str_field(F_INCIDENT_ID, &frame.incident_id);

    match &frame.payload {
        Payload::Telemetry(t) => {
            w.i64_field(P_TS, t.ts_ms);
            w.str_field(P_A, &t.host);
            w.str_field(P_B, &t.source);
            w.str_field(P_C, &t.ecs_json);
        }
        Payload::Alert(a) => {
            w.i64_field(P_TS, a.ts_ms);
            w.str_field(P_A, &a.id);
            w.str_field(P_B, a.severity.as_str());
            for entity in &a.entities {
                w.entity_field(P_C, entity);
            }
            for tag in &a.tags {
                w.str_field(P_D, tag);
            }
            w.str_field(P_E, &a.summary);
            w.str_field(P_F, &a.evidence_ref);
        }
        Payload::Finding(f) => {
            w.i64_field(P_TS, f.ts_ms);
            w.str_field(P_A, &f.id);
            w.str_field(P_B, &f.hypothesis);
            for node in &f.graph_nodes {
                w.entity_field(P_C, node);
            }
            for ttp in &f.candidate_ttps {
                w.str_field(P_D, ttp);
            }
            w.str_field(P_E, &f.rationale_json);
        }
        Payload::Plan(p) => {
            w.i64_field(P_TS, p.ts_ms);
            w.str_field(P_A, &p.incident_id);
            for playbook in &p.playbooks {
                w.str_field(P_B, playbook);
            }
            w.str_field(P_C, &p.change_set_json);
            w.str_field(P_D, &p.risk_tier);
        }
        Payload::Run(r) => {
            w.i64_field(P_TS, r.ts_ms);
            w.str_field(P_A, &r.playbook_id);
            w.str_field(P_B, &r.status);
            w.str_field(P_C, &r.logs);
        }
    }

    w.buf
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn next_record(&mut self) -> Result<Option<(u8, &'a [u8])>> {
        if self.pos >= self.data.len() {
            return Ok(None);
        }
        if self.pos + 5 > self.data.len() {
            return Err(CodecError::Malformed("truncated record header".into()));
        }
        let field = self.data[self.pos];
        let len = u32::from_le_bytes(
            self.data[self.pos + 1..self.pos + 5]
                .try_into()
                .expect("slice is 4 bytes"),
        ) as usize;
        let start = self.pos + 5;
        let end = start + len;
        if end > self.data.len() {
            return Err(CodecError::Malformed("truncated record payload".into()));
        }
        self.pos = end;
        Ok(Some((field, &self.data[start..end])))
    }
}

fn read_i64(payload: &[u8]) -> Result<i64> {
    let bytes: [u8; 8] = payload
        .try_into()
        .map_err(|_| CodecError::Malformed("expected 8-byte integer".into()))?;
    Ok(i64::from_le_bytes(bytes))
}

fn read_str(payload: &[u8]) -> Result<String> {
    String::from_utf8(payload.to_vec())
        .map_err(|_| CodecError::Malformed("invalid utf-8 string".into()))
}

fn read_entity(payload: &[u8]) -> Result<EntityRef> {
    let (entity_type, rest) = read_lp_str(payload)?;
    let (id, _) = read_lp_str(rest)?;
    Ok(EntityRef { entity_type, id })
}

fn read_lp_str(data: &[u8]) -> Result<(String, &[u8])> {
    if data.len() < 4 {
        return Err(CodecError::Malformed("truncated length prefix".into()));
    }
    let len = u32::from_le_bytes(data[..4].try_into().expect("slice is 4 bytes")) as usize;
    if data.len() < 4 + len {
        return Err(CodecError::Malformed("truncated string".into()));
    }
    let s = String::from_utf8(data[4..4 + len].to_vec())
        .map_err(|_| CodecError::Malformed("invalid utf-8 string".into()))?;
    Ok((s, &data[4 + len..]))
}

pub fn decode(data: &[u8]) -> Result<Frame> {
    if data.len() < 3 {
        return Err(CodecError::Malformed("frame too short".into()));
    }
    if data[0] != MAGIC {
        return Err(CodecError::Malformed("bad magic byte".into()));
    }
    if data[1] != VERSION {
        return Err(CodecError::Malformed(format!("unsupported version {}", data[1])));
    }
    let tag = data[2];

    let mut reader = Reader { data, pos: 3 };
    let mut ts_ms = 0i64;
    let mut incident_id = String::new();
    let mut p_ts = 0i64;
    let mut strings: [Option<String>; 6] = Default::default();
    let mut entities: Vec<EntityRef> = Vec::new();
    let mut repeated: Vec<String> = Vec::new();

    // For variants with two repeated fields (alert, finding) the second
    // repeated slot is `repeated`; entities always land in `entities`.
    while let Some((field, payload)) = reader.next_record()? {
        match field {
            F_TS => ts_ms = read_i64(payload)?,
            F_INCIDENT_ID => incident_id = read_str(payload)?,
            P_TS => p_ts = read_i64(payload)?,
            P_C if matches!(tag, TAG_ALERT | TAG_FINDING) => entities.push(read_entity(payload)?),
            P_D if matches!(tag, TAG_ALERT | TAG_FINDING) => repeated.push(read_str(payload)?),
            P_B if tag == TAG_PLAN => repeated.push(read_str(payload)?),
            P_A | P_B | P_C | P_D | P_E | P_F => {
                let idx = (field - P_A) as usize;
                strings[idx] = Some(read_str(payload)?);
            }
            _ => {} // unknown field, skip for forward compatibility
        }
    }

    let take = |slot: &mut Option<String>| slot.take().unwrap_or_default();
    let mut s = strings;

    let payload = match tag {
        TAG_TELEMETRY => Payload::Telemetry(HostTelemetry {
            ts_ms: p_ts,
            host: take(&mut s[0]),
            source: take(&mut s[1]),
            ecs_json: take(&mut s[2]),
        }),
        TAG_ALERT => Payload::Alert(Alert {
            ts_ms: p_ts,
            id: take(&mut s[0]),
            severity: take(&mut s[1]).parse().unwrap_or_default(),
            entities,
            tags: repeated,
            summary: take(&mut s[4]),
            evidence_ref: take(&mut s[5]),
        }),
        TAG_FINDING => Payload::Finding(Finding {
            ts_ms: p_ts,
            id: take(&mut s[0]),
            hypothesis: take(&mut s[1]),
            graph_nodes: entities,
            candidate_ttps: repeated,
            rationale_json: take(&mut s[4]),
        }),
        TAG_PLAN => Payload::Plan(ActionPlan {
            ts_ms: p_ts,
            incident_id: take(&mut s[0]),
            playbooks: repeated,
            change_set_json: take(&mut s[2]),
            risk_tier: take(&mut s[3]),
        }),
        TAG_RUN => Payload::Run(PlaybookRun {
            ts_ms: p_ts,
            playbook_id: take(&mut s[0]),
            status: take(&mut s[1]),
            logs: take(&mut s[2]),
        }),
        other => return Err(CodecError::UnknownVariant(format!("tag {other}"))),
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
    fn unknown_variant_tag_fails() {
        let mut bytes = vec![MAGIC, VERSION, 0x7F];
        bytes.push(F_TS);
        bytes.extend_from_slice(&8u32.to_le_bytes());
        bytes.extend_from_slice(&42i64.to_le_bytes());
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::UnknownVariant(_)));
    }

    #[test]
    fn unknown_field_ids_are_skipped() {
        let frame = Frame::run(
            7,
            "inc",
            PlaybookRun {
                ts_ms: 7,
                playbook_id: "pb".into(),
                status: "ok".into(),
                logs: String::new(),
            },
        );
        let mut bytes = encode(&frame);
        // Append a record with an unassigned field id.
        bytes.push(0xEE);
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(b"xyz");
        let back = decode(&bytes).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn truncated_frame_is_malformed() {
        let frame = Frame::telemetry(
            1,
            "inc",
            HostTelemetry {
                ts_ms: 1,
                host: "h".into(),
                source: "s".into(),
                ecs_json: "{}".into(),
            },
        );
        let bytes = encode(&frame);
        let err = decode(&bytes[..bytes.len() - 2]).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn alert_repeated_fields_preserve_order() {
        let frame = Frame::alert(
            5,
            "inc",
            Alert {
                ts_ms: 5,
                id: "a".into(),
                severity: Severity::Critical,
                entities: vec![
                    EntityRef::new("ip", "1.1.1.1"),
                    EntityRef::new("host", "db-02"),
                    EntityRef::new("user", "svc"),
                ],
                tags: vec!["one".into(), "two".into()],
                summary: "s".into(),
                evidence_ref: "e".into(),
            },
        );
        let back = decode(&encode(&frame)).unwrap();
        let alert = back.as_alert().unwrap();
        assert_eq!(alert.entities[1].id, "db-02");
        assert_eq!(alert.tags, vec!["one", "two"]);
        assert_eq!(alert.severity, Severity::Critical);
    }
}
