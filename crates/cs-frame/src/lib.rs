//! Countersign incident frames
//!
//! The unit of transport on the bus. A [`Frame`] carries a timestamp,
//! the correlating incident id, and exactly one payload variant:
//! telemetry, alert, finding, action plan, or playbook run.
//!
//! Two wire formats sit behind [`WireFormat`]:
//! - `Json` - UTF-8 JSON, `{"ts":{"unix_ms":..},"incident_id":..,"alert":{..}}`
//! - `Binary` - compact variant-tagged, field-numbered TLV records
//!
//! Both round-trip any frame. Unknown fields are ignored on decode;
//! unknown variants fail with [`CodecError::UnknownVariant`].

pub mod binary;
pub mod json;
pub mod types;

pub use types::{ActionPlan, Alert, EntityRef, Finding, Frame, HostTelemetry, Payload, PlaybookRun};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unknown frame variant: {0}")]
    UnknownVariant(String),

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// Wire format selection, fixed at deployment time by the bus config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    #[default]
    Json,
    Binary,
}

impl WireFormat {
    pub fn encode(self, frame: &Frame) -> Result<Vec<u8>> {
        match self {
            WireFormat::Json => json::encode(frame),
            WireFormat::Binary => Ok(binary::encode(frame)),
        }
    }

    pub fn decode(self, data: &[u8]) -> Result<Frame> {
        match self {
            WireFormat::Json => json::decode(data),
            WireFormat::Binary => binary::decode(data),
        }
    }
}
