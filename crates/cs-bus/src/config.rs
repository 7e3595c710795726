//! Bus configuration
//!
//! Defaults match the deployed stream layout: stream `CS` over the five
//! `cs.*` subjects, 7-day retention, 256 in-flight per durable, 5
//! delivery attempts before dead-lettering, DLQ stream `CS_DLQ` kept
//! for 30 days.

use std::time::Duration;

use cs_frame::WireFormat;
use serde::{Deserialize, Serialize};

/// JetStream retention policy for the main stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    #[default]
    Limits,
    Interest,
    Workqueue,
}

/// Consumer replay policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Replay {
    #[default]
    Instant,
    Original,
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub url: String,
    pub wire_format: WireFormat,

    // Stream settings
    pub stream_name: String,
    pub subjects: Vec<String>,
    pub retention: Retention,
    pub max_age: Duration,
    pub max_bytes: i64,
    pub replicas: usize,

    // Consumer settings
    pub durable_prefix: String,
    pub ack_wait: Duration,
    pub max_ack_pending: i64,
    pub max_deliver: i64,
    pub replay: Replay,

    // Retry / backoff
    pub retry_base: Duration,
    pub retry_factor: f64,
    pub retry_cap: Duration,

    // DLQ
    pub dlq_stream: String,
    pub dlq_subject: String,
    pub dlq_max_age: Duration,

    // Fetch tuning
    pub fetch_batch: usize,
    pub fetch_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            wire_format: WireFormat::Json,
            stream_name: "CS".to_string(),
            subjects: vec![
                "cs.telemetry".to_string(),
                "cs.alerts".to_string(),
                "cs.findings".to_string(),
                "cs.plans".to_string(),
                "cs.runs".to_string(),
            ],
            retention: Retention::Limits,
            max_age: Duration::from_secs(86_400 * 7),
            max_bytes: -1,
            replicas: 1,
            durable_prefix: "countersign".to_string(),
            ack_wait: Duration::from_secs(30),
            max_ack_pending: 256,
            max_deliver: 5,
            replay: Replay::Instant,
            retry_base: Duration::from_secs(1),
            retry_factor: 2.0,
            retry_cap: Duration::from_secs(30),
            dlq_stream: "CS_DLQ".to_string(),
            dlq_subject: "cs.dlq".to_string(),
            dlq_max_age: Duration::from_secs(86_400 * 30),
            fetch_batch: 10,
            fetch_timeout: Duration::from_secs(5),
        }
    }
}

impl BusConfig {
    /// Map a user-level topic to its JetStream subject.
    pub fn subject_for_topic(&self, topic: &str) -> String {
        format!("cs.{topic}")
    }

    /// Durable consumer name for a topic when none is given explicitly.
    pub fn durable_for_topic(&self, topic: &str) -> String {
        format!("{}_{topic}", self.durable_prefix)
    }

    /// Nak delay after the `attempt`-th failed delivery (1-based).
    pub fn backoff_delay(&self, attempt: i64) -> Duration {
        cs_core::backoff_delay(
            attempt.max(1) as u32,
            self.retry_base,
            self.retry_factor,
            self.retry_cap,
        )
    }
}
