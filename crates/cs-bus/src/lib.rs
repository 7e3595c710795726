//! Countersign durable message bus
//!
//! NATS JetStream adapter carrying [`cs_frame::Frame`]s on named topics
//! with at-least-once delivery, durable per-consumer cursors, bounded
//! in-flight (`max_ack_pending`), nak backoff, and a dead-letter stream
//! for poison messages.
//!
//! ## Subjects
//! ```text
//! cs.telemetry   cs.alerts   cs.findings   cs.plans   cs.runs
//! cs.dlq         (stream CS_DLQ)
//! ```
//!
//! Consumers are contractually required to settle every [`Delivery`]:
//! `ack()` on success, `fail(err)` on processing failure. `fail` naks
//! with exponential backoff until the `max_deliver`-th attempt, which
//! re-publishes the frame body to the DLQ (with `CS-*` headers) and
//! removes it from the main stream. A dropped delivery is redelivered
//! by the server after the ack wait expires, so nothing is lost.

pub mod config;
pub mod jetstream;
pub mod metrics;

pub use config::{BusConfig, Retention};
pub use jetstream::{Bus, Delivery, Subscription};
pub use metrics::{BusMetrics, MetricsSnapshot};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("not connected to the message bus")]
    NotConnected,

    #[error("bus backend failure: {0}")]
    Backend(String),

    #[error("frame codec failure: {0}")]
    Codec(#[from] cs_frame::CodecError),
}

pub type Result<T> = std::result::Result<T, BusError>;

/// Well-known topic names. A topic `X` maps to subject `cs.X`.
pub mod topics {
    pub const TELEMETRY: &str = "telemetry";
    pub const ALERTS: &str = "alerts";
    pub const FINDINGS: &str = "findings";
    pub const PLANS: &str = "plans";
    pub const RUNS: &str = "runs";
}
