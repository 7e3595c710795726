//! Countersign incident orchestrator
//!
//! Drives one incident through the analyst pipeline as a deterministic
//! state machine:
//!
//! ```text
//! ingest -> scout -> (analyst | escalate | complete)
//!                 -> (responder | escalate | complete)
//!                 -> (escalate | complete)
//! ```
//!
//! Every node subtracts its token cost from the incident budget and
//! appends one [`Decision`] to the append-only audit log; the full
//! [`IncidentState`] is checkpointed after every node. Frames that
//! caused a state change are acked on the bus only after the
//! checkpoint holding that change is durable, so a crash yields a
//! redelivery of an already-absorbed frame, never a lost one.

pub mod checkpoint;
pub mod lease;
pub mod orchestrator;
pub mod state;

pub use checkpoint::CheckpointStore;
pub use lease::{IncidentLease, LeaseMap};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use state::{Decision, IncidentState, IncidentStatus, Step};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("incident {0} is already being processed")]
    LeaseHeld(String),

    #[error("checkpoint store failure: {0}")]
    Checkpoint(String),

    #[error("agent failure: {0}")]
    Agent(#[from] cs_agents::AgentError),

    #[error("bus failure: {0}")]
    Bus(#[from] cs_bus::BusError),

    #[error("state serialization failure: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
