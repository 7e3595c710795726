//! Countersign policy gate
//!
//! One authorization decision sits between a planned response and its
//! execution: `evaluate` submits (risk assessment, incident, playbook
//! plan) to an external policy engine and returns allow /
//! approval-required plus restrictions and recommendations.
//!
//! When the engine is unreachable the documented fallback ruleset is
//! authoritative:
//! - allow only `risk == low && confidence >= 0.7 && score <= 0.3`
//! - approval for any high/critical risk tier, any irreversible action,
//!   any run over 60 minutes, or `confidence < 0.5`
//!
//! The fallback is a pure function: identical input, identical output.
//! Every verdict carries `policy_source` so the decision log records
//! which path produced it.

pub mod gate;

pub use gate::{
    AuthorizationInput, IncidentContext, PlanContext, PlanPlaybook, PolicyGate, PolicyVerdict,
    RiskContext,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy engine unavailable: {0}")]
    Unavailable(String),

    #[error("policy engine returned malformed response: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, PolicyError>;
