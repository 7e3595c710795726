#![allow(clippy::items_after_statements)]
#![allow(clippy::format_push_string)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::unused_async)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::type_complexity)]
#![allow(clippy::similar_names)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
//! Countersign analyst ensemble
//!
//! Three specialized analysts reason over one incident in sequence:
//! - **Scout** ([`scout`]) - deduplicates alerts in a sliding window and
//!   tags them with ATT&CK techniques (direct tags, retrieval
//!   inference, heuristics)
//! - **Analyst** ([`analyst`]) - builds the incident hypothesis,
//!   orders the attack chain, reassesses severity, and drafts
//!   detection rules for coverage gaps ([`sigma`])
//! - **Responder** ([`responder`]) - selects playbooks, scores the
//!   response risk, and consults the policy gate for autonomy
//!
//! All scoring is deterministic; retrieval is an optional side channel
//! that enriches, never gates, the pipeline.

pub mod analyst;
pub mod responder;
pub mod scout;
pub mod sigma;

pub use analyst::{AnalystAgent, AnalystFindings, AnalystInput};
pub use responder::{ResponderAgent, ResponderInput, ResponsePlan};
pub use scout::{ScoutAgent, ScoutFindings, ScoutInput};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("knowledge layer failure: {0}")]
    Knowledge(#[from] cs_knowledge::KnowledgeError),

    #[error("playbook failure: {0}")]
    Playbook(#[from] cs_playbook::PlaybookError),
}

pub type Result<T> = std::result::Result<T, AgentError>;
