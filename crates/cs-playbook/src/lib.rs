//! Countersign response playbooks
//!
//! A playbook is a static DAG of remediation steps with metadata (risk
//! tier, reversibility, duration). The runner walks the DAG frontier:
//! every step whose dependencies succeeded launches concurrently; a
//! failed step skips its dependents but never blocks unrelated
//! branches. Steps get per-step timeouts and capped-exponential-backoff
//! retries, and `${var}` parameters resolve against the run variables.
//!
//! The action executor exposes a fixed capability set (isolate_host,
//! block_ip, ...); integration with real infrastructure lives outside
//! the core.

pub mod actions;
pub mod catalog;
pub mod dsl;
pub mod runner;

pub use actions::ActionExecutor;
pub use catalog::PlaybookCatalog;
pub use dsl::{Playbook, PlaybookStep, RiskTier};
pub use runner::{PlaybookRunner, RunRecord, StepResult, StepStatus};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlaybookError {
    #[error("playbook not found: {0}")]
    NotFound(String),

    #[error("circular dependency in playbook {playbook}: unresolvable steps {remaining:?}")]
    CyclicDependency {
        playbook: String,
        remaining: Vec<String>,
    },

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("action {action} requires parameter {parameter}")]
    MissingParameter { action: String, parameter: String },

    #[error("playbook yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, PlaybookError>;
