//! Playbook DSL
//!
//! Playbooks are YAML documents. Minimal example:
//!
//! ```yaml
//! id: block_source_ip
//! name: Block Source IP
//! description: Block an attacking IP at the firewall
//! risk_tier: low
//! reversible: true
//! estimated_duration_minutes: 5
//! tags: [network, containment]
//! steps:
//!   - id: block
//!     action: block_ip
//!     parameters:
//!       ip_address: "${source_ip}"
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// Coarse risk bucket attached to playbooks and aggregate plans.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    #[default]
    Medium,
    High,
}

impl RiskTier {
    pub const fn ordinal(self) -> u8 {
        match self {
            RiskTier::Low => 0,
            RiskTier::Medium => 1,
            RiskTier::High => 2,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
        }
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_timeout() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_duration() -> u32 {
    30
}

/// One step in a playbook DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybookStep {
    /// Step id referenced by `depends_on`; defaults to the action name
    /// when omitted in YAML.
    #[serde(default)]
    pub id: String,
    pub action: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Complete playbook definition. Read-only at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playbook {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub risk_tier: RiskTier,
    #[serde(default)]
    pub tags: Vec<String>,
    pub steps: Vec<PlaybookStep>,
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default = "default_duration")]
    pub estimated_duration_minutes: u32,
    #[serde(default = "default_true")]
    pub reversible: bool,
}

impl Playbook {
    /// Parse from YAML, defaulting empty step ids to the action name.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut playbook: Playbook = serde_yaml::from_str(yaml)?;
        for step in &mut playbook.steps {
            if step.id.is_empty() {
                step.id = step.action.clone();
            }
        }
        Ok(playbook)
    }

    pub fn step(&self, id: &str) -> Option<&PlaybookStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Entity types the steps need, inferred from parameter names.
    pub fn required_entity_types(&self) -> std::collections::HashSet<String> {
        let mut required = std::collections::HashSet::new();
        for step in &self.steps {
            for key in step.parameters.keys() {
                match key.as_str() {
                    "host" | "hostname" => {
                        required.insert("host".to_string());
                    }
                    "ip" | "ip_address" => {
                        required.insert("ip".to_string());
                    }
                    "user" | "username" => {
                        required.insert("user".to_string());
                    }
                    "process" | "process_name" | "pid" => {
                        required.insert("proc".to_string());
                    }
                    _ => {}
                }
            }
        }
        required
    }
}
