//! Incident severity scale
//!
//! Ordered `info < low < medium < high < critical`. The ordinal is used
//! by triage aggregation (max severity wins) and by the analyst's
//! severity reassessment (+1 bumps capped at critical).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Alert / incident severity, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Numeric ordinal: info=0 .. critical=4.
    pub const fn ordinal(self) -> u8 {
        match self {
            Severity::Info => 0,
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
            Severity::Critical => 4,
        }
    }

    /// Inverse of [`ordinal`](Self::ordinal), clamping out-of-range
    /// values to the nearest end of the scale.
    pub const fn from_ordinal(ord: u8) -> Severity {
        match ord {
            0 => Severity::Info,
            1 => Severity::Low,
            2 => Severity::Medium,
            3 => Severity::High,
            _ => Severity::Critical,
        }
    }

    /// Bump the severity by `steps`, saturating at critical.
    pub const fn bump(self, steps: u8) -> Severity {
        let ord = self.ordinal().saturating_add(steps);
        if ord > 4 {
            Severity::Critical
        } else {
            Severity::from_ordinal(ord)
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// True for `high` and `critical`.
    pub const fn is_actionable(self) -> bool {
        matches!(self, Severity::High | Severity::Critical)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}
