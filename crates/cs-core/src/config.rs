//! Environment-driven backend selection
//!
//! Providers (embedder, reranker, vector store) are picked from
//! environment variables. An unrecognized value is a hard error rather
//! than a silent fallback.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown value '{value}' for {var}; valid values: {valid}")]
    UnknownValue {
        var: String,
        value: String,
        valid: String,
    },

    #[error("missing required configuration: {0}")]
    Missing(String),
}

/// Read `var` and validate it against `valid` choices.
///
/// Returns `Ok(None)` when the variable is unset or empty, so callers
/// can continue down their resolution order.
pub fn env_choice(var: &str, valid: &[&str]) -> Result<Option<String>, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => {
            let value = raw.trim().to_ascii_lowercase();
            if value.is_empty() {
                return Ok(None);
            }
            if valid.contains(&value.as_str()) {
                Ok(Some(value))
            } else {
                Err(ConfigError::UnknownValue {
                    var: var.to_string(),
                    value,
                    valid: valid.join(", "),
                })
            }
        }
        Err(_) => Ok(None),
    }
}
