//! Knowledge document and chunk types
//!
//! Metadata is a typed-at-edges map: stored as JSON values, read
//! through the accessors that the chunkers and retrieval filters use.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Well-known document types in the corpus. Stored as plain strings so
/// new corpora can be added without touching this crate.
pub mod doc_types {
    pub const ATTACK_TECHNIQUE: &str = "attack_technique";
    pub const ATTACK_TACTIC: &str = "attack_tactic";
    pub const ATTACK_MITIGATION: &str = "attack_mitigation";
    pub const ATTACK_GROUP: &str = "attack_group";
    pub const CVE: &str = "cve";
    pub const SIGMA_RULE: &str = "sigma_rule";
    pub const CISA_KEV: &str = "cisa_kev";
}

/// Standardized document structure for the knowledge corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub id: String,
    pub title: String,
    pub content: String,
    pub doc_type: String,
    pub source: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl KnowledgeDocument {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        doc_type: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            doc_type: doc_type.into(),
            source: source.into(),
            url: String::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// SHA-256 of the content; the manifest's change detector.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.content.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn meta_f64(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).and_then(Value::as_f64)
    }

    pub fn meta_strings(&self, key: &str) -> Vec<String> {
        self.metadata
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A retrievable sub-unit of a document. Deterministic and idempotent
/// per `(doc_id, chunk_type)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub doc_id: String,
    pub title: String,
    pub content: String,
    pub chunk_type: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl DocumentChunk {
    /// Metadata string accessor mirroring the document one.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// SHA-256 content hash, hex-encoded.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_stable() {
        let doc = KnowledgeDocument::new("d1", "Title", "same content", "cve", "nvd");
        let again = KnowledgeDocument::new("d1", "Other title", "same content", "cve", "nvd");
        assert_eq!(doc.content_hash(), again.content_hash());

        let changed = KnowledgeDocument::new("d1", "Title", "different", "cve", "nvd");
        assert_ne!(doc.content_hash(), changed.content_hash());
    }

    #[test]
    fn metadata_accessors() {
        let doc = KnowledgeDocument::new("t1", "SSH", "content", "attack_technique", "attack")
            .with_metadata("attack_id", serde_json::json!("T1021.004"))
            .with_metadata("cvss_score", serde_json::json!(9.8))
            .with_metadata("platforms", serde_json::json!(["Linux", "macOS"]));
        assert_eq!(doc.meta_str("attack_id"), Some("T1021.004"));
        assert_eq!(doc.meta_f64("cvss_score"), Some(9.8));
        assert_eq!(doc.meta_strings("platforms"), vec!["Linux", "macOS"]);
        assert!(doc.meta_str("missing").is_none());
    }
}
