//! Document chunking strategies
//!
//! One strategy per document type:
//! - `attack_technique` -> overview + detection chunks
//! - `cve` -> summary + technical chunks (severity bucketed from CVSS)
//! - `sigma_rule` -> overview + detection-logic chunks
//! - anything else -> size-bounded word-boundary splitter
//!
//! Chunk ids are `{doc_id}_{suffix}`, so re-chunking the same document
//! always produces the same ids.

use serde_json::{json, Value};
use tracing::debug;

use crate::types::{doc_types, DocumentChunk, KnowledgeDocument};

/// Default character budget for the generic splitter.
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 1000;

/// CVSS score to severity bucket.
pub fn severity_from_cvss(score: f64) -> &'static str {
    if score >= 9.0 {
        "Critical"
    } else if score >= 7.0 {
        "High"
    } else if score >= 4.0 {
        "Medium"
    } else {
        "Low"
    }
}

fn merged_metadata(doc: &KnowledgeDocument, extra: &[(&str, Value)]) -> std::collections::HashMap<String, Value> {
    let mut metadata = doc.metadata.clone();
    metadata.insert("doc_type".into(), json!(doc.doc_type));
    metadata.insert("source".into(), json!(doc.source));
    metadata.insert("title".into(), json!(doc.title));
    if !doc.url.is_empty() {
        metadata.insert("url".into(), json!(doc.url));
    }
    for (key, value) in extra {
        metadata.insert((*key).into(), value.clone());
    }
    metadata
}

fn chunk_attack_technique(doc: &KnowledgeDocument) -> Vec<DocumentChunk> {
    let technique_id = doc.meta_str("attack_id").unwrap_or(&doc.id).to_string();
    let tactic = doc.meta_str("tactic").unwrap_or("Unknown").to_string();
    let platforms = doc.meta_strings("platforms");
    let data_sources = doc.meta_strings("data_sources");

    let mut chunks = Vec::with_capacity(2);

    let overview = format!(
        "ATT&CK Technique: {}\nID: {technique_id}\nTactic: {tactic}\nPlatforms: {}\n\n{}",
        doc.title,
        platforms.join(", "),
        doc.content,
    );
    chunks.push(DocumentChunk {
        id: format!("{}_overview", doc.id),
        doc_id: doc.id.clone(),
        title: format!("{} - Overview", doc.title),
        content: overview,
        chunk_type: "technique_overview".into(),
        metadata: merged_metadata(
            doc,
            &[
                ("chunk_type", json!("overview")),
                ("attack_id", json!(technique_id)),
                ("tactic", json!(tactic)),
            ],
        ),
    });

    if !data_sources.is_empty() {
        let bullets: String = data_sources
            .iter()
            .map(|ds| format!("- {ds}\n"))
            .collect();
        let detection = format!(
            "Detection for {} ({technique_id}):\n\nData Sources: {}\n\nThis technique can be detected by monitoring:\n{bullets}\nLook for indicators related to {} activities on {} platforms.",
            doc.title,
            data_sources.join(", "),
            tactic.to_lowercase(),
            platforms.join(", "),
        );
        chunks.push(DocumentChunk {
            id: format!("{}_detection", doc.id),
            doc_id: doc.id.clone(),
            title: format!("{} - Detection", doc.title),
            content: detection,
            chunk_type: "technique_detection".into(),
            metadata: merged_metadata(
                doc,
                &[
                    ("chunk_type", json!("detection")),
                    ("attack_id", json!(technique_id)),
                    ("tactic", json!(tactic)),
                    ("data_sources", json!(data_sources)),
                ],
            ),
        });
    }

    chunks
}

fn chunk_cve(doc: &KnowledgeDocument) -> Vec<DocumentChunk> {
    let cve_id = doc.meta_str("cve_id").unwrap_or(&doc.id).to_string();
    let cvss = doc.meta_f64("cvss_score").unwrap_or(0.0);
    let severity = severity_from_cvss(cvss);
    let products = doc.meta_strings("affected_products");
    let cvss_vector = doc.meta_str("cvss_vector").unwrap_or_default().to_string();
    let cwe = doc.meta_str("cwe").unwrap_or_default().to_string();

    let summary = format!(
        "CVE Summary: {cve_id}\nSeverity: {severity} (CVSS {cvss})\n\n{}\n\nAffected Products: {}",
        doc.content,
        products.join(", "),
    );
    let product_bullets: String = products.iter().map(|p| format!("- {p}\n")).collect();
    let technical = format!(
        "Technical Details for {cve_id}:\n\nCVSS Vector: {cvss_vector}\nCWE Classification: {cwe}\nCVSS Score: {cvss}\n\nThis vulnerability affects:\n{product_bullets}",
    );

    vec![
        DocumentChunk {
            id: format!("{}_summary", doc.id),
            doc_id: doc.id.clone(),
            title: format!("{cve_id} - Summary"),
            content: summary,
            chunk_type: "cve_summary".into(),
            metadata: merged_metadata(
                doc,
                &[
                    ("chunk_type", json!("summary")),
                    ("cve_id", json!(cve_id)),
                    ("severity", json!(severity)),
                ],
            ),
        },
        DocumentChunk {
            id: format!("{}_technical", doc.id),
            doc_id: doc.id.clone(),
            title: format!("{cve_id} - Technical Details"),
            content: technical,
            chunk_type: "cve_technical".into(),
            metadata: merged_metadata(
                doc,
                &[
                    ("chunk_type", json!("technical")),
                    ("cve_id", json!(cve_id)),
                    ("cwe", json!(cwe)),
                ],
            ),
        },
    ]
}

/// `attack.t1110` style tags -> `T1110` technique ids.
fn techniques_from_tags(tags: &[String]) -> Vec<String> {
    tags.iter()
        .filter(|t| t.to_ascii_lowercase().starts_with("attack.t"))
        .map(|t| t["attack.".len()..].to_ascii_uppercase())
        .collect()
}

fn chunk_sigma_rule(doc: &KnowledgeDocument) -> Vec<DocumentChunk> {
    let rule_id = doc.meta_str("rule_id").unwrap_or(&doc.id).to_string();
    let level = doc.meta_str("level").unwrap_or("medium").to_string();
    let tags = doc.meta_strings("tags");
    let attack_techniques = techniques_from_tags(&tags);
    let logsource = doc
        .metadata
        .get("logsource")
        .cloned()
        .unwrap_or_else(|| json!({}));

    let overview = format!(
        "Sigma Detection Rule: {}\nRule ID: {rule_id}\nSeverity Level: {level}\n\n{}\n\nATT&CK Techniques: {}",
        doc.title,
        doc.content,
        attack_techniques.join(", "),
    );
    let detection = format!(
        "Detection Logic for {}:\n\nLog Source:\n- Product: {}\n- Service: {}\n- Category: {}\n\nThis rule detects {level} severity events related to {}.",
        doc.title,
        logsource.get("product").and_then(Value::as_str).unwrap_or("Unknown"),
        logsource.get("service").and_then(Value::as_str).unwrap_or("Unknown"),
        logsource.get("category").and_then(Value::as_str).unwrap_or("Unknown"),
        tags.join(", "),
    );

    vec![
        DocumentChunk {
            id: format!("{}_overview", doc.id),
            doc_id: doc.id.clone(),
            title: format!("{} - Rule Overview", doc.title),
            content: overview,
            chunk_type: "sigma_overview".into(),
            metadata: merged_metadata(
                doc,
                &[
                    ("chunk_type", json!("overview")),
                    ("level", json!(level)),
                    ("attack_techniques", json!(attack_techniques)),
                ],
            ),
        },
        DocumentChunk {
            id: format!("{}_detection", doc.id),
            doc_id: doc.id.clone(),
            title: format!("{} - Detection Logic", doc.title),
            content: detection,
            chunk_type: "sigma_detection".into(),
            metadata: merged_metadata(
                doc,
                &[
                    ("chunk_type", json!("detection_logic")),
                    ("level", json!(level)),
                    ("logsource", logsource.clone()),
                ],
            ),
        },
    ]
}

fn chunk_generic(doc: &KnowledgeDocument, max_chars: usize) -> Vec<DocumentChunk> {
    if doc.content.len() <= max_chars {
        return vec![DocumentChunk {
            id: format!("{}_full", doc.id),
            doc_id: doc.id.clone(),
            title: doc.title.clone(),
            content: doc.content.clone(),
            chunk_type: "full_document".into(),
            metadata: merged_metadata(doc, &[("chunk_type", json!("full_document"))]),
        }];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut chunk_num = 0usize;

    for word in doc.content.split_whitespace() {
        if !current.is_empty() && current.len() + word.len() + 1 > max_chars {
            chunks.push(make_text_chunk(doc, chunk_num, std::mem::take(&mut current)));
            chunk_num += 1;
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        chunks.push(make_text_chunk(doc, chunk_num, current));
    }

    chunks
}

fn make_text_chunk(doc: &KnowledgeDocument, chunk_num: usize, content: String) -> DocumentChunk {
    DocumentChunk {
        id: format!("{}_chunk_{chunk_num}", doc.id),
        doc_id: doc.id.clone(),
        title: format!("{} - Part {}", doc.title, chunk_num + 1),
        content,
        chunk_type: "text_chunk".into(),
        metadata: merged_metadata(
            doc,
            &[
                ("chunk_type", json!("text_chunk")),
                ("chunk_number", json!(chunk_num)),
            ],
        ),
    }
}

/// Strategy selector: picks the chunker by `doc_type`.
#[derive(Debug, Clone)]
pub struct SmartChunker {
    pub max_chunk_chars: usize,
}

impl Default for SmartChunker {
    fn default() -> Self {
        Self {
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
        }
    }
}

impl SmartChunker {
    pub fn chunk_document(&self, doc: &KnowledgeDocument) -> Vec<DocumentChunk> {
        let chunks = match doc.doc_type.as_str() {
            doc_types::ATTACK_TECHNIQUE => chunk_attack_technique(doc),
            doc_types::CVE => chunk_cve(doc),
            doc_types::SIGMA_RULE => chunk_sigma_rule(doc),
            _ => chunk_generic(doc, self.max_chunk_chars),
        };
        debug!(
            "chunked {} '{}' into {} chunks",
            doc.doc_type,
            doc.title,
            chunks.len()
        );
        chunks
    }

    pub fn chunk_documents(&self, docs: &[KnowledgeDocument]) -> Vec<DocumentChunk> {
        docs.iter().flat_map(|d| self.chunk_document(d)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn technique_doc() -> KnowledgeDocument {
        KnowledgeDocument::new(
            "attack_T1110",
            "Brute Force",
            "Adversaries may use brute force techniques to gain access to accounts.",
            "attack_technique",
            "attack",
        )
        .with_metadata("attack_id", json!("T1110"))
        .with_metadata("tactic", json!("Credential Access"))
        .with_metadata("platforms", json!(["Linux", "Windows"]))
        .with_metadata("data_sources", json!(["Authentication Logs"]))
    }

    #[test]
    fn attack_technique_gets_overview_and_detection() {
        let chunks = SmartChunker::default().chunk_document(&technique_doc());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].id, "attack_T1110_overview");
        assert_eq!(chunks[0].chunk_type, "technique_overview");
        assert!(chunks[0].content.contains("ID: T1110"));
        assert_eq!(chunks[1].id, "attack_T1110_detection");
        assert!(chunks[1].content.contains("Authentication Logs"));
        assert_eq!(chunks[1].meta_str("tactic"), Some("Credential Access"));
    }

    #[test]
    fn technique_without_data_sources_skips_detection_chunk() {
        let mut doc = technique_doc();
        doc.metadata.remove("data_sources");
        let chunks = SmartChunker::default().chunk_document(&doc);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_type, "technique_overview");
    }

    #[test]
    fn cvss_buckets() {
        assert_eq!(severity_from_cvss(9.8), "Critical");
        assert_eq!(severity_from_cvss(9.0), "Critical");
        assert_eq!(severity_from_cvss(7.5), "High");
        assert_eq!(severity_from_cvss(5.0), "Medium");
        assert_eq!(severity_from_cvss(3.9), "Low");
    }

    #[test]
    fn cve_chunks_carry_bucketed_severity() {
        let doc = KnowledgeDocument::new(
            "cve_2024_0001",
            "CVE-2024-0001",
            "Remote code execution in the widget service.",
            "cve",
            "nvd",
        )
        .with_metadata("cve_id", json!("CVE-2024-0001"))
        .with_metadata("cvss_score", json!(9.8))
        .with_metadata("affected_products", json!(["widgetd 1.x"]));

        let chunks = SmartChunker::default().chunk_document(&doc);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chunk_type, "cve_summary");
        assert_eq!(chunks[0].meta_str("severity"), Some("Critical"));
        assert!(chunks[1].content.contains("CVSS Score: 9.8"));
    }

    #[test]
    fn sigma_chunks_extract_attack_techniques_from_tags() {
        let doc = KnowledgeDocument::new(
            "sigma_ssh_brute",
            "SSH Brute Force Attempts",
            "Detects repeated failed SSH authentication.",
            "sigma_rule",
            "sigma",
        )
        .with_metadata("rule_id", json!("b7a1c0de"))
        .with_metadata("level", json!("high"))
        .with_metadata("tags", json!(["attack.t1110", "attack.credential_access"]))
        .with_metadata("logsource", json!({"product": "linux", "service": "sshd"}));

        let chunks = SmartChunker::default().chunk_document(&doc);
        assert_eq!(chunks.len(), 2);
        let techniques = chunks[0]
            .metadata
            .get("attack_techniques")
            .and_then(|v| v.as_array().cloned())
            .unwrap();
        assert_eq!(techniques, vec![json!("T1110")]);
        assert!(chunks[1].content.contains("Service: sshd"));
    }

    #[test]
    fn generic_splitter_respects_word_boundaries() {
        let word = "abcdefghij"; // 10 chars
        let content = std::iter::repeat(word)
            .take(250)
            .collect::<Vec<_>>()
            .join(" ");
        let doc = KnowledgeDocument::new("note_1", "Long Note", content, "osint_note", "osint");
        let chunks = SmartChunker::default().chunk_document(&doc);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.content.len() <= DEFAULT_MAX_CHUNK_CHARS);
            assert!(!chunk.content.starts_with(' '));
            assert!(!chunk.content.ends_with(' '));
            // No word is ever split.
            for piece in chunk.content.split(' ') {
                assert_eq!(piece, word);
            }
        }
    }

    #[test]
    fn short_generic_document_is_one_full_chunk() {
        let doc = KnowledgeDocument::new("note_2", "Short", "tiny body", "osint_note", "osint");
        let chunks = SmartChunker::default().chunk_document(&doc);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, "note_2_full");
        assert_eq!(chunks[0].chunk_type, "full_document");
    }

    #[test]
    fn chunking_is_deterministic() {
        let doc = technique_doc();
        let chunker = SmartChunker::default();
        assert_eq!(chunker.chunk_document(&doc), chunker.chunk_document(&doc));
    }
}
