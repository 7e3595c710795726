//! Index manifest
//!
//! Authoritative record of what the vector store contains: for every
//! indexed document, its content hash, source revision, chunk ids, and
//! index time. The builder diffs incoming document sets against the
//! manifest to decide what to re-embed. Saved atomically (write temp,
//! rename) as `manifest.json` in the index directory.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::types::KnowledgeDocument;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub content_hash: String,
    #[serde(default)]
    pub source_revision: String,
    pub chunk_ids: Vec<String>,
    pub indexed_at: f64,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// Diff of an incoming document set against the manifest.
#[derive(Debug, Default)]
pub struct DocDiff {
    pub new: Vec<KnowledgeDocument>,
    pub changed: Vec<KnowledgeDocument>,
    pub unchanged: Vec<String>,
    pub removed: Vec<String>,
}

impl DocDiff {
    pub fn is_noop(&self) -> bool {
        self.new.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug)]
pub struct IndexManifest {
    path: PathBuf,
    entries: HashMap<String, ManifestEntry>,
}

impl IndexManifest {
    /// Open (or create) the manifest under `index_dir`.
    pub fn open(index_dir: &Path) -> Result<Self> {
        let path = index_dir.join("manifest.json");
        let entries = if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(raw) => match serde_json::from_str(&raw) {
                    Ok(entries) => entries,
                    Err(e) => {
                        warn!("failed to parse manifest, starting fresh: {e}");
                        HashMap::new()
                    }
                },
                Err(e) => {
                    warn!("failed to read manifest, starting fresh: {e}");
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };
        if !entries.is_empty() {
            info!("loaded index manifest with {} entries", entries.len());
        }
        Ok(Self { path, entries })
    }

    pub fn get(&self, doc_id: &str) -> Option<&ManifestEntry> {
        self.entries.get(doc_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn all_doc_ids(&self) -> HashSet<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn set(
        &mut self,
        doc_id: &str,
        content_hash: String,
        source_revision: String,
        chunk_ids: Vec<String>,
        metadata: HashMap<String, Value>,
    ) {
        let indexed_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        self.entries.insert(
            doc_id.to_string(),
            ManifestEntry {
                content_hash,
                source_revision,
                chunk_ids,
                indexed_at,
                metadata,
            },
        );
    }

    pub fn remove(&mut self, doc_id: &str) {
        self.entries.remove(doc_id);
    }

    /// Compare `documents` against the manifest by content hash.
    pub fn compute_diff(&self, documents: &[KnowledgeDocument]) -> DocDiff {
        let incoming_ids: HashSet<&str> = documents.iter().map(|d| d.id.as_str()).collect();
        let mut diff = DocDiff::default();

        for doc in documents {
            match self.entries.get(&doc.id) {
                None => diff.new.push(doc.clone()),
                Some(entry) if entry.content_hash != doc.content_hash() => {
                    diff.changed.push(doc.clone());
                }
                Some(_) => diff.unchanged.push(doc.id.clone()),
            }
        }

        diff.removed = self
            .entries
            .keys()
            .filter(|id| !incoming_ids.contains(id.as_str()))
            .cloned()
            .collect();
        diff.removed.sort();

        diff
    }

    /// Atomic save: write to a temp file, then rename over the old one.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&self.entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!("saved manifest with {} entries", self.entries.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, content: &str) -> KnowledgeDocument {
        KnowledgeDocument::new(id, id, content, "cve", "test")
    }

    #[test]
    fn diff_classifies_new_changed_unchanged_removed() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = IndexManifest::open(dir.path()).unwrap();

        let original = doc("d1", "v1");
        manifest.set(
            "d1",
            original.content_hash(),
            String::new(),
            vec!["d1_full".into()],
            HashMap::new(),
        );
        manifest.set(
            "d2",
            doc("d2", "gone").content_hash(),
            String::new(),
            vec!["d2_full".into()],
            HashMap::new(),
        );

        let incoming = vec![doc("d1", "v2"), doc("d3", "fresh")];
        let diff = manifest.compute_diff(&incoming);

        assert_eq!(diff.new.len(), 1);
        assert_eq!(diff.new[0].id, "d3");
        assert_eq!(diff.changed.len(), 1);
        assert_eq!(diff.changed[0].id, "d1");
        assert!(diff.unchanged.is_empty());
        assert_eq!(diff.removed, vec!["d2".to_string()]);
    }

    #[test]
    fn unchanged_content_produces_noop_diff() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = IndexManifest::open(dir.path()).unwrap();
        let d = doc("d1", "same");
        manifest.set(
            "d1",
            d.content_hash(),
            String::new(),
            vec!["d1_full".into()],
            HashMap::new(),
        );

        let diff = manifest.compute_diff(&[d]);
        assert!(diff.is_noop());
        assert_eq!(diff.unchanged, vec!["d1".to_string()]);
    }

    #[test]
    fn save_and_reload_preserves_entries() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut manifest = IndexManifest::open(dir.path()).unwrap();
            manifest.set(
                "d1",
                "hash1".into(),
                "rev-9".into(),
                vec!["c1".into(), "c2".into()],
                HashMap::new(),
            );
            manifest.save().unwrap();
        }
        let reloaded = IndexManifest::open(dir.path()).unwrap();
        let entry = reloaded.get("d1").unwrap();
        assert_eq!(entry.content_hash, "hash1");
        assert_eq!(entry.source_revision, "rev-9");
        assert_eq!(entry.chunk_ids, vec!["c1", "c2"]);
    }
}
