//! Flat inner-product index
//!
//! Brute-force cosine search over a contiguous f32 matrix. Vectors are
//! L2-normalized on upsert, so the inner product with a normalized
//! query is cosine similarity. Deletion rebuilds the matrix from the
//! surviving rows; queries after `delete + upsert + save + load` see
//! exactly the vectors those operations left behind.
//!
//! Snapshot layout under the index directory:
//! - `index.bin` - row count u32 LE, dimension u32 LE, then rows of f32 LE
//! - `metadata.json` - per-row chunk records (without embeddings)

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::{l2_normalize, matches_filters, ChunkRecord, ScoredRecord, StoreStats, VectorStore};
use crate::{KnowledgeError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RowMeta {
    chunk_id: String,
    doc_id: String,
    content: String,
    metadata: HashMap<String, Value>,
}

pub struct FlatIndexStore {
    dimension: usize,
    index_path: PathBuf,
    vectors: Vec<f32>,
    rows: Vec<RowMeta>,
}

impl FlatIndexStore {
    pub fn new(dimension: usize, index_path: &Path) -> Self {
        Self {
            dimension,
            index_path: index_path.to_path_buf(),
            vectors: Vec::new(),
            rows: Vec::new(),
        }
    }

    fn index_file(&self) -> PathBuf {
        self.index_path.join("index.bin")
    }

    fn metadata_file(&self) -> PathBuf {
        self.index_path.join("metadata.json")
    }

    fn row(&self, i: usize) -> &[f32] {
        &self.vectors[i * self.dimension..(i + 1) * self.dimension]
    }

    fn dot(&self, i: usize, query: &[f32]) -> f32 {
        self.row(i)
            .iter()
            .zip(query)
            .map(|(a, b)| a * b)
            .sum()
    }
}

#[async_trait]
impl VectorStore for FlatIndexStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn initialize(&mut self) -> Result<()> {
        self.vectors.clear();
        self.rows.clear();
        info!("initialized flat index with dimension {}", self.dimension);
        Ok(())
    }

    async fn load(&mut self) -> Result<()> {
        let index_file = self.index_file();
        if !index_file.exists() {
            return self.initialize().await;
        }

        let raw = std::fs::read(&index_file)?;
        if raw.len() < 8 {
            warn!("index file truncated, starting fresh");
            return self.initialize().await;
        }
        let count = u32::from_le_bytes(raw[0..4].try_into().expect("4 bytes")) as usize;
        let dimension = u32::from_le_bytes(raw[4..8].try_into().expect("4 bytes")) as usize;
        if dimension != self.dimension {
            return Err(KnowledgeError::DimensionMismatch {
                store: dimension,
                embedder: self.dimension,
            });
        }
        let expected = 8 + count * dimension * 4;
        if raw.len() != expected {
            return Err(KnowledgeError::Store(format!(
                "index file has {} bytes, expected {expected}",
                raw.len()
            )));
        }

        self.vectors = raw[8..]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes(b.try_into().expect("4 bytes")))
            .collect();

        let meta_raw = std::fs::read_to_string(self.metadata_file())?;
        self.rows = serde_json::from_str(&meta_raw)?;
        if self.rows.len() != count {
            return Err(KnowledgeError::Store(format!(
                "metadata has {} rows, index has {count}",
                self.rows.len()
            )));
        }

        info!("loaded flat index with {} vectors", count);
        Ok(())
    }

    async fn save(&self) -> Result<()> {
        std::fs::create_dir_all(&self.index_path)?;

        let mut raw = Vec::with_capacity(8 + self.vectors.len() * 4);
        raw.extend_from_slice(&(self.rows.len() as u32).to_le_bytes());
        raw.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        for value in &self.vectors {
            raw.extend_from_slice(&value.to_le_bytes());
        }
        let tmp = self.index_file().with_extension("bin.tmp");
        std::fs::write(&tmp, &raw)?;
        std::fs::rename(&tmp, self.index_file())?;

        let tmp = self.metadata_file().with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(&self.rows)?)?;
        std::fs::rename(&tmp, self.metadata_file())?;

        info!("saved flat index with {} vectors", self.rows.len());
        Ok(())
    }

    async fn upsert(&mut self, records: Vec<ChunkRecord>) -> Result<()> {
        for record in records {
            if record.embedding.len() != self.dimension {
                return Err(KnowledgeError::DimensionMismatch {
                    store: self.dimension,
                    embedder: record.embedding.len(),
                });
            }
            let mut embedding = record.embedding;
            l2_normalize(&mut embedding);
            self.vectors.extend_from_slice(&embedding);
            self.rows.push(RowMeta {
                chunk_id: record.chunk_id,
                doc_id: record.doc_id,
                content: record.content,
                metadata: record.metadata,
            });
        }
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filters: Option<&HashMap<String, String>>,
    ) -> Result<Vec<ScoredRecord>> {
        if self.rows.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if embedding.len() != self.dimension {
            return Err(KnowledgeError::DimensionMismatch {
                store: self.dimension,
                embedder: embedding.len(),
            });
        }

        let mut query = embedding.to_vec();
        l2_normalize(&mut query);

        let mut scored: Vec<(f32, usize)> = (0..self.rows.len())
            .filter(|&i| matches_filters(&self.rows[i].metadata, filters))
            .map(|i| (self.dot(i, &query), i))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).expect("scores are finite"));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(score, i)| {
                let row = &self.rows[i];
                ScoredRecord {
                    score,
                    original_score: None,
                    chunk_id: row.chunk_id.clone(),
                    doc_id: row.doc_id.clone(),
                    content: row.content.clone(),
                    metadata: row.metadata.clone(),
                }
            })
            .collect())
    }

    async fn delete_by_doc_ids(&mut self, doc_ids: &HashSet<String>) -> Result<usize> {
        if doc_ids.is_empty() {
            return Ok(0);
        }

        let keep: Vec<usize> = (0..self.rows.len())
            .filter(|&i| !doc_ids.contains(&self.rows[i].doc_id))
            .collect();
        let removed = self.rows.len() - keep.len();
        if removed == 0 {
            return Ok(0);
        }

        // Flat index has no in-place removal: rebuild from survivors.
        let mut vectors = Vec::with_capacity(keep.len() * self.dimension);
        let mut rows = Vec::with_capacity(keep.len());
        for &i in &keep {
            vectors.extend_from_slice(self.row(i));
            rows.push(self.rows[i].clone());
        }
        self.vectors = vectors;
        self.rows = rows;

        info!(
            "deleted {removed} vectors for {} doc ids, {} remain",
            doc_ids.len(),
            self.rows.len()
        );
        Ok(removed)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let mut by_doc_type: HashMap<String, usize> = HashMap::new();
        let mut by_source: HashMap<String, usize> = HashMap::new();
        for row in &self.rows {
            let doc_type = row
                .metadata
                .get("doc_type")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            let source = row
                .metadata
                .get("source")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            *by_doc_type.entry(doc_type.to_string()).or_default() += 1;
            *by_source.entry(source.to_string()).or_default() += 1;
        }
        Ok(StoreStats {
            total_vectors: self.rows.len(),
            dimension: self.dimension,
            by_doc_type,
            by_source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(chunk_id: &str, doc_id: &str, embedding: Vec<f32>, doc_type: &str) -> ChunkRecord {
        let mut metadata = HashMap::new();
        metadata.insert("doc_type".to_string(), json!(doc_type));
        metadata.insert("source".to_string(), json!("test"));
        ChunkRecord {
            chunk_id: chunk_id.into(),
            doc_id: doc_id.into(),
            content: format!("content of {chunk_id}"),
            embedding,
            metadata,
        }
    }

    #[tokio::test]
    async fn query_ranks_by_cosine_similarity() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FlatIndexStore::new(3, dir.path());
        store.initialize().await.unwrap();
        store
            .upsert(vec![
                record("a", "d1", vec![1.0, 0.0, 0.0], "cve"),
                record("b", "d2", vec![0.0, 1.0, 0.0], "cve"),
                record("c", "d3", vec![0.9, 0.1, 0.0], "cve"),
            ])
            .await
            .unwrap();

        let hits = store.query(&[1.0, 0.0, 0.0], 2, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, "a");
        assert_eq!(hits[1].chunk_id, "c");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn filters_restrict_results() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FlatIndexStore::new(2, dir.path());
        store
            .upsert(vec![
                record("a", "d1", vec![1.0, 0.0], "cve"),
                record("b", "d2", vec![1.0, 0.0], "sigma_rule"),
            ])
            .await
            .unwrap();

        let mut filters = HashMap::new();
        filters.insert("doc_type".to_string(), "sigma_rule".to_string());
        let hits = store
            .query(&[1.0, 0.0], 10, Some(&filters))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "b");
    }

    #[tokio::test]
    async fn dimension_mismatch_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FlatIndexStore::new(4, dir.path());
        let err = store
            .upsert(vec![record("a", "d1", vec![1.0, 0.0], "cve")])
            .await
            .unwrap_err();
        assert!(matches!(err, KnowledgeError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn delete_upsert_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FlatIndexStore::new(2, dir.path());
        store
            .upsert(vec![
                record("a1", "doc_a", vec![1.0, 0.0], "cve"),
                record("a2", "doc_a", vec![0.7, 0.7], "cve"),
                record("b1", "doc_b", vec![0.0, 1.0], "cve"),
            ])
            .await
            .unwrap();

        let removed = store
            .delete_by_doc_ids(&HashSet::from(["doc_a".to_string()]))
            .await
            .unwrap();
        assert_eq!(removed, 2);

        store
            .upsert(vec![record("c1", "doc_c", vec![1.0, 0.0], "cve")])
            .await
            .unwrap();
        store.save().await.unwrap();

        let mut reloaded = FlatIndexStore::new(2, dir.path());
        reloaded.load().await.unwrap();

        let hits = reloaded.query(&[1.0, 0.0], 10, None).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "b1"]);
    }

    #[tokio::test]
    async fn stats_count_by_doc_type_and_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FlatIndexStore::new(2, dir.path());
        store
            .upsert(vec![
                record("a", "d1", vec![1.0, 0.0], "cve"),
                record("b", "d2", vec![0.0, 1.0], "cve"),
                record("c", "d3", vec![0.5, 0.5], "attack_technique"),
            ])
            .await
            .unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_vectors, 3);
        assert_eq!(stats.dimension, 2);
        assert_eq!(stats.by_doc_type["cve"], 2);
        assert_eq!(stats.by_doc_type["attack_technique"], 1);
        assert_eq!(stats.by_source["test"], 3);
    }

    #[tokio::test]
    async fn load_missing_snapshot_initializes_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FlatIndexStore::new(2, dir.path());
        store.load().await.unwrap();
        assert_eq!(store.stats().await.unwrap().total_vectors, 0);
    }
}
