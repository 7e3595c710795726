//! Vector store contract and backends
//!
//! Two backends sit behind [`VectorStore`]:
//! - [`flat::FlatIndexStore`] - file-backed flat inner-product index
//!   (selected by `VECTOR_STORE=faiss`)
//! - [`pinecone::PineconeStore`] - managed-service REST backend
//!   (selected by `VECTOR_STORE=pinecone`)
//!
//! Embeddings are L2-normalized on upsert so inner product equals
//! cosine similarity. Writes go through the index builder (single
//! writer); reads share the store behind an async `RwLock`.

pub mod flat;
pub mod pinecone;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::types::DocumentChunk;
use crate::{KnowledgeError, Result};

/// A chunk plus its embedding, as stored in a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub doc_id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: HashMap<String, Value>,
}

impl ChunkRecord {
    pub fn from_chunk(chunk: DocumentChunk, embedding: Vec<f32>) -> Self {
        let mut metadata = chunk.metadata;
        // The stored chunk_type is the full strategy name
        // (e.g. `sigma_overview`), which is what retrieval filters on.
        metadata.insert("chunk_type".to_string(), Value::String(chunk.chunk_type));
        Self {
            chunk_id: chunk.id,
            doc_id: chunk.doc_id,
            content: chunk.content,
            embedding,
            metadata,
        }
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// A query hit: similarity score plus the stored record fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub score: f32,
    /// Retrieval score before a reranker replaced `score`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_score: Option<f32>,
    pub chunk_id: String,
    pub doc_id: String,
    pub content: String,
    pub metadata: HashMap<String, Value>,
}

impl ScoredRecord {
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// Index statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_vectors: usize,
    pub dimension: usize,
    pub by_doc_type: HashMap<String, usize>,
    pub by_source: HashMap<String, usize>,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    fn dimension(&self) -> usize;

    /// Create a fresh, empty index.
    async fn initialize(&mut self) -> Result<()>;

    /// Load a durable snapshot (no-op for stateless backends).
    async fn load(&mut self) -> Result<()>;

    /// Persist a durable snapshot (no-op for stateless backends).
    async fn save(&self) -> Result<()>;

    /// Insert records; embeddings are L2-normalized on the way in.
    /// Dimension mismatches fail with
    /// [`KnowledgeError::DimensionMismatch`].
    async fn upsert(&mut self, records: Vec<ChunkRecord>) -> Result<()>;

    /// Top-`k` by descending score under conjunctive metadata equality
    /// filters.
    async fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filters: Option<&HashMap<String, String>>,
    ) -> Result<Vec<ScoredRecord>>;

    /// Remove every chunk belonging to the given documents; returns the
    /// number of removed vectors.
    async fn delete_by_doc_ids(&mut self, doc_ids: &HashSet<String>) -> Result<usize>;

    async fn stats(&self) -> Result<StoreStats>;
}

/// Shared handle: single writer (the index builder), many readers.
pub type SharedStore = Arc<RwLock<Box<dyn VectorStore>>>;

pub fn shared(store: Box<dyn VectorStore>) -> SharedStore {
    Arc::new(RwLock::new(store))
}

/// In-place L2 normalization; zero vectors are left unchanged.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Does `record` satisfy every filter? Values compare against the
/// metadata entry's string form.
pub(crate) fn matches_filters(
    metadata: &HashMap<String, Value>,
    filters: Option<&HashMap<String, String>>,
) -> bool {
    let Some(filters) = filters else {
        return true;
    };
    filters.iter().all(|(key, expected)| {
        metadata.get(key).is_some_and(|value| match value {
            Value::String(s) => s == expected,
            other => other.to_string() == *expected,
        })
    })
}

const VALID_BACKENDS: &[&str] = &["faiss", "pinecone"];

/// Build a vector store from config / env.
///
/// Resolution order: explicit `backend` -> `VECTOR_STORE` env ->
/// default `faiss`. Unknown values fail with a config error.
pub fn create_vector_store(
    backend: Option<&str>,
    dimension: usize,
    index_path: &std::path::Path,
) -> Result<Box<dyn VectorStore>> {
    let name = match backend {
        Some(explicit) => {
            if !VALID_BACKENDS.contains(&explicit) {
                return Err(cs_core::ConfigError::UnknownValue {
                    var: "vector store backend".into(),
                    value: explicit.into(),
                    valid: VALID_BACKENDS.join(", "),
                }
                .into());
            }
            explicit.to_string()
        }
        None => cs_core::env_choice("VECTOR_STORE", VALID_BACKENDS)?
            .unwrap_or_else(|| "faiss".to_string()),
    };

    match name.as_str() {
        "pinecone" => {
            let api_key = std::env::var("PINECONE_API_KEY")
                .map_err(|_| cs_core::ConfigError::Missing("PINECONE_API_KEY".into()))?;
            let host = std::env::var("PINECONE_INDEX_HOST")
                .map_err(|_| cs_core::ConfigError::Missing("PINECONE_INDEX_HOST".into()))?;
            let namespace = std::env::var("PINECONE_NAMESPACE").unwrap_or_default();
            Ok(Box::new(pinecone::PineconeStore::new(
                api_key, host, namespace, dimension,
            )))
        }
        _ => Ok(Box::new(flat::FlatIndexStore::new(dimension, index_path))),
    }
}
