//! Managed-service vector store backend
//!
//! REST client for a Pinecone-style serverless index. The index itself
//! is durable on the service side, so `load`/`save` are no-ops.
//! Deletion uses a metadata filter on `doc_id`; the removed count is
//! derived from the stats delta since the API does not report it.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{matches_filters, l2_normalize, ChunkRecord, ScoredRecord, StoreStats, VectorStore};
use crate::{KnowledgeError, Result};

/// Vectors per upsert RPC (service limit).
const UPSERT_BATCH_SIZE: usize = 100;

pub struct PineconeStore {
    client: reqwest::Client,
    api_key: String,
    /// Index host, e.g. `https://countersign-abc123.svc.pinecone.io`.
    host: String,
    namespace: String,
    dimension: usize,
}

#[derive(Deserialize)]
struct QueryMatch {
    id: String,
    score: f32,
    #[serde(default)]
    metadata: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Deserialize)]
struct StatsResponse {
    #[serde(rename = "totalVectorCount", default)]
    total_vector_count: usize,
    #[serde(default)]
    dimension: usize,
}

impl PineconeStore {
    pub fn new(
        api_key: impl Into<String>,
        host: impl Into<String>,
        namespace: impl Into<String>,
        dimension: usize,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            host: host.into(),
            namespace: namespace.into(),
            dimension,
        }
    }

    async fn post(&self, path: &str, body: Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}{path}", self.host))
            .header("Api-Key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| KnowledgeError::Store(format!("pinecone {path}: {e}")))?;
        if !response.status().is_success() {
            return Err(KnowledgeError::Store(format!(
                "pinecone {path} returned {}",
                response.status()
            )));
        }
        Ok(response)
    }

    async fn total_vectors(&self) -> Result<usize> {
        let response = self.post("/describe_index_stats", json!({})).await?;
        let stats: StatsResponse = response
            .json()
            .await
            .map_err(|e| KnowledgeError::Store(format!("pinecone stats decode: {e}")))?;
        Ok(stats.total_vector_count)
    }
}

#[async_trait]
impl VectorStore for PineconeStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn initialize(&mut self) -> Result<()> {
        // Index lifecycle is managed on the service side.
        let stats = self.total_vectors().await?;
        info!("pinecone index reachable, {stats} vectors");
        Ok(())
    }

    async fn load(&mut self) -> Result<()> {
        Ok(())
    }

    async fn save(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert(&mut self, records: Vec<ChunkRecord>) -> Result<()> {
        for batch in records.chunks(UPSERT_BATCH_SIZE) {
            let vectors: Vec<Value> = batch
                .iter()
                .map(|record| {
                    if record.embedding.len() != self.dimension {
                        return Err(KnowledgeError::DimensionMismatch {
                            store: self.dimension,
                            embedder: record.embedding.len(),
                        });
                    }
                    let mut embedding = record.embedding.clone();
                    l2_normalize(&mut embedding);
                    let mut metadata = record.metadata.clone();
                    metadata.insert("doc_id".into(), json!(record.doc_id));
                    metadata.insert("content".into(), json!(record.content));
                    Ok(json!({
                        "id": record.chunk_id,
                        "values": embedding,
                        "metadata": metadata,
                    }))
                })
                .collect::<Result<_>>()?;

            self.post(
                "/vectors/upsert",
                json!({ "vectors": vectors, "namespace": self.namespace }),
            )
            .await?;
            debug!("upserted {} vectors to pinecone", batch.len());
        }
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filters: Option<&HashMap<String, String>>,
    ) -> Result<Vec<ScoredRecord>> {
        let mut query = embedding.to_vec();
        l2_normalize(&mut query);

        let mut body = json!({
            "vector": query,
            "topK": k,
            "includeMetadata": true,
            "namespace": self.namespace,
        });
        if let Some(filters) = filters {
            let clauses: serde_json::Map<String, Value> = filters
                .iter()
                .map(|(key, value)| (key.clone(), json!({ "$eq": value })))
                .collect();
            body["filter"] = Value::Object(clauses);
        }

        let response = self.post("/query", body).await?;
        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| KnowledgeError::Store(format!("pinecone query decode: {e}")))?;

        Ok(parsed
            .matches
            .into_iter()
            .filter(|m| matches_filters(&m.metadata, filters))
            .map(|m| {
                let doc_id = m
                    .metadata
                    .get("doc_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let content = m
                    .metadata
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                ScoredRecord {
                    score: m.score,
                    original_score: None,
                    chunk_id: m.id,
                    doc_id,
                    content,
                    metadata: m.metadata,
                }
            })
            .collect())
    }

    async fn delete_by_doc_ids(&mut self, doc_ids: &HashSet<String>) -> Result<usize> {
        if doc_ids.is_empty() {
            return Ok(0);
        }
        let before = self.total_vectors().await?;
        let ids: Vec<&String> = doc_ids.iter().collect();
        self.post(
            "/vectors/delete",
            json!({
                "filter": { "doc_id": { "$in": ids } },
                "namespace": self.namespace,
            }),
        )
        .await?;
        let after = self.total_vectors().await?;
        Ok(before.saturating_sub(after))
    }

    async fn stats(&self) -> Result<StoreStats> {
        let response = self.post("/describe_index_stats", json!({})).await?;
        let parsed: StatsResponse = response
            .json()
            .await
            .map_err(|e| KnowledgeError::Store(format!("pinecone stats decode: {e}")))?;
        Ok(StoreStats {
            total_vectors: parsed.total_vector_count,
            dimension: if parsed.dimension > 0 {
                parsed.dimension
            } else {
                self.dimension
            },
            by_doc_type: HashMap::new(),
            by_source: HashMap::new(),
        })
    }
}
