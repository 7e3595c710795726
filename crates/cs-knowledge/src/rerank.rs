//! Rerankers
//!
//! Second-stage scoring between vector retrieval and the caller:
//!
//! ```text
//! store top-N -> reranker -> top-k -> caller
//! ```
//!
//! Every backend moves the retrieval score into `original_score` and
//! writes its own relevance into `score`. Backends:
//! - `cross_encoder` - HTTP scorer service
//! - `none` - passthrough, keeps retrieval order
//! - `mock` - deterministic query-token overlap fraction (tests)

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::store::ScoredRecord;
use crate::{KnowledgeError, Result};

const VALID_BACKENDS: &[&str] = &["cross_encoder", "none", "mock"];

#[async_trait]
pub trait Reranker: Send + Sync + std::fmt::Debug {
    /// Rerank `candidates` for `query` and return the best `top_k`.
    async fn rerank(
        &self,
        query: &str,
        candidates: Vec<ScoredRecord>,
        top_k: usize,
    ) -> Result<Vec<ScoredRecord>>;

    fn name(&self) -> String;
}

// ---------------------------------------------------------------------------
// Cross-encoder over HTTP
// ---------------------------------------------------------------------------

/// Client for a cross-encoder scoring service
/// (`POST {base}/rerank` with `{"query":..,"texts":[..]}`, response
/// `{"scores":[..]}`).
#[derive(Debug)]
pub struct CrossEncoderReranker {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Deserialize)]
struct RerankResponse {
    scores: Vec<f32>,
}

impl CrossEncoderReranker {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: "ms-marco-MiniLM-L-6-v2".to_string(),
        }
    }

    pub fn from_env() -> Self {
        let base = std::env::var("CROSS_ENCODER_URL")
            .unwrap_or_else(|_| "http://localhost:8082".to_string());
        Self::new(base)
    }
}

#[async_trait]
impl Reranker for CrossEncoderReranker {
    async fn rerank(
        &self,
        query: &str,
        mut candidates: Vec<ScoredRecord>,
        top_k: usize,
    ) -> Result<Vec<ScoredRecord>> {
        if candidates.is_empty() {
            return Ok(candidates);
        }

        let texts: Vec<&str> = candidates.iter().map(|c| c.content.as_str()).collect();
        let response = self
            .client
            .post(format!("{}/rerank", self.base_url))
            .json(&json!({ "query": query, "texts": texts }))
            .send()
            .await
            .map_err(|e| KnowledgeError::Rerank(format!("cross-encoder request: {e}")))?;
        if !response.status().is_success() {
            return Err(KnowledgeError::Rerank(format!(
                "cross-encoder returned {}",
                response.status()
            )));
        }
        let parsed: RerankResponse = response
            .json()
            .await
            .map_err(|e| KnowledgeError::Rerank(format!("cross-encoder decode: {e}")))?;
        if parsed.scores.len() != candidates.len() {
            return Err(KnowledgeError::Rerank(format!(
                "cross-encoder returned {} scores for {} candidates",
                parsed.scores.len(),
                candidates.len()
            )));
        }

        for (candidate, score) in candidates.iter_mut().zip(parsed.scores) {
            candidate.original_score = Some(candidate.score);
            candidate.score = score;
        }
        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).expect("scores are finite"));
        candidates.truncate(top_k);
        Ok(candidates)
    }

    fn name(&self) -> String {
        format!("cross_encoder:{}", self.model)
    }
}

// ---------------------------------------------------------------------------
// Passthrough
// ---------------------------------------------------------------------------

pub struct NoneReranker;

#[async_trait]
impl Reranker for NoneReranker {
    async fn rerank(
        &self,
        _query: &str,
        mut candidates: Vec<ScoredRecord>,
        top_k: usize,
    ) -> Result<Vec<ScoredRecord>> {
        candidates.truncate(top_k);
        Ok(candidates)
    }

    fn name(&self) -> String {
        "none".to_string()
    }
}

// ---------------------------------------------------------------------------
// Deterministic mock
// ---------------------------------------------------------------------------

/// Scores each candidate by the fraction of query tokens present in its
/// content (case-insensitive). Fully deterministic, no model needed.
pub struct MockReranker;

#[async_trait]
impl Reranker for MockReranker {
    async fn rerank(
        &self,
        query: &str,
        mut candidates: Vec<ScoredRecord>,
        top_k: usize,
    ) -> Result<Vec<ScoredRecord>> {
        if candidates.is_empty() {
            return Ok(candidates);
        }
        let query_tokens: Vec<String> = {
            let mut tokens: Vec<String> = query
                .to_lowercase()
                .split_whitespace()
                .map(str::to_string)
                .collect();
            tokens.dedup();
            tokens
        };

        for candidate in &mut candidates {
            candidate.original_score = Some(candidate.score);
            if query_tokens.is_empty() {
                candidate.score = 0.0;
                continue;
            }
            let content = candidate.content.to_lowercase();
            let overlap = query_tokens.iter().filter(|t| content.contains(*t)).count();
            candidate.score = overlap as f32 / query_tokens.len() as f32;
        }
        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).expect("scores are finite"));
        candidates.truncate(top_k);
        Ok(candidates)
    }

    fn name(&self) -> String {
        "mock".to_string()
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Resolve the reranker backend from `RERANKER`; defaults to `none`.
pub fn resolve_backend() -> Result<String> {
    if let Some(explicit) = cs_core::env_choice("RERANKER", VALID_BACKENDS)? {
        info!("reranker set by RERANKER={explicit}");
        return Ok(explicit);
    }
    Ok("none".to_string())
}

pub fn create_reranker(backend: Option<&str>) -> Result<Box<dyn Reranker>> {
    let name = match backend {
        Some(explicit) => {
            if !VALID_BACKENDS.contains(&explicit) {
                return Err(cs_core::ConfigError::UnknownValue {
                    var: "reranker backend".into(),
                    value: explicit.into(),
                    valid: VALID_BACKENDS.join(", "),
                }
                .into());
            }
            explicit.to_string()
        }
        None => resolve_backend()?,
    };

    Ok(match name.as_str() {
        "cross_encoder" => Box::new(CrossEncoderReranker::from_env()),
        "mock" => Box::new(MockReranker),
        _ => Box::new(NoneReranker),
    })
}
