//! Embedding providers
//!
//! Text -> fixed-dimension vector behind the [`Embedder`] trait.
//! Providers:
//! - `openai` - remote HTTP API, 1536-d
//! - `sentence_transformers` - local inference sidecar over HTTP, 384-d
//! - `mock` - hash-seeded deterministic vectors for tests, 768-d
//!
//! Resolution order: explicit config -> `EMBEDDINGS_PROVIDER` env ->
//! `OPENAI_API_KEY` presence -> mock (with a warning). Unknown values
//! fail loudly.
//!
//! Embeddings are cached by content SHA-256 in a JSON file keyed by the
//! provider's model name.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::store::l2_normalize;
use crate::types::DocumentChunk;
use crate::{KnowledgeError, Result};

/// Known dimensions per provider.
pub fn provider_dimension(provider: &str) -> usize {
    match provider {
        "openai" => 1536,
        "sentence_transformers" => 384,
        _ => 768,
    }
}

const VALID_PROVIDERS: &[&str] = &["openai", "sentence_transformers", "mock"];

#[async_trait]
pub trait Embedder: Send + Sync + std::fmt::Debug {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn dimension(&self) -> usize;

    fn model_name(&self) -> String;
}

// ---------------------------------------------------------------------------
// OpenAI-compatible remote provider
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingItem {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingItem>,
}

impl OpenAiEmbedder {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: "https://api.openai.com".to_string(),
            api_key: api_key.into(),
            model: "text-embedding-ada-002".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn request(&self, input: serde_json::Value) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({ "model": self.model, "input": input }))
            .send()
            .await
            .map_err(|e| KnowledgeError::Embedding(format!("openai request: {e}")))?;

        if !response.status().is_success() {
            return Err(KnowledgeError::Embedding(format!(
                "openai returned {}",
                response.status()
            )));
        }

        let body: OpenAiEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| KnowledgeError::Embedding(format!("openai decode: {e}")))?;
        Ok(body.data.into_iter().map(|item| item.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let mut vecs = self.request(json!(text)).await?;
        vecs.pop()
            .ok_or_else(|| KnowledgeError::Embedding("openai returned no embedding".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(json!(texts)).await
    }

    fn dimension(&self) -> usize {
        1536
    }

    fn model_name(&self) -> String {
        format!("openai_{}", self.model)
    }
}

// ---------------------------------------------------------------------------
// Local sentence-transformers sidecar
// ---------------------------------------------------------------------------

/// HTTP client for a local embedding inference sidecar
/// (`POST {base}/embed` with `{"inputs": [...]}`, response `[[f32]]`).
#[derive(Debug)]
pub struct LocalEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl LocalEmbedder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: "all-MiniLM-L6-v2".to_string(),
        }
    }

    pub fn from_env() -> Self {
        let base = std::env::var("SENTENCE_TRANSFORMERS_URL")
            .unwrap_or_else(|_| "http://localhost:8081".to_string());
        Self::new(base)
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let mut vecs = self.embed_batch(&[text.to_string()]).await?;
        vecs.pop()
            .ok_or_else(|| KnowledgeError::Embedding("sidecar returned no embedding".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .client
            .post(format!("{}/embed", self.base_url))
            .json(&json!({ "inputs": texts }))
            .send()
            .await
            .map_err(|e| KnowledgeError::Embedding(format!("sidecar request: {e}")))?;
        if !response.status().is_success() {
            return Err(KnowledgeError::Embedding(format!(
                "sidecar returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| KnowledgeError::Embedding(format!("sidecar decode: {e}")))
    }

    fn dimension(&self) -> usize {
        384
    }

    fn model_name(&self) -> String {
        format!("sentence_transformers_{}", self.model)
    }
}

// ---------------------------------------------------------------------------
// Deterministic mock
// ---------------------------------------------------------------------------

/// Hash-seeded embeddings: the SHA-256 hex of the text is folded into
/// `[-1, 1]` floats, repeated out to the dimension, then L2-normalized.
/// Identical text always gets an identical unit vector.
#[derive(Debug)]
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(768)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let digest = hex::encode(Sha256::digest(text.as_bytes()));

        let mut numbers: Vec<f32> = digest
            .as_bytes()
            .chunks(8)
            .map(|chunk| {
                let hexs = std::str::from_utf8(chunk).expect("hex digest is ascii");
                let value = u32::from_str_radix(hexs, 16).expect("hex digest parses") as f64;
                (value / f64::from(u32::MAX)).mul_add(2.0, -1.0) as f32
            })
            .collect();

        while numbers.len() < self.dimension {
            let needed = self.dimension - numbers.len();
            let extend: Vec<f32> = numbers.iter().take(needed).copied().collect();
            numbers.extend(extend);
        }
        numbers.truncate(self.dimension);
        l2_normalize(&mut numbers);
        Ok(numbers)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed_text(text).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> String {
        format!("mock_embeddings_{}d", self.dimension)
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    embedding: Vec<f32>,
    model: String,
    dimension: usize,
}

/// Content-hash keyed embedding cache, persisted as one JSON file per
/// model under the cache directory.
#[derive(Debug)]
pub struct EmbeddingCache {
    path: PathBuf,
    entries: DashMap<String, CacheEntry>,
    unsaved: std::sync::atomic::AtomicUsize,
}

const CACHE_SAVE_INTERVAL: usize = 100;

impl EmbeddingCache {
    pub fn open(cache_dir: &Path, model_name: &str) -> Result<Self> {
        std::fs::create_dir_all(cache_dir)?;
        let path = cache_dir.join(format!("embeddings_{model_name}.json"));
        let entries = DashMap::new();
        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let loaded: std::collections::HashMap<String, CacheEntry> =
                serde_json::from_str(&raw)?;
            for (key, entry) in loaded {
                entries.insert(key, entry);
            }
            info!("loaded {} cached embeddings from {:?}", entries.len(), path);
        }
        Ok(Self {
            path,
            entries,
            unsaved: std::sync::atomic::AtomicUsize::new(0),
        })
    }

    pub fn cache_key(text: &str) -> String {
        hex::encode(Sha256::digest(text.as_bytes()))
    }

    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        self.entries
            .get(&Self::cache_key(text))
            .map(|entry| entry.embedding.clone())
    }

    /// Insert-if-absent: concurrent writers of the same key keep the
    /// first value, so a cached embedding never flips underneath a
    /// reader.
    pub fn put(&self, text: &str, embedding: Vec<f32>, model: &str) -> Result<()> {
        let dimension = embedding.len();
        self.entries
            .entry(Self::cache_key(text))
            .or_insert_with(|| CacheEntry {
                embedding,
                model: model.to_string(),
                dimension,
            });
        let pending = self
            .unsaved
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            + 1;
        if pending % CACHE_SAVE_INTERVAL == 0 {
            self.save()?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn save(&self) -> Result<()> {
        let map: std::collections::HashMap<String, CacheEntry> = self
            .entries
            .iter()
            .map(|kv| (kv.key().clone(), kv.value().clone()))
            .collect();
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(&map)?)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!("saved {} embeddings to {:?}", map.len(), self.path);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// A chunk paired with its embedding, ready for the vector store.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: DocumentChunk,
    pub embedding: Vec<f32>,
}

/// Embedding engine: provider + cache + batching.
#[derive(Debug)]
pub struct EmbeddingEngine {
    provider: Box<dyn Embedder>,
    cache: Option<EmbeddingCache>,
}

impl EmbeddingEngine {
    pub fn new(provider: Box<dyn Embedder>, cache: Option<EmbeddingCache>) -> Self {
        Self { provider, cache }
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    pub fn model_name(&self) -> String {
        self.provider.model_name()
    }

    pub fn cached_embeddings(&self) -> usize {
        self.cache.as_ref().map_or(0, EmbeddingCache::len)
    }

    /// Embed one text, consulting the cache first.
    pub async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(text) {
                return Ok(hit);
            }
        }
        let embedding = self.provider.embed_text(text).await?;
        if let Some(cache) = &self.cache {
            cache.put(text, embedding.clone(), &self.provider.model_name())?;
        }
        Ok(embedding)
    }

    /// Queries are not cached; they are one-shot strings.
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.provider.embed_text(query).await
    }

    /// Embed chunks, batching everything the cache cannot answer.
    pub async fn embed_chunks(&self, chunks: Vec<DocumentChunk>) -> Result<Vec<EmbeddedChunk>> {
        let mut results: Vec<Option<EmbeddedChunk>> = Vec::with_capacity(chunks.len());
        let mut to_embed: Vec<String> = Vec::new();
        let mut pending: Vec<(usize, DocumentChunk)> = Vec::new();

        for chunk in chunks {
            let cached = self.cache.as_ref().and_then(|c| c.get(&chunk.content));
            match cached {
                Some(embedding) => results.push(Some(EmbeddedChunk { chunk, embedding })),
                None => {
                    to_embed.push(chunk.content.clone());
                    pending.push((results.len(), chunk));
                    results.push(None);
                }
            }
        }

        if !to_embed.is_empty() {
            info!("generating embeddings for {} chunks", to_embed.len());
            // Transient provider failures get the standard retry ladder
            // before surfacing.
            let policy = cs_core::RetryPolicy {
                attempts: 3,
                base: std::time::Duration::from_millis(500),
                factor: 2.0,
                cap: std::time::Duration::from_secs(5),
            };
            let embeddings =
                cs_core::retry(policy, "embed_batch", || self.provider.embed_batch(&to_embed))
                    .await?;
            if embeddings.len() != pending.len() {
                return Err(KnowledgeError::Embedding(format!(
                    "provider returned {} embeddings for {} inputs",
                    embeddings.len(),
                    pending.len()
                )));
            }
            for ((slot, chunk), embedding) in pending.into_iter().zip(embeddings) {
                if let Some(cache) = &self.cache {
                    cache.put(&chunk.content, embedding.clone(), &self.provider.model_name())?;
                }
                results[slot] = Some(EmbeddedChunk { chunk, embedding });
            }
            if let Some(cache) = &self.cache {
                cache.save()?;
            }
        }

        Ok(results.into_iter().map(|r| r.expect("slot filled")).collect())
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Resolve the embedding provider name from the environment.
pub fn resolve_provider() -> Result<String> {
    if let Some(explicit) = cs_core::env_choice("EMBEDDINGS_PROVIDER", VALID_PROVIDERS)? {
        info!("embedding provider set by EMBEDDINGS_PROVIDER={explicit}");
        return Ok(explicit);
    }
    if std::env::var("OPENAI_API_KEY").map(|v| !v.trim().is_empty()) == Ok(true) {
        info!("embedding provider: openai (OPENAI_API_KEY detected)");
        return Ok("openai".to_string());
    }
    warn!("no embedding provider configured, falling back to mock embeddings");
    Ok("mock".to_string())
}

/// Build an [`EmbeddingEngine`] for the given (or resolved) provider.
pub fn create_embedding_engine(
    provider: Option<&str>,
    cache_dir: Option<&Path>,
) -> Result<EmbeddingEngine> {
    let name = match provider {
        Some(explicit) => {
            if !VALID_PROVIDERS.contains(&explicit) {
                return Err(cs_core::ConfigError::UnknownValue {
                    var: "embeddings provider".into(),
                    value: explicit.into(),
                    valid: VALID_PROVIDERS.join(", "),
                }
                .into());
            }
            explicit.to_string()
        }
        None => resolve_provider()?,
    };

    let provider: Box<dyn Embedder> = match name.as_str() {
        "openai" => {
            let api_key = std::env::var("OPENAI_API_KEY")
                .map_err(|_| cs_core::ConfigError::Missing("OPENAI_API_KEY".into()))?;
            Box::new(OpenAiEmbedder::new(api_key))
        }
        "sentence_transformers" => Box::new(LocalEmbedder::from_env()),
        _ => Box::new(MockEmbedder::default()),
    };

    let cache = match cache_dir {
        Some(dir) => Some(EmbeddingCache::open(dir, &provider.model_name())?),
        None => None,
    };

    Ok(EmbeddingEngine::new(provider, cache))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_embeddings_are_deterministic_unit_vectors() {
        let mock = MockEmbedder::default();
        let a = mock.embed_text("ssh brute force").await.unwrap();
        let b = mock.embed_text("ssh brute force").await.unwrap();
        let c = mock.embed_text("dns tunneling").await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 768);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn mock_batch_matches_single() {
        let mock = MockEmbedder::new(64);
        let single = mock.embed_text("alpha").await.unwrap();
        let batch = mock
            .embed_batch(&["alpha".to_string(), "beta".to_string()])
            .await
            .unwrap();
        assert_eq!(batch[0], single);
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn cache_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let model = "mock_embeddings_768d";
        {
            let cache = EmbeddingCache::open(dir.path(), model).unwrap();
            cache.put("hello", vec![0.5, 0.5], model).unwrap();
            cache.save().unwrap();
        }
        let reloaded = EmbeddingCache::open(dir.path(), model).unwrap();
        assert_eq!(reloaded.get("hello"), Some(vec![0.5, 0.5]));
        assert!(reloaded.get("other").is_none());
    }

    #[tokio::test]
    async fn engine_serves_cached_chunks_without_provider_calls() {
        let dir = tempfile::tempdir().unwrap();
        let engine = create_embedding_engine(Some("mock"), Some(dir.path())).unwrap();

        let chunk = DocumentChunk {
            id: "c1".into(),
            doc_id: "d1".into(),
            title: "T".into(),
            content: "cached content".into(),
            chunk_type: "full_document".into(),
            metadata: Default::default(),
        };

        let first = engine.embed_chunks(vec![chunk.clone()]).await.unwrap();
        let second = engine.embed_chunks(vec![chunk]).await.unwrap();
        assert_eq!(first[0].embedding, second[0].embedding);
        assert_eq!(engine.cached_embeddings(), 1);
    }

    #[test]
    fn unknown_explicit_provider_is_config_error() {
        let err = create_embedding_engine(Some("word2vec"), None).unwrap_err();
        assert!(matches!(err, KnowledgeError::Config(_)));
    }

    #[test]
    fn env_resolution_rejects_unknown_values() {
        std::env::set_var("EMBEDDINGS_PROVIDER", "bert");
        let err = resolve_provider().unwrap_err();
        assert!(matches!(err, KnowledgeError::Config(_)));
        std::env::remove_var("EMBEDDINGS_PROVIDER");
    }
}
