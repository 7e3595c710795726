//! Retrieval engine
//!
//! Embed the query, pull `retrieve_k = max(50, 2k)` candidates from the
//! vector store under metadata filters, drop anything below
//! `min_score`, rerank, and return the top `k` with provenance. The
//! convenience queries compose this with the filters the analysts need,
//! widening to free text when a strict id filter finds nothing.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::debug;

use crate::embed::EmbeddingEngine;
use crate::rerank::{NoneReranker, Reranker};
use crate::store::{ScoredRecord, SharedStore};
use crate::Result;

/// Candidates fetched from the store before reranking.
pub const DEFAULT_RETRIEVE_K: usize = 50;

/// One retrieval hit with provenance.
#[derive(Debug, Clone)]
pub struct RagResult {
    pub content: String,
    pub score: f32,
    pub original_score: Option<f32>,
    pub source: String,
    pub doc_type: String,
    pub chunk_id: String,
    pub doc_id: String,
    pub metadata: HashMap<String, Value>,
}

impl RagResult {
    fn from_record(record: ScoredRecord) -> Self {
        let source = record
            .meta_str("source")
            .unwrap_or("unknown")
            .to_string();
        let doc_type = record
            .meta_str("doc_type")
            .unwrap_or("unknown")
            .to_string();
        Self {
            content: record.content,
            score: record.score,
            original_score: record.original_score,
            source,
            doc_type,
            chunk_id: record.chunk_id,
            doc_id: record.doc_id,
            metadata: record.metadata,
        }
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// Query parameters.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub query: String,
    pub filters: HashMap<String, String>,
    pub k: usize,
    pub min_score: f32,
    pub max_results: usize,
}

impl QueryContext {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            filters: HashMap::new(),
            k: 10,
            min_score: 0.0,
            max_results: 100,
        }
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }
}

pub struct RetrievalEngine {
    store: SharedStore,
    engine: EmbeddingEngine,
    reranker: Box<dyn Reranker>,
}

impl RetrievalEngine {
    pub fn new(store: SharedStore, engine: EmbeddingEngine, reranker: Box<dyn Reranker>) -> Self {
        Self {
            store,
            engine,
            reranker,
        }
    }

    pub fn without_reranker(store: SharedStore, engine: EmbeddingEngine) -> Self {
        Self::new(store, engine, Box::new(NoneReranker))
    }

    /// Execute one retrieval query.
    pub async fn query(&self, ctx: &QueryContext) -> Result<Vec<RagResult>> {
        debug!("retrieval query '{}' filters={:?}", ctx.query, ctx.filters);

        let embedding = self.engine.embed_query(&ctx.query).await?;
        let retrieve_k = DEFAULT_RETRIEVE_K.max(ctx.k * 2).min(ctx.max_results);

        let filters = if ctx.filters.is_empty() {
            None
        } else {
            Some(&ctx.filters)
        };
        let mut candidates = self
            .store
            .read()
            .await
            .query(&embedding, retrieve_k, filters)
            .await?;
        candidates.retain(|c| c.score >= ctx.min_score);

        let ranked = self.reranker.rerank(&ctx.query, candidates, ctx.k).await?;
        let results: Vec<RagResult> = ranked.into_iter().map(RagResult::from_record).collect();
        debug!(
            "retrieval returned {} results (reranker={})",
            results.len(),
            self.reranker.name()
        );
        Ok(results)
    }

    /// Lookup one ATT&CK technique; falls back to free text when the
    /// strict `attack_id` filter matches nothing.
    pub async fn query_by_attack_technique(
        &self,
        technique_id: &str,
        k: usize,
    ) -> Result<Vec<RagResult>> {
        let strict = QueryContext::new(format!("ATT&CK technique {technique_id}"))
            .with_filter("attack_id", technique_id)
            .with_k(k);
        let results = self.query(&strict).await?;
        if !results.is_empty() {
            return Ok(results);
        }
        let wide = QueryContext::new(format!("{technique_id} attack technique")).with_k(k);
        self.query(&wide).await
    }

    /// Lookup one CVE; widens like the technique lookup.
    pub async fn query_by_cve(&self, cve_id: &str, k: usize) -> Result<Vec<RagResult>> {
        let strict = QueryContext::new(format!("vulnerability {cve_id}"))
            .with_filter("cve_id", cve_id)
            .with_k(k);
        let results = self.query(&strict).await?;
        if !results.is_empty() {
            return Ok(results);
        }
        let wide = QueryContext::new(format!("{cve_id} vulnerability")).with_k(k);
        self.query(&wide).await
    }

    /// Free-text search over a set of indicators or keywords.
    pub async fn query_by_indicators(
        &self,
        indicators: &[String],
        k: usize,
    ) -> Result<Vec<RagResult>> {
        let ctx = QueryContext::new(indicators.join(" ")).with_k(k);
        self.query(&ctx).await
    }

    /// Detection rules related to an activity; widens across the sigma
    /// chunk types and dedups when the typed filter comes up short.
    pub async fn query_for_detection_rules(
        &self,
        activity: &str,
        k: usize,
    ) -> Result<Vec<RagResult>> {
        let ctx = QueryContext::new(format!("detection rule {activity}"))
            .with_filter("doc_type", "sigma_rule")
            .with_k(k);
        let mut results = self.query(&ctx).await?;

        if results.len() < k {
            for chunk_type in ["sigma_overview", "sigma_detection"] {
                let widened = QueryContext::new(format!("detection rule {activity}"))
                    .with_filter("chunk_type", chunk_type)
                    .with_k(k);
                results.extend(self.query(&widened).await?);
            }
            results.sort_by(|a, b| b.score.partial_cmp(&a.score).expect("scores are finite"));
            let mut seen = HashSet::new();
            results.retain(|r| seen.insert(r.chunk_id.clone()));
            results.truncate(k);
        }
        Ok(results)
    }

    /// Vulnerabilities affecting a product, across CVE and KEV corpora.
    pub async fn query_for_vulnerabilities(
        &self,
        product: &str,
        k: usize,
    ) -> Result<Vec<RagResult>> {
        let cve_ctx = QueryContext::new(format!("{product} vulnerability CVE"))
            .with_filter("doc_type", "cve")
            .with_k(k);
        let mut results = self.query(&cve_ctx).await?;

        let kev_ctx = QueryContext::new(format!("{product} vulnerability CVE"))
            .with_filter("doc_type", "cisa_kev")
            .with_k(k);
        results.extend(self.query(&kev_ctx).await?);

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).expect("scores are finite"));
        results.truncate(k);
        Ok(results)
    }

    /// Per-technique explanations for a chain of techniques.
    pub async fn explain_attack_chain(
        &self,
        techniques: &[String],
        k: usize,
    ) -> Result<HashMap<String, Vec<RagResult>>> {
        let mut explanations = HashMap::new();
        for technique in techniques {
            let results = self.query_by_attack_technique(technique, k).await?;
            explanations.insert(technique.clone(), results);
        }
        Ok(explanations)
    }

    /// Other techniques in the same tactic as `base_technique`.
    pub async fn find_related_techniques(
        &self,
        base_technique: &str,
        k: usize,
    ) -> Result<Vec<RagResult>> {
        let base = self.query_by_attack_technique(base_technique, 2).await?;
        let Some(tactic) = base
            .iter()
            .find_map(|r| r.meta_str("tactic").map(str::to_string))
        else {
            return Ok(Vec::new());
        };

        let ctx = QueryContext::new(format!("{tactic} tactic techniques"))
            .with_filter("tactic", &tactic)
            .with_filter("doc_type", "attack_technique")
            .with_k(k + 2);
        let results = self.query(&ctx).await?;
        Ok(results
            .into_iter()
            .filter(|r| r.meta_str("attack_id") != Some(base_technique))
            .take(k)
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Result analysis helpers
// ---------------------------------------------------------------------------

/// ATT&CK ids present in a result set: from `attack_id` metadata, from
/// comma-joined `attack_techniques` metadata, and from `Tdddd(.ddd)`
/// mentions in content.
pub fn extract_attack_techniques(results: &[RagResult]) -> HashSet<String> {
    let mut techniques = HashSet::new();
    for result in results {
        if let Some(id) = result.meta_str("attack_id") {
            techniques.insert(id.to_string());
        }
        if let Some(Value::Array(items)) = result.metadata.get("attack_techniques") {
            for item in items {
                if let Some(id) = item.as_str() {
                    techniques.insert(id.to_string());
                }
            }
        }
        scan_technique_ids(&result.content, &mut techniques);
    }
    techniques
}

/// `T1059` / `T1021.004` style mentions in free text. Only standalone
/// tokens count: `XT1234` and `T12345` are not technique ids.
pub fn scan_technique_ids(text: &str, out: &mut HashSet<String>) {
    let bytes = text.as_bytes();
    let n = bytes.len();
    let mut i = 0;
    while i < n {
        let starts_token = i == 0 || !bytes[i - 1].is_ascii_alphanumeric();
        if bytes[i] == b'T' && starts_token {
            let digits = bytes[i + 1..].iter().take_while(|b| b.is_ascii_digit()).count();
            if digits == 4 {
                let mut end = i + 5;
                // Optional sub-technique suffix: exactly three digits.
                if bytes.get(end) == Some(&b'.') {
                    let sub_digits = bytes[end + 1..]
                        .iter()
                        .take_while(|b| b.is_ascii_digit())
                        .count();
                    if sub_digits == 3 {
                        end += 4;
                    }
                }
                let ends_token = end >= n || !bytes[end].is_ascii_alphanumeric();
                if ends_token {
                    out.insert(text[i..end].to_string());
                    i = end;
                    continue;
                }
            }
        }
        i += 1;
    }
}

/// Tactic histogram over a result set.
pub fn summarize_tactics(results: &[RagResult]) -> HashMap<String, usize> {
    let mut tactics = HashMap::new();
    for result in results {
        if let Some(tactic) = result.meta_str("tactic") {
            *tactics.entry(tactic.to_string()).or_default() += 1;
        }
    }
    tactics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunkers::SmartChunker;
    use crate::corpus;
    use crate::embed::create_embedding_engine;
    use crate::index::IndexBuilder;
    use crate::manifest::IndexManifest;
    use crate::rerank::MockReranker;
    use crate::store::{self, flat::FlatIndexStore};

    async fn engine_with_demo_corpus(dir: &std::path::Path) -> RetrievalEngine {
        let embed = create_embedding_engine(Some("mock"), None).unwrap();
        let shared = store::shared(Box::new(FlatIndexStore::new(embed.dimension(), dir)));
        let manifest = IndexManifest::open(dir).unwrap();
        let mut builder = IndexBuilder::new(
            shared.clone(),
            create_embedding_engine(Some("mock"), None).unwrap(),
            SmartChunker::default(),
            manifest,
        )
        .await
        .unwrap();
        builder.build_index(&corpus::demo_documents()).await.unwrap();

        RetrievalEngine::new(shared, embed, Box::new(MockReranker))
    }

    #[tokio::test]
    async fn technique_lookup_uses_strict_filter() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_demo_corpus(dir.path()).await;

        let results = engine.query_by_attack_technique("T1110", 3).await.unwrap();
        assert!(!results.is_empty());
        for result in &results {
            assert_eq!(result.meta_str("attack_id"), Some("T1110"));
        }
    }

    #[tokio::test]
    async fn unknown_technique_falls_back_to_free_text() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_demo_corpus(dir.path()).await;

        // T9999 is not indexed; the widened free-text query still runs.
        let results = engine.query_by_attack_technique("T9999", 3).await.unwrap();
        for result in &results {
            assert_ne!(result.meta_str("attack_id"), Some("T9999"));
        }
    }

    #[tokio::test]
    async fn detection_rule_query_filters_to_sigma() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_demo_corpus(dir.path()).await;

        let results = engine
            .query_for_detection_rules("ssh brute force", 4)
            .await
            .unwrap();
        assert!(!results.is_empty());
        let mut seen = HashSet::new();
        for result in &results {
            assert!(seen.insert(result.chunk_id.clone()), "duplicate chunk id");
        }
    }

    #[tokio::test]
    async fn min_score_drops_weak_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_demo_corpus(dir.path()).await;

        let ctx = QueryContext::new("ssh brute force")
            .with_k(10)
            .with_min_score(2.0); // impossible threshold for cosine
        let results = engine.query(&ctx).await.unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn technique_scanner_finds_standalone_ids() {
        let mut out = HashSet::new();
        scan_technique_ids("Chain: T1110 then T1021.004, not XT1234 or T12", &mut out);
        assert!(out.contains("T1110"));
        assert!(out.contains("T1021.004"));
        assert!(!out.contains("T1234"));
        assert!(!out.contains("T12"));
    }

    #[test]
    fn tactic_summary_counts() {
        let make = |tactic: &str| RagResult {
            content: String::new(),
            score: 1.0,
            original_score: None,
            source: "test".into(),
            doc_type: "attack_technique".into(),
            chunk_id: "c".into(),
            doc_id: "d".into(),
            metadata: HashMap::from([(
                "tactic".to_string(),
                serde_json::json!(tactic),
            )]),
        };
        let results = vec![
            make("Credential Access"),
            make("Credential Access"),
            make("Lateral Movement"),
        ];
        let summary = summarize_tactics(&results);
        assert_eq!(summary["Credential Access"], 2);
        assert_eq!(summary["Lateral Movement"], 1);
    }
}
