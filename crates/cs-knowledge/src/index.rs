//! Index builder
//!
//! Owns the manifest and drives chunk -> embed -> upsert -> save.
//! `update_documents` is incremental: it diffs against the manifest,
//! deletes the vectors of changed and removed documents, and re-embeds
//! only new and changed ones. Running it twice with the same input is a
//! no-op on the second run.

use std::collections::{HashMap, HashSet};

use tracing::info;

use crate::chunkers::SmartChunker;
use crate::embed::EmbeddingEngine;
use crate::manifest::IndexManifest;
use crate::store::{ChunkRecord, SharedStore};
use crate::types::{DocumentChunk, KnowledgeDocument};
use crate::{KnowledgeError, Result};

/// Outcome of a full or incremental build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub total_documents: usize,
    pub new: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub upserted_chunks: usize,
    pub deleted_vectors: usize,
}

pub struct IndexBuilder {
    store: SharedStore,
    engine: EmbeddingEngine,
    chunker: SmartChunker,
    manifest: IndexManifest,
}

impl IndexBuilder {
    /// Construction checks the store/embedder dimension contract.
    pub async fn new(
        store: SharedStore,
        engine: EmbeddingEngine,
        chunker: SmartChunker,
        manifest: IndexManifest,
    ) -> Result<Self> {
        let store_dim = store.read().await.dimension();
        if store_dim != engine.dimension() {
            return Err(KnowledgeError::DimensionMismatch {
                store: store_dim,
                embedder: engine.dimension(),
            });
        }
        Ok(Self {
            store,
            engine,
            chunker,
            manifest,
        })
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    /// Full build: chunk and embed every document, upsert, save, record
    /// the manifest.
    pub async fn build_index(&mut self, documents: &[KnowledgeDocument]) -> Result<BuildStats> {
        info!("building index from {} documents", documents.len());

        let chunks = self.chunker.chunk_documents(documents);
        let upserted = self.index_chunks(documents, chunks).await?;
        self.store.read().await.save().await?;
        self.manifest.save()?;

        Ok(BuildStats {
            total_documents: documents.len(),
            new: documents.len(),
            upserted_chunks: upserted,
            ..BuildStats::default()
        })
    }

    /// Incremental update driven by the manifest diff.
    pub async fn update_documents(
        &mut self,
        documents: &[KnowledgeDocument],
    ) -> Result<BuildStats> {
        let diff = self.manifest.compute_diff(documents);
        info!(
            "incremental update: {} new, {} changed, {} unchanged, {} removed",
            diff.new.len(),
            diff.changed.len(),
            diff.unchanged.len(),
            diff.removed.len()
        );

        let mut stats = BuildStats {
            total_documents: documents.len(),
            new: diff.new.len(),
            changed: diff.changed.len(),
            unchanged: diff.unchanged.len(),
            removed: diff.removed.len(),
            ..BuildStats::default()
        };

        // Changed docs get their old vectors dropped before re-insert.
        let mut delete_ids: HashSet<String> = diff.removed.iter().cloned().collect();
        for doc in &diff.changed {
            delete_ids.insert(doc.id.clone());
        }
        if !delete_ids.is_empty() {
            stats.deleted_vectors = self
                .store
                .write()
                .await
                .delete_by_doc_ids(&delete_ids)
                .await?;
            for doc_id in &diff.removed {
                self.manifest.remove(doc_id);
            }
        }

        let to_index: Vec<KnowledgeDocument> =
            diff.new.into_iter().chain(diff.changed).collect();
        if !to_index.is_empty() {
            let chunks = self.chunker.chunk_documents(&to_index);
            stats.upserted_chunks = self.index_chunks(&to_index, chunks).await?;
        }

        self.store.read().await.save().await?;
        self.manifest.save()?;

        info!(
            "incremental update completed: {} chunks upserted, {} vectors deleted",
            stats.upserted_chunks, stats.deleted_vectors
        );
        Ok(stats)
    }

    async fn index_chunks(
        &mut self,
        documents: &[KnowledgeDocument],
        chunks: Vec<DocumentChunk>,
    ) -> Result<usize> {
        let embedded = self.engine.embed_chunks(chunks).await?;
        let count = embedded.len();

        let mut doc_chunks: HashMap<String, Vec<String>> = HashMap::new();
        for item in &embedded {
            doc_chunks
                .entry(item.chunk.doc_id.clone())
                .or_default()
                .push(item.chunk.id.clone());
        }

        let records: Vec<ChunkRecord> = embedded
            .into_iter()
            .map(|item| ChunkRecord::from_chunk(item.chunk, item.embedding))
            .collect();
        self.store.write().await.upsert(records).await?;

        for doc in documents {
            let mut metadata = HashMap::new();
            metadata.insert("doc_type".to_string(), serde_json::json!(doc.doc_type));
            metadata.insert("title".to_string(), serde_json::json!(doc.title));
            self.manifest.set(
                &doc.id,
                doc.content_hash(),
                doc.meta_str("source_revision").unwrap_or_default().to_string(),
                doc_chunks.remove(&doc.id).unwrap_or_default(),
                metadata,
            );
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::create_embedding_engine;
    use crate::manifest::IndexManifest;
    use crate::store::{self, flat::FlatIndexStore};

    async fn builder_in(dir: &std::path::Path) -> IndexBuilder {
        let engine = create_embedding_engine(Some("mock"), None).unwrap();
        let store = store::shared(Box::new(FlatIndexStore::new(engine.dimension(), dir)));
        let manifest = IndexManifest::open(dir).unwrap();
        IndexBuilder::new(store, engine, SmartChunker::default(), manifest)
            .await
            .unwrap()
    }

    fn docs(n: usize) -> Vec<KnowledgeDocument> {
        (0..n)
            .map(|i| {
                KnowledgeDocument::new(
                    format!("doc_{i}"),
                    format!("Document {i}"),
                    format!("unique content body number {i}"),
                    "osint_note",
                    "test",
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn dimension_mismatch_is_a_construction_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = create_embedding_engine(Some("mock"), None).unwrap();
        let store = store::shared(Box::new(FlatIndexStore::new(32, dir.path())));
        let manifest = IndexManifest::open(dir.path()).unwrap();
        let err = IndexBuilder::new(store, engine, SmartChunker::default(), manifest)
            .await
            .unwrap_err();
        assert!(matches!(err, KnowledgeError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn rebuild_with_same_documents_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = docs(100);

        let mut builder = builder_in(dir.path()).await;
        let first = builder.update_documents(&corpus).await.unwrap();
        assert_eq!(first.new, 100);
        assert_eq!(first.upserted_chunks, 100);

        let second = builder.update_documents(&corpus).await.unwrap();
        assert_eq!(second.new, 0);
        assert_eq!(second.changed, 0);
        assert_eq!(second.removed, 0);
        assert_eq!(second.upserted_chunks, 0);
        assert_eq!(second.deleted_vectors, 0);
        assert_eq!(second.unchanged, 100);
    }

    #[tokio::test]
    async fn update_reflects_changed_and_removed_documents() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = builder_in(dir.path()).await;

        let mut corpus = docs(3);
        builder.update_documents(&corpus).await.unwrap();

        corpus[0].content = "revised body".to_string();
        corpus.pop(); // doc_2 removed
        let stats = builder.update_documents(&corpus).await.unwrap();
        assert_eq!(stats.changed, 1);
        assert_eq!(stats.removed, 1);
        assert_eq!(stats.unchanged, 1);
        // doc_0's old vector and doc_2's vector are both gone.
        assert_eq!(stats.deleted_vectors, 2);
        assert_eq!(stats.upserted_chunks, 1);

        assert!(builder.manifest().get("doc_2").is_none());
        assert!(builder.manifest().get("doc_0").is_some());
    }

    #[tokio::test]
    async fn build_equals_update_from_empty() {
        let corpus = docs(10);
        let query = "unique content body number 4";

        let dir_a = tempfile::tempdir().unwrap();
        let mut built = builder_in(dir_a.path()).await;
        built.build_index(&corpus).await.unwrap();

        let dir_b = tempfile::tempdir().unwrap();
        let mut updated = builder_in(dir_b.path()).await;
        updated.update_documents(&[]).await.unwrap();
        updated.update_documents(&corpus).await.unwrap();

        let engine = create_embedding_engine(Some("mock"), None).unwrap();
        let qvec = engine.embed_query(query).await.unwrap();

        let hits_a = built
            .store
            .read()
            .await
            .query(&qvec, 5, None)
            .await
            .unwrap();
        let hits_b = updated
            .store
            .read()
            .await
            .query(&qvec, 5, None)
            .await
            .unwrap();

        let ids_a: Vec<&str> = hits_a.iter().map(|h| h.chunk_id.as_str()).collect();
        let ids_b: Vec<&str> = hits_b.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids_a, ids_b);
    }
}
