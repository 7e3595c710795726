#![allow(clippy::items_after_statements)]
#![allow(clippy::format_push_string)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::unused_async)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::type_complexity)]
#![allow(clippy::similar_names)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
//! Countersign knowledge layer
//!
//! Retrieval-augmented context for the analysts:
//! - **Corpus**: curated security documents (ATT&CK techniques, CVEs,
//!   sigma rules, CISA KEV entries)
//! - **Chunkers**: per-doc-type strategies producing deterministic
//!   retrieval units
//! - **Embedders**: remote / local / mock providers behind one trait,
//!   with a content-hash embedding cache
//! - **Vector stores**: flat file-backed inner-product index and a
//!   managed-service backend behind one contract
//! - **Manifest**: authoritative `doc_id -> content_hash` record driving
//!   incremental index reconciliation
//! - **Retrieval**: embed -> top-N -> filter -> rerank -> top-k with
//!   provenance

pub mod chunkers;
pub mod corpus;
pub mod embed;
pub mod index;
pub mod manifest;
pub mod rerank;
pub mod retrieval;
pub mod store;
pub mod types;

pub use chunkers::SmartChunker;
pub use embed::{EmbeddingEngine, Embedder};
pub use index::IndexBuilder;
pub use manifest::IndexManifest;
pub use rerank::Reranker;
pub use retrieval::{QueryContext, RagResult, RetrievalEngine};
pub use store::{ChunkRecord, ScoredRecord, SharedStore, VectorStore};
pub use types::{DocumentChunk, KnowledgeDocument};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error(transparent)]
    Config(#[from] cs_core::ConfigError),

    #[error("vector dimension mismatch: store is {store}, embedder is {embedder}")]
    DimensionMismatch { store: usize, embedder: usize },

    #[error("embedding provider failure: {0}")]
    Embedding(String),

    #[error("vector store failure: {0}")]
    Store(String),

    #[error("reranker failure: {0}")]
    Rerank(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, KnowledgeError>;
