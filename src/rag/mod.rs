//! Retrieval components.
//!
//! - [`embeddings`] - sentence-embedding adapter with a model registry and
//!   a per-model dimension invariant
//! - [`reranker`] - cross-encoder passage reranking
//! - [`retriever`] - hybrid dense + sparse retrieval with RRF fusion,
//!   predicate push-down, and diversity capping

pub mod embeddings;
pub mod reranker;
pub mod retriever;

pub use embeddings::{EmbeddingModelId, EmbeddingService, TextEncoder};
pub use reranker::{rerank, CrossEncoder};
pub use retriever::{HybridRetriever, Passage, RetrievalOptions};
