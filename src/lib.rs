//! # Stacks
//!
//! A local research-assistant server that turns a personal reference
//! library (PDFs plus bibliographic metadata) into a hybrid-retrieval,
//! multi-turn, citation-grounded question-answering engine.
//!
//! ## Overview
//!
//! Stacks can be used in two ways:
//!
//! 1. **As a standalone server** - run the `stacks-server` binary
//! 2. **As a library** - import components into your own Rust project
//!
//! A background [`index::Indexer`] extracts page-aware text from PDFs,
//! chunks it, embeds it, and writes it plus a BM25 sparse index into a
//! persistent vector store. The [`chat::ResearchChat`] controller answers
//! questions by condensing follow-ups into standalone queries, retrieving
//! passages through the hybrid [`rag::HybridRetriever`], and synthesising
//! an answer through a pluggable LM backend.
//!
//! ## Modules
//!
//! - [`api`] - HTTP handlers and routes
//! - [`catalog`] - catalogue and PDF-extraction interfaces
//! - [`chat`] - conversational RAG controller, condenser, extractor, prompts
//! - [`db`] - vector store, embedded local store, BM25 index
//! - [`filter`] - metadata predicate engine
//! - [`index`] - background indexing pipeline and chunker
//! - [`llm`] - provider abstraction over nine LM backends
//! - [`migrate`] - metadata versioning and migration
//! - [`profile`] - settings and the on-disk data layout
//! - [`rag`] - embeddings, reranking, hybrid retrieval
//! - [`types`] - common types and error handling
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `local-embeddings` | fastembed ONNX embedding + reranker models (default) |

#![warn(missing_docs)]

/// HTTP handlers and routes.
pub mod api;
/// Catalogue and document-source interfaces.
pub mod catalog;
/// Conversational RAG controller and its helpers.
pub mod chat;
/// Storage layer: vector store, embedded store, BM25.
pub mod db;
/// Metadata predicate engine.
pub mod filter;
/// Background indexing pipeline.
pub mod index;
/// LLM provider abstraction.
pub mod llm;
/// Metadata versioning and migration.
pub mod migrate;
/// Profile settings and data layout.
pub mod profile;
/// Retrieval components.
pub mod rag;
/// Common types and error handling.
pub mod types;

use std::sync::Arc;

// Re-export commonly used types
pub use chat::{ConversationStore, ResearchChat};
pub use db::{EmbeddedVectorStore, SparseIndex, VectorStore};
pub use filter::{build_predicate, FilterArgs, Predicate};
pub use index::Indexer;
pub use llm::{ProviderKind, ProviderManager, ProviderRegistry};
pub use rag::{EmbeddingModelId, EmbeddingService, HybridRetriever};
pub use types::{AppError, Result};

/// Application state shared across HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// The chat controller.
    pub chat: Arc<ResearchChat>,
    /// The background indexer.
    pub indexer: Arc<Indexer>,
    /// Provider routing and credentials.
    pub provider: Arc<ProviderManager>,
    /// Metadata version detection.
    pub versions: Arc<migrate::MetadataVersionManager>,
    /// Metadata migration runner.
    pub migration: Arc<migrate::MetadataMigration>,
    /// Profile settings store.
    pub profile: Arc<profile::ProfileManager>,
    /// The active vector collection.
    pub store: Arc<dyn VectorStore>,
    /// The bibliographic catalogue.
    pub catalogue: Arc<dyn catalog::CatalogueReader>,
    /// The embedding model the process was started with.
    pub embedding_model: EmbeddingModelId,
}
