//! Persistent BM25 sparse index.
//!
//! The index is rebuilt offline after bulk writes and persisted as a JSON
//! snapshot beside the vector collection. Readers load it lazily on first
//! use and memoise it in-process; a missing snapshot simply yields empty
//! sparse results, so retrieval degrades to pure dense search.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::{AppError, Result};

// ============================================================================
// BM25 Index
// ============================================================================

/// BM25 (Okapi) index over tokenized chunk texts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bm25Index {
    /// Chunk id -> tokenized content.
    documents: HashMap<String, Vec<String>>,
    /// Chunk ids in indexing order.
    ids: Vec<String>,
    /// Term -> number of documents containing it.
    document_frequencies: HashMap<String, usize>,
    /// Average document length in tokens.
    avg_doc_length: f32,
    /// Term-frequency saturation parameter.
    k1: f32,
    /// Length-normalisation parameter.
    b: f32,
}

impl Bm25Index {
    /// Create an empty index with standard parameters.
    pub fn new() -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            ..Default::default()
        }
    }

    /// Tokenisation: lowercase, whitespace split.
    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    /// Full rebuild from all chunks of the collection.
    pub fn build<'a>(chunks: impl Iterator<Item = (&'a str, &'a str)>) -> Self {
        let mut index = Self::new();
        for (id, text) in chunks {
            let tokens = Self::tokenize(text);
            let unique: HashSet<&String> = tokens.iter().collect();
            for term in unique {
                *index.document_frequencies.entry(term.clone()).or_insert(0) += 1;
            }
            index.ids.push(id.to_string());
            index.documents.insert(id.to_string(), tokens);
        }

        if !index.documents.is_empty() {
            let total: usize = index.documents.values().map(Vec::len).sum();
            index.avg_doc_length = total as f32 / index.documents.len() as f32;
        }
        index
    }

    fn idf(&self, term: &str) -> f32 {
        let df = self.document_frequencies.get(term).copied().unwrap_or(0) as f32;
        let n = self.documents.len() as f32;
        if df == 0.0 || n == 0.0 {
            return 0.0;
        }
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    fn score_document(&self, tokens: &[String], query_terms: &[String]) -> f32 {
        let doc_len = tokens.len() as f32;
        let mut term_freq: HashMap<&str, usize> = HashMap::new();
        for token in tokens {
            *term_freq.entry(token.as_str()).or_insert(0) += 1;
        }

        let mut score = 0.0;
        for term in query_terms {
            let tf = term_freq.get(term.as_str()).copied().unwrap_or(0) as f32;
            let idf = self.idf(term);
            let numerator = tf * (self.k1 + 1.0);
            let denominator =
                tf + self.k1 * (1.0 - self.b + self.b * doc_len / self.avg_doc_length.max(1.0));
            score += idf * numerator / denominator;
        }
        score
    }

    /// Top-k chunks for a query, positive scores only, descending.
    pub fn query(&self, query: &str, k: usize) -> Vec<(String, f32)> {
        let query_terms = Self::tokenize(query);
        if query_terms.is_empty() || self.documents.is_empty() {
            return Vec::new();
        }

        let mut results: Vec<(String, f32)> = self
            .ids
            .iter()
            .filter_map(|id| self.documents.get(id).map(|tokens| (id, tokens)))
            .map(|(id, tokens)| (id.clone(), self.score_document(tokens, &query_terms)))
            .filter(|(_, score)| *score > 0.0)
            .collect();

        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(k);
        results
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether the index holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Chunk ids present in the index.
    pub fn chunk_ids(&self) -> impl Iterator<Item = &String> {
        self.ids.iter()
    }

    /// Persist the index as JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self)
            .map_err(|e| AppError::Internal(format!("failed to serialize BM25 index: {e}")))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AppError::Internal(format!("failed to create index dir: {e}")))?;
        }
        std::fs::write(path, json)
            .map_err(|e| AppError::Internal(format!("failed to write BM25 index file: {e}")))?;
        Ok(())
    }

    /// Load a previously persisted index.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AppError::Internal(format!("failed to read BM25 index file: {e}")))?;
        serde_json::from_str(&raw)
            .map_err(|e| AppError::Internal(format!("failed to parse BM25 index file: {e}")))
    }
}

// ============================================================================
// Sparse Index Handle
// ============================================================================

/// Process-wide handle to the on-disk BM25 snapshot.
///
/// Loads lazily on first query and memoises the result. An absent or
/// unreadable snapshot is logged and treated as "no sparse index": queries
/// return the empty set and retrieval continues dense-only.
pub struct SparseIndex {
    path: PathBuf,
    // Outer None: not yet attempted. Inner None: attempted, nothing usable.
    cached: RwLock<Option<Option<Bm25Index>>>,
}

impl SparseIndex {
    /// Handle for the snapshot at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: RwLock::new(None),
        }
    }

    /// Snapshot path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_loaded(&self) {
        if self.cached.read().is_some() {
            return;
        }
        let loaded = if self.path.exists() {
            match Bm25Index::load(&self.path) {
                Ok(index) => Some(index),
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e,
                        "failed to load BM25 index; sparse retrieval disabled");
                    None
                }
            }
        } else {
            tracing::debug!(path = %self.path.display(),
                "no BM25 index on disk; sparse retrieval returns nothing");
            None
        };
        *self.cached.write() = Some(loaded);
    }

    /// Top-k sparse results, or the empty set when no index exists.
    pub fn query(&self, query: &str, k: usize) -> Vec<(String, f32)> {
        self.ensure_loaded();
        self.cached
            .read()
            .as_ref()
            .and_then(|inner| inner.as_ref())
            .map(|index| index.query(query, k))
            .unwrap_or_default()
    }

    /// Rebuild the index over the whole collection and persist it.
    pub fn rebuild<'a>(&self, chunks: impl Iterator<Item = (&'a str, &'a str)>) -> Result<usize> {
        let index = Bm25Index::build(chunks);
        index.save(&self.path)?;
        let len = index.len();
        *self.cached.write() = Some(Some(index));
        tracing::info!(chunks = len, path = %self.path.display(), "BM25 index rebuilt");
        Ok(len)
    }

    /// Chunk ids currently in the loaded index, if any.
    pub fn chunk_ids(&self) -> Vec<String> {
        self.ensure_loaded();
        self.cached
            .read()
            .as_ref()
            .and_then(|inner| inner.as_ref())
            .map(|index| index.chunk_ids().cloned().collect())
            .unwrap_or_default()
    }
}

// ============================================================================
// Tests
// ============================================================================
