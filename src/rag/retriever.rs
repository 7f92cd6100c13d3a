//! Hybrid retrieval: dense + sparse with Reciprocal Rank Fusion.
//!
//! One retrieval pass works as follows:
//!
//! 1. The predicate is split into a store-native part (pushed into the ANN
//!    query) and a client-side residual (applied to results here).
//! 2. Dense candidates come from the vector store, sparse candidates from
//!    the BM25 snapshot; both pools are widened beyond `k` so fusion and
//!    client-side filtering have material to work with.
//! 3. The two rankings are fused by RRF (`score = sum 1/(60 + rank)`), or
//!    unioned in encounter order when RRF is disabled.
//! 4. Survivors are reranked by the cross-encoder and subjected to a
//!    per-paper diversity cap and an overall snippet cap.
//!
//! "Focused" searches (metadata filters active) widen the candidate pools
//! by a factor derived from the active model's context length, and relax
//! both caps.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::db::{SparseIndex, VectorStore};
use crate::filter::{Metadata, Predicate};
use crate::rag::embeddings::{EmbeddingModelId, EmbeddingService};
use crate::rag::reranker::{rerank, CrossEncoder};
use crate::types::Result;

/// RRF constant; controls how quickly rank influence decays.
pub const RRF_K: f32 = 60.0;

/// Default cap on snippets from a single `(title, year)` key.
pub const MAX_PER_PAPER: usize = 3;
/// Default cap on total returned snippets.
pub const MAX_SNIPPETS: usize = 6;
/// Caps used when the search is focused by metadata filters.
pub const FOCUSED_MAX_PER_PAPER: usize = 8;
/// Total-snippet cap for focused searches.
pub const FOCUSED_MAX_SNIPPETS: usize = 10;

/// One retrieved passage with its metadata.
#[derive(Debug, Clone)]
pub struct Passage {
    /// Chunk id (`<item_id>:<chunk_idx>`).
    pub id: String,
    /// Chunk text.
    pub text: String,
    /// Chunk metadata.
    pub metadata: Metadata,
}

/// Per-call retrieval knobs.
#[derive(Debug, Clone, Default)]
pub struct RetrievalOptions {
    /// Filters are active; widen pools and relax caps.
    pub focus: bool,
    /// Context length of the active LM, used to scale focused searches.
    pub context_length: Option<u64>,
    /// Fuse with RRF (true) or plain union in encounter order (false).
    pub use_rrf: bool,
}

impl RetrievalOptions {
    /// Standard RRF retrieval, no focus.
    pub fn rrf() -> Self {
        Self {
            use_rrf: true,
            ..Default::default()
        }
    }
}

/// Candidate-pool multiplier for a focused search, derived from the active
/// model's context length. Unknown lengths stay at 1x.
pub fn width_multiplier(context_length: Option<u64>) -> usize {
    match context_length {
        Some(len) if len >= 1_000_000 => 5,
        Some(len) if len >= 200_000 => 4,
        Some(len) if len >= 100_000 => 3,
        Some(len) if len >= 32_000 => 2,
        _ => 1,
    }
}

/// Fuse two rankings with Reciprocal Rank Fusion.
///
/// Ranks are 1-based; a document missing from a list contributes nothing.
/// Ties break by order of first appearance in the dense list, then the
/// sparse list.
pub fn rrf_fuse(dense: &[String], sparse: &[String], k: usize) -> Vec<String> {
    let mut scores: HashMap<&String, f32> = HashMap::new();
    let mut appearance: HashMap<&String, usize> = HashMap::new();
    let mut next_appearance = 0usize;

    for (rank, id) in dense.iter().enumerate() {
        *scores.entry(id).or_insert(0.0) += 1.0 / (RRF_K + rank as f32 + 1.0);
        appearance.entry(id).or_insert_with(|| {
            let idx = next_appearance;
            next_appearance += 1;
            idx
        });
    }
    for (rank, id) in sparse.iter().enumerate() {
        *scores.entry(id).or_insert(0.0) += 1.0 / (RRF_K + rank as f32 + 1.0);
        appearance.entry(id).or_insert_with(|| {
            let idx = next_appearance;
            next_appearance += 1;
            idx
        });
    }

    let mut fused: Vec<(&String, f32)> = scores.into_iter().collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| appearance[a.0].cmp(&appearance[b.0]))
    });
    fused.truncate(k);
    fused.into_iter().map(|(id, _)| id.clone()).collect()
}

/// Union of two rankings in encounter order (dense first), truncated to `k`.
fn union_fuse(dense: &[String], sparse: &[String], k: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for id in dense.iter().chain(sparse) {
        if seen.insert(id.clone()) {
            out.push(id.clone());
            if out.len() >= k {
                break;
            }
        }
    }
    out
}

/// Diversity key of a passage: `(title, year)`.
fn paper_key(metadata: &Metadata) -> (String, i64) {
    let title = metadata
        .get("title")
        .map(|v| v.to_display_string())
        .unwrap_or_default();
    let year = metadata.get("year").and_then(|v| v.as_i64()).unwrap_or(-1);
    (title, year)
}

/// Hybrid dense + sparse retriever over one collection.
pub struct HybridRetriever {
    store: Arc<dyn VectorStore>,
    sparse: Arc<SparseIndex>,
    embeddings: Arc<EmbeddingService>,
    cross_encoder: Arc<dyn CrossEncoder>,
    model_id: EmbeddingModelId,
}

impl HybridRetriever {
    /// Assemble a retriever over the given collection and indices.
    pub fn new(
        store: Arc<dyn VectorStore>,
        sparse: Arc<SparseIndex>,
        embeddings: Arc<EmbeddingService>,
        cross_encoder: Arc<dyn CrossEncoder>,
        model_id: EmbeddingModelId,
    ) -> Self {
        Self {
            store,
            sparse,
            embeddings,
            cross_encoder,
            model_id,
        }
    }

    /// The embedding model this retriever queries with.
    pub fn model_id(&self) -> EmbeddingModelId {
        self.model_id
    }

    /// Retrieve up to the snippet cap of passages for `query`, reranked and
    /// diversity-capped, best first.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        predicate: Option<&Predicate>,
        options: &RetrievalOptions,
    ) -> Result<Vec<Passage>> {
        let (store_pred, client_pred) = Predicate::split(predicate);

        let multiplier = if options.focus {
            width_multiplier(options.context_length)
        } else {
            1
        };
        let pool_factor = if client_pred.is_some() { 3 } else { 2 };
        let pool = k * pool_factor * multiplier;

        // Dense branch.
        let query_vector = self.embeddings.embed(query, Some(self.model_id)).await?;
        let dense = self
            .store
            .query(&query_vector, pool, store_pred.as_ref())
            .await?;
        let mut dense_ids = Vec::new();
        for (idx, id) in dense.ids[0].iter().enumerate() {
            if let Some(pred) = &client_pred {
                if !pred.matches(&dense.metadatas[0][idx]) {
                    continue;
                }
            }
            dense_ids.push(id.clone());
        }

        // Sparse branch, filtered by both predicate parts.
        let sparse_hits = self.sparse.query(query, pool);
        let sparse_ids = self
            .filter_sparse(sparse_hits, store_pred.as_ref(), client_pred.as_ref())
            .await?;

        // Fusion.
        let fused = if options.use_rrf {
            rrf_fuse(&dense_ids, &sparse_ids, k)
        } else {
            union_fuse(&dense_ids, &sparse_ids, k)
        };
        if fused.is_empty() {
            return Ok(Vec::new());
        }

        // Fetch full documents and restore fusion order.
        let full = self.store.get(Some(&fused), None, None).await?;
        let by_id: HashMap<&String, usize> = full.ids.iter().zip(0..).collect();
        let mut passages: Vec<Passage> = fused
            .iter()
            .filter_map(|id| by_id.get(id).copied())
            .map(|idx| Passage {
                id: full.ids[idx].clone(),
                text: full.documents[idx].clone(),
                metadata: full.metadatas[idx].clone(),
            })
            .collect();

        // Cross-encoder rerank.
        let texts: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();
        let ranked = rerank(self.cross_encoder.clone(), query, &texts, None).await?;
        passages = ranked
            .into_iter()
            .map(|(idx, _)| passages[idx].clone())
            .collect();

        // Diversity and total caps.
        let (max_per_paper, max_snippets) = if options.focus {
            (FOCUSED_MAX_PER_PAPER, FOCUSED_MAX_SNIPPETS)
        } else {
            (MAX_PER_PAPER, MAX_SNIPPETS)
        };
        let mut per_paper: HashMap<(String, i64), usize> = HashMap::new();
        let mut capped = Vec::new();
        for passage in passages {
            let key = paper_key(&passage.metadata);
            let seen = per_paper.entry(key).or_insert(0);
            if *seen >= max_per_paper {
                continue;
            }
            *seen += 1;
            capped.push(passage);
            if capped.len() >= max_snippets {
                break;
            }
        }
        Ok(capped)
    }

    async fn filter_sparse(
        &self,
        hits: Vec<(String, f32)>,
        store_pred: Option<&Predicate>,
        client_pred: Option<&Predicate>,
    ) -> Result<Vec<String>> {
        if hits.is_empty() {
            return Ok(Vec::new());
        }
        if store_pred.is_none() && client_pred.is_none() {
            return Ok(hits.into_iter().map(|(id, _)| id).collect());
        }

        let ids: Vec<String> = hits.iter().map(|(id, _)| id.clone()).collect();
        let records = self.store.get(Some(&ids), None, None).await?;
        let metadata_by_id: HashMap<&String, &Metadata> =
            records.ids.iter().zip(records.metadatas.iter()).collect();

        Ok(ids
            .into_iter()
            .filter(|id| {
                metadata_by_id.get(id).is_some_and(|meta| {
                    store_pred.map(|p| p.matches(meta)).unwrap_or(true)
                        && client_pred.map(|p| p.matches(meta)).unwrap_or(true)
                })
            })
            .collect())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_rrf_fusion_deterministic() {
        // dense [A, B, C], sparse [C, D, A]:
        //   A = 1/61 + 1/63, C = 1/63 + 1/61 (tie), B = 1/62, D = 1/62 (tie)
        // Ties break by first appearance in the dense list.
        let fused = rrf_fuse(&ids(&["A", "B", "C"]), &ids(&["C", "D", "A"]), 3);
        assert_eq!(fused, ids(&["A", "C", "B"]));
    }

    #[test]
    fn test_rrf_result_subset_of_inputs() {
        let dense = ids(&["A", "B"]);
        let sparse = ids(&["C"]);
        let fused = rrf_fuse(&dense, &sparse, 10);
        let union: HashSet<_> = dense.iter().chain(&sparse).collect();
        assert!(fused.iter().all(|id| union.contains(id)));
        assert_eq!(fused.len(), 3);
    }

    #[test]
    fn test_rrf_scores_match_formula() {
        // Single-element lists: both documents get exactly 1/61.
        let fused = rrf_fuse(&ids(&["A"]), &ids(&["B"]), 2);
        // Equal scores, A appeared first.
        assert_eq!(fused, ids(&["A", "B"]));
    }

    #[test]
    fn test_union_fuse_keeps_encounter_order() {
        let fused = union_fuse(&ids(&["A", "B"]), &ids(&["B", "C", "D"]), 3);
        assert_eq!(fused, ids(&["A", "B", "C"]));
    }

    #[test]
    fn test_width_multiplier_tiers() {
        assert_eq!(width_multiplier(None), 1);
        assert_eq!(width_multiplier(Some(8_000)), 1);
        assert_eq!(width_multiplier(Some(32_000)), 2);
        assert_eq!(width_multiplier(Some(128_000)), 3);
        assert_eq!(width_multiplier(Some(200_000)), 4);
        assert_eq!(width_multiplier(Some(2_000_000)), 5);
    }
}
