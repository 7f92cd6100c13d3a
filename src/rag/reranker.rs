//! Cross-encoder reranking.
//!
//! After hybrid retrieval the candidate passages are rescored jointly with
//! the query by a cross-encoder, which is slower but considerably more
//! accurate than embedding cosine similarity. The model sits behind the
//! [`CrossEncoder`] trait; the `local-embeddings` feature provides a
//! fastembed-backed implementation, loaded once per process.

use std::sync::Arc;

use tokio::task::spawn_blocking;

use crate::types::{AppError, Result};

/// A loaded cross-encoder scoring model. Purely CPU-bound.
pub trait CrossEncoder: Send + Sync {
    /// Relevance score for each `(query, passage)` pair, parallel to
    /// `passages`. Higher is more relevant.
    fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>>;
}

/// Rerank passages against a query.
///
/// Returns `(original_index, score)` pairs sorted by score descending,
/// optionally truncated to `top_k`. Runs the model on the blocking pool.
pub async fn rerank(
    encoder: Arc<dyn CrossEncoder>,
    query: &str,
    passages: &[String],
    top_k: Option<usize>,
) -> Result<Vec<(usize, f32)>> {
    if passages.is_empty() {
        return Ok(Vec::new());
    }

    let query = query.to_string();
    let passages = passages.to_vec();
    let scores = spawn_blocking(move || encoder.score(&query, &passages))
        .await
        .map_err(|e| AppError::Internal(format!("rerank task failed: {e}")))??;

    let mut ranked: Vec<(usize, f32)> = scores.into_iter().enumerate().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    if let Some(top_k) = top_k {
        ranked.truncate(top_k);
    }
    Ok(ranked)
}

// ============================================================================
// Fastembed Backend
// ============================================================================

#[cfg(feature = "local-embeddings")]
mod fastembed_impl {
    use super::*;
    use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
    use parking_lot::Mutex;

    /// fastembed cross-encoder (BGE reranker base).
    pub struct FastembedCrossEncoder {
        model: Mutex<TextRerank>,
    }

    impl FastembedCrossEncoder {
        /// Load the reranker model, downloading weights on first use.
        pub fn new() -> Result<Self> {
            let model = TextRerank::try_new(
                RerankInitOptions::new(RerankerModel::BGERerankerBase)
                    .with_show_download_progress(true),
            )
            .map_err(|e| AppError::Configuration(format!("failed to load reranker: {e}")))?;
            Ok(Self {
                model: Mutex::new(model),
            })
        }
    }

    impl CrossEncoder for FastembedCrossEncoder {
        fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
            let mut model = self.model.lock();
            let documents = passages.to_vec();
            let results = model
                .rerank(query.to_string(), &documents, false, None)
                .map_err(|e| AppError::Internal(format!("reranking failed: {e}")))?;

            let mut scores = vec![0.0f32; passages.len()];
            for result in results {
                if let Some(slot) = scores.get_mut(result.index) {
                    *slot = result.score;
                }
            }
            Ok(scores)
        }
    }
}

#[cfg(feature = "local-embeddings")]
pub use fastembed_impl::FastembedCrossEncoder;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Scores by word overlap with the query; enough to test ordering.
    struct OverlapEncoder;

    impl CrossEncoder for OverlapEncoder {
        fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
            let query_words: Vec<&str> = query.split_whitespace().collect();
            Ok(passages
                .iter()
                .map(|p| {
                    query_words
                        .iter()
                        .filter(|w| p.to_lowercase().contains(&w.to_lowercase()))
                        .count() as f32
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_rerank_sorts_descending() {
        let encoder: Arc<dyn CrossEncoder> = Arc::new(OverlapEncoder);
        let passages = vec![
            "nothing relevant here".to_string(),
            "multi-task learning in nlp".to_string(),
            "learning".to_string(),
        ];
        let ranked = rerank(encoder, "multi-task learning", &passages, None)
            .await
            .unwrap();
        assert_eq!(ranked[0].0, 1);
        assert!(ranked[0].1 >= ranked[1].1);
        assert_eq!(ranked.len(), 3);
    }

    #[tokio::test]
    async fn test_rerank_truncates_to_top_k() {
        let encoder: Arc<dyn CrossEncoder> = Arc::new(OverlapEncoder);
        let passages = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let ranked = rerank(encoder, "a b c", &passages, Some(2)).await.unwrap();
        assert_eq!(ranked.len(), 2);
    }

    #[tokio::test]
    async fn test_rerank_empty_is_empty() {
        let encoder: Arc<dyn CrossEncoder> = Arc::new(OverlapEncoder);
        let ranked = rerank(encoder, "query", &[], None).await.unwrap();
        assert!(ranked.is_empty());
    }
}
