//! Sentence-embedding adapter.
//!
//! A small registry maps model ids to their library model names and vector
//! dimensions. Loaded models are cached per model id for the lifetime of the
//! process, and every produced vector is checked against the registry
//! dimension - a mismatch is a configuration error, caught before anything
//! reaches the store.
//!
//! The concrete model runtime sits behind the [`TextEncoder`] trait; with
//! the `local-embeddings` feature the fastembed ONNX models back it, and
//! tests substitute deterministic encoders.

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::spawn_blocking;

use crate::types::{AppError, Result};

/// Conservative character cap applied before encoding; keeps inputs inside
/// the models' token budgets.
pub const MAX_EMBED_CHARS: usize = 2000;

// ============================================================================
// Model Registry
// ============================================================================

/// Supported embedding models with different speed/quality trade-offs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EmbeddingModelId {
    /// BAAI/bge-base-en-v1.5 - high quality, 768 dimensions (DEFAULT)
    #[default]
    BgeBase,
    /// BAAI/bge-small-en-v1.5 - fast, 384 dimensions
    BgeSmall,
    /// sentence-transformers/all-MiniLM-L6-v2 - fastest, 384 dimensions
    #[serde(rename = "minilm-l6")]
    MiniLmL6,
    /// sentence-transformers/all-mpnet-base-v2 - 768 dimensions
    Mpnet,
}

impl EmbeddingModelId {
    /// The library model name behind this id.
    pub fn library_name(&self) -> &'static str {
        match self {
            Self::BgeBase => "BAAI/bge-base-en-v1.5",
            Self::BgeSmall => "BAAI/bge-small-en-v1.5",
            Self::MiniLmL6 => "sentence-transformers/all-MiniLM-L6-v2",
            Self::Mpnet => "sentence-transformers/all-mpnet-base-v2",
        }
    }

    /// Output vector dimension.
    pub fn dimension(&self) -> usize {
        match self {
            Self::BgeBase | Self::Mpnet => 768,
            Self::BgeSmall | Self::MiniLmL6 => 384,
        }
    }

    /// Short human description for the settings UI.
    pub fn description(&self) -> &'static str {
        match self {
            Self::BgeBase => "High quality, state-of-the-art (768 dim, ~400MB)",
            Self::BgeSmall => "Good quality, fast (384 dim, ~130MB)",
            Self::MiniLmL6 => "Fastest, lowest memory (384 dim, ~90MB)",
            Self::Mpnet => "Strong general-purpose model (768 dim, ~420MB)",
        }
    }

    /// All registered models.
    pub fn all() -> Vec<Self> {
        vec![Self::BgeBase, Self::BgeSmall, Self::MiniLmL6, Self::Mpnet]
    }
}

impl Display for EmbeddingModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::BgeBase => "bge-base",
            Self::BgeSmall => "bge-small",
            Self::MiniLmL6 => "minilm-l6",
            Self::Mpnet => "mpnet",
        };
        write!(f, "{name}")
    }
}

impl FromStr for EmbeddingModelId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "bge-base" | "bge-base-en-v1.5" => Ok(Self::BgeBase),
            "bge-small" | "bge-small-en-v1.5" => Ok(Self::BgeSmall),
            "minilm-l6" | "all-minilm-l6-v2" => Ok(Self::MiniLmL6),
            "mpnet" | "all-mpnet-base-v2" => Ok(Self::Mpnet),
            _ => Err(AppError::Configuration(format!(
                "Unknown embedding model: {}. Available: {}",
                s,
                EmbeddingModelId::all()
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

// ============================================================================
// Encoder Trait
// ============================================================================

/// A loaded sentence-embedding model.
pub trait TextEncoder: Send + Sync {
    /// Encode one text into a fixed-dimension vector.
    fn encode(&self, text: &str) -> Result<Vec<f32>>;
}

/// Factory producing an encoder for a model id. Called at most once per
/// model id per process; the result is memoised.
pub type EncoderFactory =
    dyn Fn(EmbeddingModelId) -> Result<Arc<dyn TextEncoder>> + Send + Sync;

// ============================================================================
// Embedding Service
// ============================================================================

/// Process-wide embedding front end: model cache, truncation, and the
/// dimension invariant.
pub struct EmbeddingService {
    factory: Box<EncoderFactory>,
    cache: Mutex<HashMap<EmbeddingModelId, Arc<dyn TextEncoder>>>,
    default_model: EmbeddingModelId,
}

impl EmbeddingService {
    /// Build a service around a custom encoder factory.
    pub fn with_factory(factory: Box<EncoderFactory>, default_model: EmbeddingModelId) -> Self {
        Self {
            factory,
            cache: Mutex::new(HashMap::new()),
            default_model,
        }
    }

    /// Build a service backed by the fastembed ONNX models.
    #[cfg(feature = "local-embeddings")]
    pub fn local(default_model: EmbeddingModelId) -> Self {
        Self::with_factory(
            Box::new(|model_id| {
                Ok(Arc::new(fastembed_impl::FastembedEncoder::new(model_id)?)
                    as Arc<dyn TextEncoder>)
            }),
            default_model,
        )
    }

    /// The model used when the caller passes no explicit id.
    pub fn default_model(&self) -> EmbeddingModelId {
        self.default_model
    }

    /// Registry dimension of a model.
    pub fn dimension(&self, model_id: EmbeddingModelId) -> usize {
        model_id.dimension()
    }

    fn encoder(&self, model_id: EmbeddingModelId) -> Result<Arc<dyn TextEncoder>> {
        let mut cache = self.cache.lock();
        if let Some(encoder) = cache.get(&model_id) {
            return Ok(encoder.clone());
        }
        tracing::info!(model = %model_id, name = model_id.library_name(), "loading embedding model");
        let encoder = (self.factory)(model_id)?;
        cache.insert(model_id, encoder.clone());
        Ok(encoder)
    }

    /// Embed one text with the given (or default) model.
    ///
    /// Input is truncated to [`MAX_EMBED_CHARS`]; the returned vector length
    /// is checked against the registry dimension.
    pub async fn embed(
        &self,
        text: &str,
        model_id: Option<EmbeddingModelId>,
    ) -> Result<Vec<f32>> {
        let model_id = model_id.unwrap_or(self.default_model);
        let encoder = self.encoder(model_id)?;

        let truncated = truncate_chars(text, MAX_EMBED_CHARS).to_string();
        let vector = spawn_blocking(move || encoder.encode(&truncated))
            .await
            .map_err(|e| AppError::Internal(format!("embedding task failed: {e}")))??;

        let expected = model_id.dimension();
        if vector.len() != expected {
            return Err(AppError::Configuration(format!(
                "embedding dimension mismatch: expected {expected}, got {} from model {}",
                vector.len(),
                model_id.library_name()
            )));
        }
        Ok(vector)
    }
}

/// Truncate at a char boundary, keeping at most `max_chars` characters.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

// ============================================================================
// Fastembed Backend
// ============================================================================

#[cfg(feature = "local-embeddings")]
mod fastembed_impl {
    use super::*;
    use fastembed::{EmbeddingModel as FastEmbedModel, InitOptions, TextEmbedding};

    /// fastembed-backed encoder; the underlying model requires `&mut self`,
    /// so it sits behind a mutex.
    pub struct FastembedEncoder {
        model: Mutex<TextEmbedding>,
    }

    impl FastembedEncoder {
        pub fn new(model_id: EmbeddingModelId) -> Result<Self> {
            let fastembed_model = match model_id {
                EmbeddingModelId::BgeBase => FastEmbedModel::BGEBaseENV15,
                EmbeddingModelId::BgeSmall => FastEmbedModel::BGESmallENV15,
                EmbeddingModelId::MiniLmL6 => FastEmbedModel::AllMiniLML6V2,
                EmbeddingModelId::Mpnet => FastEmbedModel::AllMpnetBaseV2,
            };
            let model = TextEmbedding::try_new(
                InitOptions::new(fastembed_model).with_show_download_progress(true),
            )
            .map_err(|e| {
                AppError::Configuration(format!("failed to initialize embedding model: {e}"))
            })?;
            Ok(Self {
                model: Mutex::new(model),
            })
        }
    }

    impl TextEncoder for FastembedEncoder {
        fn encode(&self, text: &str) -> Result<Vec<f32>> {
            let mut model = self.model.lock();
            let mut embeddings = model
                .embed(vec![text], None)
                .map_err(|e| AppError::Internal(format!("embedding failed: {e}")))?;
            embeddings
                .pop()
                .ok_or_else(|| AppError::Internal("no embedding generated".to_string()))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedEncoder {
        dimension: usize,
    }

    impl TextEncoder for FixedEncoder {
        fn encode(&self, text: &str) -> Result<Vec<f32>> {
            // Deterministic, length-sensitive vector.
            let mut v = vec![0.0; self.dimension];
            v[0] = text.len() as f32;
            Ok(v)
        }
    }

    fn service(dimension: usize) -> EmbeddingService {
        EmbeddingService::with_factory(
            Box::new(move |_| Ok(Arc::new(FixedEncoder { dimension }) as Arc<dyn TextEncoder>)),
            EmbeddingModelId::MiniLmL6,
        )
    }

    #[test]
    fn test_registry_dimensions() {
        assert_eq!(EmbeddingModelId::BgeBase.dimension(), 768);
        assert_eq!(EmbeddingModelId::BgeSmall.dimension(), 384);
        assert_eq!(EmbeddingModelId::MiniLmL6.dimension(), 384);
        assert_eq!(EmbeddingModelId::Mpnet.dimension(), 768);
    }

    #[test]
    fn test_model_id_round_trip() {
        for model in EmbeddingModelId::all() {
            assert_eq!(model.to_string().parse::<EmbeddingModelId>().unwrap(), model);
        }
        assert!("nonsense".parse::<EmbeddingModelId>().is_err());
    }

    #[tokio::test]
    async fn test_embed_enforces_dimension_invariant() {
        // Encoder yields 10-dim vectors; registry says 384 for minilm-l6.
        let service = service(10);
        let err = service.embed("hello", None).await.unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_embed_truncates_long_input() {
        let service = service(384);
        let long_text = "x".repeat(MAX_EMBED_CHARS * 3);
        let vector = service.embed(&long_text, None).await.unwrap();
        assert_eq!(vector[0], MAX_EMBED_CHARS as f32);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "ééééé";
        assert_eq!(truncate_chars(text, 3), "ééé");
        assert_eq!(truncate_chars("ab", 10), "ab");
    }

    #[tokio::test]
    async fn test_encoder_is_cached_per_model() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_factory = calls.clone();
        let service = EmbeddingService::with_factory(
            Box::new(move |_| {
                calls_in_factory.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(FixedEncoder { dimension: 384 }) as Arc<dyn TextEncoder>)
            }),
            EmbeddingModelId::MiniLmL6,
        );

        service.embed("one", None).await.unwrap();
        service.embed("two", None).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
