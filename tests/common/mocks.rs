//! Mock implementations for integration tests.
//!
//! Provides deterministic stand-ins for every external collaborator - the
//! catalogue, the PDF extractor, the embedding and cross-encoder models,
//! and the LM provider - plus a helper that assembles the whole stack
//! around an in-memory vector store.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use stacks::catalog::{CatalogItem, CatalogueReader, NamedCount, PageText, PdfExtractor};
use stacks::chat::{system_prompt, ConversationStore, ResearchChat};
use stacks::db::{EmbeddedVectorStore, SparseIndex};
use stacks::llm::provider::{
    ChatParams, ChatResponse, Credentials, ModelInfo, ModelProvider, ProviderInfo, ProviderKind,
    ProviderManager, ProviderRegistry,
};
use stacks::migrate::MetadataVersionManager;
use stacks::rag::{CrossEncoder, EmbeddingModelId, EmbeddingService, HybridRetriever, TextEncoder};
use stacks::types::{AppError, Message, Result};
use stacks::{Indexer, VectorStore};

/// Embedding model used throughout the tests (384 dimensions).
pub const TEST_MODEL: EmbeddingModelId = EmbeddingModelId::MiniLmL6;

// ============================================================================
// Catalogue and PDF Mocks
// ============================================================================

/// Fixed-item catalogue.
pub struct MockCatalogue {
    items: Vec<CatalogItem>,
}

impl MockCatalogue {
    pub fn new(items: Vec<CatalogItem>) -> Self {
        Self { items }
    }
}

impl CatalogueReader for MockCatalogue {
    fn items_with_pdfs(&self) -> Result<Vec<CatalogItem>> {
        Ok(self.items.clone())
    }

    fn all_tags(&self) -> Result<Vec<String>> {
        Ok(vec![])
    }

    fn all_collections(&self) -> Result<Vec<NamedCount>> {
        Ok(vec![])
    }

    fn all_item_types(&self) -> Result<Vec<NamedCount>> {
        Ok(vec![])
    }
}

/// Shorthand for a catalogue item.
pub fn item(item_id: &str, title: &str, date: &str, tags: &str, pdf_path: &str) -> CatalogItem {
    CatalogItem {
        item_id: item_id.to_string(),
        title: title.to_string(),
        authors: "Doe, Jane".to_string(),
        tags: tags.to_string(),
        collections: String::new(),
        date: date.to_string(),
        item_type: "journalArticle".to_string(),
        pdf_path: pdf_path.to_string(),
    }
}

/// PDF extractor serving canned pages keyed by path. Unknown paths fail the
/// way a missing file does.
pub struct MockPdf {
    pages: HashMap<String, Vec<PageText>>,
}

impl MockPdf {
    pub fn new(pages: HashMap<String, Vec<PageText>>) -> Self {
        Self { pages }
    }

    pub fn single(path: &str, pages: Vec<&str>) -> Self {
        let mut map = HashMap::new();
        map.insert(path.to_string(), page_texts(pages));
        Self::new(map)
    }
}

/// Build 1-based pages from raw texts.
pub fn page_texts(texts: Vec<&str>) -> Vec<PageText> {
    texts
        .into_iter()
        .enumerate()
        .map(|(idx, text)| PageText {
            page_num: idx as i64 + 1,
            text: text.to_string(),
        })
        .collect()
}

impl PdfExtractor for MockPdf {
    fn pages(&self, path: &Path) -> Result<Vec<PageText>> {
        self.pages
            .get(path.to_string_lossy().as_ref())
            .cloned()
            .ok_or_else(|| AppError::Data(format!("PDF not found at {}", path.display())))
    }
}

// ============================================================================
// Model Mocks
// ============================================================================

/// Deterministic encoder: tokens hash into buckets, so cosine similarity
/// tracks token overlap. Dimension matches the test model's registry entry.
pub struct HashingEncoder;

impl TextEncoder for HashingEncoder {
    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let dim = TEST_MODEL.dimension();
        let mut vector = vec![0.0f32; dim];
        for token in text.to_lowercase().split_whitespace() {
            let mut hash = 5381u64;
            for byte in token.bytes() {
                hash = hash.wrapping_mul(33).wrapping_add(u64::from(byte));
            }
            vector[(hash % dim as u64) as usize] += 1.0;
        }
        Ok(vector)
    }
}

/// Embedding service backed by [`HashingEncoder`].
pub fn test_embeddings() -> Arc<EmbeddingService> {
    Arc::new(EmbeddingService::with_factory(
        Box::new(|_| Ok(Arc::new(HashingEncoder) as Arc<dyn TextEncoder>)),
        TEST_MODEL,
    ))
}

/// Cross-encoder scoring by query-token overlap.
pub struct OverlapCrossEncoder;

impl CrossEncoder for OverlapCrossEncoder {
    fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        let query_tokens: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        Ok(passages
            .iter()
            .map(|passage| {
                let lowered = passage.to_lowercase();
                query_tokens.iter().filter(|t| lowered.contains(*t)).count() as f32
            })
            .collect())
    }
}

// ============================================================================
// Provider Mock
// ============================================================================

/// Scripted LM provider. Responses are served front-to-back; when the
/// script is exhausted a fixed fallback answer is returned. Every request
/// is recorded for assertions.
pub struct MockProvider {
    responses: Mutex<VecDeque<std::result::Result<String, String>>>,
    requests: Mutex<Vec<(Vec<Message>, ChatParams)>>,
}

impl MockProvider {
    pub fn scripted(responses: Vec<std::result::Result<String, String>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Provider answering every call with the same text.
    pub fn fixed(answer: &str) -> Arc<Self> {
        Self::scripted(vec![Ok(answer.to_string())])
    }

    /// All recorded `(messages, params)` chat calls.
    pub fn requests(&self) -> Vec<(Vec<Message>, ChatParams)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: ProviderKind::Ollama,
            label: "Mock".to_string(),
            default_model: "mock-model".to_string(),
            supports_streaming: false,
            requires_api_key: false,
        }
    }

    async fn validate(&self, _credentials: &Credentials) -> Result<bool> {
        Ok(true)
    }

    async fn list_models(&self, _credentials: &Credentials) -> Result<Vec<ModelInfo>> {
        Ok(vec![])
    }

    async fn chat(
        &self,
        _credentials: &Credentials,
        model: &str,
        messages: &[Message],
        params: &ChatParams,
    ) -> Result<ChatResponse> {
        self.requests
            .lock()
            .push((messages.to_vec(), params.clone()));
        let next = self.responses.lock().pop_front();
        match next {
            Some(Ok(content)) => Ok(ChatResponse {
                content,
                model: model.to_string(),
                usage: None,
            }),
            Some(Err(message)) => Err(AppError::Provider(message)),
            None => Ok(ChatResponse {
                content: "The evidence indicates a consistent pattern [1].".to_string(),
                model: model.to_string(),
                usage: None,
            }),
        }
    }
}

/// Provider manager with the mock installed as the active provider.
pub fn manager_with(provider: Arc<MockProvider>) -> Arc<ProviderManager> {
    let mut registry = ProviderRegistry::empty();
    registry.register(ProviderKind::Ollama, provider);
    Arc::new(ProviderManager::new(registry, ProviderKind::Ollama, None))
}

// ============================================================================
// Stack Assembly
// ============================================================================

/// Everything an end-to-end test needs.
#[allow(dead_code)]
pub struct TestStack {
    pub store: Arc<dyn VectorStore>,
    pub sparse: Arc<SparseIndex>,
    pub indexer: Arc<Indexer>,
    pub retriever: Arc<HybridRetriever>,
    pub chat: Arc<ResearchChat>,
    pub provider: Arc<MockProvider>,
    pub manager: Arc<ProviderManager>,
    pub catalogue: Arc<MockCatalogue>,
    // Keeps the BM25 snapshot directory alive for the test's duration.
    _tempdir: tempfile::TempDir,
}

/// Assemble indexer + retriever + controller around an in-memory store and
/// the scripted provider.
pub fn test_stack(
    items: Vec<CatalogItem>,
    pdf: MockPdf,
    provider: Arc<MockProvider>,
) -> TestStack {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let store: Arc<dyn VectorStore> = Arc::new(EmbeddedVectorStore::in_memory(
        "zotero_lib_minilm-l6",
        TEST_MODEL.dimension(),
    ));
    let sparse = Arc::new(SparseIndex::new(
        tempdir.path().join("bm25_index_minilm-l6.json"),
    ));
    let embeddings = test_embeddings();
    let cross_encoder: Arc<dyn CrossEncoder> = Arc::new(OverlapCrossEncoder);
    let catalogue = Arc::new(MockCatalogue::new(items));

    let indexer = Arc::new(Indexer::new(
        catalogue.clone(),
        Arc::new(pdf),
        embeddings.clone(),
        store.clone(),
        sparse.clone(),
        TEST_MODEL,
    ));

    let retriever = Arc::new(HybridRetriever::new(
        store.clone(),
        sparse.clone(),
        embeddings,
        cross_encoder,
        TEST_MODEL,
    ));

    let manager = manager_with(provider.clone());
    let versions = Arc::new(MetadataVersionManager::new(store.clone()));
    let conversations = Arc::new(ConversationStore::new(system_prompt(None)));
    let chat = Arc::new(ResearchChat::new(
        store.clone(),
        retriever.clone(),
        manager.clone(),
        conversations,
        versions,
    ));

    TestStack {
        store,
        sparse,
        indexer,
        retriever,
        chat,
        provider,
        manager,
        catalogue,
        _tempdir: tempdir,
    }
}

/// Wait until the indexer finishes its background job.
pub async fn wait_for_idle(indexer: &Arc<Indexer>) {
    for _ in 0..1000 {
        if !indexer.is_busy() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("indexer did not become idle");
}
