//! Background indexing pipeline.
//!
//! One job per process: extract page-aware text from each catalogue PDF,
//! chunk it, embed it, write the batch to the vector store, and finally
//! rebuild the BM25 index over the whole collection. Per-item failures are
//! recorded as skip reasons and never abort the job; only an unreadable
//! catalogue does. The cancel flag is polled between items and between
//! chunk-embed calls.

pub mod chunker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use crate::catalog::{parse_year, CatalogItem, CatalogueReader, PdfExtractor};
use crate::db::{SparseIndex, VectorStore};
use crate::filter::{MetaValue, Metadata};
use crate::rag::embeddings::{EmbeddingModelId, EmbeddingService};
use crate::types::{AppError, IndexMode, IndexProgress, IndexStatus, Result};

/// Chunk metadata written for every chunk of an item. All chunks of one
/// item share the bibliographic fields; `chunk_idx` and `page` vary.
fn chunk_metadata(item: &CatalogItem, chunk_idx: usize, page: i64) -> Metadata {
    let mut meta = Metadata::new();
    meta.insert("item_id".into(), MetaValue::Str(item.item_id.clone()));
    meta.insert("chunk_idx".into(), MetaValue::Int(chunk_idx as i64));
    meta.insert("page".into(), MetaValue::Int(page));
    meta.insert("title".into(), MetaValue::Str(item.title.clone()));
    meta.insert("authors".into(), MetaValue::Str(item.authors.clone()));
    meta.insert("tags".into(), MetaValue::Str(item.tags.clone()));
    meta.insert("collections".into(), MetaValue::Str(item.collections.clone()));
    meta.insert("year".into(), MetaValue::Int(parse_year(&item.date)));
    meta.insert("pdf_path".into(), MetaValue::Str(item.pdf_path.clone()));
    meta.insert("item_type".into(), MetaValue::Str(item.item_type.clone()));
    meta
}

/// The background indexer. Shared as `Arc<Indexer>`; `start` is idempotent
/// while a job runs.
pub struct Indexer {
    catalogue: Arc<dyn CatalogueReader>,
    pdf: Arc<dyn PdfExtractor>,
    embeddings: Arc<EmbeddingService>,
    store: Arc<dyn VectorStore>,
    sparse: Arc<SparseIndex>,
    model_id: EmbeddingModelId,
    busy: AtomicBool,
    cancel: AtomicBool,
    progress: RwLock<IndexProgress>,
    started_at: RwLock<Option<Instant>>,
}

impl Indexer {
    /// Assemble an indexer over the given collaborators.
    pub fn new(
        catalogue: Arc<dyn CatalogueReader>,
        pdf: Arc<dyn PdfExtractor>,
        embeddings: Arc<EmbeddingService>,
        store: Arc<dyn VectorStore>,
        sparse: Arc<SparseIndex>,
        model_id: EmbeddingModelId,
    ) -> Self {
        Self {
            catalogue,
            pdf,
            embeddings,
            store,
            sparse,
            model_id,
            busy: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
            progress: RwLock::new(IndexProgress::default()),
            started_at: RwLock::new(None),
        }
    }

    /// Start a job on a background worker. Returns false (and does nothing)
    /// when a job is already running.
    pub fn start(self: &Arc<Self>, mode: IndexMode) -> bool {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("indexing already in progress; start ignored");
            return false;
        }

        self.cancel.store(false, Ordering::SeqCst);
        *self.progress.write() = IndexProgress {
            in_progress: true,
            mode,
            ..Default::default()
        };
        *self.started_at.write() = Some(Instant::now());

        let indexer = self.clone();
        tokio::spawn(async move {
            if let Err(e) = indexer.run(mode).await {
                tracing::error!(error = %e, "indexing job aborted");
            }
            {
                let mut progress = indexer.progress.write();
                progress.in_progress = false;
                progress.elapsed_seconds = indexer.elapsed_seconds();
            }
            indexer.cancel.store(false, Ordering::SeqCst);
            indexer.busy.store(false, Ordering::SeqCst);
        });
        true
    }

    /// Signal cancellation of the running job. No-op when idle.
    pub fn cancel(&self) {
        if self.busy.load(Ordering::SeqCst) {
            self.cancel.store(true, Ordering::SeqCst);
            tracing::info!("indexing cancellation signaled");
        }
    }

    /// Read-only status snapshot.
    pub fn status(&self) -> IndexStatus {
        let mut progress = self.progress.read().clone();
        if progress.in_progress {
            progress.elapsed_seconds = self.elapsed_seconds();
        }
        IndexStatus {
            status: if progress.in_progress {
                "indexing".to_string()
            } else {
                "idle".to_string()
            },
            progress,
        }
    }

    /// Whether a job is currently running.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn elapsed_seconds(&self) -> u64 {
        self.started_at
            .read()
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    async fn run(&self, mode: IndexMode) -> Result<()> {
        let all_items = self.catalogue.items_with_pdfs().map_err(|e| {
            AppError::Configuration(format!("catalogue unreadable, indexing aborted: {e}"))
        })?;

        let candidates = match mode {
            IndexMode::Full => all_items,
            IndexMode::Incremental => {
                let indexed = self.store.indexed_item_ids().await?;
                let skipped = indexed.len();
                self.progress.write().skipped_items = skipped;
                all_items
                    .into_iter()
                    .filter(|item| !indexed.contains(item.item_id.as_str()))
                    .collect()
            }
        };

        self.progress.write().total_items = candidates.len();
        tracing::info!(mode = ?mode, candidates = candidates.len(), "indexing started");

        let mut wrote_any = false;
        for item in &candidates {
            if self.cancelled() {
                tracing::info!("indexing cancelled between items");
                break;
            }

            match self.process_item(item).await {
                Ok(None) => break, // cancelled mid-item, nothing written
                Ok(Some(chunks)) => {
                    tracing::info!(item_id = %item.item_id, chunks, "item indexed");
                    wrote_any |= chunks > 0;
                }
                Err(e) => {
                    let reason = format!("Item {}: {e}", item.item_id);
                    tracing::warn!("skipped: {reason}");
                    self.progress.write().skip_reasons.push(reason);
                }
            }

            {
                let mut progress = self.progress.write();
                progress.processed_items += 1;
                progress.elapsed_seconds = self.elapsed_seconds();
                let processed = progress.processed_items;
                let total = progress.total_items;
                if processed > 0 && total > 0 {
                    let per_item = progress.elapsed_seconds as f64 / processed as f64;
                    let remaining = total.saturating_sub(processed);
                    progress.eta_seconds = Some((per_item * remaining as f64) as u64);
                }
            }

            // Yield so cancellation and status reads get a chance promptly.
            tokio::task::yield_now().await;
        }

        if wrote_any {
            self.rebuild_sparse_index().await?;
        }

        let progress = self.progress.read();
        tracing::info!(
            total = progress.total_items,
            processed = progress.processed_items,
            skipped = progress.skip_reasons.len(),
            "indexing finished"
        );
        Ok(())
    }

    /// Index one item. `Ok(None)` means the job was cancelled mid-item and
    /// nothing was written for it; errors are per-item skip reasons.
    async fn process_item(&self, item: &CatalogItem) -> Result<Option<usize>> {
        let path = std::path::Path::new(&item.pdf_path);
        let pages = self.pdf.pages(path)?;
        if pages.iter().all(|p| p.text.trim().is_empty()) {
            return Err(AppError::Data("PDF extracted but no text found".to_string()));
        }

        let chunks = chunker::chunk_pages(&pages);
        if chunks.is_empty() {
            return Err(AppError::Data("no chunks created from pages".to_string()));
        }

        let mut vectors = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            if self.cancelled() {
                return Ok(None);
            }
            let vector = self
                .embeddings
                .embed(&chunk.text, Some(self.model_id))
                .await
                .map_err(|e| AppError::Data(format!("embedding generation failed - {e}")))?;
            vectors.push(vector);
        }

        let ids: Vec<String> = (0..chunks.len())
            .map(|i| format!("{}:{i}", item.item_id))
            .collect();
        let documents: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let metadatas: Vec<Metadata> = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| chunk_metadata(item, i, c.page))
            .collect();

        let written = ids.len();
        self.store
            .add(ids, documents, metadatas, vectors)
            .await
            .map_err(|e| AppError::Data(format!("store write failed - {e}")))?;

        Ok(Some(written))
    }

    /// Rebuild the BM25 snapshot over every chunk in the collection, so the
    /// sparse and dense indices agree after the job.
    async fn rebuild_sparse_index(&self) -> Result<()> {
        let all = self.store.get(None, None, None).await?;
        let pairs: Vec<(&str, &str)> = all
            .ids
            .iter()
            .map(String::as_str)
            .zip(all.documents.iter().map(String::as_str))
            .collect();
        self.sparse.rebuild(pairs.into_iter())?;
        Ok(())
    }
}
