//! Metadata format versioning and migration.
//!
//! Two on-disk metadata formats exist. In the legacy format (v1) `year` is
//! a free-form string and the `tags`/`collections` keys may be missing; in
//! the current format (v2) `year` is an integer with `-1` meaning unknown
//! and both keys are always present. The filtering subsystem refuses to
//! operate on v1 collections.
//!
//! Migration is a one-shot bulk operation: chunk metadata is rewritten in
//! pages against an upfront catalogue snapshot. Vectors are untouched - no
//! re-embedding happens.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::catalog::{parse_year, CatalogueReader};
use crate::db::VectorStore;
use crate::filter::{MetaValue, Metadata};
use crate::types::{AppError, Result};

/// Current metadata format: year as integer, tags/collections present.
pub const CURRENT_METADATA_VERSION: u8 = 2;
/// Legacy metadata format: year as string.
pub const LEGACY_METADATA_VERSION: u8 = 1;

/// Number of chunks sampled for version detection.
const DETECTION_SAMPLE: usize = 10;
/// Chunks rewritten per migration batch.
const MIGRATION_BATCH: usize = 1000;

// ============================================================================
// Version Detection
// ============================================================================

/// Result of a metadata version probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataVersionReport {
    /// Detected version: 0 empty/undetectable, 1 legacy, 2 current.
    pub version: u8,
    /// Whether migration is required before filtering can be enabled.
    pub migration_needed: bool,
    /// User-facing explanation, present when action is needed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Detects and caches the metadata format version of a collection.
pub struct MetadataVersionManager {
    store: Arc<dyn VectorStore>,
    cached: Mutex<Option<u8>>,
}

impl MetadataVersionManager {
    /// Manager over the given collection.
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self {
            store,
            cached: Mutex::new(None),
        }
    }

    /// Drop the cached detection (after indexing or migration).
    pub fn invalidate(&self) {
        *self.cached.lock() = None;
    }

    /// Detect the metadata version by sampling chunks and majority vote.
    pub async fn detect(&self) -> Result<u8> {
        if let Some(version) = *self.cached.lock() {
            return Ok(version);
        }

        let sample = self.store.get(None, None, Some(DETECTION_SAMPLE)).await?;
        if sample.metadatas.is_empty() {
            // An empty collection may be indexed at any moment; don't cache.
            return Ok(0);
        }

        let mut votes = Vec::new();
        for meta in &sample.metadatas {
            let year_is_int = matches!(meta.get("year"), Some(MetaValue::Int(_)) | None);
            let has_tags = meta.contains_key("tags");
            let has_collections = meta.contains_key("collections");

            if year_is_int && has_tags && has_collections {
                votes.push(CURRENT_METADATA_VERSION);
            } else if matches!(meta.get("year"), Some(MetaValue::Str(_)))
                || !(has_tags && has_collections)
            {
                votes.push(LEGACY_METADATA_VERSION);
            }
        }

        let version = if votes.is_empty() {
            0
        } else {
            let current = votes.iter().filter(|v| **v == CURRENT_METADATA_VERSION).count();
            if current * 2 >= votes.len() {
                CURRENT_METADATA_VERSION
            } else {
                LEGACY_METADATA_VERSION
            }
        };

        tracing::info!(version, "detected collection metadata version");
        *self.cached.lock() = Some(version);
        Ok(version)
    }

    /// Full report for the version endpoint.
    pub async fn report(&self) -> Result<MetadataVersionReport> {
        let version = self.detect().await?;
        let migration_needed = version == LEGACY_METADATA_VERSION;
        let message = migration_needed.then(|| {
            "Legacy metadata format detected. Run the metadata migration to enable \
             filtering by tags, collections, years, and item types. Existing \
             search continues to work unfiltered."
                .to_string()
        });
        Ok(MetadataVersionReport {
            version,
            migration_needed,
            message,
        })
    }

    /// Whether metadata filtering may run against this collection.
    pub async fn filtering_allowed(&self) -> Result<bool> {
        Ok(self.detect().await? != LEGACY_METADATA_VERSION)
    }
}

// ============================================================================
// Migration
// ============================================================================

/// Summary of a completed migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSummary {
    /// Chunks examined.
    pub total_chunks: usize,
    /// Chunks whose metadata was rewritten.
    pub updated_chunks: usize,
    /// Chunks that could not be migrated (no catalogue entry).
    pub failed_chunks: usize,
    /// Distinct parent items touched.
    pub unique_items: usize,
    /// True when no chunk failed.
    pub success: bool,
}

/// One-shot bulk metadata migration against the catalogue.
pub struct MetadataMigration {
    store: Arc<dyn VectorStore>,
    catalogue: Arc<dyn CatalogueReader>,
}

impl MetadataMigration {
    /// Migration over the given collection and catalogue.
    pub fn new(store: Arc<dyn VectorStore>, catalogue: Arc<dyn CatalogueReader>) -> Self {
        Self { store, catalogue }
    }

    /// Rewrite all chunk metadata to the current format. Vectors and
    /// documents are untouched.
    pub async fn run(&self) -> Result<MigrationSummary> {
        let all = self.store.get(None, None, None).await?;
        let total_chunks = all.ids.len();
        if total_chunks == 0 {
            return Ok(MigrationSummary {
                total_chunks: 0,
                updated_chunks: 0,
                failed_chunks: 0,
                unique_items: 0,
                success: true,
            });
        }

        // One upfront catalogue pass; per-chunk lookups hit this cache.
        let items = self.catalogue.items_with_pdfs().map_err(|e| {
            AppError::Configuration(format!("catalogue unreadable, migration aborted: {e}"))
        })?;
        let cache: HashMap<String, Metadata> = items
            .iter()
            .map(|item| {
                let mut meta = Metadata::new();
                meta.insert("title".into(), MetaValue::Str(item.title.clone()));
                meta.insert("authors".into(), MetaValue::Str(item.authors.clone()));
                meta.insert("tags".into(), MetaValue::Str(item.tags.clone()));
                meta.insert("collections".into(), MetaValue::Str(item.collections.clone()));
                meta.insert("year".into(), MetaValue::Int(parse_year(&item.date)));
                meta.insert("item_type".into(), MetaValue::Str(item.item_type.clone()));
                (item.item_id.clone(), meta)
            })
            .collect();
        tracing::info!(items = cache.len(), chunks = total_chunks, "migration cache built");

        let mut updated_chunks = 0;
        let mut failed_chunks = 0;
        let mut unique_items = std::collections::HashSet::new();

        for batch_start in (0..total_chunks).step_by(MIGRATION_BATCH) {
            let batch_end = (batch_start + MIGRATION_BATCH).min(total_chunks);
            let mut batch_ids = Vec::new();
            let mut batch_metas = Vec::new();

            for idx in batch_start..batch_end {
                let chunk_id = &all.ids[idx];
                let old_meta = &all.metadatas[idx];

                let Some(item_id) = old_meta.get("item_id").map(MetaValue::to_display_string)
                else {
                    tracing::warn!(chunk_id = %chunk_id, "chunk has no item_id; skipping");
                    failed_chunks += 1;
                    continue;
                };
                let Some(item_meta) = cache.get(&item_id) else {
                    tracing::warn!(chunk_id = %chunk_id, item_id = %item_id,
                        "no catalogue entry for item; skipping");
                    failed_chunks += 1;
                    continue;
                };

                let new_meta = migrated_metadata(old_meta, &item_id, item_meta);
                unique_items.insert(item_id);
                if needs_update(old_meta, &new_meta) {
                    batch_ids.push(chunk_id.clone());
                    batch_metas.push(new_meta);
                }
            }

            if !batch_ids.is_empty() {
                updated_chunks += batch_ids.len();
                self.store.update_metadatas(&batch_ids, &batch_metas).await?;
                tracing::info!(
                    from = batch_start,
                    to = batch_end,
                    updated = batch_ids.len(),
                    "migration batch applied"
                );
            }
        }

        let summary = MigrationSummary {
            total_chunks,
            updated_chunks,
            failed_chunks,
            unique_items: unique_items.len(),
            success: failed_chunks == 0,
        };
        tracing::info!(?summary, "metadata migration complete");
        Ok(summary)
    }
}

/// New-format metadata for one chunk: chunk-local fields preserved,
/// bibliographic fields refreshed from the catalogue, year as integer with
/// the -1 sentinel (the store strips absent values, so the key must exist).
fn migrated_metadata(old: &Metadata, item_id: &str, item_meta: &Metadata) -> Metadata {
    let mut meta = item_meta.clone();
    meta.insert("item_id".into(), MetaValue::Str(item_id.to_string()));
    meta.insert(
        "chunk_idx".into(),
        MetaValue::Int(old.get("chunk_idx").and_then(MetaValue::as_i64).unwrap_or(0)),
    );
    meta.insert(
        "page".into(),
        MetaValue::Int(old.get("page").and_then(MetaValue::as_i64).unwrap_or(0)),
    );
    meta.insert(
        "pdf_path".into(),
        MetaValue::Str(
            old.get("pdf_path")
                .map(MetaValue::to_display_string)
                .unwrap_or_default(),
        ),
    );
    if !meta.contains_key("year") {
        meta.insert("year".into(), MetaValue::Int(-1));
    }
    meta
}

/// Whether the rewrite changes anything worth persisting.
fn needs_update(old: &Metadata, new: &Metadata) -> bool {
    // Year format changed (string or missing -> integer).
    match (old.get("year"), new.get("year")) {
        (Some(MetaValue::Str(_)), Some(MetaValue::Int(_))) => return true,
        (None, Some(MetaValue::Int(_))) => return true,
        _ => {}
    }

    for field in ["tags", "collections"] {
        if old.get(field) != new.get(field) {
            return true;
        }
    }

    // item_type is new in v2.
    if !old.contains_key("item_type")
        && new
            .get("item_type")
            .and_then(|v| v.as_str())
            .is_some_and(|s| !s.is_empty())
    {
        return true;
    }

    false
}

// ============================================================================
// Tests
// ============================================================================
