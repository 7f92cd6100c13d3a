//! Catalogue and document-source interfaces.
//!
//! The bibliographic catalogue (the user's reference manager database) and
//! the PDF parser are external collaborators. This module defines the two
//! traits the core consumes, plus the concrete implementations the server
//! binary ships with: a JSON-file catalogue and a lopdf-backed extractor.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::types::{AppError, Result};

// ============================================================================
// Catalogue
// ============================================================================

/// One parent item in the catalogue with an attached PDF.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
    /// Stable identifier of the parent item.
    pub item_id: String,
    /// Title of the work.
    #[serde(default)]
    pub title: String,
    /// Author string, as the catalogue formats it.
    #[serde(default)]
    pub authors: String,
    /// Pipe-delimited tag set.
    #[serde(default)]
    pub tags: String,
    /// Pipe-delimited collection set.
    #[serde(default)]
    pub collections: String,
    /// Free-form date string; a 4-digit year is extracted from it.
    #[serde(default)]
    pub date: String,
    /// Item type in catalogue-internal form (e.g. `journalArticle`).
    #[serde(default)]
    pub item_type: String,
    /// Path to the attached PDF.
    pub pdf_path: String,
}

/// A name with an occurrence count (collections, item types).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedCount {
    /// Display name.
    pub name: String,
    /// Number of items carrying it.
    pub count: usize,
}

/// Read-only view of the bibliographic catalogue.
pub trait CatalogueReader: Send + Sync {
    /// All parent items that have a PDF attachment.
    fn items_with_pdfs(&self) -> Result<Vec<CatalogItem>>;

    /// Every distinct tag in the catalogue.
    fn all_tags(&self) -> Result<Vec<String>>;

    /// Every collection with its item count.
    fn all_collections(&self) -> Result<Vec<NamedCount>>;

    /// Every item type with its item count.
    fn all_item_types(&self) -> Result<Vec<NamedCount>>;
}

/// Extract a 4-digit year from a free-form date string.
/// Returns -1 when no year is present ("unknown").
pub fn parse_year(date: &str) -> i64 {
    static YEAR_RE: OnceLock<Regex> = OnceLock::new();
    let re = YEAR_RE.get_or_init(|| Regex::new(r"\b(19|20)\d{2}\b").expect("static regex"));
    re.find(date)
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .unwrap_or(-1)
}

// ============================================================================
// JSON-file Catalogue
// ============================================================================

/// File-backed catalogue: a JSON array of [`CatalogItem`] records.
///
/// This is the stand-in the server binary uses; hosts with a live reference
/// manager replace it behind [`CatalogueReader`].
pub struct JsonCatalogue {
    path: PathBuf,
}

impl JsonCatalogue {
    /// Create a catalogue backed by the given JSON file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<Vec<CatalogItem>> {
        let raw = std::fs::read_to_string(&self.path).map_err(|e| {
            AppError::Configuration(format!(
                "cannot read catalogue file {}: {e}",
                self.path.display()
            ))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            AppError::Configuration(format!(
                "catalogue file {} is not a JSON item list: {e}",
                self.path.display()
            ))
        })
    }
}

impl CatalogueReader for JsonCatalogue {
    fn items_with_pdfs(&self) -> Result<Vec<CatalogItem>> {
        Ok(self
            .load()?
            .into_iter()
            .filter(|item| !item.pdf_path.is_empty())
            .collect())
    }

    fn all_tags(&self) -> Result<Vec<String>> {
        let mut tags: Vec<String> = self
            .load()?
            .iter()
            .flat_map(|item| item.tags.split('|'))
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        tags.sort();
        tags.dedup();
        Ok(tags)
    }

    fn all_collections(&self) -> Result<Vec<NamedCount>> {
        Ok(count_pipe_delimited(
            self.load()?.iter().map(|item| item.collections.as_str()),
        ))
    }

    fn all_item_types(&self) -> Result<Vec<NamedCount>> {
        let mut counts = std::collections::BTreeMap::new();
        for item in self.load()? {
            if !item.item_type.is_empty() {
                *counts.entry(item.item_type).or_insert(0usize) += 1;
            }
        }
        Ok(counts
            .into_iter()
            .map(|(name, count)| NamedCount { name, count })
            .collect())
    }
}

fn count_pipe_delimited<'a>(values: impl Iterator<Item = &'a str>) -> Vec<NamedCount> {
    let mut counts = std::collections::BTreeMap::new();
    for value in values {
        for part in value.split('|').filter(|p| !p.is_empty()) {
            *counts.entry(part.to_string()).or_insert(0usize) += 1;
        }
    }
    counts
        .into_iter()
        .map(|(name, count)| NamedCount { name, count })
        .collect()
}

// ============================================================================
// PDF Extraction
// ============================================================================

/// Text of one PDF page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageText {
    /// 1-based page number.
    pub page_num: i64,
    /// Extracted plain text.
    pub text: String,
}

/// Page-aware PDF text extraction.
pub trait PdfExtractor: Send + Sync {
    /// Extract per-page text, 1-based page numbers.
    fn pages(&self, path: &Path) -> Result<Vec<PageText>>;
}

/// lopdf-backed extractor.
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn pages(&self, path: &Path) -> Result<Vec<PageText>> {
        if !path.exists() {
            return Err(AppError::Data(format!("PDF not found at {}", path.display())));
        }

        let doc = lopdf::Document::load(path)
            .map_err(|e| AppError::Data(format!("cannot parse PDF {}: {e}", path.display())))?;

        let mut pages = Vec::new();
        for (page_num, _) in doc.get_pages() {
            let text = doc.extract_text(&[page_num]).unwrap_or_default();
            pages.push(PageText {
                page_num: i64::from(page_num),
                text,
            });
        }
        Ok(pages)
    }
}

// ============================================================================
// Tests
// ============================================================================
