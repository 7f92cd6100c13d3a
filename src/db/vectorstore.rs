//! Vector store abstraction.
//!
//! A store holds one collection of `(id, document, metadata, vector)`
//! records and answers filtered approximate-nearest-neighbour queries under
//! cosine distance. The `where` argument accepts only store-native
//! operators; predicates containing `$contains` must be partitioned out
//! upstream with [`crate::filter::Predicate::split`] and are rejected here.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::filter::{Metadata, Predicate};
use crate::types::Result;

/// Result of a [`VectorStore::get`] lookup.
#[derive(Debug, Clone, Default)]
pub struct GetResult {
    /// Chunk ids.
    pub ids: Vec<String>,
    /// Chunk texts, parallel to `ids`.
    pub documents: Vec<String>,
    /// Chunk metadata, parallel to `ids`.
    pub metadatas: Vec<Metadata>,
}

/// Result of a [`VectorStore::query`] ANN search.
///
/// The store natively answers a batch of query vectors, so every field is
/// nested one list per query. Callers issuing a single query read
/// position 0.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// Chunk ids per query, nearest first.
    pub ids: Vec<Vec<String>>,
    /// Chunk texts per query.
    pub documents: Vec<Vec<String>>,
    /// Chunk metadata per query.
    pub metadatas: Vec<Vec<Metadata>>,
    /// Cosine distances per query (lower is closer).
    pub distances: Vec<Vec<f32>>,
}

impl QueryResult {
    /// An empty single-query result.
    pub fn empty() -> Self {
        Self {
            ids: vec![vec![]],
            documents: vec![vec![]],
            metadatas: vec![vec![]],
            distances: vec![vec![]],
        }
    }
}

/// Persistent keyed collection of embedded chunks.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Name of the backing collection.
    fn collection_name(&self) -> &str;

    /// Declared vector dimension of the collection.
    fn dimension(&self) -> usize;

    /// Bulk write. All lists must have equal length, ids must be unique,
    /// metadata must be flat, and every vector must match the declared
    /// dimension. Fails atomically: on any violation nothing is written.
    async fn add(
        &self,
        ids: Vec<String>,
        documents: Vec<String>,
        metadatas: Vec<Metadata>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<()>;

    /// Retrieve records by id and/or store-native predicate.
    async fn get(
        &self,
        ids: Option<&[String]>,
        filter: Option<&Predicate>,
        limit: Option<usize>,
    ) -> Result<GetResult>;

    /// Filtered ANN query for the `k` nearest chunks to `vector`.
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&Predicate>,
    ) -> Result<QueryResult>;

    /// Delete records by id. Returns the number actually removed.
    async fn delete(&self, ids: &[String]) -> Result<usize>;

    /// Delete every record matching the store-native predicate.
    async fn delete_by(&self, filter: &Predicate) -> Result<usize>;

    /// Replace the metadata of the given records, leaving documents and
    /// vectors untouched. Used by the metadata migration.
    async fn update_metadatas(&self, ids: &[String], metadatas: &[Metadata]) -> Result<()>;

    /// Number of chunks in the collection.
    async fn count(&self) -> Result<usize>;

    /// Distinct `item_id` values across all chunks, string-normalised.
    async fn indexed_item_ids(&self) -> Result<HashSet<String>> {
        let all = self.get(None, None, None).await?;
        Ok(all
            .metadatas
            .iter()
            .filter_map(|m| m.get("item_id"))
            .map(|v| v.to_display_string())
            .collect())
    }
}
