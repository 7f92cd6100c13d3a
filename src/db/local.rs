//! Embedded local vector store.
//!
//! A pure-Rust, file-backed store: records live in memory behind a
//! `parking_lot::RwLock` and are snapshotted to JSON after every mutation.
//! Similarity is exact cosine over the whole collection, which is the right
//! trade-off at personal-library scale (tens of thousands of chunks).
//!
//! On-disk layout, one directory per collection:
//!
//! - `{base}/{collection}/meta.json` - collection name + dimension
//! - `{base}/{collection}/records.json` - all records

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::db::vectorstore::{GetResult, QueryResult, VectorStore};
use crate::filter::{Metadata, Predicate};
use crate::types::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CollectionMeta {
    name: String,
    dimension: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Record {
    id: String,
    document: String,
    metadata: Metadata,
    vector: Vec<f32>,
}

#[derive(Default, Debug)]
struct Inner {
    /// Insertion order of ids, the iteration order for unfiltered gets.
    order: Vec<String>,
    records: HashMap<String, Record>,
}

/// Embedded vector store with optional persistence.
///
/// With a base path the collection is loaded on open and saved after each
/// mutation; without one it is purely in-memory (used by tests).
#[derive(Debug)]
pub struct EmbeddedVectorStore {
    collection: String,
    dimension: usize,
    dir: Option<PathBuf>,
    inner: RwLock<Inner>,
}

impl EmbeddedVectorStore {
    /// Open (or create) a collection under `base_dir`.
    pub fn open(base_dir: impl Into<PathBuf>, collection: &str, dimension: usize) -> Result<Self> {
        let dir = base_dir.into().join(collection);
        let store = Self {
            collection: collection.to_string(),
            dimension,
            dir: Some(dir),
            inner: RwLock::new(Inner::default()),
        };
        store.load()?;
        Ok(store)
    }

    /// Purely in-memory collection.
    pub fn in_memory(collection: &str, dimension: usize) -> Self {
        Self {
            collection: collection.to_string(),
            dimension,
            dir: None,
            inner: RwLock::new(Inner::default()),
        }
    }

    fn load(&self) -> Result<()> {
        let Some(dir) = &self.dir else { return Ok(()) };
        let meta_path = dir.join("meta.json");
        if !meta_path.exists() {
            return Ok(());
        }

        let meta_raw = std::fs::read_to_string(&meta_path)
            .map_err(|e| AppError::Internal(format!("failed to read collection meta: {e}")))?;
        let meta: CollectionMeta = serde_json::from_str(&meta_raw)
            .map_err(|e| AppError::Internal(format!("failed to parse collection meta: {e}")))?;
        if meta.dimension != self.dimension {
            return Err(AppError::Configuration(format!(
                "collection '{}' was created with dimension {}, requested {}; \
                 embedding dimension mismatch; re-index required",
                self.collection, meta.dimension, self.dimension
            )));
        }

        let records_path = dir.join("records.json");
        if records_path.exists() {
            let raw = std::fs::read_to_string(&records_path)
                .map_err(|e| AppError::Internal(format!("failed to read collection records: {e}")))?;
            let records: Vec<Record> = serde_json::from_str(&raw)
                .map_err(|e| AppError::Internal(format!("failed to parse collection records: {e}")))?;
            let mut inner = self.inner.write();
            for record in records {
                inner.order.push(record.id.clone());
                inner.records.insert(record.id.clone(), record);
            }
        }
        Ok(())
    }

    fn save(&self, inner: &Inner) -> Result<()> {
        let Some(dir) = &self.dir else { return Ok(()) };
        std::fs::create_dir_all(dir)
            .map_err(|e| AppError::Internal(format!("failed to create collection dir: {e}")))?;

        let meta = CollectionMeta {
            name: self.collection.clone(),
            dimension: self.dimension,
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| AppError::Internal(format!("failed to serialize collection meta: {e}")))?;
        std::fs::write(dir.join("meta.json"), meta_json)
            .map_err(|e| AppError::Internal(format!("failed to write collection meta: {e}")))?;

        let records: Vec<&Record> = inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id))
            .collect();
        let records_json = serde_json::to_string(&records)
            .map_err(|e| AppError::Internal(format!("failed to serialize records: {e}")))?;
        std::fs::write(dir.join("records.json"), records_json)
            .map_err(|e| AppError::Internal(format!("failed to write records: {e}")))?;
        Ok(())
    }

    fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 1.0;
        }
        1.0 - dot / (norm_a * norm_b)
    }

    fn reject_contains(filter: Option<&Predicate>) -> Result<()> {
        if filter.is_some_and(Predicate::has_contains) {
            return Err(AppError::InvalidInput(
                "$contains is not store-native; split the predicate before querying".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for EmbeddedVectorStore {
    fn collection_name(&self) -> &str {
        &self.collection
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn add(
        &self,
        ids: Vec<String>,
        documents: Vec<String>,
        metadatas: Vec<Metadata>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<()> {
        if ids.len() != documents.len()
            || ids.len() != metadatas.len()
            || ids.len() != vectors.len()
        {
            return Err(AppError::InvalidInput(format!(
                "add requires equal-length lists, got ids={} documents={} metadatas={} vectors={}",
                ids.len(),
                documents.len(),
                metadatas.len(),
                vectors.len()
            )));
        }

        // Validate the whole batch before touching state: the write is atomic.
        for vector in &vectors {
            if vector.len() != self.dimension {
                return Err(AppError::Configuration(format!(
                    "embedding with dimension {} cannot be added to collection '{}' (dimension {}); \
                     re-index required",
                    vector.len(),
                    self.collection,
                    self.dimension
                )));
            }
        }
        let unique: HashSet<&String> = ids.iter().collect();
        if unique.len() != ids.len() {
            return Err(AppError::InvalidInput("duplicate ids in add batch".to_string()));
        }

        let mut inner = self.inner.write();
        for id in &ids {
            if inner.records.contains_key(id) {
                return Err(AppError::InvalidInput(format!(
                    "id '{id}' already exists in collection '{}'",
                    self.collection
                )));
            }
        }

        for (((id, document), metadata), vector) in ids
            .into_iter()
            .zip(documents)
            .zip(metadatas)
            .zip(vectors)
        {
            inner.order.push(id.clone());
            inner.records.insert(
                id.clone(),
                Record {
                    id,
                    document,
                    metadata,
                    vector,
                },
            );
        }

        self.save(&inner)
    }

    async fn get(
        &self,
        ids: Option<&[String]>,
        filter: Option<&Predicate>,
        limit: Option<usize>,
    ) -> Result<GetResult> {
        Self::reject_contains(filter)?;
        let inner = self.inner.read();

        let candidate_ids: Vec<&String> = match ids {
            Some(requested) => requested
                .iter()
                .filter(|id| inner.records.contains_key(*id))
                .collect(),
            None => inner.order.iter().collect(),
        };

        let mut result = GetResult::default();
        for id in candidate_ids {
            let record = &inner.records[id];
            if let Some(pred) = filter {
                if !pred.matches(&record.metadata) {
                    continue;
                }
            }
            result.ids.push(record.id.clone());
            result.documents.push(record.document.clone());
            result.metadatas.push(record.metadata.clone());
            if let Some(limit) = limit {
                if result.ids.len() >= limit {
                    break;
                }
            }
        }
        Ok(result)
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&Predicate>,
    ) -> Result<QueryResult> {
        Self::reject_contains(filter)?;
        if vector.len() != self.dimension {
            return Err(AppError::Configuration(format!(
                "query vector has dimension {}, collection '{}' expects {}",
                vector.len(),
                self.collection,
                self.dimension
            )));
        }

        let inner = self.inner.read();
        let mut scored: Vec<(&Record, f32)> = inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id))
            .filter(|record| {
                filter
                    .map(|pred| pred.matches(&record.metadata))
                    .unwrap_or(true)
            })
            .map(|record| (record, Self::cosine_distance(vector, &record.vector)))
            .collect();

        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        let mut result = QueryResult::empty();
        for (record, distance) in scored {
            result.ids[0].push(record.id.clone());
            result.documents[0].push(record.document.clone());
            result.metadatas[0].push(record.metadata.clone());
            result.distances[0].push(distance);
        }
        Ok(result)
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        let mut inner = self.inner.write();
        let mut removed = 0;
        for id in ids {
            if inner.records.remove(id).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            let Inner { order, records } = &mut *inner;
            order.retain(|id| records.contains_key(id));
            self.save(&inner)?;
        }
        Ok(removed)
    }

    async fn delete_by(&self, filter: &Predicate) -> Result<usize> {
        Self::reject_contains(Some(filter))?;
        let matching: Vec<String> = {
            let inner = self.inner.read();
            inner
                .records
                .values()
                .filter(|record| filter.matches(&record.metadata))
                .map(|record| record.id.clone())
                .collect()
        };
        self.delete(&matching).await
    }

    async fn update_metadatas(&self, ids: &[String], metadatas: &[Metadata]) -> Result<()> {
        if ids.len() != metadatas.len() {
            return Err(AppError::InvalidInput(
                "update_metadatas requires equal-length lists".to_string(),
            ));
        }
        let mut inner = self.inner.write();
        for (id, metadata) in ids.iter().zip(metadatas) {
            let record = inner.records.get_mut(id).ok_or_else(|| {
                AppError::NotFound(format!("no chunk '{id}' in collection '{}'", self.collection))
            })?;
            record.metadata = metadata.clone();
        }
        self.save(&inner)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.inner.read().records.len())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{build_predicate, CmpOp, FilterArgs, FilterValue, MetaValue};

    fn meta(item_id: &str, year: i64) -> Metadata {
        let mut m = Metadata::new();
        m.insert("item_id".to_string(), MetaValue::Str(item_id.to_string()));
        m.insert("year".to_string(), MetaValue::Int(year));
        m
    }

    fn unit(x: f32, y: f32) -> Vec<f32> {
        let norm = (x * x + y * y).sqrt();
        vec![x / norm, y / norm]
    }

    #[tokio::test]
    async fn test_add_and_count() {
        let store = EmbeddedVectorStore::in_memory("test", 2);
        store
            .add(
                vec!["1:0".into(), "1:1".into()],
                vec!["alpha".into(), "beta".into()],
                vec![meta("1", 2020), meta("1", 2020)],
                vec![unit(1.0, 0.0), unit(0.0, 1.0)],
            )
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_add_rejects_dimension_mismatch_atomically() {
        let store = EmbeddedVectorStore::in_memory("test", 2);
        let err = store
            .add(
                vec!["1:0".into(), "1:1".into()],
                vec!["alpha".into(), "beta".into()],
                vec![meta("1", 2020), meta("1", 2020)],
                vec![unit(1.0, 0.0), vec![1.0, 0.0, 0.0]],
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("dimension"));
        // Nothing from the batch was written.
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_add_rejects_duplicate_ids() {
        let store = EmbeddedVectorStore::in_memory("test", 2);
        let err = store
            .add(
                vec!["1:0".into(), "1:0".into()],
                vec!["a".into(), "b".into()],
                vec![meta("1", 2020), meta("1", 2020)],
                vec![unit(1.0, 0.0), unit(0.0, 1.0)],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_query_orders_by_cosine_distance() {
        let store = EmbeddedVectorStore::in_memory("test", 2);
        store
            .add(
                vec!["a".into(), "b".into(), "c".into()],
                vec!["A".into(), "B".into(), "C".into()],
                vec![meta("1", 2020), meta("2", 2021), meta("3", 2022)],
                vec![unit(1.0, 0.0), unit(1.0, 0.2), unit(0.0, 1.0)],
            )
            .await
            .unwrap();

        let result = store.query(&unit(1.0, 0.0), 2, None).await.unwrap();
        assert_eq!(result.ids[0], vec!["a".to_string(), "b".to_string()]);
        assert!(result.distances[0][0] <= result.distances[0][1]);
    }

    #[tokio::test]
    async fn test_query_applies_store_native_filter() {
        let store = EmbeddedVectorStore::in_memory("test", 2);
        store
            .add(
                vec!["a".into(), "b".into()],
                vec!["A".into(), "B".into()],
                vec![meta("1", 2010), meta("2", 2021)],
                vec![unit(1.0, 0.0), unit(0.9, 0.1)],
            )
            .await
            .unwrap();

        let pred = build_predicate(&FilterArgs {
            year_min: Some(2020),
            ..Default::default()
        })
        .unwrap();
        let result = store.query(&unit(1.0, 0.0), 5, Some(&pred)).await.unwrap();
        assert_eq!(result.ids[0], vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_query_rejects_contains() {
        let store = EmbeddedVectorStore::in_memory("test", 2);
        let pred = Predicate::contains("tags", "NLP");
        let err = store.query(&unit(1.0, 0.0), 5, Some(&pred)).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_delete_and_indexed_item_ids() {
        let store = EmbeddedVectorStore::in_memory("test", 2);
        store
            .add(
                vec!["1:0".into(), "2:0".into()],
                vec!["A".into(), "B".into()],
                vec![meta("1", 2020), meta("2", 2021)],
                vec![unit(1.0, 0.0), unit(0.0, 1.0)],
            )
            .await
            .unwrap();

        let ids = store.indexed_item_ids().await.unwrap();
        assert!(ids.contains("1") && ids.contains("2"));

        let removed = store.delete(&["1:0".to_string()]).await.unwrap();
        assert_eq!(removed, 1);
        let ids = store.indexed_item_ids().await.unwrap();
        assert!(!ids.contains("1"));
    }

    #[tokio::test]
    async fn test_delete_by_predicate() {
        let store = EmbeddedVectorStore::in_memory("test", 2);
        store
            .add(
                vec!["1:0".into(), "2:0".into(), "2:1".into()],
                vec!["A".into(), "B".into(), "C".into()],
                vec![meta("1", 2020), meta("2", 2021), meta("2", 2021)],
                vec![unit(1.0, 0.0), unit(0.0, 1.0), unit(1.0, 1.0)],
            )
            .await
            .unwrap();

        let pred = Predicate::cmp(
            "item_id",
            CmpOp::Eq,
            FilterValue::Scalar(MetaValue::Str("2".into())),
        );
        let removed = store.delete_by(&pred).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.count().await.unwrap(), 1);

        // delete_by is store-side and refuses $contains like query does.
        let err = store
            .delete_by(&Predicate::contains("title", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = EmbeddedVectorStore::open(dir.path(), "zotero_lib_test", 2).unwrap();
            store
                .add(
                    vec!["1:0".into()],
                    vec!["alpha".into()],
                    vec![meta("1", 2020)],
                    vec![unit(1.0, 0.0)],
                )
                .await
                .unwrap();
        }

        let reopened = EmbeddedVectorStore::open(dir.path(), "zotero_lib_test", 2).unwrap();
        assert_eq!(reopened.count().await.unwrap(), 1);
        let got = reopened
            .get(Some(&["1:0".to_string()]), None, None)
            .await
            .unwrap();
        assert_eq!(got.documents, vec!["alpha".to_string()]);
    }

    #[tokio::test]
    async fn test_reopen_with_other_dimension_fails() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = EmbeddedVectorStore::open(dir.path(), "zotero_lib_test", 2).unwrap();
            store
                .add(
                    vec!["1:0".into()],
                    vec!["alpha".into()],
                    vec![meta("1", 2020)],
                    vec![unit(1.0, 0.0)],
                )
                .await
                .unwrap();
        }
        let err = EmbeddedVectorStore::open(dir.path(), "zotero_lib_test", 3).unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_update_metadatas_leaves_vectors_alone() {
        let store = EmbeddedVectorStore::in_memory("test", 2);
        store
            .add(
                vec!["1:0".into()],
                vec!["alpha".into()],
                vec![meta("1", 2020)],
                vec![unit(1.0, 0.0)],
            )
            .await
            .unwrap();

        let new_meta = meta("1", 1999);
        store
            .update_metadatas(&["1:0".to_string()], &[new_meta])
            .await
            .unwrap();

        let got = store.get(Some(&["1:0".to_string()]), None, None).await.unwrap();
        assert_eq!(got.metadatas[0].get("year").unwrap().as_i64(), Some(1999));
        // Vector search still works against the original embedding.
        let q = store.query(&unit(1.0, 0.0), 1, None).await.unwrap();
        assert_eq!(q.ids[0], vec!["1:0".to_string()]);
    }
}
