//! Storage layer: the vector store abstraction, the embedded local store,
//! and the persistent BM25 sparse index.
//!
//! One logical collection exists per embedding model; the collection name is
//! derived from the model id (`zotero_lib_<model_id>`) so that switching
//! models yields a fresh, dimension-consistent namespace rather than a
//! corrupted one. The BM25 index lives in a sibling file keyed by the same
//! model id.

pub mod bm25;
pub mod local;
pub mod vectorstore;

pub use bm25::{Bm25Index, SparseIndex};
pub use local::EmbeddedVectorStore;
pub use vectorstore::{GetResult, QueryResult, VectorStore};

/// Collection name for a given embedding model id.
pub fn collection_name(model_id: &str) -> String {
    format!("zotero_lib_{model_id}")
}

/// File name of the BM25 snapshot for a given embedding model id.
pub fn bm25_file_name(model_id: &str) -> String {
    format!("bm25_index_{model_id}.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_name_embeds_model_id() {
        assert_eq!(collection_name("bge-base"), "zotero_lib_bge-base");
        assert_ne!(collection_name("bge-base"), collection_name("minilm-l6"));
    }

    #[test]
    fn test_bm25_file_name() {
        assert_eq!(bm25_file_name("bge-base"), "bm25_index_bge-base.json");
    }
}
