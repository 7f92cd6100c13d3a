//! End-to-end indexing pipeline tests: fresh runs, incremental no-ops,
//! skip accounting, and dense/sparse consistency.

mod common;

use std::collections::HashSet;

use common::mocks::{item, test_stack, wait_for_idle, MockPdf, MockProvider};
use stacks::types::IndexMode;
use stacks::VectorStore;

fn two_item_stack() -> common::mocks::TestStack {
    // Item 1 has a two-page PDF; item 2's PDF is missing.
    let items = vec![
        item("1", "Attention Papers", "2021", "transformers", "/a.pdf"),
        item("2", "Lost Work", "2019", "", "/missing.pdf"),
    ];
    let pdf = MockPdf::single(
        "/a.pdf",
        vec![
            "Transformers rely on attention mechanisms for sequence modeling.",
            "Attention weights are computed over all token pairs.",
        ],
    );
    test_stack(items, pdf, MockProvider::fixed("ok"))
}

#[tokio::test]
async fn test_fresh_indexing_two_items() {
    let stack = two_item_stack();

    assert!(stack.indexer.start(IndexMode::Full));
    wait_for_idle(&stack.indexer).await;

    let status = stack.indexer.status();
    assert_eq!(status.status, "idle");
    assert_eq!(status.progress.total_items, 2);
    assert_eq!(status.progress.processed_items, 2);
    assert_eq!(status.progress.skip_reasons.len(), 1);
    assert!(status.progress.skip_reasons[0].contains("Item 2"));

    let indexed = stack.store.indexed_item_ids().await.unwrap();
    assert_eq!(indexed, HashSet::from(["1".to_string()]));
    // One chunk per page, two pages.
    assert_eq!(stack.store.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_incremental_noop_after_fresh_run() {
    let stack = two_item_stack();

    stack.indexer.start(IndexMode::Full);
    wait_for_idle(&stack.indexer).await;
    let count_before = stack.store.count().await.unwrap();

    // Item 1 is indexed; item 2 still fails. The incremental run sees one
    // already-indexed item and one candidate that skips again.
    assert!(stack.indexer.start(IndexMode::Incremental));
    wait_for_idle(&stack.indexer).await;

    let status = stack.indexer.status();
    assert_eq!(status.progress.skipped_items, 1);
    assert_eq!(status.progress.total_items, 1);
    assert_eq!(stack.store.count().await.unwrap(), count_before);
}

#[tokio::test]
async fn test_incremental_twice_adds_nothing() {
    let items = vec![item("1", "Only Paper", "2020", "", "/a.pdf")];
    let pdf = MockPdf::single("/a.pdf", vec!["A single page of prose. Short and sweet."]);
    let stack = test_stack(items, pdf, MockProvider::fixed("ok"));

    stack.indexer.start(IndexMode::Incremental);
    wait_for_idle(&stack.indexer).await;
    let count_first = stack.store.count().await.unwrap();
    assert!(count_first > 0);

    stack.indexer.start(IndexMode::Incremental);
    wait_for_idle(&stack.indexer).await;

    let status = stack.indexer.status();
    assert_eq!(status.progress.total_items, 0);
    assert_eq!(status.progress.processed_items, 0);
    assert_eq!(status.progress.skipped_items, 1);
    assert_eq!(stack.store.count().await.unwrap(), count_first);
}

#[tokio::test]
async fn test_bm25_and_store_agree_after_job() {
    let stack = two_item_stack();
    stack.indexer.start(IndexMode::Full);
    wait_for_idle(&stack.indexer).await;

    let store_ids: HashSet<String> = stack
        .store
        .get(None, None, None)
        .await
        .unwrap()
        .ids
        .into_iter()
        .collect();
    let sparse_ids: HashSet<String> = stack.sparse.chunk_ids().into_iter().collect();
    assert_eq!(store_ids, sparse_ids);
    assert!(!store_ids.is_empty());

    // Sparse retrieval finds the attention chunk.
    let hits = stack.sparse.query("attention mechanisms", 5);
    assert!(!hits.is_empty());
    assert!(hits[0].0.starts_with("1:"));
}

#[tokio::test]
async fn test_chunk_ids_and_metadata_invariants() {
    let stack = two_item_stack();
    stack.indexer.start(IndexMode::Full);
    wait_for_idle(&stack.indexer).await;

    let all = stack.store.get(None, None, None).await.unwrap();
    let mut seen = HashSet::new();
    for (id, meta) in all.ids.iter().zip(&all.metadatas) {
        // Chunk ids are "<item_id>:<chunk_idx>" and unique.
        let item_id = meta.get("item_id").unwrap().to_display_string();
        let chunk_idx = meta.get("chunk_idx").unwrap().as_i64().unwrap();
        assert_eq!(*id, format!("{item_id}:{chunk_idx}"));
        assert!(seen.insert(id.clone()));
        // Pages are 1-based, year parsed to an integer.
        assert!(meta.get("page").unwrap().as_i64().unwrap() >= 1);
        assert_eq!(meta.get("year").unwrap().as_i64(), Some(2021));
    }
}

#[tokio::test]
async fn test_empty_extraction_is_recorded_as_skip() {
    let items = vec![item("7", "Blank Scan", "2001", "", "/blank.pdf")];
    let pdf = MockPdf::single("/blank.pdf", vec!["   ", ""]);
    let stack = test_stack(items, pdf, MockProvider::fixed("ok"));

    stack.indexer.start(IndexMode::Full);
    wait_for_idle(&stack.indexer).await;

    let status = stack.indexer.status();
    assert_eq!(status.progress.processed_items, 1);
    assert_eq!(status.progress.skip_reasons.len(), 1);
    assert!(status.progress.skip_reasons[0].contains("no text"));
    assert_eq!(stack.store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_cancel_when_idle_is_noop() {
    let stack = two_item_stack();
    stack.indexer.cancel();
    assert_eq!(stack.indexer.status().status, "idle");
}
