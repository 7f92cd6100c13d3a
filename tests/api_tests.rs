//! HTTP surface tests over the assembled router.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use common::mocks::{item, test_stack, wait_for_idle, MockPdf, MockProvider, TEST_MODEL};
use serde_json::{json, Value};
use stacks::migrate::{MetadataMigration, MetadataVersionManager};
use stacks::profile::ProfileManager;
use stacks::types::IndexMode;
use stacks::AppState;
use tower::ServiceExt;

struct ApiFixture {
    app: axum::Router,
    _profile_dir: tempfile::TempDir,
    stack: common::mocks::TestStack,
}

async fn fixture() -> ApiFixture {
    let items = vec![item("1", "A Paper", "2020", "NLP", "/a.pdf")];
    let pdf = MockPdf::single("/a.pdf", vec!["A sentence about NLP research. Another one."]);
    let provider = MockProvider::scripted(vec![]);
    let stack = test_stack(items, pdf, provider);
    stack.indexer.start(IndexMode::Full);
    wait_for_idle(&stack.indexer).await;

    let profile_dir = tempfile::tempdir().unwrap();
    let profile = Arc::new(ProfileManager::new(profile_dir.path(), "default").unwrap());
    let versions = Arc::new(MetadataVersionManager::new(stack.store.clone()));
    let migration = Arc::new(MetadataMigration::new(
        stack.store.clone(),
        stack.catalogue.clone(),
    ));

    let state = AppState {
        chat: stack.chat.clone(),
        indexer: stack.indexer.clone(),
        provider: stack.manager.clone(),
        versions,
        migration,
        profile,
        store: stack.store.clone(),
        catalogue: stack.catalogue.clone(),
        embedding_model: TEST_MODEL,
    };

    ApiFixture {
        app: stacks::api::routes(state),
        _profile_dir: profile_dir,
        stack,
    }
}

async fn get_json(app: &axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn post_json(app: &axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_health_and_status_endpoints() {
    let fixture = fixture().await;

    let (status, body) = get_json(&fixture.app, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["msg"].as_str().unwrap().contains("Stacks"));

    let (status, body) = get_json(&fixture.app, "/index_status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "idle");
    assert_eq!(body["progress"]["processed_items"], 1);
}

#[tokio::test]
async fn test_index_stats_endpoint() {
    let fixture = fixture().await;
    let (status, body) = get_json(&fixture.app, "/index_stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["indexed_items"], 1);
    assert_eq!(body["new_items"], 0);
    assert_eq!(body["collection_name"], "zotero_lib_minilm-l6");
}

#[tokio::test]
async fn test_chat_endpoint_round_trip() {
    let fixture = fixture().await;
    let (status, body) = post_json(
        &fixture.app,
        "/chat",
        json!({ "query": "What does the NLP paper say?", "session_id": "api-s1" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["summary"].as_str().is_some());
    assert!(body["citations"].as_array().is_some());

    // The session was persisted.
    assert!(fixture.stack.chat.conversations().session_exists("api-s1"));
}

#[tokio::test]
async fn test_chat_endpoint_rejects_empty_query() {
    let fixture = fixture().await;
    let (status, _) = post_json(&fixture.app, "/chat", json!({ "query": "  " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_providers_endpoints() {
    let fixture = fixture().await;

    let (status, body) = get_json(&fixture.app, "/providers").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active_provider"], "ollama");

    let (status, body) = post_json(&fixture.app, "/providers/ollama/validate", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);

    let (status, body) = post_json(&fixture.app, "/providers/nonsense/validate", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], false);
}

#[tokio::test]
async fn test_metadata_version_and_count_endpoints() {
    let fixture = fixture().await;

    let (status, body) = get_json(&fixture.app, "/metadata_version").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], 2);
    assert_eq!(body["migration_needed"], false);

    let (status, body) = post_json(
        &fixture.app,
        "/count_filtered",
        json!({ "tags": ["NLP"] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["unique_items"], 1);
}

#[tokio::test]
async fn test_settings_round_trip() {
    let fixture = fixture().await;

    let (status, body) = get_json(&fixture.app, "/settings").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active_provider"], "ollama");

    let (status, body) = post_json(
        &fixture.app,
        "/settings",
        json!({
            "active_provider": "ollama",
            "active_model": "mock-model",
            "embedding_model": "minilm-l6",
            "providers": {
                "ollama": { "enabled": true, "credentials": { "base_url": "http://localhost:11434" } }
            }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["restart_required"], false);
}
