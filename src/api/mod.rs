//! HTTP surface.
//!
//! A thin axum layer over the core library API: chat, indexing control and
//! status, provider management, metadata versioning and migration, filter
//! counts, and settings. Handlers hold no logic; they translate between
//! JSON and the core types.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::chat::FilterCount;
use crate::db::VectorStore;
use crate::filter::FilterArgs;
use crate::llm::provider::{Credentials, ModelInfo, ProviderKind};
use crate::migrate::{MetadataVersionReport, MigrationSummary};
use crate::profile::Settings;
use crate::types::{AppError, ChatOutcome, ChatRequest, IndexMode, IndexStatus, Result};
use crate::AppState;

/// Build the application router.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/chat", post(chat))
        .route("/index_library", post(start_indexing))
        .route("/index_cancel", post(cancel_indexing))
        .route("/index_status", get(index_status))
        .route("/index_stats", get(index_stats))
        .route("/providers", get(list_providers))
        .route("/providers/{provider_id}/models", get(list_provider_models))
        .route("/providers/{provider_id}/validate", post(validate_provider))
        .route("/metadata_version", get(metadata_version))
        .route("/migrate_metadata", post(migrate_metadata))
        .route("/count_filtered", post(count_filtered))
        .route("/settings", get(get_settings).post(update_settings))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "msg": "Stacks research-assistant backend",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatOutcome>> {
    if request.query.trim().is_empty() {
        return Err(AppError::InvalidInput("missing 'query' in request".to_string()));
    }
    let outcome = state.chat.chat(&request).await?;
    Ok(Json(outcome))
}

// ============= Indexing =============

#[derive(Debug, Deserialize)]
struct IndexRequest {
    #[serde(default = "default_incremental")]
    incremental: bool,
}

fn default_incremental() -> bool {
    true
}

async fn start_indexing(
    State(state): State<AppState>,
    payload: Option<Json<IndexRequest>>,
) -> Json<Value> {
    let incremental = payload.map(|p| p.incremental).unwrap_or(true);
    let mode = if incremental {
        IndexMode::Incremental
    } else {
        IndexMode::Full
    };
    let started = state.indexer.start(mode);
    let msg = if started {
        let mode_name = if incremental { "incremental" } else { "full" };
        format!("Indexing started ({mode_name} mode).")
    } else {
        "Indexing already in progress.".to_string()
    };
    Json(json!({ "msg": msg }))
}

async fn cancel_indexing(State(state): State<AppState>) -> Json<Value> {
    state.indexer.cancel();
    Json(json!({ "msg": "Cancellation signaled." }))
}

async fn index_status(State(state): State<AppState>) -> Json<IndexStatus> {
    Json(state.indexer.status())
}

async fn index_stats(State(state): State<AppState>) -> Result<Json<Value>> {
    let indexed = state.store.indexed_item_ids().await?;
    let total_chunks = state.store.count().await?;
    let catalogue_items: std::collections::HashSet<String> = state
        .catalogue
        .items_with_pdfs()?
        .into_iter()
        .map(|item| item.item_id)
        .collect();
    let new_items = catalogue_items.difference(&indexed).count();

    Ok(Json(json!({
        "indexed_items": indexed.len(),
        "total_chunks": total_chunks,
        "catalogue_items": catalogue_items.len(),
        "new_items": new_items,
        "needs_sync": new_items > 0,
        "current_embedding_model": state.embedding_model.to_string(),
        "collection_name": state.store.collection_name(),
    })))
}

// ============= Providers =============

async fn list_providers(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "providers": state.provider.provider_info(),
        "active_provider": state.provider.active_provider(),
    }))
}

#[derive(Debug, Serialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

async fn list_provider_models(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
) -> Result<Json<ModelsResponse>> {
    let kind: ProviderKind = provider_id.parse()?;
    let models = state.provider.list_models(Some(kind)).await?;
    Ok(Json(ModelsResponse { models }))
}

#[derive(Debug, Default, Deserialize)]
struct ValidateRequest {
    #[serde(default)]
    credentials: Option<Credentials>,
}

async fn validate_provider(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
    payload: Option<Json<ValidateRequest>>,
) -> Json<Value> {
    let kind: ProviderKind = match provider_id.parse() {
        Ok(kind) => kind,
        Err(_) => {
            return Json(json!({
                "valid": false,
                "error": format!("Provider '{provider_id}' not found"),
            }))
        }
    };
    let credentials = payload.and_then(|p| p.0.credentials);
    match state.provider.validate(kind, credentials).await {
        Ok(valid) => Json(json!({ "valid": valid, "provider": kind })),
        Err(e) => Json(json!({
            "valid": false,
            "provider": kind,
            "error": e.to_string(),
        })),
    }
}

// ============= Metadata =============

async fn metadata_version(State(state): State<AppState>) -> Result<Json<MetadataVersionReport>> {
    Ok(Json(state.versions.report().await?))
}

async fn migrate_metadata(State(state): State<AppState>) -> Result<Json<MigrationSummary>> {
    let summary = state.migration.run().await?;
    // Detection caches the old answer; the collection just changed.
    state.versions.invalidate();
    Ok(Json(summary))
}

async fn count_filtered(
    State(state): State<AppState>,
    Json(filters): Json<FilterArgs>,
) -> Result<Json<FilterCount>> {
    Ok(Json(state.chat.count_filtered(&filters).await?))
}

// ============= Settings =============

async fn get_settings(State(state): State<AppState>) -> Json<Settings> {
    Json(state.profile.load_settings().masked())
}

async fn update_settings(
    State(state): State<AppState>,
    Json(settings): Json<Settings>,
) -> Result<Json<Value>> {
    let saved = state.profile.save_settings(settings)?;

    // Apply provider selection and credentials to the live manager.
    state
        .provider
        .set_active(saved.active_provider, saved.active_model.clone())?;
    for (kind, provider) in &saved.providers {
        if provider.enabled {
            state
                .provider
                .set_credentials(*kind, provider.credentials.clone());
        }
    }

    // Best effort: record the active model's context length for focused
    // retrieval widths. Listing may need the network; a failure is fine.
    if let Ok(models) = state.provider.list_models(None).await {
        let active = state.provider.active_model()?;
        let context_length = models
            .iter()
            .find(|m| m.id == active)
            .and_then(|m| m.context_length);
        state.provider.set_context_length(context_length);
    }

    let restart_required = saved.embedding_model != state.embedding_model;
    if restart_required {
        tracing::warn!(
            requested = %saved.embedding_model,
            active = %state.embedding_model,
            "embedding model changed; restart required to switch collections"
        );
    }

    Ok(Json(json!({
        "success": true,
        "restart_required": restart_required,
    })))
}
