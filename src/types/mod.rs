//! Core types used throughout the Stacks server.
//!
//! This module contains the common data structures used for:
//! - Chat requests and responses (citations, snippets, session titles)
//! - Conversation messages
//! - Indexing progress reporting
//! - Error handling

use serde::{Deserialize, Serialize};

// ============= Conversation Types =============

/// Role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System instructions to the model.
    System,
    /// Message from the user.
    User,
    /// Response from the assistant.
    Assistant,
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message sender.
    pub role: MessageRole,
    /// The message content.
    pub content: String,
}

impl Message {
    /// Convenience constructor.
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Build a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Build a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Build an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

// ============= Chat API Types =============

/// Request payload for the chat endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The user's question. May be a follow-up with pronouns or references.
    pub query: String,
    /// Optional session ID for conversation continuity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Optional item IDs to scope retrieval to an explicit set of documents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_item_ids: Option<Vec<String>>,
    /// Whether to extract metadata filters from the query via the LM.
    #[serde(default)]
    pub use_metadata_filters: bool,
    /// Manual metadata filters from the Scope panel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_filters: Option<crate::filter::FilterArgs>,
    /// Whether to fuse dense and sparse rankings with RRF (default true).
    #[serde(default = "default_use_rrf")]
    pub use_rrf: bool,
}

fn default_use_rrf() -> bool {
    true
}

/// One cited work, stable within a chat turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    /// 1-based citation number, contiguous in first-occurrence order.
    pub id: usize,
    /// Title of the cited work.
    pub title: String,
    /// Publication year, or -1 when unknown.
    pub year: i64,
    /// Author string as stored in the catalogue.
    pub authors: String,
    /// Path to the source PDF.
    pub pdf_path: String,
}

/// One retrieved passage attached to a citation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snippet {
    /// Citation this snippet belongs to.
    pub citation_id: usize,
    /// The passage text.
    pub snippet: String,
    /// Title of the source work.
    pub title: String,
    /// Publication year, or -1 when unknown.
    pub year: i64,
    /// Author string.
    pub authors: String,
    /// Path to the source PDF.
    pub pdf_path: String,
    /// 1-based page the passage came from, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
}

/// Response payload of a chat turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatOutcome {
    /// The synthesized answer (or the fallback snippet on LM failure).
    pub summary: String,
    /// Cited works in first-occurrence order.
    pub citations: Vec<Citation>,
    /// Retrieved passages backing the citations.
    pub snippets: Vec<Snippet>,
    /// Generated 3-8 word session title, first turn of a session only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_title: Option<String>,
    /// Non-fatal issues surfaced to the caller (validator findings,
    /// legacy-metadata fallback, provider failure notes).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

// ============= Indexing Status Types =============

/// Indexing mode selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexMode {
    /// Index only items not already present in the collection.
    #[default]
    Incremental,
    /// Re-index every catalogue item.
    Full,
}

/// Progress snapshot of the (single) indexing job.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IndexProgress {
    /// Whether a job is currently running.
    pub in_progress: bool,
    /// Mode of the current or last job.
    pub mode: IndexMode,
    /// Number of candidate items for this job.
    pub total_items: usize,
    /// Items handled so far, including skipped ones.
    pub processed_items: usize,
    /// Items excluded up front (already indexed, incremental mode).
    pub skipped_items: usize,
    /// Human-readable reasons for per-item skips.
    pub skip_reasons: Vec<String>,
    /// Seconds since the job started.
    pub elapsed_seconds: u64,
    /// Estimated seconds remaining, after at least one item finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<u64>,
}

/// Response of the index-status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStatus {
    /// `"indexing"` while a job runs, `"idle"` otherwise.
    pub status: String,
    /// Current progress snapshot.
    pub progress: IndexProgress,
}

// ============= Error Types =============

/// Application-wide error type.
///
/// Variants follow the failure taxonomy of the system: configuration,
/// per-document data problems, transport, and the provider error family.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Wrong embedding dimension, unknown model id, missing credentials,
    /// filtering against a legacy-metadata collection.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Per-document data problem: missing PDF, unparseable PDF, empty
    /// extraction, chunking produced nothing.
    #[error("Data error: {0}")]
    Data(String),

    /// Connection refused, timeout, unexpected HTTP failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid or missing API key at the provider.
    #[error("Provider authentication failed: {0}")]
    ProviderAuth(String),

    /// Provider rate limit or quota exhausted.
    #[error("Provider rate limit: {0}")]
    ProviderRateLimit(String),

    /// Prompt exceeded the model's context window.
    #[error("Provider context length exceeded: {0}")]
    ProviderContext(String),

    /// Anything else the backend reported.
    #[error("Provider error: {0}")]
    Provider(String),

    /// Requested resource was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Input validation failed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error (persistence, serialization, task join).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        let (status, message) = match self {
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::ProviderRateLimit(msg) => (StatusCode::TOO_MANY_REQUESTS, msg),
            AppError::ProviderAuth(msg)
            | AppError::ProviderContext(msg)
            | AppError::Provider(msg)
            | AppError::Transport(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Configuration(msg) | AppError::Data(msg) | AppError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

/// A specialized Result type for Stacks operations.
pub type Result<T> = std::result::Result<T, AppError>;
