//! Response validation for known LM failure modes.
//!
//! Validation is non-fatal: issues are logged and surfaced to the caller
//! while the content is still returned. Detected patterns:
//!
//! - meta-responses (the model acknowledges instructions instead of
//!   answering, usually because instructions were embedded in a user turn)
//! - raw-citation dumps from web-augmented backends
//! - empty or trivially short content
//! - error markers embedded in the content

use crate::llm::provider::{ChatResponse, ProviderKind};

/// Phrases indicating an acknowledgment instead of an answer.
const META_RESPONSE_PHRASES: &[&str] = &[
    "i'm ready",
    "i understand",
    "okay, i'll",
    "i will now",
    "let me know",
    "i'd be happy to",
    "i can help",
];

/// Markers suggesting the backend echoed an error into the content.
const ERROR_INDICATORS: &[&str] = &["error:", "exception:", "failed to", "could not"];

/// Inspect a completion for known failure modes.
/// Returns `(is_valid, issues)`; issues are human-readable.
pub fn validate_chat_response(
    response: &ChatResponse,
    provider: ProviderKind,
) -> (bool, Vec<String>) {
    let mut issues = Vec::new();
    let content = response.content.trim();
    let lowered = content.to_lowercase();

    if META_RESPONSE_PHRASES.iter().any(|p| lowered.contains(p)) {
        issues.push("Meta-response detected (acknowledgment instead of answer)".to_string());
    }

    // A web-augmented backend sometimes returns its bibliography instead of
    // an answer; a high density of periods and commas is the tell.
    if provider == ProviderKind::Perplexity && content.len() > 100 {
        let len = content.len() as f64;
        let period_density = content.matches('.').count() as f64 / len;
        let comma_density = content.matches(',').count() as f64 / len;
        if period_density > 0.05 && comma_density > 0.03 {
            issues.push("Raw citations detected (bibliography dump)".to_string());
        }
    }

    if content.len() < 10 {
        issues.push("Response too short or empty".to_string());
    }

    if ERROR_INDICATORS.iter().any(|m| lowered.contains(m)) {
        issues.push("Error message in response content".to_string());
    }

    (issues.is_empty(), issues)
}

// ============================================================================
// Tests
// ============================================================================
