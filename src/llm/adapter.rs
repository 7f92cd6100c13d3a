//! Message-format adapters and the parameter mapper.
//!
//! Both are standalone pure functions keyed by [`ProviderKind`]:
//!
//! - OpenAI-family backends (including the local OpenAI-compatible servers)
//!   take the canonical message list unchanged.
//! - Anthropic takes the system message as a separate field; the
//!   conversation keeps only user/assistant turns.
//! - Gemini takes the system message as a "system instruction", renames the
//!   assistant role to `model`, and wraps content in `parts`.
//!
//! The parameter mapper translates the canonical sampling names to each
//! backend's spelling and drops what a backend does not support.

use serde_json::{json, Value};

use crate::llm::provider::{ChatParams, ProviderKind};
use crate::types::{Message, MessageRole};

/// Canonical role string for the OpenAI wire format.
fn role_str(role: MessageRole) -> &'static str {
    match role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    }
}

/// OpenAI-family shape: pass through unchanged.
pub fn to_openai_messages(messages: &[Message]) -> Value {
    Value::Array(
        messages
            .iter()
            .map(|m| json!({ "role": role_str(m.role), "content": m.content }))
            .collect(),
    )
}

/// Anthropic shape: `(system, conversation)`. The system message becomes a
/// separate parameter; the conversation retains only user/assistant turns.
pub fn to_anthropic_messages(messages: &[Message]) -> (Option<String>, Value) {
    let mut system = None;
    let mut conversation = Vec::new();
    for message in messages {
        match message.role {
            MessageRole::System => system = Some(message.content.clone()),
            role => conversation.push(json!({
                "role": role_str(role),
                "content": message.content,
            })),
        }
    }
    (system, Value::Array(conversation))
}

/// Gemini shape: `(system_instruction, contents)`. The assistant role is
/// renamed to `model` and content is wrapped in `parts`.
pub fn to_gemini_messages(messages: &[Message]) -> (Option<String>, Value) {
    let mut system_instruction = None;
    let mut contents = Vec::new();
    for message in messages {
        match message.role {
            MessageRole::System => system_instruction = Some(message.content.clone()),
            MessageRole::User => contents.push(json!({
                "role": "user",
                "parts": [{ "text": message.content }],
            })),
            MessageRole::Assistant => contents.push(json!({
                "role": "model",
                "parts": [{ "text": message.content }],
            })),
        }
    }
    (system_instruction, Value::Array(contents))
}

/// Translate the canonical sampling parameters into `(key, value)` pairs in
/// the backend's spelling. Temperature and max-tokens are handled by each
/// client directly; this covers the optional knobs.
pub fn mapped_sampling(kind: ProviderKind, params: &ChatParams) -> Vec<(&'static str, Value)> {
    let mut mapped = Vec::new();

    match kind {
        ProviderKind::Ollama => {
            if let Some(top_p) = params.top_p {
                mapped.push(("top_p", json!(top_p)));
            }
            if let Some(top_k) = params.top_k {
                mapped.push(("top_k", json!(top_k)));
            }
            if let Some(penalty) = params.repetition_penalty {
                mapped.push(("repeat_penalty", json!(penalty)));
            }
        }
        ProviderKind::Lmstudio
        | ProviderKind::Openai
        | ProviderKind::Mistral
        | ProviderKind::Groq
        | ProviderKind::Openrouter => {
            if let Some(top_p) = params.top_p {
                mapped.push(("top_p", json!(top_p)));
            }
            // These backends have no repetition penalty; frequency penalty
            // is the closest analogue. top_k is unsupported and dropped.
            if let Some(penalty) = params.repetition_penalty {
                mapped.push(("frequency_penalty", json!(penalty)));
            }
        }
        ProviderKind::Perplexity => {
            if let Some(top_p) = params.top_p {
                mapped.push(("top_p", json!(top_p)));
            }
        }
        ProviderKind::Anthropic | ProviderKind::Google => {
            if let Some(top_p) = params.top_p {
                mapped.push(("top_p", json!(top_p)));
            }
            if let Some(top_k) = params.top_k {
                mapped.push(("top_k", json!(top_k)));
            }
        }
    }

    mapped
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_messages() -> Vec<Message> {
        vec![
            Message::system("be helpful"),
            Message::user("hello"),
            Message::assistant("hi"),
            Message::user("again"),
        ]
    }

    #[test]
    fn test_openai_passthrough() {
        let value = to_openai_messages(&sample_messages());
        let items = value.as_array().unwrap();
        assert_eq!(items.len(), 4);
        assert_eq!(items[0]["role"], "system");
        assert_eq!(items[2]["role"], "assistant");
        assert_eq!(items[3]["content"], "again");
    }

    #[test]
    fn test_anthropic_extracts_system() {
        let (system, conversation) = to_anthropic_messages(&sample_messages());
        assert_eq!(system.as_deref(), Some("be helpful"));
        let items = conversation.as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|m| m["role"] != "system"));
    }

    #[test]
    fn test_gemini_renames_assistant_and_wraps_parts() {
        let (system, contents) = to_gemini_messages(&sample_messages());
        assert_eq!(system.as_deref(), Some("be helpful"));
        let items = contents.as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[1]["role"], "model");
        assert_eq!(items[1]["parts"][0]["text"], "hi");
    }

    #[test]
    fn test_parameter_mapper_spellings() {
        let params = ChatParams {
            temperature: 0.35,
            max_tokens: 2000,
            top_p: Some(0.9),
            top_k: Some(50),
            repetition_penalty: Some(1.15),
        };

        let ollama = mapped_sampling(ProviderKind::Ollama, &params);
        assert!(ollama.iter().any(|(k, _)| *k == "repeat_penalty"));
        assert!(ollama.iter().any(|(k, _)| *k == "top_k"));

        let openai = mapped_sampling(ProviderKind::Openai, &params);
        assert!(openai.iter().any(|(k, _)| *k == "frequency_penalty"));
        assert!(!openai.iter().any(|(k, _)| *k == "top_k"));

        let anthropic = mapped_sampling(ProviderKind::Anthropic, &params);
        assert!(anthropic.iter().any(|(k, _)| *k == "top_k"));
        assert!(!anthropic.iter().any(|(k, _)| *k == "frequency_penalty"));

        let perplexity = mapped_sampling(ProviderKind::Perplexity, &params);
        assert_eq!(perplexity.len(), 1);
        assert_eq!(perplexity[0].0, "top_p");
    }

    #[test]
    fn test_parameter_mapper_drops_absent_values() {
        let params = ChatParams::default();
        assert!(mapped_sampling(ProviderKind::Ollama, &params).is_empty());
        assert!(mapped_sampling(ProviderKind::Google, &params).is_empty());
    }
}
