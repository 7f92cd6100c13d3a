//! Anthropic provider.
//!
//! Uses the Messages API. The system prompt travels as a separate field and
//! the conversation keeps only user/assistant turns, courtesy of the
//! Anthropic message adapter.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::llm::adapter::{mapped_sampling, to_anthropic_messages};
use crate::llm::provider::{
    map_status_error, map_transport_error, ChatParams, ChatResponse, Credentials, ModelInfo,
    ModelProvider, ProviderInfo, ProviderKind, TokenUsage,
};
use crate::types::{AppError, Message, Result};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Provider implementation for the Anthropic API.
pub struct AnthropicProvider {
    http: reqwest::Client,
}

impl AnthropicProvider {
    /// Create the provider with a shared HTTP client.
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    fn base_url(credentials: &Credentials) -> String {
        credentials
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    fn api_key<'a>(credentials: &'a Credentials) -> Result<&'a str> {
        credentials
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::ProviderAuth("Anthropic API key is required".to_string()))
    }

    fn fallback_models() -> Vec<ModelInfo> {
        vec![
            ModelInfo::new(
                "claude-3-5-sonnet-latest",
                "Claude 3.5 Sonnet",
                Some("Best balance of intelligence and speed"),
                Some(200_000),
            ),
            ModelInfo::new(
                "claude-3-5-haiku-latest",
                "Claude 3.5 Haiku",
                Some("Fastest model"),
                Some(200_000),
            ),
            ModelInfo::new(
                "claude-3-opus-latest",
                "Claude 3 Opus",
                Some("Most capable model"),
                Some(200_000),
            ),
        ]
    }
}

impl Default for AnthropicProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: ProviderKind::Anthropic,
            label: "Anthropic".to_string(),
            default_model: "claude-3-5-sonnet-latest".to_string(),
            supports_streaming: true,
            requires_api_key: true,
        }
    }

    async fn validate(&self, credentials: &Credentials) -> Result<bool> {
        let key = Self::api_key(credentials)?;
        let base = Self::base_url(credentials);
        let response = self
            .http
            .get(format!("{base}/v1/models"))
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION)
            .send()
            .await
            .map_err(|e| map_transport_error("Anthropic", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status_error("Anthropic", status.as_u16(), &body));
        }
        Ok(true)
    }

    async fn list_models(&self, credentials: &Credentials) -> Result<Vec<ModelInfo>> {
        let key = Self::api_key(credentials)?;
        let base = Self::base_url(credentials);
        let response = self
            .http
            .get(format!("{base}/v1/models"))
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION)
            .send()
            .await;

        let response = match response {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                let status = r.status();
                let body = r.text().await.unwrap_or_default();
                return Err(map_status_error("Anthropic", status.as_u16(), &body));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Anthropic model listing failed; using static fallback");
                return Ok(Self::fallback_models());
            }
        };

        let data: Value = response
            .json()
            .await
            .map_err(|e| AppError::Provider(format!("Anthropic returned malformed JSON: {e}")))?;

        let models = data["data"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m["id"].as_str())
                    .map(|id| {
                        ModelInfo::new(
                            id,
                            m_display_name(&data, id).unwrap_or(id),
                            None,
                            Some(200_000),
                        )
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        if models.is_empty() {
            Ok(Self::fallback_models())
        } else {
            Ok(models)
        }
    }

    async fn chat(
        &self,
        credentials: &Credentials,
        model: &str,
        messages: &[Message],
        params: &ChatParams,
    ) -> Result<ChatResponse> {
        let key = Self::api_key(credentials)?;
        let base = Self::base_url(credentials);

        let (system, conversation) = to_anthropic_messages(messages);
        let mut payload = serde_json::Map::new();
        payload.insert("model".to_string(), json!(model));
        payload.insert("messages".to_string(), conversation);
        payload.insert("max_tokens".to_string(), json!(params.max_tokens));
        payload.insert("temperature".to_string(), json!(params.temperature));
        if let Some(system) = system {
            payload.insert("system".to_string(), json!(system));
        }
        for (param_key, value) in mapped_sampling(ProviderKind::Anthropic, params) {
            payload.insert(param_key.to_string(), value);
        }

        let response = self
            .http
            .post(format!("{base}/v1/messages"))
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION)
            .json(&Value::Object(payload))
            .send()
            .await
            .map_err(|e| map_transport_error("Anthropic", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status_error("Anthropic", status.as_u16(), &body));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| AppError::Provider(format!("Anthropic returned malformed JSON: {e}")))?;

        let content = data["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let usage = data.get("usage").and_then(|u| u.as_object()).map(|u| {
            let prompt = u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
            let completion = u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0);
            TokenUsage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: prompt + completion,
            }
        });

        Ok(ChatResponse {
            content,
            model: data["model"].as_str().unwrap_or(model).to_string(),
            usage,
        })
    }
}

/// The listing carries display names next to ids; resolve one if present.
fn m_display_name<'a>(data: &'a Value, id: &str) -> Option<&'a str> {
    data["data"]
        .as_array()?
        .iter()
        .find(|m| m["id"].as_str() == Some(id))?["display_name"]
        .as_str()
}

// ============================================================================
// Tests
// ============================================================================
