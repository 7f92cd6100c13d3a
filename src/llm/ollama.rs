//! Ollama provider for local LLM inference.
//!
//! Talks to a local Ollama instance over its native HTTP API. No API key;
//! the base URL defaults to `http://localhost:11434` and can be overridden
//! via credentials.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::llm::adapter::{mapped_sampling, to_openai_messages};
use crate::llm::provider::{
    map_transport_error, ChatParams, ChatResponse, Credentials, ModelInfo, ModelProvider,
    ProviderInfo, ProviderKind, TokenUsage,
};
use crate::types::{AppError, Message, Result};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Provider implementation for Ollama local models.
pub struct OllamaProvider {
    http: reqwest::Client,
}

impl OllamaProvider {
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
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelProvider for OllamaProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: ProviderKind::Ollama,
            label: "Ollama (Local)".to_string(),
            default_model: "llama3.2".to_string(),
            supports_streaming: true,
            requires_api_key: false,
        }
    }

    async fn validate(&self, credentials: &Credentials) -> Result<bool> {
        let base = Self::base_url(credentials);
        let response = self
            .http
            .get(format!("{base}/api/tags"))
            .send()
            .await
            .map_err(|e| {
                AppError::Transport(format!(
                    "cannot connect to Ollama at {base} (is 'ollama serve' running?): {e}"
                ))
            })?;
        Ok(response.status().is_success())
    }

    async fn list_models(&self, credentials: &Credentials) -> Result<Vec<ModelInfo>> {
        let base = Self::base_url(credentials);
        let response = self
            .http
            .get(format!("{base}/api/tags"))
            .send()
            .await
            .map_err(|e| map_transport_error("Ollama", e))?;
        let data: Value = response
            .json()
            .await
            .map_err(|e| AppError::Provider(format!("Ollama returned malformed JSON: {e}")))?;

        let models = data["models"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m["name"].as_str())
                    .map(|name| ModelInfo {
                        // Full name with tag is the chat id; display drops it.
                        id: name.to_string(),
                        name: name.split(':').next().unwrap_or(name).to_string(),
                        description: None,
                        context_length: None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(models)
    }

    async fn chat(
        &self,
        credentials: &Credentials,
        model: &str,
        messages: &[Message],
        params: &ChatParams,
    ) -> Result<ChatResponse> {
        let base = Self::base_url(credentials);

        let mut options = serde_json::Map::new();
        options.insert("temperature".to_string(), json!(params.temperature));
        options.insert("num_predict".to_string(), json!(params.max_tokens));
        for (key, value) in mapped_sampling(ProviderKind::Ollama, params) {
            options.insert(key.to_string(), value);
        }

        let payload = json!({
            "model": model,
            "messages": to_openai_messages(messages),
            "stream": false,
            "options": options,
        });

        let response = self
            .http
            .post(format!("{base}/api/chat"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| map_transport_error("Ollama", e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::Provider(format!(
                "model '{model}' not found; pull it first with: ollama pull {model}"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Provider(format!(
                "Ollama returned HTTP {status}: {body}"
            )));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| AppError::Provider(format!("Ollama returned malformed JSON: {e}")))?;

        let content = data["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        let usage = match (data["prompt_eval_count"].as_u64(), data["eval_count"].as_u64()) {
            (None, None) => None,
            (prompt, completion) => {
                let prompt = prompt.unwrap_or(0);
                let completion = completion.unwrap_or(0);
                Some(TokenUsage {
                    prompt_tokens: prompt,
                    completion_tokens: completion,
                    total_tokens: prompt + completion,
                })
            }
        };

        Ok(ChatResponse {
            content,
            model: model.to_string(),
            usage,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
