//! OpenAI-wire providers.
//!
//! Six backends speak the OpenAI chat-completions wire format: the OpenAI
//! API itself, the LM Studio local server, and the Mistral, Groq,
//! OpenRouter, and Perplexity cloud APIs. One client parameterised by a
//! per-provider table covers them all; the differences are the base URL,
//! the default model, the static model fallback, and how credentials are
//! validated.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::llm::adapter::{mapped_sampling, to_openai_messages};
use crate::llm::provider::{
    map_status_error, map_transport_error, ChatParams, ChatResponse, Credentials, ModelInfo,
    ModelProvider, ProviderInfo, ProviderKind, TokenUsage,
};
use crate::types::{AppError, Message, Result};

/// Static per-provider configuration.
struct CompatConfig {
    kind: ProviderKind,
    label: &'static str,
    default_base_url: &'static str,
    default_model: &'static str,
    requires_api_key: bool,
    /// Static model table used when the `/models` endpoint is unreachable.
    /// Empty means the listing is strictly dynamic.
    fallback_models: &'static [(&'static str, &'static str, Option<u64>)],
    /// Validate with a 1-token completion instead of `/models`
    /// (Perplexity exposes no model listing).
    validate_with_completion: bool,
}

/// One OpenAI-compatible backend.
pub struct OpenAiCompatProvider {
    config: CompatConfig,
    http: reqwest::Client,
}

impl OpenAiCompatProvider {
    fn with_config(config: CompatConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// OpenAI API.
    pub fn openai() -> Self {
        Self::with_config(CompatConfig {
            kind: ProviderKind::Openai,
            label: "OpenAI",
            default_base_url: "https://api.openai.com/v1",
            default_model: "gpt-4o-mini",
            requires_api_key: true,
            fallback_models: &[
                ("gpt-4o", "GPT-4o", Some(128_000)),
                ("gpt-4o-mini", "GPT-4o Mini", Some(128_000)),
                ("gpt-4-turbo", "GPT-4 Turbo", Some(128_000)),
            ],
            validate_with_completion: false,
        })
    }

    /// LM Studio local server. The user must load a model in LM Studio
    /// first; the listing is strictly dynamic.
    pub fn lmstudio() -> Self {
        Self::with_config(CompatConfig {
            kind: ProviderKind::Lmstudio,
            label: "LM Studio (Local)",
            default_base_url: "http://localhost:1234/v1",
            default_model: "",
            requires_api_key: false,
            fallback_models: &[],
            validate_with_completion: false,
        })
    }

    /// Mistral API.
    pub fn mistral() -> Self {
        Self::with_config(CompatConfig {
            kind: ProviderKind::Mistral,
            label: "Mistral",
            default_base_url: "https://api.mistral.ai/v1",
            default_model: "mistral-large-latest",
            requires_api_key: true,
            fallback_models: &[
                ("mistral-large-latest", "Mistral Large", Some(128_000)),
                ("mistral-small-latest", "Mistral Small", Some(32_000)),
            ],
            validate_with_completion: false,
        })
    }

    /// Groq API.
    pub fn groq() -> Self {
        Self::with_config(CompatConfig {
            kind: ProviderKind::Groq,
            label: "Groq",
            default_base_url: "https://api.groq.com/openai/v1",
            default_model: "llama-3.3-70b-versatile",
            requires_api_key: true,
            fallback_models: &[
                ("llama-3.3-70b-versatile", "Llama 3.3 70B", Some(32_768)),
                ("llama-3.1-8b-instant", "Llama 3.1 8B", Some(131_072)),
            ],
            validate_with_completion: false,
        })
    }

    /// OpenRouter API.
    pub fn openrouter() -> Self {
        Self::with_config(CompatConfig {
            kind: ProviderKind::Openrouter,
            label: "OpenRouter",
            default_base_url: "https://openrouter.ai/api/v1",
            default_model: "anthropic/claude-3.5-sonnet",
            requires_api_key: true,
            fallback_models: &[
                ("anthropic/claude-3.5-sonnet", "Claude 3.5 Sonnet", Some(200_000)),
                ("openai/gpt-4-turbo", "GPT-4 Turbo", Some(128_000)),
            ],
            validate_with_completion: false,
        })
    }

    /// Perplexity API (optional ninth backend).
    pub fn perplexity() -> Self {
        Self::with_config(CompatConfig {
            kind: ProviderKind::Perplexity,
            label: "Perplexity",
            default_base_url: "https://api.perplexity.ai",
            default_model: "sonar",
            requires_api_key: true,
            fallback_models: &[
                ("sonar", "Sonar", Some(127_072)),
                ("sonar-pro", "Sonar Pro", Some(127_072)),
            ],
            validate_with_completion: true,
        })
    }

    fn base_url(&self, credentials: &Credentials) -> String {
        let mut base = credentials
            .base_url
            .clone()
            .unwrap_or_else(|| self.config.default_base_url.to_string());
        base = base.trim_end_matches('/').to_string();
        // LM Studio clients must hit the /v1 prefix even when the user
        // configures the bare server address.
        if self.config.kind == ProviderKind::Lmstudio && !base.ends_with("/v1") {
            base.push_str("/v1");
        }
        base
    }

    fn check_key<'a>(&self, credentials: &'a Credentials) -> Result<Option<&'a str>> {
        if self.config.requires_api_key && credentials.api_key.as_deref().unwrap_or("").is_empty() {
            return Err(AppError::ProviderAuth(format!(
                "{} API key is required",
                self.config.label
            )));
        }
        Ok(credentials.api_key.as_deref())
    }

    fn request(
        &self,
        method: reqwest::Method,
        url: String,
        api_key: Option<&str>,
    ) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, url);
        if let Some(key) = api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    fn fallback_models(&self) -> Vec<ModelInfo> {
        self.config
            .fallback_models
            .iter()
            .map(|(id, name, ctx)| ModelInfo::new(id, name, None, *ctx))
            .collect()
    }

    async fn fetch_models(&self, credentials: &Credentials) -> Result<Vec<ModelInfo>> {
        let api_key = self.check_key(credentials)?;
        let base = self.base_url(credentials);
        let response = self
            .request(reqwest::Method::GET, format!("{base}/models"), api_key)
            .send()
            .await
            .map_err(|e| map_transport_error(self.config.label, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status_error(self.config.label, status.as_u16(), &body));
        }

        let data: Value = response.json().await.map_err(|e| {
            AppError::Provider(format!("{} returned malformed JSON: {e}", self.config.label))
        })?;

        Ok(data["data"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m["id"].as_str())
                    .map(|id| ModelInfo::new(id, id, None, None))
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: self.config.kind,
            label: self.config.label.to_string(),
            default_model: self.config.default_model.to_string(),
            supports_streaming: true,
            requires_api_key: self.config.requires_api_key,
        }
    }

    async fn validate(&self, credentials: &Credentials) -> Result<bool> {
        if self.config.validate_with_completion {
            // Minimal 1-token completion as the authenticated round-trip.
            let params = ChatParams {
                temperature: 0.0,
                max_tokens: 1,
                ..Default::default()
            };
            self.chat(
                credentials,
                self.config.default_model,
                &[Message::user("Hi")],
                &params,
            )
            .await?;
            return Ok(true);
        }

        let models = self.fetch_models(credentials).await?;
        if self.config.kind == ProviderKind::Lmstudio && models.is_empty() {
            return Err(AppError::Provider(
                "LM Studio is running but no models are loaded; load a model first".to_string(),
            ));
        }
        Ok(true)
    }

    async fn list_models(&self, credentials: &Credentials) -> Result<Vec<ModelInfo>> {
        match self.fetch_models(credentials).await {
            Ok(models) => Ok(models),
            Err(e) if !self.config.fallback_models.is_empty() => {
                tracing::warn!(provider = %self.config.kind, error = %e,
                    "model listing failed; using static fallback");
                Ok(self.fallback_models())
            }
            Err(e) => Err(e),
        }
    }

    async fn chat(
        &self,
        credentials: &Credentials,
        model: &str,
        messages: &[Message],
        params: &ChatParams,
    ) -> Result<ChatResponse> {
        let api_key = self.check_key(credentials)?;
        let base = self.base_url(credentials);

        let mut payload = serde_json::Map::new();
        payload.insert("model".to_string(), json!(model));
        payload.insert("messages".to_string(), to_openai_messages(messages));
        payload.insert("temperature".to_string(), json!(params.temperature));
        payload.insert("max_tokens".to_string(), json!(params.max_tokens));
        for (key, value) in mapped_sampling(self.config.kind, params) {
            payload.insert(key.to_string(), value);
        }

        let response = self
            .request(
                reqwest::Method::POST,
                format!("{base}/chat/completions"),
                api_key,
            )
            .json(&Value::Object(payload))
            .send()
            .await
            .map_err(|e| map_transport_error(self.config.label, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status_error(self.config.label, status.as_u16(), &body));
        }

        let data: Value = response.json().await.map_err(|e| {
            AppError::Provider(format!("{} returned malformed JSON: {e}", self.config.label))
        })?;

        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let model_name = data["model"].as_str().unwrap_or(model).to_string();

        let usage = data.get("usage").and_then(|u| {
            u.as_object().map(|u| TokenUsage {
                prompt_tokens: u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0),
                completion_tokens: u
                    .get("completion_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
                total_tokens: u.get("total_tokens").and_then(Value::as_u64).unwrap_or(0),
            })
        });

        Ok(ChatResponse {
            content,
            model: model_name,
            usage,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
