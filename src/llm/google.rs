//! Google Gemini provider.
//!
//! Uses the Generative Language REST API. The system prompt travels as a
//! `systemInstruction`, the assistant role is renamed to `model`, and
//! content is wrapped in `parts`, courtesy of the Gemini message adapter.
//! Gemini can be slow on long prompts, so this client uses a 120 second
//! timeout instead of the default.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::llm::adapter::{mapped_sampling, to_gemini_messages};
use crate::llm::provider::{
    map_status_error, map_transport_error, ChatParams, ChatResponse, Credentials, ModelInfo,
    ModelProvider, ProviderInfo, ProviderKind, TokenUsage,
};
use crate::types::{AppError, Message, Result};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Provider implementation for Google Gemini.
pub struct GoogleProvider {
    http: reqwest::Client,
}

impl GoogleProvider {
    /// Create the provider with a long-timeout HTTP client.
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client"),
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
            .ok_or_else(|| AppError::ProviderAuth("Google API key is required".to_string()))
    }

    fn fallback_models() -> Vec<ModelInfo> {
        vec![
            ModelInfo::new(
                "gemini-1.5-pro-latest",
                "Gemini 1.5 Pro (Latest)",
                Some("Most capable model, auto-updated"),
                Some(2_000_000),
            ),
            ModelInfo::new(
                "gemini-1.5-flash-latest",
                "Gemini 1.5 Flash (Latest)",
                Some("Fast and efficient, auto-updated"),
                Some(1_000_000),
            ),
            ModelInfo::new(
                "gemini-2.0-flash",
                "Gemini 2.0 Flash",
                Some("Latest generation"),
                Some(1_000_000),
            ),
        ]
    }
}

impl Default for GoogleProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelProvider for GoogleProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: ProviderKind::Google,
            label: "Google".to_string(),
            default_model: "gemini-1.5-pro-latest".to_string(),
            supports_streaming: true,
            requires_api_key: true,
        }
    }

    async fn validate(&self, credentials: &Credentials) -> Result<bool> {
        let key = Self::api_key(credentials)?;
        let base = Self::base_url(credentials);
        let response = self
            .http
            .get(format!("{base}/models?key={key}"))
            .send()
            .await
            .map_err(|e| map_transport_error("Google", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status_error("Google", status.as_u16(), &body));
        }
        Ok(true)
    }

    async fn list_models(&self, credentials: &Credentials) -> Result<Vec<ModelInfo>> {
        let key = Self::api_key(credentials)?;
        let base = Self::base_url(credentials);
        let response = self.http.get(format!("{base}/models?key={key}")).send().await;

        let response = match response {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                let status = r.status();
                let body = r.text().await.unwrap_or_default();
                return Err(map_status_error("Google", status.as_u16(), &body));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Google model listing failed; using static fallback");
                return Ok(Self::fallback_models());
            }
        };

        let data: Value = response
            .json()
            .await
            .map_err(|e| AppError::Provider(format!("Google returned malformed JSON: {e}")))?;

        let models = data["models"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter(|m| {
                        m["supportedGenerationMethods"]
                            .as_array()
                            .is_some_and(|methods| {
                                methods.iter().any(|v| v.as_str() == Some("generateContent"))
                            })
                    })
                    .filter_map(|m| {
                        let name = m["name"].as_str()?;
                        // Listed names carry a "models/" prefix; chat ids do not.
                        let id = name.strip_prefix("models/").unwrap_or(name);
                        Some(ModelInfo {
                            id: id.to_string(),
                            name: m["displayName"].as_str().unwrap_or(id).to_string(),
                            description: m["description"].as_str().map(str::to_string),
                            context_length: m["inputTokenLimit"].as_u64(),
                        })
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

        let (system_instruction, contents) = to_gemini_messages(messages);

        let mut generation_config = serde_json::Map::new();
        generation_config.insert("temperature".to_string(), json!(params.temperature));
        generation_config.insert("maxOutputTokens".to_string(), json!(params.max_tokens));
        for (param_key, value) in mapped_sampling(ProviderKind::Google, params) {
            let spelled = match param_key {
                "top_p" => "topP",
                "top_k" => "topK",
                other => other,
            };
            generation_config.insert(spelled.to_string(), value);
        }

        let mut payload = serde_json::Map::new();
        payload.insert("contents".to_string(), contents);
        payload.insert(
            "generationConfig".to_string(),
            Value::Object(generation_config),
        );
        if let Some(instruction) = system_instruction {
            payload.insert(
                "systemInstruction".to_string(),
                json!({ "parts": [{ "text": instruction }] }),
            );
        }

        let response = self
            .http
            .post(format!("{base}/models/{model}:generateContent?key={key}"))
            .json(&Value::Object(payload))
            .send()
            .await
            .map_err(|e| map_transport_error("Google", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status_error("Google", status.as_u16(), &body));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| AppError::Provider(format!("Google returned malformed JSON: {e}")))?;

        let content = data["candidates"][0]["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if content.is_empty() {
            return Err(AppError::Provider(
                "no content in Google Gemini response".to_string(),
            ));
        }

        let usage = data.get("usageMetadata").and_then(|u| u.as_object()).map(|u| TokenUsage {
            prompt_tokens: u.get("promptTokenCount").and_then(Value::as_u64).unwrap_or(0),
            completion_tokens: u
                .get("candidatesTokenCount")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            total_tokens: u.get("totalTokenCount").and_then(Value::as_u64).unwrap_or(0),
        });

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info() {
        let info = GoogleProvider::new().info();
        assert_eq!(info.id, ProviderKind::Google);
        assert!(info.requires_api_key);
    }

    #[tokio::test]
    async fn test_chat_uses_system_instruction_and_model_role() {
        use wiremock::matchers::{body_partial_json, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-1.5-flash:generateContent"))
            .and(body_partial_json(json!({
                "systemInstruction": {"parts": [{"text": "be scholarly"}]},
                "contents": [
                    {"role": "user", "parts": [{"text": "q1"}]},
                    {"role": "model", "parts": [{"text": "a1"}]},
                    {"role": "user", "parts": [{"text": "q2"}]},
                ],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "Gemini answer."}]}}],
                "usageMetadata": {"promptTokenCount": 9, "candidatesTokenCount": 3, "totalTokenCount": 12}
            })))
            .mount(&server)
            .await;

        let provider = GoogleProvider::new();
        let creds = Credentials {
            api_key: Some("g-key".to_string()),
            base_url: Some(server.uri()),
        };
        let messages = vec![
            Message::system("be scholarly"),
            Message::user("q1"),
            Message::assistant("a1"),
            Message::user("q2"),
        ];
        let response = provider
            .chat(&creds, "gemini-1.5-flash", &messages, &ChatParams::default())
            .await
            .unwrap();
        assert_eq!(response.content, "Gemini answer.");
        assert_eq!(response.usage.unwrap().total_tokens, 12);
    }
}
