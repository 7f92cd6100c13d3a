//! Provider abstraction: one capability set over heterogeneous LM backends.
//!
//! Every backend (local HTTP servers and cloud APIs) implements
//! [`ModelProvider`]: credential validation, model listing, chat, and
//! metadata. Message-format adaptation and parameter mapping live in
//! [`crate::llm::adapter`] as pure functions keyed by [`ProviderKind`], not
//! as methods on the providers.
//!
//! A [`ProviderManager`] holds the active provider id, the active model,
//! and per-provider credentials, and routes `chat` calls accordingly.

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::{AppError, Message, Result};

// ============================================================================
// Provider Identity
// ============================================================================

/// The nine supported backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Ollama local server.
    Ollama,
    /// LM Studio local server (OpenAI-compatible).
    Lmstudio,
    /// OpenAI API.
    Openai,
    /// Anthropic API.
    Anthropic,
    /// Mistral API (OpenAI-compatible).
    Mistral,
    /// Google Gemini API.
    Google,
    /// Groq API (OpenAI-compatible).
    Groq,
    /// OpenRouter API (OpenAI-compatible).
    Openrouter,
    /// Perplexity API (OpenAI-compatible).
    Perplexity,
}

impl ProviderKind {
    /// Stable wire id.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::Lmstudio => "lmstudio",
            Self::Openai => "openai",
            Self::Anthropic => "anthropic",
            Self::Mistral => "mistral",
            Self::Google => "google",
            Self::Groq => "groq",
            Self::Openrouter => "openrouter",
            Self::Perplexity => "perplexity",
        }
    }

    /// All kinds, registry order.
    pub fn all() -> Vec<Self> {
        vec![
            Self::Ollama,
            Self::Lmstudio,
            Self::Openai,
            Self::Anthropic,
            Self::Mistral,
            Self::Google,
            Self::Groq,
            Self::Openrouter,
            Self::Perplexity,
        ]
    }
}

impl Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "lmstudio" => Ok(Self::Lmstudio),
            "openai" => Ok(Self::Openai),
            "anthropic" => Ok(Self::Anthropic),
            "mistral" => Ok(Self::Mistral),
            "google" => Ok(Self::Google),
            "groq" => Ok(Self::Groq),
            "openrouter" => Ok(Self::Openrouter),
            "perplexity" => Ok(Self::Perplexity),
            _ => Err(AppError::InvalidInput(format!("unknown provider: {s}"))),
        }
    }
}

// ============================================================================
// Capability Types
// ============================================================================

/// Provider credentials: local servers take a base URL, cloud APIs a key.
/// A base URL override is honoured everywhere, which is also how tests point
/// providers at a stub server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    /// API key for cloud providers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Base URL for local servers, or an endpoint override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Credentials {
    /// Credentials carrying only an API key.
    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            base_url: None,
        }
    }

    /// Credentials carrying only a base URL.
    pub fn base_url(url: impl Into<String>) -> Self {
        Self {
            api_key: None,
            base_url: Some(url.into()),
        }
    }
}

/// Information about one available model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model id to pass to `chat`.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Context window in tokens, where the backend reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_length: Option<u64>,
}

impl ModelInfo {
    /// Shorthand constructor for static model tables.
    pub fn new(
        id: &str,
        name: &str,
        description: Option<&str>,
        context_length: Option<u64>,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.map(str::to_string),
            context_length,
        }
    }
}

/// Canonical sampling parameters; each backend receives them translated by
/// [`crate::llm::adapter::mapped_sampling`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatParams {
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Nucleus sampling cutoff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Top-k sampling cutoff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Repetition penalty (spelled per backend by the parameter mapper).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f32>,
}

impl Default for ChatParams {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 512,
            top_p: None,
            top_k: None,
            repetition_penalty: None,
        }
    }
}

/// Token accounting reported by a backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt-side tokens.
    pub prompt_tokens: u64,
    /// Generated tokens.
    pub completion_tokens: u64,
    /// Sum of both.
    pub total_tokens: u64,
}

/// Normalised chat completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Generated text.
    pub content: String,
    /// Model that produced it.
    pub model: String,
    /// Usage, where the backend reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

/// Static provider metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    /// Provider id.
    pub id: ProviderKind,
    /// Human-readable label.
    pub label: String,
    /// Default model id.
    pub default_model: String,
    /// Whether the backend can stream tokens (not used by this server).
    pub supports_streaming: bool,
    /// Whether an API key is required.
    pub requires_api_key: bool,
}

// ============================================================================
// Provider Trait
// ============================================================================

/// One LM backend behind the unified capability set.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Static metadata.
    fn info(&self) -> ProviderInfo;

    /// Cheap authenticated round-trip. Returns true on success and maps
    /// failures onto the typed provider errors.
    async fn validate(&self, credentials: &Credentials) -> Result<bool>;

    /// Available models, dynamic where the backend supports it with a
    /// static fallback otherwise.
    async fn list_models(&self, credentials: &Credentials) -> Result<Vec<ModelInfo>>;

    /// Generate a chat completion.
    async fn chat(
        &self,
        credentials: &Credentials,
        model: &str,
        messages: &[Message],
        params: &ChatParams,
    ) -> Result<ChatResponse>;
}

/// Map an HTTP error status + body onto the typed provider errors.
pub(crate) fn map_status_error(label: &str, status: u16, body: &str) -> AppError {
    let lowered = body.to_lowercase();
    match status {
        401 | 403 => AppError::ProviderAuth(format!("{label} rejected the API key: {body}")),
        429 => AppError::ProviderRateLimit(format!("{label} rate limit exceeded: {body}")),
        _ if lowered.contains("context") || lowered.contains("maximum") => {
            AppError::ProviderContext(format!("{label}: {body}"))
        }
        _ => AppError::Provider(format!("{label} returned HTTP {status}: {body}")),
    }
}

/// Map a reqwest transport failure onto [`AppError::Transport`].
pub(crate) fn map_transport_error(label: &str, error: reqwest::Error) -> AppError {
    if error.is_timeout() {
        AppError::Transport(format!("{label} request timed out: {error}"))
    } else if error.is_connect() {
        AppError::Transport(format!("cannot connect to {label}: {error}"))
    } else {
        AppError::Transport(format!("{label} request failed: {error}"))
    }
}

// ============================================================================
// Registry and Manager
// ============================================================================

/// Immutable registry of the nine providers.
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn ModelProvider>>,
}

impl ProviderRegistry {
    /// Registry with every supported backend.
    pub fn standard() -> Self {
        use crate::llm::anthropic::AnthropicProvider;
        use crate::llm::google::GoogleProvider;
        use crate::llm::ollama::OllamaProvider;
        use crate::llm::openai_compat::OpenAiCompatProvider;

        let mut providers: HashMap<ProviderKind, Arc<dyn ModelProvider>> = HashMap::new();
        providers.insert(ProviderKind::Ollama, Arc::new(OllamaProvider::new()));
        providers.insert(
            ProviderKind::Lmstudio,
            Arc::new(OpenAiCompatProvider::lmstudio()),
        );
        providers.insert(ProviderKind::Openai, Arc::new(OpenAiCompatProvider::openai()));
        providers.insert(ProviderKind::Anthropic, Arc::new(AnthropicProvider::new()));
        providers.insert(
            ProviderKind::Mistral,
            Arc::new(OpenAiCompatProvider::mistral()),
        );
        providers.insert(ProviderKind::Google, Arc::new(GoogleProvider::new()));
        providers.insert(ProviderKind::Groq, Arc::new(OpenAiCompatProvider::groq()));
        providers.insert(
            ProviderKind::Openrouter,
            Arc::new(OpenAiCompatProvider::openrouter()),
        );
        providers.insert(
            ProviderKind::Perplexity,
            Arc::new(OpenAiCompatProvider::perplexity()),
        );
        Self { providers }
    }

    /// Empty registry, populated via [`ProviderRegistry::register`]. Used by
    /// tests to install mock providers.
    pub fn empty() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Install (or replace) a provider.
    pub fn register(&mut self, kind: ProviderKind, provider: Arc<dyn ModelProvider>) {
        self.providers.insert(kind, provider);
    }

    /// Look up a provider.
    pub fn get(&self, kind: ProviderKind) -> Result<Arc<dyn ModelProvider>> {
        self.providers
            .get(&kind)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("provider '{kind}' not registered")))
    }

    /// Metadata for every registered provider, registry order.
    pub fn provider_info(&self) -> Vec<ProviderInfo> {
        ProviderKind::all()
            .into_iter()
            .filter_map(|kind| self.providers.get(&kind))
            .map(|p| p.info())
            .collect()
    }
}

struct ActiveState {
    provider: ProviderKind,
    model: Option<String>,
    /// Context length of the active model, when known; drives focused
    /// retrieval widths.
    context_length: Option<u64>,
    credentials: HashMap<ProviderKind, Credentials>,
}

/// Routes chat traffic to the active provider and keeps per-provider
/// credentials. Shared process-wide; all consumers (controller, condenser,
/// extractor) receive the same handle by constructor.
pub struct ProviderManager {
    registry: ProviderRegistry,
    state: RwLock<ActiveState>,
}

impl ProviderManager {
    /// Manager over the given registry.
    pub fn new(
        registry: ProviderRegistry,
        active_provider: ProviderKind,
        active_model: Option<String>,
    ) -> Self {
        Self {
            registry,
            state: RwLock::new(ActiveState {
                provider: active_provider,
                model: active_model,
                context_length: None,
                credentials: HashMap::new(),
            }),
        }
    }

    /// The active provider id.
    pub fn active_provider(&self) -> ProviderKind {
        self.state.read().provider
    }

    /// The model chats run against: the explicitly selected one, or the
    /// active provider's default.
    pub fn active_model(&self) -> Result<String> {
        let state = self.state.read();
        if let Some(model) = &state.model {
            return Ok(model.clone());
        }
        Ok(self.registry.get(state.provider)?.info().default_model)
    }

    /// Context length of the active model, when known.
    pub fn context_length(&self) -> Option<u64> {
        self.state.read().context_length
    }

    /// Record the context length of the active model (from model listings).
    pub fn set_context_length(&self, context_length: Option<u64>) {
        self.state.write().context_length = context_length;
    }

    /// Switch the active provider and optionally the model.
    pub fn set_active(&self, provider: ProviderKind, model: Option<String>) -> Result<()> {
        self.registry.get(provider)?;
        let mut state = self.state.write();
        state.provider = provider;
        state.model = model;
        state.context_length = None;
        Ok(())
    }

    /// Store credentials for a provider.
    pub fn set_credentials(&self, provider: ProviderKind, credentials: Credentials) {
        self.state.write().credentials.insert(provider, credentials);
    }

    /// Credentials for a provider (empty when none were stored).
    pub fn credentials_for(&self, provider: ProviderKind) -> Credentials {
        self.state
            .read()
            .credentials
            .get(&provider)
            .cloned()
            .unwrap_or_default()
    }

    /// Metadata of every registered provider.
    pub fn provider_info(&self) -> Vec<ProviderInfo> {
        self.registry.provider_info()
    }

    /// Validate a provider's stored (or given) credentials.
    pub async fn validate(
        &self,
        provider: ProviderKind,
        credentials: Option<Credentials>,
    ) -> Result<bool> {
        let creds = credentials.unwrap_or_else(|| self.credentials_for(provider));
        self.registry.get(provider)?.validate(&creds).await
    }

    /// Model listing for a provider (the active one by default).
    pub async fn list_models(&self, provider: Option<ProviderKind>) -> Result<Vec<ModelInfo>> {
        let provider = provider.unwrap_or_else(|| self.active_provider());
        let creds = self.credentials_for(provider);
        self.registry.get(provider)?.list_models(&creds).await
    }

    /// Chat against the active provider and model.
    pub async fn chat(&self, messages: &[Message], params: &ChatParams) -> Result<ChatResponse> {
        let provider = self.active_provider();
        let model = self.active_model()?;
        let creds = self.credentials_for(provider);
        self.registry
            .get(provider)?
            .chat(&creds, &model, messages, params)
            .await
    }
}

// ============================================================================
// Tests
// ============================================================================
