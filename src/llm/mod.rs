//! LLM provider abstraction.
//!
//! A unified chat capability over heterogeneous backends:
//!
//! - [`provider`] - the [`ModelProvider`] trait, provider registry and
//!   manager, and the typed provider error mapping
//! - [`adapter`] - message-format adapters and the parameter mapper, pure
//!   functions keyed by [`ProviderKind`]
//! - [`validator`] - non-fatal response validation
//! - [`ollama`] - Ollama native API client
//! - [`openai_compat`] - the six OpenAI-wire backends (OpenAI, LM Studio,
//!   Mistral, Groq, OpenRouter, Perplexity)
//! - [`anthropic`] - Anthropic Messages API client
//! - [`google`] - Google Gemini REST client

pub mod adapter;
pub mod anthropic;
pub mod google;
pub mod ollama;
pub mod openai_compat;
pub mod provider;
pub mod validator;

pub use provider::{
    ChatParams, ChatResponse, Credentials, ModelInfo, ModelProvider, ProviderInfo, ProviderKind,
    ProviderManager, ProviderRegistry, TokenUsage,
};
pub use validator::validate_chat_response;
