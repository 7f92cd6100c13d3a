//! Profile storage: settings and the on-disk data layout.
//!
//! All persisted state lives under one directory per profile. Beneath it,
//! each embedding model gets its own sub-directory holding the vector
//! collection and the sibling BM25 snapshot, so switching models switches
//! namespaces instead of corrupting one. A `settings.json` blob at the
//! profile root carries the active provider and model, the embedding model,
//! the catalogue path, and per-provider credentials.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::db;
use crate::llm::provider::{Credentials, ProviderKind};
use crate::rag::embeddings::EmbeddingModelId;
use crate::types::{AppError, Result};

/// Per-provider settings blob.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Whether the provider is enabled in the UI.
    #[serde(default)]
    pub enabled: bool,
    /// Stored credentials.
    #[serde(default)]
    pub credentials: Credentials,
}

/// Profile-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Active provider id.
    #[serde(default = "default_provider")]
    pub active_provider: ProviderKind,
    /// Active model, None for the provider default.
    #[serde(default)]
    pub active_model: Option<String>,
    /// Active embedding model.
    #[serde(default)]
    pub embedding_model: EmbeddingModelId,
    /// Path to the catalogue file.
    #[serde(default)]
    pub catalogue_path: Option<PathBuf>,
    /// Per-provider configuration.
    #[serde(default)]
    pub providers: HashMap<ProviderKind, ProviderSettings>,
}

fn default_provider() -> ProviderKind {
    ProviderKind::Ollama
}

impl Default for Settings {
    fn default() -> Self {
        let mut providers = HashMap::new();
        providers.insert(
            ProviderKind::Ollama,
            ProviderSettings {
                enabled: true,
                credentials: Credentials::base_url("http://localhost:11434"),
            },
        );
        Self {
            active_provider: ProviderKind::Ollama,
            active_model: None,
            embedding_model: EmbeddingModelId::default(),
            catalogue_path: None,
            providers,
        }
    }
}

impl Settings {
    /// Copy with API keys masked for transport to a client. The masked
    /// sentinel round-trips: saving `***` preserves the stored key.
    pub fn masked(&self) -> Settings {
        let mut masked = self.clone();
        for settings in masked.providers.values_mut() {
            if settings
                .credentials
                .api_key
                .as_deref()
                .is_some_and(|k| !k.is_empty())
            {
                settings.credentials.api_key = Some("***".to_string());
            }
        }
        masked
    }
}

/// Manages one profile's directory tree and settings blob.
pub struct ProfileManager {
    profile_dir: PathBuf,
}

impl ProfileManager {
    /// Manager for `base_dir/<profile>`.
    pub fn new(base_dir: impl Into<PathBuf>, profile: &str) -> Result<Self> {
        let profile_dir = base_dir.into().join(profile);
        std::fs::create_dir_all(&profile_dir).map_err(|e| {
            AppError::Configuration(format!(
                "cannot create profile directory {}: {e}",
                profile_dir.display()
            ))
        })?;
        Ok(Self { profile_dir })
    }

    /// Root of this profile.
    pub fn profile_dir(&self) -> &Path {
        &self.profile_dir
    }

    /// Directory holding the vector collection and BM25 snapshot for one
    /// embedding model.
    pub fn model_dir(&self, model_id: EmbeddingModelId) -> PathBuf {
        self.profile_dir.join(model_id.to_string())
    }

    /// Path of the BM25 snapshot for one embedding model.
    pub fn bm25_path(&self, model_id: EmbeddingModelId) -> PathBuf {
        self.model_dir(model_id)
            .join(db::bm25_file_name(&model_id.to_string()))
    }

    fn settings_path(&self) -> PathBuf {
        self.profile_dir.join("settings.json")
    }

    /// Load settings, falling back to defaults when none are stored.
    pub fn load_settings(&self) -> Settings {
        let path = self.settings_path();
        if !path.exists() {
            return Settings::default();
        }
        match std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_json::from_str::<Settings>(&raw).map_err(|e| e.to_string()))
        {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e,
                    "failed to load settings; using defaults");
                Settings::default()
            }
        }
    }

    /// Persist settings. Masked API keys (`***`) in the incoming blob are
    /// replaced with the currently stored keys before writing.
    pub fn save_settings(&self, mut settings: Settings) -> Result<Settings> {
        let current = self.load_settings();
        for (kind, provider) in settings.providers.iter_mut() {
            if provider.credentials.api_key.as_deref() == Some("***") {
                provider.credentials.api_key = current
                    .providers
                    .get(kind)
                    .and_then(|p| p.credentials.api_key.clone());
            }
        }

        let json = serde_json::to_string_pretty(&settings)
            .map_err(|e| AppError::Internal(format!("failed to serialize settings: {e}")))?;
        std::fs::write(self.settings_path(), json)
            .map_err(|e| AppError::Internal(format!("failed to write settings: {e}")))?;
        Ok(settings)
    }
}

// ============================================================================
// Tests
// ============================================================================
