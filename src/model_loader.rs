//! Constructs chat and embedding clients from configuration and environment.
//!
//! A [`ModelLoader`] is built once at process start. Construction fails fast
//! when any required credential is missing, listing every missing variable.
//! The chat provider is selected by `LLM_PROVIDER` (default `openai`), which
//! must name a block under `llm:` in the configuration file.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::{EmbeddingProvider, OpenAIProvider};
use crate::error::{PortalError, Result};
use crate::llm::{ChatModel, OpenAICompatibleChat, Provider};

/// Credentials that must be present before any model is loaded.
pub const REQUIRED_CREDENTIALS: &[&str] = &["OPENAI_API_KEY", "GROQ_API_KEY"];

/// Provider key used when `LLM_PROVIDER` is unset.
pub const DEFAULT_PROVIDER_KEY: &str = "openai";

pub struct ModelLoader {
    config: Arc<Config>,
    api_keys: BTreeMap<&'static str, String>,
    provider_key: String,
}

impl ModelLoader {
    /// Builds a loader reading credentials from the process environment.
    pub fn new(config: Arc<Config>) -> Result<Self> {
        Self::with_env(config, |key| std::env::var(key).ok())
    }

    /// Builds a loader reading credentials through `lookup`.
    pub fn with_env<F>(config: Arc<Config>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut api_keys = BTreeMap::new();
        let mut missing = Vec::new();
        for &var in REQUIRED_CREDENTIALS {
            match lookup(var).filter(|v| !v.trim().is_empty()) {
                Some(value) => {
                    api_keys.insert(var, value);
                }
                None => missing.push(var.to_string()),
            }
        }
        if !missing.is_empty() {
            tracing::error!(missing = ?missing, "Missing environment variables");
            return Err(PortalError::MissingCredentials(missing));
        }

        let provider_key = lookup("LLM_PROVIDER")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PROVIDER_KEY.to_string());

        tracing::info!(
            credentials = ?api_keys.keys().collect::<Vec<_>>(),
            provider_key = %provider_key,
            "Environment variables validated"
        );

        Ok(Self {
            config,
            api_keys,
            provider_key,
        })
    }

    /// The `llm:` block key selected for chat.
    pub fn provider_key(&self) -> &str {
        &self.provider_key
    }

    /// Loads the chat model selected by `LLM_PROVIDER`.
    pub fn load_llm(&self) -> Result<Arc<dyn ChatModel>> {
        let settings = self.config.llm.get(&self.provider_key).ok_or_else(|| {
            tracing::error!(provider_key = %self.provider_key, "LLM provider not found in configuration");
            PortalError::Config(format!(
                "LLM provider '{}' not found in configuration",
                self.provider_key
            ))
        })?;

        let provider = Provider::parse(&settings.provider).ok_or_else(|| {
            tracing::error!(provider = %settings.provider, "Unsupported LLM provider");
            PortalError::Config(format!("Unsupported LLM provider: {}", settings.provider))
        })?;

        let api_key = self.credential(provider.credential_var())?;
        let chat = OpenAICompatibleChat::new(provider, settings, api_key)?;
        tracing::info!(provider = ?provider, model = %settings.model_name, "LLM loaded");
        Ok(Arc::new(chat))
    }

    /// Loads the embedding model from the `embedding_model:` block.
    pub fn load_embeddings(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        let cfg = &self.config.embedding_model;
        tracing::info!(provider = %cfg.provider, model = %cfg.model_name, "Loading embedding model");
        match cfg.provider.as_str() {
            "openai" => {
                let api_key = self.credential("OPENAI_API_KEY")?;
                Ok(Arc::new(OpenAIProvider::new(cfg, api_key)?))
            }
            #[cfg(feature = "local-embeddings")]
            "local" => Ok(Arc::new(crate::embedding::LocalProvider::new(cfg)?)),
            #[cfg(not(feature = "local-embeddings"))]
            "local" => Err(PortalError::Config(
                "Local embedding provider requires --features local-embeddings".to_string(),
            )),
            other => Err(PortalError::Config(format!(
                "Unknown embedding provider: {}",
                other
            ))),
        }
    }

    fn credential(&self, var: &str) -> Result<String> {
        self.api_keys
            .get(var)
            .cloned()
            .ok_or_else(|| PortalError::MissingCredentials(vec![var.to_string()]))
    }
}
