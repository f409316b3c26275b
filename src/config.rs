//! YAML configuration parsing.
//!
//! The configuration file carries per-provider model settings, the embedding
//! model, chunking and retrieval defaults, and the on-disk layout. A handful
//! of environment variables override the storage paths so deployments can
//! relocate data without editing the file:
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `FAISS_BASE` | `storage.index_base` |
//! | `UPLOAD_BASE` | `storage.upload_base` |
//! | `FAISS_INDEX_NAME` | `storage.index_name` |
//!
//! Provider selection (`LLM_PROVIDER`) and credentials are read by
//! [`ModelLoader`](crate::model_loader::ModelLoader), not here.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{PortalError, Result, ResultExt};
use crate::vector_store::{SearchKwargs, SearchType};

/// Default location of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Per-provider chat model settings, keyed by the value of `LLM_PROVIDER`.
    pub llm: BTreeMap<String, LlmSettings>,
    #[serde(alias = "embeddings_model")]
    pub embedding_model: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retriever: RetrieverConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmSettings {
    /// Backend identifier: `openai` or `groq`.
    pub provider: String,
    pub model_name: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Override for the API base URL (OpenAI-compatible gateways).
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    pub model_name: String,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub base_url: Option<String>,
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrieverConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// `similarity`, `similarity_score_threshold` or `mmr`.
    #[serde(default = "default_search_type")]
    pub search_type: String,
    /// Minimum cosine similarity; required by `similarity_score_threshold`.
    #[serde(default)]
    pub score_threshold: Option<f32>,
    /// Candidate pool size for `mmr`.
    #[serde(default = "default_fetch_k")]
    pub fetch_k: usize,
    /// `mmr` relevance/diversity trade-off in `[0, 1]`.
    #[serde(default = "default_lambda_mult")]
    pub lambda_mult: f32,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            search_type: default_search_type(),
            score_threshold: None,
            fetch_k: default_fetch_k(),
            lambda_mult: default_lambda_mult(),
        }
    }
}

impl RetrieverConfig {
    /// The configured search type with its parameters for a top-`k` query.
    pub fn search(&self, k: usize) -> Result<(SearchType, SearchKwargs)> {
        let search_type = self
            .search_type
            .parse::<SearchType>()
            .map_err(PortalError::Config)?;
        let kwargs = SearchKwargs {
            k,
            score_threshold: self.score_threshold,
            fetch_k: self.fetch_k.max(k),
            lambda_mult: self.lambda_mult,
        };
        Ok((search_type, kwargs))
    }
}

fn default_top_k() -> usize {
    5
}
fn default_search_type() -> String {
    "similarity".to_string()
}
fn default_fetch_k() -> usize {
    20
}
fn default_lambda_mult() -> f32 {
    0.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_upload_base")]
    pub upload_base: PathBuf,
    #[serde(default = "default_index_base")]
    pub index_base: PathBuf,
    #[serde(default = "default_index_name")]
    pub index_name: String,
    #[serde(default = "default_analysis_dir")]
    pub analysis_dir: PathBuf,
    #[serde(default = "default_compare_dir")]
    pub compare_dir: PathBuf,
    /// Number of comparison sessions kept on disk; older ones are pruned.
    #[serde(default = "default_compare_keep_latest")]
    pub compare_keep_latest: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_base: default_upload_base(),
            index_base: default_index_base(),
            index_name: default_index_name(),
            analysis_dir: default_analysis_dir(),
            compare_dir: default_compare_dir(),
            compare_keep_latest: default_compare_keep_latest(),
        }
    }
}

fn default_upload_base() -> PathBuf {
    PathBuf::from("data/multi_doc_chat")
}
fn default_index_base() -> PathBuf {
    PathBuf::from("faiss_index")
}
fn default_index_name() -> String {
    "index".to_string()
}
fn default_analysis_dir() -> PathBuf {
    PathBuf::from("data/document_analysis")
}
fn default_compare_dir() -> PathBuf {
    PathBuf::from("data/document_compare")
}
fn default_compare_keep_latest() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

impl Config {
    /// Parses and validates a YAML document without consulting the environment.
    pub fn from_yaml_str(content: &str) -> Result<Config> {
        let config: Config =
            serde_yaml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Applies the storage overrides found through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base) = lookup("FAISS_BASE").filter(|v| !v.is_empty()) {
            self.storage.index_base = PathBuf::from(base);
        }
        if let Some(base) = lookup("UPLOAD_BASE").filter(|v| !v.is_empty()) {
            self.storage.upload_base = PathBuf::from(base);
        }
        if let Some(name) = lookup("FAISS_INDEX_NAME").filter(|v| !v.is_empty()) {
            self.storage.index_name = name;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.llm.is_empty() {
            return Err(PortalError::Config(
                "llm must define at least one provider block".to_string(),
            ));
        }

        if self.chunking.chunk_size == 0 {
            return Err(PortalError::Config(
                "chunking.chunk_size must be > 0".to_string(),
            ));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(PortalError::Config(
                "chunking.chunk_overlap must be smaller than chunking.chunk_size".to_string(),
            ));
        }

        if self.retriever.top_k == 0 {
            return Err(PortalError::Config(
                "retriever.top_k must be >= 1".to_string(),
            ));
        }
        let (search_type, _) = self.retriever.search(self.retriever.top_k)?;
        match self.retriever.score_threshold {
            None if search_type == SearchType::SimilarityScoreThreshold => {
                return Err(PortalError::Config(
                    "retriever.score_threshold is required for similarity_score_threshold"
                        .to_string(),
                ))
            }
            Some(t) if !(-1.0..=1.0).contains(&t) => {
                return Err(PortalError::Config(
                    "retriever.score_threshold must be within [-1, 1]".to_string(),
                ))
            }
            _ => {}
        }
        if !(0.0..=1.0).contains(&self.retriever.lambda_mult) {
            return Err(PortalError::Config(
                "retriever.lambda_mult must be within [0, 1]".to_string(),
            ));
        }

        if self.embedding_model.batch_size == 0 {
            return Err(PortalError::Config(
                "embedding_model.batch_size must be > 0".to_string(),
            ));
        }
        match self.embedding_model.provider.as_str() {
            "openai" | "local" => {}
            other => {
                return Err(PortalError::Config(format!(
                    "Unknown embedding provider: '{}'. Must be openai or local.",
                    other
                )))
            }
        }

        if self.storage.compare_keep_latest == 0 {
            return Err(PortalError::Config(
                "storage.compare_keep_latest must be >= 1".to_string(),
            ));
        }

        if self.storage.index_name.is_empty()
            || self.storage.index_name.contains(['/', '\\'])
        {
            return Err(PortalError::Config(format!(
                "storage.index_name is not a valid file stem: '{}'",
                self.storage.index_name
            )));
        }

        Ok(())
    }
}

/// Reads, parses and validates the configuration file, then applies
/// environment overrides.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = Config::from_yaml_str(&content)?;
    config.apply_env_overrides(|key| std::env::var(key).ok());

    tracing::info!(
        path = %path.display(),
        providers = ?config.llm.keys().collect::<Vec<_>>(),
        "Configuration loaded"
    );

    Ok(config)
}
