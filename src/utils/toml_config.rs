//! TOML-based configuration for sheetrag
//!
//! Everything the binary needs is declared in `sheetrag.toml`: where the
//! indexes live, which embedder builds them, retrieval defaults and the
//! generation backends in priority order. Secrets are never stored in the
//! file; entries name an environment variable instead (`api_key_env`).

use crate::db::{EmbeddedVectorStore, InMemoryVectorStore, VectorStore};
use crate::ingest::IngestSettings;
use crate::llm::{GenerationOptions, Provider};
use crate::rag::cache::{CacheConfig, CachedEmbedder};
use crate::rag::context::ContextBudget;
use crate::rag::embeddings::{Embedder, EmbeddingProvider};
use crate::rag::knowledge::KnowledgeBaseConfig;
use crate::rag::query::RetrievalSettings;
use crate::types::AppError;
use crate::utils::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use sheetrag_vector::{Config as VectorConfig, HnswConfig};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Root configuration structure loaded from sheetrag.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SheetragConfig {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ============= Index Configuration =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// HNSW store, persisted under `data_dir/vectors`.
    Embedded,
    /// Exact scan, nothing persisted.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Manifest and vector data location.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_store")]
    pub store: StoreKind,

    /// HNSW preset: `default`, `fast` or `accurate`.
    #[serde(default = "default_hnsw")]
    pub hnsw: String,

    /// Collections up to this size are searched exactly.
    #[serde(default = "default_exact_search_threshold")]
    pub exact_search_threshold: usize,

    #[serde(default = "default_row_batch_size")]
    pub row_batch_size: usize,

    #[serde(default)]
    pub ingest: IngestSettings,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_store() -> StoreKind {
    StoreKind::Embedded
}

fn default_hnsw() -> String {
    "default".to_string()
}

fn default_exact_search_threshold() -> usize {
    4096
}

fn default_row_batch_size() -> usize {
    64
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            store: default_store(),
            hnsw: default_hnsw(),
            exact_search_threshold: default_exact_search_threshold(),
            row_batch_size: default_row_batch_size(),
            ingest: IngestSettings::default(),
        }
    }
}

impl IndexConfig {
    pub fn vectors_dir(&self) -> PathBuf {
        self.data_dir.join("vectors")
    }
}

// ============= Embedding Configuration =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingKind {
    Hashing,
    Ollama,
    OpenAI,
    FastEmbed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_kind")]
    pub provider: EmbeddingKind,

    /// Model name for HTTP and fastembed providers.
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Environment variable containing the API key (OpenAI only)
    #[serde(default)]
    pub api_key_env: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_retries")]
    pub retries: u32,

    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_embedding_kind() -> EmbeddingKind {
    EmbeddingKind::Hashing
}

fn default_dimensions() -> usize {
    384
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_retries() -> u32 {
    1
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_kind(),
            model: None,
            base_url: None,
            dimensions: default_dimensions(),
            api_key_env: None,
            timeout_secs: default_timeout_secs(),
            retries: default_retries(),
            cache: CacheConfig::default(),
        }
    }
}

// ============= Retrieval Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_k_structure")]
    pub k_structure: usize,
    #[serde(default = "default_k_content")]
    pub k_content: usize,
    #[serde(default = "default_k_per_sheet")]
    pub k_per_sheet: usize,
    #[serde(default = "default_entity_boost")]
    pub entity_boost: f32,
    #[serde(default)]
    pub min_score: f32,
    /// Context budget in characters; ignored when `max_tokens` is set.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default)]
    pub max_tokens: Option<usize>,
}

fn default_k_structure() -> usize {
    3
}

fn default_k_content() -> usize {
    10
}

fn default_k_per_sheet() -> usize {
    5
}

fn default_entity_boost() -> f32 {
    1.5
}

fn default_max_chars() -> usize {
    6000
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k_structure: default_k_structure(),
            k_content: default_k_content(),
            k_per_sheet: default_k_per_sheet(),
            entity_boost: default_entity_boost(),
            min_score: 0.0,
            max_chars: default_max_chars(),
            max_tokens: None,
        }
    }
}

// ============= Generation Configuration =============

/// A named generation backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Ollama {
        #[serde(default = "default_ollama_url")]
        base_url: String,
        model: String,
    },
    #[serde(rename = "openai")]
    OpenAI {
        /// Environment variable containing API key
        api_key_env: String,
        #[serde(default = "default_openai_base")]
        api_base: String,
        model: String,
    },
    Mock,
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_openai_base() -> String {
    "https://api.openai.com/v1".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Backend names, tried in order after local backends.
    #[serde(default)]
    pub priority: Vec<String>,

    #[serde(default)]
    pub backends: HashMap<String, BackendConfig>,

    #[serde(default)]
    pub temperature: Option<f32>,

    #[serde(default)]
    pub max_tokens: Option<u32>,

    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_generation_timeout() -> u64 {
    120
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            priority: Vec::new(),
            backends: HashMap::new(),
            temperature: None,
            max_tokens: None,
            timeout_secs: default_generation_timeout(),
            retries: default_retries(),
        }
    }
}

// ============= Logging Configuration =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// ============= Configuration Loading & Validation =============

/// Errors that can occur during configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Environment variable '{0}' referenced in config is not set")]
    MissingEnvVar(String),

    #[error("Backend '{0}' listed in generation.priority does not exist")]
    MissingBackend(String),
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

impl SheetragConfig {
    /// Load and validate configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config: SheetragConfig = toml::from_str(&content)?;
        config.validate()?;

        Ok(config)
    }

    /// Load `path`, or fall back to defaults when `path` is the default
    /// location and does not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P, is_default_path: bool) -> Result<Self, ConfigError> {
        match Self::load(&path) {
            Err(ConfigError::FileNotFound(_)) if is_default_path => Ok(Self::default()),
            other => other,
        }
    }

    /// Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

        let r = &self.retrieval;
        for (name, value) in [
            ("k_structure", r.k_structure),
            ("k_content", r.k_content),
            ("k_per_sheet", r.k_per_sheet),
        ] {
            if value == 0 {
                return invalid(format!("retrieval.{} must be >= 1", name));
            }
        }
        if !(r.entity_boost >= 1.0) {
            return invalid(format!(
                "retrieval.entity_boost must be >= 1.0, got {}",
                r.entity_boost
            ));
        }
        if !(0.0..=1.0).contains(&r.min_score) {
            return invalid(format!(
                "retrieval.min_score must be within [0, 1], got {}",
                r.min_score
            ));
        }
        if r.max_chars == 0 || r.max_tokens == Some(0) {
            return invalid("retrieval context budget must be > 0".into());
        }

        if self.embedding.dimensions == 0 {
            return invalid("embedding.dimensions must be > 0".into());
        }
        if self.embedding.timeout_secs == 0 || self.generation.timeout_secs == 0 {
            return invalid("timeouts must be > 0 seconds".into());
        }
        match self.embedding.provider {
            EmbeddingKind::Ollama | EmbeddingKind::OpenAI | EmbeddingKind::FastEmbed
                if self.embedding.model.is_none() =>
            {
                return invalid("embedding.model is required for this provider".into());
            }
            EmbeddingKind::OpenAI if self.embedding.api_key_env.is_none() => {
                return invalid("embedding.api_key_env is required for openai".into());
            }
            _ => {}
        }

        let ix = &self.index;
        if ix.row_batch_size == 0
            || ix.ingest.columns_per_descriptor == 0
            || ix.ingest.rows_per_record == 0
        {
            return invalid(
                "index.row_batch_size, columns_per_descriptor and rows_per_record must be >= 1"
                    .into(),
            );
        }
        if ix.hnsw.parse::<HnswConfig>().is_err() {
            return invalid(format!("unknown index.hnsw preset '{}'", ix.hnsw));
        }

        for name in &self.generation.priority {
            if !self.generation.backends.contains_key(name) {
                return Err(ConfigError::MissingBackend(name.clone()));
            }
        }

        Ok(())
    }

    /// Get a value from environment variable
    pub fn resolve_env(&self, env_name: &str) -> Option<String> {
        std::env::var(env_name).ok()
    }

    /// The embedder described by `[embedding]`, with secrets resolved.
    pub fn embedding_provider(&self) -> Result<EmbeddingProvider, ConfigError> {
        let e = &self.embedding;
        let model = e.model.clone().unwrap_or_default();
        Ok(match e.provider {
            EmbeddingKind::Hashing => EmbeddingProvider::Hashing {
                dimensions: e.dimensions,
            },
            EmbeddingKind::Ollama => EmbeddingProvider::Ollama {
                base_url: e.base_url.clone().unwrap_or_else(default_ollama_url),
                model,
                dimensions: e.dimensions,
                timeout_secs: e.timeout_secs,
            },
            EmbeddingKind::OpenAI => {
                let env = e.api_key_env.clone().unwrap_or_default();
                let api_key = self
                    .resolve_env(&env)
                    .ok_or(ConfigError::MissingEnvVar(env))?;
                EmbeddingProvider::OpenAI {
                    base_url: e.base_url.clone().unwrap_or_else(default_openai_base),
                    model,
                    api_key,
                    dimensions: e.dimensions,
                    timeout_secs: e.timeout_secs,
                }
            }
            #[cfg(feature = "local-embeddings")]
            EmbeddingKind::FastEmbed => EmbeddingProvider::FastEmbed { model },
            #[cfg(not(feature = "local-embeddings"))]
            EmbeddingKind::FastEmbed => {
                return Err(ConfigError::ValidationError(
                    "fastembed embeddings require the 'local-embeddings' feature".into(),
                ))
            }
        })
    }

    /// Generation backends in priority order.
    ///
    /// Backends not named in `priority` follow in name order. A cloud
    /// backend whose key variable is unset is kept but never selected.
    pub fn generation_providers(&self) -> Vec<(String, Provider)> {
        let g = &self.generation;
        let mut names: Vec<&String> = g.priority.iter().collect();
        let mut rest: Vec<&String> = g
            .backends
            .keys()
            .filter(|k| !g.priority.contains(k))
            .collect();
        rest.sort();
        names.extend(rest);

        names
            .into_iter()
            .filter_map(|name| {
                let provider = match g.backends.get(name)? {
                    BackendConfig::Ollama { base_url, model } => Provider::Ollama {
                        base_url: base_url.clone(),
                        model: model.clone(),
                    },
                    BackendConfig::OpenAI {
                        api_key_env,
                        api_base,
                        model,
                    } => Provider::OpenAI {
                        api_key: self.resolve_env(api_key_env).unwrap_or_else(|| {
                            warn!(backend = %name, env = %api_key_env, "API key variable not set");
                            String::new()
                        }),
                        api_base: api_base.clone(),
                        model: model.clone(),
                    },
                    BackendConfig::Mock => Provider::Mock,
                };
                Some((name.clone(), provider))
            })
            .collect()
    }

    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            model: None,
            temperature: self.generation.temperature,
            max_tokens: self.generation.max_tokens,
        }
    }

    pub fn generation_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(self.generation.timeout_secs),
            self.generation.retries,
        )
    }

    pub fn retrieval_settings(&self) -> RetrievalSettings {
        let r = &self.retrieval;
        RetrievalSettings {
            k_structure: r.k_structure,
            k_content: r.k_content,
            k_per_sheet: r.k_per_sheet,
            entity_boost: r.entity_boost,
            min_score: r.min_score,
            budget: match r.max_tokens {
                Some(t) => ContextBudget::Tokens(t),
                None => ContextBudget::Chars(r.max_chars),
            },
        }
    }

    /// Open the vector store described by `[index]`.
    pub async fn open_store(&self) -> crate::types::Result<Arc<dyn VectorStore>> {
        match self.index.store {
            StoreKind::Memory => Ok(Arc::new(InMemoryVectorStore::new())),
            StoreKind::Embedded => {
                let hnsw = self
                    .index
                    .hnsw
                    .parse::<HnswConfig>()
                    .map_err(AppError::Configuration)?;
                let config = VectorConfig::memory()
                    .with_hnsw_config(hnsw)
                    .with_exact_search_threshold(self.index.exact_search_threshold);
                let path = self.index.vectors_dir().to_string_lossy().into_owned();
                debug!(path = %path, "Opening embedded vector store");
                Ok(Arc::new(EmbeddedVectorStore::with_config(Some(path), config).await?))
            }
        }
    }

    /// The configured embedder, behind the LRU cache when enabled.
    pub fn create_embedder(&self) -> crate::types::Result<Arc<dyn Embedder>> {
        let inner = self.embedding_provider()?.create_embedder()?;
        if self.embedding.cache.enabled {
            Ok(Arc::new(CachedEmbedder::new(inner, self.embedding.cache.clone())))
        } else {
            Ok(inner)
        }
    }

    pub fn knowledge_base_config(&self) -> KnowledgeBaseConfig {
        KnowledgeBaseConfig {
            data_dir: match self.index.store {
                StoreKind::Embedded => Some(self.index.data_dir.clone()),
                StoreKind::Memory => None,
            },
            row_batch_size: self.index.row_batch_size,
            policy: RetryPolicy::new(
                Duration::from_secs(self.embedding.timeout_secs),
                self.embedding.retries,
            ),
        }
    }
}
