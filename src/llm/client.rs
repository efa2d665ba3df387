//! LLM client abstraction and provider configuration
//!
//! Answer generation is one call: retrieved context plus the user's
//! question in, text out. Backends:
//! - **Ollama**: local inference (feature `ollama`)
//! - **OpenAI**: OpenAI and compatible endpoints (feature `openai`)
//! - **Mock**: deterministic, always available

use crate::types::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// System prompt given to every backend.
pub const SYSTEM_PROMPT: &str = "You answer questions about spreadsheet data. \
Use only the rows and sheets in the provided context. Each context line starts \
with [sheet | row | score]. If the context does not contain the answer, say so.";

/// Per-request generation options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Overrides the backend's configured model.
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Generic LLM client trait for provider abstraction
///
/// All generation backends implement this trait, so the query engine can
/// switch between them without changing call sites.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Answer `query` from `context`.
    async fn generate(
        &self,
        context: &str,
        query: &str,
        options: &GenerationOptions,
    ) -> Result<String>;

    /// Whether the backend can take requests right now.
    async fn is_available(&self) -> bool;

    /// Get the model name/identifier
    fn model_name(&self) -> &str;

    /// Short backend kind, e.g. `ollama`.
    fn provider_name(&self) -> &'static str;
}

/// User message combining context and question.
pub fn user_prompt(context: &str, query: &str) -> String {
    if context.trim().is_empty() {
        format!("Context:\n(no matching rows)\n\nQuestion: {}", query)
    } else {
        format!("Context:\n{}\nQuestion: {}", context, query)
    }
}

/// Provider enum for runtime selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Provider {
    /// Ollama local LLM provider
    ///
    /// # Example
    /// ```rust,ignore
    /// let provider = Provider::Ollama {
    ///     base_url: "http://localhost:11434".to_string(),
    ///     model: "llama3.2".to_string(),
    /// };
    /// ```
    Ollama { base_url: String, model: String },

    /// OpenAI API provider (including compatible APIs)
    ///
    /// # Example
    /// ```rust,ignore
    /// let provider = Provider::OpenAI {
    ///     api_key: std::env::var("OPENAI_API_KEY")?,
    ///     api_base: "https://api.openai.com/v1".to_string(),
    ///     model: "gpt-4o-mini".to_string(),
    /// };
    /// ```
    #[serde(rename = "openai")]
    OpenAI {
        api_key: String,
        api_base: String,
        model: String,
    },

    /// Deterministic offline backend.
    Mock,
}

impl Provider {
    /// Create a client instance for this provider
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Configuration`] when the provider's cargo feature
    /// is not compiled in.
    pub fn create_client(&self) -> Result<Arc<dyn LLMClient>> {
        match self {
            #[cfg(feature = "ollama")]
            Provider::Ollama { base_url, model } => Ok(Arc::new(super::ollama::OllamaClient::new(
                base_url,
                model.clone(),
            )?)),
            #[cfg(not(feature = "ollama"))]
            Provider::Ollama { .. } => Err(AppError::Configuration(
                "Ollama backend requires the 'ollama' feature".into(),
            )),

            #[cfg(feature = "openai")]
            Provider::OpenAI {
                api_key,
                api_base,
                model,
            } => Ok(Arc::new(super::openai::OpenAIClient::new(
                api_key.clone(),
                api_base.clone(),
                model.clone(),
            ))),
            #[cfg(not(feature = "openai"))]
            Provider::OpenAI { .. } => Err(AppError::Configuration(
                "OpenAI backend requires the 'openai' feature".into(),
            )),

            Provider::Mock => Ok(Arc::new(super::mock::MockClient::new())),
        }
    }

    /// Local backends are tried before cloud ones.
    pub fn is_local(&self) -> bool {
        matches!(self, Provider::Ollama { .. })
    }

    /// Get a human-readable name for this provider
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Ollama { .. } => "Ollama",
            Provider::OpenAI { .. } => "OpenAI",
            Provider::Mock => "Mock",
        }
    }
}
