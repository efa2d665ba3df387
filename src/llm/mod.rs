//! Generation backends
//!
//! Answer generation sits behind the [`LLMClient`] trait so the query
//! engine never branches on the backend kind.
//!
//! # Architecture
//!
//! - [`LLMClient`] - the trait every backend implements
//! - [`Provider`] - serializable backend configuration with a client factory
//! - [`BackendSelector`] - picks the first available backend, local first
//!
//! # Supported Providers
//!
//! Enable providers via Cargo features:
//! - `ollama` - Local Ollama server (default)
//! - `openai` - OpenAI API and compatible endpoints
//!
//! The mock backend is always compiled in and is the last resort.

/// Core LLM client trait, options and provider configuration.
pub mod client;
pub mod mock;
/// Priority-ordered backend selection.
pub mod selector;

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(feature = "openai")]
pub mod openai;

pub use client::{GenerationOptions, LLMClient, Provider};
pub use mock::MockClient;
pub use selector::{BackendSelector, NamedBackend};
