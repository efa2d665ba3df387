//! # sheetrag - dual-index retrieval over spreadsheet workbooks
//!
//! Spreadsheet questions usually span sheets ("what does product xyz cost and
//! how many are in stock?"). sheetrag indexes a workbook twice: a **structure
//! index** with one schema descriptor per sheet, and a **content index** with
//! one record per row. Queries find the relevant sheets first, then search rows
//! only inside those sheets.
//!
//! ## Quick Start (Library Usage)
//!
//! ```rust,ignore
//! use sheetrag::{
//!     db::InMemoryVectorStore,
//!     ingest::Workbook,
//!     llm::BackendSelector,
//!     rag::{embeddings::HashingEmbedder, KnowledgeBase, QueryEngine, QueryRequest},
//! };
//! use std::sync::Arc;
//!
//! let kb = Arc::new(KnowledgeBase::new(
//!     Arc::new(InMemoryVectorStore::new()),
//!     Arc::new(HashingEmbedder::new(256)?),
//!     Default::default(),
//! ));
//! kb.rebuild(
//!     &Workbook::new()
//!         .sheet("Pricing", &["product", "cost"], &[&["xyz", "10"]])
//!         .sheet("Inventory", &["product", "stock"], &[&["xyz", "40"]]),
//! )
//! .await?;
//!
//! let engine = QueryEngine::new(kb, BackendSelector::mock_only(), Default::default());
//! let response = engine
//!     .ask(&QueryRequest::new("cost and stock of xyz").entity("xyz"))
//!     .await?;
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `ollama` | Ollama generation backend (default) |
//! | `openai` | OpenAI-compatible generation backend |
//! | `local-embeddings` | fastembed ONNX embedders |
//!
//! ## Modules
//!
//! - [`ingest`] - CSV/TSV sources and text synthesis
//! - [`rag`] - the two indexes, orchestrators and query engine
//! - [`db`] - vector store abstraction
//! - [`llm`] - generation backends and selection
//! - [`cli`] - the `sheetrag` binary's commands
//! - [`utils`] - configuration, logging, retry
//! - [`types`] - shared records and errors

#![cfg_attr(docsrs, feature(doc_cfg))]

/// Command-line interface.
pub mod cli;
/// Vector store backends.
pub mod db;
/// Tabular sources.
pub mod ingest;
/// Generation backends.
pub mod llm;
/// Retrieval components.
pub mod rag;
/// Core types and errors.
pub mod types;
/// Configuration, logging and retry.
pub mod utils;

// Re-export commonly used types
pub use ingest::{CsvSource, TabularSource, Workbook};
pub use llm::{BackendSelector, LLMClient, Provider};
pub use rag::{KnowledgeBase, QueryEngine, QueryRequest, QueryResponse};
pub use types::{AppError, QueryHit, Result};
pub use utils::toml_config::SheetragConfig;
