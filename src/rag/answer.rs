//! Query engine: retrieval against the active generation plus generation.

use crate::llm::{BackendSelector, GenerationOptions};
use crate::rag::cross_sheet::{cross_sheet_query, cross_sheet_query_multi, CrossSheetResult, EntityResult};
use crate::rag::knowledge::KnowledgeBase;
use crate::rag::query::{standard_query, RetrievalSettings, StandardResult};
use crate::types::Result;
use crate::utils::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Prefix of answers produced without a generation backend.
pub const NOT_GENERATED_MARKER: &str = "[could not generate an answer]";
/// Prefix of answers for queries whose retrieval timed out.
pub const DEGRADED_MARKER: &str = "[degraded: could not complete retrieval]";

/// One question and how to answer it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    pub cross_sheet: bool,
    /// Boost toward these entities; more than one implies cross-sheet.
    #[serde(default)]
    pub entities: Vec<String>,
    pub k_structure: Option<usize>,
    pub k_content: Option<usize>,
    pub k_per_sheet: Option<usize>,
    /// Skip the generation backend and return retrieval only.
    #[serde(default)]
    pub no_generate: bool,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn cross_sheet(mut self) -> Self {
        self.cross_sheet = true;
        self
    }

    pub fn entity(mut self, entity: impl Into<String>) -> Self {
        self.entities.push(entity.into());
        self
    }

    pub fn retrieval_only(mut self) -> Self {
        self.no_generate = true;
        self
    }

    fn settings(&self, base: &RetrievalSettings) -> RetrievalSettings {
        RetrievalSettings {
            k_structure: self.k_structure.unwrap_or(base.k_structure),
            k_content: self.k_content.unwrap_or(base.k_content),
            k_per_sheet: self.k_per_sheet.unwrap_or(base.k_per_sheet),
            ..base.clone()
        }
    }
}

/// Retrieval output, shaped by mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Retrieval {
    Standard(StandardResult),
    CrossSheet(CrossSheetResult),
    MultiEntity { results: Vec<EntityResult> },
}

impl Retrieval {
    /// Prompt-ready context for generation.
    pub fn context_text(&self) -> String {
        match self {
            Retrieval::Standard(r) => r.context.render(),
            Retrieval::CrossSheet(r) => r.context.render(),
            Retrieval::MultiEntity { results } => results
                .iter()
                .map(|e| format!("# Entity: {}\n{}", e.entity, e.result.context.render()))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Reason the retrieval is incomplete, if it is.
    pub fn degraded(&self) -> Option<&str> {
        match self {
            Retrieval::Standard(r) => r.degraded.as_deref(),
            Retrieval::CrossSheet(r) => r.degraded.as_deref(),
            Retrieval::MultiEntity { results } => {
                results.iter().find_map(|e| e.result.degraded.as_deref())
            }
        }
    }
}

/// The generated (or fallback) answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    /// False when `text` is the raw context behind a marker.
    pub generated: bool,
    pub backend: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub generation: u64,
    pub retrieval: Retrieval,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<Answer>,
}

/// Answers questions against a knowledge base.
pub struct QueryEngine {
    kb: Arc<KnowledgeBase>,
    selector: BackendSelector,
    settings: RetrievalSettings,
    options: GenerationOptions,
    policy: RetryPolicy,
}

impl QueryEngine {
    pub fn new(kb: Arc<KnowledgeBase>, selector: BackendSelector, settings: RetrievalSettings) -> Self {
        Self {
            kb,
            selector,
            settings,
            options: GenerationOptions::default(),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    /// Timeout and retries for generation calls.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn knowledge_base(&self) -> &Arc<KnowledgeBase> {
        &self.kb
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    /// Retrieve, then generate unless disabled.
    ///
    /// The snapshot is pinned for the whole call, so a concurrent rebuild
    /// never mixes generations within one answer.
    #[instrument(skip(self, request), fields(cross_sheet = request.cross_sheet, entities = request.entities.len()))]
    pub async fn ask(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let current = self.kb.require_snapshot()?;
        let snapshot = &current.value;
        let settings = request.settings(&self.settings);

        let retrieval = if request.entities.len() > 1 {
            Retrieval::MultiEntity {
                results: cross_sheet_query_multi(snapshot, &request.query, &request.entities, &settings)
                    .await?,
            }
        } else if request.cross_sheet || !request.entities.is_empty() {
            let entity = request.entities.first().map(String::as_str);
            Retrieval::CrossSheet(cross_sheet_query(snapshot, &request.query, entity, &settings).await?)
        } else {
            Retrieval::Standard(standard_query(snapshot, &request.query, &settings).await?)
        };

        let answer = if request.no_generate {
            None
        } else if let Some(reason) = retrieval.degraded() {
            Some(Answer {
                text: format!("{} {}", DEGRADED_MARKER, reason),
                generated: false,
                backend: None,
            })
        } else {
            Some(self.generate(&retrieval.context_text(), &request.query).await)
        };

        Ok(QueryResponse {
            generation: current.number,
            retrieval,
            answer,
        })
    }

    /// Generate from `context`, falling back to the raw context on failure.
    pub async fn generate(&self, context: &str, query: &str) -> Answer {
        let backend = self.selector.select().await;
        let result = self
            .policy
            .run("generate answer", || {
                backend.client.generate(context, query, &self.options)
            })
            .await;

        match result {
            Ok(text) => {
                info!(backend = %backend.name, chars = text.len(), "Generated answer");
                Answer {
                    text,
                    generated: true,
                    backend: Some(backend.name),
                }
            }
            Err(e) => {
                warn!(backend = %backend.name, error = %e, "Generation failed; returning raw context");
                Answer {
                    text: format!("{} ({})\n\n{}", NOT_GENERATED_MARKER, e, context),
                    generated: false,
                    backend: Some(backend.name),
                }
            }
        }
    }
}
