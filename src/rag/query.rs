//! Standard two-stage retrieval: sheets first, then rows from those sheets.

use crate::rag::context::{Context, ContextBudget};
use crate::rag::knowledge::IndexSnapshot;
use crate::types::{AppError, QueryHit, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

/// Retrieval knobs shared by both orchestrators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub k_structure: usize,
    pub k_content: usize,
    pub k_per_sheet: usize,
    /// Multiplier applied to hits containing the entity.
    pub entity_boost: f32,
    /// Hits below this normalized score are dropped before boosting.
    pub min_score: f32,
    pub budget: ContextBudget,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            k_structure: 3,
            k_content: 10,
            k_per_sheet: 5,
            entity_boost: 1.5,
            min_score: 0.0,
            budget: ContextBudget::default(),
        }
    }
}

/// Result of a standard query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StandardResult {
    pub context: Context,
    pub sheet_hits: Vec<QueryHit>,
    pub content_hits: Vec<QueryHit>,
    /// Set when a provider timed out and the result is incomplete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
}

impl StandardResult {
    pub(crate) fn degraded(reason: String) -> Self {
        Self {
            degraded: Some(reason),
            ..Self::default()
        }
    }
}

pub(crate) fn validate_query(query: &str) -> Result<()> {
    if query.trim().is_empty() {
        return Err(AppError::InvalidInput("query must not be empty".into()));
    }
    Ok(())
}

pub(crate) fn above_min(hits: Vec<QueryHit>, min_score: f32) -> Vec<QueryHit> {
    hits.into_iter().filter(|h| h.raw_score >= min_score).collect()
}

/// Run the standard orchestration against one snapshot.
///
/// Both indexes empty is [`AppError::EmptyIndex`]. A provider timeout
/// yields a degraded, empty result instead of an error.
#[instrument(skip(snapshot, settings), fields(generation = snapshot.generation()))]
pub async fn standard_query(
    snapshot: &IndexSnapshot,
    query: &str,
    settings: &RetrievalSettings,
) -> Result<StandardResult> {
    validate_query(query)?;
    if snapshot.is_empty() {
        return Err(AppError::EmptyIndex);
    }

    match run(snapshot, query, settings).await {
        Err(AppError::ProviderTimeout(reason)) => {
            warn!(%reason, "Returning degraded standard result");
            Ok(StandardResult::degraded(reason))
        }
        other => other,
    }
}

async fn run(
    snapshot: &IndexSnapshot,
    query: &str,
    settings: &RetrievalSettings,
) -> Result<StandardResult> {
    let embedding = snapshot.embed_query(query).await?;

    let sheet_hits = above_min(
        snapshot
            .structure
            .search_embedding(&embedding, settings.k_structure)
            .await?,
        settings.min_score,
    );
    if sheet_hits.is_empty() {
        debug!("No sheets matched; skipping content search");
        return Ok(StandardResult::default());
    }

    let sheets: Vec<String> = sheet_hits.iter().map(|h| h.sheet_id.clone()).collect();
    let content_hits = above_min(
        snapshot
            .content
            .search_embedding(&embedding, settings.k_content, Some(&sheets))
            .await?,
        settings.min_score,
    );

    let context = Context::assemble(&content_hits, settings.budget);
    debug!(
        sheets = sheet_hits.len(),
        rows = content_hits.len(),
        snippets = context.len(),
        "Standard query completed"
    );

    Ok(StandardResult {
        context,
        sheet_hits,
        content_hits,
        degraded: None,
    })
}
