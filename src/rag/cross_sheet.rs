//! Cross-sheet retrieval: balanced rows per sheet with entity boosting.

use crate::rag::content::SheetHits;
use crate::rag::context::Context;
use crate::rag::knowledge::IndexSnapshot;
use crate::rag::query::{above_min, validate_query, RetrievalSettings};
use crate::types::{AppError, QueryHit, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

/// Result of a cross-sheet query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrossSheetResult {
    pub entity: Option<String>,
    pub context: Context,
    pub sheet_hits: Vec<QueryHit>,
    /// Rows per retrieved sheet, in sheet rank order.
    pub per_sheet: Vec<SheetHits>,
    /// Every row hit, boosted score descending.
    pub ranked: Vec<QueryHit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
}

/// One entry of a multi-entity result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityResult {
    pub entity: String,
    pub result: CrossSheetResult,
}

/// Multiply the score of every hit whose text contains `entity`
/// (case-insensitive) by `boost`, then stable-sort by score.
///
/// A blank entity leaves the hits untouched.
pub fn apply_entity_boost(hits: &mut [QueryHit], entity: &str, boost: f32) {
    let needle = entity.trim().to_lowercase();
    if needle.is_empty() {
        return;
    }
    for hit in hits.iter_mut() {
        if hit.text.to_lowercase().contains(&needle) {
            hit.entity_match = true;
            hit.score = hit.raw_score * boost;
        }
    }
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
}

struct Retrieved {
    sheet_hits: Vec<QueryHit>,
    per_sheet: Vec<SheetHits>,
}

async fn retrieve(
    snapshot: &IndexSnapshot,
    query: &str,
    settings: &RetrievalSettings,
) -> Result<Retrieved> {
    let embedding = snapshot.embed_query(query).await?;

    let sheet_hits = above_min(
        snapshot
            .structure
            .search_embedding(&embedding, settings.k_structure)
            .await?,
        settings.min_score,
    );
    if sheet_hits.is_empty() {
        debug!("No sheets matched; skipping per-sheet search");
        return Ok(Retrieved {
            sheet_hits,
            per_sheet: Vec::new(),
        });
    }

    let sheets: Vec<String> = sheet_hits.iter().map(|h| h.sheet_id.clone()).collect();
    let per_sheet = snapshot
        .content
        .search_per_sheet_embedding(&embedding, &sheets, settings.k_per_sheet)
        .await?
        .into_iter()
        .map(|group| SheetHits {
            sheet_id: group.sheet_id,
            hits: above_min(group.hits, settings.min_score),
        })
        .collect();

    Ok(Retrieved {
        sheet_hits,
        per_sheet,
    })
}

fn finish(
    retrieved: &Retrieved,
    entity: Option<&str>,
    settings: &RetrievalSettings,
) -> CrossSheetResult {
    let entity = entity.map(str::trim).filter(|e| !e.is_empty());
    let mut per_sheet = retrieved.per_sheet.clone();
    if let Some(e) = entity {
        for group in &mut per_sheet {
            apply_entity_boost(&mut group.hits, e, settings.entity_boost);
        }
    }

    let mut ranked: Vec<QueryHit> = per_sheet.iter().flat_map(|g| g.hits.clone()).collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

    CrossSheetResult {
        entity: entity.map(str::to_string),
        context: Context::assemble_grouped(&per_sheet, settings.budget),
        sheet_hits: retrieved.sheet_hits.clone(),
        per_sheet,
        ranked,
        degraded: None,
    }
}

fn degraded(entity: Option<&str>, reason: String) -> CrossSheetResult {
    CrossSheetResult {
        entity: entity.map(str::to_string),
        degraded: Some(reason),
        ..CrossSheetResult::default()
    }
}

/// Per-sheet retrieval for `query`, boosted toward `entity` when given.
#[instrument(skip(snapshot, settings), fields(generation = snapshot.generation()))]
pub async fn cross_sheet_query(
    snapshot: &IndexSnapshot,
    query: &str,
    entity: Option<&str>,
    settings: &RetrievalSettings,
) -> Result<CrossSheetResult> {
    validate_query(query)?;
    if snapshot.is_empty() {
        return Err(AppError::EmptyIndex);
    }

    match retrieve(snapshot, query, settings).await {
        Ok(retrieved) => Ok(finish(&retrieved, entity, settings)),
        Err(AppError::ProviderTimeout(reason)) => {
            warn!(%reason, "Returning degraded cross-sheet result");
            Ok(degraded(entity, reason))
        }
        Err(e) => Err(e),
    }
}

/// One cross-sheet result per entity, in the order given.
///
/// Retrieval runs once; each entity only changes the boosting. Repeated
/// entities are collapsed. Results are not deduplicated across entities.
#[instrument(skip(snapshot, settings), fields(generation = snapshot.generation()))]
pub async fn cross_sheet_query_multi(
    snapshot: &IndexSnapshot,
    query: &str,
    entities: &[String],
    settings: &RetrievalSettings,
) -> Result<Vec<EntityResult>> {
    validate_query(query)?;
    if entities.is_empty() {
        return Err(AppError::InvalidInput("at least one entity is required".into()));
    }
    if snapshot.is_empty() {
        return Err(AppError::EmptyIndex);
    }

    let mut unique: Vec<&str> = Vec::new();
    for e in entities {
        if !unique.contains(&e.as_str()) {
            unique.push(e);
        }
    }

    let retrieved = match retrieve(snapshot, query, settings).await {
        Ok(r) => r,
        Err(AppError::ProviderTimeout(reason)) => {
            warn!(%reason, "Returning degraded multi-entity result");
            return Ok(unique
                .into_iter()
                .map(|e| EntityResult {
                    entity: e.to_string(),
                    result: degraded(Some(e), reason.clone()),
                })
                .collect());
        }
        Err(e) => return Err(e),
    };

    Ok(unique
        .into_iter()
        .map(|e| EntityResult {
            entity: e.to_string(),
            result: finish(&retrieved, Some(e), settings),
        })
        .collect())
}
