//! Content index: one vector per row (or row batch), tagged with its sheet.
//!
//! Searches can be restricted to a set of sheets with a single
//! set-membership filter, or fanned out one sheet at a time.

use crate::db::{VectorRecord, VectorStore};
use crate::rag::embeddings::Embedder;
use crate::rag::structure::SHEET_FIELD;
use crate::types::{AppError, HitSource, QueryHit, Result, RowRecord};
use crate::utils::retry::RetryPolicy;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use sheetrag_vector::{Filter, VectorMetadata};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Metadata key holding a row's id within its sheet.
pub const ROW_FIELD: &str = "row_id";

/// Default number of rows embedded per provider call.
pub const DEFAULT_ROW_BATCH_SIZE: usize = 64;

/// Counts recorded for a built content index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentStats {
    pub rows: usize,
    /// Rows per sheet, by sheet id.
    pub per_sheet: BTreeMap<String, usize>,
}

/// Hits for one requested sheet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetHits {
    pub sheet_id: String,
    pub hits: Vec<QueryHit>,
}

/// An immutable, fully built content index over one collection.
pub struct ContentIndex {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    collection: String,
    stats: ContentStats,
    policy: RetryPolicy,
}

fn store_id(sheet_id: &str, row_id: &str) -> String {
    format!("{}/{}", sheet_id, row_id)
}

impl ContentIndex {
    /// Embed and insert rows into a new collection, `batch_size` at a time.
    ///
    /// `rows` is consumed lazily. A source error, a duplicate row id within a
    /// sheet, or any provider failure aborts the build and drops the
    /// collection.
    #[instrument(skip(store, embedder, rows, policy))]
    pub async fn build<I>(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        collection: String,
        rows: I,
        batch_size: usize,
        policy: RetryPolicy,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = Result<RowRecord>>,
        I::IntoIter: Send,
    {
        if batch_size == 0 {
            return Err(AppError::InvalidInput("row_batch_size must be >= 1".into()));
        }

        store
            .create_collection(&collection, embedder.dimensions())
            .await
            .map_err(|e| AppError::IndexBuild(format!("create '{}': {}", collection, e)))?;

        match Self::fill(&store, &embedder, &collection, rows.into_iter(), batch_size, &policy)
            .await
        {
            Ok(stats) => {
                info!(
                    collection,
                    rows = stats.rows,
                    sheets = stats.per_sheet.len(),
                    "Built content index"
                );
                Ok(Self::attach(store, embedder, collection, stats, policy))
            }
            Err(e) => {
                if let Err(cleanup) = store.delete_collection(&collection).await {
                    warn!(collection, error = %cleanup, "Failed to drop partial content collection");
                }
                if matches!(e, AppError::IndexBuild(_)) {
                    Err(e)
                } else {
                    Err(AppError::IndexBuild(e.to_string()))
                }
            }
        }
    }

    async fn fill(
        store: &Arc<dyn VectorStore>,
        embedder: &Arc<dyn Embedder>,
        collection: &str,
        mut rows: impl Iterator<Item = Result<RowRecord>> + Send,
        batch_size: usize,
        policy: &RetryPolicy,
    ) -> Result<ContentStats> {
        let mut stats = ContentStats::default();
        // Row ids only need to be unique within their sheet, and sources
        // yield a sheet's rows together, so only the current sheet is tracked.
        let mut current_sheet: Option<String> = None;
        let mut seen: HashSet<String> = HashSet::new();
        let mut batch: Vec<RowRecord> = Vec::with_capacity(batch_size);

        loop {
            batch.clear();
            for row in rows.by_ref().take(batch_size) {
                let row = row?;
                if current_sheet.as_deref() != Some(row.sheet_id.as_str()) {
                    if stats.per_sheet.contains_key(&row.sheet_id)
                        || batch.iter().any(|r| r.sheet_id == row.sheet_id)
                    {
                        return Err(AppError::IndexBuild(format!(
                            "rows of sheet '{}' are not contiguous",
                            row.sheet_id
                        )));
                    }
                    current_sheet = Some(row.sheet_id.clone());
                    seen.clear();
                }
                if !seen.insert(row.row_id.clone()) {
                    return Err(AppError::IndexBuild(format!(
                        "duplicate row id '{}' in sheet '{}'",
                        row.row_id, row.sheet_id
                    )));
                }
                batch.push(row);
            }
            if batch.is_empty() {
                break;
            }

            let records = Self::embed_batch(embedder, &batch, policy).await?;
            policy
                .run("upsert rows", || store.upsert(collection, &records))
                .await?;

            for row in &batch {
                *stats.per_sheet.entry(row.sheet_id.clone()).or_insert(0) += 1;
            }
            stats.rows += batch.len();
            debug!(rows = stats.rows, "Indexed row batch");
        }

        Ok(stats)
    }

    async fn embed_batch(
        embedder: &Arc<dyn Embedder>,
        batch: &[RowRecord],
        policy: &RetryPolicy,
    ) -> Result<Vec<VectorRecord>> {
        let missing: Vec<String> = batch
            .iter()
            .filter(|r| r.embedding.is_none())
            .map(|r| r.text.clone())
            .collect();
        let mut computed = if missing.is_empty() {
            Vec::new()
        } else {
            policy
                .run("embed rows", || embedder.embed_batch(&missing))
                .await?
        }
        .into_iter();

        batch
            .iter()
            .map(|row| {
                let embedding = match &row.embedding {
                    Some(e) => e.clone(),
                    None => computed
                        .next()
                        .ok_or_else(|| AppError::Embedding("missing row embedding".into()))?,
                };
                let mut metadata = VectorMetadata::from_pairs([
                    (SHEET_FIELD, row.sheet_id.as_str()),
                    (ROW_FIELD, row.row_id.as_str()),
                ]);
                for (column, value) in &row.fields {
                    metadata.insert(format!("field.{}", column), value.as_str());
                }
                Ok(VectorRecord {
                    id: store_id(&row.sheet_id, &row.row_id),
                    embedding,
                    text: row.text.clone(),
                    metadata,
                })
            })
            .collect()
    }

    /// Bind to an existing, already populated collection.
    pub fn attach(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        collection: String,
        stats: ContentStats,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            embedder,
            collection,
            stats,
            policy,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn stats(&self) -> &ContentStats {
        &self.stats
    }

    pub fn is_empty(&self) -> bool {
        self.stats.rows == 0
    }

    /// Rows indexed for `sheet_id`.
    pub fn row_count(&self, sheet_id: &str) -> usize {
        self.stats.per_sheet.get(sheet_id).copied().unwrap_or(0)
    }

    /// Top-`k` rows for `query`, restricted to `sheets` when non-empty.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        sheets: Option<&[String]>,
    ) -> Result<Vec<QueryHit>> {
        if k == 0 {
            return Err(AppError::InvalidInput("k must be >= 1".into()));
        }
        if self.is_empty() {
            return Ok(Vec::new());
        }
        let embedding = self
            .policy
            .run("embed query", || self.embedder.embed(query))
            .await?;
        self.search_embedding(&embedding, k, sheets).await
    }

    #[instrument(skip(self, embedding, sheets), fields(collection = %self.collection))]
    pub async fn search_embedding(
        &self,
        embedding: &[f32],
        k: usize,
        sheets: Option<&[String]>,
    ) -> Result<Vec<QueryHit>> {
        if k == 0 {
            return Err(AppError::InvalidInput("k must be >= 1".into()));
        }
        if self.is_empty() {
            return Ok(Vec::new());
        }

        let filter = match sheets {
            Some(ids) if !ids.is_empty() => Some(Filter::any_of(SHEET_FIELD, ids.iter())),
            _ => None,
        };
        let raw = self
            .policy
            .run("content search", || {
                self.store
                    .search(&self.collection, embedding, k, filter.as_ref())
            })
            .await?;

        let hits: Vec<QueryHit> = raw
            .into_iter()
            .filter_map(|hit| {
                let sheet = hit.metadata.get_string(SHEET_FIELD)?.to_string();
                let row = hit.metadata.get_string(ROW_FIELD)?.to_string();
                Some(QueryHit::new(HitSource::Content, row, sheet, hit.score, hit.text))
            })
            .collect();

        debug!(count = hits.len(), "Content search completed");
        Ok(hits)
    }

    /// Up to `k_per_sheet` rows from each requested sheet.
    ///
    /// The query is embedded once and the per-sheet searches run
    /// concurrently. Every requested sheet appears in the result, in request
    /// order, with duplicates collapsed.
    pub async fn search_per_sheet(
        &self,
        query: &str,
        sheet_ids: &[String],
        k_per_sheet: usize,
    ) -> Result<Vec<SheetHits>> {
        if k_per_sheet == 0 {
            return Err(AppError::InvalidInput("k_per_sheet must be >= 1".into()));
        }
        if sheet_ids.is_empty() || self.is_empty() {
            return Ok(unique(sheet_ids)
                .into_iter()
                .map(|sheet_id| SheetHits {
                    sheet_id,
                    hits: Vec::new(),
                })
                .collect());
        }
        let embedding = self
            .policy
            .run("embed query", || self.embedder.embed(query))
            .await?;
        self.search_per_sheet_embedding(&embedding, sheet_ids, k_per_sheet)
            .await
    }

    pub async fn search_per_sheet_embedding(
        &self,
        embedding: &[f32],
        sheet_ids: &[String],
        k_per_sheet: usize,
    ) -> Result<Vec<SheetHits>> {
        if k_per_sheet == 0 {
            return Err(AppError::InvalidInput("k_per_sheet must be >= 1".into()));
        }

        let searches = unique(sheet_ids).into_iter().map(|sheet_id| async move {
            let available = self.row_count(&sheet_id);
            let hits = if available == 0 {
                Vec::new()
            } else {
                self.search_embedding(
                    embedding,
                    k_per_sheet.min(available),
                    Some(std::slice::from_ref(&sheet_id)),
                )
                .await?
            };
            Ok::<_, AppError>(SheetHits { sheet_id, hits })
        });

        try_join_all(searches).await
    }
}

fn unique(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}
