//! Structure index: schema-level vectors, one per (sheet, column set).
//!
//! Search answers "which sheets look relevant" and returns each sheet once,
//! scored by its best-matching descriptor.

use crate::db::{VectorRecord, VectorStore};
use crate::rag::embeddings::Embedder;
use crate::types::{AppError, HitSource, QueryHit, Result, SheetDescriptor};
use crate::utils::retry::RetryPolicy;
use sheetrag_vector::VectorMetadata;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Metadata key holding a record's sheet.
pub const SHEET_FIELD: &str = "sheet_id";

/// An immutable, fully built structure index over one collection.
pub struct StructureIndex {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    collection: String,
    descriptor_count: usize,
    sheet_count: usize,
    max_descriptors_per_sheet: usize,
    policy: RetryPolicy,
}

/// Counts recorded for a built structure index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StructureStats {
    pub descriptors: usize,
    pub sheets: usize,
    pub max_descriptors_per_sheet: usize,
}

impl StructureIndex {
    /// Embed and insert all descriptors into a new collection.
    ///
    /// Fails with [`AppError::IndexBuild`] on any embedding or store error;
    /// the partially written collection is dropped.
    #[instrument(skip(store, embedder, sheets, policy), fields(descriptors = sheets.len()))]
    pub async fn build(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        collection: String,
        sheets: &[SheetDescriptor],
        policy: RetryPolicy,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        if let Some(dup) = sheets.iter().find(|d| !seen.insert(d.descriptor_id.as_str())) {
            return Err(AppError::IndexBuild(format!(
                "duplicate descriptor id '{}'",
                dup.descriptor_id
            )));
        }

        store
            .create_collection(&collection, embedder.dimensions())
            .await
            .map_err(|e| AppError::IndexBuild(format!("create '{}': {}", collection, e)))?;

        match Self::fill(&store, &embedder, &collection, sheets, &policy).await {
            Ok(stats) => {
                info!(
                    collection,
                    descriptors = stats.descriptors,
                    sheets = stats.sheets,
                    "Built structure index"
                );
                Ok(Self::attach(store, embedder, collection, stats, policy))
            }
            Err(e) => {
                if let Err(cleanup) = store.delete_collection(&collection).await {
                    warn!(collection, error = %cleanup, "Failed to drop partial structure collection");
                }
                Err(AppError::IndexBuild(e.to_string()))
            }
        }
    }

    async fn fill(
        store: &Arc<dyn VectorStore>,
        embedder: &Arc<dyn Embedder>,
        collection: &str,
        sheets: &[SheetDescriptor],
        policy: &RetryPolicy,
    ) -> Result<StructureStats> {
        let mut per_sheet: BTreeMap<&str, usize> = BTreeMap::new();
        for d in sheets {
            *per_sheet.entry(d.sheet_id.as_str()).or_insert(0) += 1;
        }

        let missing: Vec<String> = sheets
            .iter()
            .filter(|d| d.embedding.is_none())
            .map(|d| d.text.clone())
            .collect();
        let mut computed = if missing.is_empty() {
            Vec::new()
        } else {
            policy
                .run("embed sheet descriptors", || embedder.embed_batch(&missing))
                .await?
        }
        .into_iter();

        let mut records = Vec::with_capacity(sheets.len());
        for d in sheets {
            let embedding = match &d.embedding {
                Some(e) => e.clone(),
                None => computed
                    .next()
                    .ok_or_else(|| AppError::Embedding("missing descriptor embedding".into()))?,
            };
            let mut metadata = VectorMetadata::from_pairs([(SHEET_FIELD, d.sheet_id.as_str())]);
            metadata.insert("columns", d.column_names.join(", "));
            records.push(VectorRecord {
                id: d.descriptor_id.clone(),
                embedding,
                text: d.text.clone(),
                metadata,
            });
        }

        if !records.is_empty() {
            policy
                .run("upsert sheet descriptors", || store.upsert(collection, &records))
                .await?;
        }

        Ok(StructureStats {
            descriptors: sheets.len(),
            sheets: per_sheet.len(),
            max_descriptors_per_sheet: per_sheet.values().copied().max().unwrap_or(0),
        })
    }

    /// Bind to an existing, already populated collection.
    pub fn attach(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        collection: String,
        stats: StructureStats,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            embedder,
            collection,
            descriptor_count: stats.descriptors,
            sheet_count: stats.sheets,
            max_descriptors_per_sheet: stats.max_descriptors_per_sheet.max(1),
            policy,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn stats(&self) -> StructureStats {
        StructureStats {
            descriptors: self.descriptor_count,
            sheets: self.sheet_count,
            max_descriptors_per_sheet: self.max_descriptors_per_sheet,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.descriptor_count == 0
    }

    /// Top-`k` sheets for `query`, best first.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<QueryHit>> {
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
        self.search_embedding(&embedding, k).await
    }

    /// Top-`k` sheets for a pre-computed query embedding.
    #[instrument(skip(self, embedding), fields(collection = %self.collection))]
    pub async fn search_embedding(&self, embedding: &[f32], k: usize) -> Result<Vec<QueryHit>> {
        if k == 0 {
            return Err(AppError::InvalidInput("k must be >= 1".into()));
        }
        if self.is_empty() {
            return Ok(Vec::new());
        }

        // Enough descriptors that k distinct sheets survive de-duplication.
        let fetch = k.saturating_mul(self.max_descriptors_per_sheet);
        let raw = self
            .policy
            .run("structure search", || {
                self.store.search(&self.collection, embedding, fetch, None)
            })
            .await?;

        let mut seen = HashSet::new();
        let hits: Vec<QueryHit> = raw
            .into_iter()
            .filter_map(|hit| {
                let sheet = hit.metadata.get_string(SHEET_FIELD)?.to_string();
                if !seen.insert(sheet.clone()) {
                    return None;
                }
                Some(QueryHit::new(
                    HitSource::Structure,
                    hit.id,
                    sheet,
                    hit.score,
                    hit.text,
                ))
            })
            .take(k)
            .collect();

        debug!(count = hits.len(), "Structure search completed");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryVectorStore;
    use crate::rag::embeddings::HashingEmbedder;

    fn descriptor(id: &str, sheet: &str, embedding: Vec<f32>) -> SheetDescriptor {
        SheetDescriptor {
            descriptor_id: id.to_string(),
            sheet_id: sheet.to_string(),
            column_names: vec!["a".into()],
            text: format!("Sheet {}", sheet),
            embedding: Some(embedding),
        }
    }

    async fn index(sheets: &[SheetDescriptor]) -> StructureIndex {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(3).unwrap());
        StructureIndex::build(store, embedder, "s".into(), sheets, RetryPolicy::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_dedupes_sheets_by_best_descriptor() {
        let idx = index(&[
            descriptor("A#0", "A", vec![1.0, 0.0, 0.0]),
            descriptor("A#1", "A", vec![0.9, 0.1, 0.0]),
            descriptor("B#0", "B", vec![0.0, 1.0, 0.0]),
        ])
        .await;

        let hits = idx.search_embedding(&[1.0, 0.0, 0.0], 2).await.unwrap();
        let sheets: Vec<_> = hits.iter().map(|h| h.sheet_id.as_str()).collect();
        assert_eq!(sheets, vec!["A", "B"]);
        assert_eq!(hits[0].matched_id, "A#0");
        assert_eq!(idx.stats().max_descriptors_per_sheet, 2);
    }

    #[tokio::test]
    async fn test_zero_k_is_invalid() {
        let idx = index(&[descriptor("A#0", "A", vec![1.0, 0.0, 0.0])]).await;
        assert!(matches!(
            idx.search_embedding(&[1.0, 0.0, 0.0], 0).await,
            Err(AppError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_index_returns_nothing() {
        let idx = index(&[]).await;
        assert!(idx.is_empty());
        assert!(idx.search("anything", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_descriptor_ids_rejected() {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(3).unwrap());
        let result = StructureIndex::build(
            store.clone(),
            embedder,
            "s".into(),
            &[
                descriptor("A#0", "A", vec![1.0, 0.0, 0.0]),
                descriptor("A#0", "A", vec![1.0, 0.0, 0.0]),
            ],
            RetryPolicy::default(),
        )
        .await;
        assert!(matches!(result, Err(AppError::IndexBuild(_))));
        assert!(!store.collection_exists("s").await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_fill_drops_collection() {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(3).unwrap());
        // Wrong dimensionality makes the upsert fail.
        let result = StructureIndex::build(
            store.clone(),
            embedder,
            "s".into(),
            &[descriptor("A#0", "A", vec![1.0, 0.0])],
            RetryPolicy {
                retries: 0,
                ..RetryPolicy::default()
            },
        )
        .await;
        assert!(matches!(result, Err(AppError::IndexBuild(_))));
        assert!(!store.collection_exists("s").await.unwrap());
    }
}
