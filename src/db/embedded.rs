//! Embedded vector store backed by `sheetrag-vector`.
//!
//! Record text travels inside the vector metadata under [`TEXT_FIELD`], so
//! a persisted collection is self-contained.
//!
//! # Example
//!
//! ```rust,ignore
//! let store = EmbeddedVectorStore::new(Some("./data/vectors".into())).await?;
//! store.create_collection("rows__g1", 384).await?;
//! store.upsert("rows__g1", &records).await?;
//! let hits = store.search("rows__g1", &embedding, 10, Some(&filter)).await?;
//! ```

use crate::types::{AppError, Result};
use async_trait::async_trait;
use sheetrag_vector::{Config, DistanceMetric, Filter, VectorDb};
use std::path::PathBuf;
use tracing::debug;

use super::vectorstore::{CollectionInfo, StoreHit, VectorRecord, VectorStore, TEXT_FIELD};

/// HNSW-backed store with optional on-disk persistence.
pub struct EmbeddedVectorStore {
    db: VectorDb,
    path: Option<PathBuf>,
}

impl EmbeddedVectorStore {
    /// Open the store. With a path, previously persisted collections are loaded.
    pub async fn new(path: Option<String>) -> Result<Self> {
        Self::with_config(path, Config::memory()).await
    }

    /// Open the store with explicit index tuning.
    pub async fn with_config(path: Option<String>, mut config: Config) -> Result<Self> {
        let path_buf = path.map(PathBuf::from);
        config.data_path = path_buf.clone();

        let db = VectorDb::open(config).await.map_err(|e| {
            AppError::Configuration(format!("Failed to open vector database: {}", e))
        })?;

        Ok(Self { db, path: path_buf })
    }

    /// Data directory, if persistent.
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }
}

#[async_trait]
impl VectorStore for EmbeddedVectorStore {
    fn provider_name(&self) -> &'static str {
        "embedded"
    }

    async fn create_collection(&self, name: &str, dimensions: usize) -> Result<()> {
        self.db
            .create_collection(name, dimensions, DistanceMetric::Cosine)
            .await?;
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.db.delete_collection(name).await?;
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let mut infos = Vec::new();
        for name in self.db.list_collections() {
            let stats = self.db.collection_stats(&name)?;
            infos.push(CollectionInfo {
                name,
                document_count: stats.vector_count,
                dimensions: stats.dimensions,
            });
        }
        Ok(infos)
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(self.db.collection_exists(name))
    }

    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<usize> {
        let metadata: Vec<_> = records
            .iter()
            .map(|r| {
                let mut meta = r.metadata.clone();
                meta.insert(TEXT_FIELD, r.text.as_str());
                meta
            })
            .collect();

        let batch = records
            .iter()
            .zip(metadata)
            .map(|(r, meta)| (r.id.as_str(), r.embedding.as_slice(), Some(meta)));

        let count = self.db.upsert(collection, batch).await?;
        debug!(collection, count, "Upserted records");
        Ok(count)
    }

    async fn search(
        &self,
        collection: &str,
        embedding: &[f32],
        limit: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<StoreHit>> {
        let results = self.db.search(collection, embedding, limit, filter).await?;

        Ok(results
            .into_iter()
            .map(|r| {
                let mut metadata = r.metadata.unwrap_or_default();
                let text = match metadata.data.remove(TEXT_FIELD) {
                    Some(sheetrag_vector::MetadataValue::String(s)) => s,
                    _ => String::new(),
                };
                StoreHit {
                    id: r.id,
                    score: r.score,
                    text,
                    metadata,
                }
            })
            .collect())
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        Ok(self.db.count(collection)?)
    }

    async fn persist(&self) -> Result<()> {
        self.db.persist().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetrag_vector::VectorMetadata;
    use tempfile::TempDir;

    fn record(id: &str, sheet: &str, embedding: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            embedding,
            text: format!("{sheet}: {id}"),
            metadata: VectorMetadata::from_pairs([("sheet_id", sheet)]),
        }
    }

    #[tokio::test]
    async fn test_text_round_trips_through_metadata() {
        let store = EmbeddedVectorStore::new(None).await.unwrap();
        store.create_collection("rows", 3).await.unwrap();
        store
            .upsert("rows", &[record("Pricing:1", "Pricing", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();

        let hits = store.search("rows", &[1.0, 0.0, 0.0], 1, None).await.unwrap();
        assert_eq!(hits[0].text, "Pricing: Pricing:1");
        assert_eq!(hits[0].metadata.get_string("sheet_id"), Some("Pricing"));
        assert!(hits[0].metadata.get(TEXT_FIELD).is_none());
    }

    #[tokio::test]
    async fn test_persist_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_string_lossy().to_string();

        {
            let store = EmbeddedVectorStore::new(Some(path.clone())).await.unwrap();
            store.create_collection("rows", 3).await.unwrap();
            store
                .upsert(
                    "rows",
                    &[
                        record("a", "Inventory", vec![0.0, 1.0, 0.0]),
                        record("b", "Pricing", vec![1.0, 0.0, 0.0]),
                    ],
                )
                .await
                .unwrap();
            store.persist().await.unwrap();
        }

        let store = EmbeddedVectorStore::new(Some(path)).await.unwrap();
        assert_eq!(store.count("rows").await.unwrap(), 2);

        let filter = Filter::eq("sheet_id", "Pricing");
        let hits = store
            .search("rows", &[0.0, 1.0, 0.0], 5, Some(&filter))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
    }

    #[tokio::test]
    async fn test_missing_collection_is_not_found() {
        let store = EmbeddedVectorStore::new(None).await.unwrap();
        assert!(matches!(
            store.count("nope").await,
            Err(AppError::NotFound(_))
        ));
    }
}
