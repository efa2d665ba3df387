//! Vector Store Abstraction Layer
//!
//! The structure and content indexes talk to vector storage only through
//! the [`VectorStore`] trait. Filters are typed [`Filter`] values handed to
//! the backend's native filter support.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      VectorStore Trait                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │ create_collection │ upsert │ search(filter) │ count │ ...   │
//! └─────────────────────────────────────────────────────────────┘
//!              ▲                              ▲
//!     ┌────────┴─────────┐          ┌─────────┴────────┐
//!     │ EmbeddedVector   │          │ InMemoryVector   │
//!     │ Store (HNSW)     │          │ Store (exact)    │
//!     └──────────────────┘          └──────────────────┘
//! ```

use crate::types::{AppError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sheetrag_vector::{DistanceMetric, Filter, VectorMetadata};
use std::collections::HashMap;

/// Metadata key under which stores keep a record's text.
pub const TEXT_FIELD: &str = "text";

// ============================================================================
// Records
// ============================================================================

/// A record to be stored: id, embedding, text and filterable metadata.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub text: String,
    pub metadata: VectorMetadata,
}

/// A search hit returned by a store.
#[derive(Debug, Clone)]
pub struct StoreHit {
    pub id: String,
    /// Normalized similarity in `[0, 1]`.
    pub score: f32,
    pub text: String,
    pub metadata: VectorMetadata,
}

/// Information about a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub document_count: usize,
    pub dimensions: usize,
}

// ============================================================================
// Vector Store Trait
// ============================================================================

/// Abstract trait for vector database operations.
///
/// Implementations must order search results by score descending and break
/// ties by insertion order.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Get the name of this vector store provider.
    fn provider_name(&self) -> &'static str;

    /// Create a new collection with the specified vector dimensions.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection already exists.
    async fn create_collection(&self, name: &str, dimensions: usize) -> Result<()>;

    /// Delete a collection and all its data.
    async fn delete_collection(&self, name: &str) -> Result<()>;

    /// List all collections in the vector store.
    async fn list_collections(&self) -> Result<Vec<CollectionInfo>>;

    /// Check if a collection exists.
    async fn collection_exists(&self, name: &str) -> Result<bool>;

    /// Insert or replace records. Returns the number written.
    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<usize>;

    /// Search for the `limit` most similar records passing `filter`.
    ///
    /// Under-fill is not an error.
    async fn search(
        &self,
        collection: &str,
        embedding: &[f32],
        limit: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<StoreHit>>;

    /// Count records in a collection.
    async fn count(&self, collection: &str) -> Result<usize>;

    /// Flush state to durable storage, if the backend has any.
    async fn persist(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// In-Memory Vector Store (for testing)
// ============================================================================

struct MemCollection {
    dimensions: usize,
    records: Vec<VectorRecord>,
    positions: HashMap<String, usize>,
}

/// Exact-scan vector store kept entirely in memory.
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, MemCollection>>,
}

impl InMemoryVectorStore {
    /// Create a new in-memory vector store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn collection_missing(name: &str) -> AppError {
    AppError::NotFound(format!("Collection '{}' not found", name))
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn provider_name(&self) -> &'static str {
        "in-memory"
    }

    async fn create_collection(&self, name: &str, dimensions: usize) -> Result<()> {
        let mut collections = self.collections.write();
        if collections.contains_key(name) {
            return Err(AppError::InvalidInput(format!(
                "Collection '{}' already exists",
                name
            )));
        }
        collections.insert(
            name.to_string(),
            MemCollection {
                dimensions,
                records: Vec::new(),
                positions: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.collections
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| collection_missing(name))
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let collections = self.collections.read();
        let mut infos: Vec<_> = collections
            .iter()
            .map(|(name, col)| CollectionInfo {
                name: name.clone(),
                document_count: col.records.len(),
                dimensions: col.dimensions,
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(self.collections.read().contains_key(name))
    }

    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<usize> {
        let mut collections = self.collections.write();
        let col = collections
            .get_mut(collection)
            .ok_or_else(|| collection_missing(collection))?;

        if let Some(bad) = records.iter().find(|r| r.embedding.len() != col.dimensions) {
            return Err(AppError::VectorStore(format!(
                "Dimension mismatch for '{}': expected {}, got {}",
                bad.id,
                col.dimensions,
                bad.embedding.len()
            )));
        }

        for record in records {
            match col.positions.get(&record.id) {
                Some(&pos) => col.records[pos] = record.clone(),
                None => {
                    col.positions.insert(record.id.clone(), col.records.len());
                    col.records.push(record.clone());
                }
            }
        }
        Ok(records.len())
    }

    async fn search(
        &self,
        collection: &str,
        embedding: &[f32],
        limit: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<StoreHit>> {
        let collections = self.collections.read();
        let col = collections
            .get(collection)
            .ok_or_else(|| collection_missing(collection))?;

        let mut scored: Vec<(usize, f32)> = col
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| filter.is_none_or(|f| f.matches(Some(&r.metadata))))
            .map(|(pos, r)| (pos, DistanceMetric::Cosine.score(embedding, &r.embedding)))
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .map(|(pos, score)| {
                let r = &col.records[pos];
                StoreHit {
                    id: r.id.clone(),
                    score,
                    text: r.text.clone(),
                    metadata: r.metadata.clone(),
                }
            })
            .collect())
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let collections = self.collections.read();
        collections
            .get(collection)
            .map(|c| c.records.len())
            .ok_or_else(|| collection_missing(collection))
    }
}

// ============================================================================
// Tests
// ============================================================================
