//! # sheetrag-vector
//!
//! A pure-Rust embedded vector database with HNSW indexing, exact re-scoring
//! and typed metadata filters.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sheetrag_vector::{Config, DistanceMetric, Filter, VectorDb, VectorMetadata};
//!
//! let db = VectorDb::open(Config::memory()).await?;
//! db.create_collection("rows", 384, DistanceMetric::Cosine).await?;
//!
//! let meta = VectorMetadata::from_pairs([("sheet_id", "Pricing")]);
//! db.upsert("rows", [("Pricing/r1", embedding.as_slice(), Some(meta))]).await?;
//!
//! let filter = Filter::any_of("sheet_id", ["Pricing", "Inventory"]);
//! let hits = db.search("rows", &query, 10, Some(&filter)).await?;
//! ```
//!
//! ## Search
//!
//! Collections up to [`Config::exact_search_threshold`] vectors are ranked by
//! exact scan. Larger collections draw candidates from the HNSW graph and
//! re-score them exactly. A filter is resolved to the set of matching entries
//! first: small sets are ranked exactly, larger ones restrict the graph walk
//! to members of the set. Scores are normalized to `[0, 1]` and ties rank by insertion order.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod collection;
pub mod config;
pub mod distance;
pub mod error;
pub mod filter;
pub mod index;
pub mod persistence;
pub mod types;

pub use collection::Collection;
pub use config::{Config, HnswConfig};
pub use distance::DistanceMetric;
pub use error::{Error, Result};
pub use filter::Filter;
pub use types::{MetadataValue, SearchResult, StoredVector, VectorId, VectorMetadata};

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// The main vector database instance.
///
/// All operations are thread-safe. Collections live in an `scc::HashMap`,
/// which is safe to use across `.await` points.
#[derive(Clone)]
pub struct VectorDb {
    inner: Arc<VectorDbInner>,
}

struct VectorDbInner {
    config: Config,
    collections: scc::HashMap<String, Arc<Collection>>,
}

impl VectorDb {
    /// Open or create a vector database with the given configuration.
    ///
    /// Persistent databases load every collection listed in
    /// `collections.json`; collections that fail to load are skipped.
    #[instrument(skip(config), fields(persistent = config.data_path.is_some()))]
    pub async fn open(config: Config) -> Result<Self> {
        info!("Opening vector database");

        let db = Self {
            inner: Arc::new(VectorDbInner {
                config: config.clone(),
                collections: scc::HashMap::new(),
            }),
        };

        if let Some(ref path) = config.data_path {
            db.load_collections(path).await?;
        }

        Ok(db)
    }

    /// Create a new collection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CollectionExists`] if the name is taken.
    #[instrument(skip(self))]
    pub async fn create_collection(
        &self,
        name: &str,
        dimensions: usize,
        metric: DistanceMetric,
    ) -> Result<()> {
        info!(name, dimensions, %metric, "Creating collection");

        if self.inner.collections.contains(name) {
            return Err(Error::CollectionExists(name.to_string()));
        }

        let collection = Collection::new(
            name.to_string(),
            dimensions,
            metric,
            self.inner.config.hnsw_config.clone(),
            &self.inner.config,
        )?;

        // Insert returns Err if key already exists (handles race condition)
        if self
            .inner
            .collections
            .insert(name.to_string(), Arc::new(collection))
            .is_err()
        {
            return Err(Error::CollectionExists(name.to_string()));
        }

        if let Some(ref path) = self.inner.config.data_path {
            self.persist_collection_list(path).await?;
        }

        Ok(())
    }

    /// Delete a collection and all its data.
    #[instrument(skip(self))]
    pub async fn delete_collection(&self, name: &str) -> Result<()> {
        info!(name, "Deleting collection");

        if self.inner.collections.remove(name).is_none() {
            return Err(Error::CollectionNotFound(name.to_string()));
        }

        if let Some(ref path) = self.inner.config.data_path {
            let collection_path = path.join(name);
            if collection_path.exists() {
                tokio::fs::remove_dir_all(&collection_path).await?;
            }
            self.persist_collection_list(path).await?;
        }

        Ok(())
    }

    /// Check if a collection exists.
    pub fn collection_exists(&self, name: &str) -> bool {
        self.inner.collections.contains(name)
    }

    /// List all collection names, sorted.
    pub fn list_collections(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.inner.collections.scan(|k, _| {
            names.push(k.clone());
        });
        names.sort();
        names
    }

    fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.inner
            .collections
            .read(name, |_, v| v.clone())
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))
    }

    /// Insert or replace vectors in a collection.
    ///
    /// The batch is validated as a whole; on error nothing is written.
    #[instrument(skip(self, entries))]
    pub async fn upsert<'a, I>(&self, collection: &str, entries: I) -> Result<usize>
    where
        I: IntoIterator<Item = (&'a str, &'a [f32], Option<VectorMetadata>)>,
    {
        let count = self.collection(collection)?.upsert(entries)?;
        debug!(count, "Upserted vectors");
        Ok(count)
    }

    /// Search for similar vectors.
    ///
    /// Returns at most `limit` results, best first. A filter restricts the
    /// result to vectors whose metadata satisfies it.
    #[instrument(skip(self, query, filter), fields(dim = query.len(), filtered = filter.is_some()))]
    pub async fn search(
        &self,
        collection: &str,
        query: &[f32],
        limit: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>> {
        let col = self.collection(collection)?;
        let results = col.search(query, limit, filter)?;
        debug!(count = results.len(), "Search completed");
        Ok(results)
    }

    /// Get the number of vectors in a collection.
    pub fn count(&self, collection: &str) -> Result<usize> {
        let col = self.collection(collection)?;
        Ok(col.len())
    }

    /// Get collection statistics.
    pub fn collection_stats(&self, collection: &str) -> Result<CollectionStats> {
        let col = self.collection(collection)?;
        Ok(col.stats())
    }

    /// Persist every collection to disk. No-op for in-memory databases.
    #[instrument(skip(self))]
    pub async fn persist(&self) -> Result<()> {
        let Some(ref path) = self.inner.config.data_path else {
            debug!("Skipping persist for in-memory database");
            return Ok(());
        };

        info!("Persisting database to disk");

        let mut to_persist: Vec<(String, Arc<Collection>)> = Vec::new();
        self.inner.collections.scan(|name, collection| {
            to_persist.push((name.clone(), collection.clone()));
        });

        for (name, collection) in to_persist {
            persistence::save_collection(path, &name, &collection).await?;
        }
        self.persist_collection_list(path).await?;

        Ok(())
    }

    async fn load_collections(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            tokio::fs::create_dir_all(path).await?;
            return Ok(());
        }

        let list_path = path.join("collections.json");
        if !list_path.exists() {
            return Ok(());
        }

        let data = tokio::fs::read_to_string(&list_path).await?;
        let collection_names: Vec<String> = serde_json::from_str(&data)
            .map_err(|e| Error::Persistence(format!("Failed to parse collections.json: {}", e)))?;

        for name in collection_names {
            match persistence::load_collection(path, &name, &self.inner.config).await {
                Ok(collection) => {
                    let _ = self.inner.collections.insert(name.clone(), Arc::new(collection));
                    info!(name, "Loaded collection");
                }
                Err(e) => {
                    warn!(name, error = %e, "Failed to load collection, skipping");
                }
            }
        }

        Ok(())
    }

    async fn persist_collection_list(&self, base_path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(base_path).await?;
        let collections = self.list_collections();
        let data = serde_json::to_vec_pretty(&collections)
            .map_err(|e| Error::Persistence(format!("Failed to serialize collections: {}", e)))?;
        persistence::write_atomic(&base_path.join("collections.json"), &data).await
    }
}

/// Statistics about a collection.
#[derive(Debug, Clone)]
pub struct CollectionStats {
    /// Name of the collection.
    pub name: String,
    /// Number of vectors in the collection.
    pub vector_count: usize,
    /// Dimensionality of vectors.
    pub dimensions: usize,
    /// Distance metric used.
    pub metric: DistanceMetric,
    /// Approximate memory usage in bytes.
    pub memory_bytes: usize,
    /// HNSW index parameters.
    pub hnsw_params: HnswParams,
}

/// HNSW index parameters.
#[derive(Debug, Clone)]
pub struct HnswParams {
    /// Maximum number of connections per layer.
    pub m: usize,
    /// Size of the dynamic candidate list during construction.
    pub ef_construction: usize,
    /// Size of the dynamic candidate list during search.
    pub ef_search: usize,
}
