//! Persistence layer for sheetrag-vector.
//!
//! Each collection lives in its own directory:
//! - `{base_path}/{name}/metadata.json` - collection parameters
//! - `{base_path}/{name}/vectors.json` - stored vectors in insertion order
//!   (`vectors.bin` in postcard format with the `binary` feature)
//!
//! Files are written to a temporary sibling and renamed into place, so a
//! crash mid-save leaves the previous snapshot intact.

use crate::collection::Collection;
use crate::config::{Config, HnswConfig};
use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::types::StoredVector;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[cfg(not(feature = "binary"))]
const VECTORS_FILE: &str = "vectors.json";
#[cfg(feature = "binary")]
const VECTORS_FILE: &str = "vectors.bin";

/// Collection metadata stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CollectionMetadata {
    name: String,
    dimensions: usize,
    metric: String,
    hnsw_m: usize,
    hnsw_ef_construction: usize,
    hnsw_ef_search: usize,
    vector_count: usize,
    saved_at: DateTime<Utc>,
}

/// Write `data` to `path` through a temporary file and rename.
pub(crate) async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(not(feature = "binary"))]
fn encode_vectors(vectors: &[StoredVector]) -> Result<Vec<u8>> {
    serde_json::to_vec(vectors)
        .map_err(|e| Error::Persistence(format!("Failed to serialize vectors: {}", e)))
}

#[cfg(feature = "binary")]
fn encode_vectors(vectors: &[StoredVector]) -> Result<Vec<u8>> {
    postcard::to_allocvec(vectors)
        .map_err(|e| Error::Persistence(format!("Failed to serialize vectors: {}", e)))
}

#[cfg(not(feature = "binary"))]
fn decode_vectors(data: &[u8]) -> Result<Vec<StoredVector>> {
    serde_json::from_slice(data)
        .map_err(|e| Error::Persistence(format!("Failed to parse vectors: {}", e)))
}

#[cfg(feature = "binary")]
fn decode_vectors(data: &[u8]) -> Result<Vec<StoredVector>> {
    postcard::from_bytes(data)
        .map_err(|e| Error::Persistence(format!("Failed to parse vectors: {}", e)))
}

/// Save a collection to disk.
pub async fn save_collection(base_path: &Path, name: &str, collection: &Collection) -> Result<()> {
    let collection_path = base_path.join(name);
    tokio::fs::create_dir_all(&collection_path).await?;

    let vectors = collection.export_all();

    let metadata = CollectionMetadata {
        name: name.to_string(),
        dimensions: collection.dimensions(),
        metric: collection.metric().name().to_string(),
        hnsw_m: collection.hnsw_config().m,
        hnsw_ef_construction: collection.hnsw_config().ef_construction,
        hnsw_ef_search: collection.hnsw_config().ef_search,
        vector_count: vectors.len(),
        saved_at: Utc::now(),
    };

    let encoded = encode_vectors(&vectors)?;
    write_atomic(&collection_path.join(VECTORS_FILE), &encoded).await?;

    let metadata_json = serde_json::to_vec_pretty(&metadata)
        .map_err(|e| Error::Persistence(format!("Failed to serialize metadata: {}", e)))?;
    write_atomic(&collection_path.join("metadata.json"), &metadata_json).await?;

    info!(name, count = vectors.len(), path = ?collection_path, "Saved collection");
    Ok(())
}

/// Load a collection from disk.
pub async fn load_collection(base_path: &Path, name: &str, config: &Config) -> Result<Collection> {
    let collection_path = base_path.join(name);

    if !collection_path.exists() {
        return Err(Error::CollectionNotFound(name.to_string()));
    }

    let metadata_json = tokio::fs::read_to_string(collection_path.join("metadata.json")).await?;
    let metadata: CollectionMetadata = serde_json::from_str(&metadata_json)
        .map_err(|e| Error::Persistence(format!("Failed to parse metadata: {}", e)))?;

    let metric: DistanceMetric = metadata.metric.parse().map_err(Error::Persistence)?;

    let hnsw_config = HnswConfig {
        m: metadata.hnsw_m,
        ef_construction: metadata.hnsw_ef_construction,
        ef_search: metadata.hnsw_ef_search,
        ..config.hnsw_config.clone()
    };

    let collection = Collection::new(
        metadata.name.clone(),
        metadata.dimensions,
        metric,
        hnsw_config,
        config,
    )?;

    let vectors_path = collection_path.join(VECTORS_FILE);
    if vectors_path.exists() {
        let data = tokio::fs::read(&vectors_path).await?;
        let vectors = decode_vectors(&data)?;

        if vectors.len() != metadata.vector_count {
            return Err(Error::Persistence(format!(
                "Collection '{}' expected {} vectors, found {}",
                name,
                metadata.vector_count,
                vectors.len()
            )));
        }

        let batch: Vec<_> = vectors
            .iter()
            .map(|v| (v.id.as_str(), v.vector.as_slice(), v.metadata.clone()))
            .collect();
        let count = collection.upsert(batch)?;
        debug!(name, count, "Loaded vectors");
    }

    info!(name, dimensions = metadata.dimensions, "Loaded collection");
    Ok(collection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VectorMetadata;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_load_collection() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::memory();

        let collection = Collection::new(
            "rows__g1".to_string(),
            3,
            DistanceMetric::Cosine,
            HnswConfig::default(),
            &config,
        )
        .unwrap();

        collection
            .upsert([
                (
                    "r1",
                    &[1.0, 0.0, 0.0][..],
                    Some(VectorMetadata::from_pairs([("sheet_id", "Pricing")])),
                ),
                ("r2", &[0.0, 1.0, 0.0][..], None),
            ])
            .unwrap();

        save_collection(temp_dir.path(), "rows__g1", &collection)
            .await
            .unwrap();

        let loaded = load_collection(temp_dir.path(), "rows__g1", &config)
            .await
            .unwrap();

        assert_eq!(loaded.name(), "rows__g1");
        assert_eq!(loaded.dimensions(), 3);
        assert_eq!(loaded.len(), 2);

        let exported = loaded.export_all();
        let ids: Vec<_> = exported.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r2"]);
        let meta = exported[0].metadata.as_ref().unwrap();
        assert_eq!(meta.get_string("sheet_id"), Some("Pricing"));
    }

    #[tokio::test]
    async fn test_load_missing_collection() {
        let temp_dir = TempDir::new().unwrap();
        let result = load_collection(temp_dir.path(), "nope", &Config::memory()).await;
        assert!(matches!(result, Err(Error::CollectionNotFound(_))));
    }
}
