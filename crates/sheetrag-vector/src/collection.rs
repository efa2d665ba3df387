//! Named collections.
//!
//! A collection pairs a [`VectorIndex`] with the settings it was created
//! with, so it can be written out and rebuilt identically.

use crate::config::{Config, HnswConfig};
use crate::distance::DistanceMetric;
use crate::error::Result;
use crate::filter::Filter;
use crate::index::VectorIndex;
use crate::types::{SearchResult, StoredVector, VectorMetadata};
use crate::{CollectionStats, HnswParams};

/// A named, fixed-dimension set of vectors under one metric.
pub struct Collection {
    name: String,
    hnsw: HnswConfig,
    index: VectorIndex,
}

impl Collection {
    pub(crate) fn new(
        name: String,
        dimensions: usize,
        metric: DistanceMetric,
        hnsw: HnswConfig,
        config: &Config,
    ) -> Result<Self> {
        let index = VectorIndex::new(
            dimensions,
            metric,
            hnsw.clone(),
            config.exact_search_threshold,
            config.exact_filter_threshold,
        )?;
        Ok(Self { name, hnsw, index })
    }

    /// Collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Vector dimensionality.
    pub fn dimensions(&self) -> usize {
        self.index.dimensions()
    }

    /// Similarity metric.
    pub fn metric(&self) -> DistanceMetric {
        self.index.metric()
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Graph settings the collection was created with.
    pub fn hnsw_config(&self) -> &HnswConfig {
        &self.hnsw
    }

    /// Insert or replace a batch of `(id, vector, metadata)` entries.
    ///
    /// Nothing is written unless every entry validates.
    pub fn upsert<'a, I>(&self, entries: I) -> Result<usize>
    where
        I: IntoIterator<Item = (&'a str, &'a [f32], Option<VectorMetadata>)>,
    {
        self.index.insert_batch(entries)
    }

    /// Best `limit` matches for `query`, keeping only entries that pass `filter`.
    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>> {
        self.index.search(query, limit, filter)
    }

    /// Size and settings summary.
    pub fn stats(&self) -> CollectionStats {
        CollectionStats {
            name: self.name.clone(),
            vector_count: self.len(),
            dimensions: self.dimensions(),
            metric: self.metric(),
            memory_bytes: self.index.memory_usage(),
            hnsw_params: HnswParams {
                m: self.hnsw.m,
                ef_construction: self.hnsw.ef_construction,
                ef_search: self.hnsw.ef_search,
            },
        }
    }

    /// Every entry in insertion order, for snapshots.
    pub fn export_all(&self) -> Vec<StoredVector> {
        self.index.export_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(dims: usize) -> Collection {
        Collection::new(
            "content__g1".to_string(),
            dims,
            DistanceMetric::Cosine,
            HnswConfig::default(),
            &Config::memory(),
        )
        .unwrap()
    }

    #[test]
    fn test_upsert_and_filtered_search() {
        let col = rows(3);
        assert!(col.is_empty());

        let pricing = VectorMetadata::from_pairs([("sheet_id", "Pricing")]);
        let stock = VectorMetadata::from_pairs([("sheet_id", "Inventory")]);
        let a = [1.0, 0.0, 0.0];
        let b = [0.9, 0.1, 0.0];
        col.upsert([
            ("Pricing/r1", &a[..], Some(pricing)),
            ("Inventory/r1", &b[..], Some(stock)),
        ])
        .unwrap();
        assert_eq!(col.len(), 2);

        let all = col.search(&a, 10, None).unwrap();
        assert_eq!(all[0].id, "Pricing/r1");

        let only_stock = col
            .search(&a, 10, Some(&Filter::eq("sheet_id", "Inventory")))
            .unwrap();
        assert_eq!(only_stock.len(), 1);
        assert_eq!(only_stock[0].id, "Inventory/r1");
    }

    #[test]
    fn test_stats_report_settings() {
        let col = rows(8);
        col.upsert([("Pricing/r1", &[0.5; 8][..], None)]).unwrap();

        let stats = col.stats();
        assert_eq!(stats.name, "content__g1");
        assert_eq!(stats.vector_count, 1);
        assert_eq!(stats.dimensions, 8);
        assert_eq!(stats.metric, DistanceMetric::Cosine);
        assert_eq!(stats.hnsw_params.m, col.hnsw_config().m);
        assert!(stats.memory_bytes > 0);
    }
}
