//! Vector index: ordered exact storage plus an HNSW graph.
//!
//! Every vector is kept in an insertion-ordered map next to the graph. Small
//! collections are ranked by exact scan; larger ones ask the graph for
//! candidates and re-score them exactly. Both paths order results by score
//! descending, then by insertion order, so equal scores rank the same way
//! no matter which path served the query.
//!
//! String metadata is also kept in posting lists, so a filter resolves to
//! its matching internal ids without touching the vectors. The graph walk
//! is then restricted to those ids.

use crate::config::HnswConfig;
use crate::distance::{norm_squared, DistanceMetric};
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::types::{MetadataValue, SearchResult, StoredVector, VectorId, VectorMetadata};
use anndists::dist::distances::{DistCosine, DistL2};
use hnsw_rs::filter::FilterT;
use hnsw_rs::hnsw::Hnsw;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, trace};

const MAX_LAYER: usize = 16;

struct Entry {
    id: VectorId,
    vector: Vec<f32>,
    metadata: Option<VectorMetadata>,
}

#[derive(Default)]
struct Storage {
    /// Internal id → entry; internal ids grow with insertion order.
    entries: BTreeMap<usize, Entry>,
    ids: HashMap<VectorId, usize>,
    /// `(field, string value)` → internal ids carrying it.
    postings: HashMap<(String, String), BTreeSet<usize>>,
    next_internal_id: usize,
}

impl Storage {
    fn index_metadata(&mut self, internal_id: usize, metadata: Option<&VectorMetadata>) {
        for key in string_pairs(metadata) {
            self.postings.entry(key).or_default().insert(internal_id);
        }
    }

    fn unindex_metadata(&mut self, internal_id: usize, metadata: Option<&VectorMetadata>) {
        for key in string_pairs(metadata) {
            if let Some(ids) = self.postings.get_mut(&key) {
                ids.remove(&internal_id);
                if ids.is_empty() {
                    self.postings.remove(&key);
                }
            }
        }
    }

    /// Internal ids matching `filter` from the posting lists, or `None`
    /// when the filter has a condition the lists cannot answer.
    fn resolve(&self, filter: &Filter) -> Option<BTreeSet<usize>> {
        match filter {
            Filter::Eq { field, value } => self.posting(field, value),
            Filter::In { field, values } => {
                let mut out = BTreeSet::new();
                for value in values {
                    out.extend(self.posting(field, value)?);
                }
                Some(out)
            }
            Filter::And(conditions) => {
                let mut sets = conditions.iter().filter_map(|c| self.resolve(c));
                let first = sets.next()?;
                Some(sets.fold(first, |acc, set| acc.intersection(&set).copied().collect()))
            }
            Filter::Or(conditions) => {
                let mut out = BTreeSet::new();
                for condition in conditions {
                    out.extend(self.resolve(condition)?);
                }
                Some(out)
            }
        }
    }

    fn posting(&self, field: &str, value: &MetadataValue) -> Option<BTreeSet<usize>> {
        match value {
            MetadataValue::String(v) => Some(
                self.postings
                    .get(&(field.to_string(), v.clone()))
                    .cloned()
                    .unwrap_or_default(),
            ),
            _ => None,
        }
    }

    /// Sorted internal ids of live entries passing `filter`.
    fn matching(&self, filter: &Filter) -> Vec<usize> {
        // Posting sets may over-approximate an `And` with unresolvable parts,
        // so every member is re-checked.
        let check = |id: &usize| {
            self.entries
                .get(id)
                .is_some_and(|e| filter.matches(e.metadata.as_ref()))
        };
        match self.resolve(filter) {
            Some(set) => set.into_iter().filter(check).collect(),
            None => self.entries.keys().copied().filter(check).collect(),
        }
    }
}

fn string_pairs(metadata: Option<&VectorMetadata>) -> Vec<(String, String)> {
    metadata
        .map(|m| {
            m.data
                .iter()
                .filter_map(|(k, v)| match v {
                    MetadataValue::String(s) => Some((k.clone(), s.clone())),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Type-erased HNSW graph.
enum Graph {
    Cosine(Hnsw<'static, f32, DistCosine>),
    Euclidean(Hnsw<'static, f32, DistL2>),
}

impl Graph {
    fn new(metric: DistanceMetric, config: &HnswConfig) -> Self {
        match metric {
            DistanceMetric::Cosine => Graph::Cosine(Hnsw::new(
                config.m,
                config.capacity,
                MAX_LAYER,
                config.ef_construction,
                DistCosine {},
            )),
            DistanceMetric::Euclidean => Graph::Euclidean(Hnsw::new(
                config.m,
                config.capacity,
                MAX_LAYER,
                config.ef_construction,
                DistL2 {},
            )),
        }
    }

    fn insert(&self, vector: &[f32], internal_id: usize) {
        match self {
            Graph::Cosine(hnsw) => hnsw.insert((vector, internal_id)),
            Graph::Euclidean(hnsw) => hnsw.insert((vector, internal_id)),
        }
    }

    fn parallel_insert(&self, batch: &[(&Vec<f32>, usize)]) {
        match self {
            Graph::Cosine(hnsw) => hnsw.parallel_insert(batch),
            Graph::Euclidean(hnsw) => hnsw.parallel_insert(batch),
        }
    }

    /// Nearest internal ids, restricted to `allowed` when given.
    fn candidates(
        &self,
        query: &[f32],
        knbn: usize,
        ef: usize,
        allowed: Option<&dyn FilterT>,
    ) -> Vec<usize> {
        let neighbours = match self {
            Graph::Cosine(hnsw) => hnsw.search_filter(query, knbn, ef, allowed),
            Graph::Euclidean(hnsw) => hnsw.search_filter(query, knbn, ef, allowed),
        };
        neighbours.into_iter().map(|n| n.d_id).collect()
    }
}

/// Thread-safe vector index with ID mapping and metadata filtering.
pub struct VectorIndex {
    storage: RwLock<Storage>,
    graph: RwLock<Graph>,
    dimensions: usize,
    metric: DistanceMetric,
    config: HnswConfig,
    exact_search_threshold: usize,
    exact_filter_threshold: usize,
}

impl VectorIndex {
    /// Create a new index.
    pub fn new(
        dimensions: usize,
        metric: DistanceMetric,
        config: HnswConfig,
        exact_search_threshold: usize,
        exact_filter_threshold: usize,
    ) -> Result<Self> {
        if dimensions == 0 {
            return Err(Error::InvalidVector("Dimensions must be > 0".to_string()));
        }

        Ok(Self {
            storage: RwLock::new(Storage::default()),
            graph: RwLock::new(Graph::new(metric, &config)),
            dimensions,
            metric,
            config,
            exact_search_threshold,
            exact_filter_threshold,
        })
    }

    /// Get the vector dimensions.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Get the distance metric.
    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Get the number of live vectors in the index.
    pub fn len(&self) -> usize {
        self.storage.read().entries.len()
    }

    /// Check if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn validate(&self, id: &str, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(Error::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidVector(format!(
                "Vector '{}' contains NaN or Inf",
                id
            )));
        }
        if self.metric == DistanceMetric::Cosine && norm_squared(vector) == 0.0 {
            return Err(Error::InvalidVector(format!(
                "Vector '{}' has zero norm",
                id
            )));
        }
        Ok(())
    }

    /// Store an entry and return its internal id.
    ///
    /// Re-inserting an existing id retires the old entry and moves the id
    /// to the end of the insertion order. The retired graph node stays in
    /// the graph but no longer resolves to an entry.
    fn store(&self, id: &str, vector: &[f32], metadata: Option<VectorMetadata>) -> usize {
        let mut storage = self.storage.write();
        if let Some(old) = storage.ids.remove(id) {
            if let Some(retired) = storage.entries.remove(&old) {
                storage.unindex_metadata(old, retired.metadata.as_ref());
            }
        }
        let internal_id = storage.next_internal_id;
        storage.next_internal_id += 1;
        storage.ids.insert(id.to_string(), internal_id);
        storage.index_metadata(internal_id, metadata.as_ref());
        storage.entries.insert(
            internal_id,
            Entry {
                id: id.to_string(),
                vector: vector.to_vec(),
                metadata,
            },
        );
        internal_id
    }

    /// Insert a vector into the index.
    pub fn insert(&self, id: &str, vector: &[f32], meta: Option<VectorMetadata>) -> Result<()> {
        self.validate(id, vector)?;
        let internal_id = self.store(id, vector, meta);
        self.graph.read().insert(vector, internal_id);
        trace!(id, internal_id, "Inserted vector");
        Ok(())
    }

    /// Insert multiple vectors in batch.
    ///
    /// The whole batch is validated before anything is stored.
    pub fn insert_batch<'a, I>(&self, vectors: I) -> Result<usize>
    where
        I: IntoIterator<Item = (&'a str, &'a [f32], Option<VectorMetadata>)>,
    {
        let items: Vec<_> = vectors.into_iter().collect();
        for (id, vector, _) in &items {
            self.validate(id, vector)?;
        }

        let mut batch_data: Vec<(Vec<f32>, usize)> = Vec::with_capacity(items.len());
        for (id, vector, meta) in items {
            let internal_id = self.store(id, vector, meta);
            batch_data.push((vector.to_vec(), internal_id));
        }

        let count = batch_data.len();
        if count > 0 {
            let graph = self.graph.read();
            if self.config.parallel_construction {
                let refs: Vec<(&Vec<f32>, usize)> =
                    batch_data.iter().map(|(v, id)| (v, *id)).collect();
                graph.parallel_insert(&refs);
            } else {
                for (v, id) in &batch_data {
                    graph.insert(v, *id);
                }
            }
        }

        debug!(count, "Batch inserted vectors");
        Ok(count)
    }

    /// Search for the `limit` most similar vectors passing `filter`.
    ///
    /// Results are ordered by score descending, ties by insertion order.
    /// Returning fewer than `limit` results is not an error.
    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>> {
        if query.len() != self.dimensions {
            return Err(Error::DimensionMismatch {
                expected: self.dimensions,
                actual: query.len(),
            });
        }

        let total = self.len();
        if limit == 0 || total == 0 {
            return Ok(Vec::new());
        }

        if total <= self.exact_search_threshold {
            return Ok(self.exact_scan(query, limit, filter));
        }

        let Some(filter) = filter else {
            let ef = self.config.ef_search.max(limit);
            let candidates = self.graph.read().candidates(query, limit, ef, None);
            let results = {
                let storage = self.storage.read();
                self.rank(&storage, query, candidates.into_iter(), None, limit)
            };
            // Retired graph nodes can leave the result short.
            if results.len() < limit.min(total) {
                trace!(got = results.len(), limit, "Graph search under-filled, using exact scan");
                return Ok(self.exact_scan(query, limit, None));
            }
            return Ok(results);
        };

        let allowed = self.storage.read().matching(filter);
        if allowed.len() <= self.exact_filter_threshold {
            trace!(matching = allowed.len(), "Ranking filtered set exactly");
            let storage = self.storage.read();
            return Ok(self.rank(&storage, query, allowed.into_iter(), Some(filter), limit));
        }

        let want = limit.min(allowed.len());
        let ef = self.config.ef_search.max(want);
        let candidates = self
            .graph
            .read()
            .candidates(query, want, ef, Some(&allowed as &dyn FilterT));
        let results = {
            let storage = self.storage.read();
            self.rank(&storage, query, candidates.into_iter(), Some(filter), limit)
        };

        if results.len() < want {
            trace!(got = results.len(), want, "Filtered graph search under-filled, ranking matching set");
            let storage = self.storage.read();
            return Ok(self.rank(&storage, query, allowed.into_iter(), Some(filter), limit));
        }

        Ok(results)
    }

    fn exact_scan(&self, query: &[f32], limit: usize, filter: Option<&Filter>) -> Vec<SearchResult> {
        let storage = self.storage.read();
        let keys: Vec<usize> = storage.entries.keys().copied().collect();
        self.rank(&storage, query, keys.into_iter(), filter, limit)
    }

    fn rank(
        &self,
        storage: &Storage,
        query: &[f32],
        candidates: impl Iterator<Item = usize>,
        filter: Option<&Filter>,
        limit: usize,
    ) -> Vec<SearchResult> {
        let mut scored: Vec<(usize, f32)> = candidates
            .filter_map(|internal_id| {
                let entry = storage.entries.get(&internal_id)?;
                if let Some(f) = filter {
                    if !f.matches(entry.metadata.as_ref()) {
                        return None;
                    }
                }
                Some((internal_id, self.metric.score(query, &entry.vector)))
            })
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.dedup_by_key(|(internal_id, _)| *internal_id);
        scored.truncate(limit);

        scored
            .into_iter()
            .filter_map(|(internal_id, score)| {
                let entry = storage.entries.get(&internal_id)?;
                Some(SearchResult {
                    id: entry.id.clone(),
                    score,
                    metadata: entry.metadata.clone(),
                })
            })
            .collect()
    }

    /// Export all live vectors in insertion order.
    pub fn export_all(&self) -> Vec<StoredVector> {
        self.storage
            .read()
            .entries
            .values()
            .map(|e| StoredVector {
                id: e.id.clone(),
                vector: e.vector.clone(),
                metadata: e.metadata.clone(),
            })
            .collect()
    }

    /// Estimate memory usage in bytes.
    pub fn memory_usage(&self) -> usize {
        let storage = self.storage.read();
        let vector_bytes: usize = storage.entries.values().map(|e| e.vector.len() * 4).sum();
        let id_bytes: usize = storage.ids.keys().map(|s| s.len() * 2).sum();
        let meta_bytes = storage
            .entries
            .values()
            .filter(|e| e.metadata.is_some())
            .count()
            * 100;
        // HNSW graph (rough: M links of 4 bytes per layer-0 node)
        let graph_bytes = storage.next_internal_id * self.config.m * 4 * 2;

        vector_bytes + id_bytes + meta_bytes + graph_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    fn exact_index() -> VectorIndex {
        VectorIndex::new(3, DistanceMetric::Cosine, HnswConfig::default(), 4096, 1024).unwrap()
    }

    fn sheet(name: &str) -> Option<VectorMetadata> {
        Some(VectorMetadata::from_pairs([("sheet_id", name)]))
    }

    #[test]
    fn test_insert_and_search() {
        let index = exact_index();

        index.insert("vec1", &[1.0, 0.0, 0.0], None).unwrap();
        index.insert("vec2", &[0.0, 1.0, 0.0], None).unwrap();
        index.insert("vec3", &[0.9, 0.1, 0.0], None).unwrap();

        assert_eq!(index.len(), 3);

        let results = index.search(&[1.0, 0.0, 0.0], 2, None).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "vec1");
        assert_eq!(results[1].id, "vec3");
        assert!(results[0].score >= results[1].score);
    }

    #[test]
    fn test_dimension_mismatch() {
        let index = exact_index();

        let result = index.insert("vec1", &[1.0, 0.0], None);
        assert!(matches!(result, Err(Error::DimensionMismatch { .. })));
        assert!(matches!(
            index.search(&[1.0], 1, None),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_zero_and_nan_vectors() {
        let index = exact_index();
        assert!(matches!(
            index.insert("z", &[0.0, 0.0, 0.0], None),
            Err(Error::InvalidVector(_))
        ));
        assert!(matches!(
            index.insert("n", &[f32::NAN, 0.0, 1.0], None),
            Err(Error::InvalidVector(_))
        ));
    }

    #[test]
    fn test_batch_is_validated_up_front() {
        let index = exact_index();
        let good = [1.0, 0.0, 0.0];
        let bad = [1.0, 0.0];
        let result = index.insert_batch(vec![
            ("a", &good[..], None),
            ("b", &bad[..], None),
        ]);
        assert!(result.is_err());
        assert!(index.is_empty());
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let index = exact_index();
        for id in ["first", "second", "third"] {
            index.insert(id, &[0.0, 1.0, 0.0], None).unwrap();
        }

        let ids: Vec<_> = index
            .search(&[0.0, 1.0, 0.0], 3, None)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_reinsert_moves_to_end() {
        let index = exact_index();
        index.insert("a", &[0.0, 1.0, 0.0], None).unwrap();
        index.insert("b", &[0.0, 1.0, 0.0], None).unwrap();
        index.insert("a", &[0.0, 1.0, 0.0], None).unwrap();

        assert_eq!(index.len(), 2);
        let ids: Vec<_> = index
            .search(&[0.0, 1.0, 0.0], 5, None)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_filtered_search() {
        let index = exact_index();
        index.insert("p1", &[1.0, 0.0, 0.0], sheet("Pricing")).unwrap();
        index.insert("i1", &[0.9, 0.1, 0.0], sheet("Inventory")).unwrap();
        index.insert("x1", &[1.0, 0.0, 0.0], sheet("Other")).unwrap();
        index.insert("bare", &[1.0, 0.0, 0.0], None).unwrap();

        let filter = Filter::any_of("sheet_id", ["Pricing", "Inventory"]);
        let results = index.search(&[1.0, 0.0, 0.0], 10, Some(&filter)).unwrap();

        let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "i1"]);
    }

    #[test]
    fn test_reinsert_moves_posting() {
        let index = exact_index();
        index.insert("r1", &[1.0, 0.0, 0.0], sheet("Pricing")).unwrap();
        index.insert("r1", &[1.0, 0.0, 0.0], sheet("Inventory")).unwrap();

        let pricing = index
            .search(&[1.0, 0.0, 0.0], 5, Some(&Filter::eq("sheet_id", "Pricing")))
            .unwrap();
        assert!(pricing.is_empty());
        let inventory = index
            .search(&[1.0, 0.0, 0.0], 5, Some(&Filter::eq("sheet_id", "Inventory")))
            .unwrap();
        assert_eq!(inventory.len(), 1);
    }

    #[test]
    fn test_non_string_filter_falls_back_to_metadata_check() {
        let index = exact_index();
        let mut tagged = VectorMetadata::from_pairs([("sheet_id", "Pricing")]);
        tagged.insert("row", 2i64);
        index.insert("r2", &[1.0, 0.0, 0.0], Some(tagged)).unwrap();
        index.insert("r3", &[1.0, 0.0, 0.0], sheet("Pricing")).unwrap();

        let filter = Filter::And(vec![Filter::eq("sheet_id", "Pricing"), Filter::eq("row", 2i64)]);
        let storage = index.storage.read();
        assert_eq!(storage.matching(&filter), vec![0]);
        assert_eq!(storage.matching(&Filter::eq("row", 2i64)), vec![0]);
        assert!(storage.matching(&Filter::eq("sheet_id", "Missing")).is_empty());
    }

    #[test]
    fn test_small_sheet_in_large_collection_is_ranked_exactly() {
        let dims = 8;
        let index =
            VectorIndex::new(dims, DistanceMetric::Cosine, HnswConfig::default(), 0, 16).unwrap();
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);

        let vectors: Vec<Vec<f32>> = (0..500)
            .map(|_| (0..dims).map(|_| rng.random::<f32>() + 0.01).collect())
            .collect();
        let ids: Vec<String> = (0..vectors.len()).map(|i| format!("r{i}")).collect();
        let batch: Vec<_> = ids
            .iter()
            .zip(vectors.iter())
            .enumerate()
            .map(|(i, (id, v))| {
                let group = if i % 100 == 7 { "Inventory" } else { "Pricing" };
                (id.as_str(), v.as_slice(), sheet(group))
            })
            .collect();
        index.insert_batch(batch).unwrap();

        let filter = Filter::eq("sheet_id", "Inventory");
        assert_eq!(index.storage.read().matching(&filter).len(), 5);

        // Asking for more than the sheet holds returns the whole sheet, best first.
        let results = index.search(&vectors[207], 10, Some(&filter)).unwrap();
        assert_eq!(results.len(), 5);
        assert_eq!(results[0].id, "r207");
        assert!(results.iter().all(|r| r.id.ends_with('7')));
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_export_keeps_insertion_order() {
        let index = exact_index();
        index.insert("b", &[1.0, 2.0, 3.0], sheet("S")).unwrap();
        index.insert("a", &[3.0, 2.0, 1.0], None).unwrap();

        let exported = index.export_all();
        assert_eq!(exported[0].vector, vec![1.0, 2.0, 3.0]);
        assert!(exported[0].metadata.is_some());

        let ids: Vec<_> = exported.into_iter().map(|v| v.id).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_graph_path_matches_self() {
        let dims = 16;
        let index =
            VectorIndex::new(dims, DistanceMetric::Cosine, HnswConfig::default(), 0, 0).unwrap();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);

        let vectors: Vec<Vec<f32>> = (0..300)
            .map(|_| (0..dims).map(|_| rng.random::<f32>() + 0.01).collect())
            .collect();
        let ids: Vec<String> = (0..vectors.len()).map(|i| format!("v{i}")).collect();
        let batch: Vec<_> = ids
            .iter()
            .zip(vectors.iter())
            .map(|(id, v)| {
                let group = if id.ends_with('0') { "even" } else { "odd" };
                (id.as_str(), v.as_slice(), sheet(group))
            })
            .collect();
        index.insert_batch(batch).unwrap();

        let results = index.search(&vectors[42], 5, None).unwrap();
        assert_eq!(results.len(), 5);
        assert_eq!(results[0].id, "v42");
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));

        // Selective filter: the graph walk only visits the matching set.
        let filter = Filter::eq("sheet_id", "even");
        let filtered = index.search(&vectors[42], 30, Some(&filter)).unwrap();
        assert_eq!(filtered.len(), 30);
        assert!(filtered.iter().all(|r| r.id.ends_with('0')));
    }
}
