//! Configuration for sheetrag-vector.

use std::path::PathBuf;

/// Configuration for the vector database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to store data on disk. If None, data is kept in memory only.
    pub data_path: Option<PathBuf>,

    /// HNSW index configuration.
    pub hnsw_config: HnswConfig,

    /// Collections at or below this size are searched by exact scan.
    ///
    /// Exact scans give fully deterministic rankings; the HNSW graph only
    /// pays off once collections grow. Default: 4096.
    pub exact_search_threshold: usize,

    /// A filtered search whose matching set is at most this size is ranked
    /// exactly over that set instead of walking the graph. Default: 1024.
    pub exact_filter_threshold: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_path: None,
            hnsw_config: HnswConfig::default(),
            exact_search_threshold: 4096,
            exact_filter_threshold: 1024,
        }
    }
}

impl Config {
    /// Create an in-memory configuration.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Create a persistent configuration.
    ///
    /// Data will be stored at the specified path and loaded on open.
    pub fn persistent<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            data_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Set the HNSW configuration.
    pub fn with_hnsw_config(mut self, config: HnswConfig) -> Self {
        self.hnsw_config = config;
        self
    }

    /// Set the exact-scan threshold.
    pub fn with_exact_search_threshold(mut self, threshold: usize) -> Self {
        self.exact_search_threshold = threshold;
        self
    }

    /// Set the matching-set size below which filtered searches are exact.
    pub fn with_exact_filter_threshold(mut self, threshold: usize) -> Self {
        self.exact_filter_threshold = threshold;
        self
    }
}

/// HNSW index configuration.
///
/// These parameters control the trade-off between search accuracy,
/// speed, and memory usage.
#[derive(Debug, Clone)]
pub struct HnswConfig {
    /// Maximum number of connections per element per layer.
    ///
    /// Typical values: 12-48. Default: 16.
    pub m: usize,

    /// Size of the dynamic candidate list during construction.
    ///
    /// Typical values: 100-500. Default: 200.
    pub ef_construction: usize,

    /// Size of the dynamic candidate list during search.
    ///
    /// Raised to the requested candidate count when smaller. Default: 100.
    pub ef_search: usize,

    /// Initial element capacity hint for the graph.
    pub capacity: usize,

    /// Enable parallel insertion for batches.
    pub parallel_construction: bool,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 100,
            capacity: 100_000,
            parallel_construction: true,
        }
    }
}

impl HnswConfig {
    /// Create a configuration optimized for speed.
    pub fn fast() -> Self {
        Self {
            m: 8,
            ef_construction: 100,
            ef_search: 50,
            ..Self::default()
        }
    }

    /// Create a configuration optimized for accuracy.
    pub fn accurate() -> Self {
        Self {
            m: 32,
            ef_construction: 400,
            ef_search: 200,
            ..Self::default()
        }
    }

    /// Set the ef_search parameter.
    pub fn with_ef_search(mut self, ef: usize) -> Self {
        self.ef_search = ef;
        self
    }
}

impl std::str::FromStr for HnswConfig {
    type Err = String;

    /// Parse a preset name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "default" | "balanced" => Ok(Self::default()),
            "fast" => Ok(Self::fast()),
            "accurate" => Ok(Self::accurate()),
            _ => Err(format!("Unknown HNSW preset: {}", s)),
        }
    }
}
