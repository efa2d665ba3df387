//! Embedding Cache
//!
//! Caches embeddings so repeated text (frequent queries, identical cells
//! across rebuilds) skips the provider.
//!
//! # Cache Key Strategy
//!
//! Cache keys are SHA-256 hashes of `text | model_id`, so embeddings from
//! different models never mix.
//!
//! # Example
//!
//! ```ignore
//! let cached = CachedEmbedder::new(embedder, CacheConfig::default());
//! let v = cached.embed("cost and stock for product xyz").await?;
//! let stats = cached.stats();
//! ```

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::embeddings::Embedder;
use crate::types::{AppError, Result};

// ============================================================================
// Cache Types
// ============================================================================

/// Statistics for cache performance monitoring
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entry_count: usize,
}

impl CacheStats {
    /// Calculate hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Configuration for the embedding cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached vectors (default: 10_000)
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Whether the cache is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_max_entries() -> usize {
    10_000
}

fn default_enabled() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            enabled: default_enabled(),
        }
    }
}

/// Compute a cache key for the given text and model
pub fn compute_key(text: &str, model: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update(b"|");
    hasher.update(model.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// Cached Embedder
// ============================================================================

/// LRU-caching wrapper around any [`Embedder`].
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Option<Mutex<LruCache<String, Vec<f32>>>>,
    model_id: String,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, config: CacheConfig) -> Self {
        let cache = if config.enabled {
            NonZeroUsize::new(config.max_entries).map(|cap| Mutex::new(LruCache::new(cap)))
        } else {
            None
        };
        let model_id = inner.model_id();
        Self {
            inner,
            cache,
            model_id,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.cache.as_ref().map(|c| c.lock().len()).unwrap_or(0),
        }
    }

    pub fn clear(&self) {
        if let Some(cache) = &self.cache {
            cache.lock().clear();
        }
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    fn model_id(&self) -> String {
        self.model_id.clone()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let Some(cache) = &self.cache else {
            return self.inner.embed_batch(texts).await;
        };

        let keys: Vec<String> = texts.iter().map(|t| compute_key(t, &self.model_id)).collect();
        let mut out: Vec<Option<Vec<f32>>> = {
            let mut guard = cache.lock();
            keys.iter().map(|k| guard.get(k).cloned()).collect()
        };

        let missing: Vec<usize> = (0..texts.len()).filter(|&i| out[i].is_none()).collect();
        self.hits
            .fetch_add((texts.len() - missing.len()) as u64, Ordering::Relaxed);
        self.misses.fetch_add(missing.len() as u64, Ordering::Relaxed);

        if !missing.is_empty() {
            let batch: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let computed = self.inner.embed_batch(&batch).await?;
            if computed.len() != batch.len() {
                return Err(AppError::Embedding(format!(
                    "provider returned {} embeddings for {} inputs",
                    computed.len(),
                    batch.len()
                )));
            }

            let mut guard = cache.lock();
            for (i, vector) in missing.into_iter().zip(computed) {
                guard.put(keys[i].clone(), vector.clone());
                out[i] = Some(vector);
            }
        }

        Ok(out.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn model_id(&self) -> String {
            "counting".into()
        }

        fn dimensions(&self) -> usize {
            2
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    fn counting() -> Arc<CountingEmbedder> {
        Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        })
    }

    #[test]
    fn test_key_depends_on_model() {
        assert_ne!(compute_key("hello", "a"), compute_key("hello", "b"));
        assert_eq!(compute_key("hello", "a"), compute_key("hello", "a"));
    }

    #[tokio::test]
    async fn test_cache_hits_skip_provider() {
        let inner = counting();
        let cached = CachedEmbedder::new(inner.clone(), CacheConfig::default());

        let first = cached
            .embed_batch(&["ab".to_string(), "abc".to_string()])
            .await
            .unwrap();
        let second = cached
            .embed_batch(&["abc".to_string(), "abcd".to_string()])
            .await
            .unwrap();

        assert_eq!(first[1], second[0]);
        assert_eq!(second[1], vec![4.0, 1.0]);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);

        let stats = cached.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 3);
        assert_eq!(stats.entry_count, 3);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let inner = counting();
        let cached = CachedEmbedder::new(
            inner.clone(),
            CacheConfig {
                max_entries: 1,
                enabled: true,
            },
        );

        cached.embed("a").await.unwrap();
        cached.embed("bb").await.unwrap();
        cached.embed("a").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_disabled_cache_passes_through() {
        let inner = counting();
        let cached = CachedEmbedder::new(
            inner.clone(),
            CacheConfig {
                max_entries: 10,
                enabled: false,
            },
        );
        cached.embed("a").await.unwrap();
        cached.embed("a").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cached.stats().entry_count, 0);
    }
}
