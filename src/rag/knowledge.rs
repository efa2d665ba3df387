//! Knowledge base: the structure and content indexes as one versioned unit.
//!
//! A rebuild stages both indexes in fresh collections named after the new
//! generation (`structure__g7`, `content__g7`), persists them, records a
//! manifest and only then swaps the combined snapshot in. Readers hold an
//! `Arc` to the snapshot they started with; collections of retired
//! snapshots are dropped once the last reader lets go.

use crate::db::VectorStore;
use crate::ingest::TabularSource;
use crate::rag::content::{ContentIndex, ContentStats, DEFAULT_ROW_BATCH_SIZE};
use crate::rag::embeddings::Embedder;
use crate::rag::generation::{Generation, GenerationHandle};
use crate::rag::structure::{StructureIndex, StructureStats};
use crate::types::{AppError, Result, RowRecord, SheetDescriptor};
use crate::utils::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const STRUCTURE_PREFIX: &str = "structure__g";
const CONTENT_PREFIX: &str = "content__g";
const MANIFEST_FILE: &str = "manifest.json";

/// Both indexes of one generation plus what is needed to query them.
pub struct IndexSnapshot {
    pub structure: StructureIndex,
    pub content: ContentIndex,
    embedder: Arc<dyn Embedder>,
    policy: RetryPolicy,
    generation: u64,
}

impl IndexSnapshot {
    pub fn new(
        structure: StructureIndex,
        content: ContentIndex,
        embedder: Arc<dyn Embedder>,
        policy: RetryPolicy,
        generation: u64,
    ) -> Self {
        Self {
            structure,
            content,
            embedder,
            policy,
            generation,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True when neither index holds anything.
    pub fn is_empty(&self) -> bool {
        self.structure.is_empty() && self.content.is_empty()
    }

    /// Embed a query once for use against both indexes.
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.policy
            .run("embed query", || self.embedder.embed(query))
            .await
    }
}

/// On-disk record of the active generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub generation: u64,
    pub built_at: DateTime<Utc>,
    pub structure_collection: String,
    pub content_collection: String,
    pub embedder_model: String,
    pub dimensions: usize,
    pub structure: StructureStats,
    pub content: ContentStats,
}

impl Manifest {
    pub async fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(MANIFEST_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                AppError::Configuration(format!("invalid manifest {}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Internal(format!(
                "failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Write through a temporary file and rename.
    pub async fn save(&self, dir: &Path) -> Result<()> {
        let io = |e: std::io::Error| AppError::Internal(format!("failed to write manifest: {}", e));
        tokio::fs::create_dir_all(dir).await.map_err(io)?;
        let data = serde_json::to_vec_pretty(self)
            .map_err(|e| AppError::Internal(format!("failed to encode manifest: {}", e)))?;
        let tmp = dir.join(format!("{}.tmp", MANIFEST_FILE));
        tokio::fs::write(&tmp, data).await.map_err(io)?;
        tokio::fs::rename(&tmp, dir.join(MANIFEST_FILE))
            .await
            .map_err(io)
    }
}

/// Build-time settings of a knowledge base.
#[derive(Debug, Clone)]
pub struct KnowledgeBaseConfig {
    /// Where the manifest lives; `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    pub row_batch_size: usize,
    pub policy: RetryPolicy,
}

impl Default for KnowledgeBaseConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            row_batch_size: DEFAULT_ROW_BATCH_SIZE,
            policy: RetryPolicy::default(),
        }
    }
}

/// Outcome of a successful rebuild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReport {
    pub generation: u64,
    pub built_at: DateTime<Utc>,
    pub sheets: usize,
    pub descriptors: usize,
    pub rows: usize,
}

/// Summary of the active generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeStats {
    pub generation: u64,
    pub built_at: Option<DateTime<Utc>>,
    pub embedder_model: String,
    pub dimensions: usize,
    pub structure_collection: Option<String>,
    pub content_collection: Option<String>,
    pub structure: StructureStats,
    pub content: ContentStats,
    pub retired: usize,
}

/// The pair of indexes behind a versioned handle.
pub struct KnowledgeBase {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    config: KnowledgeBaseConfig,
    handle: GenerationHandle<IndexSnapshot>,
}

impl KnowledgeBase {
    /// A knowledge base with no active generation.
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        config: KnowledgeBaseConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
            handle: GenerationHandle::new(),
        }
    }

    /// Restore the generation recorded in the manifest, if any, and drop
    /// index collections it does not reference.
    ///
    /// A manifest written with a different embedder is a configuration error.
    #[instrument(skip(store, embedder, config))]
    pub async fn open(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        config: KnowledgeBaseConfig,
    ) -> Result<Self> {
        let kb = Self::new(store, embedder, config);
        let manifest = match &kb.config.data_dir {
            Some(dir) => Manifest::load(dir).await?,
            None => None,
        };

        let mut keep: Vec<String> = Vec::new();
        if let Some(m) = manifest {
            kb.check_embedder(&m)?;
            if kb.store.collection_exists(&m.structure_collection).await?
                && kb.store.collection_exists(&m.content_collection).await?
            {
                keep = vec![m.structure_collection.clone(), m.content_collection.clone()];
                let snapshot = kb.attach(&m);
                kb.handle.restore(m.generation, m.built_at, snapshot);
                info!(generation = m.generation, "Restored knowledge base");
            } else {
                warn!(
                    generation = m.generation,
                    "Manifest references missing collections; starting empty"
                );
            }
        }

        kb.drop_unreferenced(&keep).await?;
        Ok(kb)
    }

    fn check_embedder(&self, m: &Manifest) -> Result<()> {
        let model = self.embedder.model_id();
        let dims = self.embedder.dimensions();
        if m.embedder_model != model || m.dimensions != dims {
            return Err(AppError::Configuration(format!(
                "index was built with embedder '{}' ({} dims) but '{}' ({} dims) is configured; rebuild the index",
                m.embedder_model, m.dimensions, model, dims
            )));
        }
        Ok(())
    }

    fn attach(&self, m: &Manifest) -> IndexSnapshot {
        let structure = StructureIndex::attach(
            self.store.clone(),
            self.embedder.clone(),
            m.structure_collection.clone(),
            m.structure,
            self.config.policy,
        );
        let content = ContentIndex::attach(
            self.store.clone(),
            self.embedder.clone(),
            m.content_collection.clone(),
            m.content.clone(),
            self.config.policy,
        );
        IndexSnapshot::new(
            structure,
            content,
            self.embedder.clone(),
            self.config.policy,
            m.generation,
        )
    }

    async fn drop_unreferenced(&self, keep: &[String]) -> Result<()> {
        let mut dropped = 0;
        for info in self.store.list_collections().await? {
            let ours = info.name.starts_with(STRUCTURE_PREFIX) || info.name.starts_with(CONTENT_PREFIX);
            if ours && !keep.contains(&info.name) {
                self.store.delete_collection(&info.name).await?;
                debug!(collection = %info.name, "Dropped stale collection");
                dropped += 1;
            }
        }
        if dropped > 0 {
            self.store.persist().await?;
            info!(dropped, "Dropped stale index collections");
        }
        Ok(())
    }

    /// Rebuild both indexes from `source` and publish them together.
    pub async fn rebuild(&self, source: &dyn TabularSource) -> Result<BuildReport> {
        let descriptors = source.descriptors()?;
        let rows = source.rows()?;
        self.rebuild_from(&descriptors, rows).await
    }

    /// Rebuild from explicit descriptors and a row stream.
    ///
    /// Nothing is published unless both indexes build, persist and the
    /// manifest is written; otherwise the staged collections are dropped
    /// and the previous generation stays active.
    #[instrument(skip(self, descriptors, rows), fields(descriptors = descriptors.len()))]
    pub async fn rebuild_from<I>(&self, descriptors: &[SheetDescriptor], rows: I) -> Result<BuildReport>
    where
        I: IntoIterator<Item = Result<RowRecord>>,
        I::IntoIter: Send,
    {
        let guard = self.handle.begin_build().await;
        let number = guard.number();
        let structure_name = format!("{}{}", STRUCTURE_PREFIX, number);
        let content_name = format!("{}{}", CONTENT_PREFIX, number);
        info!(generation = number, "Starting rebuild");

        let structure = StructureIndex::build(
            self.store.clone(),
            self.embedder.clone(),
            structure_name.clone(),
            descriptors,
            self.config.policy,
        )
        .await?;

        let content = match ContentIndex::build(
            self.store.clone(),
            self.embedder.clone(),
            content_name.clone(),
            rows,
            self.config.row_batch_size,
            self.config.policy,
        )
        .await
        {
            Ok(c) => c,
            Err(e) => {
                self.discard(&[structure_name.as_str()]).await;
                return Err(e);
            }
        };

        let built_at = Utc::now();
        let manifest = Manifest {
            generation: number,
            built_at,
            structure_collection: structure_name.clone(),
            content_collection: content_name.clone(),
            embedder_model: self.embedder.model_id(),
            dimensions: self.embedder.dimensions(),
            structure: structure.stats(),
            content: content.stats().clone(),
        };

        if let Err(e) = self.commit(&manifest).await {
            self.discard(&[structure_name.as_str(), content_name.as_str()])
                .await;
            return Err(AppError::IndexBuild(format!("failed to commit generation {}: {}", number, e)));
        }

        let report = BuildReport {
            generation: number,
            built_at,
            sheets: manifest.structure.sheets,
            descriptors: manifest.structure.descriptors,
            rows: manifest.content.rows,
        };
        let snapshot = IndexSnapshot::new(
            structure,
            content,
            self.embedder.clone(),
            self.config.policy,
            number,
        );
        self.handle.publish(guard, built_at, snapshot);

        self.reclaim().await;
        Ok(report)
    }

    async fn commit(&self, manifest: &Manifest) -> Result<()> {
        self.store.persist().await?;
        if let Some(dir) = &self.config.data_dir {
            manifest.save(dir).await?;
        }
        Ok(())
    }

    async fn discard(&self, collections: &[&str]) {
        for name in collections {
            if let Err(e) = self.store.delete_collection(name).await {
                warn!(collection = %name, error = %e, "Failed to drop staged collection");
            }
        }
    }

    /// Drop collections of retired generations no reader still holds.
    ///
    /// Returns the number of generations reclaimed.
    pub async fn reclaim(&self) -> usize {
        let freed = self.handle.take_reclaimable();
        for generation in &freed {
            let snapshot = &generation.value;
            self.discard(&[snapshot.structure.collection(), snapshot.content.collection()])
                .await;
            debug!(generation = generation.number, "Reclaimed generation");
        }
        if !freed.is_empty() {
            if let Err(e) = self.store.persist().await {
                warn!(error = %e, "Failed to persist after reclaiming generations");
            }
        }
        freed.len()
    }

    /// The active generation, if one has been built.
    pub fn snapshot(&self) -> Option<Arc<Generation<IndexSnapshot>>> {
        self.handle.current()
    }

    /// The active generation, or [`AppError::EmptyIndex`].
    pub fn require_snapshot(&self) -> Result<Arc<Generation<IndexSnapshot>>> {
        self.snapshot().ok_or(AppError::EmptyIndex)
    }

    pub fn generation(&self) -> u64 {
        self.handle.generation()
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn stats(&self) -> KnowledgeStats {
        let current = self.snapshot();
        KnowledgeStats {
            generation: current.as_ref().map(|g| g.number).unwrap_or(0),
            built_at: current.as_ref().map(|g| g.built_at),
            embedder_model: self.embedder.model_id(),
            dimensions: self.embedder.dimensions(),
            structure_collection: current
                .as_ref()
                .map(|g| g.value.structure.collection().to_string()),
            content_collection: current
                .as_ref()
                .map(|g| g.value.content.collection().to_string()),
            structure: current
                .as_ref()
                .map(|g| g.value.structure.stats())
                .unwrap_or_default(),
            content: current
                .as_ref()
                .map(|g| g.value.content.stats().clone())
                .unwrap_or_default(),
            retired: self.handle.retired_count(),
        }
    }
}
