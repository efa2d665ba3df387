//! Knowledge base generations: persistence, reopen and atomic swaps

mod common;

use common::mocks::{FailingEmbedder, KeywordEmbedder};
use common::{memory_store, product_workbook, QUESTION};
use sheetrag::db::{EmbeddedVectorStore, VectorStore};
use sheetrag::ingest::{CsvSource, IngestSettings, Workbook};
use sheetrag::rag::cross_sheet::cross_sheet_query;
use sheetrag::rag::embeddings::Embedder;
use sheetrag::rag::knowledge::Manifest;
use sheetrag::rag::{KnowledgeBase, KnowledgeBaseConfig, RetrievalSettings};
use sheetrag::types::AppError;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

async fn embedded_store(dir: &Path) -> Arc<dyn VectorStore> {
    let path = dir.join("vectors").to_string_lossy().into_owned();
    Arc::new(EmbeddedVectorStore::new(Some(path)).await.unwrap())
}

fn persistent_config(dir: &Path) -> KnowledgeBaseConfig {
    KnowledgeBaseConfig {
        data_dir: Some(dir.to_path_buf()),
        ..KnowledgeBaseConfig::default()
    }
}

fn keyword() -> Arc<dyn Embedder> {
    Arc::new(KeywordEmbedder::products())
}

async fn ranked_ids(kb: &KnowledgeBase) -> Vec<String> {
    let snapshot = kb.require_snapshot().unwrap();
    cross_sheet_query(&snapshot.value, QUESTION, Some("xyz"), &RetrievalSettings::default())
        .await
        .unwrap()
        .ranked
        .iter()
        .map(|h| format!("{}/{}", h.sheet_id, h.matched_id))
        .collect()
}

#[tokio::test]
async fn test_generation_survives_reopen() {
    let dir = TempDir::new().unwrap();

    let before = {
        let kb = KnowledgeBase::open(
            embedded_store(dir.path()).await,
            keyword(),
            persistent_config(dir.path()),
        )
        .await
        .unwrap();
        assert_eq!(kb.generation(), 0);
        kb.rebuild(&product_workbook()).await.unwrap();
        ranked_ids(&kb).await
    };

    let manifest = Manifest::load(dir.path()).await.unwrap().expect("manifest written");
    assert_eq!(manifest.generation, 1);
    assert_eq!(manifest.structure_collection, "structure__g1");
    assert_eq!(manifest.content_collection, "content__g1");
    assert_eq!(manifest.content.rows, 7);

    let reopened = KnowledgeBase::open(
        embedded_store(dir.path()).await,
        keyword(),
        persistent_config(dir.path()),
    )
    .await
    .unwrap();
    assert_eq!(reopened.generation(), 1);
    assert_eq!(reopened.stats().structure.sheets, 3);
    assert_eq!(ranked_ids(&reopened).await, before);

    let report = reopened.rebuild(&product_workbook()).await.unwrap();
    assert_eq!(report.generation, 2);
}

#[tokio::test]
async fn test_reopen_with_different_embedder_is_configuration_error() {
    let dir = TempDir::new().unwrap();
    {
        let kb = KnowledgeBase::open(
            embedded_store(dir.path()).await,
            keyword(),
            persistent_config(dir.path()),
        )
        .await
        .unwrap();
        kb.rebuild(&product_workbook()).await.unwrap();
    }

    let other: Arc<dyn Embedder> = Arc::new(KeywordEmbedder::new(&[&["cost"], &["stock"]]));
    let result = KnowledgeBase::open(
        embedded_store(dir.path()).await,
        other,
        persistent_config(dir.path()),
    )
    .await;
    assert!(matches!(result, Err(AppError::Configuration(_))));
}

#[tokio::test]
async fn test_failed_rebuild_keeps_previous_generation() {
    let store = memory_store();
    let embedder = Arc::new(FailingEmbedder::new(false));
    let kb = KnowledgeBase::new(store.clone(), embedder.clone(), KnowledgeBaseConfig::default());
    kb.rebuild(&product_workbook()).await.unwrap();
    let before = ranked_ids(&kb).await;

    embedder.set_failing(true);
    let bigger = product_workbook().sheet("Returns", &["ProductID", "Reason"], &[&["P-1", "broken"]]);
    let err = kb.rebuild(&bigger).await.unwrap_err();
    assert!(matches!(err, AppError::IndexBuild(_)));

    embedder.set_failing(false);
    assert_eq!(kb.generation(), 1);
    assert_eq!(ranked_ids(&kb).await, before);

    let names: Vec<String> = store
        .list_collections()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names.len(), 2, "staged collections were dropped: {:?}", names);
    assert!(names.iter().all(|n| n.ends_with("g1")));
}

#[tokio::test]
async fn test_source_error_aborts_build() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("Pricing.csv"), "product,price\nxyz,10\n").unwrap();
    let source = CsvSource::open(dir.path(), IngestSettings::default()).unwrap();
    std::fs::remove_file(dir.path().join("Pricing.csv")).unwrap();

    let kb = KnowledgeBase::new(memory_store(), keyword(), KnowledgeBaseConfig::default());
    let err = kb.rebuild(&source).await.unwrap_err();
    assert!(matches!(err, AppError::Source(_) | AppError::IndexBuild(_)));
    assert!(kb.snapshot().is_none());
}

#[tokio::test]
async fn test_pinned_reader_keeps_old_generation_until_released() {
    let store = memory_store();
    let kb = KnowledgeBase::new(store.clone(), keyword(), KnowledgeBaseConfig::default());
    kb.rebuild(&product_workbook()).await.unwrap();

    let pinned = kb.require_snapshot().unwrap();
    let smaller = Workbook::new().sheet("Pricing", &["ProductID", "Description"], &[&["P-9", "product zzz"]]);
    kb.rebuild(&smaller).await.unwrap();

    assert_eq!(kb.generation(), 2);
    assert_eq!(pinned.number, 1);
    assert_eq!(pinned.value.content.stats().rows, 7);
    assert!(pinned
        .value
        .content
        .search(QUESTION, 3, None)
        .await
        .unwrap()
        .iter()
        .any(|h| h.text.contains("xyz")));
    assert_eq!(kb.stats().retired, 1);

    drop(pinned);
    assert_eq!(kb.reclaim().await, 1);
    assert_eq!(kb.stats().retired, 0);
    assert_eq!(store.list_collections().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_open_drops_unreferenced_collections() {
    let dir = TempDir::new().unwrap();
    {
        let store = embedded_store(dir.path()).await;
        let kb = KnowledgeBase::open(store.clone(), keyword(), persistent_config(dir.path()))
            .await
            .unwrap();
        kb.rebuild(&product_workbook()).await.unwrap();
        store.create_collection("content__g7", 5).await.unwrap();
        store.create_collection("unrelated", 5).await.unwrap();
        store.persist().await.unwrap();
    }

    let store = embedded_store(dir.path()).await;
    let kb = KnowledgeBase::open(store.clone(), keyword(), persistent_config(dir.path()))
        .await
        .unwrap();
    assert_eq!(kb.generation(), 1);

    let mut names: Vec<String> = store
        .list_collections()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["content__g1", "structure__g1", "unrelated"]);
}

#[tokio::test]
async fn test_concurrent_queries_during_rebuild() {
    let kb = Arc::new(KnowledgeBase::new(memory_store(), keyword(), KnowledgeBaseConfig::default()));
    kb.rebuild(&product_workbook()).await.unwrap();

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let kb = kb.clone();
            tokio::spawn(async move {
                let snapshot = kb.require_snapshot().unwrap();
                let hits = snapshot.value.content.search(QUESTION, 5, None).await.unwrap();
                (snapshot.number, hits.len())
            })
        })
        .collect();
    kb.rebuild(&product_workbook()).await.unwrap();

    for reader in readers {
        let (generation, hits) = reader.await.unwrap();
        assert!(generation == 1 || generation == 2);
        assert_eq!(hits, 5);
    }
    assert_eq!(kb.generation(), 2);
}
