//! Shared test helpers.

#![allow(dead_code)]

pub mod mocks;

use sheetrag::db::{InMemoryVectorStore, VectorStore};
use sheetrag::ingest::Workbook;
use sheetrag::rag::embeddings::Embedder;
use sheetrag::rag::{KnowledgeBase, KnowledgeBaseConfig};
use std::sync::Arc;

pub const QUESTION: &str = "cost and stock for product xyz";

/// Products / Pricing / Inventory, every sheet keyed by ProductID.
pub fn product_workbook() -> Workbook {
    Workbook::new()
        .sheet(
            "Products",
            &["ProductID", "Name"],
            &[&["P-1", "product xyz"], &["P-2", "product abc"]],
        )
        .sheet(
            "Pricing",
            &["ProductID", "Description"],
            &[
                &["P-2", "product abc costs $4"],
                &["P-1", "product xyz costs $10"],
                &["P-3", "product qrs costs $7"],
            ],
        )
        .sheet(
            "Inventory",
            &["ProductID", "Stock"],
            &[&["P-1", "40"], &["P-2", "0"]],
        )
}

pub fn memory_store() -> Arc<dyn VectorStore> {
    Arc::new(InMemoryVectorStore::new())
}

/// A built knowledge base over `workbook` using the keyword embedder.
pub async fn built_kb(workbook: &Workbook) -> KnowledgeBase {
    let embedder: Arc<dyn Embedder> = Arc::new(mocks::KeywordEmbedder::products());
    let kb = KnowledgeBase::new(memory_store(), embedder, KnowledgeBaseConfig::default());
    kb.rebuild(workbook).await.unwrap();
    kb
}
