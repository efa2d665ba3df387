//! Vector stores.
//!
//! - `embedded` (default) - HNSW vector database from `sheetrag-vector`,
//!   optionally persisted to disk
//! - `in-memory` - exact scan, for tests and tiny workbooks

pub mod embedded;
pub mod vectorstore;

pub use embedded::EmbeddedVectorStore;
pub use vectorstore::{
    CollectionInfo, InMemoryVectorStore, StoreHit, VectorRecord, VectorStore,
    TEXT_FIELD,
};
