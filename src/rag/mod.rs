//! Dual-index retrieval over tabular data
//!
//! Two vector indexes are queried in sequence: a structure index of sheet
//! descriptors picks the relevant sheets, then a content index of rows is
//! searched inside those sheets only.
//!
//! # Module Structure
//!
//! - [`embeddings`] - the [`Embedder`](embeddings::Embedder) trait and its providers
//! - [`cache`] - LRU embedding cache
//! - [`structure`] - sheet-level index
//! - [`content`] - row-level index with sheet filters
//! - [`knowledge`] - both indexes as one versioned, swappable snapshot
//! - [`query`] - standard two-stage orchestration
//! - [`cross_sheet`] - per-sheet balanced retrieval with entity boosting
//! - [`context`] - budgeted context assembly
//! - [`answer`] - query engine tying retrieval to generation
//!
//! # Pipeline
//!
//! 1. **Ingestion** - sheets become descriptor and row texts
//! 2. **Build** - both indexes are embedded into a fresh generation
//! 3. **Swap** - the generation is published atomically
//! 4. **Retrieval** - sheets first, then rows within them
//! 5. **Generation** - an LLM answers from the assembled context
//!
//! # Example
//!
//! ```ignore
//! use sheetrag::rag::{answer::{QueryEngine, QueryRequest}, knowledge::KnowledgeBase};
//!
//! let kb = Arc::new(KnowledgeBase::new(store, embedder, Default::default()));
//! kb.rebuild(&CsvSource::open("./workbook", Default::default())?).await?;
//!
//! let engine = QueryEngine::new(kb, BackendSelector::mock_only(), Default::default());
//! let response = engine
//!     .ask(&QueryRequest::new("cost and stock for product xyz").entity("product xyz"))
//!     .await?;
//! ```

pub mod answer;
pub mod cache;
pub mod content;
pub mod context;
pub mod cross_sheet;
pub mod embeddings;
pub mod generation;
pub mod knowledge;
pub mod query;
pub mod structure;

pub use answer::{Answer, QueryEngine, QueryRequest, QueryResponse, Retrieval};
pub use content::{ContentIndex, SheetHits};
pub use context::{Context, ContextBudget};
pub use knowledge::{BuildReport, IndexSnapshot, KnowledgeBase, KnowledgeBaseConfig};
pub use query::RetrievalSettings;
pub use structure::StructureIndex;
