//! The `test` subcommand: a fixed validation run on a synthetic workbook.
//!
//! Uses the hashing embedder, the in-memory store and the mock backend, so
//! it needs no network and no configuration.

use crate::cli::output::Output;
use crate::db::{InMemoryVectorStore, VectorStore};
use crate::ingest::Workbook;
use crate::llm::BackendSelector;
use crate::rag::answer::{QueryEngine, QueryRequest, Retrieval};
use crate::rag::embeddings::{Embedder, HashingEmbedder};
use crate::rag::knowledge::{KnowledgeBase, KnowledgeBaseConfig};
use crate::rag::query::RetrievalSettings;
use crate::types::{AppError, QueryHit, Result};
use std::collections::BTreeSet;
use std::sync::Arc;

const QUESTION: &str = "cost and stock for product xyz";
const ENTITY: &str = "product xyz";

/// The synthetic Products / Pricing / Inventory workbook.
pub fn sample_workbook() -> Workbook {
    Workbook::new()
        .sheet(
            "Products",
            &["ProductID", "Name", "Category"],
            &[
                &["P-001", "product xyz", "widgets"],
                &["P-002", "product abc", "gadgets"],
                &["P-003", "product qrs", "widgets"],
            ],
        )
        .sheet(
            "Pricing",
            &["ProductID", "Description", "Cost"],
            &[
                &["P-002", "product abc costs $4", "4"],
                &["P-001", "product xyz costs $10", "10"],
                &["P-003", "product qrs costs $7", "7"],
            ],
        )
        .sheet(
            "Inventory",
            &["ProductID", "Warehouse", "Stock"],
            &[
                &["P-003", "north", "12"],
                &["P-001", "product xyz in south", "40"],
                &["P-002", "east", "0"],
            ],
        )
}

/// Outcome of one check.
#[derive(Debug, Clone)]
pub struct Check {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub checks: Vec<Check>,
}

impl ValidationReport {
    fn record(&mut self, name: &'static str, outcome: std::result::Result<(), String>) {
        let (passed, detail) = match outcome {
            Ok(()) => (true, String::new()),
            Err(detail) => (false, detail),
        };
        self.checks.push(Check {
            name,
            passed,
            detail,
        });
    }

    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> usize {
        self.checks.iter().filter(|c| !c.passed).count()
    }
}

fn ensure(cond: bool, detail: impl FnOnce() -> String) -> std::result::Result<(), String> {
    if cond {
        Ok(())
    } else {
        Err(detail())
    }
}

fn non_increasing(hits: &[QueryHit]) -> bool {
    hits.windows(2).all(|w| w[0].score >= w[1].score)
}

fn ids(hits: &[QueryHit]) -> Vec<String> {
    hits.iter()
        .map(|h| format!("{}/{}", h.sheet_id, h.matched_id))
        .collect()
}

/// Run every check, printing each result as it completes.
pub async fn run(output: &Output) -> Result<ValidationReport> {
    let mut report = ValidationReport::default();
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(256)?);
    let kb = Arc::new(KnowledgeBase::new(
        store,
        embedder,
        KnowledgeBaseConfig::default(),
    ));
    let settings = RetrievalSettings::default();
    let engine = QueryEngine::new(kb.clone(), BackendSelector::mock_only(), settings.clone());
    let workbook = sample_workbook();

    output.header("Validation");

    let empty = engine.ask(&QueryRequest::new(QUESTION)).await;
    report.record(
        "query before build reports an empty index",
        ensure(matches!(empty, Err(AppError::EmptyIndex)), || {
            format!("got {:?}", empty.as_ref().map(|r| r.generation))
        }),
    );

    let built = kb.rebuild(&workbook).await?;
    report.record(
        "build publishes generation 1 with three sheets",
        ensure(built.generation == 1 && built.sheets == 3 && built.rows == 9, || {
            format!(
                "generation {}, {} sheets, {} rows",
                built.generation, built.sheets, built.rows
            )
        }),
    );

    let snapshot = kb.require_snapshot()?;
    let sheets = snapshot.value.structure.search(QUESTION, 3).await?;
    let found: BTreeSet<&str> = sheets.iter().map(|h| h.sheet_id.as_str()).collect();
    report.record(
        "structure search returns Products, Pricing and Inventory",
        ensure(
            found == BTreeSet::from(["Inventory", "Pricing", "Products"]) && non_increasing(&sheets),
            || format!("got {:?}", found),
        ),
    );

    let standard = engine
        .ask(&QueryRequest::new(QUESTION).retrieval_only())
        .await?;
    report.record(
        "standard rows stay within the selected sheets",
        match &standard.retrieval {
            Retrieval::Standard(r) => {
                let allowed: BTreeSet<&str> = r.sheet_hits.iter().map(|h| h.sheet_id.as_str()).collect();
                ensure(
                    !r.content_hits.is_empty()
                        && r.content_hits.len() <= settings.k_content
                        && r.content_hits.iter().all(|h| allowed.contains(h.sheet_id.as_str()))
                        && non_increasing(&r.content_hits),
                    || format!("rows {:?}", ids(&r.content_hits)),
                )
            }
            other => Err(format!("unexpected mode {:?}", other)),
        },
    );

    let cross = engine
        .ask(&QueryRequest::new(QUESTION).entity(ENTITY).retrieval_only())
        .await?;
    report.record(
        "entity row ranks first in Pricing and is boosted",
        match &cross.retrieval {
            Retrieval::CrossSheet(r) => {
                let top = r
                    .per_sheet
                    .iter()
                    .find(|s| s.sheet_id == "Pricing")
                    .and_then(|s| s.hits.first());
                ensure(
                    top.is_some_and(|h| {
                        h.entity_match && h.text.contains("costs $10") && h.score > h.raw_score
                    }),
                    || format!("top Pricing hit {:?}", top.map(|h| &h.text)),
                )
            }
            other => Err(format!("unexpected mode {:?}", other)),
        },
    );

    let rebuilt = kb.rebuild(&workbook).await?;
    let again = engine
        .ask(&QueryRequest::new(QUESTION).entity(ENTITY).retrieval_only())
        .await?;
    report.record(
        "rebuilding the same workbook gives identical rankings",
        match (&cross.retrieval, &again.retrieval) {
            (Retrieval::CrossSheet(a), Retrieval::CrossSheet(b)) => ensure(
                rebuilt.generation == 2 && ids(&a.ranked) == ids(&b.ranked),
                || format!("{:?} vs {:?}", ids(&a.ranked), ids(&b.ranked)),
            ),
            _ => Err("unexpected retrieval mode".into()),
        },
    );

    let answered = engine.ask(&QueryRequest::new(QUESTION).cross_sheet()).await?;
    report.record(
        "mock backend answers from the assembled context",
        ensure(
            answered
                .answer
                .as_ref()
                .is_some_and(|a| a.generated && a.backend.as_deref() == Some("mock")),
            || format!("answer {:?}", answered.answer),
        ),
    );

    for check in &report.checks {
        output.check(check.name, check.passed, &check.detail);
    }
    Ok(report)
}
