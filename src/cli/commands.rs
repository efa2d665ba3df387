//! Handlers behind the `build`, `query` and `stats` subcommands.

use crate::cli::output::Output;
use crate::cli::QueryArgs;
use crate::ingest::{CsvSource, TabularSource};
use crate::llm::BackendSelector;
use crate::rag::answer::{QueryEngine, QueryRequest};
use crate::rag::knowledge::{BuildReport, KnowledgeBase};
use crate::types::{AppError, Result};
use crate::utils::toml_config::SheetragConfig;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

impl From<&QueryArgs> for QueryRequest {
    fn from(args: &QueryArgs) -> Self {
        QueryRequest {
            query: args.question.clone(),
            cross_sheet: args.cross_sheet,
            entities: args.entities.clone(),
            k_structure: args.k_structure,
            k_content: args.k_content,
            k_per_sheet: args.k_per_sheet,
            no_generate: args.no_generate,
        }
    }
}

/// Open the knowledge base and query engine described by `config`.
pub async fn open_engine(config: &SheetragConfig) -> Result<QueryEngine> {
    let store = config.open_store().await?;
    let embedder = config.create_embedder()?;
    let kb = KnowledgeBase::open(store, embedder, config.knowledge_base_config()).await?;
    let selector = BackendSelector::from_providers(&config.generation_providers())?;
    info!(backends = ?selector.order(), "Generation backends");

    Ok(QueryEngine::new(Arc::new(kb), selector, config.retrieval_settings())
        .with_options(config.generation_options())
        .with_policy(config.generation_policy()))
}

/// Rebuild both indexes from a CSV file or directory.
pub async fn build(
    engine: &QueryEngine,
    config: &SheetragConfig,
    source: &Path,
    output: &Output,
) -> Result<BuildReport> {
    output.step(1, 2, &format!("Reading {}", source.display()));
    let source = CsvSource::open(source, config.index.ingest.clone())?;
    output.info(&format!("Sheets: {}", source.sheet_names().join(", ")));

    output.step(2, 2, "Embedding sheets and rows");
    let report = engine.knowledge_base().rebuild(&source).await?;

    output.success(&format!(
        "Generation {} active: {} sheet(s), {} descriptor(s), {} row record(s)",
        report.generation, report.sheets, report.descriptors, report.rows
    ));
    Ok(report)
}

/// Answer one question and print the result.
pub async fn query(engine: &QueryEngine, args: &QueryArgs, output: &Output) -> Result<()> {
    let response = engine.ask(&QueryRequest::from(args)).await?;
    if args.json {
        println!("{}", to_json(&response)?);
    } else {
        output.response(&response, true);
    }
    Ok(())
}

/// Print the active generation and index sizes.
pub fn stats(kb: &KnowledgeBase, json: bool, output: &Output) -> Result<()> {
    let stats = kb.stats();
    if json {
        println!("{}", to_json(&stats)?);
        return Ok(());
    }

    output.header("Knowledge base");
    if stats.generation == 0 {
        output.warning("No generation built yet");
        output.hint("Build one with:");
        output.command("sheetrag build <path-to-csv-or-directory>");
        return Ok(());
    }

    output.kv("generation", &stats.generation.to_string());
    if let Some(at) = stats.built_at {
        output.kv("built at", &at.to_rfc3339());
    }
    output.kv(
        "embedder",
        &format!("{} ({} dims)", stats.embedder_model, stats.dimensions),
    );
    output.kv("descriptors", &stats.structure.descriptors.to_string());
    output.kv("rows", &stats.content.rows.to_string());
    output.kv("retired generations", &stats.retired.to_string());

    output.subheader("Sheets");
    output.table_header(&["Sheet", "Rows"]);
    for (sheet, rows) in &stats.content.per_sheet {
        output.table_row(&[sheet, &rows.to_string()]);
    }
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| AppError::Internal(e.to_string()))
}
