use anyhow::Context;
use sheetrag::cli::{commands, output::Output, repl, validate, Cli, Commands};
use sheetrag::rag::QueryEngine;
use sheetrag::utils::{logging, toml_config::SheetragConfig};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();
    let output = if cli.no_color {
        Output::no_color()
    } else {
        Output::new()
    };

    match run(cli, &output).await {
        Ok(code) => code,
        Err(e) => {
            output.error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, output: &Output) -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    let config = SheetragConfig::load_or_default(&cli.config, cli.default_config())
        .with_context(|| format!("loading {}", cli.config.display()))?;
    logging::init(&config.logging, cli.verbose);

    match &cli.command {
        Commands::Build { source } => {
            let engine = open(&config).await?;
            commands::build(&engine, &config, source, output)
                .await
                .with_context(|| format!("building from {}", source.display()))?;
        }
        Commands::Query(args) => {
            let engine = open(&config).await?;
            commands::query(&engine, args, output)
                .await
                .context("answering query")?;
        }
        Commands::Interactive => repl::run(&open(&config).await?, output).await,
        Commands::Stats { json } => {
            let engine = open(&config).await?;
            commands::stats(engine.knowledge_base(), *json, output)?;
        }
        Commands::Test => {
            let report = validate::run(output).await.context("running validation")?;
            if !report.passed() {
                output.error(&format!("{} check(s) failed", report.failures()));
                return Ok(ExitCode::FAILURE);
            }
            output.success("All checks passed");
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn open(config: &SheetragConfig) -> anyhow::Result<QueryEngine> {
    commands::open_engine(config)
        .await
        .context("opening knowledge base")
}
