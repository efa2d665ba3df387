//! CLI module for sheetrag
//!
//! Provides command-line interface parsing and handling for the sheetrag binary.
//! Uses clap for argument parsing and owo-colors for colored terminal output.

pub mod commands;
pub mod output;
pub mod repl;
pub mod validate;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Default configuration file name.
pub const DEFAULT_CONFIG: &str = "sheetrag.toml";

/// sheetrag - question answering over spreadsheet workbooks
///
/// Indexes every sheet twice, once by schema and once by row, and answers
/// questions by finding the relevant sheets first and then the rows in them.
#[derive(Parser, Debug)]
#[command(
    name = "sheetrag",
    version,
    about = "Dual-index retrieval over spreadsheet workbooks",
    after_help = "EXAMPLES:\n    \
                  sheetrag build ./workbook                      # Index a directory of CSV sheets\n    \
                  sheetrag query \"total revenue in Q3\"          # Standard retrieval + answer\n    \
                  sheetrag query \"price and stock\" --entity xyz  # Cross-sheet with entity boost\n    \
                  sheetrag interactive                           # REPL\n    \
                  sheetrag test                                  # Built-in self-test"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG, global = true)]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Rebuild both indexes from a CSV/TSV file or a directory of them
    Build {
        /// File or directory to index
        source: PathBuf,
    },

    /// Ask one question
    Query(QueryArgs),

    /// Ask questions in a loop
    Interactive,

    /// Run the built-in validation sequence on a synthetic workbook
    Test,

    /// Show the active generation and index sizes
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct QueryArgs {
    /// The question
    pub question: String,

    /// Retrieve per sheet and rank across sheets
    #[arg(long)]
    pub cross_sheet: bool,

    /// Boost rows mentioning this entity (repeatable; implies --cross-sheet)
    #[arg(short, long = "entity", value_name = "ENTITY")]
    pub entities: Vec<String>,

    /// Sheets selected by the structure index
    #[arg(long)]
    pub k_structure: Option<usize>,

    /// Rows returned by standard retrieval
    #[arg(long)]
    pub k_content: Option<usize>,

    /// Rows per sheet in cross-sheet retrieval
    #[arg(long)]
    pub k_per_sheet: Option<usize>,

    /// Skip answer generation and print the retrieved context
    #[arg(long)]
    pub no_generate: bool,

    /// Print the full response as JSON
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Whether `--config` was left at its default.
    pub fn default_config(&self) -> bool {
        self.config == PathBuf::from(DEFAULT_CONFIG)
    }
}
