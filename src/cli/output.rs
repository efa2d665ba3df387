//! Colored output helpers for CLI
//!
//! Provides consistent, colored terminal output for the sheetrag CLI.

use crate::rag::answer::{Answer, QueryResponse, Retrieval, DEGRADED_MARKER};
use crate::rag::context::Context;
use crate::types::QueryHit;
use owo_colors::OwoColorize;
use std::io::{self, Write};

/// Output style configuration
pub struct Output {
    /// Whether to use colored output
    pub colored: bool,
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

impl Output {
    /// Create a new output helper with colors enabled
    pub fn new() -> Self {
        Self { colored: true }
    }

    /// Create a new output helper with colors disabled
    pub fn no_color() -> Self {
        Self { colored: false }
    }

    pub fn banner(&self) {
        let version = format!("v{}", env!("CARGO_PKG_VERSION"));
        if self.colored {
            println!(
                "\n   {} {}\n   {}\n",
                "sheetrag".bright_cyan().bold(),
                version.dimmed(),
                "Sheets first, then rows. Type :help for commands.".bright_white()
            );
        } else {
            println!(
                "\n   sheetrag {}\n   Sheets first, then rows. Type :help for commands.\n",
                version
            );
        }
    }

    /// Print a success message with a checkmark
    pub fn success(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "✓".green().bold(), message.green());
        } else {
            println!("  [OK] {}", message);
        }
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "•".blue(), message);
        } else {
            println!("  [INFO] {}", message);
        }
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "⚠".yellow().bold(), message.yellow());
        } else {
            println!("  [WARN] {}", message);
        }
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        if self.colored {
            eprintln!("  {} {}", "✗".red().bold(), message.red());
        } else {
            eprintln!("  [ERROR] {}", message);
        }
    }

    /// Print a step message (for multi-step operations)
    pub fn step(&self, step_num: u32, total: u32, message: &str) {
        if self.colored {
            println!(
                "  {} {}",
                format!("[{}/{}]", step_num, total).dimmed(),
                message.bright_white()
            );
        } else {
            println!("  [{}/{}] {}", step_num, total, message);
        }
    }

    /// Print a header for a section
    pub fn header(&self, title: &str) {
        if self.colored {
            println!("\n  {}", title.bright_white().bold().underline());
        } else {
            println!("\n  === {} ===", title);
        }
    }

    /// Print a subheader
    pub fn subheader(&self, title: &str) {
        if self.colored {
            println!("\n  {}", title.cyan().bold());
        } else {
            println!("\n  --- {} ---", title);
        }
    }

    /// Print a key-value pair
    pub fn kv(&self, key: &str, value: &str) {
        if self.colored {
            println!("    {}: {}", key.dimmed(), value.bright_white());
        } else {
            println!("    {}: {}", key, value);
        }
    }

    /// Print a list item
    pub fn list_item(&self, item: &str) {
        if self.colored {
            println!("    {} {}", "•".blue(), item);
        } else {
            println!("    - {}", item);
        }
    }

    /// Print a hint/tip message
    pub fn hint(&self, message: &str) {
        if self.colored {
            println!("\n  {}", message.dimmed().italic());
        } else {
            println!("\n  [TIP] {}", message);
        }
    }

    /// Print a command suggestion
    pub fn command(&self, cmd: &str) {
        if self.colored {
            println!("     {}", format!("$ {}", cmd).bright_cyan());
        } else {
            println!("     $ {}", cmd);
        }
    }

    /// Pass/fail line of a self-test.
    pub fn check(&self, name: &str, passed: bool, detail: &str) {
        match (self.colored, passed) {
            (true, true) => println!("  {} {}", "✓".green().bold(), name),
            (true, false) => println!(
                "  {} {} {}",
                "✗".red().bold(),
                name.red(),
                format!("({})", detail).dimmed()
            ),
            (false, true) => println!("  [PASS] {}", name),
            (false, false) => println!("  [FAIL] {} ({})", name, detail),
        }
    }

    /// One ranked hit.
    pub fn hit(&self, rank: usize, hit: &QueryHit) {
        let tag = if hit.entity_match { " entity" } else { "" };
        if self.colored {
            println!(
                "    {} {} {}{} {}",
                format!("{:>2}.", rank).dimmed(),
                format!("{:.3}", hit.score).bright_yellow(),
                format!("{}/{}", hit.sheet_id, hit.matched_id).cyan(),
                tag.magenta(),
                hit.text
            );
        } else {
            println!(
                "    {:>2}. {:.3} {}/{}{} {}",
                rank, hit.score, hit.sheet_id, hit.matched_id, tag, hit.text
            );
        }
    }

    fn hits(&self, title: &str, hits: &[QueryHit]) {
        self.subheader(title);
        if hits.is_empty() {
            self.list_item("(none)");
        }
        for (i, hit) in hits.iter().enumerate() {
            self.hit(i + 1, hit);
        }
    }

    fn context_summary(&self, context: &Context) {
        self.kv(
            "context",
            &format!(
                "{} snippet(s), {} chars, {} dropped",
                context.len(),
                context.used_chars,
                context.dropped
            ),
        );
    }

    /// Human-readable rendering of a query response.
    pub fn response(&self, response: &QueryResponse, show_hits: bool) {
        self.kv("generation", &response.generation.to_string());
        if let Some(reason) = response.retrieval.degraded() {
            self.warning(&format!("{} {}", DEGRADED_MARKER, reason));
        }

        if show_hits {
            match &response.retrieval {
                Retrieval::Standard(r) => {
                    self.hits("Sheets", &r.sheet_hits);
                    self.hits("Rows", &r.content_hits);
                    self.context_summary(&r.context);
                }
                Retrieval::CrossSheet(r) => {
                    if let Some(entity) = &r.entity {
                        self.kv("entity", entity);
                    }
                    self.hits("Sheets", &r.sheet_hits);
                    self.hits("Rows (all sheets)", &r.ranked);
                    self.context_summary(&r.context);
                }
                Retrieval::MultiEntity { results } => {
                    for e in results {
                        self.hits(&format!("Entity: {}", e.entity), &e.result.ranked);
                        self.context_summary(&e.result.context);
                    }
                }
            }
        }

        match &response.answer {
            Some(answer) => self.answer(answer),
            None => {
                self.subheader("Context");
                println!("{}", response.retrieval.context_text());
            }
        }
    }

    pub fn answer(&self, answer: &Answer) {
        let title = match &answer.backend {
            Some(b) => format!("Answer ({})", b),
            None => "Answer".to_string(),
        };
        self.subheader(&title);
        if self.colored && answer.generated {
            println!("  {}", answer.text.bright_white());
        } else {
            println!("  {}", answer.text);
        }
    }

    /// Interactive prompt; returns the trimmed line, or `None` at EOF.
    pub fn prompt(&self, label: &str) -> Option<String> {
        if self.colored {
            print!("{} ", format!("{}>", label).bright_cyan().bold());
        } else {
            print!("{}> ", label);
        }
        io::stdout().flush().ok();

        let mut input = String::new();
        match io::stdin().read_line(&mut input) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(input.trim().to_string()),
        }
    }

    /// Print a table header row
    pub fn table_header(&self, columns: &[&str]) {
        let header: String = columns
            .iter()
            .map(|c| format!("{:<15}", c))
            .collect::<Vec<_>>()
            .join(" ");
        if self.colored {
            println!("    {}", header.bright_white().bold());
            println!("    {}", "─".repeat(columns.len() * 16).dimmed());
        } else {
            println!("    {}", header);
            println!("    {}", "-".repeat(columns.len() * 16));
        }
    }

    /// Print a table row
    pub fn table_row(&self, values: &[&str]) {
        let row: String = values
            .iter()
            .map(|v| format!("{:<15}", v))
            .collect::<Vec<_>>()
            .join(" ");
        println!("    {}", row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::context::ContextBudget;
    use crate::rag::query::StandardResult;
    use crate::types::HitSource;

    fn response(answer: Option<Answer>) -> QueryResponse {
        let hits = vec![QueryHit::new(HitSource::Content, "r1", "Pricing", 0.9, "product: xyz; price: 10")];
        QueryResponse {
            generation: 2,
            retrieval: Retrieval::Standard(StandardResult {
                context: Context::assemble(&hits, ContextBudget::default()),
                sheet_hits: Vec::new(),
                content_hits: hits,
                degraded: None,
            }),
            answer,
        }
    }

    #[test]
    fn test_output_no_color() {
        let output = Output::no_color();
        assert!(!output.colored);
        assert!(Output::default().colored);
    }

    #[test]
    fn test_table_formatting() {
        let output = Output::no_color();
        output.table_header(&["Sheet", "Rows"]);
        output.table_row(&["Pricing", "2"]);
        output.table_row(&[]);
    }

    #[test]
    fn test_response_rendering_no_panic() {
        for output in [Output::new(), Output::no_color()] {
            output.response(&response(None), true);
            output.response(
                &response(Some(Answer {
                    text: "xyz costs $10 [Pricing | r1]".into(),
                    generated: true,
                    backend: Some("mock".into()),
                })),
                false,
            );
            output.check("structure index", false, "no hits");
            output.banner();
        }
    }
}
