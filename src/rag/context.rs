//! Budgeted context assembly from retrieval hits.

use crate::rag::content::SheetHits;
use crate::types::QueryHit;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Upper bound on snippet text included in a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextBudget {
    Chars(usize),
    /// Estimated at four characters per token.
    Tokens(usize),
}

impl Default for ContextBudget {
    fn default() -> Self {
        ContextBudget::Chars(6000)
    }
}

impl ContextBudget {
    fn char_limit(&self) -> usize {
        match *self {
            ContextBudget::Chars(n) => n,
            ContextBudget::Tokens(n) => n.saturating_mul(4),
        }
    }
}

/// One piece of retrieved text with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnippet {
    pub sheet_id: String,
    pub matched_id: String,
    pub score: f32,
    pub entity_match: bool,
    pub text: String,
    /// True when `text` was cut to fit the budget.
    #[serde(default)]
    pub truncated: bool,
}

impl From<&QueryHit> for ContextSnippet {
    fn from(hit: &QueryHit) -> Self {
        Self {
            sheet_id: hit.sheet_id.clone(),
            matched_id: hit.matched_id.clone(),
            score: hit.score,
            entity_match: hit.entity_match,
            text: hit.text.clone(),
            truncated: false,
        }
    }
}

/// Ordered, budget-bounded snippets ready for generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub snippets: Vec<ContextSnippet>,
    /// Render with a header per sheet.
    pub grouped: bool,
    /// Characters of snippet text used.
    pub used_chars: usize,
    /// Hits left out for lack of budget.
    pub dropped: usize,
}

impl Context {
    /// Snippets in descending score order until the budget is spent.
    pub fn assemble(hits: &[QueryHit], budget: ContextBudget) -> Self {
        let mut ordered: Vec<&QueryHit> = hits.iter().collect();
        ordered.sort_by(|a, b| b.score.total_cmp(&a.score));
        let mut ctx = Context::default();
        ctx.fill(ordered, budget.char_limit());
        ctx
    }

    /// Snippets kept in per-sheet groups, in the order given.
    ///
    /// Budget is handed out by rank across sheets (every sheet's best row,
    /// then every sheet's second row, and so on) so one sheet cannot crowd
    /// out the rest. A row that does not fit is skipped; shorter rows behind
    /// it may still be admitted.
    pub fn assemble_grouped(groups: &[SheetHits], budget: ContextBudget) -> Self {
        let limit = budget.char_limit();
        let mut ctx = Context {
            grouped: true,
            ..Context::default()
        };
        let mut picked: Vec<Vec<ContextSnippet>> = vec![Vec::new(); groups.len()];
        let depth = groups.iter().map(|g| g.hits.len()).max().unwrap_or(0);
        let mut admitted = 0usize;
        for rank in 0..depth {
            for (slot, group) in picked.iter_mut().zip(groups) {
                let Some(hit) = group.hits.get(rank) else {
                    continue;
                };
                if let Some(snippet) = ctx.admit(hit, limit, admitted == 0) {
                    admitted += 1;
                    slot.push(snippet);
                }
            }
        }
        ctx.snippets = picked.into_iter().flatten().collect();
        ctx
    }

    fn fill<'a>(&mut self, hits: impl IntoIterator<Item = &'a QueryHit>, limit: usize) {
        let mut full = false;
        for hit in hits {
            if full {
                self.dropped += 1;
                continue;
            }
            let first = self.snippets.is_empty();
            match self.admit(hit, limit, first) {
                Some(snippet) => {
                    full = snippet.truncated;
                    self.snippets.push(snippet);
                }
                None => full = true,
            }
        }
    }

    /// Charge `hit` against the budget. Only the first admitted snippet may be
    /// cut to fit.
    fn admit(&mut self, hit: &QueryHit, limit: usize, first: bool) -> Option<ContextSnippet> {
        let len = hit.text.chars().count();
        let remaining = limit.saturating_sub(self.used_chars);
        if len <= remaining {
            self.used_chars += len;
            return Some(hit.into());
        }
        if first && remaining > 0 {
            let mut snippet = ContextSnippet::from(hit);
            snippet.text = hit.text.chars().take(remaining).collect();
            snippet.truncated = true;
            self.used_chars += remaining;
            return Some(snippet);
        }
        self.dropped += 1;
        None
    }

    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.snippets.len()
    }

    /// Sheets represented, in first-appearance order.
    pub fn sheets(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for s in &self.snippets {
            if !out.contains(&s.sheet_id.as_str()) {
                out.push(&s.sheet_id);
            }
        }
        out
    }

    /// Prompt-ready text with provenance on every snippet.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut current_sheet: Option<&str> = None;
        for s in &self.snippets {
            if self.grouped && current_sheet != Some(s.sheet_id.as_str()) {
                if current_sheet.is_some() {
                    out.push('\n');
                }
                let _ = writeln!(out, "## Sheet: {}", s.sheet_id);
                current_sheet = Some(&s.sheet_id);
            }
            let marker = if s.entity_match { " | entity" } else { "" };
            let _ = writeln!(
                out,
                "[{} | {} | score {:.3}{}] {}",
                s.sheet_id, s.matched_id, s.score, marker, s.text
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HitSource;

    fn hit(sheet: &str, id: &str, score: f32, text: &str) -> QueryHit {
        QueryHit::new(HitSource::Content, id, sheet, score, text)
    }

    #[test]
    fn test_orders_by_score_and_respects_budget() {
        let hits = vec![
            hit("A", "1", 0.5, "aaaa"),
            hit("B", "1", 0.9, "bbbb"),
            hit("C", "1", 0.7, "cccc"),
        ];
        let ctx = Context::assemble(&hits, ContextBudget::Chars(9));
        let order: Vec<_> = ctx.snippets.iter().map(|s| s.sheet_id.as_str()).collect();
        assert_eq!(order, vec!["B", "C"]);
        assert_eq!(ctx.used_chars, 8);
        assert_eq!(ctx.dropped, 1);
    }

    #[test]
    fn test_oversized_first_snippet_is_truncated() {
        let hits = vec![hit("A", "1", 0.9, "héllo wörld")];
        let ctx = Context::assemble(&hits, ContextBudget::Tokens(1));
        assert_eq!(ctx.snippets[0].text, "héll");
        assert!(ctx.snippets[0].truncated);
    }

    #[test]
    fn test_grouped_render_has_sheet_headers() {
        let groups = vec![
            SheetHits {
                sheet_id: "Pricing".into(),
                hits: vec![hit("Pricing", "r1", 0.8, "xyz costs $10")],
            },
            SheetHits {
                sheet_id: "Inventory".into(),
                hits: vec![
                    hit("Inventory", "r4", 0.6, "xyz stock 5"),
                    hit("Inventory", "r2", 0.5, "abc stock 1"),
                ],
            },
        ];
        let ctx = Context::assemble_grouped(&groups, ContextBudget::default());
        let text = ctx.render();
        assert!(text.starts_with("## Sheet: Pricing\n"));
        assert_eq!(text.matches("## Sheet: Inventory").count(), 1);
        assert_eq!(ctx.sheets(), vec!["Pricing", "Inventory"]);
    }

    #[test]
    fn test_grouped_budget_keeps_every_sheet() {
        let long = "p".repeat(800);
        let groups = vec![
            SheetHits {
                sheet_id: "Pricing".into(),
                hits: (1..=5)
                    .map(|n| hit("Pricing", &format!("r{}", n), 0.9, &long))
                    .collect(),
            },
            SheetHits {
                sheet_id: "Inventory".into(),
                hits: vec![hit("Inventory", "r1", 0.4, &"i".repeat(60))],
            },
        ];
        let ctx = Context::assemble_grouped(&groups, ContextBudget::Chars(2000));

        assert_eq!(ctx.sheets(), vec!["Pricing", "Inventory"]);
        assert_eq!(ctx.len(), 3);
        assert_eq!(ctx.used_chars, 1660);
        assert_eq!(ctx.dropped, 3);
        let ids: Vec<_> = ctx.snippets.iter().map(|s| s.matched_id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r2", "r1"]);
        assert!(ctx.render().starts_with("## Sheet: Pricing\n"));
    }

    #[test]
    fn test_grouped_skips_long_row_for_shorter_one() {
        let groups = vec![SheetHits {
            sheet_id: "Pricing".into(),
            hits: vec![
                hit("Pricing", "r1", 0.9, "aaaa"),
                hit("Pricing", "r2", 0.8, "bbbbbbbbbb"),
                hit("Pricing", "r3", 0.7, "cc"),
            ],
        }];
        let ctx = Context::assemble_grouped(&groups, ContextBudget::Chars(7));
        let ids: Vec<_> = ctx.snippets.iter().map(|s| s.matched_id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r3"]);
        assert_eq!(ctx.dropped, 1);
    }

    #[test]
    fn test_empty_hits_render_empty() {
        let ctx = Context::assemble(&[], ContextBudget::default());
        assert!(ctx.is_empty());
        assert_eq!(ctx.render(), "");
    }
}
