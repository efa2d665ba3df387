//! Deterministic generation backend used offline and in tests.

use crate::llm::client::{GenerationOptions, LLMClient};
use crate::types::Result;
use async_trait::async_trait;

/// Echoes the question and the best context line. Always available.
#[derive(Debug, Clone, Default)]
pub struct MockClient;

impl MockClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LLMClient for MockClient {
    async fn generate(
        &self,
        context: &str,
        query: &str,
        _options: &GenerationOptions,
    ) -> Result<String> {
        let evidence: Vec<&str> = context
            .lines()
            .filter(|l| l.starts_with('['))
            .collect();
        Ok(match evidence.first() {
            Some(best) => format!(
                "Answer to \"{}\" from {} matching row(s). Best match: {}",
                query,
                evidence.len(),
                best
            ),
            None => format!("No matching rows were found for \"{}\".", query),
        })
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn model_name(&self) -> &str {
        "mock"
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cites_best_line() {
        let ctx = "## Sheet: Pricing\n[Pricing | r1 | score 0.900] xyz costs $10\n";
        let out = MockClient::new()
            .generate(ctx, "price of xyz?", &GenerationOptions::default())
            .await
            .unwrap();
        assert!(out.contains("1 matching row(s)"));
        assert!(out.ends_with("xyz costs $10"));
    }

    #[tokio::test]
    async fn test_empty_context() {
        let out = MockClient::new()
            .generate("", "anything", &GenerationOptions::default())
            .await
            .unwrap();
        assert!(out.starts_with("No matching rows"));
    }
}
