//! Mock implementations for testing.
//!
//! Embedders with predictable geometry and scripted LLM clients, shared by
//! the integration tests.

use async_trait::async_trait;
use sheetrag::llm::{GenerationOptions, LLMClient};
use sheetrag::rag::embeddings::Embedder;
use sheetrag::types::{AppError, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Embeds text onto hand-picked keyword axes.
///
/// Axis `i` is 1.0 when the lowercased text contains any keyword of group
/// `i`. A trailing bias axis keeps every vector non-zero, so similarity is
/// fully determined by keyword overlap.
#[derive(Debug, Clone)]
pub struct KeywordEmbedder {
    axes: Vec<Vec<String>>,
}

impl KeywordEmbedder {
    pub fn new(axes: &[&[&str]]) -> Self {
        Self {
            axes: axes
                .iter()
                .map(|group| group.iter().map(|k| k.to_lowercase()).collect())
                .collect(),
        }
    }

    /// "product" / "cost" / "stock" / "xyz" axes.
    pub fn products() -> Self {
        Self::new(&[
            &["product"],
            &["cost", "price", "pricing"],
            &["stock", "inventory"],
            &["xyz"],
        ])
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let text = text.to_lowercase();
        let mut v: Vec<f32> = self
            .axes
            .iter()
            .map(|group| {
                if group.iter().any(|k| text.contains(k.as_str())) {
                    1.0
                } else {
                    0.0
                }
            })
            .collect();
        v.push(0.1);
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        v.iter().map(|x| x / norm).collect()
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_id(&self) -> String {
        format!("keyword:{}", self.axes.len())
    }

    fn dimensions(&self) -> usize {
        self.axes.len() + 1
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

/// Keyword embedder that can be switched into failing mode.
pub struct FailingEmbedder {
    inner: KeywordEmbedder,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl FailingEmbedder {
    pub fn new(failing: bool) -> Self {
        Self {
            inner: KeywordEmbedder::products(),
            failing: AtomicBool::new(failing),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_id(&self) -> String {
        self.inner.model_id()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Embedding("mock embedding failure".into()));
        }
        self.inner.embed_batch(texts).await
    }
}

/// Keyword embedder with an adjustable delay before every call.
pub struct SlowEmbedder {
    inner: KeywordEmbedder,
    delay_ms: AtomicU64,
}

impl SlowEmbedder {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: KeywordEmbedder::products(),
            delay_ms: AtomicU64::new(delay.as_millis() as u64),
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl Embedder for SlowEmbedder {
    fn model_id(&self) -> String {
        self.inner.model_id()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.inner.embed_batch(texts).await
    }
}

/// Mock LLM client with a fixed response.
///
/// Records the last context it was asked to answer from.
#[derive(Clone)]
pub struct MockLLMClient {
    response: String,
    should_fail: bool,
    available: bool,
    last_context: Arc<parking_lot::Mutex<Option<String>>>,
}

impl MockLLMClient {
    /// Create a new mock client that returns the given response.
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            should_fail: false,
            available: true,
            last_context: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    /// Create a mock client that always returns an error.
    pub fn failing() -> Self {
        Self {
            should_fail: true,
            ..Self::new("")
        }
    }

    /// Create a mock client that reports itself unavailable.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new("")
        }
    }

    pub fn last_context(&self) -> Option<String> {
        self.last_context.lock().clone()
    }
}

#[async_trait]
impl LLMClient for MockLLMClient {
    async fn generate(
        &self,
        context: &str,
        _query: &str,
        _options: &GenerationOptions,
    ) -> Result<String> {
        *self.last_context.lock() = Some(context.to_string());
        if self.should_fail {
            return Err(AppError::LLM("Mock LLM failure".to_string()));
        }
        Ok(self.response.clone())
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}
