//! Embedding providers.
//!
//! Every index talks to embeddings through the [`Embedder`] trait. The
//! default [`HashingEmbedder`] is deterministic and offline; HTTP providers
//! cover Ollama and OpenAI-compatible servers, and `fastembed` models are
//! available behind the `local-embeddings` feature.

use crate::types::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Produces fixed-size vectors for text.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identity of the model, recorded in the index manifest.
    ///
    /// Two embedders with the same id must produce compatible vectors.
    fn model_id(&self) -> String;

    /// Output dimensionality.
    fn dimensions(&self) -> usize;

    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| AppError::Embedding("provider returned no vector".into()))
    }
}

// ============================================================================
// Provider Configuration
// ============================================================================

/// Which embedding backend to build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Deterministic feature-hashing embedder.
    Hashing { dimensions: usize },
    /// Ollama `/api/embed`.
    Ollama {
        base_url: String,
        model: String,
        dimensions: usize,
        timeout_secs: u64,
    },
    /// OpenAI-compatible `/embeddings`.
    OpenAI {
        base_url: String,
        model: String,
        api_key: String,
        dimensions: usize,
        timeout_secs: u64,
    },
    /// Local ONNX model via fastembed.
    #[cfg(feature = "local-embeddings")]
    FastEmbed { model: String },
}

impl EmbeddingProvider {
    /// Build the embedder this provider describes.
    pub fn create_embedder(&self) -> Result<Arc<dyn Embedder>> {
        match self {
            EmbeddingProvider::Hashing { dimensions } => {
                Ok(Arc::new(HashingEmbedder::new(*dimensions)?))
            }
            EmbeddingProvider::Ollama {
                base_url,
                model,
                dimensions,
                timeout_secs,
            } => Ok(Arc::new(HttpEmbedder::new(
                HttpApi::Ollama,
                base_url,
                model,
                None,
                *dimensions,
                Duration::from_secs(*timeout_secs),
            )?)),
            EmbeddingProvider::OpenAI {
                base_url,
                model,
                api_key,
                dimensions,
                timeout_secs,
            } => Ok(Arc::new(HttpEmbedder::new(
                HttpApi::OpenAI,
                base_url,
                model,
                Some(api_key.clone()),
                *dimensions,
                Duration::from_secs(*timeout_secs),
            )?)),
            #[cfg(feature = "local-embeddings")]
            EmbeddingProvider::FastEmbed { model } => Ok(Arc::new(FastEmbedder::new(model)?)),
        }
    }

    /// Short provider name for display.
    pub fn name(&self) -> &'static str {
        match self {
            EmbeddingProvider::Hashing { .. } => "hashing",
            EmbeddingProvider::Ollama { .. } => "ollama",
            EmbeddingProvider::OpenAI { .. } => "openai",
            #[cfg(feature = "local-embeddings")]
            EmbeddingProvider::FastEmbed { .. } => "fastembed",
        }
    }
}

// ============================================================================
// Hashing Embedder
// ============================================================================

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "in", "is", "it",
    "its", "of", "on", "that", "the", "to", "was", "were", "will", "with", "this", "or", "what",
    "which", "how", "me", "show", "give", "all",
];

const EMPTY_TOKEN: &str = "<empty>";

/// Bag-of-words embedder using signed feature hashing.
///
/// Tokens are lowercased alphanumeric runs minus stopwords, with a trailing
/// plural `s` stripped. Each token lands in a bucket chosen by FNV-1a with
/// a sign taken from a second hash bit; term weights are `1 + ln(tf)`.
/// Output is L2-normalized and never zero.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(AppError::Configuration(
                "hashing embedder needs dimensions > 0".into(),
            ));
        }
        Ok(Self { dimensions })
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty() && w.len() < 64 && !STOPWORDS.contains(w))
            .map(|w| {
                if w.len() > 3 && w.ends_with('s') && !w.ends_with("ss") {
                    w[..w.len() - 1].to_string()
                } else {
                    w.to_string()
                }
            })
            .collect()
    }

    fn fnv1a(term: &str) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in term.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        hash
    }

    /// Embed synchronously.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut tokens = Self::tokenize(text);
        if tokens.is_empty() {
            tokens.push(EMPTY_TOKEN.to_string());
        }

        // Ordered so the float sums are identical across processes.
        let mut tf: BTreeMap<String, usize> = BTreeMap::new();
        for token in tokens {
            *tf.entry(token).or_insert(0) += 1;
        }

        let mut embedding = vec![0.0_f32; self.dimensions];
        for (term, count) in tf {
            let hash = Self::fnv1a(&term);
            let idx = (hash % self.dimensions as u64) as usize;
            let sign = if (hash >> 63) & 1 == 1 { -1.0 } else { 1.0 };
            embedding[idx] += sign * (1.0 + (count as f32).ln());
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut embedding {
                *val /= norm;
            }
        } else {
            // Colliding signs cancelled out
            embedding[0] = 1.0;
        }
        embedding
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_id(&self) -> String {
        format!("hashing:{}", self.dimensions)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

// ============================================================================
// HTTP Embedder
// ============================================================================

/// Wire format of an HTTP embedding server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpApi {
    Ollama,
    OpenAI,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct OpenAIEmbedResponse {
    data: Vec<OpenAIEmbedding>,
}

#[derive(Deserialize)]
struct OpenAIEmbedding {
    index: usize,
    embedding: Vec<f32>,
}

/// Embeddings over HTTP, Ollama or OpenAI wire format.
pub struct HttpEmbedder {
    client: reqwest::Client,
    api: HttpApi,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
}

impl HttpEmbedder {
    pub fn new(
        api: HttpApi,
        base_url: &str,
        model: &str,
        api_key: Option<String>,
        dimensions: usize,
        timeout: Duration,
    ) -> Result<Self> {
        if model.trim().is_empty() {
            return Err(AppError::Configuration("missing embedding model name".into()));
        }
        if dimensions == 0 {
            return Err(AppError::Configuration(
                "embedding dimensions must be > 0".into(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        let base = base_url.trim_end_matches('/');
        let endpoint = match api {
            HttpApi::Ollama => format!("{}/api/embed", base),
            HttpApi::OpenAI => format!("{}/embeddings", base),
        };

        Ok(Self {
            client,
            api,
            endpoint,
            model: model.to_string(),
            api_key,
            dimensions,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_id(&self) -> String {
        let api = match self.api {
            HttpApi::Ollama => "ollama",
            HttpApi::OpenAI => "openai",
        };
        format!("{}:{}:{}", api, self.model, self.dimensions)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbedRequest {
            model: &self.model,
            input: texts,
            dimensions: match self.api {
                HttpApi::OpenAI => Some(self.dimensions),
                HttpApi::Ollama => None,
            },
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::ProviderTimeout(format!("embedding request to {}", self.endpoint))
            } else {
                AppError::Embedding(format!("embedding request failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(AppError::Embedding(format!(
                "embedding request failed ({}): {}",
                status, body
            )));
        }

        let vectors = match self.api {
            HttpApi::Ollama => {
                let parsed: OllamaEmbedResponse = response
                    .json()
                    .await
                    .map_err(|e| AppError::Embedding(format!("bad embedding response: {}", e)))?;
                parsed.embeddings
            }
            HttpApi::OpenAI => {
                let mut parsed: OpenAIEmbedResponse = response
                    .json()
                    .await
                    .map_err(|e| AppError::Embedding(format!("bad embedding response: {}", e)))?;
                parsed.data.sort_by_key(|entry| entry.index);
                parsed.data.into_iter().map(|e| e.embedding).collect()
            }
        };

        if vectors.len() != texts.len() {
            return Err(AppError::Embedding(format!(
                "provider returned {} embeddings for {} inputs",
                vectors.len(),
                texts.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimensions) {
            return Err(AppError::Embedding(format!(
                "expected {} dimensions, provider returned {}",
                self.dimensions,
                bad.len()
            )));
        }

        Ok(vectors)
    }
}

// ============================================================================
// FastEmbed (local ONNX)
// ============================================================================

#[cfg(feature = "local-embeddings")]
pub use local::FastEmbedder;

#[cfg(feature = "local-embeddings")]
mod local {
    use super::*;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use parking_lot::Mutex;

    /// Local embedding model run through fastembed.
    pub struct FastEmbedder {
        model: Arc<Mutex<TextEmbedding>>,
        name: String,
        dimensions: usize,
    }

    impl FastEmbedder {
        pub fn new(model_name: &str) -> Result<Self> {
            let (model, dimensions) = match model_name.to_lowercase().as_str() {
                "bge-small-en-v1.5" | "baai/bge-small-en-v1.5" => {
                    (EmbeddingModel::BGESmallENV15, 384)
                }
                "bge-base-en-v1.5" | "baai/bge-base-en-v1.5" => {
                    (EmbeddingModel::BGEBaseENV15, 768)
                }
                "all-minilm-l6-v2" | "sentence-transformers/all-minilm-l6-v2" => {
                    (EmbeddingModel::AllMiniLML6V2, 384)
                }
                other => {
                    return Err(AppError::Configuration(format!(
                        "unsupported fastembed model '{}'",
                        other
                    )))
                }
            };

            let embedding = TextEmbedding::try_new(
                InitOptions::new(model).with_show_download_progress(true),
            )
            .map_err(|e| AppError::Embedding(e.to_string()))?;

            Ok(Self {
                model: Arc::new(Mutex::new(embedding)),
                name: model_name.to_string(),
                dimensions,
            })
        }
    }

    #[async_trait]
    impl Embedder for FastEmbedder {
        fn model_id(&self) -> String {
            format!("fastembed:{}", self.name)
        }

        fn dimensions(&self) -> usize {
            self.dimensions
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let model = Arc::clone(&self.model);
            let texts = texts.to_vec();
            tokio::task::spawn_blocking(move || {
                model
                    .lock()
                    .embed(texts, None)
                    .map_err(|e| AppError::Embedding(e.to_string()))
            })
            .await
            .map_err(|e| AppError::Internal(format!("embedding task failed: {}", e)))?
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetrag_vector::DistanceMetric;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_hashing_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder::new(64).unwrap();
        let a = embedder.embed("Product XYZ costs $10").await.unwrap();
        let b = embedder.embed("product xyz costs 10").await.unwrap();

        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_hashing_colliding_terms_are_order_independent() {
        // Two buckets force many terms to share a slot.
        let embedder = HashingEmbedder::new(2).unwrap();
        let forward = "pricing inventory warehouse supplier category region stock quantity";
        let reversed = "quantity stock region category supplier warehouse inventory pricing";
        let expected = embedder.embed_text(forward);
        for _ in 0..16 {
            assert_eq!(embedder.embed_text(forward), expected);
            assert_eq!(embedder.embed_text(reversed), expected);
        }
    }

    #[tokio::test]
    async fn test_hashing_empty_text_is_nonzero() {
        let embedder = HashingEmbedder::new(32).unwrap();
        let v = embedder.embed("   ").await.unwrap();
        assert!(v.iter().any(|x| *x != 0.0));
    }

    #[tokio::test]
    async fn test_hashing_overlap_scores_higher() {
        let embedder = HashingEmbedder::new(256).unwrap();
        let query = embedder.embed("stock level warehouse").await.unwrap();
        let close = embedder.embed("warehouse stock levels").await.unwrap();
        let far = embedder.embed("employee birthday party").await.unwrap();

        let metric = DistanceMetric::Cosine;
        assert!(metric.score(&query, &close) > metric.score(&query, &far));
    }

    #[test]
    fn test_tokenize_strips_stopwords_and_plurals() {
        let tokens = HashingEmbedder::tokenize("What is the cost of the Products?");
        assert_eq!(tokens, vec!["cost".to_string(), "product".to_string()]);
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        assert!(HashingEmbedder::new(0).is_err());
    }

    #[tokio::test]
    async fn test_ollama_http_embedder() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[0.1, 0.2, 0.3], [0.3, 0.2, 0.1]]
            })))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(
            HttpApi::Ollama,
            &server.uri(),
            "nomic-embed-text",
            None,
            3,
            Duration::from_secs(5),
        )
        .unwrap();

        let vectors = embedder
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[1], vec![0.3, 0.2, 0.1]);
        assert_eq!(embedder.model_id(), "ollama:nomic-embed-text:3");
    }

    #[tokio::test]
    async fn test_openai_http_embedder_orders_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"index": 1, "embedding": [0.0, 1.0]},
                    {"index": 0, "embedding": [1.0, 0.0]}
                ]
            })))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(
            HttpApi::OpenAI,
            &server.uri(),
            "text-embedding-3-small",
            Some("sk-test".into()),
            2,
            Duration::from_secs(5),
        )
        .unwrap();

        let vectors = embedder
            .embed_batch(&["first".to_string(), "second".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors[0], vec![1.0, 0.0]);
        assert_eq!(vectors[1], vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_http_embedder_dimension_check() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[0.1, 0.2]]
            })))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(
            HttpApi::Ollama,
            &server.uri(),
            "m",
            None,
            3,
            Duration::from_secs(5),
        )
        .unwrap();

        let result = embedder.embed("x").await;
        assert!(matches!(result, Err(AppError::Embedding(_))));
    }

    #[tokio::test]
    async fn test_http_embedder_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(
            HttpApi::OpenAI,
            &server.uri(),
            "m",
            None,
            2,
            Duration::from_secs(5),
        )
        .unwrap();

        assert!(embedder.embed("x").await.is_err());
    }
}
