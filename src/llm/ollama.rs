use crate::llm::client::{user_prompt, GenerationOptions, LLMClient, SYSTEM_PROMPT};
use crate::types::{AppError, Result};
use async_trait::async_trait;
use ollama_rs::{
    generation::chat::{request::ChatMessageRequest, ChatMessage},
    models::ModelOptions,
    Ollama,
};
use std::time::Duration;
use tracing::debug;

const DEFAULT_PORT: u16 = 11434;
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct OllamaClient {
    client: Ollama,
    model: String,
}

/// Split a base URL into the `scheme://host` and port Ollama expects.
fn split_base_url(base_url: &str) -> Result<(String, u16)> {
    let url = reqwest::Url::parse(base_url)
        .map_err(|e| AppError::Configuration(format!("invalid Ollama URL '{}': {}", base_url, e)))?;
    let host = url
        .host_str()
        .ok_or_else(|| AppError::Configuration(format!("Ollama URL '{}' has no host", base_url)))?;
    Ok((
        format!("{}://{}", url.scheme(), host),
        url.port().unwrap_or(DEFAULT_PORT),
    ))
}

impl OllamaClient {
    pub fn new(base_url: &str, model: String) -> Result<Self> {
        let (host, port) = split_base_url(base_url)?;
        Ok(Self {
            client: Ollama::new(host, port),
            model,
        })
    }
}

#[async_trait]
impl LLMClient for OllamaClient {
    async fn generate(
        &self,
        context: &str,
        query: &str,
        options: &GenerationOptions,
    ) -> Result<String> {
        let messages = vec![
            ChatMessage::system(SYSTEM_PROMPT.to_string()),
            ChatMessage::user(user_prompt(context, query)),
        ];
        let model = options.model.clone().unwrap_or_else(|| self.model.clone());

        let mut model_options = ModelOptions::default();
        if let Some(t) = options.temperature {
            model_options = model_options.temperature(t);
        }
        if let Some(n) = options.max_tokens {
            model_options = model_options.num_predict(n as i32);
        }
        let request = ChatMessageRequest::new(model, messages).options(model_options);

        let response = self
            .client
            .send_chat_messages(request)
            .await
            .map_err(|e| AppError::LLM(format!("Ollama error: {}", e)))?;

        Ok(response.message.content)
    }

    async fn is_available(&self) -> bool {
        let reachable = matches!(
            tokio::time::timeout(PROBE_TIMEOUT, self.client.list_local_models()).await,
            Ok(Ok(_))
        );
        debug!(model = %self.model, reachable, "Probed Ollama");
        reachable
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &'static str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_parsing_full() {
        let (host, port) = split_base_url("http://localhost:11434").unwrap();
        assert_eq!(host, "http://localhost");
        assert_eq!(port, 11434);
    }

    #[test]
    fn test_url_parsing_no_port() {
        let (host, port) = split_base_url("http://localhost").unwrap();
        assert_eq!(host, "http://localhost");
        assert_eq!(port, 11434);
    }

    #[test]
    fn test_url_parsing_custom_port() {
        let (host, port) = split_base_url("http://192.168.1.100:8080").unwrap();
        assert_eq!(host, "http://192.168.1.100");
        assert_eq!(port, 8080);
    }

    #[test]
    fn test_invalid_url_is_configuration_error() {
        assert!(matches!(
            split_base_url("not a url"),
            Err(AppError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let client = OllamaClient::new("http://127.0.0.1:9", "llama3.2".into()).unwrap();
        assert!(!client.is_available().await);
    }
}
