//! Priority-ordered choice of generation backend.

use crate::llm::client::{LLMClient, Provider};
use crate::llm::mock::MockClient;
use crate::types::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A configured backend under its configuration name.
#[derive(Clone)]
pub struct NamedBackend {
    pub name: String,
    pub client: Arc<dyn LLMClient>,
    pub local: bool,
}

/// Walks backends local-first, then in configured order, ending at a mock.
///
/// The first backend reporting itself available wins. The mock is always
/// last and always available, so selection never fails.
pub struct BackendSelector {
    backends: Vec<NamedBackend>,
}

impl BackendSelector {
    /// Order `backends` so local ones come first, keeping configured order
    /// otherwise, and append a mock if none is configured.
    pub fn new(backends: Vec<NamedBackend>) -> Self {
        let (mut ordered, cloud): (Vec<_>, Vec<_>) =
            backends.into_iter().partition(|b| b.local);
        ordered.extend(cloud);
        if !ordered.iter().any(|b| b.client.provider_name() == "mock") {
            ordered.push(NamedBackend {
                name: "mock".into(),
                client: Arc::new(MockClient::new()),
                local: false,
            });
        }
        Self { backends: ordered }
    }

    /// Build clients for `(name, provider)` pairs in priority order.
    pub fn from_providers(providers: &[(String, Provider)]) -> Result<Self> {
        let backends = providers
            .iter()
            .map(|(name, provider)| {
                Ok(NamedBackend {
                    name: name.clone(),
                    client: provider.create_client()?,
                    local: provider.is_local(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(backends))
    }

    /// Selector that only ever returns the mock.
    pub fn mock_only() -> Self {
        Self::new(Vec::new())
    }

    /// Backend names in the order they are tried.
    pub fn order(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name.as_str()).collect()
    }

    /// First available backend.
    pub async fn select(&self) -> NamedBackend {
        for backend in &self.backends {
            if backend.client.is_available().await {
                info!(backend = %backend.name, model = backend.client.model_name(), "Selected generation backend");
                return backend.clone();
            }
            warn!(backend = %backend.name, "Generation backend unavailable, trying next");
        }
        debug!("No configured backend available; using mock");
        NamedBackend {
            name: "mock".into(),
            client: Arc::new(MockClient::new()),
            local: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::GenerationOptions;
    use async_trait::async_trait;

    struct Fixed {
        available: bool,
        kind: &'static str,
    }

    #[async_trait]
    impl LLMClient for Fixed {
        async fn generate(&self, _: &str, _: &str, _: &GenerationOptions) -> Result<String> {
            Ok(self.kind.to_string())
        }
        async fn is_available(&self) -> bool {
            self.available
        }
        fn model_name(&self) -> &str {
            self.kind
        }
        fn provider_name(&self) -> &'static str {
            self.kind
        }
    }

    fn backend(name: &str, available: bool, local: bool) -> NamedBackend {
        NamedBackend {
            name: name.into(),
            client: Arc::new(Fixed {
                available,
                kind: if local { "ollama" } else { "openai" },
            }),
            local,
        }
    }

    #[test]
    fn test_local_first_then_configured_order() {
        let sel = BackendSelector::new(vec![
            backend("cloud-a", true, false),
            backend("local", true, true),
            backend("cloud-b", true, false),
        ]);
        assert_eq!(sel.order(), vec!["local", "cloud-a", "cloud-b", "mock"]);
    }

    #[tokio::test]
    async fn test_skips_unavailable_local() {
        let sel = BackendSelector::new(vec![
            backend("local", false, true),
            backend("cloud-a", false, false),
            backend("cloud-b", true, false),
        ]);
        assert_eq!(sel.select().await.name, "cloud-b");
    }

    #[tokio::test]
    async fn test_falls_back_to_mock() {
        let sel = BackendSelector::new(vec![backend("local", false, true)]);
        let chosen = sel.select().await;
        assert_eq!(chosen.name, "mock");
        assert_eq!(chosen.client.provider_name(), "mock");
    }
}
