use std::time::Duration;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::{Error, Result};
use super::EmbeddingProvider;

pub const DEFAULT_OLLAMA_HOST: &str = "http://127.0.0.1:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "bge-m3";

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embeddings served by an Ollama instance (`POST /api/embed`)
pub struct OllamaProvider {
    client: reqwest::Client,
    host: String,
    model: String,
    dimension: Option<usize>,
}

impl OllamaProvider {
    pub fn new(host: &str, model: &str, dimension: Option<usize>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dimension,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/embed", self.host)
    }
}

/// Connection problems, timeouts and server errors are worth retrying
fn classify(err: reqwest::Error) -> Error {
    let transient = err.is_connect()
        || err.is_timeout()
        || err.is_request()
        || err.status().is_some_and(|s| s.is_server_error() || s.as_u16() == 429);

    if transient {
        Error::EmbeddingUnavailable(err.to_string())
    } else {
        Error::Embedding(err.to_string())
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let response = self
            .client
            .post(self.endpoint())
            .json(&EmbedRequest { model: &self.model, input: texts })
            .send()
            .await
            .map_err(classify)?
            .error_for_status()
            .map_err(classify)?;

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("Malformed embedding response: {}", e)))?;

        tracing::debug!("{} returned {} vectors", self.model, body.embeddings.len());
        Ok(body.embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_trims_slash() {
        let provider = OllamaProvider::new("http://localhost:11434/", "bge-m3", Some(1024), Duration::from_secs(5)).unwrap();
        assert_eq!(provider.endpoint(), "http://localhost:11434/api/embed");
        assert_eq!(provider.dimension(), Some(1024));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transient() {
        // Port 9 (discard) on loopback is closed in test environments
        let provider = OllamaProvider::new("http://127.0.0.1:9", "bge-m3", None, Duration::from_millis(500)).unwrap();
        let err = provider.embed(&["hello".to_string()]).await.unwrap_err();
        assert!(err.is_transient(), "expected transient error, got {:?}", err);
    }
}
