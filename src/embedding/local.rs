use std::sync::Arc;
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use crate::{Error, Result};
use super::EmbeddingProvider;

/// Default local model
pub const DEFAULT_LOCAL_MODEL: &str = "all-MiniLM-L6-v2";

/// Map a configured model name to a fastembed model and its dimension
pub fn resolve_model(name: &str) -> Result<(EmbeddingModel, usize)> {
    match name.to_lowercase().as_str() {
        "all-minilm-l6-v2" | "allminilml6v2" => Ok((EmbeddingModel::AllMiniLML6V2, 384)),
        "bge-small-en-v1.5" | "bge-small" => Ok((EmbeddingModel::BGESmallENV15, 384)),
        "bge-base-en-v1.5" | "bge-base" => Ok((EmbeddingModel::BGEBaseENV15, 768)),
        "nomic-embed-text" | "nomic-embed-text-v1.5" => Ok((EmbeddingModel::NomicEmbedTextV15, 768)),
        _ => Err(Error::Config(format!("Unsupported local embedding model: {}", name))),
    }
}

/// Embeddings from a local transformer model (ONNX, via fastembed)
pub struct FastEmbedProvider {
    model_name: String,
    dimension: usize,
    model: Arc<TextEmbedding>,
}

impl FastEmbedProvider {
    /// Load a model by name, downloading it on first use
    pub fn new(model_name: &str) -> Result<Self> {
        let (model, dimension) = resolve_model(model_name)?;

        let mut options = InitOptions::default();
        options.model_name = model;
        options.show_download_progress = true;

        let model = TextEmbedding::try_new(options)
            .map_err(|e| Error::Config(format!("Failed to load embedding model {}: {}", model_name, e)))?;

        Ok(Self {
            model_name: model_name.to_string(),
            dimension,
            model: Arc::new(model),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let model = Arc::clone(&self.model);
        let inputs = texts.to_vec();

        // Inference is CPU bound; keep it off the async workers
        tokio::task::spawn_blocking(move || model.embed(inputs, None))
            .await
            .map_err(|e| Error::EmbeddingUnavailable(format!("Embedding task aborted: {}", e)))?
            .map_err(|e| Error::Embedding(format!("Embedding generation failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_model() {
        assert_eq!(resolve_model("all-MiniLM-L6-v2").unwrap().1, 384);
        assert_eq!(resolve_model("bge-base-en-v1.5").unwrap().1, 768);
        assert!(matches!(resolve_model("gpt-embedder"), Err(Error::Config(_))));
    }
}
