use std::sync::{Arc, OnceLock};
use tracing::{debug, info};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::{Error, Result};
use super::EmbeddingProvider;

/// Default number of texts per provider request
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Batching, retrying front for an [`EmbeddingProvider`].
///
/// The first vector seen (or the provider's declared dimension) fixes the
/// dimension for the lifetime of the embedder; any later deviation is a
/// fatal [`Error::DimensionMismatch`].
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    retry: RetryPolicy,
    dimension: OnceLock<usize>,
}

impl Embedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize, retry: RetryPolicy) -> Self {
        let dimension = OnceLock::new();
        if let Some(dim) = provider.dimension() {
            let _ = dimension.set(dim);
        }

        Self {
            provider,
            batch_size: batch_size.max(1),
            retry,
            dimension,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Identity of the model behind the vectors: provider name plus its
    /// declared dimension. Stored hashes include it so a model switch
    /// never reuses old vectors.
    pub fn model_id(&self) -> String {
        match self.provider.dimension() {
            Some(dim) => format!("{}:{}", self.provider.name(), dim),
            None => self.provider.name().to_string(),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Dimension fixed so far, if any
    pub fn dimension(&self) -> Option<usize> {
        self.dimension.get().copied()
    }

    /// Embed one short text to check that the provider is reachable
    pub async fn warm_up(&self) -> Result<usize> {
        let vectors = self.embed_batch(&["test".to_string()]).await?;
        let dim = vectors.first().map(Vec::len).unwrap_or(0);
        info!("Embedding provider {} is reachable (dimension {})", self.provider.name(), dim);
        Ok(dim)
    }

    /// Embed one batch (at most `batch_size` texts) with retry
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        if texts.len() > self.batch_size {
            return Err(Error::Embedding(format!(
                "batch of {} exceeds the configured maximum of {}",
                texts.len(),
                self.batch_size
            )));
        }

        let label = format!("embed[{}]", self.provider.name());
        let vectors = retry_with_backoff(&self.retry, &label, || self.provider.embed(texts)).await?;

        if vectors.len() != texts.len() {
            return Err(Error::Embedding(format!(
                "provider returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        for vector in &vectors {
            self.check_dimension(vector.len())?;
        }

        debug!("Embedded batch of {}", texts.len());
        Ok(vectors)
    }

    /// Embed any number of texts, batch after batch
    pub async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_batch(chunk).await?);
        }
        Ok(vectors)
    }

    fn check_dimension(&self, actual: usize) -> Result<()> {
        let expected = *self.dimension.get_or_init(|| actual);
        if expected != actual {
            return Err(Error::DimensionMismatch { expected, actual });
        }
        Ok(())
    }
}
