use async_trait::async_trait;
use crate::Result;

/// Capability: given a batch of texts, return one vector per text.
///
/// Implementations return vectors in input order. Unreachable services
/// report [`crate::Error::EmbeddingUnavailable`] so callers can retry.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name (for display)
    fn name(&self) -> &str;

    /// Vector dimension, when known before the first call
    fn dimension(&self) -> Option<usize>;

    /// Embed a batch of texts
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}
