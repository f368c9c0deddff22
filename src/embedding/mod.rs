//! Embedding Provider Adapter
//!
//! Providers turn text into fixed-length vectors. The [`Embedder`] sits in
//! front of a provider and adds batching, retry and dimension checks.

pub mod provider;
pub mod local;
pub mod ollama;
pub mod batcher;

pub use provider::EmbeddingProvider;
pub use local::FastEmbedProvider;
pub use ollama::OllamaProvider;
pub use batcher::Embedder;
