//! # kgsync - Knowledge-Graph Import Pipeline
//!
//! Synchronizes an external knowledge-graph description into three storage
//! roles that a retrieval engine reads afterward.
//!
//! kgsync provides:
//! - A validating loader producing an immutable canonical graph
//! - Deterministic record keys shared by every backend
//! - Pluggable KV, vector and graph stores (in-memory and SQLite)
//! - Batched, retried embedding through local or remote providers
//! - An import orchestrator with ordered write phases, per-record status,
//!   post-write verification and namespace leases

pub mod key;
pub mod model;
pub mod graph;
pub mod loader;
pub mod retry;
pub mod embedding;
pub mod storage;
pub mod lease;
pub mod import;
pub mod config;
pub mod ui;

// Re-exports for convenient access
pub use key::{RecordKey, RecordKind};
pub use model::{Document, DocumentStatus, Entity, Relation, DocStatus};
pub use graph::CanonicalGraph;
pub use loader::GraphLoader;
pub use import::{ImportOrchestrator, ImportOptions, ImportReport, RunState};

/// Result type alias for kgsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for kgsync operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Write to {backend} failed for {key}: {message}")]
    BackendWrite {
        backend: String,
        key: String,
        message: String,
        transient: bool,
    },

    #[error("Run in progress: namespace '{namespace}' is held by run {holder}")]
    RunInProgress { namespace: String, holder: String },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Import cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether retrying the failed operation may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Error::EmbeddingUnavailable(_) => true,
            Error::BackendWrite { transient, .. } => *transient,
            _ => false,
        }
    }

    /// Short machine-readable name used in reports
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Parse(_) => "parse",
            Error::InvalidKey(_) => "invalid_key",
            Error::EmbeddingUnavailable(_) => "embedding_unavailable",
            Error::Embedding(_) => "embedding",
            Error::DimensionMismatch { .. } => "dimension_mismatch",
            Error::BackendWrite { .. } => "backend_write",
            Error::RunInProgress { .. } => "run_in_progress",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::Config(_) => "config",
            Error::Cancelled => "cancelled",
            Error::Storage(_) => "storage",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Toml(_) => "toml",
        }
    }

    /// Build a backend write error
    pub fn backend_write(
        backend: impl Into<String>,
        key: impl std::fmt::Display,
        message: impl Into<String>,
        transient: bool,
    ) -> Self {
        Error::BackendWrite {
            backend: backend.into(),
            key: key.to_string(),
            message: message.into(),
            transient,
        }
    }
}
