//! Canonical records - entities, relations and source documents
//!
//! These are the validated shapes produced by the loader and written by the
//! import orchestrator. Embedding vectors are derived data and never live on
//! the records themselves.

use crate::key::RecordKey;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Entity type used when the source does not name one
pub const UNKNOWN_ENTITY_TYPE: &str = "UNKNOWN";

/// A named node of the knowledge graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identifier, unique across the graph
    pub entity_id: String,
    /// Type label (person, organization, ...)
    pub entity_type: String,
    /// Free-text description, the embedding source
    pub description: String,
    /// Document this entity was extracted from
    pub source_id: Option<String>,
}

impl Entity {
    pub fn new(entity_id: impl Into<String>, entity_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_type: entity_type.into(),
            description: description.into(),
            source_id: None,
        }
    }

    pub fn key(&self, namespace: &str) -> RecordKey {
        RecordKey::entity(namespace, &self.entity_id)
    }

    /// Text submitted for embedding
    pub fn embedding_text(&self) -> String {
        if self.description.trim().is_empty() {
            format!("{} ({})", self.entity_id, self.entity_type)
        } else {
            self.description.clone()
        }
    }
}

fn default_weight() -> f32 {
    1.0
}

fn default_directed() -> bool {
    true
}

/// An edge between two entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub source_id: String,
    pub target_id: String,
    pub description: String,
    pub keywords: Option<String>,
    /// Weight / confidence, 1.0 when the source omits it
    #[serde(default = "default_weight")]
    pub weight: f32,
    #[serde(default = "default_directed")]
    pub directed: bool,
    /// Document this relation was extracted from
    pub source_chunk: Option<String>,
}

impl Relation {
    pub fn new(source_id: impl Into<String>, target_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            description: description.into(),
            keywords: None,
            weight: default_weight(),
            directed: true,
            source_chunk: None,
        }
    }

    pub fn key(&self, namespace: &str) -> RecordKey {
        RecordKey::relation(namespace, &self.source_id, &self.target_id, self.directed)
    }

    /// Text submitted for embedding
    pub fn embedding_text(&self) -> String {
        if !self.description.trim().is_empty() {
            return self.description.clone();
        }
        match &self.keywords {
            Some(keywords) if !keywords.trim().is_empty() => {
                format!("{} -> {}: {}", self.source_id, self.target_id, keywords)
            }
            _ => format!("{} -> {}", self.source_id, self.target_id),
        }
    }
}

/// A source document (text chunk) the graph was extracted from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub content: String,
    pub file_path: Option<String>,
}

impl Document {
    pub fn new(document_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            content: content.into(),
            file_path: None,
        }
    }

    pub fn key(&self, namespace: &str) -> RecordKey {
        RecordKey::document(namespace, &self.document_id)
    }

    /// Deterministic id derived from content, used when the source has none
    pub fn content_id(content: &str) -> String {
        let hash = blake3::hash(content.as_bytes()).to_hex();
        format!("doc-{}", &hash.as_str()[..16])
    }
}

/// Processing status of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocStatus::Pending => "pending",
            DocStatus::Processing => "processing",
            DocStatus::Completed => "completed",
            DocStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DocStatus::Completed | DocStatus::Failed)
    }
}

impl FromStr for DocStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(DocStatus::Pending),
            "processing" => Ok(DocStatus::Processing),
            "completed" | "processed" => Ok(DocStatus::Completed),
            "failed" => Ok(DocStatus::Failed),
            _ => Err(Error::Parse(format!("Unknown document status: {}", s))),
        }
    }
}

impl std::fmt::Display for DocStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status record kept by the KV store for each document.
///
/// Stores keep `created_at` from the first write; later writes only move
/// `status`, `updated_at` and `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentStatus {
    pub status: DocStatus,
    pub content_length: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl DocumentStatus {
    pub fn new(status: DocStatus, content_length: usize) -> Self {
        let now = Utc::now();
        Self {
            status,
            content_length,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    pub fn failed(content_length: usize, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(DocStatus::Failed, content_length)
        }
    }
}
