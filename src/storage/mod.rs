//! Storage Layer - three backend roles behind one write contract
//!
//! - KV store: full records plus document status
//! - Vector store: one vector per record key, cosine search
//! - Graph store: entity nodes and relation edges
//!
//! Every role implements [`BackendAdapter`] (`upsert`, `exists`, `clear`,
//! `count`) so the import orchestrator drives them uniformly. Engines are
//! chosen per role: in-memory or SQLite.

pub mod schema;
pub mod sqlite;
pub mod memory;

use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::key::{RecordKey, RecordKind};
use crate::lease::{LeaseStore, MemoryLeaseStore, SqliteLeaseStore};
use crate::model::{Document, DocumentStatus, Entity, Relation};
use crate::{Error, Result};

pub use sqlite::{SqliteStore, SqliteKvStore, SqliteVectorStore, SqliteGraphStore, DbStats};
pub use memory::{MemoryKvStore, MemoryVectorStore, MemoryGraphStore};

/// A canonical record as handed to the backends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Record {
    Document(Document),
    Entity(Entity),
    Relation(Relation),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Document(_) => RecordKind::Document,
            Record::Entity(_) => RecordKind::Entity,
            Record::Relation(_) => RecordKind::Relation,
        }
    }

    /// Text the record is embedded from
    pub fn text(&self) -> String {
        match self {
            Record::Document(d) => d.content.clone(),
            Record::Entity(e) => e.embedding_text(),
            Record::Relation(r) => r.embedding_text(),
        }
    }
}

/// Semantic payload of one write: the record, and its vector when the
/// target is a vector store
#[derive(Debug, Clone)]
pub struct Payload {
    pub record: Record,
    pub vector: Option<Vec<f32>>,
    /// blake3 hash of the embedded text
    pub content_hash: Option<String>,
}

impl Payload {
    pub fn record(record: Record) -> Self {
        Self {
            record,
            vector: None,
            content_hash: None,
        }
    }

    pub fn with_vector(record: Record, vector: Vec<f32>, content_hash: String) -> Self {
        Self {
            record,
            vector: Some(vector),
            content_hash: Some(content_hash),
        }
    }
}

/// Uniform write contract shared by every backend role
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Backend name (for reports and logs)
    fn backend(&self) -> &str;

    /// Insert or update the record stored under `key`
    async fn upsert(&self, key: &RecordKey, payload: &Payload) -> Result<()>;

    /// Whether a record exists under `key`
    async fn exists(&self, key: &RecordKey) -> Result<bool>;

    /// Remove every record of a namespace
    async fn clear(&self, namespace: &str) -> Result<()>;

    /// Number of records of a kind in a namespace
    async fn count(&self, namespace: &str, kind: RecordKind) -> Result<usize>;
}

/// Document/KV role: full records and document status
#[async_trait]
pub trait KvStore: BackendAdapter {
    /// Stored record, as JSON
    async fn get(&self, key: &RecordKey) -> Result<Option<serde_json::Value>>;

    /// Write a document status. `created_at` of an existing status is kept.
    async fn set_status(&self, key: &RecordKey, status: &DocumentStatus) -> Result<()>;

    async fn get_status(&self, key: &RecordKey) -> Result<Option<DocumentStatus>>;
}

/// A scored vector search hit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorMatch {
    pub key: RecordKey,
    pub score: f32,
}

/// Vector index role
#[async_trait]
pub trait VectorStore: BackendAdapter {
    /// Top `k` keys of a namespace by cosine similarity to `query`
    async fn search(&self, namespace: &str, query: &[f32], k: usize) -> Result<Vec<VectorMatch>>;

    async fn get_vector(&self, key: &RecordKey) -> Result<Option<Vec<f32>>>;

    /// Hash of the text the stored vector was computed from
    async fn content_hash(&self, key: &RecordKey) -> Result<Option<String>>;
}

/// Entity node as stored by a graph store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub key: RecordKey,
    pub entity_type: String,
    pub description: String,
    pub source_id: Option<String>,
}

/// Relation edge as stored by a graph store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub key: RecordKey,
    pub source: RecordKey,
    pub target: RecordKey,
    pub description: String,
    pub keywords: Option<String>,
    pub weight: f32,
    pub directed: bool,
}

impl GraphEdge {
    /// Whether this edge connects `source` to `target`
    pub fn connects(&self, source: &RecordKey, target: &RecordKey) -> bool {
        (&self.source == source && &self.target == target)
            || (!self.directed && &self.source == target && &self.target == source)
    }
}

/// Graph role. Edge upserts fail when either endpoint node is missing.
#[async_trait]
pub trait GraphStore: BackendAdapter {
    async fn get_node(&self, key: &RecordKey) -> Result<Option<GraphNode>>;

    async fn get_edge(&self, namespace: &str, source_id: &str, target_id: &str) -> Result<Option<GraphEdge>>;

    /// Remove nodes and edges of a namespace whose keys are not in `keep`,
    /// plus edges left without an endpoint. Returns the number removed.
    async fn prune(&self, namespace: &str, keep: &HashSet<RecordKey>) -> Result<usize>;
}

/// Storage engine for one role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Memory,
    Sqlite,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Memory => "memory",
            Engine::Sqlite => "sqlite",
        }
    }
}

impl FromStr for Engine {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "memory" | "mem" => Ok(Engine::Memory),
            "sqlite" => Ok(Engine::Sqlite),
            _ => Err(Error::Config(format!("Unknown storage engine: {}", s))),
        }
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Engine selection per role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSelection {
    pub kv: Engine,
    pub vector: Engine,
    pub graph: Engine,
}

impl Default for EngineSelection {
    fn default() -> Self {
        Self {
            kv: Engine::Sqlite,
            vector: Engine::Sqlite,
            graph: Engine::Sqlite,
        }
    }
}

/// The opened backends of one deployment
#[derive(Clone)]
pub struct Backends {
    pub kv: Arc<dyn KvStore>,
    pub vectors: Arc<dyn VectorStore>,
    pub graph: Arc<dyn GraphStore>,
    pub leases: Arc<dyn LeaseStore>,
}

impl Backends {
    /// All roles in memory
    pub fn memory() -> Self {
        Self {
            kv: Arc::new(MemoryKvStore::default()),
            vectors: Arc::new(MemoryVectorStore::default()),
            graph: Arc::new(MemoryGraphStore::default()),
            leases: Arc::new(MemoryLeaseStore::default()),
        }
    }

    /// Open the selected engines. SQLite roles share one database file,
    /// which also holds the namespace leases.
    pub fn open(selection: EngineSelection, database: &Path) -> Result<Self> {
        let uses_sqlite = [selection.kv, selection.vector, selection.graph].contains(&Engine::Sqlite);
        let store = if uses_sqlite {
            Some(Arc::new(SqliteStore::open(database)?))
        } else {
            None
        };
        Ok(Self::assemble(selection, store))
    }

    /// Like [`Backends::open`] with an in-memory SQLite database
    pub fn open_in_memory(selection: EngineSelection) -> Result<Self> {
        Ok(Self::assemble(selection, Some(Arc::new(SqliteStore::open_in_memory()?))))
    }

    fn assemble(selection: EngineSelection, store: Option<Arc<SqliteStore>>) -> Self {
        let kv: Arc<dyn KvStore> = match (&store, selection.kv) {
            (Some(s), Engine::Sqlite) => Arc::new(SqliteKvStore::new(Arc::clone(s))),
            _ => Arc::new(MemoryKvStore::default()),
        };
        let vectors: Arc<dyn VectorStore> = match (&store, selection.vector) {
            (Some(s), Engine::Sqlite) => Arc::new(SqliteVectorStore::new(Arc::clone(s))),
            _ => Arc::new(MemoryVectorStore::default()),
        };
        let graph: Arc<dyn GraphStore> = match (&store, selection.graph) {
            (Some(s), Engine::Sqlite) => Arc::new(SqliteGraphStore::new(Arc::clone(s))),
            _ => Arc::new(MemoryGraphStore::default()),
        };
        let leases: Arc<dyn LeaseStore> = match store {
            Some(s) => Arc::new(SqliteLeaseStore::new(s)),
            None => Arc::new(MemoryLeaseStore::default()),
        };

        Self { kv, vectors, graph, leases }
    }
}

/// Cosine similarity of two vectors; 0.0 for mismatched or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

/// Sort matches by score, best first, and keep the top `k`
pub(crate) fn rank(mut matches: Vec<VectorMatch>, k: usize) -> Vec<VectorMatch> {
    matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    matches.truncate(k);
    matches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_record_serializes_with_kind_tag() {
        let record = Record::Entity(Entity::new("A", "PERSON", "a"));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "entity");
        assert_eq!(json["entity_id"], "A");

        let back: Record = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_engine_parse() {
        assert_eq!("SQLite".parse::<Engine>().unwrap(), Engine::Sqlite);
        assert_eq!("memory".parse::<Engine>().unwrap(), Engine::Memory);
        assert!(matches!("neo4j".parse::<Engine>(), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_mixed_engines_share_lease_store() {
        let selection = EngineSelection {
            kv: Engine::Memory,
            vector: Engine::Sqlite,
            graph: Engine::Sqlite,
        };
        let backends = Backends::open_in_memory(selection).unwrap();
        assert_eq!(backends.kv.backend(), "memory-kv");
        assert_eq!(backends.vectors.backend(), "sqlite-vector");
        assert_eq!(backends.graph.backend(), "sqlite-graph");
    }
}
