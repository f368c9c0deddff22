//! SQLite storage implementation
//!
//! One [`SqliteStore`] owns the connection; the role adapters
//! ([`SqliteKvStore`], [`SqliteVectorStore`], [`SqliteGraphStore`]) share it.

use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use crate::key::{RecordKey, RecordKind};
use crate::model::{DocStatus, DocumentStatus};
use crate::{Error, Result};
use super::{
    rank, cosine_similarity, schema, BackendAdapter, GraphEdge, GraphNode, GraphStore, KvStore,
    Payload, Record, VectorMatch, VectorStore,
};

/// How long a writer waits on a locked database before reporting busy
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite database shared by the role adapters
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let store = Self { conn: Mutex::new(conn) };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn: Mutex::new(conn) };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Initialize the database schema
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        for stmt in schema::all_schema_statements() {
            conn.execute(stmt, [])?;
        }
        Ok(())
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::backend_write("sqlite", "<connection>", "connection lock poisoned", false))
    }

    /// Get per-namespace statistics
    pub fn stats(&self, namespace: &str) -> Result<DbStats> {
        let conn = self.lock()?;
        let count = |table: &str| -> Result<usize> {
            let sql = format!("SELECT COUNT(*) FROM {} WHERE namespace = ?1", table);
            let n: i64 = conn.query_row(&sql, [namespace], |row| row.get(0))?;
            Ok(n as usize)
        };

        Ok(DbStats {
            namespace: namespace.to_string(),
            kv_records: count("kv_records")?,
            documents: count("doc_status")?,
            vectors: count("vectors")?,
            nodes: count("graph_nodes")?,
            edges: count("graph_edges")?,
            leases: count("run_leases")?,
        })
    }
}

/// Map a write failure; a busy or locked database is worth retrying
fn write_error(backend: &str, key: &RecordKey, err: rusqlite::Error) -> Error {
    let transient = matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    );
    Error::backend_write(backend, key, err.to_string(), transient)
}

fn now_string() -> String {
    Utc::now().to_rfc3339()
}

fn conversion_error(column: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

fn parse_time(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(column, e))
}

fn parse_key(column: usize, value: &str) -> rusqlite::Result<RecordKey> {
    RecordKey::parse(value).map_err(|e| conversion_error(column, e))
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn count_where(conn: &Connection, table: &str, namespace: &str, kind: RecordKind) -> Result<usize> {
    let sql = format!("SELECT COUNT(*) FROM {} WHERE namespace = ?1 AND kind = ?2", table);
    let n: i64 = conn.query_row(&sql, params![namespace, kind.as_str()], |row| row.get(0))?;
    Ok(n as usize)
}

// ========== KV ==========

/// KV role on SQLite
pub struct SqliteKvStore {
    store: Arc<SqliteStore>,
}

impl SqliteKvStore {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }

    /// Helper to convert a row to a DocumentStatus
    fn row_to_status(row: &rusqlite::Row) -> rusqlite::Result<DocumentStatus> {
        let status_str: String = row.get(0)?;
        let created: String = row.get(2)?;
        let updated: String = row.get(3)?;

        let status = DocStatus::from_str(&status_str).map_err(|e| conversion_error(0, e))?;
        let content_length: i64 = row.get(1)?;

        Ok(DocumentStatus {
            status,
            content_length: content_length as usize,
            created_at: parse_time(2, &created)?,
            updated_at: parse_time(3, &updated)?,
            error: row.get(4)?,
        })
    }
}

#[async_trait]
impl BackendAdapter for SqliteKvStore {
    fn backend(&self) -> &str {
        "sqlite-kv"
    }

    async fn upsert(&self, key: &RecordKey, payload: &Payload) -> Result<()> {
        let json = serde_json::to_string(&payload.record)?;
        let conn = self.store.lock()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO kv_records (namespace, key, kind, payload, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                key.namespace,
                key.to_key_string(),
                key.kind.as_str(),
                json,
                now_string(),
            ],
        )
        .map_err(|e| write_error(self.backend(), key, e))?;
        Ok(())
    }

    async fn exists(&self, key: &RecordKey) -> Result<bool> {
        let conn = self.store.lock()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM kv_records WHERE namespace = ?1 AND key = ?2",
                params![key.namespace, key.to_key_string()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    async fn clear(&self, namespace: &str) -> Result<()> {
        let conn = self.store.lock()?;
        conn.execute("DELETE FROM kv_records WHERE namespace = ?1", [namespace])?;
        conn.execute("DELETE FROM doc_status WHERE namespace = ?1", [namespace])?;
        Ok(())
    }

    async fn count(&self, namespace: &str, kind: RecordKind) -> Result<usize> {
        let conn = self.store.lock()?;
        count_where(&conn, "kv_records", namespace, kind)
    }
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn get(&self, key: &RecordKey) -> Result<Option<serde_json::Value>> {
        let payload: Option<String> = {
            let conn = self.store.lock()?;
            conn.query_row(
                "SELECT payload FROM kv_records WHERE namespace = ?1 AND key = ?2",
                params![key.namespace, key.to_key_string()],
                |row| row.get(0),
            )
            .optional()?
        };

        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set_status(&self, key: &RecordKey, status: &DocumentStatus) -> Result<()> {
        let conn = self.store.lock()?;
        conn.execute(
            r#"
            INSERT INTO doc_status (namespace, key, status, content_length, created_at, updated_at, error)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(namespace, key) DO UPDATE SET
                status = excluded.status,
                content_length = excluded.content_length,
                updated_at = excluded.updated_at,
                error = excluded.error
            "#,
            params![
                key.namespace,
                key.to_key_string(),
                status.status.as_str(),
                status.content_length as i64,
                status.created_at.to_rfc3339(),
                status.updated_at.to_rfc3339(),
                status.error,
            ],
        )
        .map_err(|e| write_error(self.backend(), key, e))?;
        Ok(())
    }

    async fn get_status(&self, key: &RecordKey) -> Result<Option<DocumentStatus>> {
        let conn = self.store.lock()?;
        conn.query_row(
            "SELECT status, content_length, created_at, updated_at, error FROM doc_status WHERE namespace = ?1 AND key = ?2",
            params![key.namespace, key.to_key_string()],
            Self::row_to_status,
        )
        .optional()
        .map_err(Into::into)
    }
}

// ========== Vectors ==========

/// Vector role on SQLite; brute-force cosine search
pub struct SqliteVectorStore {
    store: Arc<SqliteStore>,
}

impl SqliteVectorStore {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BackendAdapter for SqliteVectorStore {
    fn backend(&self) -> &str {
        "sqlite-vector"
    }

    async fn upsert(&self, key: &RecordKey, payload: &Payload) -> Result<()> {
        let vector = payload
            .vector
            .as_deref()
            .ok_or_else(|| Error::backend_write(self.backend(), key, "payload carries no vector", false))?;

        let conn = self.store.lock()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO vectors (namespace, key, kind, content_hash, dimension, vector)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                key.namespace,
                key.to_key_string(),
                payload.record.kind().as_str(),
                payload.content_hash,
                vector.len() as i64,
                encode_vector(vector),
            ],
        )
        .map_err(|e| write_error(self.backend(), key, e))?;
        Ok(())
    }

    async fn exists(&self, key: &RecordKey) -> Result<bool> {
        let conn = self.store.lock()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM vectors WHERE namespace = ?1 AND key = ?2",
                params![key.namespace, key.to_key_string()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    async fn clear(&self, namespace: &str) -> Result<()> {
        let conn = self.store.lock()?;
        conn.execute("DELETE FROM vectors WHERE namespace = ?1", [namespace])?;
        Ok(())
    }

    async fn count(&self, namespace: &str, kind: RecordKind) -> Result<usize> {
        let conn = self.store.lock()?;
        count_where(&conn, "vectors", namespace, kind)
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn search(&self, namespace: &str, query: &[f32], k: usize) -> Result<Vec<VectorMatch>> {
        let conn = self.store.lock()?;
        let mut stmt = conn.prepare("SELECT key, vector FROM vectors WHERE namespace = ?1")?;

        // Fetch all candidates
        let candidates = stmt.query_map([namespace], |row| {
            let key_str: String = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            Ok((parse_key(0, &key_str)?, decode_vector(&blob)))
        })?;

        let mut matches = Vec::new();
        for candidate in candidates {
            let (key, vector) = candidate?;
            matches.push(VectorMatch {
                score: cosine_similarity(query, &vector),
                key,
            });
        }

        Ok(rank(matches, k))
    }

    async fn get_vector(&self, key: &RecordKey) -> Result<Option<Vec<f32>>> {
        let conn = self.store.lock()?;
        let blob: Option<Vec<u8>> = conn
            .query_row(
                "SELECT vector FROM vectors WHERE namespace = ?1 AND key = ?2",
                params![key.namespace, key.to_key_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(blob.map(|b| decode_vector(&b)))
    }

    async fn content_hash(&self, key: &RecordKey) -> Result<Option<String>> {
        let conn = self.store.lock()?;
        let hash: Option<Option<String>> = conn
            .query_row(
                "SELECT content_hash FROM vectors WHERE namespace = ?1 AND key = ?2",
                params![key.namespace, key.to_key_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash.flatten())
    }
}

// ========== Graph ==========

/// Graph role on SQLite
pub struct SqliteGraphStore {
    store: Arc<SqliteStore>,
}

impl SqliteGraphStore {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }

    fn node_exists(conn: &Connection, key: &RecordKey) -> rusqlite::Result<bool> {
        conn.query_row(
            "SELECT 1 FROM graph_nodes WHERE namespace = ?1 AND key = ?2",
            params![key.namespace, key.to_key_string()],
            |_| Ok(()),
        )
        .optional()
        .map(|found| found.is_some())
    }

    /// Helper to convert a row to a GraphEdge
    fn row_to_edge(row: &rusqlite::Row) -> rusqlite::Result<GraphEdge> {
        let key: String = row.get(0)?;
        let source: String = row.get(1)?;
        let target: String = row.get(2)?;
        let directed: i64 = row.get(6)?;

        Ok(GraphEdge {
            key: parse_key(0, &key)?,
            source: parse_key(1, &source)?,
            target: parse_key(2, &target)?,
            description: row.get(3)?,
            keywords: row.get(4)?,
            weight: row.get(5)?,
            directed: directed != 0,
        })
    }
}

#[async_trait]
impl BackendAdapter for SqliteGraphStore {
    fn backend(&self) -> &str {
        "sqlite-graph"
    }

    async fn upsert(&self, key: &RecordKey, payload: &Payload) -> Result<()> {
        let conn = self.store.lock()?;
        match &payload.record {
            Record::Entity(entity) => {
                conn.execute(
                    r#"
                    INSERT OR REPLACE INTO graph_nodes (namespace, key, entity_type, description, source_id)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    "#,
                    params![
                        key.namespace,
                        key.to_key_string(),
                        entity.entity_type,
                        entity.description,
                        entity.source_id,
                    ],
                )
                .map_err(|e| write_error(self.backend(), key, e))?;
            }
            Record::Relation(relation) => {
                let source = RecordKey::entity(&key.namespace, &relation.source_id);
                let target = RecordKey::entity(&key.namespace, &relation.target_id);
                for endpoint in [&source, &target] {
                    let present = Self::node_exists(&conn, endpoint)
                        .map_err(|e| write_error(self.backend(), key, e))?;
                    if !present {
                        return Err(Error::backend_write(
                            self.backend(),
                            key,
                            format!("missing endpoint node {}", endpoint),
                            false,
                        ));
                    }
                }

                conn.execute(
                    r#"
                    INSERT OR REPLACE INTO graph_edges
                        (namespace, key, source_key, target_key, description, keywords, weight, directed)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    "#,
                    params![
                        key.namespace,
                        key.to_key_string(),
                        source.to_key_string(),
                        target.to_key_string(),
                        relation.description,
                        relation.keywords,
                        relation.weight,
                        relation.directed as i64,
                    ],
                )
                .map_err(|e| write_error(self.backend(), key, e))?;
            }
            Record::Document(_) => {
                return Err(Error::backend_write(
                    self.backend(),
                    key,
                    "graph store does not hold documents",
                    false,
                ));
            }
        }
        Ok(())
    }

    async fn exists(&self, key: &RecordKey) -> Result<bool> {
        let conn = self.store.lock()?;
        let table = match key.kind {
            RecordKind::Entity => "graph_nodes",
            RecordKind::Relation => "graph_edges",
            RecordKind::Document => return Ok(false),
        };
        let sql = format!("SELECT 1 FROM {} WHERE namespace = ?1 AND key = ?2", table);
        let found = conn
            .query_row(&sql, params![key.namespace, key.to_key_string()], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    async fn clear(&self, namespace: &str) -> Result<()> {
        let conn = self.store.lock()?;
        conn.execute("DELETE FROM graph_edges WHERE namespace = ?1", [namespace])?;
        conn.execute("DELETE FROM graph_nodes WHERE namespace = ?1", [namespace])?;
        Ok(())
    }

    async fn count(&self, namespace: &str, kind: RecordKind) -> Result<usize> {
        let conn = self.store.lock()?;
        let table = match kind {
            RecordKind::Entity => "graph_nodes",
            RecordKind::Relation => "graph_edges",
            RecordKind::Document => return Ok(0),
        };
        let sql = format!("SELECT COUNT(*) FROM {} WHERE namespace = ?1", table);
        let n: i64 = conn.query_row(&sql, [namespace], |row| row.get(0))?;
        Ok(n as usize)
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn get_node(&self, key: &RecordKey) -> Result<Option<GraphNode>> {
        let conn = self.store.lock()?;
        conn.query_row(
            "SELECT entity_type, description, source_id FROM graph_nodes WHERE namespace = ?1 AND key = ?2",
            params![key.namespace, key.to_key_string()],
            |row| {
                Ok(GraphNode {
                    key: key.clone(),
                    entity_type: row.get(0)?,
                    description: row.get(1)?,
                    source_id: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    async fn get_edge(&self, namespace: &str, source_id: &str, target_id: &str) -> Result<Option<GraphEdge>> {
        let source = RecordKey::entity(namespace, source_id).to_key_string();
        let target = RecordKey::entity(namespace, target_id).to_key_string();

        let conn = self.store.lock()?;
        conn.query_row(
            r#"
            SELECT key, source_key, target_key, description, keywords, weight, directed
            FROM graph_edges
            WHERE namespace = ?1
              AND ((source_key = ?2 AND target_key = ?3)
                   OR (directed = 0 AND source_key = ?3 AND target_key = ?2))
            LIMIT 1
            "#,
            params![namespace, source, target],
            Self::row_to_edge,
        )
        .optional()
        .map_err(Into::into)
    }

    async fn prune(&self, namespace: &str, keep: &HashSet<RecordKey>) -> Result<usize> {
        let mut conn = self.store.lock()?;
        let tx = conn.transaction()?;
        let mut removed = 0;

        let node_keys: Vec<String> = {
            let mut stmt = tx.prepare("SELECT key FROM graph_nodes WHERE namespace = ?1")?;
            let rows = stmt.query_map([namespace], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };
        let mut surviving = HashSet::new();
        for key_str in node_keys {
            let key = RecordKey::parse(&key_str)?;
            if keep.contains(&key) {
                surviving.insert(key_str);
            } else {
                removed += tx.execute(
                    "DELETE FROM graph_nodes WHERE namespace = ?1 AND key = ?2",
                    params![namespace, key_str],
                )?;
            }
        }

        let edges: Vec<(String, String, String)> = {
            let mut stmt = tx.prepare("SELECT key, source_key, target_key FROM graph_edges WHERE namespace = ?1")?;
            let rows = stmt.query_map([namespace], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
            rows.collect::<rusqlite::Result<_>>()?
        };
        for (key_str, source, target) in edges {
            let key = RecordKey::parse(&key_str)?;
            let orphaned = !surviving.contains(&source) || !surviving.contains(&target);
            if orphaned || !keep.contains(&key) {
                removed += tx.execute(
                    "DELETE FROM graph_edges WHERE namespace = ?1 AND key = ?2",
                    params![namespace, key_str],
                )?;
            }
        }

        tx.commit()?;
        Ok(removed)
    }
}

/// Database statistics for one namespace
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub namespace: String,
    pub kv_records: usize,
    pub documents: usize,
    pub vectors: usize,
    pub nodes: usize,
    pub edges: usize,
    pub leases: usize,
}

impl std::fmt::Display for DbStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Namespace '{}':", self.namespace)?;
        writeln!(f, "  KV records: {}", self.kv_records)?;
        writeln!(f, "  Document statuses: {}", self.documents)?;
        writeln!(f, "  Vectors: {}", self.vectors)?;
        writeln!(f, "  Graph nodes: {}", self.nodes)?;
        writeln!(f, "  Graph edges: {}", self.edges)?;
        writeln!(f, "  Active leases: {}", self.leases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Document, Entity, Relation};

    fn store() -> Arc<SqliteStore> {
        Arc::new(SqliteStore::open_in_memory().unwrap())
    }

    fn entity(id: &str) -> (RecordKey, Payload) {
        let entity = Entity::new(id, "PERSON", format!("{} description", id));
        (entity.key("ns"), Payload::record(Record::Entity(entity)))
    }

    #[tokio::test]
    async fn test_kv_record_crud() {
        let kv = SqliteKvStore::new(store());
        let doc = Document::new("d1", "hello");
        let key = doc.key("ns");

        kv.upsert(&key, &Payload::record(Record::Document(doc.clone()))).await.unwrap();
        // Upsert twice, still one record
        kv.upsert(&key, &Payload::record(Record::Document(doc))).await.unwrap();

        assert!(kv.exists(&key).await.unwrap());
        assert_eq!(kv.count("ns", RecordKind::Document).await.unwrap(), 1);
        let stored = kv.get(&key).await.unwrap().unwrap();
        assert_eq!(stored["content"], "hello");
    }

    #[tokio::test]
    async fn test_status_preserves_created_at() {
        let kv = SqliteKvStore::new(store());
        let key = RecordKey::document("ns", "d1");

        let pending = DocumentStatus::new(DocStatus::Pending, 5);
        kv.set_status(&key, &pending).await.unwrap();

        let mut failed = DocumentStatus::failed(5, "boom");
        failed.created_at = failed.created_at + chrono::Duration::seconds(30);
        kv.set_status(&key, &failed).await.unwrap();

        let stored = kv.get_status(&key).await.unwrap().unwrap();
        assert_eq!(stored.status, DocStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("boom"));
        assert_eq!(stored.created_at.timestamp(), pending.created_at.timestamp());
    }

    #[tokio::test]
    async fn test_vector_roundtrip_and_search() {
        let vectors = SqliteVectorStore::new(store());
        let (key_a, payload_a) = entity("A");
        let (key_b, payload_b) = entity("B");

        vectors
            .upsert(&key_a, &Payload::with_vector(payload_a.record, vec![0.1, 0.2, 0.3, 0.4], "ha".into()))
            .await
            .unwrap();
        vectors
            .upsert(&key_b, &Payload::with_vector(payload_b.record, vec![-0.4, 0.0, 0.0, 0.1], "hb".into()))
            .await
            .unwrap();

        let stored = vectors.get_vector(&key_a).await.unwrap().unwrap();
        assert_eq!(stored.len(), 4);
        assert!((stored[0] - 0.1).abs() < 0.001);

        let hits = vectors.search("ns", &[0.1, 0.2, 0.3, 0.4], 2).await.unwrap();
        assert_eq!(hits[0].key, key_a);
        assert_eq!(vectors.content_hash(&key_b).await.unwrap().as_deref(), Some("hb"));
        assert_eq!(vectors.count("ns", RecordKind::Entity).await.unwrap(), 2);

        vectors.clear("ns").await.unwrap();
        assert!(!vectors.exists(&key_a).await.unwrap());
    }

    #[tokio::test]
    async fn test_graph_nodes_and_edges() {
        let graph = SqliteGraphStore::new(store());
        let relation = Relation::new("A", "B", "knows");
        let rel_key = relation.key("ns");
        let rel_payload = Payload::record(Record::Relation(relation));

        let err = graph.upsert(&rel_key, &rel_payload).await.unwrap_err();
        assert!(err.to_string().contains("missing endpoint"));

        for id in ["A", "B"] {
            let (key, payload) = entity(id);
            graph.upsert(&key, &payload).await.unwrap();
        }
        graph.upsert(&rel_key, &rel_payload).await.unwrap();

        let node = graph.get_node(&RecordKey::entity("ns", "A")).await.unwrap().unwrap();
        assert_eq!(node.entity_type, "PERSON");

        let edge = graph.get_edge("ns", "A", "B").await.unwrap().unwrap();
        assert_eq!(edge.description, "knows");
        assert!(graph.get_edge("ns", "B", "A").await.unwrap().is_none());
        assert_eq!(graph.count("ns", RecordKind::Relation).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_graph_prune_removes_orphans() {
        let graph = SqliteGraphStore::new(store());
        for id in ["A", "B", "C"] {
            let (key, payload) = entity(id);
            graph.upsert(&key, &payload).await.unwrap();
        }
        let relation = Relation::new("B", "C", "link");
        let rel_key = relation.key("ns");
        graph.upsert(&rel_key, &Payload::record(Record::Relation(relation))).await.unwrap();

        let keep: HashSet<RecordKey> = [RecordKey::entity("ns", "A"), RecordKey::entity("ns", "B"), rel_key]
            .into_iter()
            .collect();
        assert_eq!(graph.prune("ns", &keep).await.unwrap(), 2);
        assert_eq!(graph.count("ns", RecordKind::Entity).await.unwrap(), 2);
        assert_eq!(graph.count("ns", RecordKind::Relation).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kg.db");
        let (key, payload) = entity("A");

        {
            let graph = SqliteGraphStore::new(Arc::new(SqliteStore::open(&path).unwrap()));
            graph.upsert(&key, &payload).await.unwrap();
        }

        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let graph = SqliteGraphStore::new(Arc::clone(&store));
        assert!(graph.exists(&key).await.unwrap());
        assert_eq!(store.stats("ns").unwrap().nodes, 1);
    }
}
