//! Database schema definitions
//!
//! Every table is keyed by `(namespace, key)` so a namespace can be purged
//! without touching its neighbours.

/// Full records of the KV role
pub const CREATE_KV_RECORDS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS kv_records (
    namespace TEXT NOT NULL,
    key TEXT NOT NULL,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (namespace, key)
)
"#;

/// Document processing status
pub const CREATE_DOC_STATUS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS doc_status (
    namespace TEXT NOT NULL,
    key TEXT NOT NULL,
    status TEXT NOT NULL,
    content_length INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    error TEXT,
    PRIMARY KEY (namespace, key)
)
"#;

/// Vector index
pub const CREATE_VECTORS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS vectors (
    namespace TEXT NOT NULL,
    key TEXT NOT NULL,
    kind TEXT NOT NULL,
    content_hash TEXT,
    dimension INTEGER NOT NULL,
    vector BLOB NOT NULL,
    PRIMARY KEY (namespace, key)
)
"#;

/// Entity nodes of the graph role
pub const CREATE_GRAPH_NODES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS graph_nodes (
    namespace TEXT NOT NULL,
    key TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    description TEXT NOT NULL,
    source_id TEXT,
    PRIMARY KEY (namespace, key)
)
"#;

/// Relation edges of the graph role
pub const CREATE_GRAPH_EDGES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS graph_edges (
    namespace TEXT NOT NULL,
    key TEXT NOT NULL,
    source_key TEXT NOT NULL,
    target_key TEXT NOT NULL,
    description TEXT NOT NULL,
    keywords TEXT,
    weight REAL NOT NULL DEFAULT 1.0,
    directed INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (namespace, key)
)
"#;

/// One row per namespace currently owned by an import run
pub const CREATE_RUN_LEASES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS run_leases (
    namespace TEXT PRIMARY KEY,
    run_id TEXT NOT NULL,
    holder TEXT NOT NULL,
    acquired_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
)
"#;

/// SQL to create indexes
pub const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_kv_kind ON kv_records(namespace, kind)",
    "CREATE INDEX IF NOT EXISTS idx_vectors_kind ON vectors(namespace, kind)",
    "CREATE INDEX IF NOT EXISTS idx_edges_source ON graph_edges(namespace, source_key)",
    "CREATE INDEX IF NOT EXISTS idx_edges_target ON graph_edges(namespace, target_key)",
];

/// All schema creation statements
pub fn all_schema_statements() -> Vec<&'static str> {
    let mut stmts = vec![
        CREATE_KV_RECORDS_TABLE,
        CREATE_DOC_STATUS_TABLE,
        CREATE_VECTORS_TABLE,
        CREATE_GRAPH_NODES_TABLE,
        CREATE_GRAPH_EDGES_TABLE,
        CREATE_RUN_LEASES_TABLE,
    ];
    stmts.extend(CREATE_INDEXES.iter().copied());
    stmts
}
