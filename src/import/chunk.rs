//! Chunk assembly - the texts an import embeds

use crate::graph::CanonicalGraph;
use crate::key::RecordKey;
use crate::storage::Record;

/// One text to embed, owned by a record
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub key: RecordKey,
    pub text: String,
    /// blake3 hex of the model id and `text`
    pub content_hash: String,
}

impl Chunk {
    pub fn new(key: RecordKey, text: String, model_id: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(model_id.as_bytes());
        hasher.update(&[0]);
        hasher.update(text.as_bytes());
        let content_hash = hasher.finalize().to_hex().to_string();
        Self { key, text, content_hash }
    }
}

/// Every record of the graph in write order (documents, entities,
/// relations), each with its key
pub fn records(graph: &CanonicalGraph, namespace: &str) -> Vec<(RecordKey, Record)> {
    let documents = graph.documents().map(|d| (d.key(namespace), Record::Document(d.clone())));
    let entities = graph.entities().map(|e| (e.key(namespace), Record::Entity(e.clone())));
    let relations = graph.relations().map(|r| (r.key(namespace), Record::Relation(r.clone())));
    documents.chain(entities).chain(relations).collect()
}

/// Chunks for every record of the graph, hashed for `model_id`
pub fn assemble(graph: &CanonicalGraph, namespace: &str, model_id: &str) -> Vec<Chunk> {
    records(graph, namespace)
        .into_iter()
        .map(|(key, record)| Chunk::new(key, record.text(), model_id))
        .collect()
}
