//! Graph Loader - parses an external graph description into a canonical graph
//!
//! Accepted JSON shape:
//!
//! ```json
//! {
//!   "entities":  [{ "entity_id": "A", "entity_type": "PERSON", "description": "..." }],
//!   "relations": [{ "source_id": "A", "target_id": "B", "description": "...", "weight": 0.8 }],
//!   "documents": [{ "document_id": "doc-1", "content": "..." }]
//! }
//! ```
//!
//! The LightRAG custom-KG spelling is accepted as well: `entity_name`,
//! `relationships` with `src_id`/`tgt_id` (where `source_id` then names the
//! originating chunk), and `chunks` keyed by `source_id`.

use std::path::Path;
use serde::Deserialize;
use crate::graph::CanonicalGraph;
use crate::model::{Document, Entity, Relation, UNKNOWN_ENTITY_TYPE};
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct RawSource {
    #[serde(default)]
    entities: Vec<RawEntity>,
    #[serde(default, alias = "relationships")]
    relations: Vec<RawRelation>,
    #[serde(default, alias = "chunks")]
    documents: Vec<RawDocument>,
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    entity_id: Option<String>,
    entity_name: Option<String>,
    entity_type: Option<String>,
    #[serde(default)]
    description: String,
    source_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRelation {
    source_id: Option<String>,
    target_id: Option<String>,
    src_id: Option<String>,
    tgt_id: Option<String>,
    #[serde(default)]
    description: String,
    keywords: Option<String>,
    weight: Option<f32>,
    directed: Option<bool>,
    source_chunk: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    document_id: Option<String>,
    doc_id: Option<String>,
    source_id: Option<String>,
    content: Option<String>,
    file_path: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Loads graph descriptions. Pure: never touches storage.
#[derive(Debug, Default, Clone, Copy)]
pub struct GraphLoader;

impl GraphLoader {
    pub fn new() -> Self {
        Self
    }

    /// Read and load a graph file
    pub fn load_file(&self, path: &Path) -> Result<CanonicalGraph> {
        let contents = std::fs::read_to_string(path)?;
        tracing::debug!("Read {} bytes from {}", contents.len(), path.display());
        self.load(&contents)
    }

    /// Load a graph from its JSON text
    pub fn load(&self, source: &str) -> Result<CanonicalGraph> {
        let raw: RawSource = serde_json::from_str(source)
            .map_err(|e| Error::Parse(format!("invalid graph description: {}", e)))?;
        self.build(raw)
    }

    /// Load a graph from an already parsed JSON value
    pub fn load_value(&self, value: serde_json::Value) -> Result<CanonicalGraph> {
        let raw: RawSource = serde_json::from_value(value)
            .map_err(|e| Error::Parse(format!("invalid graph description: {}", e)))?;
        self.build(raw)
    }

    fn build(&self, raw: RawSource) -> Result<CanonicalGraph> {
        let mut builder = CanonicalGraph::builder();

        for (idx, raw_entity) in raw.entities.into_iter().enumerate() {
            let entity_id = non_empty(raw_entity.entity_id)
                .or_else(|| non_empty(raw_entity.entity_name))
                .ok_or_else(|| Error::Parse(format!("missing entity_id at entities[{}]", idx)))?;

            builder.add_entity(Entity {
                entity_id,
                entity_type: non_empty(raw_entity.entity_type)
                    .unwrap_or_else(|| UNKNOWN_ENTITY_TYPE.to_string()),
                description: raw_entity.description,
                source_id: non_empty(raw_entity.source_id),
            });
        }

        for (idx, raw_rel) in raw.relations.into_iter().enumerate() {
            // With src_id/tgt_id present, source_id names the originating chunk
            let (source_id, source_chunk) = match non_empty(raw_rel.src_id) {
                Some(src) => (Some(src), non_empty(raw_rel.source_chunk).or(non_empty(raw_rel.source_id))),
                None => (non_empty(raw_rel.source_id), non_empty(raw_rel.source_chunk)),
            };
            let target_id = non_empty(raw_rel.tgt_id).or(non_empty(raw_rel.target_id));

            let source_id = source_id
                .ok_or_else(|| Error::Parse(format!("missing source_id at relations[{}]", idx)))?;
            let target_id = target_id
                .ok_or_else(|| Error::Parse(format!("missing target_id at relations[{}]", idx)))?;

            builder.add_relation(idx, Relation {
                source_id,
                target_id,
                description: raw_rel.description,
                keywords: non_empty(raw_rel.keywords),
                weight: raw_rel.weight.unwrap_or(1.0),
                directed: raw_rel.directed.unwrap_or(true),
                source_chunk,
            });
        }

        for (idx, raw_doc) in raw.documents.into_iter().enumerate() {
            let content = raw_doc
                .content
                .filter(|c| !c.trim().is_empty())
                .ok_or_else(|| Error::Parse(format!("missing content at documents[{}]", idx)))?;

            let document_id = non_empty(raw_doc.document_id)
                .or_else(|| non_empty(raw_doc.doc_id))
                .or_else(|| non_empty(raw_doc.source_id))
                .unwrap_or_else(|| Document::content_id(&content));

            builder.add_document(Document {
                document_id,
                content,
                file_path: non_empty(raw_doc.file_path),
            });
        }

        let graph = builder.build()?;
        tracing::info!(
            "Loaded graph: {} entities, {} relations, {} documents",
            graph.entity_count(),
            graph.relation_count(),
            graph.document_count()
        );
        Ok(graph)
    }
}
