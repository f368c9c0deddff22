//! In-memory backends, process-local

use std::collections::{HashMap, HashSet};
use async_trait::async_trait;
use tokio::sync::RwLock;
use crate::key::{RecordKey, RecordKind};
use crate::model::DocumentStatus;
use crate::{Error, Result};
use super::{
    rank, cosine_similarity, BackendAdapter, GraphEdge, GraphNode, GraphStore, KvStore, Payload,
    Record, VectorMatch, VectorStore,
};

fn count_kind<V>(map: &HashMap<RecordKey, V>, namespace: &str, kind: RecordKind) -> usize {
    map.keys()
        .filter(|k| k.namespace == namespace && k.kind == kind)
        .count()
}

// ========== KV ==========

#[derive(Debug, Default)]
pub struct MemoryKvStore {
    records: RwLock<HashMap<RecordKey, serde_json::Value>>,
    statuses: RwLock<HashMap<RecordKey, DocumentStatus>>,
}

#[async_trait]
impl BackendAdapter for MemoryKvStore {
    fn backend(&self) -> &str {
        "memory-kv"
    }

    async fn upsert(&self, key: &RecordKey, payload: &Payload) -> Result<()> {
        let value = serde_json::to_value(&payload.record)?;
        self.records.write().await.insert(key.clone(), value);
        Ok(())
    }

    async fn exists(&self, key: &RecordKey) -> Result<bool> {
        Ok(self.records.read().await.contains_key(key))
    }

    async fn clear(&self, namespace: &str) -> Result<()> {
        self.records.write().await.retain(|k, _| k.namespace != namespace);
        self.statuses.write().await.retain(|k, _| k.namespace != namespace);
        Ok(())
    }

    async fn count(&self, namespace: &str, kind: RecordKind) -> Result<usize> {
        Ok(count_kind(&*self.records.read().await, namespace, kind))
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &RecordKey) -> Result<Option<serde_json::Value>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn set_status(&self, key: &RecordKey, status: &DocumentStatus) -> Result<()> {
        let mut statuses = self.statuses.write().await;
        let mut next = status.clone();
        if let Some(existing) = statuses.get(key) {
            next.created_at = existing.created_at;
        }
        statuses.insert(key.clone(), next);
        Ok(())
    }

    async fn get_status(&self, key: &RecordKey) -> Result<Option<DocumentStatus>> {
        Ok(self.statuses.read().await.get(key).cloned())
    }
}

// ========== Vectors ==========

#[derive(Debug, Clone)]
struct VectorEntry {
    vector: Vec<f32>,
    content_hash: Option<String>,
}

#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    vectors: RwLock<HashMap<RecordKey, VectorEntry>>,
}

#[async_trait]
impl BackendAdapter for MemoryVectorStore {
    fn backend(&self) -> &str {
        "memory-vector"
    }

    async fn upsert(&self, key: &RecordKey, payload: &Payload) -> Result<()> {
        let vector = payload
            .vector
            .clone()
            .ok_or_else(|| Error::backend_write(self.backend(), key, "payload carries no vector", false))?;

        self.vectors.write().await.insert(
            key.clone(),
            VectorEntry {
                vector,
                content_hash: payload.content_hash.clone(),
            },
        );
        Ok(())
    }

    async fn exists(&self, key: &RecordKey) -> Result<bool> {
        Ok(self.vectors.read().await.contains_key(key))
    }

    async fn clear(&self, namespace: &str) -> Result<()> {
        self.vectors.write().await.retain(|k, _| k.namespace != namespace);
        Ok(())
    }

    async fn count(&self, namespace: &str, kind: RecordKind) -> Result<usize> {
        Ok(count_kind(&*self.vectors.read().await, namespace, kind))
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn search(&self, namespace: &str, query: &[f32], k: usize) -> Result<Vec<VectorMatch>> {
        let matches = self
            .vectors
            .read()
            .await
            .iter()
            .filter(|(key, _)| key.namespace == namespace)
            .map(|(key, entry)| VectorMatch {
                key: key.clone(),
                score: cosine_similarity(query, &entry.vector),
            })
            .collect();
        Ok(rank(matches, k))
    }

    async fn get_vector(&self, key: &RecordKey) -> Result<Option<Vec<f32>>> {
        Ok(self.vectors.read().await.get(key).map(|e| e.vector.clone()))
    }

    async fn content_hash(&self, key: &RecordKey) -> Result<Option<String>> {
        Ok(self
            .vectors
            .read()
            .await
            .get(key)
            .and_then(|e| e.content_hash.clone()))
    }
}

// ========== Graph ==========

#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    nodes: RwLock<HashMap<RecordKey, GraphNode>>,
    edges: RwLock<HashMap<RecordKey, GraphEdge>>,
}

#[async_trait]
impl BackendAdapter for MemoryGraphStore {
    fn backend(&self) -> &str {
        "memory-graph"
    }

    async fn upsert(&self, key: &RecordKey, payload: &Payload) -> Result<()> {
        match &payload.record {
            Record::Entity(entity) => {
                self.nodes.write().await.insert(
                    key.clone(),
                    GraphNode {
                        key: key.clone(),
                        entity_type: entity.entity_type.clone(),
                        description: entity.description.clone(),
                        source_id: entity.source_id.clone(),
                    },
                );
                Ok(())
            }
            Record::Relation(relation) => {
                let source = RecordKey::entity(&key.namespace, &relation.source_id);
                let target = RecordKey::entity(&key.namespace, &relation.target_id);
                {
                    let nodes = self.nodes.read().await;
                    for endpoint in [&source, &target] {
                        if !nodes.contains_key(endpoint) {
                            return Err(Error::backend_write(
                                self.backend(),
                                key,
                                format!("missing endpoint node {}", endpoint),
                                false,
                            ));
                        }
                    }
                }
                self.edges.write().await.insert(
                    key.clone(),
                    GraphEdge {
                        key: key.clone(),
                        source,
                        target,
                        description: relation.description.clone(),
                        keywords: relation.keywords.clone(),
                        weight: relation.weight,
                        directed: relation.directed,
                    },
                );
                Ok(())
            }
            Record::Document(_) => Err(Error::backend_write(
                self.backend(),
                key,
                "graph store does not hold documents",
                false,
            )),
        }
    }

    async fn exists(&self, key: &RecordKey) -> Result<bool> {
        Ok(match key.kind {
            RecordKind::Entity => self.nodes.read().await.contains_key(key),
            RecordKind::Relation => self.edges.read().await.contains_key(key),
            RecordKind::Document => false,
        })
    }

    async fn clear(&self, namespace: &str) -> Result<()> {
        self.edges.write().await.retain(|k, _| k.namespace != namespace);
        self.nodes.write().await.retain(|k, _| k.namespace != namespace);
        Ok(())
    }

    async fn count(&self, namespace: &str, kind: RecordKind) -> Result<usize> {
        Ok(match kind {
            RecordKind::Entity => count_kind(&*self.nodes.read().await, namespace, kind),
            RecordKind::Relation => count_kind(&*self.edges.read().await, namespace, kind),
            RecordKind::Document => 0,
        })
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn get_node(&self, key: &RecordKey) -> Result<Option<GraphNode>> {
        Ok(self.nodes.read().await.get(key).cloned())
    }

    async fn get_edge(&self, namespace: &str, source_id: &str, target_id: &str) -> Result<Option<GraphEdge>> {
        let source = RecordKey::entity(namespace, source_id);
        let target = RecordKey::entity(namespace, target_id);
        Ok(self
            .edges
            .read()
            .await
            .values()
            .find(|e| e.key.namespace == namespace && e.connects(&source, &target))
            .cloned())
    }

    async fn prune(&self, namespace: &str, keep: &HashSet<RecordKey>) -> Result<usize> {
        let mut nodes = self.nodes.write().await;
        let mut edges = self.edges.write().await;
        let before = nodes.len() + edges.len();

        nodes.retain(|k, _| k.namespace != namespace || keep.contains(k));
        edges.retain(|k, e| {
            k.namespace != namespace
                || (keep.contains(k) && nodes.contains_key(&e.source) && nodes.contains_key(&e.target))
        });

        Ok(before - nodes.len() - edges.len())
    }
}
