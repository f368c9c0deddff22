//! Canonical Graph - validated in-memory representation of one import source
//!
//! Built once by the loader and shared read-only by every phase of an
//! import run.

use std::collections::{BTreeMap, HashMap};
use crate::key::RELATION_SEPARATOR;
use crate::model::{Document, Entity, Relation};
use crate::{Error, Result};

/// Validated, deduplicated graph of entities, relations and documents.
///
/// There is no way to mutate a `CanonicalGraph` after [`GraphBuilder::build`]
/// returns it.
#[derive(Debug, Default, Clone)]
pub struct CanonicalGraph {
    /// Entities indexed by id
    entities: BTreeMap<String, Entity>,
    /// Relations indexed by their key id (`source->target`)
    relations: BTreeMap<String, Relation>,
    /// Documents indexed by id
    documents: BTreeMap<String, Document>,
    /// Outgoing relation ids per entity
    outgoing: HashMap<String, Vec<String>>,
}

impl CanonicalGraph {
    /// Start building a graph
    pub fn builder() -> GraphBuilder {
        GraphBuilder::default()
    }

    /// Get an entity by id
    pub fn get_entity(&self, entity_id: &str) -> Option<&Entity> {
        self.entities.get(entity_id)
    }

    /// Get a relation by its endpoints
    pub fn get_relation(&self, source_id: &str, target_id: &str) -> Option<&Relation> {
        self.outgoing
            .get(source_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.relations.get(id))
            .find(|r| r.target_id == target_id)
            .or_else(|| {
                // undirected relations are reachable from either endpoint
                self.outgoing
                    .get(target_id)
                    .into_iter()
                    .flatten()
                    .filter_map(|id| self.relations.get(id))
                    .find(|r| !r.directed && r.target_id == source_id)
            })
    }

    /// Get a document by id
    pub fn get_document(&self, document_id: &str) -> Option<&Document> {
        self.documents.get(document_id)
    }

    /// Relations leaving an entity
    pub fn relations_from(&self, entity_id: &str) -> Vec<&Relation> {
        self.outgoing
            .get(entity_id)
            .map(|ids| ids.iter().filter_map(|id| self.relations.get(id)).collect())
            .unwrap_or_default()
    }

    /// All entities, ordered by id
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// All relations, ordered by key
    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.values()
    }

    /// All documents, ordered by id
    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.documents.values()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    /// Get statistics about the graph
    pub fn stats(&self) -> GraphStats {
        let mut entity_types = BTreeMap::new();
        for entity in self.entities.values() {
            *entity_types.entry(entity.entity_type.clone()).or_insert(0) += 1;
        }

        GraphStats {
            entities: self.entities.len(),
            relations: self.relations.len(),
            documents: self.documents.len(),
            entity_types,
        }
    }
}

/// Accumulates raw records and validates them into a [`CanonicalGraph`].
///
/// Later definitions of the same entity, relation or document replace
/// earlier ones.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    entities: BTreeMap<String, Entity>,
    /// (position in source, relation) in insertion order
    relations: Vec<(usize, Relation)>,
    documents: BTreeMap<String, Document>,
}

impl GraphBuilder {
    /// Add or replace an entity
    pub fn add_entity(&mut self, entity: Entity) -> &mut Self {
        self.entities.insert(entity.entity_id.clone(), entity);
        self
    }

    /// Add a relation; `position` is its index in the source, used in errors
    pub fn add_relation(&mut self, position: usize, relation: Relation) -> &mut Self {
        self.relations.push((position, relation));
        self
    }

    /// Add or replace a document
    pub fn add_document(&mut self, document: Document) -> &mut Self {
        self.documents.insert(document.document_id.clone(), document);
        self
    }

    /// Validate referential integrity and freeze the graph
    pub fn build(self) -> Result<CanonicalGraph> {
        // Relation keys join endpoint ids with the separator; an id holding
        // it would let two distinct relations share one key
        if let Some(id) = self.entities.keys().find(|id| id.contains(RELATION_SEPARATOR)) {
            return Err(Error::Parse(format!(
                "entity id '{}' must not contain '{}'",
                id, RELATION_SEPARATOR
            )));
        }

        let mut relations = BTreeMap::new();

        for (position, relation) in self.relations {
            for endpoint in [&relation.source_id, &relation.target_id] {
                if !self.entities.contains_key(endpoint) {
                    return Err(Error::Parse(format!(
                        "dangling relation reference: relations[{}] {} -> {} references unknown entity '{}'",
                        position, relation.source_id, relation.target_id, endpoint
                    )));
                }
            }
            // Key ids are namespace independent, any namespace works here
            let id = relation.key("_").id;
            relations.insert(id, relation);
        }

        let mut outgoing: HashMap<String, Vec<String>> = HashMap::new();
        for (id, relation) in &relations {
            outgoing
                .entry(relation.source_id.clone())
                .or_default()
                .push(id.clone());
        }

        Ok(CanonicalGraph {
            entities: self.entities,
            relations,
            documents: self.documents,
            outgoing,
        })
    }
}

/// Statistics about a canonical graph
#[derive(Debug, Clone, serde::Serialize)]
pub struct GraphStats {
    pub entities: usize,
    pub relations: usize,
    pub documents: usize,
    pub entity_types: BTreeMap<String, usize>,
}

impl std::fmt::Display for GraphStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Knowledge Graph Statistics:")?;
        writeln!(f, "  Entities: {}", self.entities)?;
        writeln!(f, "  Relations: {}", self.relations)?;
        writeln!(f, "  Documents: {}", self.documents)?;
        for (entity_type, count) in &self.entity_types {
            writeln!(f, "    {}: {}", entity_type, count)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> CanonicalGraph {
        let mut builder = CanonicalGraph::builder();
        builder
            .add_entity(Entity::new("A", "PERSON", "a"))
            .add_entity(Entity::new("B", "PERSON", "b"))
            .add_entity(Entity::new("C", "PLACE", "c"))
            .add_relation(0, Relation::new("A", "B", "a knows b"))
            .add_relation(1, Relation::new("B", "C", "b lives in c"));
        builder.build().unwrap()
    }

    #[test]
    fn test_lookup() {
        let graph = chain();
        assert_eq!(graph.entity_count(), 3);
        assert_eq!(graph.relation_count(), 2);
        assert_eq!(graph.get_relation("A", "B").unwrap().description, "a knows b");
        assert!(graph.get_relation("B", "A").is_none());
        assert_eq!(graph.relations_from("B").len(), 1);
    }

    #[test]
    fn test_last_write_wins() {
        let mut builder = CanonicalGraph::builder();
        builder
            .add_entity(Entity::new("A", "PERSON", "first"))
            .add_entity(Entity::new("A", "PERSON", "second"))
            .add_relation(0, Relation::new("A", "A", "one"))
            .add_relation(1, Relation::new("A", "A", "two"));
        let graph = builder.build().unwrap();

        assert_eq!(graph.entity_count(), 1);
        assert_eq!(graph.get_entity("A").unwrap().description, "second");
        assert_eq!(graph.relation_count(), 1);
        assert_eq!(graph.get_relation("A", "A").unwrap().description, "two");
    }

    #[test]
    fn test_dangling_relation_is_rejected() {
        let mut builder = CanonicalGraph::builder();
        builder
            .add_entity(Entity::new("A", "PERSON", "a"))
            .add_relation(4, Relation::new("A", "Z", "to nowhere"));

        let err = builder.build().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("dangling relation reference"));
        assert!(message.contains("relations[4]"));
        assert!(message.contains("'Z'"));
    }

    #[test]
    fn test_undirected_lookup_from_either_side() {
        let mut builder = CanonicalGraph::builder();
        let mut rel = Relation::new("B", "A", "peers");
        rel.directed = false;
        builder
            .add_entity(Entity::new("A", "PERSON", "a"))
            .add_entity(Entity::new("B", "PERSON", "b"))
            .add_relation(0, rel);
        let graph = builder.build().unwrap();

        assert!(graph.get_relation("B", "A").is_some());
        assert!(graph.get_relation("A", "B").is_some());
    }

    #[test]
    fn test_separator_in_entity_id_is_rejected() {
        let mut builder = CanonicalGraph::builder();
        builder
            .add_entity(Entity::new("A->B", "PERSON", "ab"))
            .add_entity(Entity::new("A", "PERSON", "a"))
            .add_entity(Entity::new("B->C", "PERSON", "bc"))
            .add_entity(Entity::new("C", "PLACE", "c"))
            .add_relation(0, Relation::new("A->B", "C", "first"))
            .add_relation(1, Relation::new("A", "B->C", "second"));

        let err = builder.build().unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
        assert!(err.to_string().contains("must not contain '->'"));
    }

    #[test]
    fn test_stats() {
        let stats = chain().stats();
        assert_eq!(stats.entities, 3);
        assert_eq!(stats.entity_types.get("PERSON"), Some(&2));
        assert!(stats.to_string().contains("Relations: 2"));
    }
}
