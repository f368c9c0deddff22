//! Record keys - one deterministic identity per record across all backends
//!
//! Format: `kg://<namespace>/<kind>/<id>`
//!
//! Examples:
//! - `kg://default/entity/Alan Turing`
//! - `kg://default/relation/Alan Turing->Enigma`
//! - `kg://prod/document/doc-3f9a1c22b6e0d4a1`

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const SCHEME: &str = "kg://";

/// Separator between the endpoints of a relation id
pub const RELATION_SEPARATOR: &str = "->";

/// Kinds of records written by an import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Document,
    Entity,
    Relation,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Document => "document",
            RecordKind::Entity => "entity",
            RecordKind::Relation => "relation",
        }
    }

    /// All record kinds, in write order
    pub fn all() -> &'static [RecordKind] {
        &[RecordKind::Document, RecordKind::Entity, RecordKind::Relation]
    }
}

impl FromStr for RecordKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "document" | "doc" | "chunk" => Ok(RecordKind::Document),
            "entity" | "node" => Ok(RecordKind::Entity),
            "relation" | "relationship" | "edge" => Ok(RecordKind::Relation),
            _ => Err(Error::InvalidKey(format!("Unknown record kind: {}", s))),
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Deterministic key shared by the KV, vector and graph stores.
///
/// The key is a pure function of the namespace and the canonical
/// identifiers, so re-importing the same source always targets the same
/// records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    /// Logical partition of the target storage
    pub namespace: String,
    /// Record kind
    pub kind: RecordKind,
    /// Canonical identifier within the kind
    pub id: String,
}

impl RecordKey {
    /// Create a new key
    pub fn new(namespace: impl Into<String>, kind: RecordKind, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            kind,
            id: id.into(),
        }
    }

    /// Key of an entity
    pub fn entity(namespace: &str, entity_id: &str) -> Self {
        Self::new(namespace, RecordKind::Entity, entity_id)
    }

    /// Key of a document
    pub fn document(namespace: &str, document_id: &str) -> Self {
        Self::new(namespace, RecordKind::Document, document_id)
    }

    /// Key of a relation.
    ///
    /// Undirected relations order their endpoints so `a-b` and `b-a`
    /// collapse onto one key.
    pub fn relation(namespace: &str, source_id: &str, target_id: &str, directed: bool) -> Self {
        let (a, b) = if directed || source_id <= target_id {
            (source_id, target_id)
        } else {
            (target_id, source_id)
        };
        Self::new(
            namespace,
            RecordKind::Relation,
            format!("{}{}{}", a, RELATION_SEPARATOR, b),
        )
    }

    /// Endpoints encoded in a relation key
    pub fn relation_endpoints(&self) -> Option<(&str, &str)> {
        if self.kind != RecordKind::Relation {
            return None;
        }
        self.id.split_once(RELATION_SEPARATOR)
    }

    /// Parse a key string
    ///
    /// Expected format: `kg://<namespace>/<kind>/<id>`
    pub fn parse(key: &str) -> Result<Self> {
        let rest = key
            .strip_prefix(SCHEME)
            .ok_or_else(|| Error::InvalidKey(format!("Key must start with {}: {}", SCHEME, key)))?;

        let (namespace, rest) = rest
            .split_once('/')
            .ok_or_else(|| Error::InvalidKey(format!("Key must contain namespace/kind: {}", key)))?;

        let (kind_str, id) = rest
            .split_once('/')
            .ok_or_else(|| Error::InvalidKey(format!("Key must contain kind/id: {}", key)))?;

        if namespace.is_empty() || id.is_empty() {
            return Err(Error::InvalidKey(format!("Empty namespace or id: {}", key)));
        }

        Ok(Self {
            namespace: namespace.to_string(),
            kind: RecordKind::from_str(kind_str)?,
            id: id.to_string(),
        })
    }

    /// Convert to key string
    pub fn to_key_string(&self) -> String {
        format!("{}{}/{}/{}", SCHEME, self.namespace, self.kind.as_str(), self.id)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_key_string())
    }
}

impl FromStr for RecordKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for RecordKey {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_key_string())
    }
}

impl<'de> Deserialize<'de> for RecordKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        RecordKey::parse(&s).map_err(serde::de::Error::custom)
    }
}
