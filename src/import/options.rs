use std::str::FromStr;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::retry::RetryPolicy;
use crate::{Error, Result};

/// What happens to graph records the new source no longer contains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphMerge {
    /// Leave them untouched
    #[default]
    Additive,
    /// Prune them after the write phases
    Replace,
}

impl GraphMerge {
    pub fn as_str(&self) -> &'static str {
        match self {
            GraphMerge::Additive => "additive",
            GraphMerge::Replace => "replace",
        }
    }
}

impl FromStr for GraphMerge {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "additive" | "merge" => Ok(GraphMerge::Additive),
            "replace" => Ok(GraphMerge::Replace),
            _ => Err(Error::Config(format!("Unknown graph merge policy: {}", s))),
        }
    }
}

/// Knobs of one import run
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub namespace: String,
    /// Clear the KV and vector namespaces before writing
    pub reset: bool,
    /// Also clear the graph namespace (requires `reset`)
    pub full_reset: bool,
    pub graph_merge: GraphMerge,
    /// Concurrent embedding batches and same-phase writes
    pub workers: usize,
    /// Check backend counts and relation endpoints after writing
    pub verify: bool,
    pub retry: RetryPolicy,
    pub lease_ttl: Duration,
    /// Recorded on the namespace lease
    pub holder: String,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            reset: true,
            full_reset: false,
            graph_merge: GraphMerge::Additive,
            workers: 4,
            verify: true,
            retry: RetryPolicy::default(),
            lease_ttl: Duration::from_secs(3600),
            holder: default_holder(),
        }
    }
}

/// `user@pid`, good enough to tell runs apart in a lease conflict
pub fn default_holder() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "kgsync".to_string());
    format!("{}@{}", user, std::process::id())
}
