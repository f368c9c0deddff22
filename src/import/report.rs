//! Structured outcome of an import run

use std::collections::BTreeSet;
use std::fmt;
use serde::Serialize;
use crate::key::{RecordKey, RecordKind};
use super::state::RunState;

/// Where a record failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Embedding,
    Kv,
    Vector,
    Graph,
    /// Not attempted because a record it depends on failed
    Dependency,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureStage::Embedding => "embedding",
            FailureStage::Kv => "kv",
            FailureStage::Vector => "vector",
            FailureStage::Graph => "graph",
            FailureStage::Dependency => "dependency",
        };
        write!(f, "{}", s)
    }
}

/// One failed record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordFailure {
    pub key: RecordKey,
    pub kind: RecordKind,
    pub stage: FailureStage,
    pub reason: String,
    /// Fatal failures turn the run `Failed`
    pub fatal: bool,
}

impl RecordFailure {
    pub fn new(key: &RecordKey, stage: FailureStage, reason: impl Into<String>) -> Self {
        Self {
            key: key.clone(),
            kind: key.kind,
            stage,
            reason: reason.into(),
            fatal: false,
        }
    }

    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }
}

/// Post-write disagreement between what was written and what a backend holds
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsistencyWarning {
    pub backend: String,
    pub message: String,
}

/// Per-kind counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindCounts {
    pub documents: usize,
    pub entities: usize,
    pub relations: usize,
}

impl KindCounts {
    pub fn get(&self, kind: RecordKind) -> usize {
        match kind {
            RecordKind::Document => self.documents,
            RecordKind::Entity => self.entities,
            RecordKind::Relation => self.relations,
        }
    }

    pub fn add(&mut self, kind: RecordKind, n: usize) {
        match kind {
            RecordKind::Document => self.documents += n,
            RecordKind::Entity => self.entities += n,
            RecordKind::Relation => self.relations += n,
        }
    }

    pub fn total(&self) -> usize {
        self.documents + self.entities + self.relations
    }
}

/// Successful writes per backend role
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteCounts {
    pub kv: KindCounts,
    pub vector: KindCounts,
    pub graph: KindCounts,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseTiming {
    pub phase: String,
    pub millis: u64,
}

/// How the run ended, from a caller's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Partial,
    Failed,
}

impl Outcome {
    /// Process exit code
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Success => 0,
            Outcome::Failed => 1,
            Outcome::Partial => 2,
        }
    }
}

/// Everything a caller needs to act on an import programmatically
#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub run_id: String,
    pub namespace: String,
    pub state: RunState,
    pub reset: bool,
    pub full_reset: bool,
    /// Records in the source
    pub source: KindCounts,
    pub embedded: KindCounts,
    /// Vectors kept from an earlier run because the text hash matched
    pub reused: KindCounts,
    pub written: WriteCounts,
    /// Graph records removed by the replace merge policy
    pub pruned: usize,
    pub completed: usize,
    pub failed: usize,
    pub failures: Vec<RecordFailure>,
    pub warnings: Vec<ConsistencyWarning>,
    pub phases: Vec<PhaseTiming>,
    pub duration_ms: u64,
    /// Run-level error that stopped the run
    pub error: Option<String>,
}

impl ImportReport {
    pub fn new(run_id: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            namespace: namespace.into(),
            state: RunState::Idle,
            reset: false,
            full_reset: false,
            source: KindCounts::default(),
            embedded: KindCounts::default(),
            reused: KindCounts::default(),
            written: WriteCounts::default(),
            pruned: 0,
            completed: 0,
            failed: 0,
            failures: Vec::new(),
            warnings: Vec::new(),
            phases: Vec::new(),
            duration_ms: 0,
            error: None,
        }
    }

    /// Distinct keys with at least one failure
    pub fn failed_keys(&self) -> BTreeSet<&RecordKey> {
        self.failures.iter().map(|f| &f.key).collect()
    }

    pub fn failures_for(&self, key: &RecordKey) -> Vec<&RecordFailure> {
        self.failures.iter().filter(|f| &f.key == key).collect()
    }

    pub fn has_fatal(&self) -> bool {
        self.failures.iter().any(|f| f.fatal)
    }

    /// Recompute `completed`/`failed` against the source size
    pub fn tally(&mut self) {
        self.failed = self.failed_keys().len();
        self.completed = self.source.total().saturating_sub(self.failed);
    }

    pub fn outcome(&self) -> Outcome {
        match self.state {
            RunState::Done if self.failures.is_empty() && self.warnings.is_empty() => Outcome::Success,
            RunState::Done => Outcome::Partial,
            _ => Outcome::Failed,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.outcome().exit_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_and_exit_codes() {
        let mut report = ImportReport::new("run", "ns");
        report.state = RunState::Done;
        assert_eq!(report.exit_code(), 0);

        let key = RecordKey::entity("ns", "A");
        report.failures.push(RecordFailure::new(&key, FailureStage::Embedding, "down"));
        assert_eq!(report.outcome(), Outcome::Partial);
        assert_eq!(report.exit_code(), 2);

        report.state = RunState::Failed;
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_tally_counts_distinct_keys() {
        let mut report = ImportReport::new("run", "ns");
        report.source = KindCounts { documents: 1, entities: 3, relations: 2 };
        let key = RecordKey::entity("ns", "A");
        report.failures.push(RecordFailure::new(&key, FailureStage::Embedding, "down"));
        report.failures.push(RecordFailure::new(&key, FailureStage::Graph, "locked").fatal());
        report.tally();

        assert_eq!(report.failed, 1);
        assert_eq!(report.completed, 5);
        assert!(report.has_fatal());
    }

    #[test]
    fn test_report_serializes() {
        let report = ImportReport::new("run-1", "ns");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["state"], "idle");
        assert_eq!(json["source"]["entities"], 0);
    }
}
