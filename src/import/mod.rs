//! Import pipeline - from a canonical graph to consistent KV, vector and
//! graph stores

pub mod chunk;
pub mod options;
pub mod orchestrator;
pub mod report;
pub mod state;

pub use chunk::Chunk;
pub use options::{GraphMerge, ImportOptions};
pub use orchestrator::ImportOrchestrator;
pub use report::{ConsistencyWarning, FailureStage, ImportReport, Outcome, RecordFailure};
pub use state::{RunState, WritePhase};
