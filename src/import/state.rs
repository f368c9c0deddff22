//! Run state machine

use std::fmt;
use serde::{Serialize, Serializer};
use crate::{Error, Result};

/// Write phases, strictly in this order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WritePhase {
    Documents,
    Entities,
    Relations,
}

impl WritePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            WritePhase::Documents => "documents",
            WritePhase::Entities => "entities",
            WritePhase::Relations => "relations",
        }
    }

    pub fn all() -> [WritePhase; 3] {
        [WritePhase::Documents, WritePhase::Entities, WritePhase::Relations]
    }
}

/// State of one import run.
///
/// `Idle -> Loading -> Embedding -> Writing(Documents) -> Writing(Entities)
/// -> Writing(Relations) -> Verifying -> Done`. Verification may be skipped.
/// `Failed` is reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Loading,
    Embedding,
    Writing(WritePhase),
    Verifying,
    Done,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }

    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        use WritePhase::*;

        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Idle, Loading)
                | (Loading, Embedding)
                | (Embedding, Writing(Documents))
                | (Writing(Documents), Writing(Entities))
                | (Writing(Entities), Writing(Relations))
                | (Writing(Relations), Verifying)
                | (Writing(Relations), Done)
                | (Verifying, Done)
        )
    }

    /// Move to `next`, rejecting illegal transitions
    pub fn advance(&mut self, next: RunState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            });
        }
        *self = next;
        Ok(())
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Loading => write!(f, "loading"),
            RunState::Embedding => write!(f, "embedding"),
            RunState::Writing(phase) => write!(f, "writing:{}", phase.as_str()),
            RunState::Verifying => write!(f, "verifying"),
            RunState::Done => write!(f, "done"),
            RunState::Failed => write!(f, "failed"),
        }
    }
}

impl Serialize for RunState {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut state = RunState::Idle;
        state.advance(RunState::Loading).unwrap();
        state.advance(RunState::Embedding).unwrap();
        for phase in WritePhase::all() {
            state.advance(RunState::Writing(phase)).unwrap();
        }
        state.advance(RunState::Verifying).unwrap();
        state.advance(RunState::Done).unwrap();
        assert!(state.is_terminal());
    }

    #[test]
    fn test_phases_cannot_be_skipped() {
        let mut state = RunState::Embedding;
        let err = state.advance(RunState::Writing(WritePhase::Relations)).unwrap_err();
        assert_eq!(err.to_string(), "Invalid state transition: embedding -> writing:relations");
        assert_eq!(state, RunState::Embedding);
    }

    #[test]
    fn test_failed_only_from_non_terminal() {
        let mut state = RunState::Writing(WritePhase::Entities);
        state.advance(RunState::Failed).unwrap();
        assert!(state.advance(RunState::Failed).is_err());
        assert!(!RunState::Done.can_transition_to(RunState::Failed));
    }

    #[test]
    fn test_serializes_as_string() {
        let json = serde_json::to_string(&RunState::Writing(WritePhase::Documents)).unwrap();
        assert_eq!(json, "\"writing:documents\"");
    }
}
