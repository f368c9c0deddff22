/// Import phases that report progress
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ProgressPhase {
    Loading,
    Embedding,
    Documents,
    Entities,
    Relations,
    Verifying,
}

impl ProgressPhase {
    pub fn label(&self) -> &'static str {
        match self {
            ProgressPhase::Loading => "Loading graph",
            ProgressPhase::Embedding => "Embedding chunks",
            ProgressPhase::Documents => "Writing documents",
            ProgressPhase::Entities => "Writing entities",
            ProgressPhase::Relations => "Writing relations",
            ProgressPhase::Verifying => "Verifying",
        }
    }
}

#[derive(Clone, Debug)]
pub enum ProgressMessage {
    Started {
        phase: ProgressPhase,
        total: usize,
    },
    Progress {
        phase: ProgressPhase,
        current: usize,
        item: Option<String>,
    },
    Finished {
        phase: ProgressPhase,
    },
    RecordFailed(String),
    Warning(String),
}
