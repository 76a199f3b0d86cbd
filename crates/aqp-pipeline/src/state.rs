//! Linear state machine for one translation run

use serde::{Deserialize, Serialize};

/// What a stage produced, as seen by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Produced,
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum PipelineState {
    Pending,
    ColumnsSelected { degraded: bool },
    FilterGenerated { degraded: bool },
    Completed,
    FailedDegraded,
}

impl PipelineState {
    /// Next state after a stage finishes. Terminal states stay put.
    pub fn advance(self, outcome: StageOutcome) -> PipelineState {
        let this_degraded = outcome == StageOutcome::Degraded;
        match self {
            PipelineState::Pending => PipelineState::ColumnsSelected {
                degraded: this_degraded,
            },
            PipelineState::ColumnsSelected { degraded } => PipelineState::FilterGenerated {
                degraded: degraded || this_degraded,
            },
            PipelineState::FilterGenerated { degraded } => {
                if degraded || this_degraded {
                    PipelineState::FailedDegraded
                } else {
                    PipelineState::Completed
                }
            }
            terminal => terminal,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::FailedDegraded)
    }
}
