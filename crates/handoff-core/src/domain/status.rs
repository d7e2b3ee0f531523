//! Record status state machine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Status of a task record.
///
/// State transitions:
/// - Uploaded -> ProcessingAsr -> ProcessingLlm -> ProcessingTts -> Completed
/// - any non-terminal -> Failed | Cancelled
/// - any non-terminal -> AgentFailed (dispatcher failure policy only)
///
/// Completed / Failed / Cancelled / AgentFailed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Blob stored, waiting for the agent to pick it up.
    Uploaded,

    /// Speech recognition in progress (also the reclaimer's claim marker).
    ProcessingAsr,

    /// Refinement / decision in progress.
    ProcessingLlm,

    /// Speech synthesis in progress.
    ProcessingTts,

    /// Finished with an analysis result attached.
    Completed,

    /// The agent reported a failure.
    Failed,

    /// Cancelled by the owner.
    Cancelled,

    /// Dispatch to the agent was rejected or exhausted its retry budget.
    AgentFailed,
}

impl RecordStatus {
    pub const ALL: [RecordStatus; 8] = [
        RecordStatus::Uploaded,
        RecordStatus::ProcessingAsr,
        RecordStatus::ProcessingLlm,
        RecordStatus::ProcessingTts,
        RecordStatus::Completed,
        RecordStatus::Failed,
        RecordStatus::Cancelled,
        RecordStatus::AgentFailed,
    ];

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RecordStatus::Completed
                | RecordStatus::Failed
                | RecordStatus::Cancelled
                | RecordStatus::AgentFailed
        )
    }

    /// The next stage on the happy path, if any.
    pub fn next_stage(self) -> Option<RecordStatus> {
        match self {
            RecordStatus::Uploaded => Some(RecordStatus::ProcessingAsr),
            RecordStatus::ProcessingAsr => Some(RecordStatus::ProcessingLlm),
            RecordStatus::ProcessingLlm => Some(RecordStatus::ProcessingTts),
            RecordStatus::ProcessingTts => Some(RecordStatus::Completed),
            _ => None,
        }
    }

    /// Whether `self -> to` is an edge a conditional transition may take.
    ///
    /// AgentFailed is excluded: it is only written by dispatch bookkeeping.
    pub fn can_transition_to(self, to: RecordStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match to {
            RecordStatus::Failed | RecordStatus::Cancelled => true,
            RecordStatus::AgentFailed => false,
            _ => self.next_stage() == Some(to),
        }
    }

    /// Cosmetic progress percentage shown to subscribers.
    pub fn progress(self) -> u8 {
        match self {
            RecordStatus::Uploaded => 10,
            RecordStatus::ProcessingAsr => 30,
            RecordStatus::ProcessingLlm => 60,
            RecordStatus::ProcessingTts => 80,
            RecordStatus::Completed => 100,
            _ => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Uploaded => "uploaded",
            RecordStatus::ProcessingAsr => "processing_asr",
            RecordStatus::ProcessingLlm => "processing_llm",
            RecordStatus::ProcessingTts => "processing_tts",
            RecordStatus::Completed => "completed",
            RecordStatus::Failed => "failed",
            RecordStatus::Cancelled => "cancelled",
            RecordStatus::AgentFailed => "agent_failed",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown record status `{s}`"))
    }
}
