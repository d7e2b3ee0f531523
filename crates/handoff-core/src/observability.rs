//! 状態別の件数（運用・デモ用のスナップショット）

use serde::{Deserialize, Serialize};

use crate::domain::RecordStatus;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub uploaded: usize,
    pub processing_asr: usize,
    pub processing_llm: usize,
    pub processing_tts: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub agent_failed: usize,
}

impl StatusCounts {
    pub fn add(&mut self, status: RecordStatus) {
        match status {
            RecordStatus::Uploaded => self.uploaded += 1,
            RecordStatus::ProcessingAsr => self.processing_asr += 1,
            RecordStatus::ProcessingLlm => self.processing_llm += 1,
            RecordStatus::ProcessingTts => self.processing_tts += 1,
            RecordStatus::Completed => self.completed += 1,
            RecordStatus::Failed => self.failed += 1,
            RecordStatus::Cancelled => self.cancelled += 1,
            RecordStatus::AgentFailed => self.agent_failed += 1,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.uploaded + self.processing_asr + self.processing_llm + self.processing_tts
    }
}
