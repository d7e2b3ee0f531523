//! Events - 購読者へ流すステータスイベント
//!
//! StatusProjector が 1 tick ごとに 1 件生成します。
//! ワイヤ上では SSE（`event: message` + JSON の `data:` 行）で表現します。

use serde::{Deserialize, Serialize};

use super::errors::HandoffError;
use super::ids::RecordId;
use super::record::{Decision, TaskRecord};
use super::status::RecordStatus;

/// Result fields attached to the final `completed` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultFields {
    pub asr_text: String,
    pub refined_text: String,
    pub decision: Decision,
    pub response_text: String,
    pub tts_url: Option<String>,
}

/// One frame of a status stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusEvent {
    Status {
        record_id: RecordId,
        status: RecordStatus,
        progress: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<ResultFields>,
    },
    Error {
        code: u32,
        message: String,
    },
}

impl StatusEvent {
    /// Project a record snapshot. Result fields only ride along on completed records.
    pub fn from_record(record: &TaskRecord) -> Self {
        let result = match (record.status, &record.analysis_result) {
            (RecordStatus::Completed, Some(r)) => Some(ResultFields {
                asr_text: r.transcript.clone(),
                refined_text: r.refined_text.clone(),
                decision: r.decision,
                response_text: r.response_text.clone(),
                tts_url: r.tts_audio_url.clone(),
            }),
            _ => None,
        };
        StatusEvent::Status {
            record_id: record.id,
            status: record.status,
            progress: record.status.progress(),
            result,
        }
    }

    pub fn from_error(err: &HandoffError) -> Self {
        StatusEvent::Error {
            code: err.code(),
            message: err.public_message(),
        }
    }

    /// Does the stream end after this event?
    pub fn is_final(&self) -> bool {
        match self {
            StatusEvent::Status { status, .. } => status.is_terminal(),
            StatusEvent::Error { .. } => true,
        }
    }

    /// Render as one server-sent-events frame.
    pub fn to_sse_frame(&self) -> String {
        // serde_json は Serialize 実装が失敗しない型しか持たない
        let data = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("event: message\ndata: {data}\n\n")
    }
}
