//! AgentTransport port - 外部 AI エージェントへの送信
//!
//! 1 回の呼び出し = 1 回の物理的な送信。リトライは Dispatcher の責務です。
//!
//! # 実装
//! - **HttpAgentTransport**: reqwest による HTTP 実装（impls::http_agent）
//! - テストではスクリプト化したフェイクを使う

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{OwnerId, RecordId, TaskRecord};

/// Body of the outbound "please process this recording" call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub record_id: RecordId,
    pub owner_id: OwnerId,
    pub bucket: String,
    pub key: String,
}

impl AgentRequest {
    pub fn for_record(record: &TaskRecord) -> Self {
        Self {
            record_id: record.id,
            owner_id: record.owner_id,
            bucket: record.blob.bucket.clone(),
            key: record.blob.key.clone(),
        }
    }
}

/// Errors from a single physical submission.
///
/// - `Transport` / `Timeout` / `Server` are worth retrying
/// - `Rejected` (4xx) is final
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("agent returned {status}: {body}")]
    Server { status: u16, body: String },

    #[error("agent rejected the request with {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl AgentError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AgentError::Rejected { .. })
    }

    /// Classify a non-2xx status code.
    pub fn from_status(status: u16, body: String) -> Self {
        if (400..500).contains(&status) {
            AgentError::Rejected { status, body }
        } else {
            AgentError::Server { status, body }
        }
    }
}

/// AgentTransport はエージェントへ 1 回だけ送信する
#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn submit(&self, request: &AgentRequest) -> Result<(), AgentError>;
}
