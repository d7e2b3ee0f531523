//! Errors - エラー型と分類
//!
//! すべてのエラーは安定した数値コード（`code()`）と人間向けメッセージ
//! （`Display`）を持ちます。コード表は公開 API の一部なので番号は変えないこと。

use thiserror::Error;

use super::ids::{OwnerId, RecordId};
use super::status::RecordStatus;
use crate::ports::agent::AgentError;

/// ErrorKind は実行エラーの運用分類
///
/// - Transient: 一時的なエラー（リトライ推奨）
/// - Permanent: 恒久的なエラー（リトライ無意味）
/// - Infrastructure: インフラエラー（ストア / Blob の障害）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// Stable machine-readable error codes.
pub mod codes {
    pub const SERVER_ERROR: u32 = 10001;
    pub const INVALID_PARAMS: u32 = 10002;
    pub const FORBIDDEN: u32 = 10004;
    pub const INVALID_STATE: u32 = 10005;
    pub const ILLEGAL_TRANSITION: u32 = 10006;
    pub const UPLOAD_FAILED: u32 = 30001;
    pub const FILE_TOO_LARGE: u32 = 30003;
    pub const RECORD_NOT_FOUND: u32 = 30004;
    pub const ANALYSIS_FAILED: u32 = 30005;
}

/// HandoffError はドメインエラー
#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("record not found: {0}")]
    NotFound(RecordId),

    #[error("{caller} does not own {record}")]
    Forbidden { record: RecordId, caller: OwnerId },

    #[error("{record} is {status} and can no longer change")]
    InvalidState {
        record: RecordId,
        status: RecordStatus,
    },

    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: RecordStatus, to: RecordStatus },

    #[error("agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("store error: {0}")]
    Store(String),

    #[error("blob store error: {0}")]
    Blob(String),
}

impl HandoffError {
    pub fn code(&self) -> u32 {
        match self {
            HandoffError::Validation(_) => codes::INVALID_PARAMS,
            HandoffError::PayloadTooLarge { .. } => codes::FILE_TOO_LARGE,
            HandoffError::NotFound(_) => codes::RECORD_NOT_FOUND,
            HandoffError::Forbidden { .. } => codes::FORBIDDEN,
            HandoffError::InvalidState { .. } => codes::INVALID_STATE,
            HandoffError::IllegalTransition { .. } => codes::ILLEGAL_TRANSITION,
            HandoffError::Agent(_) => codes::ANALYSIS_FAILED,
            HandoffError::Store(_) => codes::SERVER_ERROR,
            HandoffError::Blob(_) => codes::UPLOAD_FAILED,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            HandoffError::Agent(err) if err.is_retryable() => ErrorKind::Transient,
            HandoffError::Store(_) | HandoffError::Blob(_) => ErrorKind::Infrastructure,
            _ => ErrorKind::Permanent,
        }
    }

    /// Message safe to show a client. Infrastructure details stay in the logs.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Infrastructure => "internal server error, please retry later".to_string(),
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use ulid::Ulid;

    fn record() -> RecordId {
        RecordId::from_ulid(Ulid::new())
    }

    #[rstest]
    #[case::validation(HandoffError::Validation("duration".into()), 10002)]
    #[case::too_large(HandoffError::PayloadTooLarge { size: 6, limit: 5 }, 30003)]
    #[case::not_found(HandoffError::NotFound(record()), 30004)]
    #[case::store(HandoffError::Store("down".into()), 10001)]
    #[case::blob(HandoffError::Blob("down".into()), 30001)]
    #[case::rejected(HandoffError::Agent(AgentError::Rejected { status: 422, body: String::new() }), 30005)]
    fn codes_are_stable(#[case] err: HandoffError, #[case] code: u32) {
        assert_eq!(err.code(), code);
    }

    #[test]
    fn transient_agent_errors_are_classified_transient() {
        let err = HandoffError::from(AgentError::Server {
            status: 503,
            body: String::new(),
        });
        assert_eq!(err.kind(), ErrorKind::Transient);

        let err = HandoffError::from(AgentError::Rejected {
            status: 401,
            body: String::new(),
        });
        assert_eq!(err.kind(), ErrorKind::Permanent);
    }

    #[test]
    fn infrastructure_details_are_hidden_from_clients() {
        let err = HandoffError::Store("connection refused at 10.0.0.3".into());
        assert!(!err.public_message().contains("10.0.0.3"));

        let err = HandoffError::PayloadTooLarge { size: 10, limit: 5 };
        assert_eq!(err.public_message(), "payload of 10 bytes exceeds the 5 byte limit");
    }

    #[test]
    fn invalid_state_names_the_status() {
        let err = HandoffError::InvalidState {
            record: record(),
            status: RecordStatus::Completed,
        };
        assert!(err.to_string().contains("completed"));
    }
}
