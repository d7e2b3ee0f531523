//! AgentProgressSink port - エージェント側の書き込み口
//!
//! 本番ではエージェント自身がストアに進捗を書き込みます（コアの外の actor）。
//! コアはそれを観測できず、読み直すだけです。
//!
//! この trait はその書き込み側を抽象化したもので、テストとデモが
//! 「エージェントが進めた」状態を作るために使います。

use async_trait::async_trait;

use crate::domain::{AnalysisResult, HandoffError, RecordId, RecordStatus};

/// AgentProgressSink はエージェントの進捗書き込み
#[async_trait]
pub trait AgentProgressSink: Send + Sync {
    /// Advance one stage. Same compare-and-swap semantics as `TaskStore::conditional_transition`.
    async fn advance(
        &self,
        id: RecordId,
        from: RecordStatus,
        to: RecordStatus,
    ) -> Result<bool, HandoffError>;

    /// `processing_tts -> completed` with the result attached in the same write.
    async fn complete(
        &self,
        id: RecordId,
        from: RecordStatus,
        result: AnalysisResult,
    ) -> Result<bool, HandoffError>;
}
