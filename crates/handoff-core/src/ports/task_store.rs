//! TaskStore port - レコードの正本（source of truth）
//!
//! TaskStore は以下を管理します：
//! - レコードの状態（RecordStatus）と不変フィールド
//! - 条件付き状態遷移（唯一の並行制御プリミティブ）
//! - ディスパッチ失敗の記録（再試行回数の上限管理）
//!
//! # 設計原則
//! - 状態遷移は「期待する現在状態」を指定した 1 回のアトミック更新で行う
//! - 呼び出し側はレコードをキャッシュしない（毎回読み直す）
//! - レコードは物理削除しない

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{BlobLocation, HandoffError, OwnerId, RecordId, RecordStatus, TaskRecord};
use crate::observability::StatusCounts;

/// Which path issued a dispatch. Decides what an exhausted call does to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOrigin {
    /// First notification right after upload. Record is still `uploaded`.
    Organic,

    /// Re-dispatch by the reclaimer. Record was claimed into `processing_asr`.
    Reclaim,
}

/// What the store did with a record after a dispatch call exhausted its retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Left (or put back) in `uploaded`; the reclaimer will try again.
    Retryable { failed_dispatches: u32 },

    /// Budget used up; record moved to `agent_failed`.
    AgentFailed { failed_dispatches: u32 },

    /// Record moved on without us (agent progress, cancel). Counter updated, status untouched.
    Untouched { status: RecordStatus },
}

/// One page of an owner's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub items: Vec<TaskRecord>,
    pub total: usize,
}

/// TaskStore はレコードの正本
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Create a record in `uploaded`.
    async fn create(
        &self,
        owner_id: OwnerId,
        blob: BlobLocation,
        duration_seconds: u32,
    ) -> Result<TaskRecord, HandoffError>;

    /// Fresh snapshot of one record.
    async fn get(&self, id: RecordId) -> Result<TaskRecord, HandoffError>;

    /// Compare-and-swap on status.
    ///
    /// - `Ok(true)`: status was `from` and is now `to`
    /// - `Ok(false)`: status was something else (lost contention); nothing changed
    /// - `Err(IllegalTransition)`: `from -> to` is not an edge of the state machine
    async fn conditional_transition(
        &self,
        id: RecordId,
        from: RecordStatus,
        to: RecordStatus,
    ) -> Result<bool, HandoffError>;

    /// `uploaded` records created strictly before `cutoff`, oldest first, at most `limit`.
    async fn find_reclaimable(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, HandoffError>;

    /// Count an exhausted dispatch and decide the record's fate atomically.
    ///
    /// Terminal records are returned untouched with no field changed.
    /// Otherwise `failed_dispatches += 1`, then:
    /// - record still in the state this dispatch owns (`uploaded` for `Organic`,
    ///   exactly `processing_asr` for `Reclaim`) and `max_failures` reached -> `agent_failed`
    /// - `Reclaim` origin and still exactly `processing_asr` -> back to `uploaded`
    /// - `Organic` origin and still `uploaded` -> stays `uploaded`
    /// - anything else (the agent already moved it) -> status untouched
    async fn record_dispatch_failure(
        &self,
        id: RecordId,
        origin: DispatchOrigin,
        max_failures: u32,
    ) -> Result<FailureDisposition, HandoffError>;

    /// Permanent rejection by the agent. Returns false if the record was already terminal.
    async fn mark_agent_failed(&self, id: RecordId) -> Result<bool, HandoffError>;

    /// Owner history, newest first. `page` is 1-based.
    async fn list_by_owner(
        &self,
        owner_id: OwnerId,
        page: usize,
        page_size: usize,
    ) -> Result<Page, HandoffError>;

    /// Observability hook.
    async fn counts_by_status(&self) -> Result<StatusCounts, HandoffError>;
}
