//! In-memory TaskStore (development / tests / demo).
//!
//! All operations take the single state lock once, so every conditional
//! update is a compare-and-swap with respect to every other operation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    AnalysisResult, BlobLocation, HandoffError, OwnerId, RecordId, RecordStatus, TaskRecord,
};
use crate::observability::StatusCounts;
use crate::ports::{
    AgentProgressSink, Clock, DispatchOrigin, FailureDisposition, IdGenerator, Page, TaskStore,
};

/// In-memory store state.
#[derive(Default)]
struct InMemoryStoreState {
    /// All records (single source of truth).
    records: HashMap<RecordId, TaskRecord>,
}

impl InMemoryStoreState {
    fn record_mut(&mut self, id: RecordId) -> Result<&mut TaskRecord, HandoffError> {
        self.records.get_mut(&id).ok_or(HandoffError::NotFound(id))
    }
}

/// In-memory store implementation.
pub struct InMemoryTaskStore {
    state: Arc<Mutex<InMemoryStoreState>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl InMemoryTaskStore {
    pub fn new(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryStoreState::default())),
            clock,
            ids,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(
        &self,
        owner_id: OwnerId,
        blob: BlobLocation,
        duration_seconds: u32,
    ) -> Result<TaskRecord, HandoffError> {
        let record = TaskRecord::new(
            self.ids.generate_record_id(),
            owner_id,
            blob,
            duration_seconds,
            self.now(),
        );
        let mut state = self.state.lock().await;
        state.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: RecordId) -> Result<TaskRecord, HandoffError> {
        let state = self.state.lock().await;
        state.records.get(&id).cloned().ok_or(HandoffError::NotFound(id))
    }

    async fn conditional_transition(
        &self,
        id: RecordId,
        from: RecordStatus,
        to: RecordStatus,
    ) -> Result<bool, HandoffError> {
        // Completed は結果と同時にしか書けない（AgentProgressSink::complete）
        if !from.can_transition_to(to) || to == RecordStatus::Completed {
            return Err(HandoffError::IllegalTransition { from, to });
        }
        let now = self.now();
        let mut state = self.state.lock().await;
        let record = state.record_mut(id)?;
        if record.status != from {
            return Ok(false);
        }
        record.set_status(to, now);
        Ok(true)
    }

    async fn find_reclaimable(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, HandoffError> {
        let state = self.state.lock().await;
        let mut candidates: Vec<TaskRecord> = state
            .records
            .values()
            .filter(|r| r.is_reclaimable(cutoff))
            .cloned()
            .collect();
        candidates.sort_by_key(|r| (r.created_at, r.id));
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn record_dispatch_failure(
        &self,
        id: RecordId,
        origin: DispatchOrigin,
        max_failures: u32,
    ) -> Result<FailureDisposition, HandoffError> {
        let now = self.now();
        let mut state = self.state.lock().await;
        let record = state.record_mut(id)?;
        if record.status.is_terminal() {
            return Ok(FailureDisposition::Untouched {
                status: record.status,
            });
        }
        record.failed_dispatches += 1;
        record.updated_at = now;
        let failed_dispatches = record.failed_dispatches;

        // この dispatch が持っている状態のときだけ status を書き換える
        let owned = matches!(
            (origin, record.status),
            (DispatchOrigin::Organic, RecordStatus::Uploaded)
                | (DispatchOrigin::Reclaim, RecordStatus::ProcessingAsr)
        );
        if !owned {
            return Ok(FailureDisposition::Untouched {
                status: record.status,
            });
        }
        if failed_dispatches >= max_failures {
            record.set_status(RecordStatus::AgentFailed, now);
            return Ok(FailureDisposition::AgentFailed { failed_dispatches });
        }
        if origin == DispatchOrigin::Reclaim {
            // claim の解放。ここ以外で後退はしない
            record.set_status(RecordStatus::Uploaded, now);
        }
        Ok(FailureDisposition::Retryable { failed_dispatches })
    }

    async fn mark_agent_failed(&self, id: RecordId) -> Result<bool, HandoffError> {
        let now = self.now();
        let mut state = self.state.lock().await;
        let record = state.record_mut(id)?;
        if record.status.is_terminal() {
            return Ok(false);
        }
        record.set_status(RecordStatus::AgentFailed, now);
        Ok(true)
    }

    async fn list_by_owner(
        &self,
        owner_id: OwnerId,
        page: usize,
        page_size: usize,
    ) -> Result<Page, HandoffError> {
        let state = self.state.lock().await;
        let mut owned: Vec<&TaskRecord> = state
            .records
            .values()
            .filter(|r| r.owner_id == owner_id)
            .collect();
        owned.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

        let total = owned.len();
        let offset = page.saturating_sub(1).saturating_mul(page_size);
        let items = owned
            .into_iter()
            .skip(offset)
            .take(page_size)
            .cloned()
            .collect();
        Ok(Page { items, total })
    }

    async fn counts_by_status(&self) -> Result<StatusCounts, HandoffError> {
        let state = self.state.lock().await;
        let mut counts = StatusCounts::default();
        for record in state.records.values() {
            counts.add(record.status);
        }
        Ok(counts)
    }
}

#[async_trait]
impl AgentProgressSink for InMemoryTaskStore {
    async fn advance(
        &self,
        id: RecordId,
        from: RecordStatus,
        to: RecordStatus,
    ) -> Result<bool, HandoffError> {
        self.conditional_transition(id, from, to).await
    }

    async fn complete(
        &self,
        id: RecordId,
        from: RecordStatus,
        result: AnalysisResult,
    ) -> Result<bool, HandoffError> {
        if !from.can_transition_to(RecordStatus::Completed) {
            return Err(HandoffError::IllegalTransition {
                from,
                to: RecordStatus::Completed,
            });
        }
        let now = self.now();
        let mut state = self.state.lock().await;
        let record = state.record_mut(id)?;
        if record.status != from {
            return Ok(false);
        }
        record.complete(result, now);
        Ok(true)
    }
}
