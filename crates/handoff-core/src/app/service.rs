//! RecordService - リクエスト処理側から呼ばれる窓口
//!
//! # 提供する操作
//! - `upload`: 検証 → Blob 保存 → レコード作成 → 非同期ディスパッチ
//! - `get` / `watch`: 所有者だけが読める
//! - `cancel`: 所有者だけ・非終端状態だけ
//! - `history`: 所有者のレコードを新しい順にページング
//!
//! 所有者の確認はすべてこの層で行います（ストアは ID だけを見る）。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::app::dispatcher::Dispatcher;
use crate::app::projector::{StatusProjector, StatusSubscription};
use crate::config::UploadConfig;
use crate::domain::{HandoffError, OwnerId, RecordId, RecordStatus, TaskRecord};
use crate::ports::{AgentRequest, BlobStore, Clock, IdGenerator, TaskStore};

pub const DEFAULT_PAGE_SIZE: usize = 10;

/// A recording as received from the client.
#[derive(Debug, Clone)]
pub struct NewRecording {
    pub owner_id: OwnerId,
    pub bytes: Vec<u8>,
    /// File extension without the dot; may be empty.
    pub extension: String,
    pub duration_seconds: u32,
}

/// One page of history plus the paging that was actually applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub items: Vec<TaskRecord>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

pub struct RecordService {
    store: Arc<dyn TaskStore>,
    blobs: Arc<dyn BlobStore>,
    dispatcher: Dispatcher,
    projector: StatusProjector,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    config: UploadConfig,
}

impl RecordService {
    pub fn new(
        store: Arc<dyn TaskStore>,
        blobs: Arc<dyn BlobStore>,
        dispatcher: Dispatcher,
        projector: StatusProjector,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        config: UploadConfig,
    ) -> Self {
        Self {
            store,
            blobs,
            dispatcher,
            projector,
            clock,
            ids,
            config,
        }
    }

    /// Store the recording, create its record and notify the agent in the background.
    ///
    /// Returns as soon as the record exists; the dispatch outcome is settled by the dispatcher.
    pub async fn upload(&self, recording: NewRecording) -> Result<TaskRecord, HandoffError> {
        let size = recording.bytes.len();
        if size == 0 {
            return Err(HandoffError::Validation("recording is empty".into()));
        }
        if size > self.config.max_payload_bytes {
            return Err(HandoffError::PayloadTooLarge {
                size,
                limit: self.config.max_payload_bytes,
            });
        }
        if recording.duration_seconds == 0 {
            return Err(HandoffError::Validation(
                "duration must be at least one second".into(),
            ));
        }
        let extension = normalize_extension(&recording.extension)?;

        let key = self.object_key(&extension);
        let location = self
            .blobs
            .put(&key, recording.bytes, content_type(&extension))
            .await?;

        let record = self
            .store
            .create(recording.owner_id, location, recording.duration_seconds)
            .await?;
        tracing::info!(
            record_id = %record.id,
            owner_id = %record.owner_id,
            key = %record.blob.key,
            size,
            "recording uploaded"
        );

        // handle は捨てる。結果の記録は dispatcher 側で完結する
        // 満杯で受け付けられなかった分は Reclaimer が拾う
        drop(self.dispatcher.notify_async(AgentRequest::for_record(&record)));

        Ok(record)
    }

    /// `voices/YYYY/MM/DD/<ulid>-HHMMSS.<ext>`
    fn object_key(&self, extension: &str) -> String {
        let now = self.clock.now();
        let mut key = format!(
            "voices/{}/{}-{}",
            now.format("%Y/%m/%d"),
            self.ids.generate_ulid(),
            now.format("%H%M%S"),
        );
        if !extension.is_empty() {
            key.push('.');
            key.push_str(extension);
        }
        key
    }

    pub async fn get(&self, id: RecordId, caller: OwnerId) -> Result<TaskRecord, HandoffError> {
        let record = self.store.get(id).await?;
        ensure_owner(&record, caller)?;
        Ok(record)
    }

    /// Live status stream for one of the caller's records.
    pub async fn watch(
        &self,
        id: RecordId,
        caller: OwnerId,
    ) -> Result<StatusSubscription, HandoffError> {
        self.get(id, caller).await?;
        Ok(self.projector.subscribe(id))
    }

    /// Cancel a non-terminal record. Agent work already in flight is not interrupted.
    pub async fn cancel(&self, id: RecordId, caller: OwnerId) -> Result<TaskRecord, HandoffError> {
        loop {
            let record = self.store.get(id).await?;
            ensure_owner(&record, caller)?;
            if record.status.is_terminal() {
                return Err(HandoffError::InvalidState {
                    record: id,
                    status: record.status,
                });
            }

            if self
                .store
                .conditional_transition(id, record.status, RecordStatus::Cancelled)
                .await?
            {
                tracing::info!(record_id = %id, from = %record.status, "record cancelled");
                return self.store.get(id).await;
            }
            // 読んでから書くまでに状態が進んだ。読み直す
            tracing::debug!(record_id = %id, "cancel raced with another writer, retrying");
        }
    }

    /// Caller's records, newest first. `page` is 1-based; `page_size` is capped.
    pub async fn history(
        &self,
        caller: OwnerId,
        page: Option<usize>,
        page_size: Option<usize>,
    ) -> Result<History, HandoffError> {
        let page = page.unwrap_or(1).max(1);
        let page_size = page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, self.config.max_page_size);

        let found = self.store.list_by_owner(caller, page, page_size).await?;
        Ok(History {
            items: found.items,
            total: found.total,
            page,
            page_size,
        })
    }
}

fn ensure_owner(record: &TaskRecord, caller: OwnerId) -> Result<(), HandoffError> {
    if record.owner_id == caller {
        Ok(())
    } else {
        Err(HandoffError::Forbidden {
            record: record.id,
            caller,
        })
    }
}

fn normalize_extension(raw: &str) -> Result<String, HandoffError> {
    let ext = raw.trim().trim_start_matches('.').to_ascii_lowercase();
    if ext.len() > 10 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(HandoffError::Validation(format!(
            "unsupported file extension {raw:?}"
        )));
    }
    Ok(ext)
}

fn content_type(extension: &str) -> Option<&'static str> {
    match extension {
        "webm" => Some("audio/webm"),
        "wav" => Some("audio/wav"),
        "mp3" => Some("audio/mpeg"),
        "m4a" => Some("audio/mp4"),
        "ogg" => Some("audio/ogg"),
        _ => None,
    }
}
