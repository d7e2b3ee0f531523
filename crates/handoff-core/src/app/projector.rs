//! StatusProjector - レコードの状態を購読者 1 人分のイベント列に変換
//!
//! 購読ごとに 1 タスクを起動し、poll_interval ごとにストアを読み直して 1 件ずつ送ります。
//! 最初の読み取りは即時です。
//!
//! # 終了条件
//! - 終端状態（completed / failed / cancelled / agent_failed）を送った後
//! - レコードが見つからない、またはストアが失敗した（エラーイベントを 1 件送って終了）
//! - 購読者が `StatusSubscription` を drop した（送信時・待機中のどちらでも検知）
//!
//! 一度終わった購読は再開しません。続きが欲しければ `subscribe` し直します。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::ProjectorConfig;
use crate::domain::{HandoffError, RecordId, StatusEvent};
use crate::ports::TaskStore;

pub struct StatusProjector {
    store: Arc<dyn TaskStore>,
    poll_interval: Duration,
    channel_capacity: usize,
}

impl StatusProjector {
    pub fn new(store: Arc<dyn TaskStore>, config: &ProjectorConfig) -> Self {
        Self {
            store,
            poll_interval: config.poll_interval(),
            channel_capacity: config.channel_capacity.max(1),
        }
    }

    pub fn subscribe(&self, record_id: RecordId) -> StatusSubscription {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let task = tokio::spawn(project(
            Arc::clone(&self.store),
            record_id,
            self.poll_interval,
            tx,
        ));
        StatusSubscription {
            record_id,
            events: rx,
            task,
        }
    }
}

/// One subscriber's view of one record. Dropping it stops the poller.
pub struct StatusSubscription {
    record_id: RecordId,
    events: mpsc::Receiver<StatusEvent>,
    task: JoinHandle<()>,
}

impl StatusSubscription {
    pub fn record_id(&self) -> RecordId {
        self.record_id
    }

    /// Next event, or `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<StatusEvent> {
        self.events.recv().await
    }

    /// Disconnect and hand back the poller task so the caller can wait for it.
    pub fn cancel(self) -> JoinHandle<()> {
        drop(self.events);
        self.task
    }
}

async fn project(
    store: Arc<dyn TaskStore>,
    record_id: RecordId,
    poll_interval: Duration,
    tx: mpsc::Sender<StatusEvent>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tx.closed() => {
                tracing::debug!(%record_id, "status subscriber disconnected");
                return;
            }
            _ = ticker.tick() => {}
        }

        let event = match store.get(record_id).await {
            Ok(record) => StatusEvent::from_record(&record),
            Err(e @ HandoffError::NotFound(_)) => StatusEvent::from_error(&e),
            Err(e) => {
                tracing::error!(%record_id, error = %e, "status read failed");
                StatusEvent::from_error(&e)
            }
        };

        let last = event.is_final();
        if tx.send(event).await.is_err() {
            tracing::debug!(%record_id, "status subscriber disconnected");
            return;
        }
        if last {
            return;
        }
    }
}
