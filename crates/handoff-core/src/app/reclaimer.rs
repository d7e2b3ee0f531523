//! Reclaimer - 取りこぼしたディスパッチの回収ループ
//!
//! アップロード直後の通知が失敗・消失したレコードを定期的に拾い直します。
//!
//! # 1 tick のフロー
//! 1. `uploaded` のまま grace window を超えたレコードを古い順に最大 batch_size 件取得
//! 2. 各レコードを `uploaded -> processing_asr` で claim（負けたらスキップ）
//! 3. claim できたものだけ `notify_sync`（DispatchOrigin::Reclaim）
//! 4. レコード間に pacing delay を挟む
//!
//! # 停止
//! `watch::Sender` に true を送るか drop すると、tick 待ち・pacing 待ちのどちらでも即座に抜けます。
//! 送信中のディスパッチは中断しません（claim の後始末まで終わらせるため）。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::app::dispatcher::{DispatchOutcome, Dispatcher};
use crate::config::ReclaimerConfig;
use crate::domain::{HandoffError, RecordStatus};
use crate::ports::{AgentRequest, Clock, DispatchOrigin, TaskStore};

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub candidates: usize,
    pub claimed: usize,
    /// Claims lost to another writer.
    pub lost: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub exhausted: usize,
}

pub struct Reclaimer {
    store: Arc<dyn TaskStore>,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
    config: ReclaimerConfig,
}

impl Reclaimer {
    pub fn new(
        store: Arc<dyn TaskStore>,
        dispatcher: Dispatcher,
        clock: Arc<dyn Clock>,
        config: ReclaimerConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            clock,
            config,
        }
    }

    /// Records created strictly before this instant are eligible.
    fn cutoff(&self) -> DateTime<Utc> {
        let grace = chrono::Duration::from_std(self.config.grace_window())
            .unwrap_or(chrono::Duration::MAX);
        self.clock
            .now()
            .checked_sub_signed(grace)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Run one sweep to completion.
    pub async fn run_tick(&self) -> Result<TickReport, HandoffError> {
        let (_never, mut shutdown) = watch::channel(false);
        self.sweep(&mut shutdown).await
    }

    async fn sweep(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<TickReport, HandoffError> {
        let candidates = self
            .store
            .find_reclaimable(self.cutoff(), self.config.batch_size)
            .await?;

        let mut report = TickReport {
            candidates: candidates.len(),
            ..TickReport::default()
        };

        for record in candidates {
            if report.claimed > 0 {
                tokio::select! {
                    _ = stopped(shutdown) => {
                        tracing::info!("reclaimer sweep interrupted by shutdown");
                        break;
                    }
                    _ = tokio::time::sleep(self.config.pacing_delay()) => {}
                }
            }

            let claimed = match self
                .store
                .conditional_transition(
                    record.id,
                    RecordStatus::Uploaded,
                    RecordStatus::ProcessingAsr,
                )
                .await
            {
                Ok(claimed) => claimed,
                Err(e) => {
                    tracing::error!(record_id = %record.id, error = %e, "claim failed");
                    continue;
                }
            };
            if !claimed {
                tracing::debug!(record_id = %record.id, "claim lost to another writer");
                report.lost += 1;
                continue;
            }
            report.claimed += 1;

            tracing::info!(
                record_id = %record.id,
                age_secs = (self.clock.now() - record.created_at).num_seconds(),
                failed_dispatches = record.failed_dispatches,
                "reclaimed stale record"
            );
            let outcome = self
                .dispatcher
                .notify_sync(AgentRequest::for_record(&record), DispatchOrigin::Reclaim)
                .await;
            match outcome {
                DispatchOutcome::Accepted { .. } => report.accepted += 1,
                DispatchOutcome::Rejected { .. } => report.rejected += 1,
                DispatchOutcome::Exhausted { .. } => report.exhausted += 1,
            }
        }

        Ok(report)
    }

    /// Tick forever until `shutdown` flips to true or its sender is dropped.
    ///
    /// The first sweep happens one interval after start.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.tick_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            tick_ms = self.config.tick_interval_ms,
            grace_ms = self.config.grace_window_ms,
            batch_size = self.config.batch_size,
            "reclaimer started"
        );

        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }

            match self.sweep(&mut shutdown).await {
                Ok(report) if report.candidates > 0 => {
                    tracing::info!(?report, "reclaimer tick");
                }
                Ok(_) => tracing::debug!("reclaimer tick: nothing to do"),
                Err(e) => tracing::error!(error = %e, "reclaimer tick aborted"),
            }
        }

        tracing::info!("reclaimer stopped");
    }

    /// Spawn `run` on the runtime.
    pub fn spawn(self: Arc<Self>) -> ReclaimerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move { self.run(shutdown_rx).await });
        ReclaimerHandle { shutdown_tx, join }
    }
}

/// Running reclaimer.
/// - `request_shutdown()` stops it at the next suspension point
/// - dropping the handle stops it as well
pub struct ReclaimerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ReclaimerHandle {
    pub fn request_shutdown(&self) {
        // receiver may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        let _ = self.join.await;
    }
}

/// Resolves once shutdown is requested (or the sender is dropped).
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let requested = *shutdown.borrow_and_update();
        if requested || shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::{ScriptedTransport, owner, store_with_clock, uploaded};
    use crate::config::AgentConfig;
    use crate::domain::{BlobLocation, OwnerId, RecordId, TaskRecord};
    use crate::impls::InMemoryTaskStore;
    use crate::observability::StatusCounts;
    use crate::ports::{FailureDisposition, ManualClock, Page};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn agent_config() -> AgentConfig {
        AgentConfig {
            max_retries: 0,
            max_dispatch_failures: 3,
            ..AgentConfig::default()
        }
    }

    fn reclaimer(
        store: Arc<dyn TaskStore>,
        transport: Arc<ScriptedTransport>,
        clock: &ManualClock,
    ) -> Reclaimer {
        let dispatcher = Dispatcher::new(transport, Arc::clone(&store), &agent_config());
        Reclaimer::new(
            store,
            dispatcher,
            Arc::new(clock.clone()),
            ReclaimerConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn grace_window_is_respected() {
        let (store, clock) = store_with_clock();
        let old = uploaded(&store, owner()).await;
        clock.advance(chrono::Duration::seconds(2));
        let young = uploaded(&store, owner()).await;
        // old: 31s, young: 29s
        clock.advance(chrono::Duration::seconds(29));

        let transport = ScriptedTransport::accepting();
        let report = reclaimer(store.clone(), transport.clone(), &clock)
            .run_tick()
            .await
            .unwrap();

        assert_eq!(report.candidates, 1);
        assert_eq!(report.accepted, 1);
        assert_eq!(transport.calls()[0].record_id, old.id);
        assert_eq!(store.get(old.id).await.unwrap().status, RecordStatus::ProcessingAsr);
        assert_eq!(store.get(young.id).await.unwrap().status, RecordStatus::Uploaded);
    }

    #[tokio::test(start_paused = true)]
    async fn one_tick_claims_at_most_one_batch() {
        let (store, clock) = store_with_clock();
        for _ in 0..25 {
            uploaded(&store, owner()).await;
        }
        clock.advance(chrono::Duration::seconds(60));

        let transport = ScriptedTransport::accepting();
        let started = Instant::now();
        let report = reclaimer(store.clone(), transport.clone(), &clock)
            .run_tick()
            .await
            .unwrap();

        assert_eq!(report.candidates, 10);
        assert_eq!(report.claimed, 10);
        assert_eq!(transport.call_count(), 10);
        // 9 gaps between 10 dispatches
        assert_eq!(started.elapsed(), Duration::from_secs(18));

        let counts = store.counts_by_status().await.unwrap();
        assert_eq!(counts.processing_asr, 10);
        assert_eq!(counts.uploaded, 15);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_sweep_is_a_no_op() {
        let (store, clock) = store_with_clock();
        let transport = ScriptedTransport::accepting();

        let report = reclaimer(store, transport.clone(), &clock)
            .run_tick()
            .await
            .unwrap();

        assert_eq!(report, TickReport::default());
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_reclaims_end_in_agent_failed() {
        let (store, clock) = store_with_clock();
        let record = uploaded(&store, owner()).await;
        clock.advance(chrono::Duration::seconds(60));
        let transport = ScriptedTransport::always_failing();
        let reclaimer = reclaimer(store.clone(), transport.clone(), &clock);

        for expected in 1..=2 {
            let report = reclaimer.run_tick().await.unwrap();
            assert_eq!(report.exhausted, 1);
            let after = store.get(record.id).await.unwrap();
            assert_eq!(after.status, RecordStatus::Uploaded, "claim released");
            assert_eq!(after.failed_dispatches, expected);
        }

        reclaimer.run_tick().await.unwrap();
        assert_eq!(store.get(record.id).await.unwrap().status, RecordStatus::AgentFailed);

        let report = reclaimer.run_tick().await.unwrap();
        assert_eq!(report.candidates, 0);
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_reclaim_is_final() {
        let (store, clock) = store_with_clock();
        let record = uploaded(&store, owner()).await;
        clock.advance(chrono::Duration::seconds(60));
        let transport = ScriptedTransport::new([Err(crate::ports::AgentError::Rejected {
            status: 404,
            body: String::new(),
        })]);

        let report = reclaimer(store.clone(), transport, &clock)
            .run_tick()
            .await
            .unwrap();

        assert_eq!(report.rejected, 1);
        assert_eq!(store.get(record.id).await.unwrap().status, RecordStatus::AgentFailed);
    }

    /// 検索の失敗や、検索直後に別の writer が claim する状況を再現するストア
    struct FlakyStore {
        inner: Arc<InMemoryTaskStore>,
        fail_queries: AtomicBool,
        steal_claims: AtomicBool,
    }

    impl FlakyStore {
        fn new(inner: Arc<InMemoryTaskStore>) -> Arc<Self> {
            Arc::new(Self {
                inner,
                fail_queries: AtomicBool::new(false),
                steal_claims: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl TaskStore for FlakyStore {
        async fn create(
            &self,
            owner_id: OwnerId,
            blob: BlobLocation,
            duration_seconds: u32,
        ) -> Result<TaskRecord, HandoffError> {
            self.inner.create(owner_id, blob, duration_seconds).await
        }

        async fn get(&self, id: RecordId) -> Result<TaskRecord, HandoffError> {
            self.inner.get(id).await
        }

        async fn conditional_transition(
            &self,
            id: RecordId,
            from: RecordStatus,
            to: RecordStatus,
        ) -> Result<bool, HandoffError> {
            self.inner.conditional_transition(id, from, to).await
        }

        async fn find_reclaimable(
            &self,
            cutoff: DateTime<Utc>,
            limit: usize,
        ) -> Result<Vec<TaskRecord>, HandoffError> {
            if self.fail_queries.load(Ordering::SeqCst) {
                return Err(HandoffError::Store("connection refused".into()));
            }
            let found = self.inner.find_reclaimable(cutoff, limit).await?;
            if self.steal_claims.load(Ordering::SeqCst) {
                for record in &found {
                    self.inner
                        .conditional_transition(
                            record.id,
                            RecordStatus::Uploaded,
                            RecordStatus::ProcessingAsr,
                        )
                        .await?;
                }
            }
            Ok(found)
        }

        async fn record_dispatch_failure(
            &self,
            id: RecordId,
            origin: DispatchOrigin,
            max_failures: u32,
        ) -> Result<FailureDisposition, HandoffError> {
            self.inner.record_dispatch_failure(id, origin, max_failures).await
        }

        async fn mark_agent_failed(&self, id: RecordId) -> Result<bool, HandoffError> {
            self.inner.mark_agent_failed(id).await
        }

        async fn list_by_owner(
            &self,
            owner_id: OwnerId,
            page: usize,
            page_size: usize,
        ) -> Result<Page, HandoffError> {
            self.inner.list_by_owner(owner_id, page, page_size).await
        }

        async fn counts_by_status(&self) -> Result<StatusCounts, HandoffError> {
            self.inner.counts_by_status().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn store_failure_aborts_the_tick_and_the_next_tick_retries() {
        let (inner, clock) = store_with_clock();
        let record = uploaded(&inner, owner()).await;
        clock.advance(chrono::Duration::seconds(60));
        let store = FlakyStore::new(inner.clone());
        let transport = ScriptedTransport::accepting();
        let reclaimer = reclaimer(store.clone(), transport.clone(), &clock);

        store.fail_queries.store(true, Ordering::SeqCst);
        let err = reclaimer.run_tick().await.unwrap_err();
        assert!(matches!(err, HandoffError::Store(_)));
        assert_eq!(transport.call_count(), 0);

        store.fail_queries.store(false, Ordering::SeqCst);
        let report = reclaimer.run_tick().await.unwrap();
        assert_eq!(report.accepted, 1);
        assert_eq!(inner.get(record.id).await.unwrap().status, RecordStatus::ProcessingAsr);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_claims_are_skipped_without_dispatch() {
        let (inner, clock) = store_with_clock();
        uploaded(&inner, owner()).await;
        uploaded(&inner, owner()).await;
        clock.advance(chrono::Duration::seconds(60));
        let store = FlakyStore::new(inner);
        store.steal_claims.store(true, Ordering::SeqCst);
        let transport = ScriptedTransport::accepting();

        let report = reclaimer(store, transport.clone(), &clock)
            .run_tick()
            .await
            .unwrap();

        assert_eq!(report.candidates, 2);
        assert_eq!(report.lost, 2);
        assert_eq!(report.claimed, 0);
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_pacing() {
        let (store, clock) = store_with_clock();
        for _ in 0..3 {
            uploaded(&store, owner()).await;
        }
        clock.advance(chrono::Duration::seconds(60));
        let transport = ScriptedTransport::accepting();
        let handle = Arc::new(reclaimer(store.clone(), transport.clone(), &clock)).spawn();

        let started = Instant::now();
        // first tick at 10s dispatches one record, then paces until 12s
        tokio::time::sleep(Duration::from_secs(11)).await;
        handle.shutdown_and_join().await;

        assert_eq!(started.elapsed(), Duration::from_secs(11));
        assert_eq!(transport.call_count(), 1);
        assert_eq!(store.counts_by_status().await.unwrap().uploaded, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_tick_interval_runs_instead_of_panicking() {
        let (store, clock) = store_with_clock();
        uploaded(&store, owner()).await;
        clock.advance(chrono::Duration::seconds(60));
        let transport = ScriptedTransport::accepting();
        let dispatcher = Dispatcher::new(transport.clone(), store.clone(), &agent_config());
        let config = ReclaimerConfig {
            tick_interval_ms: 0,
            ..ReclaimerConfig::default()
        };
        let handle = Arc::new(Reclaimer::new(
            store.clone(),
            dispatcher,
            Arc::new(clock.clone()),
            config,
        ))
        .spawn();

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown_and_join().await;

        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_sender_stops_an_idle_loop() {
        let (store, clock) = store_with_clock();
        let reclaimer = reclaimer(store, ScriptedTransport::accepting(), &clock);
        let (tx, rx) = watch::channel(false);

        let run = tokio::spawn(async move { reclaimer.run(rx).await });
        drop(tx);

        tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .unwrap()
            .unwrap();
    }
}
