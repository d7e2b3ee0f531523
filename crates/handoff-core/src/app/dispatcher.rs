//! Dispatcher - 外部エージェントへの通知（リトライ付き）
//!
//! 1 回の論理的な通知 = 最大 `max_retries + 1` 回の物理的な送信。
//! 結果（DispatchOutcome）に応じてストアへの記録まで行います。
//!
//! # フロー
//! 1. `AgentTransport::submit` を `attempt_timeout` で包んで送信
//! 2. 一時的な失敗（transport / timeout / 5xx）は backoff して再送
//! 3. 4xx は即座に確定（再送しない）
//! 4. 結果をストアに反映
//!    - Accepted: 何もしない（以降はエージェントが状態を進める）
//!    - Rejected: `mark_agent_failed`
//!    - Exhausted: `record_dispatch_failure`（回数上限で agent_failed）
//!
//! # 実行モード
//! - `notify_sync`: 呼び出し側が結果を待つ（Reclaimer 用）
//! - `notify_async`: 有限のワーカープール（Semaphore）上で実行し、すぐ戻る（アップロード直後用）
//!   受け付け数（実行中 + 待機中）にも上限があり、溢れた分は送らずに Reclaimer に任せる

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::app::retry::RetryPolicy;
use crate::config::AgentConfig;
use crate::domain::HandoffError;
use crate::ports::{
    AgentError, AgentRequest, AgentTransport, DispatchOrigin, FailureDisposition, TaskStore,
};

/// Result of one logical dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The agent answered 2xx.
    Accepted { attempts: u32 },

    /// The agent answered 4xx. Never retried.
    Rejected { error: AgentError },

    /// Every attempt failed with a retryable error.
    Exhausted { attempts: u32, last_error: AgentError },
}

impl DispatchOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, DispatchOutcome::Accepted { .. })
    }

    /// The failure as a domain error (code 30005), `None` when accepted.
    pub fn error(&self) -> Option<HandoffError> {
        match self {
            DispatchOutcome::Accepted { .. } => None,
            DispatchOutcome::Rejected { error } => Some(HandoffError::Agent(error.clone())),
            DispatchOutcome::Exhausted { last_error, .. } => {
                Some(HandoffError::Agent(last_error.clone()))
            }
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn AgentTransport>,
    store: Arc<dyn TaskStore>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
    max_dispatch_failures: u32,
    pool: Arc<Semaphore>,
    backlog: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn AgentTransport>,
        store: Arc<dyn TaskStore>,
        config: &AgentConfig,
    ) -> Self {
        Self {
            transport,
            store,
            policy: config.retry_policy(),
            attempt_timeout: config.request_timeout(),
            max_dispatch_failures: config.max_dispatch_failures,
            pool: Arc::new(Semaphore::new(config.worker_pool_size.max(1))),
            backlog: Arc::new(Semaphore::new(
                config.max_pending_dispatches.max(config.worker_pool_size).max(1),
            )),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Upper bound on the wall time of one `notify_sync` call.
    pub fn dispatch_bound(&self) -> Duration {
        let attempts = self.policy.max_attempts();
        let waiting: Duration = (1..attempts).map(|n| self.policy.next_delay(n)).sum();
        self.attempt_timeout * attempts + waiting
    }

    /// Fire-and-forget dispatch on the worker pool.
    ///
    /// The handle may be dropped; bookkeeping happens inside the task either way.
    /// Returns `None` without calling the agent when the backlog is full. The
    /// record stays `uploaded` and the reclaimer picks it up after the grace window.
    pub fn notify_async(&self, request: AgentRequest) -> Option<JoinHandle<DispatchOutcome>> {
        let Ok(admitted) = Arc::clone(&self.backlog).try_acquire_owned() else {
            tracing::warn!(
                record_id = %request.record_id,
                "dispatch backlog full, leaving record for reclaimer"
            );
            return None;
        };
        let dispatcher = self.clone();
        Some(tokio::spawn(async move {
            let _admitted = admitted;
            // pool は close しないので acquire は失敗しない
            let _permit = Arc::clone(&dispatcher.pool).acquire_owned().await.ok();
            dispatcher.notify_sync(request, DispatchOrigin::Organic).await
        }))
    }

    /// Dispatch and wait for the outcome. Store bookkeeping is done before returning.
    pub async fn notify_sync(
        &self,
        request: AgentRequest,
        origin: DispatchOrigin,
    ) -> DispatchOutcome {
        let outcome = self.submit_with_retry(&request).await;
        self.settle(&request, origin, &outcome).await;
        outcome
    }

    async fn submit_with_retry(&self, request: &AgentRequest) -> DispatchOutcome {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result =
                match tokio::time::timeout(self.attempt_timeout, self.transport.submit(request))
                    .await
                {
                    Ok(result) => result,
                    Err(_elapsed) => Err(AgentError::Timeout),
                };

            let error = match result {
                Ok(()) => return DispatchOutcome::Accepted { attempts: attempt },
                Err(error) if !error.is_retryable() => {
                    return DispatchOutcome::Rejected { error };
                }
                Err(error) => error,
            };

            if attempt >= max_attempts {
                return DispatchOutcome::Exhausted {
                    attempts: attempt,
                    last_error: error,
                };
            }

            let delay = self.policy.next_delay(attempt);
            tracing::warn!(
                record_id = %request.record_id,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "agent call failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn settle(
        &self,
        request: &AgentRequest,
        origin: DispatchOrigin,
        outcome: &DispatchOutcome,
    ) {
        let record_id = request.record_id;
        let code = outcome.error().map(|e| e.code());
        match outcome {
            DispatchOutcome::Accepted { attempts } => {
                tracing::info!(%record_id, ?origin, attempts, "agent accepted record");
            }
            DispatchOutcome::Rejected { error } => {
                match self.store.mark_agent_failed(record_id).await {
                    Ok(true) => {
                        tracing::error!(
                            %record_id,
                            ?origin,
                            ?code,
                            %error,
                            "agent rejected record, marked agent_failed"
                        );
                    }
                    Ok(false) => {
                        tracing::warn!(
                            %record_id,
                            ?origin,
                            %error,
                            "agent rejected record that is already terminal"
                        );
                    }
                    Err(e) => {
                        tracing::error!(
                            %record_id,
                            %error,
                            store_error = %e,
                            "failed to mark record agent_failed"
                        );
                    }
                }
            }
            DispatchOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                let disposition = self
                    .store
                    .record_dispatch_failure(record_id, origin, self.max_dispatch_failures)
                    .await;
                match disposition {
                    Ok(FailureDisposition::Retryable { failed_dispatches }) => {
                        tracing::warn!(
                            %record_id,
                            ?origin,
                            attempts,
                            failed_dispatches,
                            error = %last_error,
                            "agent dispatch exhausted, left for reclaimer"
                        );
                    }
                    Ok(FailureDisposition::AgentFailed { failed_dispatches }) => {
                        tracing::error!(
                            %record_id,
                            ?origin,
                            ?code,
                            failed_dispatches,
                            error = %last_error,
                            "agent dispatch budget spent, marked agent_failed"
                        );
                    }
                    Ok(FailureDisposition::Untouched { status }) => {
                        tracing::info!(%record_id, %status, "dispatch failed after record moved on");
                    }
                    Err(e) => {
                        tracing::error!(%record_id, error = %e, "failed to record dispatch failure");
                    }
                }
            }
        }
    }
}
