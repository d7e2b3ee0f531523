//! app 層テスト用の共通フィクスチャ

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::domain::{BlobLocation, OwnerId, TaskRecord};
use crate::impls::InMemoryTaskStore;
use crate::ports::{
    AgentError, AgentRequest, AgentTransport, IdGenerator, ManualClock, TaskStore, UlidGenerator,
};

pub(crate) fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

pub(crate) fn store_with_clock() -> (Arc<InMemoryTaskStore>, ManualClock) {
    let clock = ManualClock::new(start());
    let ids = Arc::new(UlidGenerator::new(clock.clone()));
    let store = InMemoryTaskStore::new(Arc::new(clock.clone()), ids);
    (Arc::new(store), clock)
}

pub(crate) fn owner() -> OwnerId {
    UlidGenerator::new(ManualClock::new(start())).generate_owner_id()
}

pub(crate) async fn uploaded(store: &InMemoryTaskStore, owner_id: OwnerId) -> TaskRecord {
    store
        .create(owner_id, BlobLocation::new("voicebridge", "voices/test.webm"), 12)
        .await
        .unwrap()
}

/// 台本どおりに応答する AgentTransport
///
/// 台本が尽きたら以降は成功を返します。
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Result<(), AgentError>>>,
    calls: Mutex<Vec<AgentRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new(script: impl IntoIterator<Item = Result<(), AgentError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn accepting() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn always_failing() -> Arc<Self> {
        let unavailable = AgentError::Server {
            status: 503,
            body: String::new(),
        };
        Self::new(std::iter::repeat_n(Err(unavailable), 1024))
    }

    pub(crate) fn calls(&self) -> Vec<AgentRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl AgentTransport for ScriptedTransport {
    async fn submit(&self, request: &AgentRequest) -> Result<(), AgentError> {
        self.calls.lock().unwrap().push(request.clone());
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}
