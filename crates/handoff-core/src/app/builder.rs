//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! Config から App を組み立てます。差し替えたい port だけ `with_*` で渡し、
//! 残りは開発用の実装（インメモリ / reqwest）で埋めます。
//!
//! # Fail-fast
//! - Config の検証に失敗したら BuildError
//! - 本物の HTTP transport を使うのに API key が無ければ BuildError

use std::sync::Arc;

use crate::app::dispatcher::Dispatcher;
use crate::app::projector::StatusProjector;
use crate::app::reclaimer::{Reclaimer, ReclaimerHandle};
use crate::app::service::RecordService;
use crate::config::{Config, ConfigError};
use crate::impls::{HttpAgentTransport, InMemoryBlobStore, InMemoryTaskStore};
use crate::ports::{
    AgentError, AgentTransport, BlobStore, Clock, IdGenerator, SystemClock, TaskStore,
    UlidGenerator,
};

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("agent.api_key is empty; set it in the config file or via {env}")]
    MissingApiKey { env: &'static str },

    #[error("failed to build agent transport: {0}")]
    Transport(#[from] AgentError),
}

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new(Config::load("handoff.toml")?)
///     .with_transport(Arc::new(MyTransport))
///     .build()?;
/// let reclaimer = app.start_reclaimer();
/// ```
pub struct AppBuilder {
    config: Config,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    store: Option<Arc<dyn TaskStore>>,
    blobs: Option<Arc<dyn BlobStore>>,
    transport: Option<Arc<dyn AgentTransport>>,
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            clock: None,
            ids: None,
            store: None,
            blobs: None,
            transport: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn AgentTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        let config = self.config;
        config.validate()?;

        let transport: Arc<dyn AgentTransport> = match self.transport {
            Some(transport) => transport,
            None => {
                if config.agent.api_key.is_empty() {
                    return Err(BuildError::MissingApiKey {
                        env: crate::config::API_KEY_ENV,
                    });
                }
                Arc::new(HttpAgentTransport::from_config(&config.agent)?)
            }
        };

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids: Arc<dyn IdGenerator> = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let store: Arc<dyn TaskStore> = self.store.unwrap_or_else(|| {
            Arc::new(InMemoryTaskStore::new(Arc::clone(&clock), Arc::clone(&ids)))
        });
        let blobs: Arc<dyn BlobStore> = self
            .blobs
            .unwrap_or_else(|| Arc::new(InMemoryBlobStore::new(config.upload.bucket.clone())));

        let dispatcher = Dispatcher::new(transport, Arc::clone(&store), &config.agent);
        let projector = StatusProjector::new(Arc::clone(&store), &config.projector);
        let reclaimer = Reclaimer::new(
            Arc::clone(&store),
            dispatcher.clone(),
            Arc::clone(&clock),
            config.reclaimer.clone(),
        );
        let service = RecordService::new(
            Arc::clone(&store),
            blobs,
            dispatcher,
            projector,
            clock,
            ids,
            config.upload.clone(),
        );

        Ok(App {
            config,
            store,
            service: Arc::new(service),
            reclaimer: Arc::new(reclaimer),
        })
    }
}

/// App は組み立て済みのコンポーネント一式
pub struct App {
    pub config: Config,
    pub store: Arc<dyn TaskStore>,
    pub service: Arc<RecordService>,
    pub reclaimer: Arc<Reclaimer>,
}

impl App {
    /// Spawn the periodic reclaim sweep.
    pub fn start_reclaimer(&self) -> ReclaimerHandle {
        Arc::clone(&self.reclaimer).spawn()
    }
}
