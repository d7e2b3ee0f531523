//! HttpAgentTransport - reqwest による AgentTransport 実装
//!
//! `POST {base_url}/api/agent/process` に JSON を送り、Bearer トークンで認証します。
//! ステータスコードの分類だけを行い、リトライはしません。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::config::AgentConfig;
use crate::ports::{AgentError, AgentRequest, AgentTransport};

const PROCESS_PATH: &str = "/api/agent/process";

pub struct HttpAgentTransport {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl HttpAgentTransport {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AgentError> {
        let client = Client::builder()
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}{PROCESS_PATH}", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
        })
    }

    pub fn from_config(config: &AgentConfig) -> Result<Self, AgentError> {
        Self::new(&config.base_url, config.api_key.clone(), config.request_timeout())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl AgentTransport for HttpAgentTransport {
    async fn submit(&self, request: &AgentRequest) -> Result<(), AgentError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AgentError::Timeout
                } else {
                    AgentError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        Err(AgentError::from_status(status.as_u16(), body))
    }
}
