//! Agent runtime client: replaces the set of indexes an agent's search tool may query.

use crate::config::get_config;
use crate::provider::client::{format_endpoint, normalize_base_url};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Errors returned while interacting with the agent runtime.
#[derive(Debug, Error)]
pub enum AgentRuntimeError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid agent runtime URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Runtime responded with an unexpected status code.
    #[error("Unexpected agent runtime response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the runtime.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
}

/// Operations consumed from the remote agent runtime.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Replace the agent's searchable index set with exactly `index_ids`.
    ///
    /// Idempotent: sending the same set twice leaves the agent unchanged.
    async fn set_tool_index_set(
        &self,
        remote_id: &str,
        index_ids: &[String],
    ) -> Result<(), AgentRuntimeError>;
}

/// HTTP implementation of [`AgentRuntime`] for assistants-style runtimes.
pub struct HttpAgentRuntime {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
}

impl HttpAgentRuntime {
    /// Construct a new client using configuration derived from the environment.
    pub fn new() -> Result<Self, AgentRuntimeError> {
        let config = get_config();
        Self::with_base_url(
            &config.agent_runtime_url,
            config.agent_runtime_api_key.clone(),
            config.request_timeout(),
        )
    }

    /// Construct a client for an explicit endpoint.
    pub fn with_base_url(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, AgentRuntimeError> {
        let client = Client::builder()
            .user_agent("knowledge-sync/0.1")
            .timeout(timeout)
            .build()?;
        let base_url = normalize_base_url(base_url).map_err(AgentRuntimeError::InvalidUrl)?;
        tracing::debug!(url = %base_url, "Initialized agent runtime client");
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }
}

#[async_trait]
impl AgentRuntime for HttpAgentRuntime {
    async fn set_tool_index_set(
        &self,
        remote_id: &str,
        index_ids: &[String],
    ) -> Result<(), AgentRuntimeError> {
        let body = json!({
            "tools": [{ "type": "file_search" }],
            "tool_resources": {
                "file_search": { "vector_store_ids": index_ids }
            }
        });
        let url = format_endpoint(&self.base_url, &format!("assistants/{remote_id}"));
        let mut request = self
            .client
            .request(Method::POST, url)
            .header("OpenAI-Beta", "assistants=v2")
            .json(&body);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if response.status().is_success() {
            tracing::debug!(
                remote_id,
                indexes = index_ids.len(),
                "Agent tool index set replaced"
            );
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = AgentRuntimeError::UnexpectedStatus { status, body };
            tracing::error!(remote_id, error = %error, "Agent runtime request failed");
            Err(error)
        }
    }
}
