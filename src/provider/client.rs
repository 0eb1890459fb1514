//! HTTP client for an OpenAI-compatible vector-store/file API.

use crate::config::get_config;
use crate::knowledge::ChunkingProfile;
use crate::provider::IndexingProvider;
use crate::provider::types::{
    ChunkingStrategy, CreateBatchRequest, CreateIndexRequest, ExpirationPolicy, FileBatch,
    IdResponse, IndexStatus, ProviderError, StaticChunking, UpdateIndexRequest,
};
use async_trait::async_trait;
use reqwest::{
    Client, Method, StatusCode,
    multipart::{Form, Part},
};
use serde::de::DeserializeOwned;
use std::time::Duration;

const BETA_HEADER: (&str, &str) = ("OpenAI-Beta", "assistants=v2");

/// Lightweight HTTP client for the indexing provider.
pub struct ProviderClient {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
}

impl ProviderClient {
    /// Construct a new client using configuration derived from the environment.
    pub fn new() -> Result<Self, ProviderError> {
        let config = get_config();
        Self::with_base_url(
            &config.provider_url,
            config.provider_api_key.clone(),
            config.request_timeout(),
        )
    }

    /// Construct a client for an explicit endpoint.
    pub fn with_base_url(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .user_agent("knowledge-sync/0.1")
            .timeout(timeout)
            .build()?;
        let base_url = normalize_base_url(base_url).map_err(ProviderError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            has_api_key = api_key.as_deref().is_some_and(|value| !value.is_empty()),
            "Initialized indexing provider client"
        );
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self
            .client
            .request(method, url)
            .header(BETA_HEADER.0, BETA_HEADER.1);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.bearer_auth(api_key);
        }
        req
    }

    async fn read_json<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<T, ProviderError> {
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            Err(unexpected(response, operation).await)
        }
    }

    /// Treat `404 Not Found` as success: the resource is already gone.
    async fn ensure_deleted(
        &self,
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<(), ProviderError> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status == StatusCode::NOT_FOUND {
            tracing::debug!(operation, "Remote resource already absent");
            Ok(())
        } else {
            Err(unexpected(response, operation).await)
        }
    }
}

async fn unexpected(response: reqwest::Response, operation: &'static str) -> ProviderError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let error = ProviderError::UnexpectedStatus { status, body };
    tracing::error!(operation, error = %error, "Indexing provider request failed");
    error
}

#[async_trait]
impl IndexingProvider for ProviderClient {
    async fn create_index(
        &self,
        name: &str,
        expiration: ExpirationPolicy,
    ) -> Result<String, ProviderError> {
        let body = CreateIndexRequest {
            name,
            expires_after: expiration.to_wire(),
        };
        let response = self
            .request(Method::POST, "vector_stores")
            .json(&body)
            .send()
            .await?;
        let IdResponse { id } = self.read_json(response, "create_index").await?;
        tracing::debug!(index_id = %id, name, "Vector index created");
        Ok(id)
    }

    async fn attach_files_batch(
        &self,
        index_id: &str,
        file_ids: &[String],
        profile: ChunkingProfile,
    ) -> Result<FileBatch, ProviderError> {
        let body = CreateBatchRequest {
            file_ids,
            chunking_strategy: ChunkingStrategy {
                kind: "static",
                fixed: StaticChunking {
                    max_chunk_size_tokens: profile.max_chunk_tokens,
                    chunk_overlap_tokens: profile.overlap_tokens,
                },
            },
        };
        let response = self
            .request(Method::POST, &format!("vector_stores/{index_id}/file_batches"))
            .json(&body)
            .send()
            .await?;
        self.read_json(response, "attach_files_batch").await
    }

    async fn batch_status(
        &self,
        index_id: &str,
        batch_id: &str,
    ) -> Result<FileBatch, ProviderError> {
        let response = self
            .request(
                Method::GET,
                &format!("vector_stores/{index_id}/file_batches/{batch_id}"),
            )
            .send()
            .await?;
        self.read_json(response, "batch_status").await
    }

    async fn detach_file(&self, index_id: &str, file_id: &str) -> Result<(), ProviderError> {
        let response = self
            .request(
                Method::DELETE,
                &format!("vector_stores/{index_id}/files/{file_id}"),
            )
            .send()
            .await?;
        self.ensure_deleted(response, "detach_file").await
    }

    async fn upload_file(&self, bytes: Vec<u8>, filename: &str) -> Result<String, ProviderError> {
        let size = bytes.len();
        let part = Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str("text/markdown")?;
        let form = Form::new().text("purpose", "assistants").part("file", part);
        let response = self
            .request(Method::POST, "files")
            .multipart(form)
            .send()
            .await?;
        let IdResponse { id } = self.read_json(response, "upload_file").await?;
        tracing::debug!(file_id = %id, filename, size, "File uploaded");
        Ok(id)
    }

    async fn delete_file(&self, file_id: &str) -> Result<(), ProviderError> {
        let response = self
            .request(Method::DELETE, &format!("files/{file_id}"))
            .send()
            .await?;
        self.ensure_deleted(response, "delete_file").await
    }

    async fn retrieve_index(&self, index_id: &str) -> Result<IndexStatus, ProviderError> {
        let response = self
            .request(Method::GET, &format!("vector_stores/{index_id}"))
            .send()
            .await?;
        self.read_json(response, "retrieve_index").await
    }

    async fn update_expiration(
        &self,
        index_id: &str,
        expiration: ExpirationPolicy,
    ) -> Result<(), ProviderError> {
        let body = UpdateIndexRequest {
            expires_after: expiration.to_wire(),
        };
        let response = self
            .request(Method::POST, &format!("vector_stores/{index_id}"))
            .json(&body)
            .send()
            .await?;
        let _: IdResponse = self.read_json(response, "update_expiration").await?;
        Ok(())
    }

    async fn delete_index(&self, index_id: &str) -> Result<(), ProviderError> {
        let response = self
            .request(Method::DELETE, &format!("vector_stores/{index_id}"))
            .send()
            .await?;
        self.ensure_deleted(response, "delete_index").await
    }
}

pub(crate) fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

pub(crate) fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::BatchState;
    use httpmock::{Method::DELETE, Method::GET, Method::POST, MockServer};
    use serde_json::json;

    fn client_for(server: &MockServer) -> ProviderClient {
        ProviderClient {
            client: Client::builder()
                .user_agent("knowledge-sync-test")
                .build()
                .expect("client"),
            base_url: server.base_url(),
            api_key: Some("sk-test".into()),
        }
    }

    #[tokio::test]
    async fn create_index_sends_name_and_expiration() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/vector_stores")
                    .header("authorization", "Bearer sk-test")
                    .json_body(json!({
                        "name": "Support FAQ",
                        "expires_after": { "anchor": "last_active_at", "days": 30 }
                    }));
                then.status(200).json_body(json!({ "id": "vs_1", "object": "vector_store" }));
            })
            .await;

        let id = client_for(&server)
            .create_index("Support FAQ", ExpirationPolicy { days: 30 })
            .await
            .expect("create index");

        mock.assert_async().await;
        assert_eq!(id, "vs_1");
    }

    #[tokio::test]
    async fn attach_batch_sends_static_chunking_strategy() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/vector_stores/vs_1/file_batches")
                    .json_body(json!({
                        "file_ids": ["file_a", "file_b"],
                        "chunking_strategy": {
                            "type": "static",
                            "static": { "max_chunk_size_tokens": 1200, "chunk_overlap_tokens": 600 }
                        }
                    }));
                then.status(200).json_body(json!({
                    "id": "vsfb_1",
                    "status": "in_progress",
                    "file_counts": { "in_progress": 2, "total": 2 }
                }));
            })
            .await;

        let batch = client_for(&server)
            .attach_files_batch(
                "vs_1",
                &["file_a".to_string(), "file_b".to_string()],
                crate::knowledge::profile_for("qa"),
            )
            .await
            .expect("batch");

        mock.assert_async().await;
        assert_eq!(batch.id, "vsfb_1");
        assert_eq!(batch.status, BatchState::InProgress);
        assert_eq!(batch.file_counts.total, 2);
    }

    #[tokio::test]
    async fn delete_treats_missing_resources_as_success() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(DELETE).path("/files/file_gone");
                then.status(404).body("not found");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(DELETE).path("/vector_stores/vs_1/files/file_busy");
                then.status(500).body("boom");
            })
            .await;

        let client = client_for(&server);
        client.delete_file("file_gone").await.expect("404 is fine");
        let error = client
            .detach_file("vs_1", "file_busy")
            .await
            .expect_err("500 surfaces");
        assert!(matches!(
            error,
            ProviderError::UnexpectedStatus { status, .. } if status == StatusCode::INTERNAL_SERVER_ERROR
        ));
    }

    #[tokio::test]
    async fn upload_posts_multipart_with_purpose() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/files")
                    .body_contains("assistants")
                    .body_contains("text-1.md")
                    .body_contains("hello world");
                then.status(200).json_body(json!({ "id": "file_1" }));
            })
            .await;

        let id = client_for(&server)
            .upload_file(b"hello world".to_vec(), "text-1.md")
            .await
            .expect("upload");

        mock.assert_async().await;
        assert_eq!(id, "file_1");
    }

    #[tokio::test]
    async fn retrieve_index_parses_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/vector_stores/vs_9");
                then.status(200).json_body(json!({
                    "id": "vs_9",
                    "status": "completed",
                    "file_counts": { "completed": 3, "total": 3 }
                }));
            })
            .await;

        let status = client_for(&server)
            .retrieve_index("vs_9")
            .await
            .expect("status");
        assert_eq!(status.status, "completed");
        assert_eq!(status.file_counts.completed, 3);
    }

    #[test]
    fn endpoints_join_without_double_slashes() {
        let base = normalize_base_url("http://localhost:8080/v1/").expect("url");
        assert_eq!(
            format_endpoint(&base, "/vector_stores"),
            "http://localhost:8080/v1/vector_stores"
        );
    }
}
