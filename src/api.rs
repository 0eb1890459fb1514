//! HTTP surface for Knowledge Sync.
//!
//! This module exposes a compact Axum router over the sync pipeline:
//!
//! - `POST /sources` – Register a knowledge source (`{ "name": ... }`).
//! - `DELETE /sources/:source_id` – Delete a source, its items, its index and update its agents.
//! - `POST /sources/:source_id/items` – Create a content item and sync it.
//! - `PUT /sources/:source_id/items/:item_id` – Replace an item's payload and re-sync it.
//! - `DELETE /sources/:source_id/items/:item_id` – Delete an item and clean up its remote file.
//! - `POST /sources/:source_id/agents/sync` – Re-push the index sets of the source's agents.
//! - `GET /sources/:source_id/index` – Provider-side status of the source's index.
//! - `PUT /sources/:source_id/index/expiration` – Replace the index expiration (`{ "days": n }`).
//! - `POST /agents` – Register an agent with its sources and push its index set.
//! - `POST /migrations` – Run the idempotent bulk migration.
//! - `GET /metrics` – Observe sync counters.
//!
//! Payloads use the internally tagged content format, e.g.
//! `{ "type": "qa", "question": "...", "answer": "..." }`.

use crate::knowledge::ContentPayload;
use crate::metrics::MetricsSnapshot;
use crate::sync::{SyncApi, SyncError};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Build the HTTP router exposing the sync API surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: SyncApi + 'static,
{
    Router::new()
        .route("/sources", post(create_source::<S>))
        .route("/sources/:source_id", delete(delete_source::<S>))
        .route("/sources/:source_id/items", post(create_item::<S>))
        .route(
            "/sources/:source_id/items/:item_id",
            put(update_item::<S>).delete(delete_item::<S>),
        )
        .route("/sources/:source_id/agents/sync", post(sync_agents::<S>))
        .route("/sources/:source_id/index", get(index_status::<S>))
        .route(
            "/sources/:source_id/index/expiration",
            put(refresh_expiration::<S>),
        )
        .route("/agents", post(register_agent::<S>))
        .route("/migrations", post(run_migration::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .with_state(service)
}

/// Request body for `POST /sources`.
#[derive(Deserialize)]
struct CreateSourceRequest {
    /// Display name; also names the remote index.
    name: String,
}

async fn create_source<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<CreateSourceRequest>,
) -> Result<Response, AppError>
where
    S: SyncApi,
{
    let source = service.create_source(&request.name).await?;
    Ok((StatusCode::CREATED, Json(source)).into_response())
}

async fn delete_source<S>(
    State(service): State<Arc<S>>,
    Path(source_id): Path<Uuid>,
) -> Result<Response, AppError>
where
    S: SyncApi,
{
    let outcome = service.delete_source(source_id).await?;
    Ok(Json(outcome).into_response())
}

/// Create an item and run the full sync chain for it.
///
/// The response carries the new file handle plus any best-effort step that failed
/// (`attach_error`, `agents.failures`); those still answer `201`.
async fn create_item<S>(
    State(service): State<Arc<S>>,
    Path(source_id): Path<Uuid>,
    Json(payload): Json<ContentPayload>,
) -> Result<Response, AppError>
where
    S: SyncApi,
{
    let outcome = service.create_item(source_id, payload).await?;
    tracing::info!(
        source_id = %source_id,
        item_id = %outcome.item_id,
        file_id = %outcome.file_id,
        "Create item request completed"
    );
    Ok((StatusCode::CREATED, Json(outcome)).into_response())
}

async fn update_item<S>(
    State(service): State<Arc<S>>,
    Path((source_id, item_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<ContentPayload>,
) -> Result<Response, AppError>
where
    S: SyncApi,
{
    let outcome = service.update_item(source_id, item_id, payload).await?;
    Ok(Json(outcome).into_response())
}

async fn delete_item<S>(
    State(service): State<Arc<S>>,
    Path((source_id, item_id)): Path<(Uuid, Uuid)>,
) -> Result<Response, AppError>
where
    S: SyncApi,
{
    let outcome = service.delete_item(source_id, item_id).await?;
    Ok(Json(outcome).into_response())
}

async fn sync_agents<S>(
    State(service): State<Arc<S>>,
    Path(source_id): Path<Uuid>,
) -> Result<Response, AppError>
where
    S: SyncApi,
{
    let propagation = service.sync_agents(source_id).await?;
    let status = if propagation.is_complete() {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    Ok((status, Json(propagation)).into_response())
}

async fn index_status<S>(
    State(service): State<Arc<S>>,
    Path(source_id): Path<Uuid>,
) -> Result<Response, AppError>
where
    S: SyncApi,
{
    match service.index_status(source_id).await? {
        Some(status) => Ok(Json(status).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "source has no index yet" })),
        )
            .into_response()),
    }
}

/// Request body for `PUT /sources/:source_id/index/expiration`.
#[derive(Deserialize)]
struct ExpirationRequest {
    /// Days of inactivity after which the provider expires the index.
    days: u32,
}

async fn refresh_expiration<S>(
    State(service): State<Arc<S>>,
    Path(source_id): Path<Uuid>,
    Json(request): Json<ExpirationRequest>,
) -> Result<Response, AppError>
where
    S: SyncApi,
{
    if service.refresh_expiration(source_id, request.days).await? {
        Ok(StatusCode::NO_CONTENT.into_response())
    } else {
        Ok((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "source has no index yet" })),
        )
            .into_response())
    }
}

/// Request body for `POST /agents`.
#[derive(Deserialize)]
struct RegisterAgentRequest {
    name: String,
    /// Identifier on the agent runtime; omit for agents not provisioned yet.
    #[serde(default)]
    remote_id: Option<String>,
    /// Sources the agent searches.
    #[serde(default)]
    source_ids: Vec<Uuid>,
}

async fn register_agent<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<RegisterAgentRequest>,
) -> Result<Response, AppError>
where
    S: SyncApi,
{
    let registration = service
        .register_agent(&request.name, request.remote_id, &request.source_ids)
        .await?;
    Ok((StatusCode::CREATED, Json(registration)).into_response())
}

async fn run_migration<S>(State(service): State<Arc<S>>) -> Result<Response, AppError>
where
    S: SyncApi,
{
    let report = service.run_migration().await?;
    Ok(Json(report).into_response())
}

/// Return the sync counters accumulated since startup.
async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: SyncApi,
{
    Json(service.metrics_snapshot())
}

struct AppError(SyncError);

impl AppError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            SyncError::InvalidContent(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SyncError::SourceNotFound(_)
            | SyncError::ItemNotFound(_)
            | SyncError::AgentNotFound(_) => StatusCode::NOT_FOUND,
            SyncError::Index(_) | SyncError::Upload(_) => StatusCode::BAD_GATEWAY,
            SyncError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl From<SyncError> for AppError {
    fn from(inner: SyncError) -> Self {
        Self(inner)
    }
}
