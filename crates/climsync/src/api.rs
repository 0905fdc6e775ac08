//! HTTP surface: the sync trigger, the legacy webhook route and a health check.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use climsync_bucket::{BucketError, BucketGateway};
use climsync_core::{ErrorKind, SyncError, SyncResponse, SyncService};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SyncService>,
    pub gateway: BucketGateway,
}

impl AppState {
    pub fn new(service: SyncService, gateway: BucketGateway) -> Self {
        Self {
            service: Arc::new(service),
            gateway,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sync", post(sync))
        .route("/api/webhook/{bucket_name}/sync", post(webhook_sync))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct SyncParams {
    pub region: String,
    pub station: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        let status = match err.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidInput => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Execution | ErrorKind::Store => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // A refused bucket is reported exactly as the gateway words it.
        let detail = match &err {
            SyncError::Store(inner @ BucketError::BucketNotAllowed(_)) => inner.to_string(),
            _ => err.reason(),
        };
        Self { status, detail }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = self.status.as_u16(), detail = %self.detail, "sync request failed");
        }
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

async fn sync(
    State(state): State<AppState>,
    Query(params): Query<SyncParams>,
) -> Result<Json<SyncResponse>, ApiError> {
    run_sync(&state, &params).await
}

async fn webhook_sync(
    State(state): State<AppState>,
    Path(bucket_name): Path<String>,
    Query(params): Query<SyncParams>,
) -> Result<Json<SyncResponse>, ApiError> {
    if !state.gateway.is_allowed(&bucket_name) {
        return Err(ApiError {
            status: StatusCode::NOT_FOUND,
            detail: BucketError::BucketNotAllowed(bucket_name).to_string(),
        });
    }
    run_sync(&state, &params).await
}

async fn run_sync(state: &AppState, params: &SyncParams) -> Result<Json<SyncResponse>, ApiError> {
    let outcome = state.service.sync(&params.region, &params.station).await?;
    Ok(Json(SyncResponse::from(&outcome)))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Lists every allow-listed bucket once and logs whether it is reachable. Never fatal.
pub async fn probe_buckets(gateway: &BucketGateway) -> usize {
    let mut reachable = 0;
    for name in gateway.allowed() {
        let result = match gateway.bucket(name) {
            Ok(bucket) => bucket.probe().await,
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => {
                reachable += 1;
                info!(bucket = name, "bucket reachable");
            }
            Err(err) => error!(bucket = name, error = %err, "bucket probe failed"),
        }
    }
    reachable
}
