//! Import workflow handlers
//!
//! POST /api/v1/imports, GET /api/v1/imports, GET /api/v1/imports/:id,
//! POST /api/v1/imports/:id/cancel

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{ImportRequest, WorkflowState, WorkflowStatus};
use crate::pipeline::RunOptions;
use crate::AppState;

/// POST /api/v1/imports request
#[derive(Debug, Deserialize)]
pub struct StartImportRequest {
    pub domain_type: String,
    pub domain_name: String,
    /// `YYYY-MM-DD` or `YYYYMMDD`
    pub cob_date: String,
    #[serde(flatten)]
    pub options: RunOptions,
}

/// POST /api/v1/imports response
#[derive(Debug, Serialize, Deserialize)]
pub struct StartImportResponse {
    pub workflow_id: Uuid,
    pub status: WorkflowStatus,
}

/// POST /api/v1/imports/:id/cancel response
#[derive(Debug, Serialize, Deserialize)]
pub struct CancelImportResponse {
    pub workflow_id: Uuid,
    /// Status when the signal was sent; the run stops at its next checkpoint
    pub status: WorkflowStatus,
    pub cancel_requested: bool,
}

/// POST /api/v1/imports
///
/// Dispatches the run and returns 202 without waiting for it.
pub async fn start_import(
    State(state): State<AppState>,
    Json(body): Json<StartImportRequest>,
) -> ApiResult<(StatusCode, Json<StartImportResponse>)> {
    let cob_date = ImportRequest::parse_cob_date(&body.cob_date)?;
    let request = ImportRequest::new(body.domain_type, body.domain_name, cob_date);

    let workflow_id = state.pipeline.spawn(request, body.options).await?;
    tracing::info!(workflow_id = %workflow_id, "Import dispatched");

    Ok((
        StatusCode::ACCEPTED,
        Json(StartImportResponse {
            workflow_id,
            status: WorkflowStatus::Pending,
        }),
    ))
}

/// GET /api/v1/imports
pub async fn list_imports(State(state): State<AppState>) -> Json<Vec<WorkflowState>> {
    Json(state.pipeline.store().list().await)
}

/// GET /api/v1/imports/:id
pub async fn get_import_status(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> ApiResult<Json<WorkflowState>> {
    let workflow = state
        .pipeline
        .store()
        .get(workflow_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Workflow not found: {}", workflow_id)))?;

    tracing::debug!(workflow_id = %workflow_id, status = %workflow.status, "Status query");
    Ok(Json(workflow))
}

/// POST /api/v1/imports/:id/cancel
pub async fn cancel_import(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<CancelImportResponse>)> {
    let store = state.pipeline.store();
    let workflow = store
        .get(workflow_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Workflow not found: {}", workflow_id)))?;

    if workflow.is_terminal() {
        return Err(ApiError::Conflict(format!(
            "Workflow already in terminal state: {}",
            workflow.status
        )));
    }

    let cancel_requested = store.cancel(workflow_id).await;
    tracing::info!(workflow_id = %workflow_id, cancel_requested, "Cancellation requested");

    Ok((
        StatusCode::ACCEPTED,
        Json(CancelImportResponse {
            workflow_id,
            status: workflow.status,
            cancel_requested,
        }),
    ))
}

/// Build import workflow routes
pub fn import_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/imports", post(start_import).get(list_imports))
        .route("/api/v1/imports/:workflow_id", get(get_import_status))
        .route("/api/v1/imports/:workflow_id/cancel", post(cancel_import))
}
