//! HTTP handlers for background scans

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::jobs::JobKind;
use crate::middleware::{check_permission, CurrentUser};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub kind: &'static str,
    pub cancelled: usize,
}

/// Cancel every running scan of a kind
pub async fn cancel_job(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(kind): Path<String>,
) -> AppResult<Json<CancelResponse>> {
    check_permission(&current_user.0, "jobs", "manage")?;
    let kind = JobKind::parse(&kind)
        .ok_or_else(|| AppError::NotFound(format!("Job kind {}", kind)))?;
    let cancelled = state.jobs.cancel(kind);
    tracing::info!("Cancelled {} running {} scan(s)", cancelled, kind.as_str());
    Ok(Json(CancelResponse {
        kind: kind.as_str(),
        cancelled,
    }))
}
