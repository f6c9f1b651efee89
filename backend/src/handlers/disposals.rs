//! HTTP handlers for the disposal workflow

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;

use crate::error::AppResult;
use crate::jobs::JobKind;
use crate::middleware::{check_permission, CurrentUser};
use crate::services::disposal::{
    BulkDisposalSummary, DisposalCandidate, DisposalResult, DisposalWorkflow, DisposeExpiredInput,
    DisposeInput,
};
use crate::AppState;

fn workflow(state: &AppState) -> DisposalWorkflow {
    DisposalWorkflow::new(state.repo.clone(), &state.config.stock)
}

/// Dispose a list of expired batches, reporting each outcome
pub async fn dispose_expired_batches(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<DisposeExpiredInput>,
) -> AppResult<Json<BulkDisposalSummary>> {
    check_permission(&current_user.0, "disposals", "execute")?;
    let summary = workflow(&state)
        .dispose_expired_batches(input, Some(current_user.0.user_id.clone()))
        .await?;
    Ok(Json(summary))
}

/// Dispose a single batch; `force` allows disposing before expiry
pub async fn dispose_batch(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(batch_id): Path<i64>,
    Json(input): Json<DisposeInput>,
) -> AppResult<Json<DisposalResult>> {
    check_permission(&current_user.0, "disposals", "execute")?;
    let result = workflow(&state)
        .dispose(
            batch_id,
            input,
            Utc::now().date_naive(),
            Some(current_user.0.user_id.clone()),
        )
        .await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct CandidatesQuery {
    pub as_of: Option<NaiveDate>,
}

/// Active batches past their expiry date
pub async fn list_candidates(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<CandidatesQuery>,
) -> AppResult<Json<Vec<DisposalCandidate>>> {
    check_permission(&current_user.0, "stock", "read")?;
    let guard = state.jobs.begin(JobKind::DisposalSweep);
    let as_of = query.as_of.unwrap_or_else(|| Utc::now().date_naive());
    let candidates = workflow(&state)
        .mark_expired_candidates(as_of, guard.token())
        .await?;
    Ok(Json(candidates))
}
