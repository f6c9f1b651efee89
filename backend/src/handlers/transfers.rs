//! HTTP handlers for inter-branch transfers

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Utc;

use crate::error::AppResult;
use crate::jobs::JobKind;
use crate::middleware::{check_permission, CurrentUser};
use crate::repository::TransferOutcome;
use crate::services::transfer::{ExecuteTransferInput, TransferRecommender, TransferScope};
use crate::AppState;
use shared::TransferCandidate;

fn recommender(state: &AppState) -> TransferRecommender {
    TransferRecommender::new(
        state.repo.clone(),
        state.catalog.clone(),
        &state.config.stock,
        state.config.transfer.policy(),
    )
}

/// Ranked transfer candidates; read-only
pub async fn get_recommendations(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(scope): Query<TransferScope>,
) -> AppResult<Json<Vec<TransferCandidate>>> {
    check_permission(&current_user.0, "transfers", "read")?;
    let guard = state.jobs.begin(JobKind::TransferScan);
    let candidates = recommender(&state)
        .recommend(&scope, Utc::now().date_naive(), guard.token())
        .await?;
    Ok(Json(candidates))
}

/// Execute an approved transfer
pub async fn execute_transfer(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<ExecuteTransferInput>,
) -> AppResult<Json<TransferOutcome>> {
    check_permission(&current_user.0, "transfers", "execute")?;
    let outcome = recommender(&state)
        .execute(input, Some(current_user.0.user_id.clone()))
        .await?;
    Ok(Json(outcome))
}
