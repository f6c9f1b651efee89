//! HTTP handlers for batch ledger endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use shared::{Batch, MovementContext, PaginatedResponse, Pagination, StockMovement};

use crate::error::AppResult;
use crate::middleware::{check_permission, CurrentUser};
use crate::repository::{BatchFilter, BranchScope, ReceiveOutcome};
use crate::services::expiry::{ExpiringBatch, ExpiringQuery, ExpiryService};
use crate::services::ledger::{
    AddStockInput, AddStockResult, BatchLedger, BatchView, ReceiveStockInput,
};
use crate::AppState;

fn ledger(state: &AppState) -> BatchLedger {
    BatchLedger::new(state.repo.clone(), &state.config.stock)
}

fn context(user: &CurrentUser, reference: Option<String>, note: Option<String>) -> MovementContext {
    MovementContext {
        reference,
        actor: Some(user.0.user_id.clone()),
        note,
    }
}

/// Receive stock into a new or matching open batch
pub async fn receive_stock(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<ReceiveStockInput>,
) -> AppResult<(StatusCode, Json<ReceiveOutcome>)> {
    check_permission(&current_user.0, "stock", "write")?;
    let ctx = context(&current_user, input.purchase_order_number.clone(), None);
    let outcome = ledger(&state).receive_stock(input, &ctx).await?;
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)))
}

/// Inventory-intake contract
pub async fn add_stock_to_batch(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<AddStockInput>,
) -> AppResult<Json<AddStockResult>> {
    check_permission(&current_user.0, "stock", "write")?;
    let ctx = context(&current_user, input.purchase_order_number.clone(), input.notes.clone());
    let result = ledger(&state).add_stock_to_batch(input, &ctx).await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct AdjustStockRequest {
    pub quantity: i64,
    pub reference: Option<String>,
    pub note: Option<String>,
    /// Credit only: branch that receives the stock.
    pub target_branch_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct DeductResponse {
    pub batch_id: i64,
    pub current_stock: i64,
}

/// Manual deduction from one batch
pub async fn deduct_stock(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(batch_id): Path<i64>,
    Json(request): Json<AdjustStockRequest>,
) -> AppResult<Json<DeductResponse>> {
    check_permission(&current_user.0, "stock", "write")?;
    let ctx = context(&current_user, request.reference, request.note);
    let current_stock = ledger(&state)
        .deduct_stock(batch_id, request.quantity, &ctx)
        .await?;
    Ok(Json(DeductResponse {
        batch_id,
        current_stock,
    }))
}

/// Credit stock back to a batch or into another branch
pub async fn credit_stock(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(batch_id): Path<i64>,
    Json(request): Json<AdjustStockRequest>,
) -> AppResult<Json<Batch>> {
    check_permission(&current_user.0, "stock", "write")?;
    let ctx = context(&current_user, request.reference, request.note);
    let batch = ledger(&state)
        .credit_stock(batch_id, request.quantity, request.target_branch_id, &ctx)
        .await?;
    Ok(Json(batch))
}

#[derive(Debug, Deserialize)]
pub struct BlockRequest {
    pub blocked: bool,
    pub reason: Option<String>,
}

/// Put a batch on quality hold or release it
pub async fn set_blocked(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(batch_id): Path<i64>,
    Json(request): Json<BlockRequest>,
) -> AppResult<Json<Batch>> {
    check_permission(&current_user.0, "stock", "write")?;
    let batch = ledger(&state)
        .set_blocked(batch_id, request.blocked, request.reason)
        .await?;
    Ok(Json(batch))
}

/// Query parameters for listing batches
#[derive(Debug, Deserialize)]
pub struct ListBatchesQuery {
    pub product_id: Option<i64>,
    pub branch_id: Option<i64>,
    /// Only batches not bound to a branch.
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub include_disposed: bool,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// List batches
pub async fn list_batches(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<ListBatchesQuery>,
) -> AppResult<Json<PaginatedResponse<Batch>>> {
    check_permission(&current_user.0, "stock", "read")?;
    let branch = match (query.global, query.branch_id) {
        (true, _) => BranchScope::Global,
        (false, Some(id)) => BranchScope::Branch(id),
        (false, None) => BranchScope::Any,
    };
    let filter = BatchFilter {
        product_id: query.product_id,
        branch,
        include_disposed: query.include_disposed,
        expiring_by: None,
    };
    let pagination = Pagination {
        page: query.page.unwrap_or(1).max(1),
        per_page: query.per_page.unwrap_or(50).clamp(1, 500),
    };

    let batches = ledger(&state).list_batches(&filter).await?;
    Ok(Json(PaginatedResponse::from_items(batches, &pagination)))
}

/// Get one batch with its lifecycle state
pub async fn get_batch(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(batch_id): Path<i64>,
) -> AppResult<Json<BatchView>> {
    check_permission(&current_user.0, "stock", "read")?;
    let view = ledger(&state).get_batch_view(batch_id).await?;
    Ok(Json(view))
}

/// Audit trail of one batch
pub async fn get_movements(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(batch_id): Path<i64>,
) -> AppResult<Json<Vec<StockMovement>>> {
    check_permission(&current_user.0, "stock", "read")?;
    let movements = ledger(&state).movements(batch_id).await?;
    Ok(Json(movements))
}

/// Batches that are expired or inside their warning window
pub async fn list_expiring(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<ExpiringQuery>,
) -> AppResult<Json<Vec<ExpiringBatch>>> {
    check_permission(&current_user.0, "stock", "read")?;
    let service = ExpiryService::new(state.repo.clone(), state.catalog.clone(), &state.config.stock);
    let batches = service
        .expiring_batches(&query, Utc::now().date_naive())
        .await?;
    Ok(Json(batches))
}
