//! HTTP handlers for the sale commit path

use axum::{extract::State, http::StatusCode, Json};

use crate::error::AppResult;
use crate::middleware::{check_permission, CurrentUser};
use crate::services::sales::{CreateSaleInput, SaleWithAllocations, SalesService};
use crate::services::FifoAllocator;
use crate::AppState;

/// Commit a sale and report the batches each item was drawn from
pub async fn create_sale(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(mut input): Json<CreateSaleInput>,
) -> AppResult<(StatusCode, Json<SaleWithAllocations>)> {
    check_permission(&current_user.0, "sales", "create")?;
    if input.branch_id.is_none() {
        input.branch_id = current_user.0.branch_id;
    }

    let allocator = FifoAllocator::new(state.repo.clone(), state.catalog.clone(), &state.config.stock);
    let service = SalesService::new(allocator, state.catalog.clone(), &state.config.stock);
    let sale = service
        .create_sale_with_batches(input, Some(current_user.0.user_id.clone()))
        .await?;
    Ok((StatusCode::CREATED, Json(sale)))
}
