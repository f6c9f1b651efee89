//! HTTP handlers for per-product stock queries

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use shared::StockLevel;

use crate::error::AppResult;
use crate::middleware::{check_permission, CurrentUser};
use crate::services::fifo::{FifoAllocator, FifoRecommendation};
use crate::services::BatchLedger;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ProductStock {
    pub product_id: i64,
    pub total_available: i64,
    pub levels: Vec<StockLevel>,
}

/// Stock levels of a product per branch
pub async fn get_stock_levels(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(product_id): Path<i64>,
) -> AppResult<Json<ProductStock>> {
    check_permission(&current_user.0, "stock", "read")?;
    let ledger = BatchLedger::new(state.repo.clone(), &state.config.stock);
    let levels = ledger.stock_levels(product_id).await?;
    Ok(Json(ProductStock {
        product_id,
        total_available: levels.iter().map(|l| l.available).sum(),
        levels,
    }))
}

#[derive(Debug, Deserialize)]
pub struct FifoQuery {
    /// Defaults to the caller's branch; omit both for the global pool.
    pub branch_id: Option<i64>,
}

/// Advisory sell-first order for a product
pub async fn get_fifo_recommendation(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(product_id): Path<i64>,
    Query(query): Query<FifoQuery>,
) -> AppResult<Json<FifoRecommendation>> {
    check_permission(&current_user.0, "stock", "read")?;
    let allocator = FifoAllocator::new(state.repo.clone(), state.catalog.clone(), &state.config.stock);
    let branch_id = query.branch_id.or(current_user.0.branch_id);
    let recommendation = allocator
        .get_fifo_recommendation(product_id, branch_id)
        .await?;
    Ok(Json(recommendation))
}
