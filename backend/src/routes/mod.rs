//! Route definitions for the POS stock core

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use crate::{handlers, middleware::auth_middleware, AppState};

/// Create API routes
pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Health check (public)
        .route("/health", get(handlers::health_check))
        // Protected routes - batch ledger
        .nest("/batches", batch_routes(state.clone()))
        // Protected routes - per-product stock and sell-first order
        .nest("/products", product_routes(state.clone()))
        // Protected routes - sale commit
        .nest("/sales", sale_routes(state.clone()))
        // Protected routes - disposal workflow
        .nest("/disposals", disposal_routes(state.clone()))
        // Protected routes - inter-branch transfers
        .nest("/transfers", transfer_routes(state.clone()))
        // Protected routes - background scans
        .nest("/jobs", job_routes(state))
}

/// Batch ledger routes (protected)
fn batch_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_batches).post(handlers::receive_stock))
        .route("/stock", post(handlers::add_stock_to_batch))
        .route("/expiring", get(handlers::list_expiring))
        .route("/:batch_id", get(handlers::get_batch))
        .route("/:batch_id/deduct", post(handlers::deduct_stock))
        .route("/:batch_id/credit", post(handlers::credit_stock))
        .route("/:batch_id/block", put(handlers::set_blocked))
        .route("/:batch_id/dispose", post(handlers::dispose_batch))
        .route("/:batch_id/movements", get(handlers::get_movements))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Product stock routes (protected)
fn product_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/:product_id/stock", get(handlers::get_stock_levels))
        .route("/:product_id/fifo", get(handlers::get_fifo_recommendation))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Sale routes (protected)
fn sale_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::create_sale))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Disposal routes (protected)
fn disposal_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::dispose_expired_batches))
        .route("/candidates", get(handlers::list_candidates))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Transfer routes (protected)
fn transfer_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/recommendations", get(handlers::get_recommendations))
        .route("/execute", post(handlers::execute_transfer))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Background scan routes (protected)
fn job_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/:kind/cancel", post(handlers::cancel_job))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}
