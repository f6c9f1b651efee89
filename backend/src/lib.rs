//! POS stock core
//!
//! Batch-level stock for a multi-branch point of sale: receipts, FIFO
//! allocation at sale time, expiry tracking, disposal and inter-branch
//! transfer recommendations.

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod config;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod middleware;
pub mod repository;
pub mod routes;
pub mod services;

pub use config::Config;

use jobs::JobRegistry;
use repository::{BatchRepository, CatalogReader};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn BatchRepository>,
    pub catalog: Arc<dyn CatalogReader>,
    pub config: Arc<Config>,
    pub jobs: Arc<JobRegistry>,
}

impl AppState {
    pub fn new(
        repo: Arc<dyn BatchRepository>,
        catalog: Arc<dyn CatalogReader>,
        config: Config,
    ) -> Self {
        Self {
            repo,
            catalog,
            config: Arc::new(config),
            jobs: Arc::new(JobRegistry::new()),
        }
    }
}

/// Create the application router with all routes and middleware
pub fn create_app(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", routes::api_routes(state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Root endpoint
async fn root() -> &'static str {
    "POS Stock Core API v1"
}
