//! POS stock core - backend server

use std::{net::SocketAddr, sync::Arc, time::Duration};

use pos_stock::{
    create_app,
    jobs::spawn_workers,
    repository::{BatchRepository, CatalogReader, InMemoryBatchRepository, PgBatchRepository},
    services::CancelToken,
    AppState, Config,
};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pos_stock=debug,pos_stock_server=debug,tower_http=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    tracing::info!("Starting POS stock core");
    tracing::info!("Environment: {}", config.environment);

    let (repo, catalog): (Arc<dyn BatchRepository>, Arc<dyn CatalogReader>) =
        if config.database.in_memory {
            tracing::warn!("Using in-memory storage; state is lost on shutdown");
            let store = Arc::new(InMemoryBatchRepository::new());
            (store.clone(), store)
        } else {
            tracing::info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .min_connections(config.database.min_connections)
                .acquire_timeout(Duration::from_secs(30))
                .connect(&config.database.url)
                .await?;
            tracing::info!("Database connection established");

            // Run migrations in development
            if config.environment == "development" {
                tracing::info!("Running database migrations...");
                sqlx::migrate!("./migrations").run(&db_pool).await?;
                tracing::info!("Migrations completed");
            }

            let store = Arc::new(PgBatchRepository::new(
                db_pool,
                config.stock.transaction_timeout(),
            ));
            (store.clone(), store)
        };

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let state = AppState::new(repo, catalog, config);

    let shutdown = CancelToken::new();
    let workers = spawn_workers(state.clone(), shutdown.clone());

    let app = create_app(state);

    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    for worker in workers {
        if let Err(e) = worker.await {
            tracing::warn!("Background worker ended abnormally: {}", e);
        }
    }
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal(shutdown: CancelToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");
    shutdown.cancel();
}
