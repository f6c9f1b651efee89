//! Business logic services

pub mod cancel;
pub mod disposal;
pub mod expiry;
pub mod fifo;
pub mod ledger;
pub mod sales;
pub mod transfer;

pub use cancel::CancelToken;
pub use disposal::DisposalWorkflow;
pub use expiry::ExpiryService;
pub use fifo::FifoAllocator;
pub use ledger::BatchLedger;
pub use sales::SalesService;
pub use transfer::TransferRecommender;

use std::future::Future;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::repository::CatalogReader;

/// Run one ledger operation under `limit`. An overrun drops the operation,
/// which rolls back any open transaction.
pub(crate) async fn bounded<T, F>(limit: Duration, operation: &str, fut: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!("{} exceeded {:?}", operation, limit);
            Err(AppError::Timeout(format!("{} exceeded {:?}", operation, limit)))
        }
    }
}

/// Warning window of a product's category, or `default_days` when the
/// product or its category does not define one.
pub(crate) async fn warning_window(
    catalog: &dyn CatalogReader,
    product_id: i64,
    default_days: u32,
) -> AppResult<u32> {
    Ok(catalog
        .product(product_id)
        .await?
        .and_then(|p| p.warning_window_days)
        .unwrap_or(default_days))
}
