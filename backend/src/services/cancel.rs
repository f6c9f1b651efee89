//! Cooperative cancellation for long-running scans

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::error::{AppError, AppResult};

/// Shared flag a scan checks between units of work
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Whether both handles control the same run.
    pub fn same_run(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.cancelled, &other.cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with `AppError::Cancelled` once cancellation was requested.
    pub fn check(&self, scan: &str) -> AppResult<()> {
        if self.is_cancelled() {
            tracing::info!("{} cancelled", scan);
            return Err(AppError::Cancelled(scan.to_string()));
        }
        Ok(())
    }

    /// Resolve when the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
