//! Error handling for the POS stock core
//!
//! Every ledger operation either fully succeeds or fails with one of these
//! kinds. Client-side kinds map to 4xx responses; timeouts and persistence
//! failures are server faults.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use shared::{DisposalRejection, InsufficientStock, LedgerViolation};
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Authentication errors
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Insufficient permissions")]
    InsufficientPermissions,

    // Validation errors
    #[error("Validation error: {message}")]
    Validation { field: String, message: String },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Stock errors
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: i64,
        requested: i64,
        available: i64,
    },

    #[error("Batch {0} is blocked")]
    BlockedBatch(i64),

    #[error("Batch {0} is disposed")]
    DisposedBatch(i64),

    #[error("Concurrent modification: {0}")]
    ConcurrencyConflict(String),

    // Disposal errors
    #[error("Batch {0} is already disposed")]
    AlreadyDisposed(i64),

    #[error("Batch {batch_id} has not expired")]
    NotExpired {
        batch_id: i64,
        days_until_expiry: Option<i64>,
    },

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Scan cancelled: {0}")]
    Cancelled(String),

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Internal errors
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::ConcurrencyConflict(_) | AppError::Timeout(_) | AppError::Cancelled(_)
        )
    }

    /// Server faults are logged with full context; everything else is the
    /// caller's to handle.
    pub fn is_server_fault(&self) -> bool {
        matches!(
            self,
            AppError::Timeout(_)
                | AppError::DatabaseError(_)
                | AppError::Internal(_)
                | AppError::InternalError(_)
        )
    }

    /// HTTP status and machine-readable code for this error.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            AppError::InsufficientPermissions => (StatusCode::FORBIDDEN, "INSUFFICIENT_PERMISSIONS"),
            AppError::Validation { .. } | AppError::ValidationError(_) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR")
            }
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::InsufficientStock { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_STOCK")
            }
            AppError::BlockedBatch(_) => (StatusCode::CONFLICT, "BLOCKED_BATCH"),
            AppError::DisposedBatch(_) => (StatusCode::CONFLICT, "DISPOSED_BATCH"),
            AppError::ConcurrencyConflict(_) => (StatusCode::CONFLICT, "CONCURRENCY_CONFLICT"),
            AppError::AlreadyDisposed(_) => (StatusCode::CONFLICT, "ALREADY_DISPOSED"),
            AppError::NotExpired { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "NOT_EXPIRED"),
            AppError::Timeout(_) => (StatusCode::SERVICE_UNAVAILABLE, "TIMEOUT"),
            AppError::Cancelled(_) => (StatusCode::CONFLICT, "CANCELLED"),
            AppError::DatabaseError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            AppError::Internal(_) | AppError::InternalError(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        }
    }

    pub fn code(&self) -> &'static str {
        self.status_and_code().1
    }

    pub fn shortfall(&self) -> Option<i64> {
        match self {
            AppError::InsufficientStock {
                requested,
                available,
                ..
            } => Some(requested - available),
            _ => None,
        }
    }
}

impl From<InsufficientStock> for AppError {
    fn from(e: InsufficientStock) -> Self {
        AppError::InsufficientStock {
            product_id: e.product_id,
            requested: e.requested,
            available: e.available,
        }
    }
}

impl From<DisposalRejection> for AppError {
    fn from(e: DisposalRejection) -> Self {
        match e {
            DisposalRejection::AlreadyDisposed(batch_id) => AppError::AlreadyDisposed(batch_id),
            DisposalRejection::NotExpired {
                batch_id,
                days_until_expiry,
            } => AppError::NotExpired {
                batch_id,
                days_until_expiry,
            },
        }
    }
}

impl From<LedgerViolation> for AppError {
    fn from(e: LedgerViolation) -> Self {
        match e {
            LedgerViolation::InvalidQuantity(_) => AppError::validation("quantity", e.to_string()),
            LedgerViolation::UnknownBatch(batch_id) => {
                AppError::NotFound(format!("Batch {}", batch_id))
            }
            LedgerViolation::Blocked(batch_id) => AppError::BlockedBatch(batch_id),
            LedgerViolation::Disposed(batch_id) => AppError::DisposedBatch(batch_id),
            LedgerViolation::InsufficientStock {
                product_id,
                requested,
                available,
                ..
            } => AppError::InsufficientStock {
                product_id,
                requested,
                available,
            },
            LedgerViolation::VersionMismatch { .. } => AppError::ConcurrencyConflict(e.to_string()),
            LedgerViolation::BranchMismatch { .. } | LedgerViolation::ExpiryMismatch { .. } => {
                AppError::validation("batch_number", e.to_string())
            }
            LedgerViolation::StockOverflow { .. } => AppError::validation("quantity", e.to_string()),
            LedgerViolation::IdentityMismatch { field, .. } => {
                AppError::validation(field, e.to_string())
            }
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::ValidationError(e.to_string())
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shortfall: Option<i64>,
    pub retryable: bool,
}

impl ErrorDetail {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            field: None,
            shortfall: None,
            retryable: false,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            AppError::DatabaseError(_) => "A database error occurred".to_string(),
            AppError::InternalError(_) => "An internal server error occurred".to_string(),
            other => other.to_string(),
        };

        let mut detail = ErrorDetail::new(code, message);
        detail.retryable = self.is_retryable();
        detail.shortfall = self.shortfall();
        if let AppError::Validation { field, .. } = &self {
            detail.field = Some(field.clone());
        }

        if self.is_server_fault() {
            tracing::error!("Error: {:?}", self);
        } else {
            tracing::debug!("Request rejected: {}", self);
        }

        (status, Json(ErrorResponse { error: detail })).into_response()
    }
}

/// Result type alias for handlers and services
pub type AppResult<T> = Result<T, AppError>;
