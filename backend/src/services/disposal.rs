//! Expired-batch disposal workflow
//!
//! Expired batches stay sellable until disposed; the scan only reports them
//! as pending disposal. Disposal itself zeroes the batch once and records the
//! written-off value.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::{DisposalMethod, DisposalRecord, MovementContext};

use super::{bounded, CancelToken};
use crate::config::StockConfig;
use crate::error::{AppError, AppResult};
use crate::repository::{BatchFilter, BatchRepository, DisposalRequest};

const SCAN_NAME: &str = "expired batch scan";

/// An active batch whose expiry date has passed
#[derive(Debug, Clone, Serialize)]
pub struct DisposalCandidate {
    pub batch_id: i64,
    pub product_id: i64,
    pub branch_id: Option<i64>,
    pub batch_number: String,
    pub expiry_date: Option<NaiveDate>,
    pub days_expired: i64,
    pub current_stock: i64,
    pub is_blocked: bool,
    pub value_at_risk: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisposeInput {
    pub method: DisposalMethod,
    pub reason: Option<String>,
    /// Dispose even though the batch has not expired.
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisposeExpiredInput {
    pub batch_ids: Vec<i64>,
    pub method: DisposalMethod,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DisposalResult {
    pub batch_id: i64,
    pub batch_number: String,
    #[serde(flatten)]
    pub record: DisposalRecord,
}

/// Outcome of one batch in a bulk disposal
#[derive(Debug, Clone, Serialize)]
pub struct DisposalOutcome {
    pub batch_id: i64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disposal: Option<DisposalResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkDisposalSummary {
    pub outcomes: Vec<DisposalOutcome>,
    pub disposed: usize,
    pub failed: usize,
    pub total_value_lost: Decimal,
}

pub struct DisposalWorkflow {
    repo: Arc<dyn BatchRepository>,
    config: StockConfig,
}

impl DisposalWorkflow {
    pub fn new(repo: Arc<dyn BatchRepository>, config: &StockConfig) -> Self {
        Self {
            repo,
            config: config.clone(),
        }
    }

    /// Snapshot scan for active batches that expired before `as_of`, one
    /// product at a time. Takes no locks.
    pub async fn mark_expired_candidates(
        &self,
        as_of: NaiveDate,
        cancel: &CancelToken,
    ) -> AppResult<Vec<DisposalCandidate>> {
        let mut candidates = Vec::new();
        for product_id in self.repo.product_ids().await? {
            cancel.check(SCAN_NAME)?;

            let batches = self
                .repo
                .list_batches(&BatchFilter::for_product(product_id))
                .await?;
            candidates.extend(batches.iter().filter_map(|batch| {
                let days = batch.expiry_date.map(|e| (as_of - e).num_days())?;
                (days > 0 && !batch.is_disposed()).then(|| DisposalCandidate {
                    batch_id: batch.id,
                    product_id: batch.product_id,
                    branch_id: batch.branch_id,
                    batch_number: batch.batch_number.clone(),
                    expiry_date: batch.expiry_date,
                    days_expired: days,
                    current_stock: batch.current_stock,
                    is_blocked: batch.is_blocked,
                    value_at_risk: batch.stock_value(),
                })
            }));
        }

        tracing::debug!("{} found {} expired batches", SCAN_NAME, candidates.len());
        Ok(candidates)
    }

    /// Dispose one batch. Refused when already disposed, or when not yet
    /// expired unless `force` is set.
    pub async fn dispose(
        &self,
        batch_id: i64,
        input: DisposeInput,
        as_of: NaiveDate,
        actor: Option<String>,
    ) -> AppResult<DisposalResult> {
        let ctx = MovementContext {
            reference: Some(format!("DISPOSAL-{}", batch_id)),
            actor,
            note: input.reason.clone(),
        };
        let request = DisposalRequest {
            as_of,
            method: input.method,
            reason: input.reason,
            force: input.force,
        };

        let batch = bounded(
            self.config.transaction_timeout(),
            "dispose",
            self.repo.dispose(batch_id, &request, &ctx),
        )
        .await?;

        let record = batch
            .disposal
            .clone()
            .ok_or_else(|| AppError::Internal(format!("Batch {} has no disposal record", batch_id)))?;
        tracing::info!(
            "Disposed batch {} ({} units, {} lost, method {})",
            batch.id,
            record.quantity,
            record.value_lost,
            record.method.as_str()
        );
        Ok(DisposalResult {
            batch_id: batch.id,
            batch_number: batch.batch_number,
            record,
        })
    }

    /// Dispose each listed batch independently and report per-batch outcomes.
    pub async fn dispose_expired_batches(
        &self,
        input: DisposeExpiredInput,
        actor: Option<String>,
    ) -> AppResult<BulkDisposalSummary> {
        if input.batch_ids.is_empty() {
            return Err(AppError::validation("batch_ids", "At least one batch id is required"));
        }

        let as_of = Utc::now().date_naive();
        let mut outcomes = Vec::with_capacity(input.batch_ids.len());
        for batch_id in input.batch_ids {
            let request = DisposeInput {
                method: input.method,
                reason: input.notes.clone(),
                force: false,
            };
            let outcome = match self.dispose(batch_id, request, as_of, actor.clone()).await {
                Ok(result) => DisposalOutcome {
                    batch_id,
                    success: true,
                    disposal: Some(result),
                    error_code: None,
                    error: None,
                },
                Err(e) => {
                    tracing::debug!("Disposal of batch {} refused: {}", batch_id, e);
                    DisposalOutcome {
                        batch_id,
                        success: false,
                        disposal: None,
                        error_code: Some(e.code().to_string()),
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }

        let disposed = outcomes.iter().filter(|o| o.success).count();
        let total_value_lost = outcomes
            .iter()
            .filter_map(|o| o.disposal.as_ref())
            .map(|d| d.record.value_lost)
            .sum();
        Ok(BulkDisposalSummary {
            failed: outcomes.len() - disposed,
            disposed,
            total_value_lost,
            outcomes,
        })
    }
}
