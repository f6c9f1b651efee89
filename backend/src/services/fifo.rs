//! FIFO-by-expiry allocation service
//!
//! Plans draws against an unlocked snapshot, then commits every line in one
//! repository call that re-checks each batch's version. A plan that lost a
//! race is recomputed once on a fresh snapshot.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::{
    average_cost, fifo_candidates, plan_fifo_allocation, reserve_in_snapshot,
    validate_sale_quantity, AllocationFilter, AllocationLine, Deduction, ExpiryStatus, ExpiryTag,
    MovementContext, MovementType, Urgency,
};

use super::{bounded, ledger::warn_on_lifecycle, warning_window};
use crate::config::StockConfig;
use crate::error::{AppError, AppResult};
use crate::repository::{BatchFilter, BatchRepository, BranchScope, CatalogReader};

/// Attempts per allocation: the first plan plus one retry after a conflict.
const MAX_ATTEMPTS: usize = 2;

/// One product line to allocate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct AllocationRequest {
    pub product_id: i64,
    pub quantity: i64,
    /// `Some` draws from that branch's batches, `None` from the global pool.
    pub branch_id: Option<i64>,
}

/// Advisory sell-first ordering for one product
#[derive(Debug, Clone, Serialize)]
pub struct FifoRecommendation {
    pub product_id: i64,
    pub batch_recommendations: Vec<BatchRecommendation>,
    pub total_available_stock: i64,
    pub average_cost_per_unit: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchRecommendation {
    pub batch_id: i64,
    pub batch_number: String,
    pub available_stock: i64,
    pub expiry_date: Option<NaiveDate>,
    pub days_until_expiry: Option<i64>,
    pub status: ExpiryStatus,
    pub urgency: Urgency,
    /// 1-based position in the sell order.
    pub recommended_sale_order: usize,
    pub reason_text: String,
}

pub struct FifoAllocator {
    repo: Arc<dyn BatchRepository>,
    catalog: Arc<dyn CatalogReader>,
    config: StockConfig,
}

impl FifoAllocator {
    pub fn new(
        repo: Arc<dyn BatchRepository>,
        catalog: Arc<dyn CatalogReader>,
        config: &StockConfig,
    ) -> Self {
        Self {
            repo,
            catalog,
            config: config.clone(),
        }
    }

    fn filter(&self, branch_id: Option<i64>, as_of: NaiveDate) -> AllocationFilter {
        AllocationFilter {
            branch_id,
            as_of,
            exclude_expired: self.config.exclude_expired_from_sale,
        }
    }

    /// Allocate and commit one product line.
    pub async fn allocate(
        &self,
        request: AllocationRequest,
        ctx: &MovementContext,
    ) -> AppResult<Vec<AllocationLine>> {
        let mut plans = self.allocate_all(&[request], ctx).await?;
        Ok(plans.pop().unwrap_or_default())
    }

    /// Allocate several lines as one unit: either every line is committed or
    /// none is. Returns one plan per request, in request order.
    pub async fn allocate_all(
        &self,
        requests: &[AllocationRequest],
        ctx: &MovementContext,
    ) -> AppResult<Vec<Vec<AllocationLine>>> {
        for request in requests {
            validate_sale_quantity(request.quantity)
                .map_err(|m| AppError::validation("quantity", m))?;
        }

        let mut attempt = 1;
        loop {
            let plans = self.plan(requests, Utc::now().date_naive()).await?;
            let deductions: Vec<Deduction> = plans
                .iter()
                .flatten()
                .map(|line| Deduction {
                    batch_id: line.batch_id,
                    quantity: line.quantity,
                    expected_version: Some(line.batch_version),
                })
                .collect();
            if deductions.is_empty() {
                return Ok(plans);
            }

            let committed = bounded(
                self.config.transaction_timeout(),
                "fifo_allocation",
                self.repo.deduct(&deductions, MovementType::Sale, ctx),
            )
            .await;

            match committed {
                Ok(_) => {
                    tracing::debug!(
                        "Committed FIFO allocation of {} lines across {} batches",
                        requests.len(),
                        deductions.len()
                    );
                    return Ok(plans);
                }
                Err(AppError::ConcurrencyConflict(msg)) if attempt < MAX_ATTEMPTS => {
                    tracing::info!("FIFO allocation lost a race ({}), replanning", msg);
                    attempt += 1;
                }
                Err(AppError::ConcurrencyConflict(msg)) => {
                    tracing::warn!("FIFO allocation conflicted again after retry: {}", msg);
                    return Err(AppError::ConcurrencyConflict(msg));
                }
                Err(e) => return Err(warn_on_lifecycle(e)),
            }
        }
    }

    /// Plan every request against one snapshot per (product, branch).
    async fn plan(
        &self,
        requests: &[AllocationRequest],
        as_of: NaiveDate,
    ) -> AppResult<Vec<Vec<AllocationLine>>> {
        let mut snapshots = Vec::new();
        let mut plans = Vec::with_capacity(requests.len());

        for request in requests {
            if request.quantity == 0 {
                plans.push(Vec::new());
                continue;
            }

            let key = (request.product_id, request.branch_id);
            let idx = match snapshots.iter().position(|(k, _)| *k == key) {
                Some(idx) => idx,
                None => {
                    let filter = BatchFilter::for_product(request.product_id)
                        .in_branch(BranchScope::exact(request.branch_id));
                    snapshots.push((key, self.repo.list_batches(&filter).await?));
                    snapshots.len() - 1
                }
            };

            let snapshot = &mut snapshots[idx].1;
            let lines = plan_fifo_allocation(
                snapshot,
                request.product_id,
                request.quantity,
                &self.filter(request.branch_id, as_of),
            )?;
            reserve_in_snapshot(snapshot, &lines);
            plans.push(lines);
        }

        Ok(plans)
    }

    /// Read-only sell-first ordering with expiry reasons.
    pub async fn get_fifo_recommendation(
        &self,
        product_id: i64,
        branch_id: Option<i64>,
    ) -> AppResult<FifoRecommendation> {
        let as_of = Utc::now().date_naive();
        let window =
            warning_window(self.catalog.as_ref(), product_id, self.config.default_warning_days)
                .await?;
        let batches = self
            .repo
            .list_batches(
                &BatchFilter::for_product(product_id).in_branch(BranchScope::exact(branch_id)),
            )
            .await?;

        let candidates = fifo_candidates(&batches, product_id, &self.filter(branch_id, as_of));
        let batch_recommendations = candidates
            .iter()
            .enumerate()
            .map(|(idx, batch)| {
                let tag = batch.expiry_tag(as_of, window);
                BatchRecommendation {
                    batch_id: batch.id,
                    batch_number: batch.batch_number.clone(),
                    available_stock: batch.current_stock,
                    expiry_date: batch.expiry_date,
                    days_until_expiry: tag.days_until_expiry,
                    status: tag.status,
                    urgency: tag.urgency,
                    recommended_sale_order: idx + 1,
                    reason_text: reason_text(&tag, idx == 0),
                }
            })
            .collect();

        Ok(FifoRecommendation {
            product_id,
            batch_recommendations,
            total_available_stock: candidates.iter().map(|b| b.current_stock).sum(),
            average_cost_per_unit: average_cost(candidates.iter().copied()),
        })
    }
}

fn reason_text(tag: &ExpiryTag, first: bool) -> String {
    let advice = match (tag.status, tag.days_until_expiry) {
        (_, None) => "no expiry date, sell after dated batches",
        (ExpiryStatus::Expired, _) => "pull from shelf and dispose",
        (ExpiryStatus::Critical, _) => "sell immediately",
        (ExpiryStatus::Warning, _) => "prioritize in sales",
        (ExpiryStatus::Good, _) => "standard rotation",
    };
    if first {
        format!("Sell first: {} ({})", tag.display(), advice)
    } else {
        format!("{} ({})", tag.display(), advice)
    }
}
