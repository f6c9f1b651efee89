//! FIFO-by-expiry allocation planning
//!
//! Planning is pure: it reads a snapshot of batches and proposes which
//! batches a sale draws from. Committing the plan is the ledger's job.

use std::cmp::Ordering;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Batch;
use crate::types::{stock_value, sum_units};

/// One batch's contribution to an allocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationLine {
    pub batch_id: i64,
    pub batch_number: String,
    pub quantity: i64,
    /// Cost per unit at draw time.
    pub cost_per_unit: Decimal,
    pub expiry_date: Option<NaiveDate>,
    /// Batch version the plan was computed against.
    pub batch_version: i64,
}

impl AllocationLine {
    pub fn line_cost(&self) -> Decimal {
        stock_value(self.quantity, self.cost_per_unit)
    }
}

/// Requested quantity exceeds what the active batches hold
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("insufficient stock for product {product_id}: requested {requested}, available {available}")]
pub struct InsufficientStock {
    pub product_id: i64,
    pub requested: i64,
    pub available: i64,
}

impl InsufficientStock {
    pub fn shortfall(&self) -> i64 {
        self.requested - self.available
    }
}

/// Which batches a plan may draw from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationFilter {
    /// `Some` restricts the plan to that branch's batches; `None` draws from
    /// global batches only.
    pub branch_id: Option<i64>,
    pub as_of: NaiveDate,
    /// Skip batches whose expiry date has already passed.
    pub exclude_expired: bool,
}

/// FIFO-by-expiry ordering: earliest expiry first, batches without expiry
/// last, then lower (older) batch id first.
pub fn fifo_order(a: &Batch, b: &Batch) -> Ordering {
    match (a.expiry_date, b.expiry_date) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.id.cmp(&b.id))
}

/// Sellable batches of `product_id` that pass `filter`, in FIFO order.
pub fn fifo_candidates<'a>(
    batches: &'a [Batch],
    product_id: i64,
    filter: &AllocationFilter,
) -> Vec<&'a Batch> {
    let mut candidates: Vec<&Batch> = batches
        .iter()
        .filter(|b| b.product_id == product_id && b.branch_id == filter.branch_id)
        .filter(|b| b.is_sellable())
        .filter(|b| {
            !(filter.exclude_expired && b.expiry_date.is_some_and(|e| e < filter.as_of))
        })
        .collect();
    candidates.sort_by(|a, b| fifo_order(a, b));
    candidates
}

/// Plan a FIFO draw of `requested` units of `product_id`.
///
/// A zero request yields an empty plan. When the candidates cannot cover the
/// request the whole plan is refused.
pub fn plan_fifo_allocation(
    batches: &[Batch],
    product_id: i64,
    requested: i64,
    filter: &AllocationFilter,
) -> Result<Vec<AllocationLine>, InsufficientStock> {
    if requested <= 0 {
        return Ok(Vec::new());
    }

    let candidates = fifo_candidates(batches, product_id, filter);
    let available = sum_units(candidates.iter().map(|b| b.current_stock));
    if available < requested {
        return Err(InsufficientStock {
            product_id,
            requested,
            available,
        });
    }

    let mut remaining = requested;
    let mut lines = Vec::new();
    for batch in candidates {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(batch.current_stock);
        lines.push(AllocationLine {
            batch_id: batch.id,
            batch_number: batch.batch_number.clone(),
            quantity: take,
            cost_per_unit: batch.cost_per_unit,
            expiry_date: batch.expiry_date,
            batch_version: batch.version,
        });
        remaining -= take;
    }

    Ok(lines)
}

/// Reflect a plan in a working snapshot so that a later plan for the same
/// product (e.g. a second sale line) does not reuse the same units.
pub fn reserve_in_snapshot(batches: &mut [Batch], lines: &[AllocationLine]) {
    for line in lines {
        if let Some(batch) = batches.iter_mut().find(|b| b.id == line.batch_id) {
            batch.current_stock -= line.quantity;
        }
    }
}

/// Total cost of goods across a plan.
pub fn allocation_cost(lines: &[AllocationLine]) -> Decimal {
    lines.iter().map(AllocationLine::line_cost).sum()
}
