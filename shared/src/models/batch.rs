//! Batch model
//!
//! A batch is one receipt of stock for one product, optionally bound to a
//! branch. It carries its own expiry, cost and lifecycle flags.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{classify_expiry, DisposalRecord, ExpiryTag};
use crate::types::{stock_value, sum_units};

/// A batch of stock for one product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Surrogate id; a lower id means the batch was received earlier.
    pub id: i64,
    pub product_id: i64,
    /// `None` for a global batch that is not bound to any branch.
    pub branch_id: Option<i64>,
    pub batch_number: String,
    pub initial_stock: i64,
    pub current_stock: i64,
    pub cost_per_unit: Decimal,
    pub production_date: Option<NaiveDate>,
    /// `None` means expiry is not tracked for this batch.
    pub expiry_date: Option<NaiveDate>,
    pub is_blocked: bool,
    pub block_reason: Option<String>,
    /// Present once the batch has been disposed.
    pub disposal: Option<DisposalRecord>,
    pub supplier_name: Option<String>,
    pub purchase_order_number: Option<String>,
    pub notes: Option<String>,
    /// Optimistic concurrency token, bumped on every write.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle state of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Active,
    Blocked,
    /// Active or blocked, but past its expiry date.
    PendingDisposal,
    Disposed,
}

impl BatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchState::Active => "active",
            BatchState::Blocked => "blocked",
            BatchState::PendingDisposal => "pending_disposal",
            BatchState::Disposed => "disposed",
        }
    }
}

impl Batch {
    pub fn is_disposed(&self) -> bool {
        self.disposal.is_some()
    }

    /// Not blocked and not disposed. Expired batches are still active until
    /// they are disposed.
    pub fn is_active(&self) -> bool {
        !self.is_blocked && !self.is_disposed()
    }

    /// Active with stock left to sell.
    pub fn is_sellable(&self) -> bool {
        self.is_active() && self.current_stock > 0
    }

    pub fn expiry_tag(&self, as_of: NaiveDate, warning_window_days: u32) -> ExpiryTag {
        classify_expiry(self.expiry_date, as_of, warning_window_days)
    }

    pub fn state(&self, as_of: NaiveDate) -> BatchState {
        if self.is_disposed() {
            return BatchState::Disposed;
        }
        let expired = self.expiry_date.is_some_and(|expiry| expiry < as_of);
        if expired {
            BatchState::PendingDisposal
        } else if self.is_blocked {
            BatchState::Blocked
        } else {
            BatchState::Active
        }
    }

    /// Value of the remaining stock at the batch's cost.
    pub fn stock_value(&self) -> Decimal {
        stock_value(self.current_stock, self.cost_per_unit)
    }
}

/// Sum of current stock across the sellable batches in `batches`.
pub fn sellable_stock<'a>(batches: impl IntoIterator<Item = &'a Batch>) -> i64 {
    sum_units(
        batches
            .into_iter()
            .filter(|b| b.is_sellable())
            .map(|b| b.current_stock),
    )
}

/// Stock-weighted average cost of the sellable batches, or zero when none.
pub fn average_cost<'a>(batches: impl IntoIterator<Item = &'a Batch>) -> Decimal {
    let (qty, value) = batches
        .into_iter()
        .filter(|b| b.is_sellable())
        .fold((0i64, Decimal::ZERO), |(qty, value), b| {
            (
                qty + b.current_stock,
                value + Decimal::from(b.current_stock) * b.cost_per_unit,
            )
        });

    if qty == 0 {
        Decimal::ZERO
    } else {
        crate::types::round_currency(value / Decimal::from(qty))
    }
}

/// A batch about to be created by a receipt or a transfer credit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBatch {
    pub product_id: i64,
    pub branch_id: Option<i64>,
    pub batch_number: String,
    pub quantity: i64,
    pub cost_per_unit: Decimal,
    pub production_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub supplier_name: Option<String>,
    pub purchase_order_number: Option<String>,
    pub notes: Option<String>,
}

impl NewBatch {
    /// Materialize the batch under an assigned id.
    pub fn into_batch(self, id: i64, now: DateTime<Utc>) -> Batch {
        Batch {
            id,
            product_id: self.product_id,
            branch_id: self.branch_id,
            batch_number: self.batch_number,
            initial_stock: self.quantity,
            current_stock: self.quantity,
            cost_per_unit: crate::types::round_currency(self.cost_per_unit),
            production_date: self.production_date,
            expiry_date: self.expiry_date,
            is_blocked: false,
            block_reason: None,
            disposal: None,
            supplier_name: self.supplier_name,
            purchase_order_number: self.purchase_order_number,
            notes: self.notes,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }
}
