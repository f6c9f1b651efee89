//! Batch ledger rules
//!
//! Every storage backend applies these checks to the locked batch inside its
//! transaction, so the invariants hold whatever the persistence technology.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Batch, NewBatch};
use crate::types::{sum_units, weighted_average_cost};
use crate::validation::MAX_BATCH_NUMBER_LEN;

/// A requested decrement of one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deduction {
    pub batch_id: i64,
    pub quantity: i64,
    /// Version observed when the deduction was planned; `None` skips the
    /// optimistic check and relies on the row lock alone.
    pub expected_version: Option<i64>,
}

/// A ledger rule the requested mutation would break
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerViolation {
    #[error("quantity must be positive, got {0}")]
    InvalidQuantity(i64),

    #[error("batch {0} not found")]
    UnknownBatch(i64),

    #[error("batch {0} is blocked")]
    Blocked(i64),

    #[error("batch {0} is disposed")]
    Disposed(i64),

    #[error("batch {batch_id} holds {available}, requested {requested}")]
    InsufficientStock {
        batch_id: i64,
        product_id: i64,
        requested: i64,
        available: i64,
    },

    #[error("batch {batch_id} changed since it was read (expected version {expected}, found {found})")]
    VersionMismatch {
        batch_id: i64,
        expected: i64,
        found: i64,
    },

    #[error("batch number {batch_number} already belongs to a batch at another branch")]
    BranchMismatch { batch_number: String },

    #[error("batch number {batch_number} already carries a different expiry date")]
    ExpiryMismatch { batch_number: String },

    #[error("batch {batch_id} holding {current} units cannot take {added} more")]
    StockOverflow {
        batch_id: i64,
        current: i64,
        added: i64,
    },

    #[error("batch {batch_id} has a different {field}")]
    IdentityMismatch { batch_id: i64, field: &'static str },
}

/// Decrement `batch` by `deduction`, re-checking stock and lifecycle on the
/// current row.
pub fn apply_deduction(batch: &mut Batch, deduction: &Deduction) -> Result<(), LedgerViolation> {
    if deduction.quantity <= 0 {
        return Err(LedgerViolation::InvalidQuantity(deduction.quantity));
    }
    if let Some(expected) = deduction.expected_version {
        if expected != batch.version {
            return Err(LedgerViolation::VersionMismatch {
                batch_id: batch.id,
                expected,
                found: batch.version,
            });
        }
    }
    if batch.is_disposed() {
        return Err(LedgerViolation::Disposed(batch.id));
    }
    if batch.is_blocked {
        return Err(LedgerViolation::Blocked(batch.id));
    }
    if deduction.quantity > batch.current_stock {
        return Err(LedgerViolation::InsufficientStock {
            batch_id: batch.id,
            product_id: batch.product_id,
            requested: deduction.quantity,
            available: batch.current_stock,
        });
    }

    batch.current_stock -= deduction.quantity;
    batch.version += 1;
    Ok(())
}

/// Apply several deductions as one unit against freshly locked batches.
///
/// Expected versions are compared with the batches as loaded, so two lines
/// drawing on the same batch in one request do not trip each other. Nothing
/// changes unless every deduction succeeds.
pub fn apply_deductions(
    batches: &mut [Batch],
    deductions: &[Deduction],
) -> Result<(), LedgerViolation> {
    let mut working = batches.to_vec();
    for deduction in deductions {
        let loaded = batches
            .iter()
            .find(|b| b.id == deduction.batch_id)
            .ok_or(LedgerViolation::UnknownBatch(deduction.batch_id))?;
        if let Some(expected) = deduction.expected_version {
            if expected != loaded.version {
                return Err(LedgerViolation::VersionMismatch {
                    batch_id: loaded.id,
                    expected,
                    found: loaded.version,
                });
            }
        }

        let batch = working
            .iter_mut()
            .find(|b| b.id == deduction.batch_id)
            .ok_or(LedgerViolation::UnknownBatch(deduction.batch_id))?;
        apply_deduction(
            batch,
            &Deduction {
                expected_version: None,
                ..*deduction
            },
        )?;
    }

    batches.clone_from_slice(&working);
    Ok(())
}

/// Check that a receipt under an existing batch number really describes the
/// same batch.
pub fn check_receipt_matches(existing: &Batch, incoming: &NewBatch) -> Result<(), LedgerViolation> {
    if existing.branch_id != incoming.branch_id {
        return Err(LedgerViolation::BranchMismatch {
            batch_number: existing.batch_number.clone(),
        });
    }
    if incoming.expiry_date.is_some() && incoming.expiry_date != existing.expiry_date {
        return Err(LedgerViolation::ExpiryMismatch {
            batch_number: existing.batch_number.clone(),
        });
    }
    Ok(())
}

/// What the sender of a top-up states about the batch it adds to. Fields left
/// `None` are not checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchIdentity {
    pub product_id: Option<i64>,
    pub branch_id: Option<i64>,
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub production_date: Option<NaiveDate>,
    pub supplier_name: Option<String>,
}

/// Check a top-up addressed by batch id against the batch it lands in.
pub fn check_identity(existing: &Batch, expected: &BatchIdentity) -> Result<(), LedgerViolation> {
    let mismatch = |field: &'static str| LedgerViolation::IdentityMismatch {
        batch_id: existing.id,
        field,
    };
    if expected.product_id.is_some_and(|id| id != existing.product_id) {
        return Err(mismatch("product_id"));
    }
    if expected.branch_id.is_some() && expected.branch_id != existing.branch_id {
        return Err(mismatch("branch_id"));
    }
    if expected
        .batch_number
        .as_deref()
        .is_some_and(|number| number != existing.batch_number)
    {
        return Err(mismatch("batch_number"));
    }
    if expected.expiry_date.is_some() && expected.expiry_date != existing.expiry_date {
        return Err(mismatch("expiry_date"));
    }
    if expected.production_date.is_some() && expected.production_date != existing.production_date {
        return Err(mismatch("production_date"));
    }
    if expected.supplier_name.is_some() && expected.supplier_name != existing.supplier_name {
        return Err(mismatch("supplier_name"));
    }
    Ok(())
}

/// Add `quantity` units at `cost_per_unit` to an open batch, re-blending its
/// cost as a weighted average.
pub fn apply_receipt(
    batch: &mut Batch,
    quantity: i64,
    cost_per_unit: Decimal,
) -> Result<(), LedgerViolation> {
    if quantity <= 0 {
        return Err(LedgerViolation::InvalidQuantity(quantity));
    }
    if batch.is_disposed() {
        return Err(LedgerViolation::Disposed(batch.id));
    }
    if batch.is_blocked {
        return Err(LedgerViolation::Blocked(batch.id));
    }

    let overflow = || LedgerViolation::StockOverflow {
        batch_id: batch.id,
        current: batch.current_stock,
        added: quantity,
    };
    let current_stock = batch.current_stock.checked_add(quantity).ok_or_else(overflow)?;
    let initial_stock = batch.initial_stock.checked_add(quantity).ok_or_else(overflow)?;
    let cost = weighted_average_cost(batch.current_stock, batch.cost_per_unit, quantity, cost_per_unit)
        .ok_or_else(overflow)?;

    batch.cost_per_unit = cost;
    batch.current_stock = current_stock;
    batch.initial_stock = initial_stock;
    batch.version += 1;
    Ok(())
}

/// Freeze or release a batch. Disposed batches cannot change hold state.
pub fn apply_block(
    batch: &mut Batch,
    blocked: bool,
    reason: Option<String>,
) -> Result<(), LedgerViolation> {
    if batch.is_disposed() {
        return Err(LedgerViolation::Disposed(batch.id));
    }
    batch.is_blocked = blocked;
    batch.block_reason = if blocked { reason } else { None };
    batch.version += 1;
    Ok(())
}

/// Batch number given to stock credited at `branch_id` out of `source`:
/// `<source>-T<branch>`. When that would not fit in `MAX_BATCH_NUMBER_LEN`,
/// the source number is cut short and tagged with the source batch id.
pub fn transfer_batch_number(source: &Batch, branch_id: i64) -> String {
    let suffix = format!("-T{}", branch_id);
    if source.batch_number.len() + suffix.len() <= MAX_BATCH_NUMBER_LEN {
        return format!("{}{}", source.batch_number, suffix);
    }

    let tag = format!(".{}{}", source.id, suffix);
    let keep = MAX_BATCH_NUMBER_LEN.saturating_sub(tag.len());
    let mut prefix = String::with_capacity(keep);
    for c in source.batch_number.chars() {
        if prefix.len() + c.len_utf8() > keep {
            break;
        }
        prefix.push(c);
    }
    format!("{}{}", prefix, tag)
}

/// The destination batch a transfer of `quantity` units out of `source`
/// creates at `branch_id`.
pub fn transfer_destination(source: &Batch, branch_id: i64, quantity: i64) -> NewBatch {
    NewBatch {
        product_id: source.product_id,
        branch_id: Some(branch_id),
        batch_number: transfer_batch_number(source, branch_id),
        quantity,
        cost_per_unit: source.cost_per_unit,
        production_date: source.production_date,
        expiry_date: source.expiry_date,
        supplier_name: source.supplier_name.clone(),
        purchase_order_number: source.purchase_order_number.clone(),
        notes: Some(format!("Transferred from batch {}", source.batch_number)),
    }
}

/// Sellable stock of one product at one branch (or globally)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub product_id: i64,
    pub branch_id: Option<i64>,
    /// Sum of current stock over active batches.
    pub on_hand: i64,
    /// Soft-reserved units; reservations are not issued, so always zero.
    pub reserved: i64,
    pub available: i64,
    pub updated_at: DateTime<Utc>,
}

impl StockLevel {
    /// Recompute the level for `(product_id, branch_id)` from its batches.
    pub fn compute<'a>(
        product_id: i64,
        branch_id: Option<i64>,
        batches: impl IntoIterator<Item = &'a Batch>,
        now: DateTime<Utc>,
    ) -> Self {
        let on_hand = sum_units(
            batches
                .into_iter()
                .filter(|b| b.product_id == product_id && b.branch_id == branch_id && b.is_active())
                .map(|b| b.current_stock),
        );
        Self {
            product_id,
            branch_id,
            on_hand,
            reserved: 0,
            available: on_hand,
            updated_at: now,
        }
    }
}
