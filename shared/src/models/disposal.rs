//! Disposal rules
//!
//! Disposal is the terminal write-off of a batch. A batch may be disposed
//! once it has expired, or earlier when an operator forces it (damage,
//! recalls). There is no way back to active.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Batch;
use crate::types::stock_value;

/// How a batch was written off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisposalMethod {
    Destroy,
    ReturnToSupplier,
    Donate,
    Recycle,
    Other,
}

impl DisposalMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisposalMethod::Destroy => "destroy",
            DisposalMethod::ReturnToSupplier => "return_to_supplier",
            DisposalMethod::Donate => "donate",
            DisposalMethod::Recycle => "recycle",
            DisposalMethod::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "destroy" => Some(DisposalMethod::Destroy),
            "return_to_supplier" => Some(DisposalMethod::ReturnToSupplier),
            "donate" => Some(DisposalMethod::Donate),
            "recycle" => Some(DisposalMethod::Recycle),
            "other" => Some(DisposalMethod::Other),
            _ => None,
        }
    }
}

/// Terminal disposal details stored on a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisposalRecord {
    pub disposal_date: NaiveDate,
    pub method: DisposalMethod,
    pub reason: Option<String>,
    /// Units written off; the batch's current stock at disposal time.
    pub quantity: i64,
    /// `quantity * cost_per_unit`, rounded to currency scale.
    pub value_lost: Decimal,
    /// Whether an operator overrode the expiry check.
    pub forced: bool,
}

/// Why a disposal request was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DisposalRejection {
    #[error("batch {0} is already disposed")]
    AlreadyDisposed(i64),

    #[error("batch {batch_id} has not expired (days until expiry: {days_until_expiry:?})")]
    NotExpired {
        batch_id: i64,
        days_until_expiry: Option<i64>,
    },
}

/// Decide whether `batch` can be disposed on `as_of` and build the record.
///
/// Blocked batches follow the same rules as active ones.
pub fn evaluate_disposal(
    batch: &Batch,
    as_of: NaiveDate,
    method: DisposalMethod,
    reason: Option<String>,
    force: bool,
) -> Result<DisposalRecord, DisposalRejection> {
    if batch.is_disposed() {
        return Err(DisposalRejection::AlreadyDisposed(batch.id));
    }

    let expired = batch.expiry_date.is_some_and(|expiry| expiry < as_of);
    if !expired && !force {
        return Err(DisposalRejection::NotExpired {
            batch_id: batch.id,
            days_until_expiry: batch.expiry_date.map(|e| (e - as_of).num_days()),
        });
    }

    Ok(DisposalRecord {
        disposal_date: as_of,
        method,
        reason,
        quantity: batch.current_stock,
        value_lost: stock_value(batch.current_stock, batch.cost_per_unit),
        forced: force && !expired,
    })
}

/// Apply an accepted disposal to the batch: stock goes to zero, the record is
/// attached and the version advances.
pub fn apply_disposal(batch: &mut Batch, record: DisposalRecord) {
    batch.current_stock = 0;
    batch.disposal = Some(record);
    batch.version += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewBatch;
    use chrono::Utc;

    fn batch(expiry: Option<NaiveDate>) -> Batch {
        NewBatch {
            product_id: 7,
            branch_id: Some(1),
            batch_number: "EXP-1".to_string(),
            quantity: 12,
            cost_per_unit: Decimal::new(250, 2),
            production_date: None,
            expiry_date: expiry,
            supplier_name: None,
            purchase_order_number: None,
            notes: None,
        }
        .into_batch(3, Utc::now())
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
    }

    #[test]
    fn expired_batch_disposes_with_value_lost() {
        let mut b = batch(Some(date(9)));
        let record = evaluate_disposal(&b, date(10), DisposalMethod::Destroy, None, false).unwrap();
        assert_eq!(record.quantity, 12);
        assert_eq!(record.value_lost, Decimal::new(3000, 2));
        assert!(!record.forced);

        apply_disposal(&mut b, record);
        assert_eq!(b.current_stock, 0);
        assert!(b.is_disposed());

        let again = evaluate_disposal(&b, date(10), DisposalMethod::Destroy, None, true);
        assert_eq!(again, Err(DisposalRejection::AlreadyDisposed(3)));
    }

    #[test]
    fn unexpired_batch_needs_force() {
        let b = batch(Some(date(20)));
        let refused = evaluate_disposal(&b, date(10), DisposalMethod::Other, None, false);
        assert_eq!(
            refused,
            Err(DisposalRejection::NotExpired {
                batch_id: 3,
                days_until_expiry: Some(10),
            })
        );

        let forced = evaluate_disposal(
            &b,
            date(10),
            DisposalMethod::Other,
            Some("crushed pallet".to_string()),
            true,
        )
        .unwrap();
        assert!(forced.forced);
    }

    #[test]
    fn untracked_expiry_needs_force() {
        let b = batch(None);
        assert!(evaluate_disposal(&b, date(10), DisposalMethod::Donate, None, false).is_err());
    }

    #[test]
    fn expiry_day_itself_is_not_expired() {
        let b = batch(Some(date(10)));
        assert!(evaluate_disposal(&b, date(10), DisposalMethod::Destroy, None, false).is_err());
    }

    #[test]
    fn method_round_trips_through_str() {
        for m in [
            DisposalMethod::Destroy,
            DisposalMethod::ReturnToSupplier,
            DisposalMethod::Donate,
            DisposalMethod::Recycle,
            DisposalMethod::Other,
        ] {
            assert_eq!(DisposalMethod::parse(m.as_str()), Some(m));
        }
    }
}
