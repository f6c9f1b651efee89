//! Validation utilities for stock operations
//!
//! Each check returns a static message; callers attach the field name.

use chrono::NaiveDate;
use rust_decimal::Decimal;

/// Longest accepted batch number.
pub const MAX_BATCH_NUMBER_LEN: usize = 64;

/// Validate a quantity received or moved (must be positive)
pub fn validate_quantity(quantity: i64) -> Result<(), &'static str> {
    if quantity <= 0 {
        return Err("Quantity must be positive");
    }
    Ok(())
}

/// Validate a sale quantity (zero is a no-op, negative is rejected)
pub fn validate_sale_quantity(quantity: i64) -> Result<(), &'static str> {
    if quantity < 0 {
        return Err("Quantity cannot be negative");
    }
    Ok(())
}

/// Validate a per-unit cost (zero allowed for free goods)
pub fn validate_cost_per_unit(cost: Decimal) -> Result<(), &'static str> {
    if cost < Decimal::ZERO {
        return Err("Cost per unit cannot be negative");
    }
    Ok(())
}

/// Validate a sale unit price (zero allowed for giveaways)
pub fn validate_unit_price(price: Decimal) -> Result<(), &'static str> {
    if price < Decimal::ZERO {
        return Err("Unit price cannot be negative");
    }
    Ok(())
}

/// Validate batch number format: 1-64 characters, no surrounding whitespace,
/// letters, digits and `-_/.` only
pub fn validate_batch_number(batch_number: &str) -> Result<(), &'static str> {
    if batch_number.is_empty() {
        return Err("Batch number cannot be empty");
    }
    if batch_number.len() > MAX_BATCH_NUMBER_LEN {
        return Err("Batch number is too long");
    }
    if batch_number.trim() != batch_number {
        return Err("Batch number cannot start or end with whitespace");
    }
    if !batch_number
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/' | '.'))
    {
        return Err("Batch number may only contain letters, digits and - _ / .");
    }
    Ok(())
}

/// Validate that production precedes expiry when both are known
pub fn validate_batch_dates(
    production_date: Option<NaiveDate>,
    expiry_date: Option<NaiveDate>,
) -> Result<(), &'static str> {
    match (production_date, expiry_date) {
        (Some(produced), Some(expires)) if produced > expires => {
            Err("Production date cannot be after expiry date")
        }
        _ => Ok(()),
    }
}

/// Validate a category warning window (0 to 3650 days)
pub fn validate_warning_window(days: i64) -> Result<(), &'static str> {
    if !(0..=3650).contains(&days) {
        return Err("Warning window must be between 0 and 3650 days");
    }
    Ok(())
}
