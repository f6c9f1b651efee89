//! Common types used across the stock core

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Number of decimal places kept for currency amounts.
pub const CURRENCY_SCALE: u32 = 2;

/// Round a currency amount to 2 decimal places using banker's rounding.
pub fn round_currency(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointNearestEven)
}

/// Blended per-unit cost after adding `add_qty` units at `add_cost` to a
/// holding of `old_qty` units at `old_cost`.
///
/// Returns `add_cost` when the combined quantity is zero, and `None` when the
/// combined quantity or value does not fit.
pub fn weighted_average_cost(
    old_qty: i64,
    old_cost: Decimal,
    add_qty: i64,
    add_cost: Decimal,
) -> Option<Decimal> {
    let total_qty = old_qty.checked_add(add_qty)?;
    if total_qty <= 0 {
        return Some(round_currency(add_cost));
    }
    let total_value = Decimal::from(old_qty)
        .checked_mul(old_cost)?
        .checked_add(Decimal::from(add_qty).checked_mul(add_cost)?)?;
    Some(round_currency(total_value.checked_div(Decimal::from(total_qty))?))
}

/// Sum of unit counts, saturating at `i64::MAX`.
pub fn sum_units(quantities: impl IntoIterator<Item = i64>) -> i64 {
    quantities.into_iter().fold(0, i64::saturating_add)
}

/// Value of `quantity` units at `cost_per_unit`, rounded to currency scale.
pub fn stock_value(quantity: i64, cost_per_unit: Decimal) -> Decimal {
    round_currency(Decimal::from(quantity) * cost_per_unit)
}

/// Pagination parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
}

impl Pagination {
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.per_page)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 50,
        }
    }
}

/// Paginated response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

/// Pagination metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationMeta {
    pub page: u32,
    pub per_page: u32,
    pub total_items: u64,
    pub total_pages: u32,
}

impl<T> PaginatedResponse<T> {
    /// Slice an already-filtered result set into one page.
    pub fn from_items(items: Vec<T>, pagination: &Pagination) -> Self {
        let total_items = items.len() as u64;
        let per_page = pagination.per_page.max(1);
        let total_pages = total_items.div_ceil(u64::from(per_page)) as u32;
        let data = items
            .into_iter()
            .skip(pagination.offset() as usize)
            .take(per_page as usize)
            .collect();

        Self {
            data,
            pagination: PaginationMeta {
                page: pagination.page,
                per_page,
                total_items,
                total_pages,
            },
        }
    }
}
