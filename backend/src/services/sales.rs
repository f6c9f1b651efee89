//! Sale commit path
//!
//! Turns a POS sale into batch allocations. All items of one sale commit
//! together or not at all.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::{
    allocation_cost, classify_expiry, round_currency, stock_value, validate_unit_price,
    AllocationLine, MovementContext, Urgency,
};
use validator::Validate;

use super::fifo::{AllocationRequest, FifoAllocator};
use super::warning_window;
use crate::config::StockConfig;
use crate::error::{AppError, AppResult};
use crate::repository::CatalogReader;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleItemInput {
    pub product_id: i64,
    /// Zero is a no-op line; negative quantities are rejected.
    pub quantity: i64,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateSaleInput {
    /// Sale id assigned by the POS; generated when absent.
    pub reference: Option<String>,
    pub branch_id: Option<i64>,
    #[validate(length(min = 1))]
    pub items: Vec<SaleItemInput>,
}

/// One batch's share of a sale item
#[derive(Debug, Clone, Serialize)]
pub struct SaleBatchAllocation {
    pub batch_id: i64,
    pub batch_number: String,
    pub quantity: i64,
    pub cost_per_unit: Decimal,
    pub expiry_date: Option<NaiveDate>,
    pub urgency: Urgency,
    /// e.g. "3 days until expiry" or "Expired 2 days ago"
    pub expiry_display: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SaleItemWithAllocations {
    pub product_id: i64,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub cost_of_goods: Decimal,
    pub batch_allocations: Vec<SaleBatchAllocation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SaleWithAllocations {
    pub reference: String,
    pub branch_id: Option<i64>,
    pub items: Vec<SaleItemWithAllocations>,
    pub total_amount: Decimal,
    pub total_cost: Decimal,
}

pub struct SalesService {
    allocator: FifoAllocator,
    catalog: Arc<dyn CatalogReader>,
    default_warning_days: u32,
}

impl SalesService {
    pub fn new(allocator: FifoAllocator, catalog: Arc<dyn CatalogReader>, config: &StockConfig) -> Self {
        Self {
            allocator,
            catalog,
            default_warning_days: config.default_warning_days,
        }
    }

    /// Allocate every item of a sale by FIFO-by-expiry and commit the draws.
    pub async fn create_sale_with_batches(
        &self,
        input: CreateSaleInput,
        actor: Option<String>,
    ) -> AppResult<SaleWithAllocations> {
        input.validate()?;
        for item in &input.items {
            validate_unit_price(item.unit_price)
                .map_err(|m| AppError::validation("unit_price", m))?;
        }

        let reference = input
            .reference
            .clone()
            .unwrap_or_else(|| format!("SALE-{}", uuid::Uuid::new_v4()));
        let mut ctx = MovementContext::with_reference(reference.clone());
        ctx.actor = actor;

        let requests: Vec<AllocationRequest> = input
            .items
            .iter()
            .map(|item| AllocationRequest {
                product_id: item.product_id,
                quantity: item.quantity,
                branch_id: input.branch_id,
            })
            .collect();
        let plans = self.allocator.allocate_all(&requests, &ctx).await?;

        let today = Utc::now().date_naive();
        let mut windows: HashMap<i64, u32> = HashMap::new();
        let mut items = Vec::with_capacity(input.items.len());
        for (item, lines) in input.items.iter().zip(plans) {
            let window = match windows.get(&item.product_id) {
                Some(window) => *window,
                None => {
                    let window = warning_window(
                        self.catalog.as_ref(),
                        item.product_id,
                        self.default_warning_days,
                    )
                    .await?;
                    windows.insert(item.product_id, window);
                    window
                }
            };

            items.push(SaleItemWithAllocations {
                product_id: item.product_id,
                quantity: item.quantity,
                unit_price: item.unit_price,
                line_total: stock_value(item.quantity, item.unit_price),
                cost_of_goods: allocation_cost(&lines),
                batch_allocations: lines
                    .iter()
                    .map(|line| describe(line, today, window))
                    .collect(),
            });
        }

        let total_amount = round_currency(items.iter().map(|i| i.line_total).sum());
        let total_cost = round_currency(items.iter().map(|i| i.cost_of_goods).sum());
        tracing::info!(
            "Sale {} committed: {} items, total {}",
            reference,
            items.len(),
            total_amount
        );

        Ok(SaleWithAllocations {
            reference,
            branch_id: input.branch_id,
            items,
            total_amount,
            total_cost,
        })
    }
}

fn describe(line: &AllocationLine, today: NaiveDate, window: u32) -> SaleBatchAllocation {
    let tag = classify_expiry(line.expiry_date, today, window);
    SaleBatchAllocation {
        batch_id: line.batch_id,
        batch_number: line.batch_number.clone(),
        quantity: line.quantity,
        cost_per_unit: line.cost_per_unit,
        expiry_date: line.expiry_date,
        urgency: tag.urgency,
        expiry_display: tag.display(),
    }
}
