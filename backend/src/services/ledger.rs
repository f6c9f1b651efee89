//! Batch ledger service
//!
//! The only write path to batch stock. Validates requests, then hands each
//! mutation to the repository as one bounded, atomic unit.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::{
    sellable_stock, transfer_destination, validate_batch_dates, validate_batch_number,
    validate_cost_per_unit, validate_quantity, Batch, BatchIdentity, BatchState, Deduction,
    MovementContext, MovementType, NewBatch, StockLevel, StockMovement,
};
use validator::Validate;

use super::bounded;
use crate::config::StockConfig;
use crate::error::{AppError, AppResult};
use crate::repository::{BatchFilter, BatchRepository, ReceiveOutcome};

/// Input for a raw stock receipt
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ReceiveStockInput {
    pub product_id: i64,
    pub branch_id: Option<i64>,
    #[validate(length(min = 1, max = 64))]
    pub batch_number: String,
    #[validate(range(min = 1))]
    pub quantity: i64,
    pub cost_per_unit: Decimal,
    pub expiry_date: Option<NaiveDate>,
    pub production_date: Option<NaiveDate>,
    pub supplier_name: Option<String>,
    pub purchase_order_number: Option<String>,
    pub notes: Option<String>,
}

/// Input for the inventory-intake contract: top up a known batch, or receive
/// under a batch number (generated when omitted)
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AddStockInput {
    pub batch_id: Option<i64>,
    pub product_id: Option<i64>,
    pub branch_id: Option<i64>,
    #[validate(range(min = 1))]
    pub quantity: i64,
    pub cost_per_unit: Decimal,
    #[validate(length(min = 1, max = 64))]
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub production_date: Option<NaiveDate>,
    pub supplier_name: Option<String>,
    pub purchase_order_number: Option<String>,
    pub notes: Option<String>,
}

/// Result of the inventory-intake contract
#[derive(Debug, Clone, Serialize)]
pub struct AddStockResult {
    pub batch_id: i64,
    pub batch_number: String,
    pub created: bool,
    pub new_batch_stock: i64,
    pub new_product_total_stock: i64,
    pub weighted_average_cost: Decimal,
}

/// A batch with its lifecycle state as of today
#[derive(Debug, Clone, Serialize)]
pub struct BatchView {
    #[serde(flatten)]
    pub batch: Batch,
    pub state: BatchState,
}

impl BatchView {
    pub fn new(batch: Batch, as_of: NaiveDate) -> Self {
        let state = batch.state(as_of);
        Self { batch, state }
    }
}

pub struct BatchLedger {
    repo: Arc<dyn BatchRepository>,
    timeout: Duration,
}

impl BatchLedger {
    pub fn new(repo: Arc<dyn BatchRepository>, config: &StockConfig) -> Self {
        Self {
            repo,
            timeout: config.transaction_timeout(),
        }
    }

    /// Receive stock into a new batch, or into the open batch that already
    /// carries the batch number.
    pub async fn receive_stock(
        &self,
        input: ReceiveStockInput,
        ctx: &MovementContext,
    ) -> AppResult<ReceiveOutcome> {
        input.validate()?;
        validate_quantity(input.quantity).map_err(|m| AppError::validation("quantity", m))?;
        validate_cost_per_unit(input.cost_per_unit)
            .map_err(|m| AppError::validation("cost_per_unit", m))?;
        validate_batch_number(&input.batch_number)
            .map_err(|m| AppError::validation("batch_number", m))?;
        validate_batch_dates(input.production_date, input.expiry_date)
            .map_err(|m| AppError::validation("production_date", m))?;

        let receipt = NewBatch {
            product_id: input.product_id,
            branch_id: input.branch_id,
            batch_number: input.batch_number,
            quantity: input.quantity,
            cost_per_unit: input.cost_per_unit,
            production_date: input.production_date,
            expiry_date: input.expiry_date,
            supplier_name: input.supplier_name,
            purchase_order_number: input.purchase_order_number,
            notes: input.notes,
        };

        let outcome = bounded(
            self.timeout,
            "receive_stock",
            self.repo.receive(receipt, MovementType::Receipt, ctx),
        )
        .await
        .map_err(warn_on_lifecycle)?;

        tracing::info!(
            "Received {} units into batch {} ({}) for product {}",
            input.quantity,
            outcome.batch.id,
            if outcome.created { "new" } else { "merged" },
            outcome.batch.product_id
        );
        Ok(outcome)
    }

    /// Inventory-intake contract: top up `batch_id` when given, otherwise
    /// receive under `batch_number`.
    pub async fn add_stock_to_batch(
        &self,
        input: AddStockInput,
        ctx: &MovementContext,
    ) -> AppResult<AddStockResult> {
        input.validate()?;
        validate_cost_per_unit(input.cost_per_unit)
            .map_err(|m| AppError::validation("cost_per_unit", m))?;

        let (batch, created) = match input.batch_id {
            Some(batch_id) => {
                validate_batch_dates(input.production_date, input.expiry_date)
                    .map_err(|m| AppError::validation("production_date", m))?;
                let expected = BatchIdentity {
                    product_id: input.product_id,
                    branch_id: input.branch_id,
                    batch_number: input.batch_number,
                    expiry_date: input.expiry_date,
                    production_date: input.production_date,
                    supplier_name: input.supplier_name,
                };
                // The purchase order and notes describe this delivery, not the batch.
                let ctx = MovementContext {
                    reference: ctx.reference.clone().or(input.purchase_order_number),
                    actor: ctx.actor.clone(),
                    note: ctx.note.clone().or(input.notes),
                };
                let batch = bounded(
                    self.timeout,
                    "add_stock_to_batch",
                    self.repo.add_to_batch(
                        batch_id,
                        input.quantity,
                        input.cost_per_unit,
                        &expected,
                        MovementType::Receipt,
                        &ctx,
                    ),
                )
                .await
                .map_err(warn_on_lifecycle)?;
                (batch, false)
            }
            None => {
                let product_id = input.product_id.ok_or_else(|| {
                    AppError::validation("product_id", "product_id is required without batch_id")
                })?;
                let batch_number = input
                    .batch_number
                    .unwrap_or_else(|| generate_batch_number(product_id));
                let outcome = self
                    .receive_stock(
                        ReceiveStockInput {
                            product_id,
                            branch_id: input.branch_id,
                            batch_number,
                            quantity: input.quantity,
                            cost_per_unit: input.cost_per_unit,
                            expiry_date: input.expiry_date,
                            production_date: input.production_date,
                            supplier_name: input.supplier_name,
                            purchase_order_number: input.purchase_order_number,
                            notes: input.notes,
                        },
                        ctx,
                    )
                    .await?;
                (outcome.batch, outcome.created)
            }
        };

        let new_product_total_stock = self.product_total_stock(batch.product_id).await?;
        Ok(AddStockResult {
            batch_id: batch.id,
            batch_number: batch.batch_number.clone(),
            created,
            new_batch_stock: batch.current_stock,
            new_product_total_stock,
            weighted_average_cost: batch.cost_per_unit,
        })
    }

    /// Remove `quantity` units from one batch. Returns the new current stock.
    pub async fn deduct_stock(
        &self,
        batch_id: i64,
        quantity: i64,
        ctx: &MovementContext,
    ) -> AppResult<i64> {
        validate_quantity(quantity).map_err(|m| AppError::validation("quantity", m))?;

        let deduction = Deduction {
            batch_id,
            quantity,
            expected_version: None,
        };
        let updated = bounded(
            self.timeout,
            "deduct_stock",
            self.repo.deduct(&[deduction], MovementType::Deduction, ctx),
        )
        .await
        .map_err(warn_on_lifecycle)?;

        let batch = updated
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Internal(format!("Batch {} missing after deduction", batch_id)))?;
        tracing::debug!("Deducted {} from batch {}", quantity, batch_id);
        Ok(batch.current_stock)
    }

    /// Credit `quantity` units back to `batch_id`, or, when `target_branch_id`
    /// names another branch, into that branch's copy of the batch.
    pub async fn credit_stock(
        &self,
        batch_id: i64,
        quantity: i64,
        target_branch_id: Option<i64>,
        ctx: &MovementContext,
    ) -> AppResult<Batch> {
        validate_quantity(quantity).map_err(|m| AppError::validation("quantity", m))?;
        let source = self.get_batch(batch_id).await?;

        let batch = match target_branch_id {
            Some(branch_id) if source.branch_id != Some(branch_id) => {
                let receipt = transfer_destination(&source, branch_id, quantity);
                bounded(
                    self.timeout,
                    "credit_stock",
                    self.repo.receive(receipt, MovementType::TransferIn, ctx),
                )
                .await
                .map_err(warn_on_lifecycle)?
                .batch
            }
            _ => bounded(
                self.timeout,
                "credit_stock",
                self.repo.add_to_batch(
                    batch_id,
                    quantity,
                    source.cost_per_unit,
                    &BatchIdentity::default(),
                    MovementType::TransferIn,
                    ctx,
                ),
            )
            .await
            .map_err(warn_on_lifecycle)?,
        };

        tracing::debug!("Credited {} units into batch {}", quantity, batch.id);
        Ok(batch)
    }

    /// Put a batch on quality hold or release it.
    pub async fn set_blocked(
        &self,
        batch_id: i64,
        blocked: bool,
        reason: Option<String>,
    ) -> AppResult<Batch> {
        let batch = bounded(
            self.timeout,
            "set_blocked",
            self.repo.set_blocked(batch_id, blocked, reason),
        )
        .await
        .map_err(warn_on_lifecycle)?;

        tracing::info!(
            "Batch {} {}",
            batch_id,
            if blocked { "blocked" } else { "released" }
        );
        Ok(batch)
    }

    pub async fn get_batch(&self, batch_id: i64) -> AppResult<Batch> {
        self.repo
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Batch {}", batch_id)))
    }

    pub async fn get_batch_view(&self, batch_id: i64) -> AppResult<BatchView> {
        let batch = self.get_batch(batch_id).await?;
        Ok(BatchView::new(batch, Utc::now().date_naive()))
    }

    pub async fn list_batches(&self, filter: &BatchFilter) -> AppResult<Vec<Batch>> {
        self.repo.list_batches(filter).await
    }

    pub async fn stock_levels(&self, product_id: i64) -> AppResult<Vec<StockLevel>> {
        self.repo.stock_levels(product_id).await
    }

    /// Audit trail of one batch.
    pub async fn movements(&self, batch_id: i64) -> AppResult<Vec<StockMovement>> {
        self.get_batch(batch_id).await?;
        self.repo.movements(batch_id).await
    }

    /// Sellable stock of a product over every branch and the global pool.
    pub async fn product_total_stock(&self, product_id: i64) -> AppResult<i64> {
        let batches = self
            .repo
            .list_batches(&BatchFilter::for_product(product_id))
            .await?;
        Ok(sellable_stock(&batches))
    }
}

/// Mutations that hit a blocked or disposed batch mean a caller worked from
/// stale state; surface them in the logs.
pub(crate) fn warn_on_lifecycle(e: AppError) -> AppError {
    if matches!(e, AppError::BlockedBatch(_) | AppError::DisposedBatch(_)) {
        tracing::warn!("Ledger consistency warning: {}", e);
    }
    e
}

fn generate_batch_number(product_id: i64) -> String {
    format!("P{}-{}", product_id, Utc::now().format("%Y%m%d%H%M%S"))
}
