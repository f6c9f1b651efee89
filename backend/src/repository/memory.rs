//! In-process batch store
//!
//! Used by tests and by `database.in_memory` runs. One `RwLock` guards the
//! whole store, so every write method is trivially atomic.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use shared::{
    apply_block, apply_deduction, apply_deductions, apply_disposal, apply_receipt,
    check_identity, check_receipt_matches, evaluate_disposal, transfer_destination,
    validate_warning_window, Batch, BatchIdentity, BranchThreshold, Deduction, LedgerViolation,
    MovementContext, MovementType, NewBatch, StockLevel, StockMovement,
};

use super::{
    BatchFilter, BatchRepository, CatalogReader, DisposalRequest, ProductProfile, ReceiveOutcome,
    TransferOutcome,
};
use crate::error::{AppError, AppResult};

#[derive(Default)]
struct Store {
    batches: BTreeMap<i64, Batch>,
    movements: Vec<StockMovement>,
    products: HashMap<i64, ProductProfile>,
    thresholds: HashMap<i64, Vec<BranchThreshold>>,
    last_batch_id: i64,
    last_movement_id: i64,
}

impl Store {
    fn batch(&self, batch_id: i64) -> AppResult<&Batch> {
        self.batches
            .get(&batch_id)
            .ok_or_else(|| AppError::NotFound(format!("Batch {}", batch_id)))
    }

    fn open_batch_id(&self, product_id: i64, batch_number: &str) -> Option<i64> {
        self.batches
            .values()
            .find(|b| {
                b.product_id == product_id && b.batch_number == batch_number && !b.is_disposed()
            })
            .map(|b| b.id)
    }

    fn record(
        &mut self,
        batch: &Batch,
        movement_type: MovementType,
        quantity: i64,
        cost_per_unit: Decimal,
        ctx: &MovementContext,
        now: DateTime<Utc>,
    ) {
        self.last_movement_id += 1;
        self.movements.push(StockMovement {
            id: self.last_movement_id,
            batch_id: batch.id,
            product_id: batch.product_id,
            branch_id: batch.branch_id,
            movement_type,
            quantity,
            cost_per_unit,
            reference: ctx.reference.clone(),
            actor: ctx.actor.clone(),
            note: ctx.note.clone(),
            created_at: now,
        });
    }

    fn store(&mut self, mut batch: Batch, now: DateTime<Utc>) -> Batch {
        batch.updated_at = now;
        self.batches.insert(batch.id, batch.clone());
        batch
    }

    fn receive(
        &mut self,
        receipt: NewBatch,
        movement_type: MovementType,
        ctx: &MovementContext,
        now: DateTime<Utc>,
    ) -> AppResult<ReceiveOutcome> {
        if receipt.quantity <= 0 {
            return Err(LedgerViolation::InvalidQuantity(receipt.quantity).into());
        }

        if let Some(existing_id) = self.open_batch_id(receipt.product_id, &receipt.batch_number) {
            let mut batch = self.batch(existing_id)?.clone();
            check_receipt_matches(&batch, &receipt)?;
            apply_receipt(&mut batch, receipt.quantity, receipt.cost_per_unit)?;
            let batch = self.store(batch, now);
            self.record(
                &batch,
                movement_type,
                receipt.quantity,
                receipt.cost_per_unit,
                ctx,
                now,
            );
            return Ok(ReceiveOutcome {
                batch,
                created: false,
            });
        }

        self.last_batch_id += 1;
        let quantity = receipt.quantity;
        let batch = receipt.into_batch(self.last_batch_id, now);
        let batch = self.store(batch, now);
        self.record(&batch, movement_type, quantity, batch.cost_per_unit, ctx, now);
        Ok(ReceiveOutcome {
            batch,
            created: true,
        })
    }
}

/// Batch repository backed by process memory
#[derive(Default)]
pub struct InMemoryBatchRepository {
    store: RwLock<Store>,
}

impl InMemoryBatchRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> AppResult<RwLockReadGuard<'_, Store>> {
        self.store
            .read()
            .map_err(|_| AppError::Internal("batch store lock poisoned".to_string()))
    }

    fn write(&self) -> AppResult<RwLockWriteGuard<'_, Store>> {
        self.store
            .write()
            .map_err(|_| AppError::Internal("batch store lock poisoned".to_string()))
    }

    /// Register or replace a product in the local catalog copy.
    pub fn upsert_product(&self, profile: ProductProfile) -> AppResult<()> {
        if let Some(days) = profile.warning_window_days {
            validate_warning_window(i64::from(days))
                .map_err(|m| AppError::validation("warning_window_days", m))?;
        }
        self.write()?.products.insert(profile.product_id, profile);
        Ok(())
    }

    /// Replace the per-branch minimum stock levels of a product.
    pub fn set_thresholds(&self, product_id: i64, thresholds: Vec<BranchThreshold>) -> AppResult<()> {
        self.write()?.thresholds.insert(product_id, thresholds);
        Ok(())
    }
}

#[async_trait]
impl BatchRepository for InMemoryBatchRepository {
    async fn ping(&self) -> AppResult<()> {
        self.read().map(|_| ())
    }

    async fn get_batch(&self, batch_id: i64) -> AppResult<Option<Batch>> {
        Ok(self.read()?.batches.get(&batch_id).cloned())
    }

    async fn list_batches(&self, filter: &BatchFilter) -> AppResult<Vec<Batch>> {
        Ok(self
            .read()?
            .batches
            .values()
            .filter(|b| filter.matches(b))
            .cloned()
            .collect())
    }

    async fn product_ids(&self) -> AppResult<Vec<i64>> {
        let ids: BTreeSet<i64> = self
            .read()?
            .batches
            .values()
            .filter(|b| !b.is_disposed())
            .map(|b| b.product_id)
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn receive(
        &self,
        receipt: NewBatch,
        movement_type: MovementType,
        ctx: &MovementContext,
    ) -> AppResult<ReceiveOutcome> {
        self.write()?.receive(receipt, movement_type, ctx, Utc::now())
    }

    async fn add_to_batch(
        &self,
        batch_id: i64,
        quantity: i64,
        cost_per_unit: Decimal,
        expected: &BatchIdentity,
        movement_type: MovementType,
        ctx: &MovementContext,
    ) -> AppResult<Batch> {
        let now = Utc::now();
        let mut store = self.write()?;
        let mut batch = store.batch(batch_id)?.clone();
        check_identity(&batch, expected)?;
        apply_receipt(&mut batch, quantity, cost_per_unit)?;
        let batch = store.store(batch, now);
        store.record(&batch, movement_type, quantity, cost_per_unit, ctx, now);
        Ok(batch)
    }

    async fn deduct(
        &self,
        deductions: &[Deduction],
        movement_type: MovementType,
        ctx: &MovementContext,
    ) -> AppResult<Vec<Batch>> {
        let now = Utc::now();
        let mut store = self.write()?;

        let ids: BTreeSet<i64> = deductions.iter().map(|d| d.batch_id).collect();
        let mut locked = ids
            .iter()
            .map(|id| store.batch(*id).cloned())
            .collect::<AppResult<Vec<Batch>>>()?;
        apply_deductions(&mut locked, deductions)?;

        let mut updated = Vec::with_capacity(locked.len());
        for batch in locked {
            updated.push(store.store(batch, now));
        }
        for deduction in deductions {
            let batch = store.batch(deduction.batch_id)?.clone();
            store.record(
                &batch,
                movement_type,
                -deduction.quantity,
                batch.cost_per_unit,
                ctx,
                now,
            );
        }
        Ok(updated)
    }

    async fn transfer(
        &self,
        deduction: Deduction,
        target_branch_id: i64,
        ctx: &MovementContext,
    ) -> AppResult<TransferOutcome> {
        let now = Utc::now();
        let mut store = self.write()?;

        let mut source = store.batch(deduction.batch_id)?.clone();
        if source.branch_id == Some(target_branch_id) {
            return Err(AppError::validation(
                "target_branch_id",
                "Target branch must differ from the source branch",
            ));
        }
        let destination = transfer_destination(&source, target_branch_id, deduction.quantity);
        apply_deduction(&mut source, &deduction)?;

        // Nothing is written until the source check passes; the receipt is
        // itself all-or-nothing.
        let received = store.receive(destination, MovementType::TransferIn, ctx, now)?;
        let source = store.store(source, now);
        store.record(
            &source,
            MovementType::TransferOut,
            -deduction.quantity,
            source.cost_per_unit,
            ctx,
            now,
        );

        Ok(TransferOutcome {
            source,
            destination: received.batch,
            destination_created: received.created,
        })
    }

    async fn dispose(
        &self,
        batch_id: i64,
        request: &DisposalRequest,
        ctx: &MovementContext,
    ) -> AppResult<Batch> {
        let now = Utc::now();
        let mut store = self.write()?;
        let mut batch = store.batch(batch_id)?.clone();
        let record = evaluate_disposal(
            &batch,
            request.as_of,
            request.method,
            request.reason.clone(),
            request.force,
        )?;
        let quantity = record.quantity;
        apply_disposal(&mut batch, record);
        let batch = store.store(batch, now);
        store.record(
            &batch,
            MovementType::Disposal,
            -quantity,
            batch.cost_per_unit,
            ctx,
            now,
        );
        Ok(batch)
    }

    async fn set_blocked(
        &self,
        batch_id: i64,
        blocked: bool,
        reason: Option<String>,
    ) -> AppResult<Batch> {
        let now = Utc::now();
        let mut store = self.write()?;
        let mut batch = store.batch(batch_id)?.clone();
        apply_block(&mut batch, blocked, reason)?;
        Ok(store.store(batch, now))
    }

    async fn movements(&self, batch_id: i64) -> AppResult<Vec<StockMovement>> {
        Ok(self
            .read()?
            .movements
            .iter()
            .filter(|m| m.batch_id == batch_id)
            .cloned()
            .collect())
    }

    async fn stock_levels(&self, product_id: i64) -> AppResult<Vec<StockLevel>> {
        let store = self.read()?;
        let branches: BTreeSet<Option<i64>> = store
            .batches
            .values()
            .filter(|b| b.product_id == product_id)
            .map(|b| b.branch_id)
            .collect();
        let now = Utc::now();
        Ok(branches
            .into_iter()
            .map(|branch_id| StockLevel::compute(product_id, branch_id, store.batches.values(), now))
            .collect())
    }
}

#[async_trait]
impl CatalogReader for InMemoryBatchRepository {
    async fn product(&self, product_id: i64) -> AppResult<Option<ProductProfile>> {
        Ok(self.read()?.products.get(&product_id).cloned())
    }

    async fn thresholds(&self, product_id: i64) -> AppResult<Vec<BranchThreshold>> {
        Ok(self
            .read()?
            .thresholds
            .get(&product_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn receipt(number: &str, quantity: i64, cost: i64) -> NewBatch {
        NewBatch {
            product_id: 1,
            branch_id: Some(1),
            batch_number: number.to_string(),
            quantity,
            cost_per_unit: Decimal::from(cost),
            production_date: None,
            expiry_date: NaiveDate::from_ymd_opt(2025, 6, 1),
            supplier_name: None,
            purchase_order_number: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn receipt_under_open_number_merges() {
        let repo = InMemoryBatchRepository::new();
        let ctx = MovementContext::default();
        let first = repo
            .receive(receipt("R-1", 10, 100), MovementType::Receipt, &ctx)
            .await
            .unwrap();
        let second = repo
            .receive(receipt("R-1", 10, 200), MovementType::Receipt, &ctx)
            .await
            .unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(second.batch.id, first.batch.id);
        assert_eq!(second.batch.current_stock, 20);
        assert_eq!(second.batch.cost_per_unit, Decimal::from(150));
        assert_eq!(repo.movements(first.batch.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_deduction_records_nothing() {
        let repo = InMemoryBatchRepository::new();
        let ctx = MovementContext::default();
        let a = repo
            .receive(receipt("A", 5, 1), MovementType::Receipt, &ctx)
            .await
            .unwrap()
            .batch;
        let b = repo
            .receive(receipt("B", 5, 1), MovementType::Receipt, &ctx)
            .await
            .unwrap()
            .batch;

        let result = repo
            .deduct(
                &[
                    Deduction {
                        batch_id: a.id,
                        quantity: 5,
                        expected_version: None,
                    },
                    Deduction {
                        batch_id: b.id,
                        quantity: 6,
                        expected_version: None,
                    },
                ],
                MovementType::Sale,
                &ctx,
            )
            .await;

        assert!(matches!(result, Err(AppError::InsufficientStock { .. })));
        assert_eq!(repo.get_batch(a.id).await.unwrap().unwrap().current_stock, 5);
        assert_eq!(repo.movements(a.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn receipt_past_unit_capacity_leaves_store_usable() {
        let repo = InMemoryBatchRepository::new();
        let ctx = MovementContext::default();
        let full = repo
            .receive(receipt("MAX-1", i64::MAX, 1), MovementType::Receipt, &ctx)
            .await
            .unwrap()
            .batch;

        let result = repo
            .receive(receipt("MAX-1", 1, 1), MovementType::Receipt, &ctx)
            .await;
        assert!(matches!(result, Err(AppError::Validation { ref field, .. }) if field == "quantity"));

        let topped = repo
            .add_to_batch(
                full.id,
                1,
                Decimal::ONE,
                &BatchIdentity::default(),
                MovementType::Receipt,
                &ctx,
            )
            .await;
        assert!(matches!(topped, Err(AppError::Validation { .. })));

        let batch = repo.get_batch(full.id).await.unwrap().unwrap();
        assert_eq!(batch.current_stock, i64::MAX);
        assert_eq!(repo.movements(full.id).await.unwrap().len(), 1);
    }

    #[test]
    fn catalog_rejects_out_of_range_warning_window() {
        let repo = InMemoryBatchRepository::new();
        let profile = |days| ProductProfile {
            product_id: 1,
            name: "Milk 1L".to_string(),
            unit_price: Decimal::from(25),
            warning_window_days: Some(days),
        };
        assert!(repo.upsert_product(profile(30)).is_ok());
        assert!(matches!(
            repo.upsert_product(profile(4000)),
            Err(AppError::Validation { ref field, .. }) if field == "warning_window_days"
        ));
    }
}
