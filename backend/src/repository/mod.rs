//! Batch storage
//!
//! The ledger talks to storage only through [`BatchRepository`]. Each write
//! method is one atomic unit: it locks the rows it touches, applies the shared
//! ledger rules to the locked state, appends the audit movements and refreshes
//! the stock-level read model, or changes nothing at all.

mod memory;
mod postgres;

pub use memory::InMemoryBatchRepository;
pub use postgres::PgBatchRepository;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::{
    Batch, BatchIdentity, BranchThreshold, Deduction, DisposalMethod, MovementContext,
    MovementType, NewBatch, StockLevel, StockMovement,
};

use crate::error::AppResult;

/// Which branch a batch listing covers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BranchScope {
    /// Every branch and the global pool.
    #[default]
    Any,
    /// Batches not bound to a branch.
    Global,
    Branch(i64),
}

impl BranchScope {
    /// `Some(branch)` targets that branch, `None` the global pool.
    pub fn exact(branch_id: Option<i64>) -> Self {
        match branch_id {
            Some(id) => BranchScope::Branch(id),
            None => BranchScope::Global,
        }
    }

    pub fn matches(&self, branch_id: Option<i64>) -> bool {
        match self {
            BranchScope::Any => true,
            BranchScope::Global => branch_id.is_none(),
            BranchScope::Branch(id) => branch_id == Some(*id),
        }
    }
}

/// Batch listing filter
#[derive(Debug, Clone, Default)]
pub struct BatchFilter {
    pub product_id: Option<i64>,
    pub branch: BranchScope,
    pub include_disposed: bool,
    /// Only batches whose expiry date is on or before this day.
    pub expiring_by: Option<NaiveDate>,
}

impl BatchFilter {
    pub fn for_product(product_id: i64) -> Self {
        Self {
            product_id: Some(product_id),
            ..Self::default()
        }
    }

    pub fn in_branch(mut self, branch: BranchScope) -> Self {
        self.branch = branch;
        self
    }

    pub fn matches(&self, batch: &Batch) -> bool {
        self.product_id.map_or(true, |id| batch.product_id == id)
            && self.branch.matches(batch.branch_id)
            && (self.include_disposed || !batch.is_disposed())
            && self
                .expiring_by
                .map_or(true, |by| batch.expiry_date.is_some_and(|e| e <= by))
    }
}

/// Result of a receipt: the batch it landed in and whether it was new
#[derive(Debug, Clone, Serialize)]
pub struct ReceiveOutcome {
    pub batch: Batch,
    pub created: bool,
}

/// Both sides of a committed transfer
#[derive(Debug, Clone, Serialize)]
pub struct TransferOutcome {
    pub source: Batch,
    pub destination: Batch,
    pub destination_created: bool,
}

/// A disposal as requested by an operator or the sweep job
#[derive(Debug, Clone)]
pub struct DisposalRequest {
    pub as_of: NaiveDate,
    pub method: DisposalMethod,
    pub reason: Option<String>,
    pub force: bool,
}

/// Product data owned by the catalog service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductProfile {
    pub product_id: i64,
    pub name: String,
    pub unit_price: Decimal,
    /// Category warning window; `None` falls back to the configured default.
    pub warning_window_days: Option<u32>,
}

#[async_trait]
pub trait BatchRepository: Send + Sync {
    /// Cheap connectivity probe for health checks.
    async fn ping(&self) -> AppResult<()>;

    async fn get_batch(&self, batch_id: i64) -> AppResult<Option<Batch>>;

    /// Unlocked snapshot, ordered by batch id.
    async fn list_batches(&self, filter: &BatchFilter) -> AppResult<Vec<Batch>>;

    /// Products that hold at least one undisposed batch.
    async fn product_ids(&self) -> AppResult<Vec<i64>>;

    /// Record incoming stock. Merges into the open batch with the same
    /// product and batch number, otherwise creates a new batch.
    async fn receive(
        &self,
        receipt: NewBatch,
        movement_type: MovementType,
        ctx: &MovementContext,
    ) -> AppResult<ReceiveOutcome>;

    /// Add stock to an existing batch at a given unit cost, once the locked
    /// batch matches `expected`.
    async fn add_to_batch(
        &self,
        batch_id: i64,
        quantity: i64,
        cost_per_unit: Decimal,
        expected: &BatchIdentity,
        movement_type: MovementType,
        ctx: &MovementContext,
    ) -> AppResult<Batch>;

    /// Apply every deduction or none of them.
    async fn deduct(
        &self,
        deductions: &[Deduction],
        movement_type: MovementType,
        ctx: &MovementContext,
    ) -> AppResult<Vec<Batch>>;

    /// Move stock out of one batch into a batch at `target_branch_id`.
    async fn transfer(
        &self,
        deduction: Deduction,
        target_branch_id: i64,
        ctx: &MovementContext,
    ) -> AppResult<TransferOutcome>;

    async fn dispose(
        &self,
        batch_id: i64,
        request: &DisposalRequest,
        ctx: &MovementContext,
    ) -> AppResult<Batch>;

    async fn set_blocked(
        &self,
        batch_id: i64,
        blocked: bool,
        reason: Option<String>,
    ) -> AppResult<Batch>;

    /// Movements of one batch, oldest first.
    async fn movements(&self, batch_id: i64) -> AppResult<Vec<StockMovement>>;

    /// Stock levels of one product per branch (global pool included).
    async fn stock_levels(&self, product_id: i64) -> AppResult<Vec<StockLevel>>;
}

/// Read access to catalog data this service does not own
#[async_trait]
pub trait CatalogReader: Send + Sync {
    async fn product(&self, product_id: i64) -> AppResult<Option<ProductProfile>>;

    async fn thresholds(&self, product_id: i64) -> AppResult<Vec<BranchThreshold>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn batch(branch_id: Option<i64>, expiry: Option<NaiveDate>) -> Batch {
        NewBatch {
            product_id: 1,
            branch_id,
            batch_number: "F-1".to_string(),
            quantity: 5,
            cost_per_unit: Decimal::ONE,
            production_date: None,
            expiry_date: expiry,
            supplier_name: None,
            purchase_order_number: None,
            notes: None,
        }
        .into_batch(1, Utc::now())
    }

    #[test]
    fn branch_scope_distinguishes_global_from_any() {
        assert!(BranchScope::Any.matches(None));
        assert!(BranchScope::Any.matches(Some(3)));
        assert!(BranchScope::Global.matches(None));
        assert!(!BranchScope::Global.matches(Some(3)));
        assert!(BranchScope::exact(Some(3)).matches(Some(3)));
        assert!(!BranchScope::exact(Some(3)).matches(Some(4)));
    }

    #[test]
    fn expiring_filter_skips_untracked_batches() {
        let by = NaiveDate::from_ymd_opt(2025, 5, 1);
        let filter = BatchFilter {
            expiring_by: by,
            ..BatchFilter::default()
        };
        assert!(filter.matches(&batch(None, NaiveDate::from_ymd_opt(2025, 4, 20))));
        assert!(!filter.matches(&batch(None, NaiveDate::from_ymd_opt(2025, 5, 2))));
        assert!(!filter.matches(&batch(None, None)));
    }
}
