//! Inter-branch transfer recommendations and execution

use std::sync::Arc;

use chrono::NaiveDate;
use serde::Deserialize;
use shared::{
    rank_transfers, recommend_transfers, validate_quantity, Deduction, MovementContext,
    ProductTransferInput, TransferCandidate, TransferPolicy,
};
use validator::Validate;

use super::{bounded, ledger::warn_on_lifecycle, CancelToken};
use crate::config::StockConfig;
use crate::error::{AppError, AppResult};
use crate::repository::{BatchFilter, BatchRepository, CatalogReader, TransferOutcome};

const SCAN_NAME: &str = "transfer scan";

/// Which products and branches a recommendation run covers
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransferScope {
    pub product_id: Option<i64>,
    /// Keep only candidates moving stock out of or into this branch.
    pub branch_id: Option<i64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ExecuteTransferInput {
    pub source_batch_id: i64,
    pub target_branch_id: i64,
    #[validate(range(min = 1))]
    pub quantity: i64,
    /// Id of the approved recommendation or transfer order.
    pub reference: Option<String>,
}

pub struct TransferRecommender {
    repo: Arc<dyn BatchRepository>,
    catalog: Arc<dyn CatalogReader>,
    config: StockConfig,
    policy: TransferPolicy,
}

impl TransferRecommender {
    pub fn new(
        repo: Arc<dyn BatchRepository>,
        catalog: Arc<dyn CatalogReader>,
        config: &StockConfig,
        policy: TransferPolicy,
    ) -> Self {
        Self {
            repo,
            catalog,
            config: config.clone(),
            policy,
        }
    }

    /// Read-only scan for profitable transfers, product by product.
    pub async fn recommend(
        &self,
        scope: &TransferScope,
        as_of: NaiveDate,
        cancel: &CancelToken,
    ) -> AppResult<Vec<TransferCandidate>> {
        let products = match scope.product_id {
            Some(product_id) => vec![product_id],
            None => self.repo.product_ids().await?,
        };

        let mut candidates = Vec::new();
        for product_id in products {
            cancel.check(SCAN_NAME)?;

            let Some(profile) = self.catalog.product(product_id).await? else {
                tracing::debug!("Skipping product {} without catalog profile", product_id);
                continue;
            };
            let thresholds = self.catalog.thresholds(product_id).await?;
            if thresholds.is_empty() {
                continue;
            }
            let batches = self
                .repo
                .list_batches(&BatchFilter::for_product(product_id))
                .await?;

            let input = ProductTransferInput {
                product_id,
                unit_price: profile.unit_price,
                warning_window_days: profile
                    .warning_window_days
                    .unwrap_or(self.config.default_warning_days),
                batches: &batches,
                thresholds: &thresholds,
            };
            candidates.extend(
                recommend_transfers(&input, &self.policy, as_of)
                    .into_iter()
                    .filter(|c| {
                        scope.branch_id.map_or(true, |branch| {
                            c.source_branch_id == branch || c.target_branch_id == branch
                        })
                    }),
            );
        }

        candidates.sort_by(rank_transfers);
        if let Some(limit) = scope.limit {
            candidates.truncate(limit);
        }
        tracing::debug!("{} produced {} candidates", SCAN_NAME, candidates.len());
        Ok(candidates)
    }

    /// Carry out an approved transfer: deduct at the source and credit the
    /// destination branch in one transaction.
    pub async fn execute(
        &self,
        input: ExecuteTransferInput,
        actor: Option<String>,
    ) -> AppResult<TransferOutcome> {
        input.validate()?;
        validate_quantity(input.quantity).map_err(|m| AppError::validation("quantity", m))?;

        let ctx = MovementContext {
            reference: input.reference.clone(),
            actor,
            note: Some(format!("Transfer to branch {}", input.target_branch_id)),
        };
        let deduction = Deduction {
            batch_id: input.source_batch_id,
            quantity: input.quantity,
            expected_version: None,
        };

        let outcome = bounded(
            self.config.transaction_timeout(),
            "execute_transfer",
            self.repo.transfer(deduction, input.target_branch_id, &ctx),
        )
        .await
        .map_err(warn_on_lifecycle)?;

        tracing::info!(
            "Transferred {} units from batch {} to batch {} at branch {}",
            input.quantity,
            outcome.source.id,
            outcome.destination.id,
            input.target_branch_id
        );
        Ok(outcome)
    }
}
