//! Expiry tagging of live batches

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use shared::{ExpiryStatus, ExpiryTag};

use super::warning_window;
use crate::config::StockConfig;
use crate::error::AppResult;
use crate::repository::{BatchFilter, BatchRepository, BranchScope, CatalogReader};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExpiringQuery {
    pub product_id: Option<i64>,
    pub branch_id: Option<i64>,
    /// Report batches expiring within this many days; defaults to each
    /// product's warning window.
    pub within_days: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpiringBatch {
    pub batch_id: i64,
    pub product_id: i64,
    pub branch_id: Option<i64>,
    pub batch_number: String,
    pub current_stock: i64,
    pub expiry_date: Option<NaiveDate>,
    #[serde(flatten)]
    pub tag: ExpiryTag,
    pub display: String,
}

pub struct ExpiryService {
    repo: Arc<dyn BatchRepository>,
    catalog: Arc<dyn CatalogReader>,
    default_warning_days: u32,
}

impl ExpiryService {
    pub fn new(
        repo: Arc<dyn BatchRepository>,
        catalog: Arc<dyn CatalogReader>,
        config: &StockConfig,
    ) -> Self {
        Self {
            repo,
            catalog,
            default_warning_days: config.default_warning_days,
        }
    }

    /// Live batches with stock that are expired or inside their warning
    /// window, most urgent first.
    pub async fn expiring_batches(
        &self,
        query: &ExpiringQuery,
        as_of: NaiveDate,
    ) -> AppResult<Vec<ExpiringBatch>> {
        let filter = BatchFilter {
            product_id: query.product_id,
            branch: query.branch_id.map_or(BranchScope::Any, BranchScope::Branch),
            ..BatchFilter::default()
        };
        let batches = self.repo.list_batches(&filter).await?;

        let mut windows: HashMap<i64, u32> = HashMap::new();
        let mut expiring = Vec::new();
        for batch in batches.into_iter().filter(|b| b.current_stock > 0) {
            let window = match windows.get(&batch.product_id) {
                Some(window) => *window,
                None => {
                    let window = warning_window(
                        self.catalog.as_ref(),
                        batch.product_id,
                        self.default_warning_days,
                    )
                    .await?;
                    windows.insert(batch.product_id, window);
                    window
                }
            };

            let tag = batch.expiry_tag(as_of, window);
            let Some(days) = tag.days_until_expiry else {
                continue;
            };
            let included = match query.within_days {
                Some(within) => days <= i64::from(within),
                None => tag.status != ExpiryStatus::Good,
            };
            if included {
                expiring.push(ExpiringBatch {
                    batch_id: batch.id,
                    product_id: batch.product_id,
                    branch_id: batch.branch_id,
                    batch_number: batch.batch_number,
                    current_stock: batch.current_stock,
                    expiry_date: batch.expiry_date,
                    display: tag.display(),
                    tag,
                });
            }
        }

        expiring.sort_by(|a, b| {
            a.tag
                .days_until_expiry
                .cmp(&b.tag.days_until_expiry)
                .then_with(|| a.batch_id.cmp(&b.batch_id))
        });
        Ok(expiring)
    }
}
