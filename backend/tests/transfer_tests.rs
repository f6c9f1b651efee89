//! Transfer recommendation tests
//!
//! Tests for inter-branch rebalancing:
//! - Urgent surplus stock is proposed for branches below minimum
//! - Transfers that cost more than they save are never proposed
//! - Executing a transfer moves stock atomically with an audit pair

use std::str::FromStr;
use std::sync::Arc;

use chrono::{Days, NaiveDate, Utc};
use pos_stock::config::StockConfig;
use pos_stock::error::AppError;
use pos_stock::repository::{BatchFilter, BatchRepository, InMemoryBatchRepository, ProductProfile};
use pos_stock::services::transfer::{ExecuteTransferInput, TransferRecommender, TransferScope};
use pos_stock::services::CancelToken;
use rust_decimal::Decimal;
use shared::{
    validate_batch_number, BranchThreshold, MovementContext, MovementType, NewBatch,
    TransferPolicy, TransferPriority, Urgency, MAX_BATCH_NUMBER_LEN,
};

// Helper to create Decimal from string
fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

async fn seed(
    repo: &InMemoryBatchRepository,
    number: &str,
    branch_id: i64,
    stock: i64,
    expiry_in: u64,
) -> i64 {
    repo.receive(
        NewBatch {
            product_id: 5,
            branch_id: Some(branch_id),
            batch_number: number.to_string(),
            quantity: stock,
            cost_per_unit: dec("10"),
            production_date: None,
            expiry_date: Some(today() + Days::new(expiry_in)),
            supplier_name: Some("Fresh Farms".to_string()),
            purchase_order_number: None,
            notes: None,
        },
        MovementType::Receipt,
        &MovementContext::default(),
    )
    .await
    .unwrap()
    .batch
    .id
}

/// Branch 1 holds 50 units expiring in 5 days (high urgency), branch 3 holds
/// 50 units expiring in 20 days (medium urgency), branch 2 needs 30.
async fn rebalancing_fixture() -> (Arc<InMemoryBatchRepository>, i64, i64) {
    let repo = Arc::new(InMemoryBatchRepository::new());
    repo.upsert_product(ProductProfile {
        product_id: 5,
        name: "Yogurt 500g".to_string(),
        unit_price: dec("10"),
        warning_window_days: Some(30),
    })
    .unwrap();
    repo.set_thresholds(
        5,
        vec![
            BranchThreshold {
                branch_id: 1,
                minimum_stock: 0,
            },
            BranchThreshold {
                branch_id: 2,
                minimum_stock: 30,
            },
            BranchThreshold {
                branch_id: 3,
                minimum_stock: 0,
            },
        ],
    )
    .unwrap();

    let high = seed(&repo, "H-1", 1, 50, 5).await;
    let medium = seed(&repo, "M-1", 3, 50, 20).await;
    (repo, high, medium)
}

fn recommender(repo: Arc<InMemoryBatchRepository>, policy: TransferPolicy) -> TransferRecommender {
    TransferRecommender::new(repo.clone(), repo, &StockConfig::default(), policy)
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// The high-urgency batch covers the whole deficit ahead of the medium one
    #[tokio::test]
    async fn test_urgent_surplus_covers_deficit() {
        let (repo, high, _) = rebalancing_fixture().await;

        let candidates = recommender(repo, TransferPolicy::default())
            .recommend(&TransferScope::default(), today(), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(candidates.len(), 1);
        let best = &candidates[0];
        assert_eq!(best.batch_id, high);
        assert_eq!(best.source_branch_id, 1);
        assert_eq!(best.target_branch_id, 2);
        assert_eq!(best.quantity, 30);
        assert_eq!(best.urgency, Urgency::High);
        assert_eq!(best.priority, TransferPriority::High);
        // 30 * 10 sale value + 30 * 10 * 0.50 avoided write-off
        assert_eq!(best.estimated_benefit, dec("450"));
        assert_eq!(best.net_benefit, dec("450"));
        assert_eq!(best.days_until_expiry, Some(5));
    }

    /// Transfers whose cost outweighs the benefit are dropped
    #[tokio::test]
    async fn test_unprofitable_transfers_dropped() {
        let (repo, _, _) = rebalancing_fixture().await;
        let policy = TransferPolicy {
            fixed_cost: dec("500"),
            ..TransferPolicy::default()
        };

        let candidates = recommender(repo, policy)
            .recommend(&TransferScope::default(), today(), &CancelToken::new())
            .await
            .unwrap();
        assert!(candidates.is_empty());
    }

    /// Scope narrows the scan by branch and caps the result
    #[tokio::test]
    async fn test_scope_filters_and_limits() {
        let (repo, _, _) = rebalancing_fixture().await;
        let recommender = recommender(repo, TransferPolicy::default());

        let unrelated = TransferScope {
            branch_id: Some(7),
            ..TransferScope::default()
        };
        assert!(recommender
            .recommend(&unrelated, today(), &CancelToken::new())
            .await
            .unwrap()
            .is_empty());

        let target = TransferScope {
            branch_id: Some(2),
            limit: Some(1),
            ..TransferScope::default()
        };
        assert_eq!(
            recommender
                .recommend(&target, today(), &CancelToken::new())
                .await
                .unwrap()
                .len(),
            1
        );
    }

    /// Products without thresholds are never rebalanced
    #[tokio::test]
    async fn test_products_without_thresholds_skipped() {
        let (repo, _, _) = rebalancing_fixture().await;
        repo.set_thresholds(5, vec![]).unwrap();

        let candidates = recommender(repo, TransferPolicy::default())
            .recommend(&TransferScope::default(), today(), &CancelToken::new())
            .await
            .unwrap();
        assert!(candidates.is_empty());
    }

    /// A cancelled scan stops before the next product
    #[tokio::test]
    async fn test_cancelled_scan_stops() {
        let (repo, _, _) = rebalancing_fixture().await;
        let token = CancelToken::new();
        token.cancel();

        let result = recommender(repo, TransferPolicy::default())
            .recommend(&TransferScope::default(), today(), &token)
            .await;
        assert!(matches!(result, Err(AppError::Cancelled(_))));
    }

    /// Executing a transfer moves stock into a derived batch at the target
    #[tokio::test]
    async fn test_execute_transfer_moves_stock() {
        let (repo, high, _) = rebalancing_fixture().await;
        let outcome = recommender(repo.clone(), TransferPolicy::default())
            .execute(
                ExecuteTransferInput {
                    source_batch_id: high,
                    target_branch_id: 2,
                    quantity: 30,
                    reference: Some("TRF-1".to_string()),
                },
                Some("manager".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(outcome.source.current_stock, 20);
        assert!(outcome.destination_created);
        assert_eq!(outcome.destination.branch_id, Some(2));
        assert_eq!(outcome.destination.batch_number, "H-1-T2");
        assert_eq!(outcome.destination.current_stock, 30);
        assert_eq!(outcome.destination.expiry_date, outcome.source.expiry_date);
        assert_eq!(outcome.destination.cost_per_unit, dec("10"));

        let out = repo.movements(high).await.unwrap();
        let out = out.last().unwrap();
        assert_eq!(out.movement_type, MovementType::TransferOut);
        assert_eq!(out.quantity, -30);
        let incoming = repo.movements(outcome.destination.id).await.unwrap();
        assert_eq!(incoming[0].movement_type, MovementType::TransferIn);
        assert_eq!(incoming[0].reference.as_deref(), Some("TRF-1"));

        // The deficit is gone, so nothing is left to recommend.
        let candidates = recommender(repo, TransferPolicy::default())
            .recommend(&TransferScope::default(), today(), &CancelToken::new())
            .await
            .unwrap();
        assert!(candidates.is_empty());
    }

    /// Long source numbers still yield a storable destination number
    #[tokio::test]
    async fn test_long_batch_number_transfer_stays_valid() {
        let repo = Arc::new(InMemoryBatchRepository::new());
        let long = seed(&repo, &"L".repeat(MAX_BATCH_NUMBER_LEN), 1, 10, 40).await;
        let recommender = recommender(repo.clone(), TransferPolicy::default());
        let transfer = |quantity| ExecuteTransferInput {
            source_batch_id: long,
            target_branch_id: 2,
            quantity,
            reference: None,
        };

        let first = recommender.execute(transfer(3), None).await.unwrap();
        let number = &first.destination.batch_number;
        assert!(number.len() <= MAX_BATCH_NUMBER_LEN);
        assert!(validate_batch_number(number).is_ok());
        assert!(first.destination_created);

        // The derived number is stable, so a second transfer merges.
        let second = recommender.execute(transfer(2), None).await.unwrap();
        assert!(!second.destination_created);
        assert_eq!(second.destination.id, first.destination.id);
        assert_eq!(second.destination.current_stock, 5);
    }

    /// A transfer that cannot be covered creates nothing
    #[tokio::test]
    async fn test_failed_transfer_changes_nothing() {
        let (repo, high, _) = rebalancing_fixture().await;
        let recommender = recommender(repo.clone(), TransferPolicy::default());
        let before = repo.list_batches(&BatchFilter::for_product(5)).await.unwrap();

        let overdraw = recommender
            .execute(
                ExecuteTransferInput {
                    source_batch_id: high,
                    target_branch_id: 2,
                    quantity: 51,
                    reference: None,
                },
                None,
            )
            .await;
        assert!(matches!(overdraw, Err(AppError::InsufficientStock { .. })));

        let same_branch = recommender
            .execute(
                ExecuteTransferInput {
                    source_batch_id: high,
                    target_branch_id: 1,
                    quantity: 5,
                    reference: None,
                },
                None,
            )
            .await;
        assert!(matches!(same_branch, Err(AppError::Validation { .. })));

        repo.set_blocked(high, true, Some("Recall".to_string()))
            .await
            .unwrap();
        let blocked = recommender
            .execute(
                ExecuteTransferInput {
                    source_batch_id: high,
                    target_branch_id: 2,
                    quantity: 5,
                    reference: None,
                },
                None,
            )
            .await;
        assert!(matches!(blocked, Err(AppError::BlockedBatch(_))));

        let after = repo.list_batches(&BatchFilter::for_product(5)).await.unwrap();
        assert_eq!(after.len(), before.len());
        assert_eq!(repo.movements(high).await.unwrap().len(), 1);
    }
}
