//! Batch ledger tests
//!
//! Tests for the single write path to batch stock:
//! - Receipts create or merge batches and blend cost
//! - Lifecycle flags gate every mutation
//! - Credits into another branch land in a derived batch
//! - Stock levels track the batches they summarize

use std::str::FromStr;
use std::sync::Arc;

use chrono::{Days, NaiveDate, Utc};
use pos_stock::config::StockConfig;
use pos_stock::error::AppError;
use pos_stock::repository::{BatchFilter, BatchRepository, InMemoryBatchRepository};
use pos_stock::services::ledger::{AddStockInput, BatchLedger, ReceiveStockInput};
use proptest::prelude::*;
use rust_decimal::Decimal;
use shared::{BatchState, MovementContext, MovementType};

// Helper to create Decimal from string
fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn in_days(days: u64) -> NaiveDate {
    Utc::now().date_naive() + Days::new(days)
}

fn setup() -> (Arc<InMemoryBatchRepository>, BatchLedger) {
    let repo = Arc::new(InMemoryBatchRepository::new());
    let ledger = BatchLedger::new(repo.clone(), &StockConfig::default());
    (repo, ledger)
}

fn receipt(number: &str, quantity: i64, cost: &str) -> ReceiveStockInput {
    ReceiveStockInput {
        product_id: 1,
        branch_id: Some(1),
        batch_number: number.to_string(),
        quantity,
        cost_per_unit: dec(cost),
        expiry_date: Some(in_days(60)),
        production_date: None,
        supplier_name: Some("Acme Dairy".to_string()),
        purchase_order_number: Some("PO-1".to_string()),
        notes: None,
    }
}

fn ctx() -> MovementContext {
    MovementContext::with_reference("TEST").by("tester")
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// Receiving into an existing open batch blends its cost
    #[tokio::test]
    async fn test_restock_blends_weighted_cost() {
        let (_, ledger) = setup();
        let first = ledger
            .receive_stock(receipt("B2", 20, "900"), &ctx())
            .await
            .unwrap();
        assert!(first.created);

        ledger
            .deduct_stock(first.batch.id, 5, &ctx())
            .await
            .unwrap();

        let input = AddStockInput {
            batch_id: Some(first.batch.id),
            product_id: None,
            branch_id: None,
            quantity: 10,
            cost_per_unit: dec("1100"),
            batch_number: None,
            expiry_date: None,
            production_date: None,
            supplier_name: None,
            purchase_order_number: None,
            notes: None,
        };
        let result = ledger.add_stock_to_batch(input, &ctx()).await.unwrap();

        assert!(!result.created);
        assert_eq!(result.new_batch_stock, 25);
        assert_eq!(result.weighted_average_cost, dec("980"));
        assert_eq!(result.new_product_total_stock, 25);
    }

    /// A receipt under an open batch number merges instead of duplicating
    #[tokio::test]
    async fn test_receipt_merges_under_open_batch_number() {
        let (repo, ledger) = setup();
        let a = ledger
            .receive_stock(receipt("LOT-7", 10, "5"), &ctx())
            .await
            .unwrap();
        let b = ledger
            .receive_stock(receipt("LOT-7", 4, "5"), &ctx())
            .await
            .unwrap();

        assert_eq!(a.batch.id, b.batch.id);
        assert_eq!(b.batch.current_stock, 14);
        assert_eq!(b.batch.initial_stock, 14);
        let all = repo.list_batches(&BatchFilter::for_product(1)).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    /// A receipt that disagrees on expiry is refused, not merged
    #[tokio::test]
    async fn test_receipt_with_different_expiry_is_refused() {
        let (_, ledger) = setup();
        ledger
            .receive_stock(receipt("LOT-8", 10, "5"), &ctx())
            .await
            .unwrap();

        let mut other = receipt("LOT-8", 3, "5");
        other.expiry_date = Some(in_days(90));
        let result = ledger.receive_stock(other, &ctx()).await;
        assert!(matches!(result, Err(AppError::Validation { field, .. }) if field == "batch_number"));
    }

    /// A top-up by batch id that describes another batch is refused
    #[tokio::test]
    async fn test_top_up_by_id_with_different_identity_is_refused() {
        let (repo, ledger) = setup();
        let batch = ledger
            .receive_stock(receipt("LOT-9", 10, "5"), &ctx())
            .await
            .unwrap()
            .batch;
        let top_up = || AddStockInput {
            batch_id: Some(batch.id),
            product_id: Some(1),
            branch_id: Some(1),
            quantity: 4,
            cost_per_unit: dec("5"),
            batch_number: Some("LOT-9".to_string()),
            expiry_date: Some(in_days(60)),
            production_date: None,
            supplier_name: Some("Acme Dairy".to_string()),
            purchase_order_number: Some("PO-2".to_string()),
            notes: None,
        };

        let mut other_expiry = top_up();
        other_expiry.expiry_date = Some(in_days(90));
        let result = ledger.add_stock_to_batch(other_expiry, &MovementContext::default()).await;
        assert!(matches!(result, Err(AppError::Validation { field, .. }) if field == "expiry_date"));

        let mut other_number = top_up();
        other_number.batch_number = Some("LOT-10".to_string());
        let result = ledger.add_stock_to_batch(other_number, &MovementContext::default()).await;
        assert!(matches!(result, Err(AppError::Validation { field, .. }) if field == "batch_number"));

        let mut other_product = top_up();
        other_product.product_id = Some(2);
        let result = ledger.add_stock_to_batch(other_product, &MovementContext::default()).await;
        assert!(matches!(result, Err(AppError::Validation { field, .. }) if field == "product_id"));

        let stored = repo.get_batch(batch.id).await.unwrap().unwrap();
        assert_eq!(stored.current_stock, 10);
        assert_eq!(stored.expiry_date, Some(in_days(60)));

        // A matching top-up lands, and its purchase order tags the movement.
        let result = ledger
            .add_stock_to_batch(top_up(), &MovementContext::default())
            .await
            .unwrap();
        assert_eq!(result.new_batch_stock, 14);
        let movements = repo.movements(batch.id).await.unwrap();
        assert_eq!(movements.last().unwrap().reference.as_deref(), Some("PO-2"));
    }

    /// A receipt that would push a batch past the unit range is refused
    #[tokio::test]
    async fn test_receipt_past_unit_range_is_refused() {
        let (repo, ledger) = setup();
        let batch = ledger
            .receive_stock(receipt("BULK-1", i64::MAX, "1"), &ctx())
            .await
            .unwrap()
            .batch;

        let result = ledger.receive_stock(receipt("BULK-1", 1, "1"), &ctx()).await;
        assert!(matches!(result, Err(AppError::Validation { field, .. }) if field == "quantity"));

        let stored = repo.get_batch(batch.id).await.unwrap().unwrap();
        assert_eq!(stored.current_stock, i64::MAX);
        assert_eq!(ledger.deduct_stock(batch.id, 1, &ctx()).await.unwrap(), i64::MAX - 1);
    }

    /// Invalid receipts never reach storage
    #[tokio::test]
    async fn test_invalid_receipts_rejected() {
        let (repo, ledger) = setup();

        let mut negative_cost = receipt("LOT-1", 5, "1");
        negative_cost.cost_per_unit = dec("-1");
        assert!(ledger.receive_stock(negative_cost, &ctx()).await.is_err());

        let mut bad_dates = receipt("LOT-2", 5, "1");
        bad_dates.production_date = Some(in_days(90));
        assert!(ledger.receive_stock(bad_dates, &ctx()).await.is_err());

        assert!(ledger
            .receive_stock(receipt("bad number!", 5, "1"), &ctx())
            .await
            .is_err());

        assert!(repo.product_ids().await.unwrap().is_empty());
    }

    /// Blocked batches refuse deductions and keep their stock
    #[tokio::test]
    async fn test_blocked_batch_refuses_deduction() {
        let (_, ledger) = setup();
        let batch = ledger
            .receive_stock(receipt("Q-1", 10, "2"), &ctx())
            .await
            .unwrap()
            .batch;

        let blocked = ledger
            .set_blocked(batch.id, true, Some("Quality hold".to_string()))
            .await
            .unwrap();
        assert!(blocked.is_blocked);
        assert_eq!(
            ledger.get_batch_view(batch.id).await.unwrap().state,
            BatchState::Blocked
        );

        let result = ledger.deduct_stock(batch.id, 1, &ctx()).await;
        assert!(matches!(result, Err(AppError::BlockedBatch(id)) if id == batch.id));
        assert_eq!(ledger.get_batch(batch.id).await.unwrap().current_stock, 10);

        let released = ledger.set_blocked(batch.id, false, None).await.unwrap();
        assert!(released.block_reason.is_none());
        assert_eq!(ledger.deduct_stock(batch.id, 4, &ctx()).await.unwrap(), 6);
    }

    /// Deductions beyond batch stock fail with the shortfall
    #[tokio::test]
    async fn test_overdraw_reports_shortfall() {
        let (_, ledger) = setup();
        let batch = ledger
            .receive_stock(receipt("S-1", 3, "2"), &ctx())
            .await
            .unwrap()
            .batch;

        let err = ledger.deduct_stock(batch.id, 5, &ctx()).await.unwrap_err();
        assert_eq!(err.shortfall(), Some(2));
        assert_eq!(ledger.get_batch(batch.id).await.unwrap().current_stock, 3);
    }

    /// Unknown batches are reported as not found
    #[tokio::test]
    async fn test_unknown_batch_not_found() {
        let (_, ledger) = setup();
        assert!(matches!(
            ledger.deduct_stock(99, 1, &ctx()).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            ledger.movements(99).await,
            Err(AppError::NotFound(_))
        ));
    }

    /// Crediting into another branch creates a derived batch there
    #[tokio::test]
    async fn test_credit_into_other_branch_creates_derived_batch() {
        let (_, ledger) = setup();
        let source = ledger
            .receive_stock(receipt("MILK-1", 10, "12.50"), &ctx())
            .await
            .unwrap()
            .batch;

        let credited = ledger
            .credit_stock(source.id, 4, Some(2), &ctx())
            .await
            .unwrap();
        assert_ne!(credited.id, source.id);
        assert_eq!(credited.branch_id, Some(2));
        assert_eq!(credited.batch_number, "MILK-1-T2");
        assert_eq!(credited.current_stock, 4);
        assert_eq!(credited.cost_per_unit, dec("12.50"));
        assert_eq!(credited.expiry_date, source.expiry_date);

        let again = ledger
            .credit_stock(source.id, 1, Some(2), &ctx())
            .await
            .unwrap();
        assert_eq!(again.id, credited.id);
        assert_eq!(again.current_stock, 5);

        let same_branch = ledger
            .credit_stock(source.id, 2, Some(1), &ctx())
            .await
            .unwrap();
        assert_eq!(same_branch.id, source.id);
        assert_eq!(same_branch.current_stock, 12);
    }

    /// Every mutation leaves one audit movement with a signed quantity
    #[tokio::test]
    async fn test_movements_record_signed_quantities() {
        let (_, ledger) = setup();
        let batch = ledger
            .receive_stock(receipt("AUD-1", 8, "1"), &ctx())
            .await
            .unwrap()
            .batch;
        ledger.deduct_stock(batch.id, 3, &ctx()).await.unwrap();

        let movements = ledger.movements(batch.id).await.unwrap();
        assert_eq!(movements.len(), 2);
        assert_eq!(movements[0].movement_type, MovementType::Receipt);
        assert_eq!(movements[0].quantity, 8);
        assert_eq!(movements[1].movement_type, MovementType::Deduction);
        assert_eq!(movements[1].quantity, -3);
        assert_eq!(movements[1].actor.as_deref(), Some("tester"));
    }

    /// Stock levels sum active batches per branch
    #[tokio::test]
    async fn test_stock_levels_per_branch() {
        let (_, ledger) = setup();
        ledger
            .receive_stock(receipt("L-1", 10, "1"), &ctx())
            .await
            .unwrap();
        let mut other = receipt("L-2", 7, "1");
        other.branch_id = Some(2);
        ledger.receive_stock(other, &ctx()).await.unwrap();
        let mut global = receipt("L-3", 5, "1");
        global.branch_id = None;
        ledger.receive_stock(global, &ctx()).await.unwrap();

        let levels = ledger.stock_levels(1).await.unwrap();
        assert_eq!(levels.len(), 3);
        let branch_two = levels.iter().find(|l| l.branch_id == Some(2)).unwrap();
        assert_eq!(branch_two.on_hand, 7);
        assert_eq!(branch_two.available, 7);
        assert_eq!(ledger.product_total_stock(1).await.unwrap(), 22);
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Stock never goes negative and equals receipts minus accepted deductions
        #[test]
        fn prop_stock_matches_accepted_movements(
            initial in 1i64..200,
            deductions in prop::collection::vec(1i64..60, 0..12),
        ) {
            let (_, ledger) = setup();
            let outcome = tokio_test::block_on(
                ledger.receive_stock(receipt("P-1", initial, "3"), &ctx())
            ).unwrap();
            let batch_id = outcome.batch.id;

            let mut expected = initial;
            for quantity in deductions {
                let result = tokio_test::block_on(ledger.deduct_stock(batch_id, quantity, &ctx()));
                if quantity <= expected {
                    prop_assert_eq!(result.unwrap(), expected - quantity);
                    expected -= quantity;
                } else {
                    prop_assert!(
                        matches!(result, Err(AppError::InsufficientStock { .. })),
                        "overdraw was not refused"
                    );
                }
            }

            let batch = tokio_test::block_on(ledger.get_batch(batch_id)).unwrap();
            prop_assert_eq!(batch.current_stock, expected);
            prop_assert!(batch.current_stock >= 0);
            prop_assert!(batch.current_stock <= batch.initial_stock);

            let movements = tokio_test::block_on(ledger.movements(batch_id)).unwrap();
            let net: i64 = movements.iter().map(|m| m.quantity).sum();
            prop_assert_eq!(net, expected);
        }

        /// Blended cost always lies between the two input costs
        #[test]
        fn prop_blended_cost_between_inputs(
            first_qty in 1i64..500,
            second_qty in 1i64..500,
            first_cost in 0u32..10_000,
            second_cost in 0u32..10_000,
        ) {
            let (_, ledger) = setup();
            let first_cost = Decimal::from(first_cost);
            let second_cost = Decimal::from(second_cost);

            let mut a = receipt("W-1", first_qty, "0");
            a.cost_per_unit = first_cost;
            tokio_test::block_on(ledger.receive_stock(a, &ctx())).unwrap();

            let mut b = receipt("W-1", second_qty, "0");
            b.cost_per_unit = second_cost;
            let merged = tokio_test::block_on(ledger.receive_stock(b, &ctx())).unwrap();

            let low = first_cost.min(second_cost);
            let high = first_cost.max(second_cost);
            prop_assert!(merged.batch.cost_per_unit >= low);
            prop_assert!(merged.batch.cost_per_unit <= high);
            prop_assert_eq!(merged.batch.current_stock, first_qty + second_qty);
        }
    }
}
