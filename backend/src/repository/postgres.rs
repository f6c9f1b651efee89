//! PostgreSQL batch store
//!
//! Every write runs in one transaction with `SET LOCAL` statement and lock
//! timeouts. Rows are locked with `SELECT ... FOR UPDATE` (in id order when
//! several are touched) before the shared ledger rules are applied to them.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use shared::{
    apply_block, apply_deduction, apply_deductions, apply_disposal, apply_receipt,
    check_identity, check_receipt_matches, evaluate_disposal, transfer_destination,
    validate_warning_window, Batch, BatchIdentity, BranchThreshold, Deduction, DisposalMethod,
    DisposalRecord, LedgerViolation, MovementContext, MovementType, NewBatch, StockLevel,
    StockMovement,
};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use super::{
    BatchFilter, BatchRepository, BranchScope, CatalogReader, DisposalRequest, ProductProfile,
    ReceiveOutcome, TransferOutcome,
};
use crate::error::{AppError, AppResult};

const BATCH_COLUMNS: &str = r#"
    id, product_id, branch_id, batch_number, initial_stock, current_stock, cost_per_unit,
    production_date, expiry_date, is_blocked, block_reason,
    disposal_date, disposal_method, disposal_reason, disposal_quantity, disposal_value, disposal_forced,
    supplier_name, purchase_order_number, notes, version, created_at, updated_at
"#;

/// Database row for a batch
#[derive(Debug, sqlx::FromRow)]
struct BatchRow {
    id: i64,
    product_id: i64,
    branch_id: Option<i64>,
    batch_number: String,
    initial_stock: i64,
    current_stock: i64,
    cost_per_unit: Decimal,
    production_date: Option<NaiveDate>,
    expiry_date: Option<NaiveDate>,
    is_blocked: bool,
    block_reason: Option<String>,
    disposal_date: Option<NaiveDate>,
    disposal_method: Option<String>,
    disposal_reason: Option<String>,
    disposal_quantity: Option<i64>,
    disposal_value: Option<Decimal>,
    disposal_forced: Option<bool>,
    supplier_name: Option<String>,
    purchase_order_number: Option<String>,
    notes: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<BatchRow> for Batch {
    fn from(row: BatchRow) -> Self {
        let disposal = row.disposal_date.map(|disposal_date| DisposalRecord {
            disposal_date,
            method: row
                .disposal_method
                .as_deref()
                .and_then(DisposalMethod::parse)
                .unwrap_or(DisposalMethod::Other),
            reason: row.disposal_reason,
            quantity: row.disposal_quantity.unwrap_or(0),
            value_lost: row.disposal_value.unwrap_or(Decimal::ZERO),
            forced: row.disposal_forced.unwrap_or(false),
        });

        Batch {
            id: row.id,
            product_id: row.product_id,
            branch_id: row.branch_id,
            batch_number: row.batch_number,
            initial_stock: row.initial_stock,
            current_stock: row.current_stock,
            cost_per_unit: row.cost_per_unit,
            production_date: row.production_date,
            expiry_date: row.expiry_date,
            is_blocked: row.is_blocked,
            block_reason: row.block_reason,
            disposal,
            supplier_name: row.supplier_name,
            purchase_order_number: row.purchase_order_number,
            notes: row.notes,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Database row for a stock movement
#[derive(Debug, sqlx::FromRow)]
struct MovementRow {
    id: i64,
    batch_id: i64,
    product_id: i64,
    branch_id: Option<i64>,
    movement_type: String,
    quantity: i64,
    cost_per_unit: Decimal,
    reference: Option<String>,
    actor: Option<String>,
    note: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MovementRow> for StockMovement {
    type Error = AppError;

    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        let movement_type = MovementType::parse(&row.movement_type).ok_or_else(|| {
            AppError::Internal(format!("Unknown movement type: {}", row.movement_type))
        })?;
        Ok(StockMovement {
            id: row.id,
            batch_id: row.batch_id,
            product_id: row.product_id,
            branch_id: row.branch_id,
            movement_type,
            quantity: row.quantity,
            cost_per_unit: row.cost_per_unit,
            reference: row.reference,
            actor: row.actor,
            note: row.note,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StockLevelRow {
    product_id: i64,
    branch_id: Option<i64>,
    on_hand: i64,
    reserved: i64,
    available: i64,
    updated_at: DateTime<Utc>,
}

impl From<StockLevelRow> for StockLevel {
    fn from(row: StockLevelRow) -> Self {
        StockLevel {
            product_id: row.product_id,
            branch_id: row.branch_id,
            on_hand: row.on_hand,
            reserved: row.reserved,
            available: row.available,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    product_id: i64,
    name: String,
    unit_price: Decimal,
    warning_window_days: Option<i32>,
}

impl From<ProductRow> for ProductProfile {
    fn from(row: ProductRow) -> Self {
        let warning_window_days = row.warning_window_days.and_then(|days| {
            match validate_warning_window(i64::from(days)) {
                Ok(()) => u32::try_from(days).ok(),
                Err(reason) => {
                    tracing::warn!(
                        "Ignoring warning window {} of product {}: {}",
                        days,
                        row.product_id,
                        reason
                    );
                    None
                }
            }
        });
        ProductProfile {
            product_id: row.product_id,
            name: row.name,
            unit_price: row.unit_price,
            warning_window_days,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ThresholdRow {
    branch_id: i64,
    minimum_stock: i64,
}

/// Translate PostgreSQL failures into ledger error kinds.
fn db_error(e: sqlx::Error) -> AppError {
    let code = e
        .as_database_error()
        .and_then(|d| d.code())
        .map(|c| c.into_owned());
    match code.as_deref() {
        // unique_violation: another writer created the same open batch number
        Some("23505") => AppError::ConcurrencyConflict("Batch was created concurrently".to_string()),
        // serialization_failure, deadlock_detected
        Some("40001") | Some("40P01") => {
            AppError::ConcurrencyConflict("Transaction conflicted with a concurrent writer".to_string())
        }
        // lock_not_available, query_canceled
        Some("55P03") | Some("57014") => {
            AppError::Timeout("Ledger transaction exceeded its time limit".to_string())
        }
        _ => AppError::DatabaseError(e),
    }
}

/// Batch repository backed by PostgreSQL
pub struct PgBatchRepository {
    db: PgPool,
    transaction_timeout: Duration,
}

impl PgBatchRepository {
    pub fn new(db: PgPool, transaction_timeout: Duration) -> Self {
        Self {
            db,
            transaction_timeout,
        }
    }

    async fn begin(&self) -> AppResult<Transaction<'static, Postgres>> {
        let mut tx = self.db.begin().await.map_err(db_error)?;
        let millis = self.transaction_timeout.as_millis();
        sqlx::query(&format!("SET LOCAL statement_timeout = {}", millis))
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        sqlx::query(&format!("SET LOCAL lock_timeout = {}", millis))
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        Ok(tx)
    }
}

async fn lock_batch(conn: &mut PgConnection, batch_id: i64) -> AppResult<Batch> {
    let row = sqlx::query_as::<_, BatchRow>(&format!(
        "SELECT {} FROM batches WHERE id = $1 FOR UPDATE",
        BATCH_COLUMNS
    ))
    .bind(batch_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_error)?
    .ok_or_else(|| AppError::NotFound(format!("Batch {}", batch_id)))?;

    Ok(row.into())
}

async fn lock_open_batch(
    conn: &mut PgConnection,
    product_id: i64,
    batch_number: &str,
) -> AppResult<Option<Batch>> {
    let row = sqlx::query_as::<_, BatchRow>(&format!(
        r#"
        SELECT {} FROM batches
        WHERE product_id = $1 AND batch_number = $2 AND disposal_date IS NULL
        FOR UPDATE
        "#,
        BATCH_COLUMNS
    ))
    .bind(product_id)
    .bind(batch_number)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_error)?;

    Ok(row.map(Into::into))
}

/// Write back the mutable columns of a locked batch.
async fn save_batch(conn: &mut PgConnection, batch: &Batch) -> AppResult<Batch> {
    let disposal = batch.disposal.as_ref();
    let row = sqlx::query_as::<_, BatchRow>(&format!(
        r#"
        UPDATE batches
        SET initial_stock = $1, current_stock = $2, cost_per_unit = $3,
            is_blocked = $4, block_reason = $5,
            disposal_date = $6, disposal_method = $7, disposal_reason = $8,
            disposal_quantity = $9, disposal_value = $10, disposal_forced = $11,
            version = $12, updated_at = NOW()
        WHERE id = $13
        RETURNING {}
        "#,
        BATCH_COLUMNS
    ))
    .bind(batch.initial_stock)
    .bind(batch.current_stock)
    .bind(batch.cost_per_unit)
    .bind(batch.is_blocked)
    .bind(&batch.block_reason)
    .bind(disposal.map(|d| d.disposal_date))
    .bind(disposal.map(|d| d.method.as_str()))
    .bind(disposal.and_then(|d| d.reason.clone()))
    .bind(disposal.map(|d| d.quantity))
    .bind(disposal.map(|d| d.value_lost))
    .bind(disposal.map(|d| d.forced))
    .bind(batch.version)
    .bind(batch.id)
    .fetch_one(&mut *conn)
    .await
    .map_err(db_error)?;

    Ok(row.into())
}

async fn insert_batch(conn: &mut PgConnection, receipt: &NewBatch) -> AppResult<Batch> {
    let row = sqlx::query_as::<_, BatchRow>(&format!(
        r#"
        INSERT INTO batches (product_id, branch_id, batch_number, initial_stock, current_stock,
                             cost_per_unit, production_date, expiry_date, supplier_name,
                             purchase_order_number, notes)
        VALUES ($1, $2, $3, $4, $4, $5, $6, $7, $8, $9, $10)
        RETURNING {}
        "#,
        BATCH_COLUMNS
    ))
    .bind(receipt.product_id)
    .bind(receipt.branch_id)
    .bind(&receipt.batch_number)
    .bind(receipt.quantity)
    .bind(shared::round_currency(receipt.cost_per_unit))
    .bind(receipt.production_date)
    .bind(receipt.expiry_date)
    .bind(&receipt.supplier_name)
    .bind(&receipt.purchase_order_number)
    .bind(&receipt.notes)
    .fetch_one(&mut *conn)
    .await
    .map_err(db_error)?;

    Ok(row.into())
}

async fn insert_movement(
    conn: &mut PgConnection,
    batch: &Batch,
    movement_type: MovementType,
    quantity: i64,
    cost_per_unit: Decimal,
    ctx: &MovementContext,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO stock_movements (batch_id, product_id, branch_id, movement_type, quantity,
                                     cost_per_unit, reference, actor, note)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(batch.id)
    .bind(batch.product_id)
    .bind(batch.branch_id)
    .bind(movement_type.as_str())
    .bind(quantity)
    .bind(cost_per_unit)
    .bind(&ctx.reference)
    .bind(&ctx.actor)
    .bind(&ctx.note)
    .execute(&mut *conn)
    .await
    .map_err(db_error)?;

    Ok(())
}

/// Recompute the stock-level row of one product at one branch.
async fn refresh_level(
    conn: &mut PgConnection,
    product_id: i64,
    branch_id: Option<i64>,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO stock_levels (product_id, branch_id, on_hand, reserved, available, updated_at)
        SELECT $1, $2, COALESCE(SUM(current_stock), 0)::BIGINT, 0,
               COALESCE(SUM(current_stock), 0)::BIGINT, NOW()
        FROM batches
        WHERE product_id = $1 AND branch_id IS NOT DISTINCT FROM $2
          AND disposal_date IS NULL AND NOT is_blocked
        ON CONFLICT (product_id, branch_id) DO UPDATE
        SET on_hand = EXCLUDED.on_hand, available = EXCLUDED.available,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(product_id)
    .bind(branch_id)
    .execute(&mut *conn)
    .await
    .map_err(db_error)?;

    Ok(())
}

async fn receive_in(
    conn: &mut PgConnection,
    receipt: NewBatch,
    movement_type: MovementType,
    ctx: &MovementContext,
) -> AppResult<ReceiveOutcome> {
    if receipt.quantity <= 0 {
        return Err(LedgerViolation::InvalidQuantity(receipt.quantity).into());
    }

    let outcome = match lock_open_batch(conn, receipt.product_id, &receipt.batch_number).await? {
        Some(mut batch) => {
            check_receipt_matches(&batch, &receipt)?;
            apply_receipt(&mut batch, receipt.quantity, receipt.cost_per_unit)?;
            let batch = save_batch(conn, &batch).await?;
            insert_movement(
                conn,
                &batch,
                movement_type,
                receipt.quantity,
                receipt.cost_per_unit,
                ctx,
            )
            .await?;
            ReceiveOutcome {
                batch,
                created: false,
            }
        }
        None => {
            let batch = insert_batch(conn, &receipt).await?;
            insert_movement(
                conn,
                &batch,
                movement_type,
                receipt.quantity,
                batch.cost_per_unit,
                ctx,
            )
            .await?;
            ReceiveOutcome {
                batch,
                created: true,
            }
        }
    };

    refresh_level(conn, outcome.batch.product_id, outcome.batch.branch_id).await?;
    Ok(outcome)
}

#[async_trait]
impl BatchRepository for PgBatchRepository {
    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.db)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn get_batch(&self, batch_id: i64) -> AppResult<Option<Batch>> {
        let row = sqlx::query_as::<_, BatchRow>(&format!(
            "SELECT {} FROM batches WHERE id = $1",
            BATCH_COLUMNS
        ))
        .bind(batch_id)
        .fetch_optional(&self.db)
        .await
        .map_err(db_error)?;

        Ok(row.map(Into::into))
    }

    async fn list_batches(&self, filter: &BatchFilter) -> AppResult<Vec<Batch>> {
        let (scope, branch_id) = match filter.branch {
            BranchScope::Any => ("any", None),
            BranchScope::Global => ("global", None),
            BranchScope::Branch(id) => ("branch", Some(id)),
        };

        let rows = sqlx::query_as::<_, BatchRow>(&format!(
            r#"
            SELECT {} FROM batches
            WHERE ($1::BIGINT IS NULL OR product_id = $1)
              AND ($2::BOOLEAN OR disposal_date IS NULL)
              AND ($3::DATE IS NULL OR expiry_date <= $3)
              AND CASE $4::TEXT
                    WHEN 'any' THEN TRUE
                    WHEN 'global' THEN branch_id IS NULL
                    ELSE branch_id = $5
                  END
            ORDER BY id
            "#,
            BATCH_COLUMNS
        ))
        .bind(filter.product_id)
        .bind(filter.include_disposed)
        .bind(filter.expiring_by)
        .bind(scope)
        .bind(branch_id)
        .fetch_all(&self.db)
        .await
        .map_err(db_error)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn product_ids(&self) -> AppResult<Vec<i64>> {
        sqlx::query_scalar::<_, i64>(
            "SELECT DISTINCT product_id FROM batches WHERE disposal_date IS NULL ORDER BY product_id",
        )
        .fetch_all(&self.db)
        .await
        .map_err(db_error)
    }

    async fn receive(
        &self,
        receipt: NewBatch,
        movement_type: MovementType,
        ctx: &MovementContext,
    ) -> AppResult<ReceiveOutcome> {
        let mut tx = self.begin().await?;
        let outcome = receive_in(&mut tx, receipt, movement_type, ctx).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(outcome)
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
        let mut tx = self.begin().await?;

        let mut batch = lock_batch(&mut tx, batch_id).await?;
        check_identity(&batch, expected)?;
        apply_receipt(&mut batch, quantity, cost_per_unit)?;
        let batch = save_batch(&mut tx, &batch).await?;
        insert_movement(&mut tx, &batch, movement_type, quantity, cost_per_unit, ctx).await?;
        refresh_level(&mut tx, batch.product_id, batch.branch_id).await?;

        tx.commit().await.map_err(db_error)?;
        Ok(batch)
    }

    async fn deduct(
        &self,
        deductions: &[Deduction],
        movement_type: MovementType,
        ctx: &MovementContext,
    ) -> AppResult<Vec<Batch>> {
        let mut ids: Vec<i64> = deductions.iter().map(|d| d.batch_id).collect();
        ids.sort_unstable();
        ids.dedup();

        let mut tx = self.begin().await?;

        let rows = sqlx::query_as::<_, BatchRow>(&format!(
            "SELECT {} FROM batches WHERE id = ANY($1) ORDER BY id FOR UPDATE",
            BATCH_COLUMNS
        ))
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_error)?;
        let mut locked: Vec<Batch> = rows.into_iter().map(Into::into).collect();

        apply_deductions(&mut locked, deductions)?;

        let mut updated = Vec::with_capacity(locked.len());
        for batch in &locked {
            updated.push(save_batch(&mut tx, batch).await?);
        }
        for deduction in deductions {
            if let Some(batch) = updated.iter().find(|b| b.id == deduction.batch_id) {
                insert_movement(
                    &mut tx,
                    batch,
                    movement_type,
                    -deduction.quantity,
                    batch.cost_per_unit,
                    ctx,
                )
                .await?;
            }
        }

        let mut touched: Vec<(i64, Option<i64>)> =
            updated.iter().map(|b| (b.product_id, b.branch_id)).collect();
        touched.sort_unstable();
        touched.dedup();
        for (product_id, branch_id) in touched {
            refresh_level(&mut tx, product_id, branch_id).await?;
        }

        tx.commit().await.map_err(db_error)?;
        Ok(updated)
    }

    async fn transfer(
        &self,
        deduction: Deduction,
        target_branch_id: i64,
        ctx: &MovementContext,
    ) -> AppResult<TransferOutcome> {
        let mut tx = self.begin().await?;

        let mut source = lock_batch(&mut tx, deduction.batch_id).await?;
        if source.branch_id == Some(target_branch_id) {
            return Err(AppError::validation(
                "target_branch_id",
                "Target branch must differ from the source branch",
            ));
        }
        let destination = transfer_destination(&source, target_branch_id, deduction.quantity);
        apply_deduction(&mut source, &deduction)?;

        let source = save_batch(&mut tx, &source).await?;
        insert_movement(
            &mut tx,
            &source,
            MovementType::TransferOut,
            -deduction.quantity,
            source.cost_per_unit,
            ctx,
        )
        .await?;
        refresh_level(&mut tx, source.product_id, source.branch_id).await?;

        let received = receive_in(&mut tx, destination, MovementType::TransferIn, ctx).await?;

        tx.commit().await.map_err(db_error)?;
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
        let mut tx = self.begin().await?;

        let mut batch = lock_batch(&mut tx, batch_id).await?;
        let record = evaluate_disposal(
            &batch,
            request.as_of,
            request.method,
            request.reason.clone(),
            request.force,
        )?;
        let quantity = record.quantity;
        apply_disposal(&mut batch, record);

        let batch = save_batch(&mut tx, &batch).await?;
        insert_movement(
            &mut tx,
            &batch,
            MovementType::Disposal,
            -quantity,
            batch.cost_per_unit,
            ctx,
        )
        .await?;
        refresh_level(&mut tx, batch.product_id, batch.branch_id).await?;

        tx.commit().await.map_err(db_error)?;
        Ok(batch)
    }

    async fn set_blocked(
        &self,
        batch_id: i64,
        blocked: bool,
        reason: Option<String>,
    ) -> AppResult<Batch> {
        let mut tx = self.begin().await?;

        let mut batch = lock_batch(&mut tx, batch_id).await?;
        apply_block(&mut batch, blocked, reason)?;
        let batch = save_batch(&mut tx, &batch).await?;
        refresh_level(&mut tx, batch.product_id, batch.branch_id).await?;

        tx.commit().await.map_err(db_error)?;
        Ok(batch)
    }

    async fn movements(&self, batch_id: i64) -> AppResult<Vec<StockMovement>> {
        let rows = sqlx::query_as::<_, MovementRow>(
            r#"
            SELECT id, batch_id, product_id, branch_id, movement_type, quantity, cost_per_unit,
                   reference, actor, note, created_at
            FROM stock_movements
            WHERE batch_id = $1
            ORDER BY id
            "#,
        )
        .bind(batch_id)
        .fetch_all(&self.db)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn stock_levels(&self, product_id: i64) -> AppResult<Vec<StockLevel>> {
        let rows = sqlx::query_as::<_, StockLevelRow>(
            r#"
            SELECT product_id, branch_id, on_hand, reserved, available, updated_at
            FROM stock_levels
            WHERE product_id = $1
            ORDER BY branch_id NULLS FIRST
            "#,
        )
        .bind(product_id)
        .fetch_all(&self.db)
        .await
        .map_err(db_error)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl CatalogReader for PgBatchRepository {
    async fn product(&self, product_id: i64) -> AppResult<Option<ProductProfile>> {
        let row = sqlx::query_as::<_, ProductRow>(
            r#"
            SELECT p.id AS product_id, p.name, p.unit_price, c.warning_window_days
            FROM products p
            LEFT JOIN categories c ON c.id = p.category_id
            WHERE p.id = $1
            "#,
        )
        .bind(product_id)
        .fetch_optional(&self.db)
        .await
        .map_err(db_error)?;

        Ok(row.map(Into::into))
    }

    async fn thresholds(&self, product_id: i64) -> AppResult<Vec<BranchThreshold>> {
        let rows = sqlx::query_as::<_, ThresholdRow>(
            r#"
            SELECT branch_id, minimum_stock
            FROM branch_stock_thresholds
            WHERE product_id = $1
            ORDER BY branch_id
            "#,
        )
        .bind(product_id)
        .fetch_all(&self.db)
        .await
        .map_err(db_error)?;

        Ok(rows
            .into_iter()
            .map(|row| BranchThreshold {
                branch_id: row.branch_id,
                minimum_stock: row.minimum_stock,
            })
            .collect())
    }
}
