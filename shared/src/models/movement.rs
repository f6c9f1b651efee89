//! Stock movement audit trail

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Kind of ledger mutation a movement records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Receipt,
    Sale,
    Deduction,
    TransferOut,
    TransferIn,
    Disposal,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Receipt => "receipt",
            MovementType::Sale => "sale",
            MovementType::Deduction => "deduction",
            MovementType::TransferOut => "transfer_out",
            MovementType::TransferIn => "transfer_in",
            MovementType::Disposal => "disposal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "receipt" => Some(MovementType::Receipt),
            "sale" => Some(MovementType::Sale),
            "deduction" => Some(MovementType::Deduction),
            "transfer_out" => Some(MovementType::TransferOut),
            "transfer_in" => Some(MovementType::TransferIn),
            "disposal" => Some(MovementType::Disposal),
            _ => None,
        }
    }

    /// Whether the movement removes stock from the batch.
    pub fn is_outbound(&self) -> bool {
        matches!(
            self,
            MovementType::Sale
                | MovementType::Deduction
                | MovementType::TransferOut
                | MovementType::Disposal
        )
    }
}

/// One recorded ledger mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: i64,
    pub batch_id: i64,
    pub product_id: i64,
    pub branch_id: Option<i64>,
    pub movement_type: MovementType,
    /// Signed: positive for stock in, negative for stock out.
    pub quantity: i64,
    pub cost_per_unit: Decimal,
    /// Sale id, transfer id or purchase order the movement belongs to.
    pub reference: Option<String>,
    pub actor: Option<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Context recorded alongside a ledger mutation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementContext {
    pub reference: Option<String>,
    pub actor: Option<String>,
    pub note: Option<String>,
}

impl MovementContext {
    pub fn with_reference(reference: impl Into<String>) -> Self {
        Self {
            reference: Some(reference.into()),
            ..Self::default()
        }
    }

    pub fn by(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn noting(mut self, note: Option<String>) -> Self {
        self.note = note;
        self
    }
}
