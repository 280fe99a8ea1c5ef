//! Inventory movement model.

use super::PaymentMethod;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    In,
    Out,
    /// Counted stock level replacing the current one.
    Adjust,
    TransferIn,
    TransferOut,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::In => "in",
            MovementKind::Out => "out",
            MovementKind::Adjust => "adjust",
            MovementKind::TransferIn => "transfer_in",
            MovementKind::TransferOut => "transfer_out",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "in" => Some(MovementKind::In),
            "out" => Some(MovementKind::Out),
            "adjust" => Some(MovementKind::Adjust),
            "transfer_in" => Some(MovementKind::TransferIn),
            "transfer_out" => Some(MovementKind::TransferOut),
            _ => None,
        }
    }

    /// Stock level after applying `quantity` to `current`.
    pub fn apply(&self, current: Decimal, quantity: Decimal) -> Decimal {
        match self {
            MovementKind::In | MovementKind::TransferIn => current + quantity,
            MovementKind::Out | MovementKind::TransferOut => current - quantity,
            MovementKind::Adjust => quantity,
        }
    }

    pub fn is_outgoing(&self) -> bool {
        matches!(self, MovementKind::Out | MovementKind::TransferOut)
    }
}

impl std::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryMovement {
    pub movement_id: Uuid,
    pub location_id: Uuid,
    pub product_id: Uuid,
    pub kind: MovementKind,
    pub quantity: Decimal,
    /// Purchase cost per unit (In).
    pub unit_cost: Option<Decimal>,
    /// Sale price override per unit (Out).
    pub unit_price: Option<Decimal>,
    pub previous_stock: Decimal,
    pub new_stock: Decimal,
    pub reason: Option<String>,
    pub payment_method: PaymentMethod,
    pub client_id: Option<Uuid>,
    pub appointment_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}

/// Input for recording a movement.
#[derive(Debug, Clone)]
pub struct RecordMovement {
    pub product_id: Uuid,
    pub kind: MovementKind,
    pub quantity: Decimal,
    pub unit_cost: Option<Decimal>,
    pub unit_price: Option<Decimal>,
    pub reason: Option<String>,
    pub payment_method: Option<PaymentMethod>,
    pub client_id: Option<Uuid>,
    pub appointment_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
}

impl RecordMovement {
    pub fn new(product_id: Uuid, kind: MovementKind, quantity: Decimal) -> Self {
        Self {
            product_id,
            kind,
            quantity,
            unit_cost: None,
            unit_price: None,
            reason: None,
            payment_method: None,
            client_id: None,
            appointment_id: None,
            created_by: None,
        }
    }
}
