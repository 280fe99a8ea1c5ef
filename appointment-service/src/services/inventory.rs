//! Inventory movement recorder.

use crate::models::{
    DomainEvent, InventoryMovement, MovementKind, MovementOutcome, PaymentMethod, RecordMovement,
};
use crate::services::catalog::{require_active, Catalog};
use crate::services::clock::Clock;
use crate::services::error::{EngineError, EngineResult};
use crate::services::projector::{line_total, Projector, MAX_AMOUNT};
use crate::services::store::Store;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

pub struct InventoryRecorder {
    store: Arc<dyn Store>,
    catalog: Arc<dyn Catalog>,
    projector: Arc<Projector>,
    clock: Arc<dyn Clock>,
}

/// Largest quantity a movement holds, NUMERIC(12, 3).
const MAX_QUANTITY: Decimal = Decimal::from_parts(0xD4A5_0FFF, 0xE8, 0, false, 3);

fn validate(input: &RecordMovement) -> EngineResult<()> {
    if input.quantity > MAX_QUANTITY {
        return Err(EngineError::validation(format!(
            "Quantity {} exceeds the maximum of {}",
            input.quantity, MAX_QUANTITY
        )));
    }
    for unit_amount in input.unit_cost.into_iter().chain(input.unit_price) {
        if unit_amount > MAX_AMOUNT {
            return Err(EngineError::validation(format!(
                "Unit amount {} exceeds the maximum of {}",
                unit_amount, MAX_AMOUNT
            )));
        }
        if input.kind != MovementKind::Adjust {
            line_total(input.quantity, unit_amount)?;
        }
    }
    match input.kind {
        MovementKind::Adjust if input.quantity < Decimal::ZERO => {
            return Err(EngineError::validation("Counted stock cannot be negative"));
        }
        MovementKind::Adjust => {}
        _ if input.quantity <= Decimal::ZERO => {
            return Err(EngineError::validation(format!(
                "Quantity must be positive, got {}",
                input.quantity
            )));
        }
        _ => {}
    }
    if input.unit_cost.is_some_and(|c| c < Decimal::ZERO) {
        return Err(EngineError::validation("Unit cost cannot be negative"));
    }
    if input.unit_price.is_some_and(|p| p <= Decimal::ZERO) {
        return Err(EngineError::validation("Unit price must be positive"));
    }
    Ok(())
}

impl InventoryRecorder {
    pub fn new(
        store: Arc<dyn Store>,
        catalog: Arc<dyn Catalog>,
        projector: Arc<Projector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            catalog,
            projector,
            clock,
        }
    }

    /// Applies a stock change and derives its purchase or sale entry.
    #[instrument(skip(self, input), fields(product_id = %input.product_id, kind = input.kind.as_str()))]
    pub async fn record_movement(&self, input: &RecordMovement) -> EngineResult<MovementOutcome> {
        validate(input)?;
        let product = require_active(
            self.catalog.get_product(input.product_id).await?,
            input.product_id,
        )?;

        let mut tx = self.store.begin().await?;
        let previous_stock = tx.stock_level(product.product_id).await?;
        let new_stock = input.kind.apply(previous_stock, input.quantity);
        if new_stock < Decimal::ZERO {
            tx.rollback().await?;
            return Err(EngineError::validation(format!(
                "Insufficient stock for {}: {} available, {} requested",
                product.name, previous_stock, input.quantity
            )));
        }

        let movement = InventoryMovement {
            movement_id: Uuid::new_v4(),
            location_id: product.location_id,
            product_id: product.product_id,
            kind: input.kind,
            quantity: input.quantity,
            unit_cost: input.unit_cost,
            unit_price: input.unit_price,
            previous_stock,
            new_stock,
            reason: input.reason.clone(),
            payment_method: input.payment_method.unwrap_or(PaymentMethod::Cash),
            client_id: input.client_id,
            appointment_id: input.appointment_id,
            created_by: input.created_by,
            created_utc: self.clock.now(),
        };

        tx.set_stock_level(product.product_id, new_stock).await?;
        tx.insert_movement(&movement).await?;
        let projection = self
            .projector
            .dispatch(tx.as_mut(), &DomainEvent::MovementRecorded(movement.clone()))
            .await?;
        tx.commit().await?;

        info!(
            movement_id = %movement.movement_id,
            previous_stock = %previous_stock,
            new_stock = %new_stock,
            "Inventory movement recorded"
        );
        Ok(MovementOutcome {
            movement,
            entries: projection.entries,
            warnings: projection.warnings,
        })
    }

    /// Deletes a movement with its derived entry. Stock is not rewound.
    #[instrument(skip(self))]
    pub async fn delete_movement(&self, movement_id: Uuid) -> EngineResult<InventoryMovement> {
        let mut tx = self.store.begin().await?;
        let movement = tx
            .get_movement(movement_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("Movement {} not found", movement_id)))?;

        self.projector
            .dispatch(tx.as_mut(), &DomainEvent::MovementDeleted(movement.clone()))
            .await?;
        tx.delete_movement(movement_id).await?;
        tx.commit().await?;

        info!(movement_id = %movement_id, "Inventory movement deleted");
        Ok(movement)
    }

    pub async fn stock_level(&self, product_id: Uuid) -> EngineResult<Decimal> {
        let mut tx = self.store.begin().await?;
        let level = tx.stock_level(product_id).await?;
        tx.rollback().await?;
        Ok(level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn adjust_accepts_zero_but_flows_do_not() {
        let product = Uuid::new_v4();
        assert!(validate(&RecordMovement::new(product, MovementKind::Adjust, Decimal::ZERO)).is_ok());
        assert!(validate(&RecordMovement::new(product, MovementKind::In, Decimal::ZERO)).is_err());
        assert!(validate(&RecordMovement::new(product, MovementKind::Out, dec!(-1))).is_err());
    }

    #[test]
    fn amounts_beyond_column_precision_are_rejected() {
        let product = Uuid::new_v4();
        assert!(validate(&RecordMovement::new(product, MovementKind::In, dec!(999999999.999))).is_ok());
        assert!(validate(&RecordMovement::new(product, MovementKind::In, dec!(1000000000))).is_err());

        let mut input = RecordMovement::new(product, MovementKind::In, dec!(1));
        input.unit_cost = Some(dec!(9999999999.99));
        assert!(validate(&input).is_ok());
        input.unit_cost = Some(dec!(10000000000));
        assert!(validate(&input).is_err());

        let mut input = RecordMovement::new(product, MovementKind::Out, dec!(3));
        input.unit_price = Some(dec!(5000000000));
        assert!(validate(&input).is_err());
    }
}
