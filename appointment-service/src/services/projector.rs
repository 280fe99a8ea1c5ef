//! Event-to-ledger projector.
//!
//! Every rule writes through the store's insert-or-fetch on the entry's source
//! key, so a replayed or duplicated event never produces a second entry. Each
//! rule runs inside its own savepoint of the caller's transaction: when a rule
//! fails its partial writes are rolled back, the failure is reported as a
//! [`ProjectionWarning`], and the triggering state change still commits.

use crate::models::{
    Appointment, CategoryIntent, DomainEvent, EntryType, EquipmentRental, InventoryMovement,
    LedgerEntry, MovementKind, NewLedgerEntry, PaymentStatus, ProjectionWarning, RentalState,
    SourceKey, SourceKind,
};
use crate::services::catalog::Catalog;
use crate::services::categories::CategoryResolver;
use crate::services::clock::Clock;
use crate::services::error::{EngineError, EngineResult};
use crate::services::metrics::{record_ledger_entry, record_projection_failure, record_rental_gap};
use crate::services::store::StoreTx;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

const SAVEPOINT: &str = "ledger_projection";

/// Entries created and rules that failed while projecting one event.
#[derive(Debug, Default)]
pub struct Projection {
    pub entries: Vec<LedgerEntry>,
    pub warnings: Vec<ProjectionWarning>,
}

pub struct Projector {
    resolver: Arc<CategoryResolver>,
    catalog: Arc<dyn Catalog>,
    clock: Arc<dyn Clock>,
}

/// Largest amount a ledger entry holds, NUMERIC(12, 2).
pub(crate) const MAX_AMOUNT: Decimal = Decimal::from_parts(0xD4A5_0FFF, 0xE8, 0, false, 2);

/// `quantity * unit_amount`, rounded to cents and bounded by [`MAX_AMOUNT`].
pub(crate) fn line_total(quantity: Decimal, unit_amount: Decimal) -> EngineResult<Decimal> {
    quantity
        .checked_mul(unit_amount)
        .map(|total| total.round_dp(2))
        .filter(|total| *total <= MAX_AMOUNT)
        .ok_or_else(|| {
            EngineError::validation(format!(
                "Amount for {} x {} exceeds the maximum of {}",
                quantity, unit_amount, MAX_AMOUNT
            ))
        })
}

impl Projector {
    pub fn new(
        resolver: Arc<CategoryResolver>,
        catalog: Arc<dyn Catalog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            resolver,
            catalog,
            clock,
        }
    }

    /// Applies every rule that `event` triggers. Store errors outside a rule
    /// (savepoint handling, movement cleanup) abort the caller's transaction.
    #[instrument(skip(self, tx, event), fields(event = event.name()))]
    pub async fn dispatch(
        &self,
        tx: &mut dyn StoreTx,
        event: &DomainEvent,
    ) -> EngineResult<Projection> {
        let mut out = Projection::default();

        match event {
            DomainEvent::DepositPaid(appt) => {
                let key = SourceKey::deposit(appt.appointment_id);
                tx.savepoint(SAVEPOINT).await?;
                let result = self.project_deposit(tx, appt, &key).await;
                self.settle(tx, &key, result, &mut out).await?;
            }
            DomainEvent::AppointmentCompleted(appt) => {
                let key = SourceKey::completion(appt.appointment_id);
                tx.savepoint(SAVEPOINT).await?;
                let result = self.project_completion(tx, appt, &key).await;
                self.settle(tx, &key, result, &mut out).await?;

                if let Some(machine_id) = appt.machine_id {
                    // The rental key is only known once the rental row is found.
                    let key =
                        SourceKey::new(SourceKind::Appointment, appt.appointment_id, "rental_charge");
                    tx.savepoint(SAVEPOINT).await?;
                    let result = self.project_rental_usage(tx, appt, machine_id).await;
                    self.settle(tx, &key, result, &mut out).await?;
                }
            }
            DomainEvent::MovementRecorded(movement) => match movement.kind {
                MovementKind::In if movement.unit_cost.is_some() => {
                    let key = SourceKey::supply_purchase(movement.movement_id);
                    tx.savepoint(SAVEPOINT).await?;
                    let result = self.project_purchase(tx, movement, &key).await;
                    self.settle(tx, &key, result, &mut out).await?;
                }
                MovementKind::Out => {
                    let key = SourceKey::product_sale(movement.movement_id);
                    tx.savepoint(SAVEPOINT).await?;
                    let result = self.project_sale(tx, movement, &key).await;
                    self.settle(tx, &key, result, &mut out).await?;
                }
                _ => {}
            },
            DomainEvent::MovementDeleted(movement) => {
                self.remove_movement_entries(tx, movement).await?;
            }
            DomainEvent::AppointmentCreated(_)
            | DomainEvent::AppointmentConfirmed(_)
            | DomainEvent::AppointmentCanceled(_)
            | DomainEvent::AppointmentNoShow(_) => {}
        }

        Ok(out)
    }

    async fn settle(
        &self,
        tx: &mut dyn StoreTx,
        key: &SourceKey,
        result: EngineResult<Vec<LedgerEntry>>,
        out: &mut Projection,
    ) -> EngineResult<()> {
        match result {
            Ok(created) => {
                tx.release_savepoint(SAVEPOINT).await?;
                for entry in &created {
                    let rule = entry
                        .source
                        .as_ref()
                        .map(|s| s.rule.as_str())
                        .unwrap_or(key.rule.as_str());
                    record_ledger_entry(rule);
                    info!(
                        entry_id = %entry.entry_id,
                        rule = rule,
                        amount = %entry.amount,
                        "Ledger entry derived"
                    );
                }
                out.entries.extend(created);
            }
            Err(err) => {
                tx.rollback_to_savepoint(SAVEPOINT).await?;
                tx.release_savepoint(SAVEPOINT).await?;
                record_projection_failure(&key.rule);
                error!(
                    rule = %key.rule,
                    source_event_id = %key.event_id(),
                    error = %err,
                    "Ledger projection failed, manual reconciliation required"
                );
                out.warnings.push(ProjectionWarning {
                    rule: key.rule.clone(),
                    source_event_id: key.event_id(),
                    message: err.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn insert(
        &self,
        tx: &mut dyn StoreTx,
        entry: NewLedgerEntry,
    ) -> EngineResult<Option<LedgerEntry>> {
        let (stored, created) = tx.insert_entry(&entry.into_entry(self.clock.now())).await?;
        if !created {
            debug!(entry_id = %stored.entry_id, "Duplicate event absorbed");
            return Ok(None);
        }
        Ok(Some(stored))
    }

    /// "service - client" label, degrading to ids when the catalog lookup fails.
    async fn appointment_label(&self, appt: &Appointment) -> String {
        let service = match self.catalog.get_service(appt.service_id).await {
            Ok(Some(s)) => s.name,
            _ => appt.service_id.to_string(),
        };
        let client = match self.catalog.get_client(appt.client_id).await {
            Ok(Some(c)) => c.full_name,
            _ => appt.client_id.to_string(),
        };
        format!("{} - {}", service, client)
    }

    fn service_income(
        &self,
        appt: &Appointment,
        category_id: Uuid,
        amount: Decimal,
        description: String,
        key: &SourceKey,
    ) -> NewLedgerEntry {
        let mut entry = NewLedgerEntry::new(
            appt.location_id,
            category_id,
            EntryType::IncomeService,
            amount,
            appt.service_date(),
            description,
        )
        .derived_from(key.clone());
        entry.client_id = Some(appt.client_id);
        entry.appointment_id = Some(appt.appointment_id);
        entry.professional_id = appt.professional_id;
        entry.created_by = appt.created_by;
        entry
    }

    /// Rule 1: deposit income.
    async fn project_deposit(
        &self,
        tx: &mut dyn StoreTx,
        appt: &Appointment,
        key: &SourceKey,
    ) -> EngineResult<Vec<LedgerEntry>> {
        let deposit = match appt.deposit_amount {
            Some(amount) if amount > Decimal::ZERO => amount,
            _ => return Ok(Vec::new()),
        };

        let category = self
            .resolver
            .resolve(appt.location_id, CategoryIntent::ServiceIncome)
            .await?;
        let description = format!(
            "[DEPOSIT] Appointment deposit: {}",
            self.appointment_label(appt).await
        );
        let entry = self.service_income(appt, category.category_id, deposit, description, key);
        Ok(self.insert(tx, entry).await?.into_iter().collect())
    }

    /// Rule 2: remaining balance on completion, then payment status to Paid.
    async fn project_completion(
        &self,
        tx: &mut dyn StoreTx,
        appt: &Appointment,
        key: &SourceKey,
    ) -> EngineResult<Vec<LedgerEntry>> {
        let remaining = appt.remaining_balance();
        let mut created = Vec::new();

        if remaining > Decimal::ZERO {
            let category = self
                .resolver
                .resolve(appt.location_id, CategoryIntent::ServiceIncome)
                .await?;
            let description = format!(
                "Service completed: {}",
                self.appointment_label(appt).await
            );
            let entry =
                self.service_income(appt, category.category_id, remaining, description, key);
            created.extend(self.insert(tx, entry).await?);
        }

        let mut current = tx.get_appointment(appt.appointment_id).await?.ok_or_else(|| {
            EngineError::not_found(format!("Appointment {} not found", appt.appointment_id))
        })?;
        if current.payment_status.can_advance_to(PaymentStatus::Paid) {
            current.payment_status = PaymentStatus::Paid;
            current.updated_utc = self.clock.now();
            tx.update_appointment(&current).await?;
        }

        Ok(created)
    }

    /// Rule 5: machine-backed completion, gated on a confirmed rental for the day.
    async fn project_rental_usage(
        &self,
        tx: &mut dyn StoreTx,
        appt: &Appointment,
        machine_id: Uuid,
    ) -> EngineResult<Vec<LedgerEntry>> {
        let date = appt.service_date();
        let rental = tx.find_rental(machine_id, appt.location_id, date).await?;

        let rental = match rental {
            Some(r) if r.state.allows_charge() => r,
            other => {
                record_rental_gap();
                warn!(
                    appointment_id = %appt.appointment_id,
                    machine_id = %machine_id,
                    rental_date = %date,
                    rental_state = other.as_ref().map(|r| r.state.as_str()).unwrap_or("none"),
                    "No confirmed rental for machine-day; rental expense needs manual confirmation"
                );
                return Ok(Vec::new());
            }
        };

        match rental.state {
            RentalState::Charged => {
                self.attach_to_charge(tx, &rental, appt.appointment_id).await?;
                Ok(Vec::new())
            }
            _ => {
                let entry = self
                    .charge_rental(tx, rental, &[appt.appointment_id])
                    .await?;
                Ok(entry.into_iter().collect())
            }
        }
    }

    /// Adds an appointment to the description of a rental's existing charge.
    async fn attach_to_charge(
        &self,
        tx: &mut dyn StoreTx,
        rental: &EquipmentRental,
        appointment_id: Uuid,
    ) -> EngineResult<()> {
        let entry = match rental.entry_id {
            Some(entry_id) => tx.get_entry(entry_id).await?,
            None => None,
        };
        let Some(mut entry) = entry else {
            return Err(EngineError::validation(format!(
                "Rental {} is charged but its ledger entry is missing",
                rental.rental_id
            )));
        };

        let marker = appointment_id.to_string();
        if entry.description.contains(&marker) {
            return Ok(());
        }
        entry.description = format!("{}, {}", entry.description, marker);
        entry.updated_utc = self.clock.now();
        tx.update_entry(&entry).await?;
        debug!(
            rental_id = %rental.rental_id,
            appointment_id = %appointment_id,
            "Appointment attached to existing rental charge"
        );
        Ok(())
    }

    /// Charges a confirmed rental for the appointments that used it, under the
    /// same savepoint and warning policy as the event rules.
    #[instrument(skip(self, tx, rental), fields(rental_id = %rental.rental_id))]
    pub async fn reconcile_rental(
        &self,
        tx: &mut dyn StoreTx,
        rental: EquipmentRental,
        appointment_ids: &[Uuid],
    ) -> EngineResult<Projection> {
        let key = SourceKey::rental_charge(rental.rental_id);
        let mut out = Projection::default();
        tx.savepoint(SAVEPOINT).await?;
        let result = self
            .charge_rental(tx, rental, appointment_ids)
            .await
            .map(|entry| entry.into_iter().collect());
        self.settle(tx, &key, result, &mut out).await?;
        Ok(out)
    }

    /// Creates the single expense entry for a confirmed rental, listing the
    /// appointments that used the machine, and marks the rental Charged.
    /// Returns `None` when the charge already existed.
    async fn charge_rental(
        &self,
        tx: &mut dyn StoreTx,
        mut rental: EquipmentRental,
        appointment_ids: &[Uuid],
    ) -> EngineResult<Option<LedgerEntry>> {
        if rental.state != RentalState::Confirmed {
            return Err(EngineError::validation(format!(
                "Rental {} is {} and cannot be charged",
                rental.rental_id, rental.state
            )));
        }

        let category = self
            .resolver
            .resolve(rental.location_id, CategoryIntent::EquipmentRentalExpense)
            .await?;
        let machine = match self.catalog.get_machine(rental.machine_id).await? {
            Some(m) => m.name,
            None => rental.machine_id.to_string(),
        };
        let ids: Vec<String> = appointment_ids.iter().map(Uuid::to_string).collect();
        let description = format!(
            "Equipment rental: {} on {} - appointments: {}",
            machine,
            rental.rental_date,
            ids.join(", ")
        );

        let mut entry = NewLedgerEntry::new(
            rental.location_id,
            category.category_id,
            EntryType::Expense,
            rental.cost,
            rental.rental_date,
            description,
        )
        .derived_from(SourceKey::rental_charge(rental.rental_id));
        entry.rental_id = Some(rental.rental_id);

        let (stored, created) = tx.insert_entry(&entry.into_entry(self.clock.now())).await?;

        rental.entry_id = Some(stored.entry_id);
        rental.state = RentalState::Charged;
        rental.updated_utc = self.clock.now();
        tx.update_rental(&rental).await?;

        if !created {
            for id in appointment_ids {
                self.attach_to_charge(tx, &rental, *id).await?;
            }
            return Ok(None);
        }

        info!(
            rental_id = %rental.rental_id,
            entry_id = %stored.entry_id,
            cost = %rental.cost,
            "Rental charged"
        );
        Ok(Some(stored))
    }

    /// Rule 3: stock purchase expense.
    async fn project_purchase(
        &self,
        tx: &mut dyn StoreTx,
        movement: &InventoryMovement,
        key: &SourceKey,
    ) -> EngineResult<Vec<LedgerEntry>> {
        let unit_cost = match movement.unit_cost {
            Some(cost) if cost > Decimal::ZERO => cost,
            _ => return Ok(Vec::new()),
        };
        // Purchases of since-deactivated products still cost money, so no active check.
        let product = self
            .catalog
            .get_product(movement.product_id)
            .await?
            .ok_or_else(|| {
                EngineError::not_found(format!("Product {} not found", movement.product_id))
            })?;

        let category = self
            .resolver
            .resolve_supplies(movement.location_id, product.kind)
            .await?;
        let description = format!(
            "Purchase of {} {} of {}",
            movement.quantity.normalize(),
            product.unit,
            product.name
        );

        let amount = line_total(movement.quantity, unit_cost)?;
        let mut entry = NewLedgerEntry::new(
            movement.location_id,
            category.category_id,
            EntryType::Expense,
            amount,
            movement.created_utc.date_naive(),
            description,
        )
        .derived_from(key.clone());
        entry.payment_method = movement.payment_method;
        entry.product_id = Some(movement.product_id);
        entry.movement_id = Some(movement.movement_id);
        entry.created_by = movement.created_by;

        Ok(self.insert(tx, entry).await?.into_iter().collect())
    }

    /// Rule 4: product sale income at the effective price.
    async fn project_sale(
        &self,
        tx: &mut dyn StoreTx,
        movement: &InventoryMovement,
        key: &SourceKey,
    ) -> EngineResult<Vec<LedgerEntry>> {
        let product = self
            .catalog
            .get_product(movement.product_id)
            .await?
            .ok_or_else(|| {
                EngineError::not_found(format!("Product {} not found", movement.product_id))
            })?;

        let price = product.effective_price(movement.unit_price);
        let amount = line_total(movement.quantity, price.unit_price)?;
        if amount <= Decimal::ZERO {
            return Ok(Vec::new());
        }

        let category = self
            .resolver
            .resolve(movement.location_id, CategoryIntent::ProductIncome)
            .await?;

        let mut description = format!(
            "Sale of {} {} of {}",
            movement.quantity.normalize(),
            product.unit,
            product.name
        );
        if let Some(discount) = price.offer_discount {
            description.push_str(&format!(" (on offer: {}% off)", discount.normalize()));
        }
        if let Some(reason) = movement.reason.as_deref().filter(|r| !r.trim().is_empty()) {
            description.push_str(&format!(" - {}", reason.trim()));
        }

        let mut entry = NewLedgerEntry::new(
            movement.location_id,
            category.category_id,
            EntryType::IncomeProduct,
            amount,
            movement.created_utc.date_naive(),
            description,
        )
        .derived_from(key.clone());
        entry.payment_method = movement.payment_method;
        entry.client_id = movement.client_id;
        entry.appointment_id = movement.appointment_id;
        entry.product_id = Some(movement.product_id);
        entry.movement_id = Some(movement.movement_id);
        entry.created_by = movement.created_by;

        Ok(self.insert(tx, entry).await?.into_iter().collect())
    }

    /// Deletes auto-generated entries derived from a movement; manual ones stay.
    async fn remove_movement_entries(
        &self,
        tx: &mut dyn StoreTx,
        movement: &InventoryMovement,
    ) -> EngineResult<()> {
        for key in [
            SourceKey::supply_purchase(movement.movement_id),
            SourceKey::product_sale(movement.movement_id),
        ] {
            if let Some(entry) = tx.find_entry_by_source(&key).await? {
                if entry.auto_generated {
                    tx.delete_entry(entry.entry_id).await?;
                    info!(
                        entry_id = %entry.entry_id,
                        movement_id = %movement.movement_id,
                        "Derived entry removed with its movement"
                    );
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn line_total_rounds_to_cents() {
        assert_eq!(line_total(dec!(10), dec!(4.50)).unwrap(), dec!(45));
        assert_eq!(line_total(dec!(0.333), dec!(10)).unwrap(), dec!(3.33));
    }

    #[test]
    fn line_total_overflow_is_a_validation_error() {
        let err = line_total(Decimal::MAX, dec!(2)).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        assert_eq!(line_total(dec!(1), MAX_AMOUNT).unwrap(), MAX_AMOUNT);
        assert!(line_total(dec!(2), MAX_AMOUNT).is_err());
    }
}
