//! Equipment rental scheduler: day rentals of machines that gate rental expenses.

use crate::models::{
    AppointmentFilter, AppointmentStatus, EquipmentRental, LedgerEntry, PendingConfirmation,
    ProjectionWarning, RentalFilter, RentalState, ScheduleRental,
};
use crate::services::catalog::{require_active, Catalog};
use crate::services::clock::Clock;
use crate::services::error::{EngineError, EngineResult};
use crate::services::projector::Projector;
use crate::services::store::{Store, StoreTx};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Charges made by a reconciliation sweep.
#[derive(Debug, Default)]
pub struct RentalReconciliation {
    pub charged: Vec<LedgerEntry>,
    pub warnings: Vec<ProjectionWarning>,
}

pub struct RentalScheduler {
    store: Arc<dyn Store>,
    catalog: Arc<dyn Catalog>,
    projector: Arc<Projector>,
    clock: Arc<dyn Clock>,
}

fn day_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = date.and_time(chrono::NaiveTime::MIN).and_utc();
    (start, start + Duration::days(1))
}

async fn load(tx: &mut dyn StoreTx, rental_id: Uuid) -> EngineResult<EquipmentRental> {
    tx.get_rental(rental_id)
        .await?
        .ok_or_else(|| EngineError::not_found(format!("Rental {} not found", rental_id)))
}

impl RentalScheduler {
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

    /// Schedules a machine for a day at a location. One rental per machine-day.
    #[instrument(skip(self, input), fields(machine_id = %input.machine_id, rental_date = %input.rental_date))]
    pub async fn schedule(&self, input: &ScheduleRental) -> EngineResult<EquipmentRental> {
        let machine = require_active(
            self.catalog.get_machine(input.machine_id).await?,
            input.machine_id,
        )?;
        require_active(
            self.catalog.get_location(input.location_id).await?,
            input.location_id,
        )?;

        let cost = input.cost.unwrap_or(machine.daily_cost);
        if cost <= Decimal::ZERO {
            return Err(EngineError::validation(format!(
                "Rental cost must be positive, got {}",
                cost
            )));
        }

        let now = self.clock.now();
        let rental = EquipmentRental {
            rental_id: Uuid::new_v4(),
            machine_id: input.machine_id,
            location_id: input.location_id,
            rental_date: input.rental_date,
            state: RentalState::Scheduled,
            cost,
            entry_id: None,
            notes: input.notes.clone(),
            created_utc: now,
            updated_utc: now,
        };

        let mut tx = self.store.begin().await?;
        tx.insert_rental(&rental).await?;
        tx.commit().await?;

        info!(rental_id = %rental.rental_id, cost = %cost, "Rental scheduled");
        Ok(rental)
    }

    /// Confirms a scheduled rental; a canceled one is reinstated.
    #[instrument(skip(self))]
    pub async fn confirm(&self, rental_id: Uuid) -> EngineResult<EquipmentRental> {
        self.transition(rental_id, RentalState::Confirmed).await
    }

    #[instrument(skip(self))]
    pub async fn cancel(&self, rental_id: Uuid) -> EngineResult<EquipmentRental> {
        self.transition(rental_id, RentalState::Canceled).await
    }

    async fn transition(
        &self,
        rental_id: Uuid,
        target: RentalState,
    ) -> EngineResult<EquipmentRental> {
        let mut tx = self.store.begin().await?;
        let mut rental = load(tx.as_mut(), rental_id).await?;

        if rental.state == RentalState::Charged {
            tx.rollback().await?;
            return Err(EngineError::validation(format!(
                "Rental {} is already charged; reverse its ledger entry instead",
                rental_id
            )));
        }
        if rental.state == target {
            tx.rollback().await?;
            return Ok(rental);
        }

        rental.state = target;
        rental.updated_utc = self.clock.now();
        tx.update_rental(&rental).await?;
        tx.commit().await?;

        info!(rental_id = %rental_id, state = %target, "Rental state changed");
        Ok(rental)
    }

    pub async fn get_rental(&self, rental_id: Uuid) -> EngineResult<EquipmentRental> {
        let mut tx = self.store.begin().await?;
        let rental = load(tx.as_mut(), rental_id).await;
        tx.rollback().await?;
        rental
    }

    pub async fn list_rentals(&self, filter: &RentalFilter) -> EngineResult<Vec<EquipmentRental>> {
        let mut tx = self.store.begin().await?;
        let rentals = tx.list_rentals(filter).await?;
        tx.rollback().await?;
        Ok(rentals)
    }

    /// Machine-days at `location_id` with live or completed appointments on a
    /// machine but no Confirmed or Charged rental.
    #[instrument(skip(self))]
    pub async fn pending_confirmations(
        &self,
        location_id: Uuid,
    ) -> EngineResult<Vec<PendingConfirmation>> {
        let mut tx = self.store.begin().await?;
        let appointments = tx
            .list_appointments(&AppointmentFilter {
                location_id: Some(location_id),
                statuses: vec![
                    AppointmentStatus::Pending,
                    AppointmentStatus::Confirmed,
                    AppointmentStatus::Completed,
                ],
                ..Default::default()
            })
            .await?;

        let mut by_day: BTreeMap<(NaiveDate, Uuid), Vec<Uuid>> = BTreeMap::new();
        for appt in &appointments {
            if let Some(machine_id) = appt.machine_id {
                by_day
                    .entry((appt.service_date(), machine_id))
                    .or_default()
                    .push(appt.appointment_id);
            }
        }

        let mut pending = Vec::new();
        for ((rental_date, machine_id), appointment_ids) in by_day {
            let rental = tx.find_rental(machine_id, location_id, rental_date).await?;
            if rental.as_ref().is_some_and(|r| r.state.allows_charge()) {
                continue;
            }
            pending.push(PendingConfirmation {
                machine_id,
                location_id,
                rental_date,
                appointment_ids,
                rental_state: rental.map(|r| r.state),
            });
        }
        tx.rollback().await?;

        Ok(pending)
    }

    /// Charges every Confirmed, unlinked rental that already has completed
    /// appointments on its machine-day. Safe to run repeatedly.
    #[instrument(skip(self))]
    pub async fn reconcile_rentals(
        &self,
        location_id: Option<Uuid>,
    ) -> EngineResult<RentalReconciliation> {
        let mut tx = self.store.begin().await?;
        let rentals = tx
            .list_rentals(&RentalFilter {
                location_id,
                state: Some(RentalState::Confirmed),
                ..Default::default()
            })
            .await?;

        let mut report = RentalReconciliation::default();
        for rental in rentals.into_iter().filter(|r| r.entry_id.is_none()) {
            let (day_start, day_end) = day_bounds(rental.rental_date);
            let completed = tx
                .list_appointments(&AppointmentFilter {
                    location_id: Some(rental.location_id),
                    machine_id: Some(rental.machine_id),
                    statuses: vec![AppointmentStatus::Completed],
                    start_from: Some(day_start),
                    start_before: Some(day_end),
                    ..Default::default()
                })
                .await?;
            if completed.is_empty() {
                continue;
            }

            let ids: Vec<Uuid> = completed.iter().map(|a| a.appointment_id).collect();
            let projection = self
                .projector
                .reconcile_rental(tx.as_mut(), rental, &ids)
                .await?;
            report.charged.extend(projection.entries);
            report.warnings.extend(projection.warnings);
        }
        tx.commit().await?;

        if !report.charged.is_empty() || !report.warnings.is_empty() {
            info!(
                charged = report.charged.len(),
                warnings = report.warnings.len(),
                "Rental reconciliation finished"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn day_bounds_cover_one_utc_day() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let (start, end) = day_bounds(date);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap());
    }
}
