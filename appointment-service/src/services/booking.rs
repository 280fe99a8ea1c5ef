//! Booking engine: appointment lifecycle, payment lifecycle and calendar guard.

use crate::models::{
    Appointment, AppointmentFilter, AppointmentOutcome, AppointmentStatus, Availability,
    CreateAppointment, DomainEvent, PaymentStatus,
};
use crate::services::calendar::{validate_interval, ResourceCalendar};
use crate::services::catalog::{require_active, Catalog};
use crate::services::clock::Clock;
use crate::services::error::{EngineError, EngineResult};
use crate::services::metrics::{record_booking, record_status_change};
use crate::services::notifier::{NotificationKind, Notifier};
use crate::services::projector::{Projection, Projector};
use crate::services::store::{Store, StoreTx};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub struct BookingEngine {
    store: Arc<dyn Store>,
    catalog: Arc<dyn Catalog>,
    calendar: Arc<ResourceCalendar>,
    projector: Arc<Projector>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

async fn load(tx: &mut dyn StoreTx, appointment_id: Uuid) -> EngineResult<Appointment> {
    tx.get_appointment(appointment_id)
        .await?
        .ok_or_else(|| EngineError::not_found(format!("Appointment {} not found", appointment_id)))
}

impl BookingEngine {
    pub fn new(
        store: Arc<dyn Store>,
        catalog: Arc<dyn Catalog>,
        calendar: Arc<ResourceCalendar>,
        projector: Arc<Projector>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            catalog,
            calendar,
            projector,
            notifier,
            clock,
        }
    }

    pub async fn check_availability(
        &self,
        professional_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> EngineResult<Availability> {
        self.calendar
            .check_availability(professional_id, start, end, exclude)
            .await
    }

    /// Books a Pending appointment. The conflict check and the insert share
    /// one transaction holding the professional's calendar lock.
    #[instrument(
        skip(self, input),
        fields(location_id = %input.location_id, professional_id = ?input.professional_id)
    )]
    pub async fn create_appointment(&self, input: &CreateAppointment) -> EngineResult<Appointment> {
        let result = self.book(input).await;
        match &result {
            Ok(_) => record_booking("created"),
            Err(EngineError::Conflict { .. }) => record_booking("conflict"),
            Err(err) => {
                record_booking("rejected");
                warn!(error = %err, "Booking rejected");
            }
        }
        result
    }

    async fn book(&self, input: &CreateAppointment) -> EngineResult<Appointment> {
        let now = self.clock.now();
        if input.start_utc < now {
            return Err(EngineError::validation(format!(
                "Start time {} is in the past",
                input.start_utc
            )));
        }

        let location = require_active(
            self.catalog.get_location(input.location_id).await?,
            input.location_id,
        )?;
        require_active(self.catalog.get_client(input.client_id).await?, input.client_id)?;
        let service = require_active(
            self.catalog.get_service(input.service_id).await?,
            input.service_id,
        )?;
        if service.location_id != location.location_id {
            return Err(EngineError::validation(format!(
                "Service '{}' is not offered at location {}",
                service.name, location.location_id
            )));
        }
        if let Some(professional_id) = input.professional_id {
            let professional = require_active(
                self.catalog.get_professional(professional_id).await?,
                professional_id,
            )?;
            if professional.location_id != location.location_id {
                return Err(EngineError::validation(format!(
                    "Professional {} does not work at location {}",
                    professional.full_name, location.location_id
                )));
            }
        }

        let end_utc = match input.end_utc {
            Some(end) => end,
            None => {
                if service.duration_minutes <= 0 {
                    return Err(EngineError::validation(format!(
                        "Service '{}' has no duration; an end time is required",
                        service.name
                    )));
                }
                input.start_utc + Duration::minutes(i64::from(service.duration_minutes))
            }
        };
        validate_interval(input.start_utc, end_utc)?;

        let mut tx = self.store.begin().await?;

        // Unassigned appointments do not hold any calendar.
        if let Some(professional_id) = input.professional_id {
            if let Err(err) = ResourceCalendar::reserve(
                tx.as_mut(),
                professional_id,
                input.start_utc,
                end_utc,
                None,
            )
            .await
            {
                tx.rollback().await?;
                return Err(err);
            }
        }

        let appointment = Appointment {
            appointment_id: Uuid::new_v4(),
            location_id: input.location_id,
            client_id: input.client_id,
            service_id: input.service_id,
            professional_id: input.professional_id,
            machine_id: service.machine_id,
            start_utc: input.start_utc,
            end_utc,
            status: AppointmentStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            total_amount: service.price,
            deposit_amount: None,
            notes: input.notes.clone(),
            reminder_24h_sent: false,
            reminder_2h_sent: false,
            created_by: input.created_by,
            created_utc: now,
            updated_utc: now,
        };

        tx.insert_appointment(&appointment).await?;
        self.projector
            .dispatch(tx.as_mut(), &DomainEvent::AppointmentCreated(appointment.clone()))
            .await?;
        tx.commit().await?;

        info!(
            appointment_id = %appointment.appointment_id,
            start = %appointment.start_utc,
            end = %appointment.end_utc,
            "Appointment booked"
        );
        self.notifier
            .notify(NotificationKind::Created, appointment.appointment_id);

        Ok(appointment)
    }

    /// Moves an appointment through its state machine. Completion runs the
    /// ledger projection in the same transaction; projection failures come
    /// back as warnings while the status change commits.
    #[instrument(skip(self), fields(status = %new_status))]
    pub async fn change_status(
        &self,
        appointment_id: Uuid,
        new_status: AppointmentStatus,
    ) -> EngineResult<AppointmentOutcome> {
        let mut tx = self.store.begin().await?;
        let mut appointment = load(tx.as_mut(), appointment_id).await?;

        if appointment.status == new_status {
            tx.rollback().await?;
            return Ok(AppointmentOutcome {
                appointment,
                entries: Vec::new(),
                warnings: Vec::new(),
            });
        }

        if !appointment.status.can_transition_to(new_status) {
            tx.rollback().await?;
            return Err(EngineError::validation(format!(
                "Cannot change appointment status from {} to {}",
                appointment.status, new_status
            )));
        }

        // Confirming re-checks the slot; a canceled overlap may have been reinstated.
        if new_status == AppointmentStatus::Confirmed {
            if let Some(professional_id) = appointment.professional_id {
                if let Err(err) = ResourceCalendar::reserve(
                    tx.as_mut(),
                    professional_id,
                    appointment.start_utc,
                    appointment.end_utc,
                    Some(appointment_id),
                )
                .await
                {
                    tx.rollback().await?;
                    return Err(err);
                }
            }
        }

        appointment.status = new_status;
        appointment.updated_utc = self.clock.now();
        tx.update_appointment(&appointment).await?;

        let event = match new_status {
            AppointmentStatus::Confirmed => Some(DomainEvent::AppointmentConfirmed(appointment)),
            AppointmentStatus::Completed => Some(DomainEvent::AppointmentCompleted(appointment)),
            AppointmentStatus::Canceled => Some(DomainEvent::AppointmentCanceled(appointment)),
            AppointmentStatus::NoShow => Some(DomainEvent::AppointmentNoShow(appointment)),
            AppointmentStatus::Pending => None,
        };
        let projection = match &event {
            Some(event) => self.projector.dispatch(tx.as_mut(), event).await?,
            None => Projection::default(),
        };
        let appointment = load(tx.as_mut(), appointment_id).await?;
        tx.commit().await?;

        record_status_change(new_status.as_str());
        info!(
            appointment_id = %appointment_id,
            entries = projection.entries.len(),
            warnings = projection.warnings.len(),
            "Appointment status changed"
        );
        if new_status == AppointmentStatus::Canceled {
            self.notifier
                .notify(NotificationKind::Canceled, appointment_id);
        }

        Ok(AppointmentOutcome {
            appointment,
            entries: projection.entries,
            warnings: projection.warnings,
        })
    }

    /// Records a deposit on an unpaid appointment and books it as income.
    #[instrument(skip(self))]
    pub async fn record_deposit(
        &self,
        appointment_id: Uuid,
        amount: Decimal,
    ) -> EngineResult<AppointmentOutcome> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::validation("Deposit amount must be positive"));
        }

        let mut tx = self.store.begin().await?;
        let mut appointment = load(tx.as_mut(), appointment_id).await?;

        if appointment.status.is_terminal() {
            tx.rollback().await?;
            return Err(EngineError::validation(format!(
                "Cannot take a deposit on a {} appointment",
                appointment.status
            )));
        }
        if !appointment.payment_status.can_advance_to(PaymentStatus::DepositPaid) {
            tx.rollback().await?;
            return Err(EngineError::validation(format!(
                "Appointment payment status is {}, deposits require unpaid",
                appointment.payment_status
            )));
        }
        if amount > appointment.total_amount {
            tx.rollback().await?;
            return Err(EngineError::validation(format!(
                "Deposit {} exceeds total amount {}",
                amount, appointment.total_amount
            )));
        }

        appointment.deposit_amount = Some(amount);
        appointment.payment_status = PaymentStatus::DepositPaid;
        appointment.updated_utc = self.clock.now();
        tx.update_appointment(&appointment).await?;

        let projection = self
            .projector
            .dispatch(tx.as_mut(), &DomainEvent::DepositPaid(appointment.clone()))
            .await?;
        tx.commit().await?;

        info!(appointment_id = %appointment_id, amount = %amount, "Deposit recorded");
        Ok(AppointmentOutcome {
            appointment,
            entries: projection.entries,
            warnings: projection.warnings,
        })
    }

    /// Re-runs the deposit and completion rules for a Completed appointment.
    /// Entries that already exist are left alone.
    #[instrument(skip(self))]
    pub async fn replay_completion(&self, appointment_id: Uuid) -> EngineResult<AppointmentOutcome> {
        let mut tx = self.store.begin().await?;
        let appointment = load(tx.as_mut(), appointment_id).await?;
        if appointment.status != AppointmentStatus::Completed {
            tx.rollback().await?;
            return Err(EngineError::validation(format!(
                "Appointment {} is {}, only completed appointments can be replayed",
                appointment_id, appointment.status
            )));
        }

        // A deposit taken while its rule was failing has no entry yet.
        let mut projection = if appointment.deposit_amount.is_some()
            && appointment.payment_status != PaymentStatus::Unpaid
        {
            self.projector
                .dispatch(tx.as_mut(), &DomainEvent::DepositPaid(appointment.clone()))
                .await?
        } else {
            Projection::default()
        };
        let completion = self
            .projector
            .dispatch(tx.as_mut(), &DomainEvent::AppointmentCompleted(appointment))
            .await?;
        projection.entries.extend(completion.entries);
        projection.warnings.extend(completion.warnings);
        let appointment = load(tx.as_mut(), appointment_id).await?;
        tx.commit().await?;

        if !projection.warnings.is_empty() {
            warn!(
                appointment_id = %appointment_id,
                warnings = projection.warnings.len(),
                "Completion replay left unresolved projections"
            );
        }
        Ok(AppointmentOutcome {
            appointment,
            entries: projection.entries,
            warnings: projection.warnings,
        })
    }

    pub async fn get_appointment(&self, appointment_id: Uuid) -> EngineResult<Appointment> {
        let mut tx = self.store.begin().await?;
        let appointment = load(tx.as_mut(), appointment_id).await;
        tx.rollback().await?;
        appointment
    }

    pub async fn list_appointments(
        &self,
        filter: &AppointmentFilter,
    ) -> EngineResult<Vec<Appointment>> {
        let mut tx = self.store.begin().await?;
        let appointments = tx.list_appointments(filter).await?;
        tx.rollback().await?;
        Ok(appointments)
    }

    /// Pending and Confirmed appointments starting in the next `days` days.
    pub async fn upcoming(&self, location_id: Uuid, days: i64) -> EngineResult<Vec<Appointment>> {
        if days <= 0 {
            return Err(EngineError::validation("Days must be positive"));
        }
        let now = self.clock.now();
        let filter = AppointmentFilter {
            location_id: Some(location_id),
            statuses: AppointmentStatus::BLOCKING.to_vec(),
            start_from: Some(now),
            start_before: Some(now + Duration::days(days)),
            ..Default::default()
        };
        self.list_appointments(&filter).await
    }
}
