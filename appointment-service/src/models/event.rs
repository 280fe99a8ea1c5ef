//! Named domain events dispatched synchronously inside the mutating transaction.

use super::{Appointment, InventoryMovement, LedgerEntry};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub enum DomainEvent {
    AppointmentCreated(Appointment),
    AppointmentConfirmed(Appointment),
    AppointmentCanceled(Appointment),
    AppointmentCompleted(Appointment),
    AppointmentNoShow(Appointment),
    DepositPaid(Appointment),
    MovementRecorded(InventoryMovement),
    MovementDeleted(InventoryMovement),
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::AppointmentCreated(_) => "appointment_created",
            DomainEvent::AppointmentConfirmed(_) => "appointment_confirmed",
            DomainEvent::AppointmentCanceled(_) => "appointment_canceled",
            DomainEvent::AppointmentCompleted(_) => "appointment_completed",
            DomainEvent::AppointmentNoShow(_) => "appointment_no_show",
            DomainEvent::DepositPaid(_) => "deposit_paid",
            DomainEvent::MovementRecorded(_) => "movement_recorded",
            DomainEvent::MovementDeleted(_) => "movement_deleted",
        }
    }
}

/// A projection rule that failed while its triggering change still committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionWarning {
    pub rule: String,
    pub source_event_id: String,
    pub message: String,
}

/// Result of an appointment operation plus any projection failures.
#[derive(Debug, Clone)]
pub struct AppointmentOutcome {
    pub appointment: Appointment,
    /// Entries created by this call (duplicates of earlier deliveries excluded).
    pub entries: Vec<LedgerEntry>,
    pub warnings: Vec<ProjectionWarning>,
}

impl AppointmentOutcome {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct MovementOutcome {
    pub movement: InventoryMovement,
    pub entries: Vec<LedgerEntry>,
    pub warnings: Vec<ProjectionWarning>,
}
