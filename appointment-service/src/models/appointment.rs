//! Appointment model and its two state machines (visit status, payment status).

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Visit status of an appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Canceled,
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Canceled => "canceled",
            AppointmentStatus::NoShow => "no_show",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AppointmentStatus::Pending),
            "confirmed" => Some(AppointmentStatus::Confirmed),
            "completed" => Some(AppointmentStatus::Completed),
            "canceled" => Some(AppointmentStatus::Canceled),
            "no_show" => Some(AppointmentStatus::NoShow),
            _ => None,
        }
    }

    /// Statuses that hold a slot on the professional's calendar.
    pub const BLOCKING: [AppointmentStatus; 2] =
        [AppointmentStatus::Pending, AppointmentStatus::Confirmed];

    pub fn blocks_calendar(&self) -> bool {
        Self::BLOCKING.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Canceled | AppointmentStatus::NoShow
        )
    }

    /// Forward-only transitions; Pending and Confirmed may swap back and forth.
    pub fn can_transition_to(&self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        match (self, next) {
            (Pending, Confirmed) | (Confirmed, Pending) => true,
            (Pending | Confirmed, Completed | Canceled | NoShow) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payment progress; only ever advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    DepositPaid,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::DepositPaid => "deposit_paid",
            PaymentStatus::Paid => "paid",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "unpaid" => Some(PaymentStatus::Unpaid),
            "deposit_paid" => Some(PaymentStatus::DepositPaid),
            "paid" => Some(PaymentStatus::Paid),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            PaymentStatus::Unpaid => 0,
            PaymentStatus::DepositPaid => 1,
            PaymentStatus::Paid => 2,
        }
    }

    pub fn can_advance_to(&self, next: PaymentStatus) -> bool {
        next.rank() > self.rank()
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A scheduled service for a client at a location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub appointment_id: Uuid,
    pub location_id: Uuid,
    pub client_id: Uuid,
    pub service_id: Uuid,
    pub professional_id: Option<Uuid>,
    /// Rental machine the service needed when it was booked.
    pub machine_id: Option<Uuid>,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub payment_status: PaymentStatus,
    /// Service price captured at booking time.
    pub total_amount: Decimal,
    pub deposit_amount: Option<Decimal>,
    pub notes: Option<String>,
    pub reminder_24h_sent: bool,
    pub reminder_2h_sent: bool,
    pub created_by: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Appointment {
    /// Half-open `[start, end)` overlap test.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_utc < end && self.end_utc > start
    }

    /// Calendar day the service is delivered on (UTC).
    pub fn service_date(&self) -> NaiveDate {
        self.start_utc.date_naive()
    }

    /// What is still owed at completion time.
    pub fn remaining_balance(&self) -> Decimal {
        match (self.payment_status, self.deposit_amount) {
            (PaymentStatus::DepositPaid, Some(deposit)) => self.total_amount - deposit,
            (PaymentStatus::Paid, _) => Decimal::ZERO,
            _ => self.total_amount,
        }
    }
}

/// Input for booking an appointment.
#[derive(Debug, Clone)]
pub struct CreateAppointment {
    pub location_id: Uuid,
    pub client_id: Uuid,
    pub service_id: Uuid,
    pub professional_id: Option<Uuid>,
    pub start_utc: DateTime<Utc>,
    /// Defaults to start + service duration.
    pub end_utc: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
}

/// Filter for listing appointments; empty `statuses` means any status.
#[derive(Debug, Clone, Default)]
pub struct AppointmentFilter {
    pub location_id: Option<Uuid>,
    pub professional_id: Option<Uuid>,
    pub machine_id: Option<Uuid>,
    pub statuses: Vec<AppointmentStatus>,
    pub start_from: Option<DateTime<Utc>>,
    pub start_before: Option<DateTime<Utc>>,
}

impl AppointmentFilter {
    pub fn matches(&self, appt: &Appointment) -> bool {
        self.location_id.is_none_or(|id| appt.location_id == id)
            && self
                .professional_id
                .is_none_or(|id| appt.professional_id == Some(id))
            && self.machine_id.is_none_or(|id| appt.machine_id == Some(id))
            && (self.statuses.is_empty() || self.statuses.contains(&appt.status))
            && self.start_from.is_none_or(|t| appt.start_utc >= t)
            && self.start_before.is_none_or(|t| appt.start_utc < t)
    }
}

/// Result of an availability query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Availability {
    pub available: bool,
    pub conflicts: Vec<Appointment>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn appointment(start_hour: u32, end_hour: u32) -> Appointment {
        let day = |h| Utc.with_ymd_and_hms(2024, 6, 1, h, 0, 0).unwrap();
        Appointment {
            appointment_id: Uuid::new_v4(),
            location_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            service_id: Uuid::new_v4(),
            professional_id: None,
            machine_id: None,
            start_utc: day(start_hour),
            end_utc: day(end_hour),
            status: AppointmentStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            total_amount: Decimal::from(1000),
            deposit_amount: None,
            notes: None,
            reminder_24h_sent: false,
            reminder_2h_sent: false,
            created_by: None,
            created_utc: day(0),
            updated_utc: day(0),
        }
    }

    #[test]
    fn touching_intervals_do_not_overlap() {
        let existing = appointment(10, 11);
        let at = |h| Utc.with_ymd_and_hms(2024, 6, 1, h, 0, 0).unwrap();
        assert!(!existing.overlaps(at(11), at(12)));
        assert!(!existing.overlaps(at(9), at(10)));
        assert!(existing.overlaps(at(9), at(11)));
    }

    #[test]
    fn terminal_statuses_cannot_be_left() {
        use AppointmentStatus::*;
        for terminal in [Completed, Canceled, NoShow] {
            for next in [Pending, Confirmed, Completed, Canceled, NoShow] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Confirmed.can_transition_to(Pending));
        assert!(Confirmed.can_transition_to(NoShow));
    }

    #[test]
    fn payment_status_is_monotonic() {
        use PaymentStatus::*;
        assert!(Unpaid.can_advance_to(DepositPaid));
        assert!(Unpaid.can_advance_to(Paid));
        assert!(DepositPaid.can_advance_to(Paid));
        assert!(!Paid.can_advance_to(DepositPaid));
        assert!(!DepositPaid.can_advance_to(Unpaid));
        assert!(!DepositPaid.can_advance_to(DepositPaid));
    }

    #[test]
    fn remaining_balance_subtracts_paid_deposit() {
        let mut appt = appointment(10, 11);
        assert_eq!(appt.remaining_balance(), Decimal::from(1000));
        appt.deposit_amount = Some(Decimal::from(300));
        appt.payment_status = PaymentStatus::DepositPaid;
        assert_eq!(appt.remaining_balance(), Decimal::from(700));
    }
}
