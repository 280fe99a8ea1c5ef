//! Equipment rental model: one machine, one location, one day.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RentalState {
    Scheduled,
    Confirmed,
    Canceled,
    Charged,
}

impl RentalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RentalState::Scheduled => "scheduled",
            RentalState::Confirmed => "confirmed",
            RentalState::Canceled => "canceled",
            RentalState::Charged => "charged",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(RentalState::Scheduled),
            "confirmed" => Some(RentalState::Confirmed),
            "canceled" => Some(RentalState::Canceled),
            "charged" => Some(RentalState::Charged),
            _ => None,
        }
    }

    /// Rental cost may be expensed for the day.
    pub fn allows_charge(&self) -> bool {
        matches!(self, RentalState::Confirmed | RentalState::Charged)
    }
}

impl std::fmt::Display for RentalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentRental {
    pub rental_id: Uuid,
    pub machine_id: Uuid,
    pub location_id: Uuid,
    pub rental_date: NaiveDate,
    pub state: RentalState,
    /// Fixed daily cost agreed for the day.
    pub cost: Decimal,
    /// Expense entry created when the rental was charged.
    pub entry_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Input for scheduling a rental.
#[derive(Debug, Clone)]
pub struct ScheduleRental {
    pub machine_id: Uuid,
    pub location_id: Uuid,
    pub rental_date: NaiveDate,
    /// Defaults to the machine's daily cost.
    pub cost: Option<Decimal>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RentalFilter {
    pub location_id: Option<Uuid>,
    pub state: Option<RentalState>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl RentalFilter {
    pub fn matches(&self, rental: &EquipmentRental) -> bool {
        self.location_id.is_none_or(|id| rental.location_id == id)
            && self.state.is_none_or(|s| rental.state == s)
            && self.from.is_none_or(|d| rental.rental_date >= d)
            && self.to.is_none_or(|d| rental.rental_date <= d)
    }
}

/// Machine-day with booked appointments but no confirmed rental.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingConfirmation {
    pub machine_id: Uuid,
    pub location_id: Uuid,
    pub rental_date: NaiveDate,
    pub appointment_ids: Vec<Uuid>,
    /// State of the existing rental row, if one was scheduled.
    pub rental_state: Option<RentalState>,
}
