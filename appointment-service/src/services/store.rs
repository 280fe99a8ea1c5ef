//! Persistence seams.
//!
//! Every engine operation runs inside one [`StoreTx`]: the calendar check, the
//! state change and the ledger projection either commit together or not at all.
//! Category provisioning goes through [`CategoryStore`] instead, outside the
//! business transaction, so a provisioned category survives a rolled-back
//! operation and can be cached safely.

use crate::models::{
    Appointment, AppointmentFilter, EntryFilter, EquipmentRental, InventoryMovement,
    LedgerCategory, LedgerEntry, NewCategory, RentalFilter, SourceKey,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError>;

    async fn health_check(&self) -> Result<(), AppError>;
}

#[async_trait]
pub trait StoreTx: Send {
    async fn commit(self: Box<Self>) -> Result<(), AppError>;

    async fn rollback(self: Box<Self>) -> Result<(), AppError>;

    async fn savepoint(&mut self, name: &str) -> Result<(), AppError>;

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), AppError>;

    async fn release_savepoint(&mut self, name: &str) -> Result<(), AppError>;

    // ---------------------------------------------------------------------
    // Calendar
    // ---------------------------------------------------------------------

    /// Serializes calendar writes for one professional until the transaction ends.
    async fn lock_professional(&mut self, professional_id: Uuid) -> Result<(), AppError>;

    /// Pending/Confirmed appointments of the professional overlapping `[start, end)`.
    async fn find_overlapping(
        &mut self,
        professional_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Appointment>, AppError>;

    // ---------------------------------------------------------------------
    // Appointments
    // ---------------------------------------------------------------------

    async fn insert_appointment(&mut self, appointment: &Appointment) -> Result<(), AppError>;

    /// Fetch and lock the row for the rest of the transaction.
    async fn get_appointment(&mut self, appointment_id: Uuid)
        -> Result<Option<Appointment>, AppError>;

    async fn update_appointment(&mut self, appointment: &Appointment) -> Result<(), AppError>;

    /// Matching appointments ordered by start time.
    async fn list_appointments(
        &mut self,
        filter: &AppointmentFilter,
    ) -> Result<Vec<Appointment>, AppError>;

    // ---------------------------------------------------------------------
    // Ledger entries
    // ---------------------------------------------------------------------

    /// Insert-or-fetch on the entry's source key; `created` is false when an
    /// entry for the same key already existed. Entries without a source key
    /// are always inserted.
    async fn insert_entry(&mut self, entry: &LedgerEntry) -> Result<(LedgerEntry, bool), AppError>;

    async fn get_entry(&mut self, entry_id: Uuid) -> Result<Option<LedgerEntry>, AppError>;

    async fn find_entry_by_source(
        &mut self,
        source: &SourceKey,
    ) -> Result<Option<LedgerEntry>, AppError>;

    async fn update_entry(&mut self, entry: &LedgerEntry) -> Result<(), AppError>;

    async fn delete_entry(&mut self, entry_id: Uuid) -> Result<bool, AppError>;

    /// Matching entries ordered by date, then creation time.
    async fn list_entries(&mut self, filter: &EntryFilter) -> Result<Vec<LedgerEntry>, AppError>;

    async fn count_entries_in_category(&mut self, category_id: Uuid) -> Result<i64, AppError>;

    // ---------------------------------------------------------------------
    // Inventory
    // ---------------------------------------------------------------------

    /// Current stock, locked for the rest of the transaction. Zero when never stocked.
    async fn stock_level(&mut self, product_id: Uuid) -> Result<Decimal, AppError>;

    async fn set_stock_level(&mut self, product_id: Uuid, quantity: Decimal)
        -> Result<(), AppError>;

    async fn insert_movement(&mut self, movement: &InventoryMovement) -> Result<(), AppError>;

    async fn get_movement(&mut self, movement_id: Uuid)
        -> Result<Option<InventoryMovement>, AppError>;

    async fn delete_movement(&mut self, movement_id: Uuid) -> Result<bool, AppError>;

    // ---------------------------------------------------------------------
    // Equipment rentals
    // ---------------------------------------------------------------------

    /// Fetch and lock the rental for a machine-day.
    async fn find_rental(
        &mut self,
        machine_id: Uuid,
        location_id: Uuid,
        rental_date: NaiveDate,
    ) -> Result<Option<EquipmentRental>, AppError>;

    async fn get_rental(&mut self, rental_id: Uuid) -> Result<Option<EquipmentRental>, AppError>;

    /// Fails with `AppError::Conflict` when the machine-day is already scheduled.
    async fn insert_rental(&mut self, rental: &EquipmentRental) -> Result<(), AppError>;

    async fn update_rental(&mut self, rental: &EquipmentRental) -> Result<(), AppError>;

    async fn list_rentals(&mut self, filter: &RentalFilter)
        -> Result<Vec<EquipmentRental>, AppError>;
}

/// Category storage with get-or-create on `(location, name, type, parent = none)`.
#[async_trait]
pub trait CategoryStore: Send + Sync {
    /// Returns the existing root category or creates it. Safe under concurrency.
    async fn get_or_create_root(&self, category: &NewCategory)
        -> Result<LedgerCategory, AppError>;

    async fn find_child(
        &self,
        parent_id: Uuid,
        name: &str,
    ) -> Result<Option<LedgerCategory>, AppError>;

    async fn get_category(&self, category_id: Uuid) -> Result<Option<LedgerCategory>, AppError>;

    async fn insert_category(&self, category: &NewCategory) -> Result<LedgerCategory, AppError>;

    async fn list_categories(&self, location_id: Uuid) -> Result<Vec<LedgerCategory>, AppError>;

    async fn set_category_active(
        &self,
        category_id: Uuid,
        active: bool,
    ) -> Result<Option<LedgerCategory>, AppError>;

    async fn count_children(&self, category_id: Uuid) -> Result<i64, AppError>;

    async fn delete_category(&self, category_id: Uuid) -> Result<bool, AppError>;
}
