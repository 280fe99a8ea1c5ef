//! Domain models for appointment-service.

mod appointment;
mod catalog;
mod category;
mod entry;
mod event;
mod movement;
mod rental;

pub use appointment::{
    Appointment, AppointmentFilter, AppointmentStatus, Availability, CreateAppointment,
    PaymentStatus,
};
pub use catalog::{
    Client, EffectivePrice, Location, Machine, Product, ProductKind, Professional,
    ServiceOffering,
};
pub use category::{
    CategoryIntent, CategoryType, LedgerCategory, NewCategory, SystemCategory,
    SUPPLIES_SUBCATEGORY,
};
pub use entry::{
    CategoryTotal, EntryFilter, EntryType, LedgerEntry, LedgerSummary, ManualEntry,
    NewLedgerEntry, PaymentMethod, PaymentMethodTotal, SourceKey, SourceKind, UpdateEntry,
};
pub use event::{AppointmentOutcome, DomainEvent, MovementOutcome, ProjectionWarning};
pub use movement::{InventoryMovement, MovementKind, RecordMovement};
pub use rental::{EquipmentRental, PendingConfirmation, RentalFilter, RentalState, ScheduleRental};
