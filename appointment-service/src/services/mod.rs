//! Services module for appointment-service.

pub mod booking;
pub mod calendar;
pub mod catalog;
pub mod categories;
pub mod clock;
pub mod database;
pub mod error;
pub mod inventory;
pub mod ledger;
pub mod memory;
pub mod metrics;
pub mod notifier;
pub mod projector;
pub mod reminders;
pub mod rentals;
pub mod store;

pub use booking::BookingEngine;
pub use calendar::ResourceCalendar;
pub use catalog::{Catalog, InMemoryCatalog, PgCatalog};
pub use categories::{CategoryManager, CategoryResolver};
pub use clock::{Clock, FixedClock, SystemClock};
pub use database::Database;
pub use error::{EngineError, EngineResult};
pub use inventory::InventoryRecorder;
pub use ledger::LedgerBook;
pub use memory::MemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use notifier::{ChannelNotifier, LogNotifier, NotificationKind, Notifier};
pub use projector::{Projection, Projector};
pub use reminders::{ReminderReport, ReminderSweep};
pub use rentals::{RentalReconciliation, RentalScheduler};
pub use store::{CategoryStore, Store, StoreTx};

use std::sync::Arc;

/// Collaborators the engine is built from.
#[derive(Clone)]
pub struct EngineDeps {
    pub store: Arc<dyn Store>,
    pub categories: Arc<dyn CategoryStore>,
    pub catalog: Arc<dyn Catalog>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub edit_window_days: i64,
}

/// Every engine component wired over one store, sharing one category cache.
pub struct Engine {
    pub booking: BookingEngine,
    pub rentals: RentalScheduler,
    pub inventory: InventoryRecorder,
    pub ledger: LedgerBook,
    pub categories: CategoryManager,
    pub reminders: ReminderSweep,
    store: Arc<dyn Store>,
}

impl Engine {
    pub fn new(deps: EngineDeps) -> Self {
        let resolver = Arc::new(CategoryResolver::new(deps.categories.clone()));
        let calendar = Arc::new(ResourceCalendar::new(deps.store.clone()));
        let projector = Arc::new(Projector::new(
            resolver.clone(),
            deps.catalog.clone(),
            deps.clock.clone(),
        ));

        Self {
            booking: BookingEngine::new(
                deps.store.clone(),
                deps.catalog.clone(),
                calendar,
                projector.clone(),
                deps.notifier.clone(),
                deps.clock.clone(),
            ),
            rentals: RentalScheduler::new(
                deps.store.clone(),
                deps.catalog.clone(),
                projector.clone(),
                deps.clock.clone(),
            ),
            inventory: InventoryRecorder::new(
                deps.store.clone(),
                deps.catalog.clone(),
                projector,
                deps.clock.clone(),
            ),
            ledger: LedgerBook::new(
                deps.store.clone(),
                deps.categories.clone(),
                resolver,
                deps.catalog.clone(),
                deps.clock.clone(),
                deps.edit_window_days,
            ),
            categories: CategoryManager::new(deps.store.clone(), deps.categories),
            reminders: ReminderSweep::new(deps.store.clone(), deps.notifier, deps.clock),
            store: deps.store,
        }
    }

    pub async fn health_check(&self) -> EngineResult<()> {
        Ok(self.store.health_check().await?)
    }
}
