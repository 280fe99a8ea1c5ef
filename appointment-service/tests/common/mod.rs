//! Common test utilities for appointment-service integration tests.
#![allow(dead_code)]

use appointment_service::models::{
    Appointment, AppointmentStatus, Client, CreateAppointment, LedgerCategory, LedgerEntry,
    Location, Machine, NewCategory, Product, ProductKind, Professional, ServiceOffering,
};
use appointment_service::services::{
    CategoryStore, ChannelNotifier, Engine, EngineDeps, FixedClock, InMemoryCatalog, MemoryStore,
    NotificationKind, Store,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use service_core::error::AppError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

/// Initialize tracing for tests.
pub fn init_tracing() {
    service_core::observability::init_test_tracing("info,appointment_service=debug");
}

/// Category storage whose provisioning can be switched off to simulate an outage.
pub struct FlakyCategories {
    inner: Arc<MemoryStore>,
    failing: AtomicBool,
}

impl FlakyCategories {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), AppError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "category storage unavailable"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CategoryStore for FlakyCategories {
    async fn get_or_create_root(&self, category: &NewCategory) -> Result<LedgerCategory, AppError> {
        self.check()?;
        self.inner.get_or_create_root(category).await
    }

    async fn find_child(
        &self,
        parent_id: Uuid,
        name: &str,
    ) -> Result<Option<LedgerCategory>, AppError> {
        self.check()?;
        self.inner.find_child(parent_id, name).await
    }

    async fn get_category(&self, category_id: Uuid) -> Result<Option<LedgerCategory>, AppError> {
        self.inner.get_category(category_id).await
    }

    async fn insert_category(&self, category: &NewCategory) -> Result<LedgerCategory, AppError> {
        self.inner.insert_category(category).await
    }

    async fn list_categories(&self, location_id: Uuid) -> Result<Vec<LedgerCategory>, AppError> {
        self.inner.list_categories(location_id).await
    }

    async fn set_category_active(
        &self,
        category_id: Uuid,
        active: bool,
    ) -> Result<Option<LedgerCategory>, AppError> {
        self.inner.set_category_active(category_id, active).await
    }

    async fn count_children(&self, category_id: Uuid) -> Result<i64, AppError> {
        self.inner.count_children(category_id).await
    }

    async fn delete_category(&self, category_id: Uuid) -> Result<bool, AppError> {
        self.inner.delete_category(category_id).await
    }
}

/// Catalog ids seeded for every test.
#[derive(Debug, Clone, Copy)]
pub struct Fixtures {
    pub location_id: Uuid,
    pub other_location_id: Uuid,
    pub client_id: Uuid,
    pub professional_id: Uuid,
    pub other_professional_id: Uuid,
    /// 60 minutes, 1000.00, no machine.
    pub facial_id: Uuid,
    /// 45 minutes, 2500.00, runs on `machine_id`.
    pub laser_id: Uuid,
    pub machine_id: Uuid,
    /// Resale product, list 100, on offer at 80.
    pub serum_id: Uuid,
    /// Supply product, list 40.
    pub gloves_id: Uuid,
}

pub struct TestEngine {
    pub engine: Arc<Engine>,
    pub store: Arc<MemoryStore>,
    pub catalog: Arc<InMemoryCatalog>,
    pub categories: Arc<FlakyCategories>,
    pub clock: Arc<FixedClock>,
    pub notifications: UnboundedReceiver<(NotificationKind, Uuid)>,
    pub fx: Fixtures,
}

/// 2024-05-31 08:00 UTC, the day before the booking scenarios.
pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 31, 8, 0, 0).unwrap()
}

pub fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, day, hour, minute, 0).unwrap()
}

fn seed(catalog: &InMemoryCatalog) -> Fixtures {
    let fx = Fixtures {
        location_id: Uuid::new_v4(),
        other_location_id: Uuid::new_v4(),
        client_id: Uuid::new_v4(),
        professional_id: Uuid::new_v4(),
        other_professional_id: Uuid::new_v4(),
        facial_id: Uuid::new_v4(),
        laser_id: Uuid::new_v4(),
        machine_id: Uuid::new_v4(),
        serum_id: Uuid::new_v4(),
        gloves_id: Uuid::new_v4(),
    };

    for (location_id, name) in [
        (fx.location_id, "Downtown"),
        (fx.other_location_id, "Riverside"),
    ] {
        catalog.put_location(Location {
            location_id,
            name: name.to_string(),
            active: true,
        });
    }
    catalog.put_client(Client {
        client_id: fx.client_id,
        full_name: "Ana Torres".to_string(),
        active: true,
    });
    catalog.put_professional(Professional {
        professional_id: fx.professional_id,
        location_id: fx.location_id,
        full_name: "Laura Diaz".to_string(),
        monthly_salary: Some(dec!(150000)),
        active: true,
    });
    catalog.put_professional(Professional {
        professional_id: fx.other_professional_id,
        location_id: fx.location_id,
        full_name: "Marta Gil".to_string(),
        monthly_salary: None,
        active: true,
    });
    catalog.put_machine(Machine {
        machine_id: fx.machine_id,
        name: "Diode Laser".to_string(),
        daily_cost: dec!(5000),
        active: true,
    });
    catalog.put_service(ServiceOffering {
        service_id: fx.facial_id,
        location_id: fx.location_id,
        name: "Facial".to_string(),
        duration_minutes: 60,
        price: dec!(1000),
        machine_id: None,
        active: true,
    });
    catalog.put_service(ServiceOffering {
        service_id: fx.laser_id,
        location_id: fx.location_id,
        name: "Laser Hair Removal".to_string(),
        duration_minutes: 45,
        price: dec!(2500),
        machine_id: Some(fx.machine_id),
        active: true,
    });
    catalog.put_product(Product {
        product_id: fx.serum_id,
        location_id: fx.location_id,
        name: "Vitamin C Serum".to_string(),
        kind: ProductKind::Resale,
        unit: "units".to_string(),
        list_price: dec!(100),
        cash_price: None,
        on_offer: true,
        offer_price: Some(dec!(80)),
        active: true,
    });
    catalog.put_product(Product {
        product_id: fx.gloves_id,
        location_id: fx.location_id,
        name: "Nitrile Gloves".to_string(),
        kind: ProductKind::Supply,
        unit: "boxes".to_string(),
        list_price: dec!(40),
        cash_price: None,
        on_offer: false,
        offer_price: None,
        active: true,
    });

    fx
}

impl TestEngine {
    pub fn new() -> Self {
        init_tracing();

        let store = Arc::new(MemoryStore::new());
        let categories = Arc::new(FlakyCategories {
            inner: store.clone(),
            failing: AtomicBool::new(false),
        });
        let catalog = Arc::new(InMemoryCatalog::new());
        let fx = seed(&catalog);
        let clock = Arc::new(FixedClock::new(test_now()));
        let (notifier, notifications) = ChannelNotifier::new();

        let engine = Arc::new(Engine::new(EngineDeps {
            store: store.clone(),
            categories: categories.clone(),
            catalog: catalog.clone(),
            notifier: Arc::new(notifier),
            clock: clock.clone(),
            edit_window_days: 30,
        }));

        Self {
            engine,
            store,
            catalog,
            categories,
            clock,
            notifications,
            fx,
        }
    }

    pub fn booking(&self, service_id: Uuid, start: DateTime<Utc>) -> CreateAppointment {
        CreateAppointment {
            location_id: self.fx.location_id,
            client_id: self.fx.client_id,
            service_id,
            professional_id: Some(self.fx.professional_id),
            start_utc: start,
            end_utc: None,
            notes: None,
            created_by: None,
        }
    }

    pub async fn book(&self, service_id: Uuid, start: DateTime<Utc>) -> Appointment {
        self.engine
            .booking
            .create_appointment(&self.booking(service_id, start))
            .await
            .expect("Failed to book appointment")
    }

    /// Books a facial and walks it to Completed, optionally with a deposit first.
    pub async fn completed_facial(&self, start: DateTime<Utc>, deposit: Option<Decimal>) -> Appointment {
        let appt = self.book(self.fx.facial_id, start).await;
        if let Some(amount) = deposit {
            self.engine
                .booking
                .record_deposit(appt.appointment_id, amount)
                .await
                .expect("Failed to record deposit");
        }
        self.engine
            .booking
            .change_status(appt.appointment_id, AppointmentStatus::Completed)
            .await
            .expect("Failed to complete appointment")
            .appointment
    }

    pub async fn all_entries(&self) -> Vec<LedgerEntry> {
        let mut tx = self.store.begin().await.expect("Failed to begin");
        let entries = tx
            .list_entries(&Default::default())
            .await
            .expect("Failed to list entries");
        tx.rollback().await.expect("Failed to roll back");
        entries
    }

    pub async fn entries_for(&self, appointment_id: Uuid) -> Vec<LedgerEntry> {
        self.all_entries()
            .await
            .into_iter()
            .filter(|e| e.appointment_id == Some(appointment_id))
            .collect()
    }

    /// Notifications dispatched so far.
    pub fn drain_notifications(&mut self) -> Vec<(NotificationKind, Uuid)> {
        let mut out = Vec::new();
        while let Ok(n) = self.notifications.try_recv() {
            out.push(n);
        }
        out
    }
}
