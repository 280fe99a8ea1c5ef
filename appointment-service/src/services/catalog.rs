//! Read-only catalog lookups (locations, clients, services, staff, products, machines).
//!
//! Lookups return `None` for unknown ids; inactive records are returned as-is so
//! callers can tell "not found" apart from "inactive".

use crate::models::{
    Client, Location, Machine, Product, ProductKind, Professional, ServiceOffering,
};
use crate::services::error::{EngineError, EngineResult};
use crate::services::metrics::DB_QUERY_DURATION;
use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use tracing::instrument;
use uuid::Uuid;

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get_location(&self, location_id: Uuid) -> Result<Option<Location>, AppError>;

    async fn get_client(&self, client_id: Uuid) -> Result<Option<Client>, AppError>;

    async fn get_service(&self, service_id: Uuid) -> Result<Option<ServiceOffering>, AppError>;

    async fn get_professional(
        &self,
        professional_id: Uuid,
    ) -> Result<Option<Professional>, AppError>;

    async fn list_professionals(&self, location_id: Uuid) -> Result<Vec<Professional>, AppError>;

    async fn get_product(&self, product_id: Uuid) -> Result<Option<Product>, AppError>;

    async fn get_machine(&self, machine_id: Uuid) -> Result<Option<Machine>, AppError>;
}

/// Catalog record with an active flag.
pub trait CatalogRecord {
    const KIND: &'static str;

    fn is_active(&self) -> bool;
}

macro_rules! catalog_record {
    ($ty:ty, $kind:literal) => {
        impl CatalogRecord for $ty {
            const KIND: &'static str = $kind;

            fn is_active(&self) -> bool {
                self.active
            }
        }
    };
}

catalog_record!(Location, "Location");
catalog_record!(Client, "Client");
catalog_record!(ServiceOffering, "Service");
catalog_record!(Professional, "Professional");
catalog_record!(Product, "Product");
catalog_record!(Machine, "Machine");

/// Missing maps to `NotFound`, inactive to `Validation`.
pub fn require_active<T: CatalogRecord>(record: Option<T>, id: Uuid) -> EngineResult<T> {
    match record {
        None => Err(EngineError::not_found(format!("{} {} not found", T::KIND, id))),
        Some(r) if !r.is_active() => Err(EngineError::validation(format!(
            "{} {} is inactive",
            T::KIND,
            id
        ))),
        Some(r) => Ok(r),
    }
}

// =============================================================================
// In-memory catalog
// =============================================================================

/// Catalog held in process memory; used by tests and local runs.
#[derive(Default)]
pub struct InMemoryCatalog {
    locations: DashMap<Uuid, Location>,
    clients: DashMap<Uuid, Client>,
    services: DashMap<Uuid, ServiceOffering>,
    professionals: DashMap<Uuid, Professional>,
    products: DashMap<Uuid, Product>,
    machines: DashMap<Uuid, Machine>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_location(&self, location: Location) {
        self.locations.insert(location.location_id, location);
    }

    pub fn put_client(&self, client: Client) {
        self.clients.insert(client.client_id, client);
    }

    pub fn put_service(&self, service: ServiceOffering) {
        self.services.insert(service.service_id, service);
    }

    pub fn put_professional(&self, professional: Professional) {
        self.professionals
            .insert(professional.professional_id, professional);
    }

    pub fn put_product(&self, product: Product) {
        self.products.insert(product.product_id, product);
    }

    pub fn put_machine(&self, machine: Machine) {
        self.machines.insert(machine.machine_id, machine);
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn get_location(&self, location_id: Uuid) -> Result<Option<Location>, AppError> {
        Ok(self.locations.get(&location_id).map(|r| r.clone()))
    }

    async fn get_client(&self, client_id: Uuid) -> Result<Option<Client>, AppError> {
        Ok(self.clients.get(&client_id).map(|r| r.clone()))
    }

    async fn get_service(&self, service_id: Uuid) -> Result<Option<ServiceOffering>, AppError> {
        Ok(self.services.get(&service_id).map(|r| r.clone()))
    }

    async fn get_professional(
        &self,
        professional_id: Uuid,
    ) -> Result<Option<Professional>, AppError> {
        Ok(self.professionals.get(&professional_id).map(|r| r.clone()))
    }

    async fn list_professionals(&self, location_id: Uuid) -> Result<Vec<Professional>, AppError> {
        let mut professionals: Vec<Professional> = self
            .professionals
            .iter()
            .filter(|p| p.location_id == location_id)
            .map(|p| p.clone())
            .collect();
        professionals.sort_by(|a, b| a.full_name.cmp(&b.full_name));
        Ok(professionals)
    }

    async fn get_product(&self, product_id: Uuid) -> Result<Option<Product>, AppError> {
        Ok(self.products.get(&product_id).map(|r| r.clone()))
    }

    async fn get_machine(&self, machine_id: Uuid) -> Result<Option<Machine>, AppError> {
        Ok(self.machines.get(&machine_id).map(|r| r.clone()))
    }
}

// =============================================================================
// PostgreSQL catalog
// =============================================================================

/// Catalog backed by the shared catalog tables.
#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

#[derive(FromRow)]
struct ProductRow {
    product_id: Uuid,
    location_id: Uuid,
    name: String,
    kind: String,
    unit: String,
    list_price: Decimal,
    cash_price: Option<Decimal>,
    on_offer: bool,
    offer_price: Option<Decimal>,
    active: bool,
}

impl TryFrom<ProductRow> for Product {
    type Error = AppError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        let kind = ProductKind::from_string(&row.kind).ok_or_else(|| {
            AppError::DatabaseError(anyhow::anyhow!("Unknown product kind: {}", row.kind))
        })?;
        Ok(Product {
            product_id: row.product_id,
            location_id: row.location_id,
            name: row.name,
            kind,
            unit: row.unit,
            list_price: row.list_price,
            cash_price: row.cash_price,
            on_offer: row.on_offer,
            offer_price: row.offer_price,
            active: row.active,
        })
    }
}

#[derive(FromRow)]
struct LocationRow {
    location_id: Uuid,
    name: String,
    active: bool,
}

#[derive(FromRow)]
struct ClientRow {
    client_id: Uuid,
    full_name: String,
    active: bool,
}

#[derive(FromRow)]
struct ServiceRow {
    service_id: Uuid,
    location_id: Uuid,
    name: String,
    duration_minutes: i32,
    price: Decimal,
    machine_id: Option<Uuid>,
    active: bool,
}

#[derive(FromRow)]
struct ProfessionalRow {
    professional_id: Uuid,
    location_id: Uuid,
    full_name: String,
    monthly_salary: Option<Decimal>,
    active: bool,
}

#[derive(FromRow)]
struct MachineRow {
    machine_id: Uuid,
    name: String,
    daily_cost: Decimal,
    active: bool,
}

fn professional_from_row(r: ProfessionalRow) -> Professional {
    Professional {
        professional_id: r.professional_id,
        location_id: r.location_id,
        full_name: r.full_name,
        monthly_salary: r.monthly_salary,
        active: r.active,
    }
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    #[instrument(skip(self))]
    async fn get_location(&self, location_id: Uuid) -> Result<Option<Location>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_location"])
            .start_timer();

        let row = sqlx::query_as::<_, LocationRow>(
            "SELECT location_id, name, active FROM locations WHERE location_id = $1",
        )
        .bind(location_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get location: {}", e)))?;

        timer.observe_duration();
        Ok(row.map(|r| Location {
            location_id: r.location_id,
            name: r.name,
            active: r.active,
        }))
    }

    #[instrument(skip(self))]
    async fn get_client(&self, client_id: Uuid) -> Result<Option<Client>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_client"])
            .start_timer();

        let row = sqlx::query_as::<_, ClientRow>(
            "SELECT client_id, full_name, active FROM clients WHERE client_id = $1",
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get client: {}", e)))?;

        timer.observe_duration();
        Ok(row.map(|r| Client {
            client_id: r.client_id,
            full_name: r.full_name,
            active: r.active,
        }))
    }

    #[instrument(skip(self))]
    async fn get_service(&self, service_id: Uuid) -> Result<Option<ServiceOffering>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_service"])
            .start_timer();

        let row = sqlx::query_as::<_, ServiceRow>(
            r#"
            SELECT service_id, location_id, name, duration_minutes, price, machine_id, active
            FROM services
            WHERE service_id = $1
            "#,
        )
        .bind(service_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get service: {}", e)))?;

        timer.observe_duration();
        Ok(row.map(|r| ServiceOffering {
            service_id: r.service_id,
            location_id: r.location_id,
            name: r.name,
            duration_minutes: r.duration_minutes,
            price: r.price,
            machine_id: r.machine_id,
            active: r.active,
        }))
    }

    #[instrument(skip(self))]
    async fn get_professional(
        &self,
        professional_id: Uuid,
    ) -> Result<Option<Professional>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_professional"])
            .start_timer();

        let row = sqlx::query_as::<_, ProfessionalRow>(
            r#"
            SELECT professional_id, location_id, full_name, monthly_salary, active
            FROM professionals
            WHERE professional_id = $1
            "#,
        )
        .bind(professional_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get professional: {}", e))
        })?;

        timer.observe_duration();
        Ok(row.map(professional_from_row))
    }

    #[instrument(skip(self))]
    async fn list_professionals(&self, location_id: Uuid) -> Result<Vec<Professional>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_professionals"])
            .start_timer();

        let rows = sqlx::query_as::<_, ProfessionalRow>(
            r#"
            SELECT professional_id, location_id, full_name, monthly_salary, active
            FROM professionals
            WHERE location_id = $1
            ORDER BY full_name
            "#,
        )
        .bind(location_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list professionals: {}", e))
        })?;

        timer.observe_duration();
        Ok(rows.into_iter().map(professional_from_row).collect())
    }

    #[instrument(skip(self))]
    async fn get_product(&self, product_id: Uuid) -> Result<Option<Product>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_product"])
            .start_timer();

        let row = sqlx::query_as::<_, ProductRow>(
            r#"
            SELECT product_id, location_id, name, kind, unit, list_price, cash_price,
                   on_offer, offer_price, active
            FROM products
            WHERE product_id = $1
            "#,
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get product: {}", e)))?;

        timer.observe_duration();
        row.map(Product::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn get_machine(&self, machine_id: Uuid) -> Result<Option<Machine>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_machine"])
            .start_timer();

        let row = sqlx::query_as::<_, MachineRow>(
            "SELECT machine_id, name, daily_cost, active FROM machines WHERE machine_id = $1",
        )
        .bind(machine_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get machine: {}", e)))?;

        timer.observe_duration();
        Ok(row.map(|r| Machine {
            machine_id: r.machine_id,
            name: r.name,
            daily_cost: r.daily_cost,
            active: r.active,
        }))
    }
}
