//! PostgreSQL store for appointment-service.

use crate::models::{
    Appointment, AppointmentFilter, AppointmentStatus, CategoryType, EntryFilter, EntryType,
    EquipmentRental, InventoryMovement, LedgerCategory, LedgerEntry, MovementKind, NewCategory,
    PaymentMethod, PaymentStatus, RentalFilter, RentalState, SourceKey, SourceKind,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{CategoryStore, Store, StoreTx};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

fn db_error(context: &str, e: sqlx::Error) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!("Failed to {}: {}", context, e))
}

fn corrupt(column: &str, value: &str) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!("Unexpected {} value: {}", column, value))
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "appointment-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl Store for Database {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("begin transaction", e))?;
        Ok(Box::new(PgTx { tx }))
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }
}

// =============================================================================
// Row mapping
// =============================================================================

const APPOINTMENT_COLUMNS: &str = "appointment_id, location_id, client_id, service_id, \
    professional_id, machine_id, start_utc, end_utc, status, payment_status, total_amount, \
    deposit_amount, notes, reminder_24h_sent, reminder_2h_sent, created_by, created_utc, updated_utc";

const ENTRY_COLUMNS: &str = "entry_id, location_id, category_id, entry_type, amount, \
    payment_method, entry_date, description, client_id, appointment_id, product_id, movement_id, \
    rental_id, professional_id, auto_generated, source_kind, source_id, source_rule, created_by, \
    created_utc, updated_utc";

const MOVEMENT_COLUMNS: &str = "movement_id, location_id, product_id, kind, quantity, unit_cost, \
    unit_price, previous_stock, new_stock, reason, payment_method, client_id, appointment_id, \
    created_by, created_utc";

const RENTAL_COLUMNS: &str = "rental_id, machine_id, location_id, rental_date, state, cost, \
    entry_id, notes, created_utc, updated_utc";

const CATEGORY_COLUMNS: &str = "category_id, location_id, name, category_type, parent_id, color, \
    sort_order, is_system, is_active, created_utc";

#[derive(FromRow)]
struct AppointmentRow {
    appointment_id: Uuid,
    location_id: Uuid,
    client_id: Uuid,
    service_id: Uuid,
    professional_id: Option<Uuid>,
    machine_id: Option<Uuid>,
    start_utc: DateTime<Utc>,
    end_utc: DateTime<Utc>,
    status: String,
    payment_status: String,
    total_amount: Decimal,
    deposit_amount: Option<Decimal>,
    notes: Option<String>,
    reminder_24h_sent: bool,
    reminder_2h_sent: bool,
    created_by: Option<Uuid>,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = AppError;

    fn try_from(r: AppointmentRow) -> Result<Self, Self::Error> {
        Ok(Appointment {
            status: AppointmentStatus::from_string(&r.status)
                .ok_or_else(|| corrupt("status", &r.status))?,
            payment_status: PaymentStatus::from_string(&r.payment_status)
                .ok_or_else(|| corrupt("payment_status", &r.payment_status))?,
            appointment_id: r.appointment_id,
            location_id: r.location_id,
            client_id: r.client_id,
            service_id: r.service_id,
            professional_id: r.professional_id,
            machine_id: r.machine_id,
            start_utc: r.start_utc,
            end_utc: r.end_utc,
            total_amount: r.total_amount,
            deposit_amount: r.deposit_amount,
            notes: r.notes,
            reminder_24h_sent: r.reminder_24h_sent,
            reminder_2h_sent: r.reminder_2h_sent,
            created_by: r.created_by,
            created_utc: r.created_utc,
            updated_utc: r.updated_utc,
        })
    }
}

#[derive(FromRow)]
struct EntryRow {
    entry_id: Uuid,
    location_id: Uuid,
    category_id: Uuid,
    entry_type: String,
    amount: Decimal,
    payment_method: String,
    entry_date: NaiveDate,
    description: String,
    client_id: Option<Uuid>,
    appointment_id: Option<Uuid>,
    product_id: Option<Uuid>,
    movement_id: Option<Uuid>,
    rental_id: Option<Uuid>,
    professional_id: Option<Uuid>,
    auto_generated: bool,
    source_kind: Option<String>,
    source_id: Option<Uuid>,
    source_rule: Option<String>,
    created_by: Option<Uuid>,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl TryFrom<EntryRow> for LedgerEntry {
    type Error = AppError;

    fn try_from(r: EntryRow) -> Result<Self, Self::Error> {
        let source = match (r.source_kind, r.source_id, r.source_rule) {
            (Some(kind), Some(source_id), Some(rule)) => Some(SourceKey::new(
                SourceKind::from_string(&kind).ok_or_else(|| corrupt("source_kind", &kind))?,
                source_id,
                rule,
            )),
            _ => None,
        };
        Ok(LedgerEntry {
            entry_type: EntryType::from_string(&r.entry_type)
                .ok_or_else(|| corrupt("entry_type", &r.entry_type))?,
            payment_method: PaymentMethod::from_string(&r.payment_method)
                .ok_or_else(|| corrupt("payment_method", &r.payment_method))?,
            entry_id: r.entry_id,
            location_id: r.location_id,
            category_id: r.category_id,
            amount: r.amount,
            entry_date: r.entry_date,
            description: r.description,
            client_id: r.client_id,
            appointment_id: r.appointment_id,
            product_id: r.product_id,
            movement_id: r.movement_id,
            rental_id: r.rental_id,
            professional_id: r.professional_id,
            auto_generated: r.auto_generated,
            source,
            created_by: r.created_by,
            created_utc: r.created_utc,
            updated_utc: r.updated_utc,
        })
    }
}

#[derive(FromRow)]
struct MovementRow {
    movement_id: Uuid,
    location_id: Uuid,
    product_id: Uuid,
    kind: String,
    quantity: Decimal,
    unit_cost: Option<Decimal>,
    unit_price: Option<Decimal>,
    previous_stock: Decimal,
    new_stock: Decimal,
    reason: Option<String>,
    payment_method: String,
    client_id: Option<Uuid>,
    appointment_id: Option<Uuid>,
    created_by: Option<Uuid>,
    created_utc: DateTime<Utc>,
}

impl TryFrom<MovementRow> for InventoryMovement {
    type Error = AppError;

    fn try_from(r: MovementRow) -> Result<Self, Self::Error> {
        Ok(InventoryMovement {
            kind: MovementKind::from_string(&r.kind).ok_or_else(|| corrupt("kind", &r.kind))?,
            payment_method: PaymentMethod::from_string(&r.payment_method)
                .ok_or_else(|| corrupt("payment_method", &r.payment_method))?,
            movement_id: r.movement_id,
            location_id: r.location_id,
            product_id: r.product_id,
            quantity: r.quantity,
            unit_cost: r.unit_cost,
            unit_price: r.unit_price,
            previous_stock: r.previous_stock,
            new_stock: r.new_stock,
            reason: r.reason,
            client_id: r.client_id,
            appointment_id: r.appointment_id,
            created_by: r.created_by,
            created_utc: r.created_utc,
        })
    }
}

#[derive(FromRow)]
struct RentalRow {
    rental_id: Uuid,
    machine_id: Uuid,
    location_id: Uuid,
    rental_date: NaiveDate,
    state: String,
    cost: Decimal,
    entry_id: Option<Uuid>,
    notes: Option<String>,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl TryFrom<RentalRow> for EquipmentRental {
    type Error = AppError;

    fn try_from(r: RentalRow) -> Result<Self, Self::Error> {
        Ok(EquipmentRental {
            state: RentalState::from_string(&r.state).ok_or_else(|| corrupt("state", &r.state))?,
            rental_id: r.rental_id,
            machine_id: r.machine_id,
            location_id: r.location_id,
            rental_date: r.rental_date,
            cost: r.cost,
            entry_id: r.entry_id,
            notes: r.notes,
            created_utc: r.created_utc,
            updated_utc: r.updated_utc,
        })
    }
}

#[derive(FromRow)]
struct CategoryRow {
    category_id: Uuid,
    location_id: Uuid,
    name: String,
    category_type: String,
    parent_id: Option<Uuid>,
    color: String,
    sort_order: i32,
    is_system: bool,
    is_active: bool,
    created_utc: DateTime<Utc>,
}

impl TryFrom<CategoryRow> for LedgerCategory {
    type Error = AppError;

    fn try_from(r: CategoryRow) -> Result<Self, Self::Error> {
        Ok(LedgerCategory {
            category_type: CategoryType::from_string(&r.category_type)
                .ok_or_else(|| corrupt("category_type", &r.category_type))?,
            category_id: r.category_id,
            location_id: r.location_id,
            name: r.name,
            parent_id: r.parent_id,
            color: r.color,
            sort_order: r.sort_order,
            is_system: r.is_system,
            is_active: r.is_active,
            created_utc: r.created_utc,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, AppError>
where
    T: TryFrom<R, Error = AppError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Advisory lock key for a professional's calendar.
fn calendar_lock_key(professional_id: Uuid) -> i64 {
    professional_id.as_u64_pair().0 as i64
}

// =============================================================================
// Transaction
// =============================================================================

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.tx
            .commit()
            .await
            .map_err(|e| db_error("commit transaction", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| db_error("roll back transaction", e))
    }

    async fn savepoint(&mut self, name: &str) -> Result<(), AppError> {
        sqlx::query(&format!("SAVEPOINT {}", name))
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("create savepoint", e))?;
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), AppError> {
        sqlx::query(&format!("ROLLBACK TO SAVEPOINT {}", name))
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("roll back to savepoint", e))?;
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<(), AppError> {
        sqlx::query(&format!("RELEASE SAVEPOINT {}", name))
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("release savepoint", e))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn lock_professional(&mut self, professional_id: Uuid) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["lock_professional"])
            .start_timer();

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(calendar_lock_key(professional_id))
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("lock professional calendar", e))?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_overlapping(
        &mut self,
        professional_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Appointment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_overlapping"])
            .start_timer();

        let sql = format!(
            r#"
            SELECT {APPOINTMENT_COLUMNS}
            FROM appointments
            WHERE professional_id = $1
              AND status IN ('pending', 'confirmed')
              AND start_utc < $3
              AND end_utc > $2
              AND ($4::uuid IS NULL OR appointment_id <> $4)
            ORDER BY start_utc
            "#
        );
        let rows = sqlx::query_as::<_, AppointmentRow>(&sql)
            .bind(professional_id)
            .bind(start)
            .bind(end)
            .bind(exclude)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_error("find overlapping appointments", e))?;

        timer.observe_duration();
        convert_all(rows)
    }

    #[instrument(skip(self, appointment), fields(appointment_id = %appointment.appointment_id))]
    async fn insert_appointment(&mut self, appointment: &Appointment) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_appointment"])
            .start_timer();

        let sql = format!(
            r#"
            INSERT INTO appointments ({APPOINTMENT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#
        );
        sqlx::query(&sql)
            .bind(appointment.appointment_id)
            .bind(appointment.location_id)
            .bind(appointment.client_id)
            .bind(appointment.service_id)
            .bind(appointment.professional_id)
            .bind(appointment.machine_id)
            .bind(appointment.start_utc)
            .bind(appointment.end_utc)
            .bind(appointment.status.as_str())
            .bind(appointment.payment_status.as_str())
            .bind(appointment.total_amount)
            .bind(appointment.deposit_amount)
            .bind(&appointment.notes)
            .bind(appointment.reminder_24h_sent)
            .bind(appointment.reminder_2h_sent)
            .bind(appointment.created_by)
            .bind(appointment.created_utc)
            .bind(appointment.updated_utc)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                    AppError::Conflict(anyhow::anyhow!(
                        "Appointment {} already exists",
                        appointment.appointment_id
                    ))
                }
                _ => db_error("insert appointment", e),
            })?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_appointment(
        &mut self,
        appointment_id: Uuid,
    ) -> Result<Option<Appointment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_appointment"])
            .start_timer();

        let sql = format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE appointment_id = $1 FOR UPDATE"
        );
        let row = sqlx::query_as::<_, AppointmentRow>(&sql)
            .bind(appointment_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("get appointment", e))?;

        timer.observe_duration();
        row.map(Appointment::try_from).transpose()
    }

    #[instrument(skip(self, appointment), fields(appointment_id = %appointment.appointment_id))]
    async fn update_appointment(&mut self, appointment: &Appointment) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_appointment"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE appointments
            SET professional_id = $2,
                start_utc = $3,
                end_utc = $4,
                status = $5,
                payment_status = $6,
                deposit_amount = $7,
                notes = $8,
                reminder_24h_sent = $9,
                reminder_2h_sent = $10,
                updated_utc = $11
            WHERE appointment_id = $1
            "#,
        )
        .bind(appointment.appointment_id)
        .bind(appointment.professional_id)
        .bind(appointment.start_utc)
        .bind(appointment.end_utc)
        .bind(appointment.status.as_str())
        .bind(appointment.payment_status.as_str())
        .bind(appointment.deposit_amount)
        .bind(&appointment.notes)
        .bind(appointment.reminder_24h_sent)
        .bind(appointment.reminder_2h_sent)
        .bind(appointment.updated_utc)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("update appointment", e))?;

        timer.observe_duration();

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Appointment {} not found",
                appointment.appointment_id
            )));
        }
        Ok(())
    }

    #[instrument(skip(self, filter))]
    async fn list_appointments(
        &mut self,
        filter: &AppointmentFilter,
    ) -> Result<Vec<Appointment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_appointments"])
            .start_timer();

        let statuses: Vec<String> = filter
            .statuses
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        let sql = format!(
            r#"
            SELECT {APPOINTMENT_COLUMNS}
            FROM appointments
            WHERE ($1::uuid IS NULL OR location_id = $1)
              AND ($2::uuid IS NULL OR professional_id = $2)
              AND ($3::uuid IS NULL OR machine_id = $3)
              AND (cardinality($4::text[]) = 0 OR status = ANY($4))
              AND ($5::timestamptz IS NULL OR start_utc >= $5)
              AND ($6::timestamptz IS NULL OR start_utc < $6)
            ORDER BY start_utc, appointment_id
            "#
        );
        let rows = sqlx::query_as::<_, AppointmentRow>(&sql)
            .bind(filter.location_id)
            .bind(filter.professional_id)
            .bind(filter.machine_id)
            .bind(statuses)
            .bind(filter.start_from)
            .bind(filter.start_before)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_error("list appointments", e))?;

        timer.observe_duration();
        convert_all(rows)
    }

    #[instrument(skip(self, entry), fields(entry_id = %entry.entry_id))]
    async fn insert_entry(&mut self, entry: &LedgerEntry) -> Result<(LedgerEntry, bool), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_entry"])
            .start_timer();

        // Conflicting inserts wait for the first writer and then do nothing.
        let on_conflict = if entry.source.is_some() {
            "ON CONFLICT ON CONSTRAINT ledger_entries_source_key DO NOTHING"
        } else {
            ""
        };
        let sql = format!(
            r#"
            INSERT INTO ledger_entries ({ENTRY_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)
            {on_conflict}
            RETURNING {ENTRY_COLUMNS}
            "#
        );
        let inserted = sqlx::query_as::<_, EntryRow>(&sql)
            .bind(entry.entry_id)
            .bind(entry.location_id)
            .bind(entry.category_id)
            .bind(entry.entry_type.as_str())
            .bind(entry.amount)
            .bind(entry.payment_method.as_str())
            .bind(entry.entry_date)
            .bind(&entry.description)
            .bind(entry.client_id)
            .bind(entry.appointment_id)
            .bind(entry.product_id)
            .bind(entry.movement_id)
            .bind(entry.rental_id)
            .bind(entry.professional_id)
            .bind(entry.auto_generated)
            .bind(entry.source.as_ref().map(|s| s.kind.as_str()))
            .bind(entry.source.as_ref().map(|s| s.source_id))
            .bind(entry.source.as_ref().map(|s| s.rule.as_str()))
            .bind(entry.created_by)
            .bind(entry.created_utc)
            .bind(entry.updated_utc)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("insert ledger entry", e))?;

        timer.observe_duration();

        if let Some(row) = inserted {
            return Ok((LedgerEntry::try_from(row)?, true));
        }

        let source = entry.source.as_ref().ok_or_else(|| {
            AppError::DatabaseError(anyhow::anyhow!("Insert returned no row"))
        })?;
        let existing = self.find_entry_by_source(source).await?.ok_or_else(|| {
            AppError::DatabaseError(anyhow::anyhow!(
                "Entry for {} conflicted but could not be read back",
                source
            ))
        })?;
        Ok((existing, false))
    }

    #[instrument(skip(self))]
    async fn get_entry(&mut self, entry_id: Uuid) -> Result<Option<LedgerEntry>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_entry"])
            .start_timer();

        let sql = format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE entry_id = $1");
        let row = sqlx::query_as::<_, EntryRow>(&sql)
            .bind(entry_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("get ledger entry", e))?;

        timer.observe_duration();
        row.map(LedgerEntry::try_from).transpose()
    }

    #[instrument(skip(self), fields(source = %source))]
    async fn find_entry_by_source(
        &mut self,
        source: &SourceKey,
    ) -> Result<Option<LedgerEntry>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_entry_by_source"])
            .start_timer();

        let sql = format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM ledger_entries
            WHERE source_kind = $1 AND source_id = $2 AND source_rule = $3
            "#
        );
        let row = sqlx::query_as::<_, EntryRow>(&sql)
            .bind(source.kind.as_str())
            .bind(source.source_id)
            .bind(&source.rule)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("find ledger entry by source", e))?;

        timer.observe_duration();
        row.map(LedgerEntry::try_from).transpose()
    }

    #[instrument(skip(self, entry), fields(entry_id = %entry.entry_id))]
    async fn update_entry(&mut self, entry: &LedgerEntry) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_entry"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE ledger_entries
            SET category_id = $2,
                entry_type = $3,
                amount = $4,
                payment_method = $5,
                entry_date = $6,
                description = $7,
                updated_utc = $8
            WHERE entry_id = $1
            "#,
        )
        .bind(entry.entry_id)
        .bind(entry.category_id)
        .bind(entry.entry_type.as_str())
        .bind(entry.amount)
        .bind(entry.payment_method.as_str())
        .bind(entry.entry_date)
        .bind(&entry.description)
        .bind(entry.updated_utc)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("update ledger entry", e))?;

        timer.observe_duration();

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Ledger entry {} not found",
                entry.entry_id
            )));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_entry(&mut self, entry_id: Uuid) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_entry"])
            .start_timer();

        // Rentals keep their state; only the link goes.
        sqlx::query("UPDATE equipment_rentals SET entry_id = NULL WHERE entry_id = $1")
            .bind(entry_id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("unlink rental entry", e))?;

        let result = sqlx::query("DELETE FROM ledger_entries WHERE entry_id = $1")
            .bind(entry_id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("delete ledger entry", e))?;

        timer.observe_duration();
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, filter))]
    async fn list_entries(&mut self, filter: &EntryFilter) -> Result<Vec<LedgerEntry>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_entries"])
            .start_timer();

        let sql = format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM ledger_entries
            WHERE ($1::uuid IS NULL OR location_id = $1)
              AND ($2::date IS NULL OR entry_date >= $2)
              AND ($3::date IS NULL OR entry_date <= $3)
              AND ($4::uuid IS NULL OR category_id = $4)
              AND ($5::uuid IS NULL OR appointment_id = $5)
            ORDER BY entry_date, created_utc, entry_id
            "#
        );
        let rows = sqlx::query_as::<_, EntryRow>(&sql)
            .bind(filter.location_id)
            .bind(filter.from)
            .bind(filter.to)
            .bind(filter.category_id)
            .bind(filter.appointment_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_error("list ledger entries", e))?;

        timer.observe_duration();
        convert_all(rows)
    }

    #[instrument(skip(self))]
    async fn count_entries_in_category(&mut self, category_id: Uuid) -> Result<i64, AppError> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM ledger_entries WHERE category_id = $1")
            .bind(category_id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| db_error("count category entries", e))
    }

    #[instrument(skip(self))]
    async fn stock_level(&mut self, product_id: Uuid) -> Result<Decimal, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["stock_level"])
            .start_timer();

        sqlx::query(
            "INSERT INTO stock_levels (product_id, quantity) VALUES ($1, 0) ON CONFLICT (product_id) DO NOTHING",
        )
        .bind(product_id)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("initialize stock level", e))?;

        let quantity = sqlx::query_scalar::<_, Decimal>(
            "SELECT quantity FROM stock_levels WHERE product_id = $1 FOR UPDATE",
        )
        .bind(product_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| db_error("read stock level", e))?;

        timer.observe_duration();
        Ok(quantity)
    }

    #[instrument(skip(self))]
    async fn set_stock_level(
        &mut self,
        product_id: Uuid,
        quantity: Decimal,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO stock_levels (product_id, quantity, updated_utc)
            VALUES ($1, $2, NOW())
            ON CONFLICT (product_id) DO UPDATE SET quantity = $2, updated_utc = NOW()
            "#,
        )
        .bind(product_id)
        .bind(quantity)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("set stock level", e))?;
        Ok(())
    }

    #[instrument(skip(self, movement), fields(movement_id = %movement.movement_id))]
    async fn insert_movement(&mut self, movement: &InventoryMovement) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_movement"])
            .start_timer();

        let sql = format!(
            r#"
            INSERT INTO inventory_movements ({MOVEMENT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#
        );
        sqlx::query(&sql)
            .bind(movement.movement_id)
            .bind(movement.location_id)
            .bind(movement.product_id)
            .bind(movement.kind.as_str())
            .bind(movement.quantity)
            .bind(movement.unit_cost)
            .bind(movement.unit_price)
            .bind(movement.previous_stock)
            .bind(movement.new_stock)
            .bind(&movement.reason)
            .bind(movement.payment_method.as_str())
            .bind(movement.client_id)
            .bind(movement.appointment_id)
            .bind(movement.created_by)
            .bind(movement.created_utc)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("insert inventory movement", e))?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_movement(
        &mut self,
        movement_id: Uuid,
    ) -> Result<Option<InventoryMovement>, AppError> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM inventory_movements WHERE movement_id = $1 FOR UPDATE"
        );
        let row = sqlx::query_as::<_, MovementRow>(&sql)
            .bind(movement_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("get inventory movement", e))?;
        row.map(InventoryMovement::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn delete_movement(&mut self, movement_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM inventory_movements WHERE movement_id = $1")
            .bind(movement_id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("delete inventory movement", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn find_rental(
        &mut self,
        machine_id: Uuid,
        location_id: Uuid,
        rental_date: NaiveDate,
    ) -> Result<Option<EquipmentRental>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_rental"])
            .start_timer();

        let sql = format!(
            r#"
            SELECT {RENTAL_COLUMNS}
            FROM equipment_rentals
            WHERE machine_id = $1 AND location_id = $2 AND rental_date = $3
            FOR UPDATE
            "#
        );
        let row = sqlx::query_as::<_, RentalRow>(&sql)
            .bind(machine_id)
            .bind(location_id)
            .bind(rental_date)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("find equipment rental", e))?;

        timer.observe_duration();
        row.map(EquipmentRental::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn get_rental(&mut self, rental_id: Uuid) -> Result<Option<EquipmentRental>, AppError> {
        let sql =
            format!("SELECT {RENTAL_COLUMNS} FROM equipment_rentals WHERE rental_id = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, RentalRow>(&sql)
            .bind(rental_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("get equipment rental", e))?;
        row.map(EquipmentRental::try_from).transpose()
    }

    #[instrument(skip(self, rental), fields(rental_id = %rental.rental_id))]
    async fn insert_rental(&mut self, rental: &EquipmentRental) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_rental"])
            .start_timer();

        let sql = format!(
            r#"
            INSERT INTO equipment_rentals ({RENTAL_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#
        );
        sqlx::query(&sql)
            .bind(rental.rental_id)
            .bind(rental.machine_id)
            .bind(rental.location_id)
            .bind(rental.rental_date)
            .bind(rental.state.as_str())
            .bind(rental.cost)
            .bind(rental.entry_id)
            .bind(&rental.notes)
            .bind(rental.created_utc)
            .bind(rental.updated_utc)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                    AppError::Conflict(anyhow::anyhow!(
                        "Machine {} already has a rental on {} at this location",
                        rental.machine_id,
                        rental.rental_date
                    ))
                }
                _ => db_error("insert equipment rental", e),
            })?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self, rental), fields(rental_id = %rental.rental_id))]
    async fn update_rental(&mut self, rental: &EquipmentRental) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE equipment_rentals
            SET state = $2, cost = $3, entry_id = $4, notes = $5, updated_utc = $6
            WHERE rental_id = $1
            "#,
        )
        .bind(rental.rental_id)
        .bind(rental.state.as_str())
        .bind(rental.cost)
        .bind(rental.entry_id)
        .bind(&rental.notes)
        .bind(rental.updated_utc)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("update equipment rental", e))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Rental {} not found",
                rental.rental_id
            )));
        }
        Ok(())
    }

    #[instrument(skip(self, filter))]
    async fn list_rentals(
        &mut self,
        filter: &RentalFilter,
    ) -> Result<Vec<EquipmentRental>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_rentals"])
            .start_timer();

        let sql = format!(
            r#"
            SELECT {RENTAL_COLUMNS}
            FROM equipment_rentals
            WHERE ($1::uuid IS NULL OR location_id = $1)
              AND ($2::text IS NULL OR state = $2)
              AND ($3::date IS NULL OR rental_date >= $3)
              AND ($4::date IS NULL OR rental_date <= $4)
            ORDER BY rental_date, machine_id
            "#
        );
        let rows = sqlx::query_as::<_, RentalRow>(&sql)
            .bind(filter.location_id)
            .bind(filter.state.map(|s| s.as_str()))
            .bind(filter.from)
            .bind(filter.to)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_error("list equipment rentals", e))?;

        timer.observe_duration();
        convert_all(rows)
    }
}

// =============================================================================
// Categories
// =============================================================================

#[async_trait]
impl CategoryStore for Database {
    #[instrument(skip(self, category), fields(location_id = %category.location_id, name = %category.name))]
    async fn get_or_create_root(
        &self,
        category: &NewCategory,
    ) -> Result<LedgerCategory, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_or_create_category"])
            .start_timer();

        let sql = format!(
            r#"
            INSERT INTO ledger_categories ({CATEGORY_COLUMNS})
            VALUES ($1, $2, $3, $4, NULL, $5, $6, $7, TRUE, NOW())
            ON CONFLICT (location_id, name, category_type) WHERE parent_id IS NULL DO NOTHING
            RETURNING {CATEGORY_COLUMNS}
            "#
        );
        let inserted = sqlx::query_as::<_, CategoryRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(category.location_id)
            .bind(&category.name)
            .bind(category.category_type.as_str())
            .bind(&category.color)
            .bind(category.sort_order)
            .bind(category.is_system)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("provision category", e))?;

        let row = match inserted {
            Some(row) => {
                info!(category_id = %row.category_id, "System category provisioned");
                row
            }
            None => {
                let sql = format!(
                    r#"
                    SELECT {CATEGORY_COLUMNS}
                    FROM ledger_categories
                    WHERE location_id = $1 AND name = $2 AND category_type = $3 AND parent_id IS NULL
                    "#
                );
                sqlx::query_as::<_, CategoryRow>(&sql)
                    .bind(category.location_id)
                    .bind(&category.name)
                    .bind(category.category_type.as_str())
                    .fetch_one(&self.pool)
                    .await
                    .map_err(|e| db_error("read provisioned category", e))?
            }
        };

        timer.observe_duration();
        LedgerCategory::try_from(row)
    }

    #[instrument(skip(self))]
    async fn find_child(
        &self,
        parent_id: Uuid,
        name: &str,
    ) -> Result<Option<LedgerCategory>, AppError> {
        let sql = format!(
            "SELECT {CATEGORY_COLUMNS} FROM ledger_categories WHERE parent_id = $1 AND name = $2"
        );
        let row = sqlx::query_as::<_, CategoryRow>(&sql)
            .bind(parent_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("find subcategory", e))?;
        row.map(LedgerCategory::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn get_category(&self, category_id: Uuid) -> Result<Option<LedgerCategory>, AppError> {
        let sql = format!("SELECT {CATEGORY_COLUMNS} FROM ledger_categories WHERE category_id = $1");
        let row = sqlx::query_as::<_, CategoryRow>(&sql)
            .bind(category_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("get category", e))?;
        row.map(LedgerCategory::try_from).transpose()
    }

    #[instrument(skip(self, category), fields(location_id = %category.location_id, name = %category.name))]
    async fn insert_category(&self, category: &NewCategory) -> Result<LedgerCategory, AppError> {
        let sql = format!(
            r#"
            INSERT INTO ledger_categories ({CATEGORY_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE, NOW())
            RETURNING {CATEGORY_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, CategoryRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(category.location_id)
            .bind(&category.name)
            .bind(category.category_type.as_str())
            .bind(category.parent_id)
            .bind(&category.color)
            .bind(category.sort_order)
            .bind(category.is_system)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                    AppError::Conflict(anyhow::anyhow!(
                        "Category '{}' already exists",
                        category.name
                    ))
                }
                _ => db_error("create category", e),
            })?;
        LedgerCategory::try_from(row)
    }

    #[instrument(skip(self))]
    async fn list_categories(&self, location_id: Uuid) -> Result<Vec<LedgerCategory>, AppError> {
        let sql = format!(
            r#"
            SELECT {CATEGORY_COLUMNS}
            FROM ledger_categories
            WHERE location_id = $1
            ORDER BY category_type, sort_order, name
            "#
        );
        let rows = sqlx::query_as::<_, CategoryRow>(&sql)
            .bind(location_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("list categories", e))?;
        convert_all(rows)
    }

    #[instrument(skip(self))]
    async fn set_category_active(
        &self,
        category_id: Uuid,
        active: bool,
    ) -> Result<Option<LedgerCategory>, AppError> {
        let sql = format!(
            r#"
            UPDATE ledger_categories SET is_active = $2
            WHERE category_id = $1
            RETURNING {CATEGORY_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, CategoryRow>(&sql)
            .bind(category_id)
            .bind(active)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("update category", e))?;
        row.map(LedgerCategory::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn count_children(&self, category_id: Uuid) -> Result<i64, AppError> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM ledger_categories WHERE parent_id = $1")
            .bind(category_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("count subcategories", e))
    }

    #[instrument(skip(self))]
    async fn delete_category(&self, category_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM ledger_categories WHERE category_id = $1")
            .bind(category_id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("delete category", e))?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_key_is_stable_per_professional() {
        let id = Uuid::new_v4();
        assert_eq!(calendar_lock_key(id), calendar_lock_key(id));
        assert_ne!(calendar_lock_key(id), calendar_lock_key(Uuid::new_v4()));
    }
}
