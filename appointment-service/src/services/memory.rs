//! In-process store used by tests and local development.
//!
//! Transactions are fully serialized behind one async mutex. A transaction works
//! on a private copy of the state which replaces the shared state on commit, so
//! rollback (explicit or by drop) discards every change.

use crate::models::{
    Appointment, AppointmentFilter, EntryFilter, EquipmentRental, InventoryMovement,
    LedgerCategory, LedgerEntry, NewCategory, RentalFilter, SourceKey,
};
use crate::services::store::{CategoryStore, Store, StoreTx};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    appointments: HashMap<Uuid, Appointment>,
    entries: HashMap<Uuid, LedgerEntry>,
    entry_sources: HashMap<SourceKey, Uuid>,
    movements: HashMap<Uuid, InventoryMovement>,
    stock: HashMap<Uuid, Decimal>,
    rentals: HashMap<Uuid, EquipmentRental>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Arc<AsyncMutex<MemoryState>>,
    categories: Mutex<HashMap<Uuid, LedgerCategory>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn categories(&self) -> Result<MutexGuard<'_, HashMap<Uuid, LedgerCategory>>, AppError> {
        self.categories
            .lock()
            .map_err(|_| AppError::InternalError(anyhow::anyhow!("Category store lock poisoned")))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, AppError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            working,
            savepoints: Vec::new(),
        }))
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    savepoints: Vec<(String, MemoryState)>,
}

impl MemoryTx {
    fn savepoint_index(&self, name: &str) -> Result<usize, AppError> {
        self.savepoints
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| {
                AppError::DatabaseError(anyhow::anyhow!("Savepoint {} does not exist", name))
            })
    }
}

fn sorted_by<T, K: Ord>(mut items: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    items.sort_by_key(key);
    items
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let MemoryTx {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        Ok(())
    }

    async fn savepoint(&mut self, name: &str) -> Result<(), AppError> {
        self.savepoints
            .push((name.to_string(), self.working.clone()));
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), AppError> {
        let idx = self.savepoint_index(name)?;
        self.savepoints.truncate(idx + 1);
        self.working = self.savepoints[idx].1.clone();
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<(), AppError> {
        let idx = self.savepoint_index(name)?;
        self.savepoints.truncate(idx);
        Ok(())
    }

    async fn lock_professional(&mut self, _professional_id: Uuid) -> Result<(), AppError> {
        // The transaction already holds the store-wide lock.
        Ok(())
    }

    async fn find_overlapping(
        &mut self,
        professional_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Appointment>, AppError> {
        let found = self
            .working
            .appointments
            .values()
            .filter(|a| a.professional_id == Some(professional_id))
            .filter(|a| a.status.blocks_calendar())
            .filter(|a| Some(a.appointment_id) != exclude)
            .filter(|a| a.overlaps(start, end))
            .cloned()
            .collect();
        Ok(sorted_by(found, |a| a.start_utc))
    }

    async fn insert_appointment(&mut self, appointment: &Appointment) -> Result<(), AppError> {
        if self
            .working
            .appointments
            .contains_key(&appointment.appointment_id)
        {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Appointment {} already exists",
                appointment.appointment_id
            )));
        }
        self.working
            .appointments
            .insert(appointment.appointment_id, appointment.clone());
        Ok(())
    }

    async fn get_appointment(
        &mut self,
        appointment_id: Uuid,
    ) -> Result<Option<Appointment>, AppError> {
        Ok(self.working.appointments.get(&appointment_id).cloned())
    }

    async fn update_appointment(&mut self, appointment: &Appointment) -> Result<(), AppError> {
        match self.working.appointments.get_mut(&appointment.appointment_id) {
            Some(existing) => {
                *existing = appointment.clone();
                Ok(())
            }
            None => Err(AppError::NotFound(anyhow::anyhow!(
                "Appointment {} not found",
                appointment.appointment_id
            ))),
        }
    }

    async fn list_appointments(
        &mut self,
        filter: &AppointmentFilter,
    ) -> Result<Vec<Appointment>, AppError> {
        let found = self
            .working
            .appointments
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        Ok(sorted_by(found, |a| (a.start_utc, a.appointment_id)))
    }

    async fn insert_entry(&mut self, entry: &LedgerEntry) -> Result<(LedgerEntry, bool), AppError> {
        if let Some(source) = &entry.source {
            if let Some(existing_id) = self.working.entry_sources.get(source) {
                if let Some(existing) = self.working.entries.get(existing_id) {
                    return Ok((existing.clone(), false));
                }
            }
            self.working
                .entry_sources
                .insert(source.clone(), entry.entry_id);
        }
        self.working.entries.insert(entry.entry_id, entry.clone());
        Ok((entry.clone(), true))
    }

    async fn get_entry(&mut self, entry_id: Uuid) -> Result<Option<LedgerEntry>, AppError> {
        Ok(self.working.entries.get(&entry_id).cloned())
    }

    async fn find_entry_by_source(
        &mut self,
        source: &SourceKey,
    ) -> Result<Option<LedgerEntry>, AppError> {
        Ok(self
            .working
            .entry_sources
            .get(source)
            .and_then(|id| self.working.entries.get(id))
            .cloned())
    }

    async fn update_entry(&mut self, entry: &LedgerEntry) -> Result<(), AppError> {
        match self.working.entries.get_mut(&entry.entry_id) {
            Some(existing) => {
                *existing = entry.clone();
                Ok(())
            }
            None => Err(AppError::NotFound(anyhow::anyhow!(
                "Ledger entry {} not found",
                entry.entry_id
            ))),
        }
    }

    async fn delete_entry(&mut self, entry_id: Uuid) -> Result<bool, AppError> {
        match self.working.entries.remove(&entry_id) {
            Some(removed) => {
                if let Some(source) = &removed.source {
                    self.working.entry_sources.remove(source);
                }
                for rental in self.working.rentals.values_mut() {
                    if rental.entry_id == Some(entry_id) {
                        rental.entry_id = None;
                    }
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_entries(&mut self, filter: &EntryFilter) -> Result<Vec<LedgerEntry>, AppError> {
        let found = self
            .working
            .entries
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        Ok(sorted_by(found, |e| (e.entry_date, e.created_utc, e.entry_id)))
    }

    async fn count_entries_in_category(&mut self, category_id: Uuid) -> Result<i64, AppError> {
        let count = self
            .working
            .entries
            .values()
            .filter(|e| e.category_id == category_id)
            .count();
        Ok(count as i64)
    }

    async fn stock_level(&mut self, product_id: Uuid) -> Result<Decimal, AppError> {
        Ok(self
            .working
            .stock
            .get(&product_id)
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn set_stock_level(
        &mut self,
        product_id: Uuid,
        quantity: Decimal,
    ) -> Result<(), AppError> {
        self.working.stock.insert(product_id, quantity);
        Ok(())
    }

    async fn insert_movement(&mut self, movement: &InventoryMovement) -> Result<(), AppError> {
        self.working
            .movements
            .insert(movement.movement_id, movement.clone());
        Ok(())
    }

    async fn get_movement(
        &mut self,
        movement_id: Uuid,
    ) -> Result<Option<InventoryMovement>, AppError> {
        Ok(self.working.movements.get(&movement_id).cloned())
    }

    async fn delete_movement(&mut self, movement_id: Uuid) -> Result<bool, AppError> {
        Ok(self.working.movements.remove(&movement_id).is_some())
    }

    async fn find_rental(
        &mut self,
        machine_id: Uuid,
        location_id: Uuid,
        rental_date: NaiveDate,
    ) -> Result<Option<EquipmentRental>, AppError> {
        Ok(self
            .working
            .rentals
            .values()
            .find(|r| {
                r.machine_id == machine_id
                    && r.location_id == location_id
                    && r.rental_date == rental_date
            })
            .cloned())
    }

    async fn get_rental(&mut self, rental_id: Uuid) -> Result<Option<EquipmentRental>, AppError> {
        Ok(self.working.rentals.get(&rental_id).cloned())
    }

    async fn insert_rental(&mut self, rental: &EquipmentRental) -> Result<(), AppError> {
        let taken = self.working.rentals.values().any(|r| {
            r.machine_id == rental.machine_id
                && r.location_id == rental.location_id
                && r.rental_date == rental.rental_date
        });
        if taken {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Machine {} already has a rental on {} at this location",
                rental.machine_id,
                rental.rental_date
            )));
        }
        self.working.rentals.insert(rental.rental_id, rental.clone());
        Ok(())
    }

    async fn update_rental(&mut self, rental: &EquipmentRental) -> Result<(), AppError> {
        match self.working.rentals.get_mut(&rental.rental_id) {
            Some(existing) => {
                *existing = rental.clone();
                Ok(())
            }
            None => Err(AppError::NotFound(anyhow::anyhow!(
                "Rental {} not found",
                rental.rental_id
            ))),
        }
    }

    async fn list_rentals(
        &mut self,
        filter: &RentalFilter,
    ) -> Result<Vec<EquipmentRental>, AppError> {
        let found = self
            .working
            .rentals
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        Ok(sorted_by(found, |r| (r.rental_date, r.machine_id)))
    }
}

fn build_category(category: &NewCategory) -> LedgerCategory {
    LedgerCategory {
        category_id: Uuid::new_v4(),
        location_id: category.location_id,
        name: category.name.clone(),
        category_type: category.category_type,
        parent_id: category.parent_id,
        color: category.color.clone(),
        sort_order: category.sort_order,
        is_system: category.is_system,
        is_active: true,
        created_utc: Utc::now(),
    }
}

#[async_trait]
impl CategoryStore for MemoryStore {
    async fn get_or_create_root(
        &self,
        category: &NewCategory,
    ) -> Result<LedgerCategory, AppError> {
        let mut categories = self.categories()?;
        let existing = categories.values().find(|c| {
            c.location_id == category.location_id
                && c.name == category.name
                && c.category_type == category.category_type
                && c.parent_id.is_none()
        });
        if let Some(found) = existing {
            return Ok(found.clone());
        }

        let created = build_category(category);
        categories.insert(created.category_id, created.clone());
        Ok(created)
    }

    async fn find_child(
        &self,
        parent_id: Uuid,
        name: &str,
    ) -> Result<Option<LedgerCategory>, AppError> {
        Ok(self
            .categories()?
            .values()
            .find(|c| c.parent_id == Some(parent_id) && c.name == name)
            .cloned())
    }

    async fn get_category(&self, category_id: Uuid) -> Result<Option<LedgerCategory>, AppError> {
        Ok(self.categories()?.get(&category_id).cloned())
    }

    async fn insert_category(&self, category: &NewCategory) -> Result<LedgerCategory, AppError> {
        let mut categories = self.categories()?;
        let duplicate = categories.values().any(|c| {
            c.location_id == category.location_id
                && c.name == category.name
                && c.category_type == category.category_type
                && c.parent_id == category.parent_id
        });
        if duplicate {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Category {} already exists",
                category.name
            )));
        }

        let created = build_category(category);
        categories.insert(created.category_id, created.clone());
        Ok(created)
    }

    async fn list_categories(&self, location_id: Uuid) -> Result<Vec<LedgerCategory>, AppError> {
        let found = self
            .categories()?
            .values()
            .filter(|c| c.location_id == location_id)
            .cloned()
            .collect();
        Ok(sorted_by(found, |c| {
            (c.category_type.as_str(), c.sort_order, c.name.clone())
        }))
    }

    async fn set_category_active(
        &self,
        category_id: Uuid,
        active: bool,
    ) -> Result<Option<LedgerCategory>, AppError> {
        let mut categories = self.categories()?;
        Ok(categories.get_mut(&category_id).map(|c| {
            c.is_active = active;
            c.clone()
        }))
    }

    async fn count_children(&self, category_id: Uuid) -> Result<i64, AppError> {
        let count = self
            .categories()?
            .values()
            .filter(|c| c.parent_id == Some(category_id))
            .count();
        Ok(count as i64)
    }

    async fn delete_category(&self, category_id: Uuid) -> Result<bool, AppError> {
        Ok(self.categories()?.remove(&category_id).is_some())
    }
}
