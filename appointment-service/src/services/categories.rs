//! Ledger category resolver and chart-of-accounts rules.

use crate::models::{
    CategoryIntent, LedgerCategory, NewCategory, ProductKind, SUPPLIES_SUBCATEGORY,
};
use crate::services::error::{EngineError, EngineResult};
use crate::services::store::{CategoryStore, Store};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Maps a business intent to its system category for a location,
/// provisioning the category on first use. Results are cached per process.
pub struct CategoryResolver {
    categories: Arc<dyn CategoryStore>,
    cache: DashMap<(Uuid, CategoryIntent), LedgerCategory>,
}

impl CategoryResolver {
    pub fn new(categories: Arc<dyn CategoryStore>) -> Self {
        Self {
            categories,
            cache: DashMap::new(),
        }
    }

    #[instrument(skip(self), fields(intent = %intent))]
    pub async fn resolve(
        &self,
        location_id: Uuid,
        intent: CategoryIntent,
    ) -> EngineResult<LedgerCategory> {
        if let Some(cached) = self.cache.get(&(location_id, intent)) {
            return Ok(cached.clone());
        }

        let category = self
            .categories
            .get_or_create_root(&intent.new_category(location_id))
            .await
            .map_err(|source| EngineError::CategoryResolution {
                location_id,
                intent,
                source,
            })?;

        debug!(category_id = %category.category_id, "Category resolved");
        self.cache
            .insert((location_id, intent), category.clone());
        Ok(category)
    }

    /// Supplies category, narrowed to the treatment-supplies subcategory for
    /// supply products when the location has one. The subcategory is never created.
    #[instrument(skip(self))]
    pub async fn resolve_supplies(
        &self,
        location_id: Uuid,
        product_kind: ProductKind,
    ) -> EngineResult<LedgerCategory> {
        let intent = CategoryIntent::SuppliesExpense;
        let parent = self.resolve(location_id, intent).await?;
        if product_kind != ProductKind::Supply {
            return Ok(parent);
        }

        let child = self
            .categories
            .find_child(parent.category_id, SUPPLIES_SUBCATEGORY)
            .await
            .map_err(|source| EngineError::CategoryResolution {
                location_id,
                intent,
                source,
            })?;

        Ok(match child {
            Some(sub) if sub.is_active => sub,
            _ => parent,
        })
    }
}

/// Category CRUD rules: depth two, matching types, system categories protected.
pub struct CategoryManager {
    store: Arc<dyn Store>,
    categories: Arc<dyn CategoryStore>,
}

impl CategoryManager {
    pub fn new(store: Arc<dyn Store>, categories: Arc<dyn CategoryStore>) -> Self {
        Self { store, categories }
    }

    async fn require(&self, category_id: Uuid) -> EngineResult<LedgerCategory> {
        self.categories
            .get_category(category_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("Category {} not found", category_id)))
    }

    pub async fn get_category(&self, category_id: Uuid) -> EngineResult<LedgerCategory> {
        self.require(category_id).await
    }

    pub async fn list_categories(&self, location_id: Uuid) -> EngineResult<Vec<LedgerCategory>> {
        Ok(self.categories.list_categories(location_id).await?)
    }

    /// Creates a user category. A parent must be a root category of the same
    /// location and type.
    #[instrument(skip(self, input), fields(location_id = %input.location_id, name = %input.name))]
    pub async fn create_category(&self, input: &NewCategory) -> EngineResult<LedgerCategory> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(EngineError::validation("Category name is required"));
        }

        if let Some(parent_id) = input.parent_id {
            let parent = self.categories.get_category(parent_id).await?.ok_or_else(|| {
                EngineError::not_found(format!("Parent category {} not found", parent_id))
            })?;
            if parent.location_id != input.location_id {
                return Err(EngineError::validation(
                    "Parent category belongs to another location",
                ));
            }
            if !parent.is_root() {
                return Err(EngineError::validation(
                    "Subcategories cannot have subcategories",
                ));
            }
            if parent.category_type != input.category_type {
                return Err(EngineError::validation(format!(
                    "Subcategory type {} must match parent type {}",
                    input.category_type, parent.category_type
                )));
            }
        }

        let category = self
            .categories
            .insert_category(&NewCategory {
                name: name.to_string(),
                is_system: false,
                ..input.clone()
            })
            .await?;

        info!(category_id = %category.category_id, "Category created");
        Ok(category)
    }

    /// Activates or deactivates a category; allowed for system categories.
    #[instrument(skip(self))]
    pub async fn set_active(&self, category_id: Uuid, active: bool) -> EngineResult<LedgerCategory> {
        self.categories
            .set_category_active(category_id, active)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("Category {} not found", category_id)))
    }

    /// Deletes a user category that has no subcategories and no entries.
    #[instrument(skip(self))]
    pub async fn delete_category(&self, category_id: Uuid) -> EngineResult<()> {
        let category = self.require(category_id).await?;
        if category.is_system {
            return Err(EngineError::validation(format!(
                "System category '{}' cannot be deleted, only deactivated",
                category.name
            )));
        }

        if self.categories.count_children(category_id).await? > 0 {
            return Err(EngineError::validation(format!(
                "Category '{}' has subcategories",
                category.name
            )));
        }

        let mut tx = self.store.begin().await?;
        let entries = tx.count_entries_in_category(category_id).await?;
        tx.rollback().await?;
        if entries > 0 {
            return Err(EngineError::validation(format!(
                "Category '{}' has {} ledger entries",
                category.name, entries
            )));
        }

        if !self.categories.delete_category(category_id).await? {
            warn!(category_id = %category_id, "Category disappeared before delete");
        }
        info!(category_id = %category_id, "Category deleted");
        Ok(())
    }
}
