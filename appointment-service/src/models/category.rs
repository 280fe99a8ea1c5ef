//! Chart of accounts: ledger categories and the intents that resolve to them.

use super::EntryType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryType {
    Income,
    Expense,
}

impl CategoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryType::Income => "income",
            CategoryType::Expense => "expense",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "income" => Some(CategoryType::Income),
            "expense" => Some(CategoryType::Expense),
            _ => None,
        }
    }
}

impl std::fmt::Display for CategoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classification node; at most two levels deep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerCategory {
    pub category_id: Uuid,
    pub location_id: Uuid,
    pub name: String,
    pub category_type: CategoryType,
    pub parent_id: Option<Uuid>,
    pub color: String,
    pub sort_order: i32,
    /// System categories can be deactivated but never deleted.
    pub is_system: bool,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
}

impl LedgerCategory {
    /// Expense categories take expense entries; income categories take any income entry.
    pub fn accepts(&self, entry_type: EntryType) -> bool {
        self.category_type == entry_type.category_type()
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Input for creating a category.
#[derive(Debug, Clone)]
pub struct NewCategory {
    pub location_id: Uuid,
    pub name: String,
    pub category_type: CategoryType,
    pub parent_id: Option<Uuid>,
    pub color: String,
    pub sort_order: i32,
    pub is_system: bool,
}

/// Business reasons the engine books money under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryIntent {
    ServiceIncome,
    ProductIncome,
    SuppliesExpense,
    EquipmentRentalExpense,
    PayrollExpense,
}

/// Well-known root category provisioned for an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemCategory {
    pub name: &'static str,
    pub category_type: CategoryType,
    pub color: &'static str,
    pub sort_order: i32,
}

/// Subcategory of the supplies category used for treatment consumables, when present.
pub const SUPPLIES_SUBCATEGORY: &str = "Treatment Supplies";

impl CategoryIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryIntent::ServiceIncome => "service_income",
            CategoryIntent::ProductIncome => "product_income",
            CategoryIntent::SuppliesExpense => "supplies_expense",
            CategoryIntent::EquipmentRentalExpense => "equipment_rental_expense",
            CategoryIntent::PayrollExpense => "payroll_expense",
        }
    }

    pub fn system_category(&self) -> SystemCategory {
        match self {
            CategoryIntent::ServiceIncome => SystemCategory {
                name: "Services",
                category_type: CategoryType::Income,
                color: "#10B981",
                sort_order: 1,
            },
            CategoryIntent::ProductIncome => SystemCategory {
                name: "Product Sales",
                category_type: CategoryType::Income,
                color: "#3B82F6",
                sort_order: 2,
            },
            CategoryIntent::PayrollExpense => SystemCategory {
                name: "Payroll",
                category_type: CategoryType::Expense,
                color: "#F59E0B",
                sort_order: 1,
            },
            CategoryIntent::EquipmentRentalExpense => SystemCategory {
                name: "Equipment Rentals",
                category_type: CategoryType::Expense,
                color: "#EF4444",
                sort_order: 2,
            },
            CategoryIntent::SuppliesExpense => SystemCategory {
                name: "Supplies & Products",
                category_type: CategoryType::Expense,
                color: "#8B5CF6",
                sort_order: 3,
            },
        }
    }

    pub fn new_category(&self, location_id: Uuid) -> NewCategory {
        let system = self.system_category();
        NewCategory {
            location_id,
            name: system.name.to_string(),
            category_type: system.category_type,
            parent_id: None,
            color: system.color.to_string(),
            sort_order: system.sort_order,
            is_system: true,
        }
    }
}

impl std::fmt::Display for CategoryIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
