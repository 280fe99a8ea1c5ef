//! Ledger entry model: single income or expense facts, plus read-model shapes.

use super::CategoryType;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Entry type; every income flavour books against an income category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    IncomeService,
    IncomeProduct,
    IncomeOther,
    Expense,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::IncomeService => "income_service",
            EntryType::IncomeProduct => "income_product",
            EntryType::IncomeOther => "income_other",
            EntryType::Expense => "expense",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "income_service" => Some(EntryType::IncomeService),
            "income_product" => Some(EntryType::IncomeProduct),
            "income_other" => Some(EntryType::IncomeOther),
            "expense" => Some(EntryType::Expense),
            _ => None,
        }
    }

    pub fn is_income(&self) -> bool {
        !matches!(self, EntryType::Expense)
    }

    pub fn category_type(&self) -> CategoryType {
        if self.is_income() {
            CategoryType::Income
        } else {
            CategoryType::Expense
        }
    }
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    BankTransfer,
    DebitCard,
    CreditCard,
    MercadoPago,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::DebitCard => "debit_card",
            PaymentMethod::CreditCard => "credit_card",
            PaymentMethod::MercadoPago => "mercado_pago",
            PaymentMethod::Other => "other",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "cash" => Some(PaymentMethod::Cash),
            "bank_transfer" => Some(PaymentMethod::BankTransfer),
            "debit_card" => Some(PaymentMethod::DebitCard),
            "credit_card" => Some(PaymentMethod::CreditCard),
            "mercado_pago" => Some(PaymentMethod::MercadoPago),
            "other" => Some(PaymentMethod::Other),
            _ => None,
        }
    }
}

/// Kind of entity a derived entry points back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Appointment,
    InventoryMovement,
    EquipmentRental,
    Payroll,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Appointment => "appointment",
            SourceKind::InventoryMovement => "inventory_movement",
            SourceKind::EquipmentRental => "equipment_rental",
            SourceKind::Payroll => "payroll",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "appointment" => Some(SourceKind::Appointment),
            "inventory_movement" => Some(SourceKind::InventoryMovement),
            "equipment_rental" => Some(SourceKind::EquipmentRental),
            "payroll" => Some(SourceKind::Payroll),
            _ => None,
        }
    }
}

/// Idempotency key of a derived entry: at most one entry exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceKey {
    pub kind: SourceKind,
    pub source_id: Uuid,
    pub rule: String,
}

impl SourceKey {
    pub fn new(kind: SourceKind, source_id: Uuid, rule: impl Into<String>) -> Self {
        Self {
            kind,
            source_id,
            rule: rule.into(),
        }
    }

    pub fn deposit(appointment_id: Uuid) -> Self {
        Self::new(SourceKind::Appointment, appointment_id, "deposit")
    }

    pub fn completion(appointment_id: Uuid) -> Self {
        Self::new(SourceKind::Appointment, appointment_id, "completion")
    }

    pub fn supply_purchase(movement_id: Uuid) -> Self {
        Self::new(SourceKind::InventoryMovement, movement_id, "supply_purchase")
    }

    pub fn product_sale(movement_id: Uuid) -> Self {
        Self::new(SourceKind::InventoryMovement, movement_id, "product_sale")
    }

    pub fn rental_charge(rental_id: Uuid) -> Self {
        Self::new(SourceKind::EquipmentRental, rental_id, "rental_charge")
    }

    pub fn payroll(professional_id: Uuid, year: i32, month: u32) -> Self {
        Self::new(
            SourceKind::Payroll,
            professional_id,
            format!("payroll-{year:04}-{month:02}"),
        )
    }

    /// Stable identifier used in logs and warnings.
    pub fn event_id(&self) -> String {
        format!("{}:{}:{}", self.kind.as_str(), self.source_id, self.rule)
    }
}

impl std::fmt::Display for SourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.event_id())
    }
}

/// Single financial fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: Uuid,
    pub location_id: Uuid,
    pub category_id: Uuid,
    pub entry_type: EntryType,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub entry_date: NaiveDate,
    pub description: String,
    pub client_id: Option<Uuid>,
    pub appointment_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub movement_id: Option<Uuid>,
    pub rental_id: Option<Uuid>,
    pub professional_id: Option<Uuid>,
    /// Owned by the projector; users can neither edit nor delete it.
    pub auto_generated: bool,
    pub source: Option<SourceKey>,
    pub created_by: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Entry fields before persistence.
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub location_id: Uuid,
    pub category_id: Uuid,
    pub entry_type: EntryType,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub entry_date: NaiveDate,
    pub description: String,
    pub client_id: Option<Uuid>,
    pub appointment_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub movement_id: Option<Uuid>,
    pub rental_id: Option<Uuid>,
    pub professional_id: Option<Uuid>,
    pub auto_generated: bool,
    pub source: Option<SourceKey>,
    pub created_by: Option<Uuid>,
}

impl NewLedgerEntry {
    /// Minimal entry; link fields start empty.
    pub fn new(
        location_id: Uuid,
        category_id: Uuid,
        entry_type: EntryType,
        amount: Decimal,
        entry_date: NaiveDate,
        description: impl Into<String>,
    ) -> Self {
        Self {
            location_id,
            category_id,
            entry_type,
            amount,
            payment_method: PaymentMethod::Cash,
            entry_date,
            description: description.into(),
            client_id: None,
            appointment_id: None,
            product_id: None,
            movement_id: None,
            rental_id: None,
            professional_id: None,
            auto_generated: false,
            source: None,
            created_by: None,
        }
    }

    /// Marks the entry as derived from `source`.
    pub fn derived_from(mut self, source: SourceKey) -> Self {
        self.auto_generated = true;
        self.source = Some(source);
        self
    }

    pub fn into_entry(self, now: DateTime<Utc>) -> LedgerEntry {
        LedgerEntry {
            entry_id: Uuid::new_v4(),
            location_id: self.location_id,
            category_id: self.category_id,
            entry_type: self.entry_type,
            amount: self.amount,
            payment_method: self.payment_method,
            entry_date: self.entry_date,
            description: self.description,
            client_id: self.client_id,
            appointment_id: self.appointment_id,
            product_id: self.product_id,
            movement_id: self.movement_id,
            rental_id: self.rental_id,
            professional_id: self.professional_id,
            auto_generated: self.auto_generated,
            source: self.source,
            created_by: self.created_by,
            created_utc: now,
            updated_utc: now,
        }
    }
}

/// User-entered entry.
#[derive(Debug, Clone)]
pub struct ManualEntry {
    pub location_id: Uuid,
    pub category_id: Uuid,
    pub entry_type: EntryType,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub entry_date: NaiveDate,
    pub description: String,
    pub client_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
}

/// Partial update of a manual entry; `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct UpdateEntry {
    pub category_id: Option<Uuid>,
    pub entry_type: Option<EntryType>,
    pub amount: Option<Decimal>,
    pub payment_method: Option<PaymentMethod>,
    pub entry_date: Option<NaiveDate>,
    pub description: Option<String>,
}

/// Filter for listing entries.
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub location_id: Option<Uuid>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub category_id: Option<Uuid>,
    pub appointment_id: Option<Uuid>,
}

impl EntryFilter {
    pub fn for_location(location_id: Uuid) -> Self {
        Self {
            location_id: Some(location_id),
            ..Default::default()
        }
    }

    pub fn between(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        self.location_id.is_none_or(|id| entry.location_id == id)
            && self.from.is_none_or(|d| entry.entry_date >= d)
            && self.to.is_none_or(|d| entry.entry_date <= d)
            && self.category_id.is_none_or(|id| entry.category_id == id)
            && self
                .appointment_id
                .is_none_or(|id| entry.appointment_id == Some(id))
    }
}

/// Totals over a date range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub income_total: Decimal,
    pub income_count: u64,
    pub expense_total: Decimal,
    pub expense_count: u64,
    pub balance: Decimal,
    /// Balance over income, in percent; zero when there is no income.
    pub profit_margin: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryTotal {
    pub category_id: Uuid,
    pub category_name: String,
    pub category_type: CategoryType,
    pub total: Decimal,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMethodTotal {
    pub payment_method: PaymentMethod,
    pub total: Decimal,
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn income_types_map_to_income_categories() {
        assert_eq!(EntryType::IncomeService.category_type(), CategoryType::Income);
        assert_eq!(EntryType::IncomeProduct.category_type(), CategoryType::Income);
        assert_eq!(EntryType::IncomeOther.category_type(), CategoryType::Income);
        assert_eq!(EntryType::Expense.category_type(), CategoryType::Expense);
    }

    #[test]
    fn payroll_key_carries_period() {
        let id = Uuid::new_v4();
        let key = SourceKey::payroll(id, 2024, 6);
        assert_eq!(key.rule, "payroll-2024-06");
        assert_eq!(key.event_id(), format!("payroll:{id}:payroll-2024-06"));
    }
}
