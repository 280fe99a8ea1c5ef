//! Ledger book: manual entries, monthly payroll and reporting read models.

use crate::models::{
    CategoryIntent, CategoryTotal, EntryFilter, EntryType, LedgerCategory, LedgerEntry,
    LedgerSummary, ManualEntry, NewLedgerEntry, PaymentMethodTotal, SourceKey, UpdateEntry,
};
use crate::services::catalog::Catalog;
use crate::services::categories::CategoryResolver;
use crate::services::clock::Clock;
use crate::services::error::{EngineError, EngineResult};
use crate::services::metrics::record_ledger_entry;
use crate::services::store::{CategoryStore, Store, StoreTx};
use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Largest amount a single manual entry may carry.
pub const MAX_ENTRY_AMOUNT: Decimal = Decimal::from_parts(999_999_999, 0, 0, false, 2);

const MIN_DESCRIPTION_LEN: usize = 5;

pub struct LedgerBook {
    store: Arc<dyn Store>,
    categories: Arc<dyn CategoryStore>,
    resolver: Arc<CategoryResolver>,
    catalog: Arc<dyn Catalog>,
    clock: Arc<dyn Clock>,
    edit_window: Duration,
}

fn validate_amount(amount: Decimal) -> EngineResult<()> {
    if amount <= Decimal::ZERO || amount > MAX_ENTRY_AMOUNT {
        return Err(EngineError::validation(format!(
            "Amount must be greater than 0 and at most {}, got {}",
            MAX_ENTRY_AMOUNT, amount
        )));
    }
    Ok(())
}

fn validate_description(description: &str) -> EngineResult<String> {
    let trimmed = description.trim();
    if trimmed.chars().count() < MIN_DESCRIPTION_LEN {
        return Err(EngineError::validation(format!(
            "Description must have at least {} characters",
            MIN_DESCRIPTION_LEN
        )));
    }
    Ok(trimmed.to_string())
}

fn validate_category(
    category: &LedgerCategory,
    location_id: Uuid,
    entry_type: EntryType,
) -> EngineResult<()> {
    if category.location_id != location_id {
        return Err(EngineError::validation(format!(
            "Category '{}' belongs to another location",
            category.name
        )));
    }
    if !category.is_active {
        return Err(EngineError::validation(format!(
            "Category '{}' is inactive",
            category.name
        )));
    }
    if !category.accepts(entry_type) {
        return Err(EngineError::validation(format!(
            "Category '{}' is {} and cannot hold {} entries",
            category.name, category.category_type, entry_type
        )));
    }
    Ok(())
}

/// Income and expense totals over a set of entries.
pub fn summarize(entries: &[LedgerEntry]) -> LedgerSummary {
    let mut summary = LedgerSummary {
        income_total: Decimal::ZERO,
        income_count: 0,
        expense_total: Decimal::ZERO,
        expense_count: 0,
        balance: Decimal::ZERO,
        profit_margin: Decimal::ZERO,
    };
    for entry in entries {
        if entry.entry_type.is_income() {
            summary.income_total += entry.amount;
            summary.income_count += 1;
        } else {
            summary.expense_total += entry.amount;
            summary.expense_count += 1;
        }
    }
    summary.balance = summary.income_total - summary.expense_total;
    if summary.income_total > Decimal::ZERO {
        summary.profit_margin =
            (summary.balance / summary.income_total * Decimal::from(100)).round_dp(2);
    }
    summary
}

impl LedgerBook {
    pub fn new(
        store: Arc<dyn Store>,
        categories: Arc<dyn CategoryStore>,
        resolver: Arc<CategoryResolver>,
        catalog: Arc<dyn Catalog>,
        clock: Arc<dyn Clock>,
        edit_window_days: i64,
    ) -> Self {
        Self {
            store,
            categories,
            resolver,
            catalog,
            clock,
            edit_window: Duration::days(edit_window_days),
        }
    }

    async fn category(&self, category_id: Uuid) -> EngineResult<LedgerCategory> {
        self.categories
            .get_category(category_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("Category {} not found", category_id)))
    }

    async fn load(tx: &mut dyn StoreTx, entry_id: Uuid) -> EngineResult<LedgerEntry> {
        tx.get_entry(entry_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("Ledger entry {} not found", entry_id)))
    }

    /// Records a user-entered income or expense.
    #[instrument(skip(self, input), fields(location_id = %input.location_id, entry_type = %input.entry_type))]
    pub async fn create_entry(&self, input: &ManualEntry) -> EngineResult<LedgerEntry> {
        validate_amount(input.amount)?;
        let description = validate_description(&input.description)?;
        let category = self.category(input.category_id).await?;
        validate_category(&category, input.location_id, input.entry_type)?;

        let mut entry = NewLedgerEntry::new(
            input.location_id,
            input.category_id,
            input.entry_type,
            input.amount,
            input.entry_date,
            description,
        );
        entry.payment_method = input.payment_method;
        entry.client_id = input.client_id;
        entry.created_by = input.created_by;

        let mut tx = self.store.begin().await?;
        let (entry, _) = tx.insert_entry(&entry.into_entry(self.clock.now())).await?;
        tx.commit().await?;

        info!(entry_id = %entry.entry_id, amount = %entry.amount, "Manual entry created");
        Ok(entry)
    }

    /// Edits a manual entry inside the edit window.
    #[instrument(skip(self, changes))]
    pub async fn update_entry(
        &self,
        entry_id: Uuid,
        changes: &UpdateEntry,
    ) -> EngineResult<LedgerEntry> {
        let mut tx = self.store.begin().await?;
        let mut entry = Self::load(tx.as_mut(), entry_id).await?;

        if entry.auto_generated {
            tx.rollback().await?;
            return Err(EngineError::validation(
                "Auto-generated entries cannot be edited",
            ));
        }
        let now = self.clock.now();
        if now - entry.created_utc > self.edit_window {
            tx.rollback().await?;
            return Err(EngineError::validation(format!(
                "Entries older than {} days cannot be edited",
                self.edit_window.num_days()
            )));
        }

        if let Some(amount) = changes.amount {
            validate_amount(amount)?;
            entry.amount = amount;
        }
        if let Some(description) = &changes.description {
            entry.description = validate_description(description)?;
        }
        if let Some(entry_type) = changes.entry_type {
            entry.entry_type = entry_type;
        }
        if let Some(category_id) = changes.category_id {
            entry.category_id = category_id;
        }
        if let Some(method) = changes.payment_method {
            entry.payment_method = method;
        }
        if let Some(date) = changes.entry_date {
            entry.entry_date = date;
        }
        if changes.category_id.is_some() || changes.entry_type.is_some() {
            let category = self.category(entry.category_id).await?;
            validate_category(&category, entry.location_id, entry.entry_type)?;
        }

        entry.updated_utc = now;
        tx.update_entry(&entry).await?;
        tx.commit().await?;

        info!(entry_id = %entry_id, "Manual entry updated");
        Ok(entry)
    }

    #[instrument(skip(self))]
    pub async fn delete_entry(&self, entry_id: Uuid) -> EngineResult<()> {
        let mut tx = self.store.begin().await?;
        let entry = Self::load(tx.as_mut(), entry_id).await?;
        if entry.auto_generated {
            tx.rollback().await?;
            return Err(EngineError::validation(
                "Auto-generated entries cannot be deleted; reverse their source instead",
            ));
        }
        tx.delete_entry(entry_id).await?;
        tx.commit().await?;

        info!(entry_id = %entry_id, "Manual entry deleted");
        Ok(())
    }

    pub async fn get_entry(&self, entry_id: Uuid) -> EngineResult<LedgerEntry> {
        let mut tx = self.store.begin().await?;
        let entry = Self::load(tx.as_mut(), entry_id).await;
        tx.rollback().await?;
        entry
    }

    pub async fn list_entries(&self, filter: &EntryFilter) -> EngineResult<Vec<LedgerEntry>> {
        let mut tx = self.store.begin().await?;
        let entries = tx.list_entries(filter).await?;
        tx.rollback().await?;
        Ok(entries)
    }

    /// Books one salary expense per active salaried professional for the
    /// month. Re-running a processed month creates nothing.
    #[instrument(skip(self))]
    pub async fn process_payroll(
        &self,
        location_id: Uuid,
        year: i32,
        month: u32,
    ) -> EngineResult<Vec<LedgerEntry>> {
        let period = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| EngineError::validation(format!("Invalid period {}-{}", year, month)))?;

        let professionals: Vec<_> = self
            .catalog
            .list_professionals(location_id)
            .await?
            .into_iter()
            .filter(|p| p.active && p.monthly_salary.is_some_and(|s| s > Decimal::ZERO))
            .collect();
        if professionals.is_empty() {
            return Ok(Vec::new());
        }

        let category = self
            .resolver
            .resolve(location_id, CategoryIntent::PayrollExpense)
            .await?;

        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut created = Vec::new();
        for professional in professionals {
            let Some(salary) = professional.monthly_salary else {
                continue;
            };
            let mut entry = NewLedgerEntry::new(
                location_id,
                category.category_id,
                EntryType::Expense,
                salary,
                period,
                format!(
                    "Salary {} - {}",
                    period.format("%Y-%m"),
                    professional.full_name
                ),
            );
            // Keyed for idempotence but left user-correctable.
            entry.source = Some(SourceKey::payroll(professional.professional_id, year, month));
            entry.professional_id = Some(professional.professional_id);

            let (stored, was_created) = tx.insert_entry(&entry.into_entry(now)).await?;
            if was_created {
                record_ledger_entry("payroll");
                created.push(stored);
            }
        }
        tx.commit().await?;

        info!(
            period = %period.format("%Y-%m"),
            created = created.len(),
            "Payroll processed"
        );
        Ok(created)
    }

    async fn entries_between(
        &self,
        location_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<Vec<LedgerEntry>> {
        if to < from {
            return Err(EngineError::validation(format!(
                "Date range end {} is before start {}",
                to, from
            )));
        }
        self.list_entries(&EntryFilter::for_location(location_id).between(from, to))
            .await
    }

    #[instrument(skip(self))]
    pub async fn ledger_summary(
        &self,
        location_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<LedgerSummary> {
        let entries = self.entries_between(location_id, from, to).await?;
        Ok(summarize(&entries))
    }

    /// Totals per category, largest first.
    #[instrument(skip(self))]
    pub async fn entries_by_category(
        &self,
        location_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<Vec<CategoryTotal>> {
        let entries = self.entries_between(location_id, from, to).await?;

        let mut totals: HashMap<Uuid, (Decimal, u64)> = HashMap::new();
        for entry in &entries {
            let slot = totals
                .entry(entry.category_id)
                .or_insert((Decimal::ZERO, 0));
            slot.0 += entry.amount;
            slot.1 += 1;
        }

        let mut out = Vec::with_capacity(totals.len());
        for (category_id, (total, count)) in totals {
            let category = self.category(category_id).await?;
            out.push(CategoryTotal {
                category_id,
                category_name: category.name,
                category_type: category.category_type,
                total,
                count,
            });
        }
        out.sort_by(|a, b| {
            b.total
                .cmp(&a.total)
                .then_with(|| a.category_name.cmp(&b.category_name))
        });
        Ok(out)
    }

    #[instrument(skip(self))]
    pub async fn entries_by_payment_method(
        &self,
        location_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<Vec<PaymentMethodTotal>> {
        let entries = self.entries_between(location_id, from, to).await?;

        let mut out: Vec<PaymentMethodTotal> = Vec::new();
        for entry in &entries {
            match out
                .iter_mut()
                .find(|t| t.payment_method == entry.payment_method)
            {
                Some(total) => {
                    total.total += entry.amount;
                    total.count += 1;
                }
                None => out.push(PaymentMethodTotal {
                    payment_method: entry.payment_method,
                    total: entry.amount,
                    count: 1,
                }),
            }
        }
        out.sort_by(|a, b| b.total.cmp(&a.total));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn entry(entry_type: EntryType, amount: Decimal) -> LedgerEntry {
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        NewLedgerEntry::new(Uuid::new_v4(), Uuid::new_v4(), entry_type, amount, date, "Test entry")
            .into_entry(Utc::now())
    }

    #[test]
    fn summary_computes_balance_and_margin() {
        let entries = vec![
            entry(EntryType::IncomeService, dec!(1000)),
            entry(EntryType::IncomeProduct, dec!(500)),
            entry(EntryType::Expense, dec!(300)),
        ];
        let summary = summarize(&entries);
        assert_eq!(summary.income_total, dec!(1500));
        assert_eq!(summary.income_count, 2);
        assert_eq!(summary.expense_total, dec!(300));
        assert_eq!(summary.balance, dec!(1200));
        assert_eq!(summary.profit_margin, dec!(80));
    }

    #[test]
    fn summary_without_income_has_zero_margin() {
        let summary = summarize(&[entry(EntryType::Expense, dec!(50))]);
        assert_eq!(summary.balance, dec!(-50));
        assert_eq!(summary.profit_margin, Decimal::ZERO);
    }

    #[test]
    fn amount_bounds() {
        assert!(validate_amount(dec!(0.01)).is_ok());
        assert!(validate_amount(dec!(9999999.99)).is_ok());
        assert!(validate_amount(dec!(10000000)).is_err());
        assert!(validate_amount(Decimal::ZERO).is_err());
    }

    #[test]
    fn description_is_trimmed_before_length_check() {
        assert!(validate_description("  abc  ").is_err());
        assert_eq!(validate_description("  Rent June ").unwrap(), "Rent June");
    }
}
