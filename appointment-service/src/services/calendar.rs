//! Resource calendar: per-professional availability over half-open intervals.

use crate::models::{Appointment, Availability};
use crate::services::error::{EngineError, EngineResult};
use crate::services::store::{Store, StoreTx};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

pub struct ResourceCalendar {
    store: Arc<dyn Store>,
}

/// Rejects zero-length and inverted intervals.
pub fn validate_interval(start: DateTime<Utc>, end: DateTime<Utc>) -> EngineResult<()> {
    if end <= start {
        return Err(EngineError::validation(format!(
            "End time {} must be after start time {}",
            end, start
        )));
    }
    Ok(())
}

fn conflict_message(conflicts: &[Appointment]) -> String {
    let slots: Vec<String> = conflicts
        .iter()
        .map(|a| {
            format!(
                "{} ({} - {})",
                a.appointment_id,
                a.start_utc.format("%Y-%m-%d %H:%M"),
                a.end_utc.format("%H:%M")
            )
        })
        .collect();
    format!(
        "Professional already has {} overlapping appointment(s): {}",
        conflicts.len(),
        slots.join(", ")
    )
}

impl ResourceCalendar {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Availability of `professional_id` over `[start, end)`, ignoring `exclude`.
    #[instrument(skip(self))]
    pub async fn check_availability(
        &self,
        professional_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> EngineResult<Availability> {
        validate_interval(start, end)?;

        let mut tx = self.store.begin().await?;
        let conflicts = tx
            .find_overlapping(professional_id, start, end, exclude)
            .await?;
        tx.rollback().await?;

        Ok(Availability {
            available: conflicts.is_empty(),
            conflicts,
        })
    }

    /// Locks the professional's calendar for the rest of `tx` and fails with
    /// `Conflict` when the slot is taken. Callers write the appointment in the
    /// same transaction.
    pub async fn reserve(
        tx: &mut dyn StoreTx,
        professional_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> EngineResult<()> {
        tx.lock_professional(professional_id).await?;
        let conflicts = tx
            .find_overlapping(professional_id, start, end, exclude)
            .await?;

        if conflicts.is_empty() {
            return Ok(());
        }

        debug!(
            professional_id = %professional_id,
            conflicts = conflicts.len(),
            "Slot already taken"
        );
        Err(EngineError::Conflict {
            message: conflict_message(&conflicts),
            conflicts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn inverted_and_empty_intervals_are_rejected() {
        let ten = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        let eleven = Utc.with_ymd_and_hms(2024, 6, 1, 11, 0, 0).unwrap();

        assert!(validate_interval(ten, eleven).is_ok());
        assert!(matches!(
            validate_interval(ten, ten),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            validate_interval(eleven, ten),
            Err(EngineError::Validation(_))
        ));
    }
}
