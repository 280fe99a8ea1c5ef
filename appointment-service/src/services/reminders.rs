//! Reminder sweep: 24h and 2h notices for upcoming appointments.

use crate::models::{Appointment, AppointmentFilter, AppointmentStatus};
use crate::services::clock::Clock;
use crate::services::error::EngineResult;
use crate::services::notifier::{NotificationKind, Notifier};
use crate::services::store::Store;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Reminders dispatched by one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReminderReport {
    pub sent_24h: usize,
    pub sent_2h: usize,
}

/// Reminder owed for `appt` at `now`, if any. Windows are inclusive.
pub fn reminder_due(appt: &Appointment, now: DateTime<Utc>) -> Option<NotificationKind> {
    if !appt.status.blocks_calendar() {
        return None;
    }
    let in_window = |from: Duration, to: Duration| {
        appt.start_utc >= now + from && appt.start_utc <= now + to
    };
    if !appt.reminder_24h_sent && in_window(Duration::hours(23), Duration::hours(25)) {
        return Some(NotificationKind::Reminder24h);
    }
    if !appt.reminder_2h_sent && in_window(Duration::minutes(90), Duration::minutes(150)) {
        return Some(NotificationKind::Reminder2h);
    }
    None
}

pub struct ReminderSweep {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl ReminderSweep {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            notifier,
            clock,
        }
    }

    /// Flags and notifies every appointment inside a reminder window. Flags
    /// commit before dispatch, so a reminder is sent at most once.
    #[instrument(skip(self))]
    pub async fn run(&self) -> EngineResult<ReminderReport> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let candidates = tx
            .list_appointments(&AppointmentFilter {
                statuses: AppointmentStatus::BLOCKING.to_vec(),
                start_from: Some(now + Duration::minutes(90)),
                start_before: Some(now + Duration::hours(25) + Duration::seconds(1)),
                ..Default::default()
            })
            .await?;

        let mut due = Vec::new();
        for mut appt in candidates {
            let Some(kind) = reminder_due(&appt, now) else {
                continue;
            };
            match kind {
                NotificationKind::Reminder24h => appt.reminder_24h_sent = true,
                _ => appt.reminder_2h_sent = true,
            }
            appt.updated_utc = now;
            tx.update_appointment(&appt).await?;
            due.push((kind, appt.appointment_id));
        }
        tx.commit().await?;

        let mut report = ReminderReport::default();
        for (kind, appointment_id) in due {
            self.notifier.notify(kind, appointment_id);
            match kind {
                NotificationKind::Reminder24h => report.sent_24h += 1,
                _ => report.sent_2h += 1,
            }
        }
        if report != ReminderReport::default() {
            debug!(sent_24h = report.sent_24h, sent_2h = report.sent_2h, "Reminders sent");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaymentStatus;
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn appointment_at(start: DateTime<Utc>) -> Appointment {
        Appointment {
            appointment_id: Uuid::new_v4(),
            location_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            service_id: Uuid::new_v4(),
            professional_id: None,
            machine_id: None,
            start_utc: start,
            end_utc: start + Duration::hours(1),
            status: AppointmentStatus::Confirmed,
            payment_status: PaymentStatus::Unpaid,
            total_amount: Decimal::from(100),
            deposit_amount: None,
            notes: None,
            reminder_24h_sent: false,
            reminder_2h_sent: false,
            created_by: None,
            created_utc: start,
            updated_utc: start,
        }
    }

    #[test]
    fn windows_are_inclusive_at_both_ends() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();

        let appt = appointment_at(now + Duration::hours(23));
        assert_eq!(reminder_due(&appt, now), Some(NotificationKind::Reminder24h));
        let appt = appointment_at(now + Duration::hours(25));
        assert_eq!(reminder_due(&appt, now), Some(NotificationKind::Reminder24h));
        let appt = appointment_at(now + Duration::minutes(90));
        assert_eq!(reminder_due(&appt, now), Some(NotificationKind::Reminder2h));
        let appt = appointment_at(now + Duration::minutes(150));
        assert_eq!(reminder_due(&appt, now), Some(NotificationKind::Reminder2h));

        let appt = appointment_at(now + Duration::hours(12));
        assert_eq!(reminder_due(&appt, now), None);
    }

    #[test]
    fn sent_flags_and_closed_statuses_suppress_reminders() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();

        let mut appt = appointment_at(now + Duration::hours(24));
        appt.reminder_24h_sent = true;
        assert_eq!(reminder_due(&appt, now), None);

        let mut appt = appointment_at(now + Duration::hours(2));
        appt.status = AppointmentStatus::Canceled;
        assert_eq!(reminder_due(&appt, now), None);
    }
}
