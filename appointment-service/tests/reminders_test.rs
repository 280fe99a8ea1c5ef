//! Reminder sweep tests.

mod common;

use appointment_service::models::AppointmentStatus;
use appointment_service::services::NotificationKind;
use chrono::{Duration, TimeZone, Utc};
use common::{at, TestEngine};

#[tokio::test]
async fn test_reminders_are_sent_once_per_window() {
    let mut t = TestEngine::new();
    let tomorrow = t.book(t.fx.facial_id, at(1, 8, 0)).await;
    let soon = t
        .book(t.fx.facial_id, Utc.with_ymd_and_hms(2024, 5, 31, 10, 0, 0).unwrap())
        .await;
    t.drain_notifications();

    let report = t.engine.reminders.run().await.unwrap();
    assert_eq!(report.sent_24h, 1);
    assert_eq!(report.sent_2h, 1);

    let mut sent = t.drain_notifications();
    sent.sort_by_key(|(kind, _)| kind.as_str());
    assert_eq!(
        sent,
        vec![
            (NotificationKind::Reminder24h, tomorrow.appointment_id),
            (NotificationKind::Reminder2h, soon.appointment_id),
        ]
    );

    let again = t.engine.reminders.run().await.unwrap();
    assert_eq!((again.sent_24h, again.sent_2h), (0, 0));

    let stored = t
        .engine
        .booking
        .get_appointment(tomorrow.appointment_id)
        .await
        .unwrap();
    assert!(stored.reminder_24h_sent);
    assert!(!stored.reminder_2h_sent);
}

#[tokio::test]
async fn test_two_hour_reminder_follows_the_day_before_notice() {
    let mut t = TestEngine::new();
    let appt = t.book(t.fx.facial_id, at(1, 8, 0)).await;
    t.engine.reminders.run().await.unwrap();
    t.drain_notifications();

    t.clock.advance(Duration::hours(22));
    let report = t.engine.reminders.run().await.unwrap();

    assert_eq!(report.sent_2h, 1);
    assert_eq!(
        t.drain_notifications(),
        vec![(NotificationKind::Reminder2h, appt.appointment_id)]
    );
}

#[tokio::test]
async fn test_canceled_appointments_get_no_reminders() {
    let t = TestEngine::new();
    let appt = t.book(t.fx.facial_id, at(1, 8, 0)).await;
    t.engine
        .booking
        .change_status(appt.appointment_id, AppointmentStatus::Canceled)
        .await
        .unwrap();

    let report = t.engine.reminders.run().await.unwrap();

    assert_eq!((report.sent_24h, report.sent_2h), (0, 0));
}
