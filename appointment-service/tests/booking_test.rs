//! Booking engine integration tests: calendar guard, lifecycle and notifications.

mod common;

use appointment_service::models::{
    AppointmentFilter, AppointmentStatus, PaymentStatus, Professional,
};
use appointment_service::services::{EngineError, NotificationKind};
use chrono::Duration;
use common::{at, TestEngine};
use futures::future::join_all;
use rust_decimal_macros::dec;
use uuid::Uuid;

#[tokio::test]
async fn test_book_appointment_derives_end_and_total_from_service() {
    let t = TestEngine::new();

    let appt = t.book(t.fx.facial_id, at(1, 10, 0)).await;

    assert_eq!(appt.status, AppointmentStatus::Pending);
    assert_eq!(appt.payment_status, PaymentStatus::Unpaid);
    assert_eq!(appt.end_utc, at(1, 11, 0));
    assert_eq!(appt.total_amount, dec!(1000));
    assert_eq!(appt.machine_id, None);

    let laser = t.book(t.fx.laser_id, at(1, 14, 0)).await;
    assert_eq!(laser.machine_id, Some(t.fx.machine_id));
    assert_eq!(laser.end_utc, at(1, 14, 45));
}

#[tokio::test]
async fn test_overlapping_slot_is_rejected_and_adjacent_slot_accepted() {
    let t = TestEngine::new();

    let first = t.book(t.fx.facial_id, at(1, 10, 0)).await;

    let err = t
        .engine
        .booking
        .create_appointment(&t.booking(t.fx.facial_id, at(1, 10, 30)))
        .await
        .expect_err("10:30 overlaps 10:00-11:00");
    assert!(matches!(err, EngineError::Conflict { .. }));
    assert_eq!(err.conflicts().len(), 1);
    assert_eq!(err.conflicts()[0].appointment_id, first.appointment_id);

    // Half-open intervals: 11:00 starts exactly when the first ends.
    let adjacent = t.book(t.fx.facial_id, at(1, 11, 0)).await;
    assert_eq!(adjacent.start_utc, first.end_utc);
}

#[tokio::test]
async fn test_concurrent_bookings_for_same_slot_admit_exactly_one() {
    let t = TestEngine::new();
    let input = t.booking(t.fx.facial_id, at(3, 9, 0));

    let results = join_all((0..8).map(|_| t.engine.booking.create_appointment(&input))).await;

    let booked = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(EngineError::Conflict { .. })))
        .count();
    assert_eq!(booked, 1);
    assert_eq!(conflicts, 7);
}

#[tokio::test]
async fn test_different_professionals_do_not_conflict() {
    let t = TestEngine::new();
    t.book(t.fx.facial_id, at(1, 10, 0)).await;

    let mut input = t.booking(t.fx.facial_id, at(1, 10, 0));
    input.professional_id = Some(t.fx.other_professional_id);
    let result = t.engine.booking.create_appointment(&input).await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn test_unassigned_appointments_hold_no_calendar() {
    let t = TestEngine::new();

    let mut input = t.booking(t.fx.facial_id, at(1, 10, 0));
    input.professional_id = None;
    t.engine.booking.create_appointment(&input).await.unwrap();
    t.engine.booking.create_appointment(&input).await.unwrap();

    // The assigned professional is still free for that slot.
    t.book(t.fx.facial_id, at(1, 10, 0)).await;
}

#[tokio::test]
async fn test_past_start_and_inverted_interval_are_rejected() {
    let t = TestEngine::new();

    let past = t.booking(t.fx.facial_id, at(1, 10, 0) - Duration::days(3));
    let err = t.engine.booking.create_appointment(&past).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let mut inverted = t.booking(t.fx.facial_id, at(1, 10, 0));
    inverted.end_utc = Some(at(1, 9, 0));
    let err = t
        .engine
        .booking
        .create_appointment(&inverted)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let mut empty = t.booking(t.fx.facial_id, at(1, 10, 0));
    empty.end_utc = Some(at(1, 10, 0));
    let err = t.engine.booking.create_appointment(&empty).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn test_missing_or_inactive_references_are_rejected() {
    let t = TestEngine::new();

    let mut input = t.booking(t.fx.facial_id, at(1, 10, 0));
    input.client_id = Uuid::new_v4();
    let err = t.engine.booking.create_appointment(&input).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));

    let retired = Uuid::new_v4();
    t.catalog.put_professional(Professional {
        professional_id: retired,
        location_id: t.fx.location_id,
        full_name: "Retired Stylist".to_string(),
        monthly_salary: None,
        active: false,
    });

    let mut input = t.booking(t.fx.facial_id, at(1, 10, 0));
    input.professional_id = Some(retired);
    let err = t.engine.booking.create_appointment(&input).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let mut input = t.booking(t.fx.facial_id, at(1, 10, 0));
    input.location_id = t.fx.other_location_id;
    let err = t.engine.booking.create_appointment(&input).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    assert!(t
        .engine
        .booking
        .list_appointments(&AppointmentFilter::default())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_status_transitions_follow_state_machine() {
    let t = TestEngine::new();
    let appt = t.book(t.fx.facial_id, at(1, 10, 0)).await;
    let id = appt.appointment_id;

    let confirmed = t
        .engine
        .booking
        .change_status(id, AppointmentStatus::Confirmed)
        .await
        .unwrap();
    assert_eq!(confirmed.appointment.status, AppointmentStatus::Confirmed);

    let back = t
        .engine
        .booking
        .change_status(id, AppointmentStatus::Pending)
        .await
        .unwrap();
    assert_eq!(back.appointment.status, AppointmentStatus::Pending);
    assert!(back.entries.is_empty());

    let same = t
        .engine
        .booking
        .change_status(id, AppointmentStatus::Pending)
        .await
        .unwrap();
    assert_eq!(same.appointment.updated_utc, back.appointment.updated_utc);

    t.engine
        .booking
        .change_status(id, AppointmentStatus::Canceled)
        .await
        .unwrap();
    let err = t
        .engine
        .booking
        .change_status(id, AppointmentStatus::Confirmed)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn test_canceled_appointment_frees_its_slot() {
    let t = TestEngine::new();
    let first = t.book(t.fx.facial_id, at(1, 10, 0)).await;

    t.engine
        .booking
        .change_status(first.appointment_id, AppointmentStatus::Canceled)
        .await
        .unwrap();

    let availability = t
        .engine
        .booking
        .check_availability(t.fx.professional_id, at(1, 10, 0), at(1, 11, 0), None)
        .await
        .unwrap();
    assert!(availability.available);

    t.book(t.fx.facial_id, at(1, 10, 0)).await;
}

#[tokio::test]
async fn test_check_availability_excludes_the_appointment_being_moved() {
    let t = TestEngine::new();
    let appt = t.book(t.fx.facial_id, at(1, 10, 0)).await;

    let busy = t
        .engine
        .booking
        .check_availability(t.fx.professional_id, at(1, 10, 30), at(1, 11, 30), None)
        .await
        .unwrap();
    assert!(!busy.available);
    assert_eq!(busy.conflicts.len(), 1);

    let moving = t
        .engine
        .booking
        .check_availability(
            t.fx.professional_id,
            at(1, 10, 30),
            at(1, 11, 30),
            Some(appt.appointment_id),
        )
        .await
        .unwrap();
    assert!(moving.available);
}

#[tokio::test]
async fn test_deposit_rules() {
    let t = TestEngine::new();
    let appt = t.book(t.fx.facial_id, at(1, 10, 0)).await;
    let id = appt.appointment_id;

    let err = t.engine.booking.record_deposit(id, dec!(0)).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    let err = t
        .engine
        .booking
        .record_deposit(id, dec!(1000.01))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let outcome = t.engine.booking.record_deposit(id, dec!(300)).await.unwrap();
    assert_eq!(outcome.appointment.payment_status, PaymentStatus::DepositPaid);
    assert_eq!(outcome.appointment.deposit_amount, Some(dec!(300)));

    let err = t.engine.booking.record_deposit(id, dec!(100)).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn test_created_and_canceled_notifications_are_dispatched() {
    let mut t = TestEngine::new();
    let appt = t.book(t.fx.facial_id, at(1, 10, 0)).await;
    t.engine
        .booking
        .change_status(appt.appointment_id, AppointmentStatus::Confirmed)
        .await
        .unwrap();
    t.engine
        .booking
        .change_status(appt.appointment_id, AppointmentStatus::Canceled)
        .await
        .unwrap();

    assert_eq!(
        t.drain_notifications(),
        vec![
            (NotificationKind::Created, appt.appointment_id),
            (NotificationKind::Canceled, appt.appointment_id),
        ]
    );
}

#[tokio::test]
async fn test_upcoming_lists_live_appointments_in_window() {
    let t = TestEngine::new();
    let tomorrow = t.book(t.fx.facial_id, at(1, 10, 0)).await;
    let next_week = t.book(t.fx.facial_id, at(8, 10, 0)).await;
    let canceled = t.book(t.fx.facial_id, at(2, 10, 0)).await;
    t.engine
        .booking
        .change_status(canceled.appointment_id, AppointmentStatus::Canceled)
        .await
        .unwrap();

    let upcoming = t.engine.booking.upcoming(t.fx.location_id, 3).await.unwrap();
    let ids: Vec<_> = upcoming.iter().map(|a| a.appointment_id).collect();
    assert_eq!(ids, vec![tomorrow.appointment_id]);

    let week = t.engine.booking.upcoming(t.fx.location_id, 14).await.unwrap();
    assert_eq!(week.len(), 2);
    assert_eq!(week[1].appointment_id, next_week.appointment_id);

    assert!(t.engine.booking.upcoming(t.fx.location_id, 0).await.is_err());
}
