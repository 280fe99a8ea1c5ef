//! Equipment rental tests: gating, single charge per machine-day, reconciliation.

mod common;

use appointment_service::models::{
    AppointmentStatus, EntryType, EquipmentRental, LedgerEntry, RentalState, ScheduleRental,
    SourceKey, SourceKind,
};
use appointment_service::services::{EngineError, Store};
use chrono::NaiveDate;
use common::{at, TestEngine};
use rust_decimal_macros::dec;

fn june(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, day).unwrap()
}

fn schedule_input(t: &TestEngine, day: u32) -> ScheduleRental {
    ScheduleRental {
        machine_id: t.fx.machine_id,
        location_id: t.fx.location_id,
        rental_date: june(day),
        cost: None,
        notes: None,
    }
}

async fn confirmed_rental(t: &TestEngine, day: u32) -> EquipmentRental {
    let rental = t
        .engine
        .rentals
        .schedule(&schedule_input(t, day))
        .await
        .expect("Failed to schedule rental");
    t.engine
        .rentals
        .confirm(rental.rental_id)
        .await
        .expect("Failed to confirm rental")
}

async fn complete(t: &TestEngine, appointment_id: uuid::Uuid) {
    t.engine
        .booking
        .change_status(appointment_id, AppointmentStatus::Completed)
        .await
        .expect("Failed to complete appointment");
}

async fn rental_entries(t: &TestEngine) -> Vec<LedgerEntry> {
    t.all_entries()
        .await
        .into_iter()
        .filter(|e| e.rental_id.is_some())
        .collect()
}

#[tokio::test]
async fn test_schedule_defaults_cost_and_rejects_duplicates() {
    let t = TestEngine::new();

    let rental = t.engine.rentals.schedule(&schedule_input(&t, 1)).await.unwrap();
    assert_eq!(rental.state, RentalState::Scheduled);
    assert_eq!(rental.cost, dec!(5000));
    assert_eq!(rental.entry_id, None);

    let err = t
        .engine
        .rentals
        .schedule(&schedule_input(&t, 1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "conflict");

    let mut free = schedule_input(&t, 2);
    free.cost = Some(dec!(0));
    let err = t.engine.rentals.schedule(&free).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn test_completion_without_confirmed_rental_books_no_expense() {
    let t = TestEngine::new();
    let appt = t.book(t.fx.laser_id, at(1, 14, 0)).await;
    t.engine.rentals.schedule(&schedule_input(&t, 1)).await.unwrap();

    let outcome = t
        .engine
        .booking
        .change_status(appt.appointment_id, AppointmentStatus::Completed)
        .await
        .unwrap();

    assert!(outcome.is_clean());
    assert_eq!(outcome.entries.len(), 1);
    assert_eq!(outcome.entries[0].entry_type, EntryType::IncomeService);
    assert!(rental_entries(&t).await.is_empty());
}

#[tokio::test]
async fn test_confirmed_rental_is_charged_on_completion() {
    let t = TestEngine::new();
    let rental = confirmed_rental(&t, 1).await;
    let appt = t.book(t.fx.laser_id, at(1, 14, 0)).await;

    let outcome = t
        .engine
        .booking
        .change_status(appt.appointment_id, AppointmentStatus::Completed)
        .await
        .unwrap();
    assert_eq!(outcome.entries.len(), 2);

    let charges = rental_entries(&t).await;
    assert_eq!(charges.len(), 1);
    let charge = &charges[0];
    assert_eq!(charge.entry_type, EntryType::Expense);
    assert_eq!(charge.amount, dec!(5000));
    assert_eq!(charge.entry_date, june(1));
    assert_eq!(charge.source, Some(SourceKey::rental_charge(rental.rental_id)));
    assert_eq!(
        charge.description,
        format!(
            "Equipment rental: Diode Laser on 2024-06-01 - appointments: {}",
            appt.appointment_id
        )
    );

    let rental = t.engine.rentals.get_rental(rental.rental_id).await.unwrap();
    assert_eq!(rental.state, RentalState::Charged);
    assert_eq!(rental.entry_id, Some(charge.entry_id));
}

#[tokio::test]
async fn test_second_appointment_on_same_day_joins_existing_charge() {
    let t = TestEngine::new();
    confirmed_rental(&t, 1).await;
    let first = t.book(t.fx.laser_id, at(1, 14, 0)).await;
    let second = t.book(t.fx.laser_id, at(1, 15, 0)).await;

    complete(&t, first.appointment_id).await;
    complete(&t, second.appointment_id).await;

    let charges = rental_entries(&t).await;
    assert_eq!(charges.len(), 1);
    assert_eq!(charges[0].amount, dec!(5000));
    assert!(charges[0]
        .description
        .contains(&first.appointment_id.to_string()));
    assert!(charges[0]
        .description
        .contains(&second.appointment_id.to_string()));
}

#[tokio::test]
async fn test_late_confirmation_is_charged_once_by_replay_or_reconcile() {
    let t = TestEngine::new();
    let rental = t.engine.rentals.schedule(&schedule_input(&t, 1)).await.unwrap();
    let appt = t.book(t.fx.laser_id, at(1, 14, 0)).await;
    complete(&t, appt.appointment_id).await;
    assert!(rental_entries(&t).await.is_empty());

    t.engine.rentals.confirm(rental.rental_id).await.unwrap();

    let report = t.engine.rentals.reconcile_rentals(None).await.unwrap();
    assert_eq!(report.charged.len(), 1);
    assert!(report.warnings.is_empty());
    assert!(report.charged[0]
        .description
        .contains(&appt.appointment_id.to_string()));

    // Neither a second sweep nor a completion replay charges again.
    let again = t.engine.rentals.reconcile_rentals(None).await.unwrap();
    assert!(again.charged.is_empty());
    let replay = t
        .engine
        .booking
        .replay_completion(appt.appointment_id)
        .await
        .unwrap();
    assert!(replay.entries.is_empty());
    assert!(replay.is_clean());

    let charges = rental_entries(&t).await;
    assert_eq!(charges.len(), 1);
    assert_eq!(
        charges[0].description.matches(&appt.appointment_id.to_string()).count(),
        1
    );
}

#[tokio::test]
async fn test_replay_after_confirmation_charges_the_rental() {
    let t = TestEngine::new();
    let rental = t.engine.rentals.schedule(&schedule_input(&t, 1)).await.unwrap();
    let appt = t.book(t.fx.laser_id, at(1, 14, 0)).await;
    complete(&t, appt.appointment_id).await;

    t.engine.rentals.confirm(rental.rental_id).await.unwrap();
    let replay = t
        .engine
        .booking
        .replay_completion(appt.appointment_id)
        .await
        .unwrap();

    assert_eq!(replay.entries.len(), 1);
    assert_eq!(replay.entries[0].rental_id, Some(rental.rental_id));
    assert_eq!(rental_entries(&t).await.len(), 1);
}

#[tokio::test]
async fn test_reconcile_ignores_days_without_completed_appointments() {
    let t = TestEngine::new();
    confirmed_rental(&t, 2).await;
    t.book(t.fx.laser_id, at(2, 14, 0)).await;

    let report = t.engine.rentals.reconcile_rentals(None).await.unwrap();

    assert!(report.charged.is_empty());
    assert!(rental_entries(&t).await.is_empty());
}

#[tokio::test]
async fn test_charged_rental_cannot_be_confirmed_or_canceled() {
    let t = TestEngine::new();
    let rental = confirmed_rental(&t, 1).await;
    let appt = t.book(t.fx.laser_id, at(1, 14, 0)).await;
    complete(&t, appt.appointment_id).await;

    let err = t.engine.rentals.cancel(rental.rental_id).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    let err = t.engine.rentals.confirm(rental.rental_id).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn test_canceled_rental_can_be_reinstated() {
    let t = TestEngine::new();
    let rental = confirmed_rental(&t, 1).await;

    let canceled = t.engine.rentals.cancel(rental.rental_id).await.unwrap();
    assert_eq!(canceled.state, RentalState::Canceled);

    let again = t.engine.rentals.confirm(rental.rental_id).await.unwrap();
    assert_eq!(again.state, RentalState::Confirmed);
}

#[tokio::test]
async fn test_pending_confirmations_track_rental_state() {
    let t = TestEngine::new();
    let appt = t.book(t.fx.laser_id, at(2, 14, 0)).await;
    t.book(t.fx.facial_id, at(2, 10, 0)).await;

    let pending = t
        .engine
        .rentals
        .pending_confirmations(t.fx.location_id)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].rental_date, june(2));
    assert_eq!(pending[0].machine_id, t.fx.machine_id);
    assert_eq!(pending[0].appointment_ids, vec![appt.appointment_id]);
    assert_eq!(pending[0].rental_state, None);

    let rental = t.engine.rentals.schedule(&schedule_input(&t, 2)).await.unwrap();
    let pending = t
        .engine
        .rentals
        .pending_confirmations(t.fx.location_id)
        .await
        .unwrap();
    assert_eq!(pending[0].rental_state, Some(RentalState::Scheduled));

    t.engine.rentals.confirm(rental.rental_id).await.unwrap();
    assert!(t
        .engine
        .rentals
        .pending_confirmations(t.fx.location_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_charged_rental_with_missing_entry_warns_instead_of_recharging() {
    let t = TestEngine::new();
    let rental = confirmed_rental(&t, 1).await;
    let first = t.book(t.fx.laser_id, at(1, 14, 0)).await;
    complete(&t, first.appointment_id).await;

    let charge = rental_entries(&t).await.remove(0);
    let mut tx = t.store.begin().await.unwrap();
    assert!(tx.delete_entry(charge.entry_id).await.unwrap());
    tx.commit().await.unwrap();
    let unlinked = t.engine.rentals.get_rental(rental.rental_id).await.unwrap();
    assert_eq!(unlinked.state, RentalState::Charged);
    assert_eq!(unlinked.entry_id, None);

    let second = t.book(t.fx.laser_id, at(1, 15, 0)).await;
    let outcome = t
        .engine
        .booking
        .change_status(second.appointment_id, AppointmentStatus::Completed)
        .await
        .unwrap();

    assert_eq!(outcome.warnings.len(), 1);
    assert_eq!(
        outcome.warnings[0].source_event_id,
        SourceKey::new(SourceKind::Appointment, second.appointment_id, "rental_charge").event_id()
    );
    assert_eq!(outcome.warnings[0].rule, "rental_charge");
    assert_eq!(outcome.entries.len(), 1);
    assert_eq!(outcome.entries[0].entry_type, EntryType::IncomeService);
    assert!(rental_entries(&t).await.is_empty());
    assert!(t
        .all_entries()
        .await
        .iter()
        .all(|e| e.entry_type != EntryType::Expense));

    let rental = t.engine.rentals.get_rental(rental.rental_id).await.unwrap();
    assert_eq!(rental.state, RentalState::Charged);
}
