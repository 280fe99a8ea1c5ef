//! Engine tests against PostgreSQL. Run with TEST_DATABASE_URL set:
//! `cargo test -p appointment-service --test postgres_test -- --ignored`

mod common;

use appointment_service::config::{AppointmentConfig, DatabaseConfig, EngineConfig};
use appointment_service::models::{AppointmentStatus, CreateAppointment, EntryFilter};
use appointment_service::services::EngineError;
use appointment_service::startup::Application;
use chrono::{Duration, DurationRound, Utc};
use futures::future::join_all;
use rust_decimal_macros::dec;
use serial_test::serial;
use service_core::config::Config as CommonConfig;
use sqlx::PgPool;
use uuid::Uuid;

struct Seeded {
    location_id: Uuid,
    client_id: Uuid,
    professional_id: Uuid,
    service_id: Uuid,
}

async fn spawn_app() -> Application {
    common::init_tracing();

    let database_url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set to run PostgreSQL tests");

    let config = AppointmentConfig {
        common: CommonConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Default::default()
        },
        service_name: "appointment-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: database_url,
            max_connections: 8,
            min_connections: 1,
        },
        engine: EngineConfig::default(),
    };

    Application::build(config)
        .await
        .expect("Failed to build application")
}

/// Fresh location with one client, professional and 60 minute service.
async fn seed(pool: &PgPool) -> Seeded {
    let seeded = Seeded {
        location_id: Uuid::new_v4(),
        client_id: Uuid::new_v4(),
        professional_id: Uuid::new_v4(),
        service_id: Uuid::new_v4(),
    };

    sqlx::query("INSERT INTO locations (location_id, name) VALUES ($1, $2)")
        .bind(seeded.location_id)
        .bind("Test Studio")
        .execute(pool)
        .await
        .expect("Failed to seed location");
    sqlx::query("INSERT INTO clients (client_id, full_name) VALUES ($1, $2)")
        .bind(seeded.client_id)
        .bind("Test Client")
        .execute(pool)
        .await
        .expect("Failed to seed client");
    sqlx::query(
        "INSERT INTO professionals (professional_id, location_id, full_name) VALUES ($1, $2, $3)",
    )
    .bind(seeded.professional_id)
    .bind(seeded.location_id)
    .bind("Test Professional")
    .execute(pool)
    .await
    .expect("Failed to seed professional");
    sqlx::query(
        "INSERT INTO services (service_id, location_id, name, duration_minutes, price) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(seeded.service_id)
    .bind(seeded.location_id)
    .bind("Facial")
    .bind(60_i32)
    .bind(dec!(1000))
    .execute(pool)
    .await
    .expect("Failed to seed service");

    seeded
}

fn next_week_slot() -> chrono::DateTime<Utc> {
    (Utc::now() + Duration::days(7))
        .duration_trunc(Duration::hours(1))
        .expect("Failed to round slot")
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
#[serial]
async fn test_concurrent_bookings_admit_exactly_one() {
    let app = spawn_app().await;
    let s = seed(app.db().pool()).await;
    let engine = app.engine();

    let input = CreateAppointment {
        location_id: s.location_id,
        client_id: s.client_id,
        service_id: s.service_id,
        professional_id: Some(s.professional_id),
        start_utc: next_week_slot(),
        end_utc: None,
        notes: None,
        created_by: None,
    };

    let attempts = (0..6).map(|_| {
        let engine = engine.clone();
        let input = input.clone();
        tokio::spawn(async move { engine.booking.create_appointment(&input).await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|r| r.expect("booking task panicked"))
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, EngineError::Conflict { .. })));
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
#[serial]
async fn test_completion_projection_is_idempotent() {
    let app = spawn_app().await;
    let s = seed(app.db().pool()).await;
    let engine = app.engine();

    let appt = engine
        .booking
        .create_appointment(&CreateAppointment {
            location_id: s.location_id,
            client_id: s.client_id,
            service_id: s.service_id,
            professional_id: Some(s.professional_id),
            start_utc: next_week_slot(),
            end_utc: None,
            notes: None,
            created_by: None,
        })
        .await
        .expect("Failed to book");

    engine
        .booking
        .record_deposit(appt.appointment_id, dec!(300))
        .await
        .expect("Failed to record deposit");
    engine
        .booking
        .change_status(appt.appointment_id, AppointmentStatus::Completed)
        .await
        .expect("Failed to complete");
    let replay = engine
        .booking
        .replay_completion(appt.appointment_id)
        .await
        .expect("Failed to replay");
    assert!(replay.entries.is_empty());

    let entries = engine
        .ledger
        .list_entries(&EntryFilter {
            appointment_id: Some(appt.appointment_id),
            ..Default::default()
        })
        .await
        .expect("Failed to list entries");
    assert_eq!(entries.len(), 2);
    let total: rust_decimal::Decimal = entries.iter().map(|e| e.amount).sum();
    assert_eq!(total, dec!(1000));
}
