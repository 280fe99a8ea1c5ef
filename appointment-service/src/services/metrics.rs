//! Prometheus metrics for appointment-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter, CounterVec, HistogramVec,
    IntCounter, TextEncoder,
};

/// Booking attempts by outcome (created, conflict, rejected).
pub static BOOKINGS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "appointment_bookings_total",
        "Total number of booking attempts",
        &["outcome"]
    )
    .expect("Failed to register bookings_total")
});

/// Status transitions by target status.
pub static STATUS_CHANGES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "appointment_status_changes_total",
        "Total number of appointment status transitions",
        &["status"]
    )
    .expect("Failed to register status_changes_total")
});

/// Ledger entries created by the projector, by rule.
pub static LEDGER_ENTRIES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "appointment_ledger_entries_total",
        "Total number of derived ledger entries created",
        &["rule"]
    )
    .expect("Failed to register ledger_entries_total")
});

/// Projection rules that failed and need manual reconciliation.
pub static PROJECTION_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "appointment_projection_failures_total",
        "Total number of failed projection rules",
        &["rule"]
    )
    .expect("Failed to register projection_failures_total")
});

/// Machine-backed completions with no confirmed rental for the day.
pub static RENTAL_GAPS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "appointment_rental_gaps_total",
        "Completions on rented machines without a confirmed rental"
    )
    .expect("Failed to register rental_gaps_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "appointment_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&BOOKINGS_TOTAL);
    Lazy::force(&STATUS_CHANGES_TOTAL);
    Lazy::force(&LEDGER_ENTRIES_TOTAL);
    Lazy::force(&PROJECTION_FAILURES_TOTAL);
    Lazy::force(&RENTAL_GAPS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

pub fn record_booking(outcome: &str) {
    BOOKINGS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_status_change(status: &str) {
    STATUS_CHANGES_TOTAL.with_label_values(&[status]).inc();
}

pub fn record_ledger_entry(rule: &str) {
    LEDGER_ENTRIES_TOTAL.with_label_values(&[rule]).inc();
}

pub fn record_projection_failure(rule: &str) {
    PROJECTION_FAILURES_TOTAL.with_label_values(&[rule]).inc();
}

pub fn record_rental_gap() {
    RENTAL_GAPS_TOTAL.inc();
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
