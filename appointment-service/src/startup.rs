//! Application startup and lifecycle management.

use crate::config::AppointmentConfig;
use crate::services::{
    get_metrics, init_metrics, Database, Engine, EngineDeps, LogNotifier, PgCatalog, SystemClock,
};
use axum::{
    extract::State, http::StatusCode, middleware, response::IntoResponse, routing::get, Json,
    Router,
};
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// State for health check endpoints.
#[derive(Clone)]
struct HealthState {
    engine: Arc<Engine>,
}

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.engine.health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": "appointment-service",
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "appointment-service",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness probes.
async fn readiness_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.engine.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    let metrics = get_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        metrics,
    )
}

/// Health, readiness and metrics routes over `engine`.
pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(HealthState { engine })
}

/// One pass of the periodic jobs. Failures are logged and retried next tick.
pub async fn run_sweeps_once(engine: &Engine) {
    match engine.reminders.run().await {
        Ok(report) => tracing::debug!(
            sent_24h = report.sent_24h,
            sent_2h = report.sent_2h,
            "Reminder sweep finished"
        ),
        Err(e) => tracing::error!(error = %e, "Reminder sweep failed"),
    }

    match engine.rentals.reconcile_rentals(None).await {
        Ok(report) => {
            for warning in &report.warnings {
                tracing::warn!(
                    rule = %warning.rule,
                    source_event_id = %warning.source_event_id,
                    "Rental reconciliation left an unresolved charge"
                );
            }
        }
        Err(e) => tracing::error!(error = %e, "Rental reconciliation failed"),
    }
}

async fn run_sweeps(engine: Arc<Engine>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        run_sweeps_once(&engine).await;
    }
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    sweep_interval: Duration,
    db: Database,
    engine: Arc<Engine>,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: AppointmentConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: AppointmentConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(
        config: AppointmentConfig,
        run_migrations: bool,
    ) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let store = Arc::new(db.clone());
        let engine = Arc::new(Engine::new(EngineDeps {
            store: store.clone(),
            categories: store,
            catalog: Arc::new(PgCatalog::new(db.pool().clone())),
            notifier: Arc::new(LogNotifier),
            clock: Arc::new(SystemClock),
            edit_window_days: config.engine.manual_entry_edit_window_days,
        }));

        let http_addr = config.common.socket_addr()?;
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(http_port = http_port, "Appointment service listener bound");

        Ok(Self {
            http_port,
            http_listener,
            sweep_interval: Duration::from_secs(config.engine.sweep_interval_secs.max(1)),
            db,
            engine,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn engine(&self) -> Arc<Engine> {
        self.engine.clone()
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let http_router = router(self.engine.clone());

        tracing::info!(
            service = "appointment-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            sweep_interval_secs = self.sweep_interval.as_secs(),
            "Service ready to accept connections"
        );

        tokio::select! {
            result = axum::serve(self.http_listener, http_router) => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "HTTP server error");
                    return Err(std::io::Error::other(format!("HTTP server error: {}", e)));
                }
            }
            _ = run_sweeps(self.engine, self.sweep_interval) => {}
        }

        Ok(())
    }
}
