//! Configuration module for appointment-service.

use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct AppointmentConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Period of the reminder and rental reconciliation sweeps.
    pub sweep_interval_secs: u64,
    /// Manual entries older than this cannot be edited.
    pub manual_entry_edit_window_days: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 300,
            manual_entry_edit_window_days: 30,
        }
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl AppointmentConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let defaults = EngineConfig::default();

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "appointment-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: parse_or("DATABASE_MIN_CONNECTIONS", 2),
            },
            engine: EngineConfig {
                sweep_interval_secs: parse_or(
                    "SWEEP_INTERVAL_SECS",
                    defaults.sweep_interval_secs,
                ),
                manual_entry_edit_window_days: parse_or(
                    "MANUAL_ENTRY_EDIT_WINDOW_DAYS",
                    defaults.manual_entry_edit_window_days,
                ),
            },
        })
    }
}
