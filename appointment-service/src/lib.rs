//! Appointment Service - Appointment scheduling kept in lockstep with the financial ledger.

pub mod config;
pub mod models;
pub mod services;
pub mod startup;
