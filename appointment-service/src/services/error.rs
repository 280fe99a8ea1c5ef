//! Engine error taxonomy.

use crate::models::{Appointment, CategoryIntent};
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input; rejected before any state change.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Booking overlap, with the appointments already holding the slot.
    #[error("{message}")]
    Conflict {
        message: String,
        conflicts: Vec<Appointment>,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Could not resolve {intent} category for location {location_id}: {source}")]
    CategoryResolution {
        location_id: Uuid,
        intent: CategoryIntent,
        #[source]
        source: AppError,
    },

    #[error(transparent)]
    Store(#[from] AppError),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        EngineError::NotFound(msg.into())
    }

    /// Conflicting appointments, empty for every other variant.
    pub fn conflicts(&self) -> &[Appointment] {
        match self {
            EngineError::Conflict { conflicts, .. } => conflicts,
            _ => &[],
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::Conflict { .. } => "conflict",
            EngineError::NotFound(_) => "not_found",
            EngineError::CategoryResolution { .. } => "category_resolution",
            EngineError::Store(e) => e.kind(),
        }
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            EngineError::Conflict { message, .. } => AppError::Conflict(anyhow::anyhow!(message)),
            EngineError::NotFound(msg) => AppError::NotFound(anyhow::anyhow!(msg)),
            EngineError::CategoryResolution { source, .. } => source,
            EngineError::Store(e) => e,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
