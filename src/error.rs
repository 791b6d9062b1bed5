//! Error taxonomy for the status core.
//!
//! Caller errors (`InvalidArgument`, `NotFound`) surface immediately.
//! `ConcurrencyConflict` is retried by the intake before it surfaces.
//! `InvariantViolation` signals corrupted state and is never retried.

use uuid::Uuid;

use crate::store::StoreError;

// ---

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Concurrent update conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Internal consistency violation: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    Storage(StoreError),
}

impl CoreError {
    pub fn sensor_not_found(id: Uuid) -> Self {
        Self::NotFound {
            entity: "Sensor",
            id,
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(reason) => Self::ConcurrencyConflict(reason),
            other => Self::Storage(other),
        }
    }
}
