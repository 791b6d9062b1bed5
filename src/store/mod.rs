//! Storage contracts for sensors, measurements and alerts.
//!
//! ## Design
//!
//! - **Trait-based**: [`Store`] lets the service run on PostgreSQL or in memory
//! - **Per-sensor units of work**: every mutation of a sensor's history,
//!   status and alerts happens inside a [`SensorUnitOfWork`] obtained from
//!   [`Store::begin`], which holds that sensor's exclusive lock until it is
//!   committed or dropped
//! - **Atomic**: dropping a unit of work without calling `commit` discards
//!   everything it wrote
//!
//! ## Backends
//!
//! - [`postgres::PgStore`]: transactions with a `FOR UPDATE` row lock on the sensor
//! - [`memory::MemoryStore`]: staged writes behind a per-sensor mutex, for
//!   tests and local runs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Alert, Measurement, MeasurementDraft, Sensor};

pub mod memory;
pub mod postgres;

// ---

/// Result type alias for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by storage backends
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A per-sensor lock could not be taken in time, or the database
    /// aborted the transaction because of a competing writer.
    #[error("write conflict: {0}")]
    Conflict(String),

    /// Stored data could not be mapped back into the domain model.
    #[error("corrupt stored data: {0}")]
    Corrupt(String),

    /// Any other backend failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// SQLSTATE codes that mean "another writer got there first".
const CONFLICT_CODES: [&str; 3] = [
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "55P03", // lock_not_available
];

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db)
                if db
                    .code()
                    .is_some_and(|code| CONFLICT_CODES.iter().any(|c| *c == code)) =>
            {
                StoreError::Conflict(db.message().to_string())
            }
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

/// Sensor status reads and writes within a unit of work.
#[async_trait]
pub trait SensorStore: Send {
    async fn get_sensor(&mut self, id: Uuid) -> StoreResult<Option<Sensor>>;

    /// Upsert the sensor's status.
    async fn save_sensor(&mut self, sensor: &Sensor) -> StoreResult<Sensor>;
}

/// Append-only measurement history within a unit of work.
#[async_trait]
pub trait MeasurementStore: Send {
    /// Persist a new reading and assign its id.
    async fn save_measurement(&mut self, draft: &MeasurementDraft) -> StoreResult<Measurement>;

    /// The sensor's `limit` newest readings, newest first. Readings with the
    /// same timestamp are ordered by id, highest first.
    async fn recent_by_sensor(
        &mut self,
        sensor_id: Uuid,
        limit: usize,
    ) -> StoreResult<Vec<Measurement>>;
}

/// Alert episodes within a unit of work.
#[async_trait]
pub trait AlertStore: Send {
    /// The sensor's most recently created alert.
    async fn most_recent_alert(&mut self, sensor_id: Uuid) -> StoreResult<Option<Alert>>;

    /// Insert the alert, or add any new measurement references to it.
    async fn save_alert(&mut self, alert: &Alert) -> StoreResult<Alert>;
}

/// A locked, atomic view of one sensor's state.
#[async_trait]
pub trait SensorUnitOfWork: SensorStore + MeasurementStore + AlertStore {
    /// Make every write of this unit of work visible and release the lock.
    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

/// Read-only aggregates over measurement history.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Max and average quantity of the sensor's readings taken at or after
    /// `since`, or `None` if there are none.
    async fn max_and_average(
        &self,
        sensor_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<Option<(f64, f64)>>;
}

/// Entry point to a storage backend.
#[async_trait]
pub trait Store: AggregateStore {
    /// Start a unit of work for `sensor_id`, waiting a bounded time for the
    /// sensor's lock. Unknown sensors still yield a unit of work; its
    /// `get_sensor` returns `None`.
    async fn begin(&self, sensor_id: Uuid) -> StoreResult<Box<dyn SensorUnitOfWork>>;

    async fn insert_sensor(&self, sensor: &Sensor) -> StoreResult<Sensor>;

    async fn find_sensor(&self, id: Uuid) -> StoreResult<Option<Sensor>>;

    /// All alerts of a sensor, most recently created first.
    async fn alerts_by_sensor(&self, sensor_id: Uuid) -> StoreResult<Vec<Alert>>;

    async fn measurements_by_ids(&self, ids: &[i64]) -> StoreResult<Vec<Measurement>>;
}
