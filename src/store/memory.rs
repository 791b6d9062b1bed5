//! In-memory storage backend (no persistence)
//!
//! Useful for:
//! - Testing without a database
//! - Local runs with `STORE_BACKEND=memory`
//!
//! Each sensor has its own async mutex. A unit of work holds that mutex for
//! its whole lifetime and stages its writes locally; `commit` publishes them
//! in one step, dropping the unit of work discards them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;
use uuid::Uuid;

use super::{
    AggregateStore, AlertStore, MeasurementStore, SensorStore, SensorUnitOfWork, Store,
    StoreError, StoreResult,
};
use crate::models::{Alert, Measurement, MeasurementDraft, Sensor};

// ---

#[derive(Debug, Default)]
struct Tables {
    sensors: HashMap<Uuid, Sensor>,
    /// Readings per sensor in insertion order.
    measurements: HashMap<Uuid, Vec<Measurement>>,
    /// Alerts per sensor in creation order.
    alerts: HashMap<Uuid, Vec<Alert>>,
    next_measurement_id: i64,
}

/// In-memory storage backend
#[derive(Debug, Clone)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    locks: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
    lock_timeout: Duration,
}

impl MemoryStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            tables: Arc::default(),
            locks: Arc::default(),
            lock_timeout,
        }
    }

    async fn sensor_lock(&self, sensor_id: Uuid) -> Arc<Mutex<()>> {
        // ---
        self.locks
            .lock()
            .await
            .entry(sensor_id)
            .or_default()
            .clone()
    }
}

#[async_trait]
impl AggregateStore for MemoryStore {
    async fn max_and_average(
        &self,
        sensor_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<Option<(f64, f64)>> {
        // ---
        let tables = self.tables.read().await;
        let quantities: Vec<f64> = tables
            .measurements
            .get(&sensor_id)
            .map(|all| {
                all.iter()
                    .filter(|m| m.taken_at >= since)
                    .map(|m| m.co2_quantity)
                    .collect()
            })
            .unwrap_or_default();

        if quantities.is_empty() {
            return Ok(None);
        }

        let max = quantities.iter().copied().fold(f64::MIN, f64::max);
        let average = quantities.iter().sum::<f64>() / quantities.len() as f64;
        Ok(Some((max, average)))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self, sensor_id: Uuid) -> StoreResult<Box<dyn SensorUnitOfWork>> {
        // ---
        let known = self.tables.read().await.sensors.contains_key(&sensor_id);
        let guard = if known {
            let lock = self.sensor_lock(sensor_id).await;
            let guard = tokio::time::timeout(self.lock_timeout, lock.lock_owned())
                .await
                .map_err(|_| {
                    StoreError::Conflict(format!(
                        "timed out after {:?} waiting for sensor {sensor_id}",
                        self.lock_timeout
                    ))
                })?;
            Some(guard)
        } else {
            None
        };

        debug!(%sensor_id, known, "memory unit of work started");

        Ok(Box::new(MemoryUnitOfWork {
            tables: Arc::clone(&self.tables),
            _guard: guard,
            sensor: None,
            measurements: Vec::new(),
            alerts: Vec::new(),
        }))
    }

    async fn insert_sensor(&self, sensor: &Sensor) -> StoreResult<Sensor> {
        // ---
        let mut tables = self.tables.write().await;
        if tables.sensors.contains_key(&sensor.id) {
            return Err(StoreError::Backend(format!(
                "sensor {} already exists",
                sensor.id
            )));
        }
        tables.sensors.insert(sensor.id, sensor.clone());
        Ok(sensor.clone())
    }

    async fn find_sensor(&self, id: Uuid) -> StoreResult<Option<Sensor>> {
        Ok(self.tables.read().await.sensors.get(&id).cloned())
    }

    async fn alerts_by_sensor(&self, sensor_id: Uuid) -> StoreResult<Vec<Alert>> {
        // ---
        let tables = self.tables.read().await;
        Ok(tables
            .alerts
            .get(&sensor_id)
            .map(|alerts| alerts.iter().rev().cloned().collect())
            .unwrap_or_default())
    }

    async fn measurements_by_ids(&self, ids: &[i64]) -> StoreResult<Vec<Measurement>> {
        // ---
        let tables = self.tables.read().await;
        Ok(tables
            .measurements
            .values()
            .flatten()
            .filter(|m| ids.contains(&m.id))
            .cloned()
            .collect())
    }
}

/// Staged writes for one sensor, published on commit.
struct MemoryUnitOfWork {
    tables: Arc<RwLock<Tables>>,
    _guard: Option<OwnedMutexGuard<()>>,
    sensor: Option<Sensor>,
    measurements: Vec<Measurement>,
    alerts: Vec<Alert>,
}

#[async_trait]
impl SensorStore for MemoryUnitOfWork {
    async fn get_sensor(&mut self, id: Uuid) -> StoreResult<Option<Sensor>> {
        // ---
        if let Some(staged) = self.sensor.as_ref().filter(|s| s.id == id) {
            return Ok(Some(staged.clone()));
        }
        Ok(self.tables.read().await.sensors.get(&id).cloned())
    }

    async fn save_sensor(&mut self, sensor: &Sensor) -> StoreResult<Sensor> {
        self.sensor = Some(sensor.clone());
        Ok(sensor.clone())
    }
}

#[async_trait]
impl MeasurementStore for MemoryUnitOfWork {
    async fn save_measurement(&mut self, draft: &MeasurementDraft) -> StoreResult<Measurement> {
        // ---
        let id = {
            let mut tables = self.tables.write().await;
            tables.next_measurement_id += 1;
            tables.next_measurement_id
        };
        let measurement = draft.clone().into_measurement(id);
        self.measurements.push(measurement.clone());
        Ok(measurement)
    }

    async fn recent_by_sensor(
        &mut self,
        sensor_id: Uuid,
        limit: usize,
    ) -> StoreResult<Vec<Measurement>> {
        // ---
        let tables = self.tables.read().await;
        let mut recent: Vec<Measurement> = tables
            .measurements
            .get(&sensor_id)
            .into_iter()
            .flatten()
            .chain(self.measurements.iter().filter(|m| m.sensor_id == sensor_id))
            .cloned()
            .collect();

        recent.sort_by(|a, b| b.taken_at.cmp(&a.taken_at).then(b.id.cmp(&a.id)));
        recent.truncate(limit);
        Ok(recent)
    }
}

#[async_trait]
impl AlertStore for MemoryUnitOfWork {
    async fn most_recent_alert(&mut self, sensor_id: Uuid) -> StoreResult<Option<Alert>> {
        // ---
        if let Some(staged) = self.alerts.iter().rev().find(|a| a.sensor_id == sensor_id) {
            return Ok(Some(staged.clone()));
        }
        let tables = self.tables.read().await;
        Ok(tables
            .alerts
            .get(&sensor_id)
            .and_then(|alerts| alerts.last())
            .cloned())
    }

    async fn save_alert(&mut self, alert: &Alert) -> StoreResult<Alert> {
        // ---
        match self.alerts.iter_mut().find(|a| a.id == alert.id) {
            Some(staged) => *staged = alert.clone(),
            None => self.alerts.push(alert.clone()),
        }
        Ok(alert.clone())
    }
}

#[async_trait]
impl SensorUnitOfWork for MemoryUnitOfWork {
    async fn commit(self: Box<Self>) -> StoreResult<()> {
        // ---
        let MemoryUnitOfWork {
            tables,
            _guard,
            sensor,
            measurements,
            alerts,
        } = *self;

        let mut tables = tables.write().await;

        if let Some(sensor) = sensor {
            tables.sensors.insert(sensor.id, sensor);
        }

        for measurement in measurements {
            tables
                .measurements
                .entry(measurement.sensor_id)
                .or_default()
                .push(measurement);
        }

        for alert in alerts {
            let stored = tables.alerts.entry(alert.sensor_id).or_default();
            match stored.iter_mut().find(|a| a.id == alert.id) {
                Some(existing) => *existing = alert,
                None => stored.push(alert),
            }
        }

        Ok(())
    }
}
