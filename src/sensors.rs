//! Sensor registration, status lookup and alert history.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::models::{AlertSummary, Sensor};
use crate::store::Store;

// ---

#[derive(Clone)]
pub struct SensorRegistry {
    store: Arc<dyn Store>,
}

impl SensorRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Register a new sensor with status `OK`.
    pub async fn create_sensor(&self) -> CoreResult<Sensor> {
        // ---
        let sensor = self.store.insert_sensor(&Sensor::register()).await?;
        info!(sensor_id = %sensor.id, "sensor registered");
        Ok(sensor)
    }

    pub async fn find_sensor(&self, id: Uuid) -> CoreResult<Sensor> {
        self.store
            .find_sensor(id)
            .await?
            .ok_or_else(|| CoreError::sensor_not_found(id))
    }

    /// Alerts of a sensor, most recently created first, with their time span
    /// and reading values.
    pub async fn list_alerts(&self, sensor_id: Uuid) -> CoreResult<Vec<AlertSummary>> {
        // ---
        self.find_sensor(sensor_id).await?;

        let alerts = self.store.alerts_by_sensor(sensor_id).await?;
        let ids: Vec<i64> = alerts
            .iter()
            .flat_map(|a| a.measurement_ids.iter().copied())
            .collect();

        let mut readings: HashMap<i64, _> = self
            .store
            .measurements_by_ids(&ids)
            .await?
            .into_iter()
            .map(|m| (m.id, m))
            .collect();

        alerts
            .into_iter()
            .map(|alert| {
                let measurements = alert
                    .measurement_ids
                    .iter()
                    .filter_map(|id| readings.remove(id))
                    .collect();
                AlertSummary::from_measurements(measurements).ok_or_else(|| {
                    CoreError::InvariantViolation(format!(
                        "alert {} has no measurements",
                        alert.id
                    ))
                })
            })
            .collect()
    }
}
