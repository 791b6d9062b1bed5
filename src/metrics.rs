//! Trailing-window CO2 metrics per sensor.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::models::SensorMetrics;
use crate::store::Store;

// ---

#[derive(Clone)]
pub struct MetricsAggregator {
    store: Arc<dyn Store>,
}

impl MetricsAggregator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Max and average over readings taken within the last `lookback_days`.
    ///
    /// Returns zeros when the window holds no readings.
    pub async fn compute_metrics(
        &self,
        sensor_id: Uuid,
        lookback_days: u32,
    ) -> CoreResult<SensorMetrics> {
        self.compute_metrics_at(sensor_id, lookback_days, Utc::now())
            .await
    }

    /// Same as [`compute_metrics`](Self::compute_metrics) with an explicit
    /// reference time.
    pub async fn compute_metrics_at(
        &self,
        sensor_id: Uuid,
        lookback_days: u32,
        now: DateTime<Utc>,
    ) -> CoreResult<SensorMetrics> {
        // ---
        if lookback_days < 1 {
            return Err(CoreError::InvalidArgument(
                "lookback days must be at least 1".into(),
            ));
        }

        if self.store.find_sensor(sensor_id).await?.is_none() {
            return Err(CoreError::sensor_not_found(sensor_id));
        }

        let since = now
            .checked_sub_signed(Duration::days(i64::from(lookback_days)))
            .ok_or_else(|| {
                CoreError::InvalidArgument(format!(
                    "lookback of {lookback_days} days reaches past the earliest representable time"
                ))
            })?;
        let metrics = self
            .store
            .max_and_average(sensor_id, since)
            .await?
            .map(|(max, average)| SensorMetrics { max, average })
            .unwrap_or_default();

        debug!(%sensor_id, %since, ?metrics, "computed sensor metrics");
        Ok(metrics)
    }
}
