//! Measurement intake: validate, persist, evaluate, apply.
//!
//! Each call runs inside one [`SensorUnitOfWork`], so the new reading, the
//! status change and any alert mutation land together or not at all, and
//! concurrent calls for the same sensor are serialized by the store.
//! Lock timeouts and write conflicts are retried a bounded number of times.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::models::{Alert, Measurement, MeasurementDraft, NewMeasurement, Sensor};
use crate::status::{self, AlertAction, Decision, StatusRules};
use crate::store::{SensorUnitOfWork, Store};

// ---

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Clone)]
pub struct MeasurementIntake {
    // ---
    store: Arc<dyn Store>,
    rules: StatusRules,
    max_attempts: u32,
}

impl MeasurementIntake {
    pub fn new(store: Arc<dyn Store>, rules: StatusRules) -> Self {
        Self {
            store,
            rules,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Record a reading for `sensor_id` and update the sensor's status and
    /// alerts accordingly.
    #[instrument(skip(self, input))]
    pub async fn record_measurement(
        &self,
        sensor_id: Uuid,
        input: NewMeasurement,
    ) -> CoreResult<Measurement> {
        // ---
        let draft = validate(sensor_id, &input)?;

        let mut attempt = 1;
        loop {
            match self.record_once(&draft).await {
                Err(CoreError::ConcurrencyConflict(reason)) if attempt < self.max_attempts => {
                    warn!(attempt, %reason, "conflict while recording measurement, retrying");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn record_once(&self, draft: &MeasurementDraft) -> CoreResult<Measurement> {
        // ---
        let mut uow = self.store.begin(draft.sensor_id).await?;

        let mut sensor = uow
            .get_sensor(draft.sensor_id)
            .await?
            .ok_or_else(|| CoreError::sensor_not_found(draft.sensor_id))?;

        let measurement = uow.save_measurement(draft).await?;
        let window = uow
            .recent_by_sensor(sensor.id, self.rules.window_len())
            .await?;

        let decision = status::evaluate(&self.rules, sensor.status, &window);
        debug!(
            measurement_id = measurement.id,
            quantity = measurement.co2_quantity,
            window = window.len(),
            ?decision,
            "evaluated reading"
        );

        apply(uow.as_mut(), &mut sensor, &measurement, decision).await?;
        uow.commit().await?;

        Ok(measurement)
    }
}

/// Check the caller's input and turn it into a draft.
fn validate(sensor_id: Uuid, input: &NewMeasurement) -> CoreResult<MeasurementDraft> {
    // ---
    let co2_quantity = match input.co2_quantity {
        Some(q) if q.is_finite() && q >= 0.0 => q,
        Some(q) => {
            return Err(CoreError::InvalidArgument(format!(
                "co2Quantity must be a finite number greater or equal than zero, got {q}"
            )))
        }
        None => {
            return Err(CoreError::InvalidArgument(
                "co2Quantity cannot be null".into(),
            ))
        }
    };

    let taken_at = input
        .time
        .ok_or_else(|| CoreError::InvalidArgument("time cannot be null".into()))?;

    Ok(MeasurementDraft {
        sensor_id,
        co2_quantity,
        taken_at,
    })
}

/// Write the decision's alert mutation and status change.
async fn apply(
    uow: &mut dyn SensorUnitOfWork,
    sensor: &mut Sensor,
    trigger: &Measurement,
    decision: Decision,
) -> CoreResult<()> {
    // ---
    match decision.alert {
        AlertAction::None => {}
        AlertAction::Open { measurement_ids } => {
            let alert = Alert::open(sensor.id, trigger.taken_at, measurement_ids);
            uow.save_alert(&alert).await?;
            info!(sensor_id = %sensor.id, alert_id = %alert.id, "alert opened");
        }
        AlertAction::Extend { measurement_id } => {
            let Some(mut alert) = uow.most_recent_alert(sensor.id).await? else {
                error!(sensor_id = %sensor.id, "sensor is in ALERT without any alert");
                return Err(CoreError::InvariantViolation(format!(
                    "sensor {} is in ALERT state but has no alert to extend",
                    sensor.id
                )));
            };
            if alert.extend(measurement_id) {
                uow.save_alert(&alert).await?;
                debug!(sensor_id = %sensor.id, alert_id = %alert.id, measurement_id, "alert extended");
            }
        }
    }

    if decision.status != sensor.status {
        info!(
            sensor_id = %sensor.id,
            from = %sensor.status,
            to = %decision.status,
            "sensor status changed"
        );
        sensor.status = decision.status;
        uow.save_sensor(sensor).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::SensorStatus;
    use crate::store::memory::MemoryStore;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::time::Duration as StdDuration;

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 26, 18, 0, 0).unwrap()
    }

    fn reading(quantity: f64, minute: i64) -> NewMeasurement {
        // ---
        NewMeasurement {
            co2_quantity: Some(quantity),
            time: Some(base_time() + Duration::minutes(minute)),
        }
    }

    async fn setup() -> (Arc<MemoryStore>, MeasurementIntake, Sensor) {
        // ---
        let store = Arc::new(MemoryStore::new(StdDuration::from_secs(5)));
        let sensor = store.insert_sensor(&Sensor::register()).await.unwrap();
        let intake = MeasurementIntake::new(store.clone(), StatusRules::new(2000.0, 3, 3));
        (store, intake, sensor)
    }

    async fn status_of(store: &MemoryStore, sensor_id: Uuid) -> SensorStatus {
        store.find_sensor(sensor_id).await.unwrap().unwrap().status
    }

    /// Record `quantities` one minute apart, returning the status after each.
    async fn feed(
        store: &MemoryStore,
        intake: &MeasurementIntake,
        sensor_id: Uuid,
        start_minute: i64,
        quantities: &[f64],
    ) -> Vec<SensorStatus> {
        // ---
        let mut statuses = Vec::new();
        for (i, q) in quantities.iter().enumerate() {
            intake
                .record_measurement(sensor_id, reading(*q, start_minute + i as i64))
                .await
                .unwrap();
            statuses.push(status_of(store, sensor_id).await);
        }
        statuses
    }

    #[tokio::test]
    async fn test_reading_at_threshold_leaves_ok() {
        // ---
        let (store, intake, sensor) = setup().await;
        assert_eq!(status_of(&store, sensor.id).await, SensorStatus::Ok);

        let statuses = feed(&store, &intake, sensor.id, 0, &[2000.0]).await;
        assert_eq!(statuses, vec![SensorStatus::Ok]);
    }

    #[tokio::test]
    async fn test_three_breaches_open_one_alert() {
        // ---
        let (store, intake, sensor) = setup().await;

        let statuses = feed(&store, &intake, sensor.id, 0, &[2001.0; 3]).await;
        assert_eq!(
            statuses,
            vec![SensorStatus::Warning, SensorStatus::Warning, SensorStatus::Alert]
        );

        let alerts = store.alerts_by_sensor(sensor.id).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].measurement_ids.len(), 3);
        assert_eq!(alerts[0].created, base_time() + Duration::minutes(2));

        let readings = store
            .measurements_by_ids(&alerts[0].measurement_ids)
            .await
            .unwrap();
        assert!(readings.iter().all(|m| m.co2_quantity == 2001.0));
    }

    #[tokio::test]
    async fn test_fourth_breach_extends_open_alert() {
        // ---
        let (store, intake, sensor) = setup().await;

        let statuses = feed(&store, &intake, sensor.id, 0, &[2001.0; 4]).await;
        assert_eq!(statuses[3], SensorStatus::Alert);

        let alerts = store.alerts_by_sensor(sensor.id).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].measurement_ids.len(), 4);
    }

    #[tokio::test]
    async fn test_full_safe_run_releases_alert() {
        // ---
        let (store, intake, sensor) = setup().await;
        feed(&store, &intake, sensor.id, 0, &[2001.0; 4]).await;

        let statuses = feed(&store, &intake, sensor.id, 4, &[1999.0; 3]).await;
        assert_eq!(
            statuses,
            vec![SensorStatus::Alert, SensorStatus::Alert, SensorStatus::Ok]
        );

        // Closed alert keeps its readings; nothing was appended while releasing.
        let alerts = store.alerts_by_sensor(sensor.id).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].measurement_ids.len(), 4);
    }

    #[tokio::test]
    async fn test_new_episode_after_release_opens_second_alert() {
        // ---
        let (store, intake, sensor) = setup().await;
        feed(&store, &intake, sensor.id, 0, &[2001.0; 3]).await;
        feed(&store, &intake, sensor.id, 3, &[1000.0; 3]).await;
        feed(&store, &intake, sensor.id, 6, &[2500.0; 3]).await;

        let alerts = store.alerts_by_sensor(sensor.id).await.unwrap();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].created, base_time() + Duration::minutes(8));
        assert_eq!(status_of(&store, sensor.id).await, SensorStatus::Alert);
    }

    #[tokio::test]
    async fn test_warning_follows_single_reading() {
        // ---
        let (store, intake, sensor) = setup().await;
        feed(&store, &intake, sensor.id, 0, &[2001.0]).await;
        assert_eq!(status_of(&store, sensor.id).await, SensorStatus::Warning);

        let statuses = feed(&store, &intake, sensor.id, 1, &[1500.0]).await;
        assert_eq!(statuses, vec![SensorStatus::Ok]);

        let (store, intake, sensor) = setup().await;
        feed(&store, &intake, sensor.id, 0, &[2001.0]).await;
        let statuses = feed(&store, &intake, sensor.id, 1, &[2500.0]).await;
        assert_eq!(statuses, vec![SensorStatus::Warning]);
    }

    #[tokio::test]
    async fn test_invalid_input_is_rejected_without_writes() {
        // ---
        let (store, intake, sensor) = setup().await;

        let cases = [
            NewMeasurement {
                co2_quantity: Some(-1.0),
                time: Some(base_time()),
            },
            NewMeasurement {
                co2_quantity: Some(f64::NAN),
                time: Some(base_time()),
            },
            NewMeasurement {
                co2_quantity: None,
                time: Some(base_time()),
            },
            NewMeasurement {
                co2_quantity: Some(100.0),
                time: None,
            },
        ];

        for case in cases {
            let err = intake.record_measurement(sensor.id, case).await.unwrap_err();
            assert!(matches!(err, CoreError::InvalidArgument(_)), "got {err:?}");
        }

        let mut uow = store.begin(sensor.id).await.unwrap();
        assert!(uow.recent_by_sensor(sensor.id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_quantity_is_accepted() {
        // ---
        let (_store, intake, sensor) = setup().await;
        let m = intake.record_measurement(sensor.id, reading(0.0, 0)).await.unwrap();
        assert_eq!(m.co2_quantity, 0.0);
    }

    #[tokio::test]
    async fn test_unknown_sensor_is_not_found() {
        // ---
        let (_store, intake, _sensor) = setup().await;
        let missing = Uuid::new_v4();

        let err = intake
            .record_measurement(missing, reading(100.0, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { id, .. } if id == missing));
    }

    #[tokio::test]
    async fn test_alert_status_without_alert_is_invariant_violation() {
        // ---
        let store = Arc::new(MemoryStore::new(StdDuration::from_secs(5)));
        let sensor = store
            .insert_sensor(&Sensor {
                id: Uuid::new_v4(),
                status: SensorStatus::Alert,
            })
            .await
            .unwrap();
        let intake = MeasurementIntake::new(store.clone(), StatusRules::new(2000.0, 3, 3));

        feed(&store, &intake, sensor.id, 0, &[2001.0; 2]).await;
        let err = intake
            .record_measurement(sensor.id, reading(2001.0, 2))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvariantViolation(_)));

        // The failing reading was rolled back with everything else.
        let mut uow = store.begin(sensor.id).await.unwrap();
        assert_eq!(uow.recent_by_sensor(sensor.id, 10).await.unwrap().len(), 2);
        drop(uow);
        assert_eq!(status_of(&store, sensor.id).await, SensorStatus::Alert);
    }

    #[tokio::test]
    async fn test_lock_timeout_is_retried_then_surfaces_as_conflict() {
        // ---
        let store = Arc::new(MemoryStore::new(StdDuration::from_millis(20)));
        let sensor = store.insert_sensor(&Sensor::register()).await.unwrap();
        let intake = MeasurementIntake::new(store.clone(), StatusRules::new(2000.0, 3, 3))
            .with_max_attempts(2);

        let held = store.begin(sensor.id).await.unwrap();
        let err = intake
            .record_measurement(sensor.id, reading(100.0, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ConcurrencyConflict(_)));
        drop(held);

        assert!(intake.record_measurement(sensor.id, reading(100.0, 0)).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_breaches_open_exactly_one_alert() {
        // ---
        let (store, intake, sensor) = setup().await;
        let intake = Arc::new(intake);
        let sensor_id = sensor.id;

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let intake = Arc::clone(&intake);
                tokio::spawn(async move {
                    intake
                        .record_measurement(sensor_id, reading(2500.0, 0))
                        .await
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(status_of(&store, sensor.id).await, SensorStatus::Alert);
        let alerts = store.alerts_by_sensor(sensor.id).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].measurement_ids.len(), 20);
    }

    /// Replay quantities on a fresh sensor and describe the outcome by
    /// reading values, independent of generated ids.
    async fn replay(quantities: &[f64]) -> (SensorStatus, Vec<Vec<f64>>) {
        // ---
        let (store, intake, sensor) = setup().await;
        feed(&store, &intake, sensor.id, 0, quantities).await;

        let mut groups = Vec::new();
        for alert in store.alerts_by_sensor(sensor.id).await.unwrap() {
            let mut readings = store
                .measurements_by_ids(&alert.measurement_ids)
                .await
                .unwrap();
            readings.sort_by_key(|m| m.taken_at);
            groups.push(
                readings
                    .iter()
                    .map(|m| (m.taken_at - base_time()).num_minutes() as f64 * 1e4 + m.co2_quantity)
                    .collect(),
            );
        }

        (status_of(&store, sensor.id).await, groups)
    }

    /// Feed `quantities` one minute apart and check the stored alerts after
    /// every reading:
    /// - entering ALERT creates exactly one alert, nothing else creates any
    /// - a reading that completes a full breach run while in ALERT is the
    ///   tail of the newest alert
    /// - no reading belongs to two alerts
    async fn check_alert_bookkeeping(
        for_alert: usize,
        for_ok: usize,
        quantities: &[f64],
    ) -> Result<(), TestCaseError> {
        // ---
        let store = Arc::new(MemoryStore::new(StdDuration::from_secs(5)));
        let sensor = store.insert_sensor(&Sensor::register()).await.unwrap();
        let intake =
            MeasurementIntake::new(store.clone(), StatusRules::new(2000.0, for_alert, for_ok));

        let mut previous = SensorStatus::Ok;
        let mut alert_count = 0;
        let mut breach_run = 0;

        for (minute, q) in quantities.iter().enumerate() {
            let m = intake
                .record_measurement(sensor.id, reading(*q, minute as i64))
                .await
                .unwrap();
            breach_run = if m.is_breach(2000.0) { breach_run + 1 } else { 0 };

            let status = status_of(&store, sensor.id).await;
            let alerts = store.alerts_by_sensor(sensor.id).await.unwrap();

            if status == SensorStatus::Alert && previous != SensorStatus::Alert {
                alert_count += 1;
            }
            prop_assert_eq!(alerts.len(), alert_count, "after reading {}", minute);

            if status == SensorStatus::Alert {
                prop_assert!(!alerts.is_empty());
                if breach_run >= for_alert {
                    prop_assert_eq!(alerts[0].measurement_ids.last(), Some(&m.id));
                }
            }

            let mut seen = HashSet::new();
            for id in alerts.iter().flat_map(|a| a.measurement_ids.iter()) {
                prop_assert!(seen.insert(*id), "reading {} is in two alerts", id);
            }

            previous = status;
        }

        Ok(())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_alerts_track_status_transitions(
            quantities in prop::collection::vec(prop_oneof![1500.0f64..2000.0, 2000.5f64..2500.0], 0..40),
            for_alert in 1usize..5,
            for_ok in 1usize..5,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            runtime.block_on(check_alert_bookkeeping(for_alert, for_ok, &quantities))?;
        }

        #[test]
        fn prop_replay_on_fresh_sensor_is_deterministic(
            quantities in prop::collection::vec(0.0f64..4000.0, 0..25),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            let first = runtime.block_on(replay(&quantities));
            let second = runtime.block_on(replay(&quantities));
            prop_assert_eq!(first, second);
        }
    }
}
