//! PostgreSQL storage backend.
//!
//! A unit of work is a database transaction that starts by locking the
//! sensor row with `SELECT ... FOR UPDATE`. The wait for that lock is bounded
//! by a transaction-local `lock_timeout`; running into it surfaces as
//! [`StoreError::Conflict`] so the intake can retry. Dropping the unit of
//! work rolls the transaction back.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool, Postgres, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{
    AggregateStore, AlertStore, MeasurementStore, SensorStore, SensorUnitOfWork, Store,
    StoreError, StoreResult,
};
use crate::models::{Alert, Measurement, MeasurementDraft, Sensor};

// ---

#[derive(Debug, sqlx::FromRow)]
struct SensorRow {
    id: Uuid,
    status: String,
}

impl TryFrom<SensorRow> for Sensor {
    type Error = StoreError;

    fn try_from(row: SensorRow) -> Result<Self, Self::Error> {
        let status = row.status.parse().map_err(StoreError::Corrupt)?;
        Ok(Sensor { id: row.id, status })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AlertRow {
    id: Uuid,
    sensor_id: Uuid,
    created: DateTime<Utc>,
}

/// PostgreSQL storage backend
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }
}

/// Load the measurement ids of one alert in stored order.
async fn alert_measurement_ids<'e, E>(executor: E, alert_id: Uuid) -> StoreResult<Vec<i64>>
where
    E: PgExecutor<'e>,
{
    // ---
    let ids: Vec<(i64,)> = sqlx::query_as(
        r#"
        SELECT measurement_id
        FROM alert_measurements
        WHERE alert_id = $1
        ORDER BY position
        "#,
    )
    .bind(alert_id)
    .fetch_all(executor)
    .await?;

    Ok(ids.into_iter().map(|(id,)| id).collect())
}

#[async_trait]
impl AggregateStore for PgStore {
    async fn max_and_average(
        &self,
        sensor_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<Option<(f64, f64)>> {
        // ---
        let (max, avg): (Option<f64>, Option<f64>) = sqlx::query_as(
            r#"
            SELECT MAX(co2_quantity), AVG(co2_quantity)
            FROM measurements
            WHERE sensor_id = $1 AND taken_at >= $2
            "#,
        )
        .bind(sensor_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(max.zip(avg))
    }
}

#[async_trait]
impl Store for PgStore {
    #[instrument(skip(self))]
    async fn begin(&self, sensor_id: Uuid) -> StoreResult<Box<dyn SensorUnitOfWork>> {
        // ---
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await?;

        sqlx::query("SELECT id FROM sensors WHERE id = $1 FOR UPDATE")
            .bind(sensor_id)
            .fetch_optional(&mut *tx)
            .await?;

        debug!("sensor row locked");
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn insert_sensor(&self, sensor: &Sensor) -> StoreResult<Sensor> {
        // ---
        let row: SensorRow =
            sqlx::query_as("INSERT INTO sensors (id, status) VALUES ($1, $2) RETURNING id, status")
                .bind(sensor.id)
                .bind(sensor.status.as_str())
                .fetch_one(&self.pool)
                .await?;

        row.try_into()
    }

    async fn find_sensor(&self, id: Uuid) -> StoreResult<Option<Sensor>> {
        // ---
        let row: Option<SensorRow> = sqlx::query_as("SELECT id, status FROM sensors WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Sensor::try_from).transpose()
    }

    async fn alerts_by_sensor(&self, sensor_id: Uuid) -> StoreResult<Vec<Alert>> {
        // ---
        let rows: Vec<AlertRow> = sqlx::query_as(
            r#"
            SELECT id, sensor_id, created
            FROM alerts
            WHERE sensor_id = $1
            ORDER BY seq DESC
            "#,
        )
        .bind(sensor_id)
        .fetch_all(&self.pool)
        .await?;

        let alert_ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let links: Vec<(Uuid, i64)> = sqlx::query_as(
            r#"
            SELECT alert_id, measurement_id
            FROM alert_measurements
            WHERE alert_id = ANY($1)
            ORDER BY alert_id, position
            "#,
        )
        .bind(&alert_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_alert: HashMap<Uuid, Vec<i64>> = HashMap::new();
        for (alert_id, measurement_id) in links {
            by_alert.entry(alert_id).or_default().push(measurement_id);
        }

        Ok(rows
            .into_iter()
            .map(|row| Alert {
                measurement_ids: by_alert.remove(&row.id).unwrap_or_default(),
                id: row.id,
                sensor_id: row.sensor_id,
                created: row.created,
            })
            .collect())
    }

    async fn measurements_by_ids(&self, ids: &[i64]) -> StoreResult<Vec<Measurement>> {
        // ---
        let rows = sqlx::query_as::<_, Measurement>(
            r#"
            SELECT id, sensor_id, co2_quantity, taken_at
            FROM measurements
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

/// One sensor's transaction, holding its row lock.
struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl SensorStore for PgUnitOfWork {
    async fn get_sensor(&mut self, id: Uuid) -> StoreResult<Option<Sensor>> {
        // ---
        let row: Option<SensorRow> = sqlx::query_as("SELECT id, status FROM sensors WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;

        row.map(Sensor::try_from).transpose()
    }

    async fn save_sensor(&mut self, sensor: &Sensor) -> StoreResult<Sensor> {
        // ---
        let row: SensorRow = sqlx::query_as(
            r#"
            INSERT INTO sensors (id, status) VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status
            RETURNING id, status
            "#,
        )
        .bind(sensor.id)
        .bind(sensor.status.as_str())
        .fetch_one(&mut *self.tx)
        .await?;

        row.try_into()
    }
}

#[async_trait]
impl MeasurementStore for PgUnitOfWork {
    async fn save_measurement(&mut self, draft: &MeasurementDraft) -> StoreResult<Measurement> {
        // ---
        let measurement = sqlx::query_as::<_, Measurement>(
            r#"
            INSERT INTO measurements (sensor_id, co2_quantity, taken_at)
            VALUES ($1, $2, $3)
            RETURNING id, sensor_id, co2_quantity, taken_at
            "#,
        )
        .bind(draft.sensor_id)
        .bind(draft.co2_quantity)
        .bind(draft.taken_at)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(measurement)
    }

    async fn recent_by_sensor(
        &mut self,
        sensor_id: Uuid,
        limit: usize,
    ) -> StoreResult<Vec<Measurement>> {
        // ---
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, Measurement>(
            r#"
            SELECT id, sensor_id, co2_quantity, taken_at
            FROM measurements
            WHERE sensor_id = $1
            ORDER BY taken_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(sensor_id)
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows)
    }
}

#[async_trait]
impl AlertStore for PgUnitOfWork {
    async fn most_recent_alert(&mut self, sensor_id: Uuid) -> StoreResult<Option<Alert>> {
        // ---
        let row: Option<AlertRow> = sqlx::query_as(
            r#"
            SELECT id, sensor_id, created
            FROM alerts
            WHERE sensor_id = $1
            ORDER BY seq DESC
            LIMIT 1
            "#,
        )
        .bind(sensor_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let measurement_ids = alert_measurement_ids(&mut *self.tx, row.id).await?;
        Ok(Some(Alert {
            id: row.id,
            sensor_id: row.sensor_id,
            created: row.created,
            measurement_ids,
        }))
    }

    async fn save_alert(&mut self, alert: &Alert) -> StoreResult<Alert> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO alerts (id, sensor_id, created)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(alert.id)
        .bind(alert.sensor_id)
        .bind(alert.created)
        .execute(&mut *self.tx)
        .await?;

        let positions: Vec<i32> = (0..alert.measurement_ids.len())
            .map(|p| i32::try_from(p).unwrap_or(i32::MAX))
            .collect();

        // Measurements already linked to this alert keep their position.
        sqlx::query(
            r#"
            INSERT INTO alert_measurements (alert_id, measurement_id, position)
            SELECT $1, m.measurement_id, m.position
            FROM UNNEST($2::BIGINT[], $3::INTEGER[]) AS m(measurement_id, position)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(alert.id)
        .bind(&alert.measurement_ids)
        .bind(&positions)
        .execute(&mut *self.tx)
        .await?;

        Ok(alert.clone())
    }
}

#[async_trait]
impl SensorUnitOfWork for PgUnitOfWork {
    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
