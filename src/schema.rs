//! Database schema management for `co2-sensorflow`.
//!
//! Ensures required tables and indexes exist before serving requests.
//! Applied once on startup from `main.rs` (EMBP: single gateway call).

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// Creates `sensors`, `measurements`, `alerts` and the `alert_measurements`
/// link table. Safe to call on every startup; no-op if objects already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensors (
            id      UUID PRIMARY KEY,
            status  TEXT NOT NULL CHECK (status IN ('OK', 'WARNING', 'ALERT'))
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Readings are append-only; never updated or deleted
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS measurements (
            id            BIGSERIAL PRIMARY KEY,
            sensor_id     UUID             NOT NULL REFERENCES sensors (id),
            co2_quantity  DOUBLE PRECISION NOT NULL CHECK (co2_quantity >= 0),
            taken_at      TIMESTAMPTZ      NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // `seq` orders alerts by creation, independent of reading timestamps
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alerts (
            id         UUID PRIMARY KEY,
            seq        BIGSERIAL   NOT NULL,
            sensor_id  UUID        NOT NULL REFERENCES sensors (id),
            created    TIMESTAMPTZ NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alert_measurements (
            alert_id        UUID    NOT NULL REFERENCES alerts (id),
            measurement_id  BIGINT  NOT NULL UNIQUE REFERENCES measurements (id),
            position        INTEGER NOT NULL,
            PRIMARY KEY (alert_id, measurement_id)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Window and aggregate queries
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_measurements_sensor_taken_at
            ON measurements (sensor_id, taken_at DESC, id DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_alerts_sensor_seq
            ON alerts (sensor_id, seq DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
