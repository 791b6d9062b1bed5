//! `POST /api/v1/sensors/{id}/measurements`: record a CO2 reading.
//!
//! Body: `{"co2Quantity": 2100.0, "time": "2025-03-26T18:45:00Z"}`.
//! Both fields are required; a missing one is answered with 400 by the
//! intake's validation. Bodies that do not parse get the same 400.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use tracing::debug;
use uuid::Uuid;

use super::AppState;
use crate::error::CoreResult;
use crate::intake::MeasurementIntake;
use crate::models::{Measurement, NewMeasurement};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/api/v1/sensors/{id}/measurements", post(handler))
}

async fn handler(
    Path(sensor_id): Path<Uuid>,
    State((store, config)): State<AppState>,
    body: Result<Json<NewMeasurement>, JsonRejection>,
) -> CoreResult<(StatusCode, Json<Measurement>)> {
    // ---
    let Json(body) = body?;
    debug!(%sensor_id, ?body, "POST measurement");

    let intake = MeasurementIntake::new(store, config.rules()).with_max_attempts(config.max_attempts);
    let measurement = intake.record_measurement(sensor_id, body).await?;

    Ok((StatusCode::CREATED, Json(measurement)))
}
