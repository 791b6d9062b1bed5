//! Sensor registration and status lookup.
//!
//! - `POST /api/v1/sensors` registers a sensor with status `OK`
//! - `GET  /api/v1/sensors/{id}` returns its current status

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use super::AppState;
use crate::error::CoreResult;
use crate::models::SensorStatus;
use crate::sensors::SensorRegistry;

// ---

#[derive(Debug, Serialize)]
struct SensorCreated {
    id: Uuid,
}

#[derive(Debug, Serialize)]
struct SensorStatusResponse {
    status: SensorStatus,
}

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/v1/sensors", post(create_sensor))
        .route("/api/v1/sensors/{id}", get(sensor_status))
}

async fn create_sensor(
    State((store, _)): State<AppState>,
) -> CoreResult<(StatusCode, Json<SensorCreated>)> {
    // ---
    info!("POST /api/v1/sensors");
    let sensor = SensorRegistry::new(store).create_sensor().await?;
    Ok((StatusCode::CREATED, Json(SensorCreated { id: sensor.id })))
}

async fn sensor_status(
    Path(id): Path<Uuid>,
    State((store, _)): State<AppState>,
) -> CoreResult<Json<SensorStatusResponse>> {
    // ---
    let sensor = SensorRegistry::new(store).find_sensor(id).await?;
    Ok(Json(SensorStatusResponse {
        status: sensor.status,
    }))
}
