//! `GET /api/v1/sensors/{id}/alerts`: alert history, newest first.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use uuid::Uuid;

use super::AppState;
use crate::error::CoreResult;
use crate::models::AlertSummary;
use crate::sensors::SensorRegistry;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/api/v1/sensors/{id}/alerts", get(handler))
}

async fn handler(
    Path(sensor_id): Path<Uuid>,
    State((store, _)): State<AppState>,
) -> CoreResult<Json<Vec<AlertSummary>>> {
    // ---
    let alerts = SensorRegistry::new(store).list_alerts(sensor_id).await?;
    Ok(Json(alerts))
}
