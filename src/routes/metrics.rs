//! `GET /api/v1/sensors/{id}/metrics`: max and average CO2 over the
//! configured lookback window.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use super::AppState;
use crate::error::CoreResult;
use crate::metrics::MetricsAggregator;

// ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MetricsResponse {
    max: f64,
    average: f64,
    lookback_days: u32,
}

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/api/v1/sensors/{id}/metrics", get(handler))
}

async fn handler(
    Path(sensor_id): Path<Uuid>,
    State((store, config)): State<AppState>,
) -> CoreResult<Json<MetricsResponse>> {
    // ---
    let lookback_days = config.metrics_lookback_days;
    let metrics = MetricsAggregator::new(store)
        .compute_metrics(sensor_id, lookback_days)
        .await?;

    Ok(Json(MetricsResponse {
        max: metrics.max,
        average: metrics.average,
        lookback_days,
    }))
}
