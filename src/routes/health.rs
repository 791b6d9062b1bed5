// src/routes/health.rs
//! Liveness probe.
//!
//! `GET /health` answers without touching the store, so a slow or locked
//! database never makes the service look dead. The body names the
//! configured backend and the crate version for quick inspection.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use super::AppState;
use crate::StoreBackend;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    backend: &'static str,
    version: &'static str,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

async fn health(State((_, config)): State<AppState>) -> Json<HealthResponse> {
    // ---
    let backend = match config.store_backend {
        StoreBackend::Postgres => "postgres",
        StoreBackend::Memory => "memory",
    };

    Json(HealthResponse {
        status: "ok",
        backend,
        version: env!("CARGO_PKG_VERSION"),
    })
}
