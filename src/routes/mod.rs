//! Route gateway: merges each sibling module's sub-router and attaches the
//! shared state. `main.rs` only knows about [`router`].

use std::sync::Arc;

use axum::Router;

use crate::store::Store;
use crate::Config;

mod alerts;
mod error;
mod health;
mod measurements;
mod metrics;
mod sensors;

// ---

/// State shared by every handler: the storage backend and the immutable
/// configuration snapshot.
pub type AppState = (Arc<dyn Store>, Config);

pub fn router(store: Arc<dyn Store>, config: Config) -> Router {
    // ---
    Router::new()
        .merge(sensors::router())
        .merge(measurements::router())
        .merge(metrics::router())
        .merge(alerts::router())
        .merge(health::router())
        .with_state((store, config))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::config::StoreBackend;
    use crate::store::memory::MemoryStore;
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    fn app() -> Router {
        // ---
        let config = crate::config::load_from(|name| match name {
            "STORE_BACKEND" => Some("memory".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.store_backend, StoreBackend::Memory);

        router(Arc::new(MemoryStore::new(Duration::from_secs(5))), config)
    }

    /// Send a request and return status plus parsed JSON body (Null if empty).
    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        // ---
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn create_sensor(app: &Router) -> String {
        // ---
        let (status, body) = send(app, Method::POST, "/api/v1/sensors", None).await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        // ---
        let (status, body) = send(&app(), Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["backend"], "memory");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_new_sensor_reports_ok() {
        // ---
        let app = app();
        let id = create_sensor(&app).await;

        let (status, body) = send(&app, Method::GET, &format!("/api/v1/sensors/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "OK" }));
    }

    #[tokio::test]
    async fn test_measurements_drive_status_and_alerts() {
        // ---
        let app = app();
        let id = create_sensor(&app).await;

        for minute in 0..3 {
            let (status, body) = send(
                &app,
                Method::POST,
                &format!("/api/v1/sensors/{id}/measurements"),
                Some(json!({
                    "co2Quantity": 2100.0,
                    "time": format!("2025-03-26T18:0{minute}:00Z"),
                })),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
            assert_eq!(body["co2Quantity"], 2100.0);
        }

        let (_, body) = send(&app, Method::GET, &format!("/api/v1/sensors/{id}"), None).await;
        assert_eq!(body["status"], "ALERT");

        let (status, body) = send(&app, Method::GET, &format!("/api/v1/sensors/{id}/alerts"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!([{
                "startTime": "2025-03-26T18:00:00Z",
                "endTime": "2025-03-26T18:02:00Z",
                "measurements": [2100.0, 2100.0, 2100.0],
            }])
        );
    }

    #[tokio::test]
    async fn test_invalid_measurement_is_bad_request() {
        // ---
        let app = app();
        let id = create_sensor(&app).await;

        let (status, body) = send(
            &app,
            Method::POST,
            &format!("/api/v1/sensors/{id}/measurements"),
            Some(json!({ "co2Quantity": -5.0, "time": "2025-03-26T18:00:00Z" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_ARGUMENT");

        let (status, _) = send(
            &app,
            Method::POST,
            &format!("/api/v1/sensors/{id}/measurements"),
            Some(json!({ "co2Quantity": 100.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unreadable_measurement_body_is_bad_request() {
        // ---
        let app = app();
        let id = create_sensor(&app).await;
        let uri = format!("/api/v1/sensors/{id}/measurements");

        for body in [
            "not json",
            r#"{"co2Quantity": "lots", "time": "2025-03-26T18:00:00Z"}"#,
            r#"{"co2Quantity": 100.0, "time": "yesterday"}"#,
        ] {
            let request = Request::builder()
                .method(Method::POST)
                .uri(&uri)
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap();

            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");

            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let json: Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(json["code"], "INVALID_ARGUMENT", "{body}");
        }

        // Nothing was recorded
        let (_, body) = send(&app, Method::GET, &format!("/api/v1/sensors/{id}"), None).await;
        assert_eq!(body["status"], "OK");
    }

    #[tokio::test]
    async fn test_unknown_sensor_is_not_found() {
        // ---
        let app = app();
        let missing = uuid::Uuid::new_v4();

        for uri in [
            format!("/api/v1/sensors/{missing}"),
            format!("/api/v1/sensors/{missing}/metrics"),
            format!("/api/v1/sensors/{missing}/alerts"),
        ] {
            let (status, body) = send(&app, Method::GET, &uri, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
            assert_eq!(body["code"], "NOT_FOUND");
        }
    }

    #[tokio::test]
    async fn test_metrics_of_quiet_sensor_are_zero() {
        // ---
        let app = app();
        let id = create_sensor(&app).await;

        let (status, body) = send(&app, Method::GET, &format!("/api/v1/sensors/{id}/metrics"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "max": 0.0, "average": 0.0, "lookbackDays": 30 }));
    }
}
