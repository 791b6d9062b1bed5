//! Application entry point for the `co2-sensorflow` backend service.
//!
//! This binary orchestrates the full startup sequence for the CO2 sensor
//! status API, including:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Selecting the storage backend (PostgreSQL or in-memory)
//! - Creating the database schema if it does not exist
//! - Mounting all API routes via the `routes` gateway (EMBP pattern)
//! - Binding the Axum HTTP server and serving requests
//!
//! # Environment Variables
//! - `DATABASE_URL` (**required** for PostgreSQL) – connection string
//! - `STORE_BACKEND` (optional) – `postgres` (default) or `memory`
//! - `CO2_THRESHOLD`, `CONSECUTIVE_FOR_ALERT`, `CONSECUTIVE_FOR_OK`,
//!   `METRICS_LOOKBACK_DAYS` (optional) – status evaluation settings
//! - `AXUM_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `AXUM_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! This module follows the Explicit Module Boundary Pattern (EMBP) by
//! delegating schema setup to `schema`, configuration parsing to `config`,
//! and route registration to `routes`.
use std::{env, net::SocketAddr, sync::Arc};

use axum::Router;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use anyhow::{anyhow, Result};

mod config;
mod error;
mod intake;
mod metrics;
mod models;
mod routes;
mod schema;
mod sensors;
mod status;
mod store;

pub use config::{Config, StoreBackend};

use store::{memory::MemoryStore, postgres::PgStore, Store};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    // .env first, so it can also set the logging variables
    dotenv().ok();
    init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let store = connect_store(&cfg).await?;

    // Build app from routes gateway (EMBP)
    let app: Router = routes::router(store, cfg.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.listen_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the configured storage backend, preparing the schema for PostgreSQL.
async fn connect_store(cfg: &Config) -> Result<Arc<dyn Store>> {
    // ---
    match cfg.store_backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; data is lost on restart");
            Ok(Arc::new(MemoryStore::new(cfg.lock_timeout)))
        }
        StoreBackend::Postgres => {
            let db_url = cfg
                .db_url
                .as_deref()
                .ok_or_else(|| anyhow!("DATABASE_URL must be set for the postgres backend"))?;

            tracing::info!("Attempting to connect to database");

            let pool = PgPoolOptions::new()
                .max_connections(cfg.db_pool_max)
                .connect(db_url)
                .await
                .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

            tracing::info!("Successfully connected to database");

            schema::create_schema(&pool).await?;

            Ok(Arc::new(PgStore::new(pool, cfg.lock_timeout)))
        }
    }
}

// ---

/// Install the global tracing subscriber.
///
/// - `RUST_LOG` wins when set; otherwise `AXUM_LOG_LEVEL` picks the level
///   (default `debug`) and sqlx query logging stays at `warn`
/// - `AXUM_SPAN_EVENTS`: `full`, `enter_exit`, anything else means close only
/// - `FORCE_COLOR`: `1|true|yes` or `0|false|no`, otherwise TTY detection
///
/// Call once, before the first log line.
fn init_tracing() {
    // ---
    let env_filter = match env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => EnvFilter::new(default_directives(env::var("AXUM_LOG_LEVEL").ok().as_deref())),
    };

    let use_color = color_override(env::var("FORCE_COLOR").ok().as_deref())
        .unwrap_or_else(|| std::io::stdout().is_terminal());

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events(env::var("AXUM_SPAN_EVENTS").ok().as_deref()))
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}

fn default_directives(level: Option<&str>) -> String {
    // ---
    let level = match level {
        Some(l @ ("trace" | "debug" | "info" | "warn" | "error")) => l,
        _ => "debug",
    };
    format!("{level},sqlx::query=warn")
}

fn span_events(mode: Option<&str>) -> FmtSpan {
    match mode {
        Some("full") => FmtSpan::FULL,
        Some("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    }
}

fn color_override(value: Option<&str>) -> Option<bool> {
    match value {
        Some("1" | "true" | "yes") => Some(true),
        Some("0" | "false" | "no") => Some(false),
        _ => None,
    }
}
