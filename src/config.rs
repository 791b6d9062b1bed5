//! Configuration loader for the `co2-sensorflow` backend service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). By consolidating configuration logic here, we
//! avoid scattering `env::var` calls throughout the codebase.
//!
use std::{env, time::Duration};

use anyhow::{anyhow, bail, Result};

use crate::status::StatusRules;

/// Upper bound for `METRICS_LOOKBACK_DAYS`, roughly a century.
pub const MAX_LOOKBACK_DAYS: u32 = 36_500;

/// Parse an optional environment variable with a default value.
macro_rules! parse_env {
    ($lookup:expr, $var_name:expr, $ty:ty, $default:expr) => {
        $lookup($var_name)
            .map(|v| v.parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse an optional integer environment variable that must be at least 1.
macro_rules! parse_env_positive {
    ($lookup:expr, $var_name:expr, $ty:ty, $default:expr) => {{
        let value = parse_env!($lookup, $var_name, $ty, $default);
        if value < 1 {
            bail!("{} must be at least 1, got {}", $var_name, value);
        }
        value
    }};
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($lookup:expr, $var_name:expr) => {
        $lookup($var_name)
            .ok_or_else(|| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Where sensors, measurements and alerts are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// Storage backend selection.
    pub store_backend: StoreBackend,

    /// PostgreSQL connection string. Only set for the Postgres backend.
    pub db_url: Option<String>,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// Port the HTTP server binds to.
    pub listen_port: u16,

    /// CO2 level above which a reading is a breach.
    pub co2_threshold: f64,

    /// Consecutive breaches that put a sensor into `ALERT`.
    pub consecutive_for_alert: u32,

    /// Consecutive safe readings that bring a sensor back to `OK`.
    pub consecutive_for_ok: u32,

    /// Trailing window, in days, for sensor metrics.
    pub metrics_lookback_days: u32,

    /// Longest wait for a sensor's lock before reporting a conflict.
    pub lock_timeout: Duration,

    /// Attempts per measurement when conflicts occur.
    pub max_attempts: u32,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL connection string (Postgres backend only)
///
/// Optional:
/// - `STORE_BACKEND` – `postgres` or `memory` (default: postgres)
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `LISTEN_PORT` – HTTP port (default: 8080)
/// - `CO2_THRESHOLD` – breach boundary (default: 2000)
/// - `CONSECUTIVE_FOR_ALERT` – breaches to enter ALERT (default: 3)
/// - `CONSECUTIVE_FOR_OK` – safe readings to leave ALERT (default: 3)
/// - `METRICS_LOOKBACK_DAYS` – metrics window (default: 30)
/// - `LOCK_TIMEOUT_MS` – per-sensor lock wait (default: 5000)
/// - `MAX_ATTEMPTS` – conflict retries per measurement (default: 3)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    load_from(|name| env::var(name).ok())
}

/// Load configuration through an arbitrary variable lookup.
pub fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Result<Config> {
    // ---
    let store_backend = match lookup("STORE_BACKEND").as_deref() {
        None | Some("postgres") => StoreBackend::Postgres,
        Some("memory") => StoreBackend::Memory,
        Some(other) => bail!("Invalid STORE_BACKEND: {other} (expected postgres or memory)"),
    };

    let db_url = match store_backend {
        StoreBackend::Postgres => Some(require_env!(lookup, "DATABASE_URL")),
        StoreBackend::Memory => lookup("DATABASE_URL"),
    };

    let db_pool_max = parse_env!(lookup, "DB_POOL_MAX", u32, 5);
    let listen_port = parse_env!(lookup, "LISTEN_PORT", u16, 8080);

    let co2_threshold = parse_env!(lookup, "CO2_THRESHOLD", f64, 2000.0);
    if !co2_threshold.is_finite() {
        bail!("CO2_THRESHOLD must be a finite number, got {co2_threshold}");
    }

    let consecutive_for_alert = parse_env_positive!(lookup, "CONSECUTIVE_FOR_ALERT", u32, 3);
    let consecutive_for_ok = parse_env_positive!(lookup, "CONSECUTIVE_FOR_OK", u32, 3);
    let max_attempts = parse_env_positive!(lookup, "MAX_ATTEMPTS", u32, 3);

    let metrics_lookback_days = parse_env_positive!(lookup, "METRICS_LOOKBACK_DAYS", u32, 30);
    if metrics_lookback_days > MAX_LOOKBACK_DAYS {
        bail!(
            "METRICS_LOOKBACK_DAYS must be at most {MAX_LOOKBACK_DAYS}, got {metrics_lookback_days}"
        );
    }

    // Postgres treats a lock_timeout of 0 as "wait forever"
    let lock_timeout =
        Duration::from_millis(parse_env_positive!(lookup, "LOCK_TIMEOUT_MS", u64, 5000));

    Ok(Config {
        store_backend,
        db_url,
        db_pool_max,
        listen_port,
        co2_threshold,
        consecutive_for_alert,
        consecutive_for_ok,
        metrics_lookback_days,
        lock_timeout,
        max_attempts,
    })
}

impl Config {
    /// Status evaluation rules derived from this configuration.
    pub fn rules(&self) -> StatusRules {
        StatusRules::new(
            self.co2_threshold,
            self.consecutive_for_alert as usize,
            self.consecutive_for_ok as usize,
        )
    }

    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks sensitive information like database passwords while showing
    /// all configuration values that were loaded.
    pub fn log_config(&self) {
        // ---
        let masked_db_url = self.db_url.as_deref().map(mask_password);

        tracing::info!("Configuration loaded:");
        tracing::info!("  STORE_BACKEND         : {:?}", self.store_backend);
        tracing::info!("  DATABASE_URL          : {}", masked_db_url.as_deref().unwrap_or("-"));
        tracing::info!("  DB_POOL_MAX           : {}", self.db_pool_max);
        tracing::info!("  LISTEN_PORT           : {}", self.listen_port);
        tracing::info!("  CO2_THRESHOLD         : {}", self.co2_threshold);
        tracing::info!("  CONSECUTIVE_FOR_ALERT : {}", self.consecutive_for_alert);
        tracing::info!("  CONSECUTIVE_FOR_OK    : {}", self.consecutive_for_ok);
        tracing::info!("  METRICS_LOOKBACK_DAYS : {}", self.metrics_lookback_days);
        tracing::info!("  LOCK_TIMEOUT_MS       : {}", self.lock_timeout.as_millis());
        tracing::info!("  MAX_ATTEMPTS          : {}", self.max_attempts);
    }
}

/// Replace the password in a connection string with `****`.
fn mask_password(db_url: &str) -> String {
    // ---
    if let Some(at_pos) = db_url.rfind('@') {
        if let Some(colon_pos) = db_url[..at_pos].rfind(':') {
            return format!("{}:****{}", &db_url[..colon_pos], &db_url[at_pos..]);
        }
    }
    db_url.to_string()
}
