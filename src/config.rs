use std::path::PathBuf;

use tracing::warn;

/// Runtime settings, read once from the environment at startup and passed
/// around immutably — nothing re-reads the environment after this.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    /// Database name; selects the `<name>.wal` file under `data_dir`.
    pub db_name: String,
    /// JSON array of lessons, loaded only when `products` is empty.
    pub seed_file: Option<PathBuf>,
    /// Frontend bundle served at `/` when set.
    pub static_dir: Option<PathBuf>,
    /// Lesson images served at `/images` when set.
    pub images_dir: Option<PathBuf>,
    /// Prometheus exporter port; disabled when unset.
    pub metrics_port: Option<u16>,
    /// WAL appends between compactions.
    pub compact_threshold: u64,
    /// Floor reconciled capacity at zero instead of reporting overbooking.
    pub clamp_at_zero: bool,
    /// Version-conflict retry bound for reconciliation.
    pub max_reconcile_retries: u32,
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: parse_or("LESSOND_PORT", 3000),
            bind: var_or("LESSOND_BIND", "0.0.0.0"),
            data_dir: PathBuf::from(var_or("LESSOND_DATA_DIR", "./data")),
            db_name: var_or("LESSOND_DB_NAME", "lessons"),
            seed_file: std::env::var("LESSOND_SEED_FILE").ok().map(PathBuf::from),
            static_dir: std::env::var("LESSOND_STATIC_DIR").ok().map(PathBuf::from),
            images_dir: std::env::var("LESSOND_IMAGES_DIR").ok().map(PathBuf::from),
            metrics_port: std::env::var("LESSOND_METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
            compact_threshold: parse_or("LESSOND_COMPACT_THRESHOLD", 1000),
            clamp_at_zero: std::env::var("LESSOND_CLAMP_AT_ZERO")
                .is_ok_and(|s| s == "true" || s == "1"),
            max_reconcile_retries: parse_or("LESSOND_MAX_RECONCILE_RETRIES", 3),
        }
    }
}

fn var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("invalid {key} value {raw:?}, using default");
            default
        }),
        Err(_) => default,
    }
}
