use std::net::SocketAddr;

use axum::http::Method;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total HTTP requests handled. Labels: route, status.
pub const REQUESTS_TOTAL: &str = "lessond_requests_total";

/// Histogram: request latency in seconds. Labels: route.
pub const REQUEST_DURATION_SECONDS: &str = "lessond_request_duration_seconds";

// ── Core metrics ────────────────────────────────────────────────

/// Counter: orders accepted via the submission endpoint.
pub const ORDERS_INSERTED_TOTAL: &str = "lessond_orders_inserted_total";

/// Counter: reconciliation attempts that lost the version race and retried.
pub const RECONCILE_CONFLICTS_TOTAL: &str = "lessond_reconcile_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "lessond_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "lessond_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a request to a short route label for metrics, keeping the id segments
/// out of the label set.
pub fn route_label(method: &Method, path: &str) -> &'static str {
    if method == Method::GET && path == "/lessons" {
        "list_lessons"
    } else if method == Method::GET && path == "/search" {
        "search_lessons"
    } else if method == Method::PUT && path.starts_with("/collections/products/") {
        "reconcile_lesson"
    } else if method == Method::POST && path.starts_with("/collections/") {
        "insert_order"
    } else {
        "other"
    }
}
