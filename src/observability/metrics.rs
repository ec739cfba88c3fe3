//! Metrics collection and exposition.
//!
//! # Metrics
//! - `api_routes_registered_total` (counter): routes installed on the host, by verb
//! - `api_invocations_total` (counter): in-process invocations by name, strategy, status
//! - `api_invocation_duration_seconds` (histogram): invocation latency by name, strategy
//!
//! Failed invocations carry `status="error"`.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and serve the scrape endpoint on `addr`.
/// Must run inside a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_registration(verb: &str) {
    metrics::counter!("api_routes_registered_total", "verb" => verb.to_string()).increment(1);
}

pub fn record_invocation(name: &str, strategy: &'static str, status: Option<u16>, started: Instant) {
    let status = status.map_or_else(|| "error".to_string(), |s| s.to_string());
    metrics::counter!(
        "api_invocations_total",
        "name" => name.to_string(),
        "strategy" => strategy,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "api_invocation_duration_seconds",
        "name" => name.to_string(),
        "strategy" => strategy
    )
    .record(started.elapsed().as_secs_f64());
}
