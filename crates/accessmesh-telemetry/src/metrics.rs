//! Prometheus metrics.
//!
//! # Metrics
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `accessmesh_requests_total` | Counter | `status` |
//! | `accessmesh_request_duration_seconds` | Histogram | - |
//! | `accessmesh_in_flight_requests` | Gauge | - |
//! | `accessmesh_admission_total` | Counter | `result` |
//! | `accessmesh_authentication_total` | Counter | `result` |
//! | `accessmesh_decisions_total` | Counter | `result` |
//! | `accessmesh_policy_faults_total` | Counter | `kind` |
//! | `accessmesh_rate_limit_buckets` | Gauge | - |
//!
//! The pipeline stages emit their own counters through the `metrics` facade;
//! this module installs the exporter and records the per-request series.

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

/// Metric names.
pub mod names {
    /// Completed requests by status.
    pub const REQUESTS_TOTAL: &str = "accessmesh_requests_total";
    /// End-to-end request latency.
    pub const REQUEST_DURATION: &str = "accessmesh_request_duration_seconds";
    /// Requests currently being handled.
    pub const IN_FLIGHT: &str = "accessmesh_in_flight_requests";
    /// Admission outcomes.
    pub const ADMISSION_TOTAL: &str = "accessmesh_admission_total";
    /// Authentication outcomes.
    pub const AUTHENTICATION_TOTAL: &str = "accessmesh_authentication_total";
    /// Authorization outcomes.
    pub const DECISIONS_TOTAL: &str = "accessmesh_decisions_total";
    /// Malformed policy conditions seen during evaluation.
    pub const POLICY_FAULTS_TOTAL: &str = "accessmesh_policy_faults_total";
    /// Live rate-limit buckets.
    pub const RATE_LIMIT_BUCKETS: &str = "accessmesh_rate_limit_buckets";
}

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,

    /// Address of the Prometheus scrape listener.
    pub addr: String,

    /// Histogram buckets for request duration.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: "0.0.0.0:9090".to_string(),
            duration_buckets: default_duration_buckets(),
        }
    }
}

/// 1ms through 10s.
pub fn default_duration_buckets() -> Vec<f64> {
    vec![
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ]
}

/// Installs the Prometheus recorder and its HTTP listener.
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidAddress` for an unparseable address and
/// `TelemetryError::MetricsInit` if the recorder cannot be installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .addr
        .parse()
        .map_err(|e| TelemetryError::InvalidAddress(format!("{}: {e}", config.addr)))?;

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(names::REQUEST_DURATION.to_string()),
            &config.duration_buckets,
        )
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?
        .with_http_listener(addr)
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let _ = METRICS_HANDLE.set(handle);
    describe_metrics();

    Ok(())
}

/// Renders metrics in Prometheus text format, if initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn describe_metrics() {
    describe_counter!(names::REQUESTS_TOTAL, "Requests completed by response status");
    describe_histogram!(
        names::REQUEST_DURATION,
        metrics::Unit::Seconds,
        "Request duration in seconds"
    );
    describe_gauge!(names::IN_FLIGHT, "Requests currently being processed");
    describe_counter!(names::ADMISSION_TOTAL, "Admission decisions by result");
    describe_counter!(
        names::AUTHENTICATION_TOTAL,
        "Credential verifications by result"
    );
    describe_counter!(names::DECISIONS_TOTAL, "Authorization decisions by result");
    describe_counter!(
        names::POLICY_FAULTS_TOTAL,
        "Malformed policy conditions by kind"
    );
    describe_gauge!(names::RATE_LIMIT_BUCKETS, "Live rate-limit buckets");
}

/// Records a completed request.
pub fn record_request(status_code: u16, duration: Duration) {
    counter!(names::REQUESTS_TOTAL, "status" => status_code.to_string()).increment(1);
    histogram!(names::REQUEST_DURATION).record(duration.as_secs_f64());
}

/// Keeps `accessmesh_in_flight_requests` raised while alive.
#[derive(Debug)]
pub struct InFlightGuard {
    _private: (),
}

impl InFlightGuard {
    /// Increments the gauge; dropping the guard decrements it.
    #[must_use]
    pub fn new() -> Self {
        gauge!(names::IN_FLIGHT).increment(1.0);
        Self { _private: () }
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!(names::IN_FLIGHT).decrement(1.0);
    }
}
