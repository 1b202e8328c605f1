//! Prometheus metrics recording and endpoint.

use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

static HANDLE: OnceLock<Result<PrometheusHandle, String>> = OnceLock::new();

/// Install the Prometheus recorder once per process and return its handle.
///
/// Concurrent first callers wait on the same install; a failed install is
/// reported to every caller.
pub fn install_prometheus_recorder() -> anyhow::Result<PrometheusHandle> {
    HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .map_err(|e| e.to_string())
        })
        .clone()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {e}"))
}

pub fn record_session_created() {
    metrics::counter!("sessions_created_total").increment(1);
}

pub fn record_relay_connect() {
    metrics::gauge!("relay_connections_active").increment(1.0);
}

pub fn record_relay_disconnect() {
    metrics::gauge!("relay_connections_active").decrement(1.0);
}

pub fn record_event_relayed() {
    metrics::counter!("relay_events_total").increment(1);
}

/// Record an error of a given kind (see `RelayError::kind`).
pub fn record_error(kind: &'static str) {
    metrics::counter!("relay_errors_total", "kind" => kind).increment(1);
}
