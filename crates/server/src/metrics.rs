//! Prometheus metrics (§10.5 "Health / observability surface"). Kept
//! intentionally thin: full observability is an explicit out-of-scope
//! subsystem, this just exposes the handful of gauges/counters useful
//! for basic operation.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Installs the global recorder and returns a handle that can render
/// the current snapshot for the `/metrics` route.
pub fn init_metrics() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    builder
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

pub fn record_session_opened() {
    metrics::gauge!("sessions_active").increment(1.0);
}

pub fn record_session_closed() {
    metrics::gauge!("sessions_active").decrement(1.0);
}

pub fn record_utterance_started() {
    metrics::counter!("utterances_total").increment(1);
}

pub fn record_transcription_queue_depth(queue_len: usize) {
    metrics::gauge!("transcription_queue_depth").set(queue_len as f64);
}

pub async fn metrics_handler(axum::extract::State(state): axum::extract::State<crate::state::AppState>) -> String {
    state.metrics_handle.render()
}
