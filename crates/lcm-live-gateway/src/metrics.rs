//! Prometheus metrics recording and endpoint.

use std::time::Duration;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus metrics recorder and return the handle for rendering.
pub fn install_prometheus_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(handle)
}

/// Record a session passing admission.
pub fn record_session_admitted() {
    metrics::counter!("sessions_admitted_total").increment(1);
    metrics::gauge!("sessions_active").increment(1.0);
}

/// Record a connection refused at admission.
pub fn record_session_rejected(reason: &str) {
    let labels = [("reason", reason.to_string())];
    metrics::counter!("sessions_rejected_total", &labels).increment(1);
}

/// Record an admitted session ending, labelled with its terminal state.
pub fn record_session_closed(outcome: &str) {
    let labels = [("outcome", outcome.to_string())];
    metrics::counter!("sessions_closed_total", &labels).increment(1);
    metrics::gauge!("sessions_active").decrement(1.0);
}

/// Record an inbound frame stored in a session slot.
pub fn record_frame_ingested(replaced: bool) {
    metrics::counter!("frames_ingested_total").increment(1);
    if replaced {
        metrics::counter!("frames_replaced_total").increment(1);
    }
}

/// Record an inbound frame that could not be decoded.
pub fn record_decode_error() {
    metrics::counter!("frame_decode_errors_total").increment(1);
}

/// Record how long a frame waited in its slot before being rendered.
pub fn record_frame_staleness(waited: Duration) {
    metrics::histogram!("frame_staleness_seconds").record(waited.as_secs_f64());
}

/// Record a multipart part written to a stream.
pub fn record_frame_emitted() {
    metrics::counter!("frames_emitted_total").increment(1);
}

/// Record a frame dropped by the safety filter.
pub fn record_content_rejected() {
    metrics::counter!("frames_rejected_total").increment(1);
}

/// Record a failed transform call.
pub fn record_transform_error(pipeline: &str) {
    let labels = [("pipeline", pipeline.to_string())];
    metrics::counter!("transform_errors_total", &labels).increment(1);
}

/// Record the latency of one transform call.
pub fn record_transform_duration(pipeline: &str, elapsed: Duration) {
    let labels = [("pipeline", pipeline.to_string())];
    metrics::histogram!("transform_duration_seconds", &labels).record(elapsed.as_secs_f64());
}
