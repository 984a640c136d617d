//! Prometheus metrics for the API server.

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

use vblur_models::ProcessingReport;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "vblur_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "vblur_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "vblur_http_requests_in_flight";

    // WebSocket metrics
    pub const WS_CONNECTIONS_TOTAL: &str = "vblur_ws_connections_total";
    pub const WS_CONNECTIONS_ACTIVE: &str = "vblur_ws_connections_active";
    pub const WS_MESSAGES_SENT: &str = "vblur_ws_messages_sent_total";
    pub const WS_MESSAGES_RECEIVED: &str = "vblur_ws_messages_received_total";

    // Redaction metrics
    pub const FRAMES_PROCESSED_TOTAL: &str = "vblur_frames_processed_total";
    pub const DETECTIONS_TOTAL: &str = "vblur_detections_total";
    pub const FRAME_DURATION_SECONDS: &str = "vblur_frame_duration_seconds";

    // Batch metrics
    pub const BATCH_REQUESTS_TOTAL: &str = "vblur_batch_requests_total";
    pub const BATCH_DURATION_SECONDS: &str = "vblur_batch_duration_seconds";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record WebSocket connection.
pub fn record_ws_connection(endpoint: &str) {
    let labels = [("endpoint", endpoint.to_string())];
    counter!(names::WS_CONNECTIONS_TOTAL, &labels).increment(1);
}

/// Update active WebSocket connections gauge.
pub fn set_ws_active_connections(count: i64) {
    gauge!(names::WS_CONNECTIONS_ACTIVE).set(count as f64);
}

/// Record WebSocket message sent.
pub fn record_ws_message_sent(endpoint: &str, message_type: &str) {
    let labels = [
        ("endpoint", endpoint.to_string()),
        ("type", message_type.to_string()),
    ];
    counter!(names::WS_MESSAGES_SENT, &labels).increment(1);
}

/// Record WebSocket message received.
pub fn record_ws_message_received(endpoint: &str) {
    let labels = [("endpoint", endpoint.to_string())];
    counter!(names::WS_MESSAGES_RECEIVED, &labels).increment(1);
}

/// Record one processed frame and its redaction decisions.
pub fn record_frame(mode: &str, report: &ProcessingReport) {
    let mode_label = [("mode", mode.to_string())];
    counter!(names::FRAMES_PROCESSED_TOTAL, &mode_label).increment(1);
    histogram!(names::FRAME_DURATION_SECONDS, &mode_label).record(report.total_ms / 1000.0);
    record_decisions(mode, report);
}

/// Record a batch request outcome with its accumulated report.
pub fn record_batch(outcome: &str, frames: u64, report: &ProcessingReport, duration_secs: f64) {
    let labels = [("outcome", outcome.to_string())];
    counter!(names::BATCH_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::BATCH_DURATION_SECONDS, &labels).record(duration_secs);

    if frames > 0 {
        counter!(names::FRAMES_PROCESSED_TOTAL, "mode" => "batch").increment(frames);
        record_decisions("batch", report);
    }
}

fn record_decisions(mode: &str, report: &ProcessingReport) {
    for (decision, count) in [
        ("redacted", report.redacted),
        ("annotated", report.annotated),
        ("skipped", report.skipped),
    ] {
        if count > 0 {
            let labels = [
                ("mode", mode.to_string()),
                ("decision", decision.to_string()),
            ];
            counter!(names::DETECTIONS_TOTAL, &labels).increment(count as u64);
        }
    }
}

/// Collapse paths to known routes so label cardinality stays bounded.
fn sanitize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed {
        "" => "/".to_string(),
        "/blur_bottles" | "/ws/blur_bottles_live" | "/health" | "/ready" | "/metrics" => {
            trimmed.to_string()
        }
        _ => "/other".to_string(),
    }
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    // Increment in-flight counter
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    // Decrement in-flight counter
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(sanitize_path("/blur_bottles/"), "/blur_bottles");
        assert_eq!(sanitize_path("/blur_bottles"), "/blur_bottles");
        assert_eq!(sanitize_path("/ws/blur_bottles_live"), "/ws/blur_bottles_live");
        assert_eq!(sanitize_path("/"), "/");
        assert_eq!(sanitize_path("/wp-admin/setup.php"), "/other");
    }
}
