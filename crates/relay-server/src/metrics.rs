//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Must be called once at server startup before any metrics are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across crates.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Payloads dropped on full outbound queues (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Inbound frames received (counter).
pub const FRAMES_IN_TOTAL: &str = "frames_in_total";
/// Inbound frames that failed to decode (counter).
pub const FRAME_DECODE_ERRORS_TOTAL: &str = "frame_decode_errors_total";
/// Oversized inbound frames rejected (counter).
pub const FRAMES_OVERSIZED_TOTAL: &str = "frames_oversized_total";
/// Messages durably recorded (counter).
pub const MESSAGES_PERSISTED_TOTAL: &str = "messages_persisted_total";
/// Message persistence failures (counter).
pub const MESSAGES_PERSIST_ERRORS_TOTAL: &str = "messages_persist_errors_total";
/// Broadcasts attempted (counter).
pub const BROADCASTS_TOTAL: &str = "broadcasts_total";
/// Payloads queued across all recipient sessions (counter).
pub const BROADCAST_DELIVERIES_TOTAL: &str = "broadcast_deliveries_total";
/// Membership lookups that failed (counter).
pub const MEMBERSHIP_ERRORS_TOTAL: &str = "membership_errors_total";
