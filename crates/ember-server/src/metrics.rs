//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus recorder as the global `metrics` recorder.
///
/// Returns the handle used to render `/metrics`. Call once at startup,
/// before any metric is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// Connections accepted (counter).
pub const CONNECTIONS_TOTAL: &str = "relay_connections_total";
/// Connections closed (counter).
pub const DISCONNECTIONS_TOTAL: &str = "relay_disconnections_total";
/// Open connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "relay_connections_active";
/// Inbound messages, malformed included (counter).
pub const MESSAGES_TOTAL: &str = "relay_messages_total";
/// Inbound messages that failed to parse (counter).
pub const MALFORMED_MESSAGES_TOTAL: &str = "relay_malformed_messages_total";
/// Successful tornado renders (counter).
pub const EFFECTS_RENDERED_TOTAL: &str = "relay_effects_rendered_total";
/// Render requests rejected by validation (counter, labels: kind).
pub const EFFECT_ERRORS_TOTAL: &str = "relay_effect_errors_total";
/// Generation time per render (histogram, seconds).
pub const EFFECT_RENDER_SECONDS: &str = "relay_effect_render_seconds";
/// Outbound messages dropped on full or closed queues (counter).
pub const SEND_DROPS_TOTAL: &str = "relay_send_drops_total";
