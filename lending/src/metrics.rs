//! Business metrics for the lending platform.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `lending_requests_total{action}` - Lifecycle operations that succeeded
//! - `lending_lifecycle_rejections_total{reason}` - Lifecycle operations refused, by error code
//! - `lending_alerts_total{kind,notice}` - Subjects included in escalation notices
//! - `lending_alerts_resolved_total{kind}` - Tracking rows resolved
//! - `lending_notifications_total{outcome,channel}` - Message delivery outcomes
//!
//! ## Histograms
//! - `lending_escalation_run_seconds` - Duration of one station's escalation run

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

/// Initialize and register all business metrics descriptions.
///
/// This should be called once at application startup, before any metrics are recorded.
pub fn register_business_metrics() {
    describe_counter!(
        "lending_requests_total",
        "Lifecycle operations that succeeded, by action"
    );
    describe_counter!(
        "lending_lifecycle_rejections_total",
        "Lifecycle operations refused, by error code"
    );

    describe_counter!(
        "lending_alerts_total",
        "Subjects included in escalation notices, by alert kind and notice (first, follow_up)"
    );
    describe_counter!(
        "lending_alerts_resolved_total",
        "Alert tracking rows resolved because the condition cleared"
    );
    describe_histogram!(
        "lending_escalation_run_seconds",
        "Time taken to run both alert kinds for one station"
    );

    describe_counter!(
        "lending_notifications_total",
        "Outbound message delivery outcomes (delivered, failed) by channel"
    );

    tracing::info!("Business metrics registered");
}

/// Install the Prometheus recorder with an HTTP listener on `addr`.
///
/// # Errors
///
/// Returns [`BuildError`] if a recorder is already installed or the listener
/// cannot be started.
pub fn install_prometheus(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(%addr, "Prometheus metrics available at /metrics");
    Ok(())
}
