//! Metrics collection and export for Tidings.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "tidings_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "tidings_connections_active";
    pub const FRAMES_TOTAL: &str = "tidings_frames_total";
    pub const NEWS_PUBLISHED: &str = "tidings_news_published_total";
    pub const DELIVERIES_TOTAL: &str = "tidings_deliveries_total";
    pub const DELIVERY_FAILURES: &str = "tidings_delivery_failures_total";
    pub const SUBSCRIPTIONS_TOTAL: &str = "tidings_subscriptions_total";
    pub const STORED_NEWS: &str = "tidings_stored_news";
    pub const BROADCAST_SECONDS: &str = "tidings_broadcast_seconds";
    pub const ERRORS_TOTAL: &str = "tidings_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::FRAMES_TOTAL, "Total number of frames processed");
    metrics::describe_counter!(names::NEWS_PUBLISHED, "Total number of news items published");
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "News updates delivered to subscribers"
    );
    metrics::describe_counter!(
        names::DELIVERY_FAILURES,
        "News updates that failed to reach a subscriber"
    );
    metrics::describe_counter!(
        names::SUBSCRIPTIONS_TOTAL,
        "Total number of category subscriptions"
    );
    metrics::describe_gauge!(names::STORED_NEWS, "News items currently in history");
    metrics::describe_histogram!(
        names::BROADCAST_SECONDS,
        "Time spent fanning one news item out to subscribers"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a processed frame.
pub fn record_frame(direction: &'static str, frame_type: &'static str) {
    counter!(names::FRAMES_TOTAL, "direction" => direction, "type" => frame_type).increment(1);
}

/// Record a published item and the outcome of its fan-out.
pub fn record_publish(category: &str, delivered: usize, failed: usize, seconds: f64) {
    counter!(names::NEWS_PUBLISHED, "category" => category.to_string()).increment(1);
    counter!(names::DELIVERIES_TOTAL).increment(delivered as u64);
    counter!(names::DELIVERY_FAILURES).increment(failed as u64);
    histogram!(names::BROADCAST_SECONDS).record(seconds);
}

/// Record a subscription.
pub fn record_subscription() {
    counter!(names::SUBSCRIPTIONS_TOTAL).increment(1);
}

/// Update the stored history size.
pub fn set_stored_news(count: usize) {
    gauge!(names::STORED_NEWS).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_guard() {
        // No recorder is installed; recording must still be a no-op.
        let _guard = ConnectionMetricsGuard::new();
        record_publish("tech", 2, 1, 0.001);
        record_frame("inbound", "publish");
    }
}
