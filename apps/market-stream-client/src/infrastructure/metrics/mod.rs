//! Prometheus Metrics Module
//!
//! Exposes client metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Messages**: Frames and bytes sent and received, dropped messages
//! - **Connection**: Connection state, reconnect attempts, errors by kind
//! - **Queue**: Outbound queue depth
//! - **Latency**: Heartbeat round trips
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! functions are no-ops until [`init_metrics`] installs a recorder.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::events::DropReason;
use crate::domain::health::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "stream_client_messages_sent_total",
        "Total frames written to the feed"
    );
    describe_counter!(
        "stream_client_messages_received_total",
        "Total frames received from the feed"
    );
    describe_counter!(
        "stream_client_bytes_sent_total",
        "Total payload bytes written to the feed"
    );
    describe_counter!(
        "stream_client_bytes_received_total",
        "Total payload bytes received from the feed"
    );
    describe_counter!(
        "stream_client_messages_dropped_total",
        "Total outbound messages dropped by reason"
    );

    describe_counter!("stream_client_errors_total", "Total errors by kind");
    describe_counter!(
        "stream_client_reconnects_total",
        "Total reconnection attempts"
    );
    describe_gauge!(
        "stream_client_connected",
        "1 while a feed session is open, otherwise 0"
    );

    describe_gauge!(
        "stream_client_queue_depth",
        "Outbound messages awaiting transmission"
    );

    describe_histogram!(
        "stream_client_latency_seconds",
        "Heartbeat ping to pong round trip"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Error categories used as the `kind` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection attempt failed or timed out.
    Connect,
    /// Live session failed.
    Transport,
    /// Inbound frame could not be decoded.
    Decode,
    /// Outbound frame could not be written.
    Send,
    /// The far end sent an error frame.
    Server,
}

impl ErrorKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Transport => "transport",
            Self::Decode => "decode",
            Self::Send => "send",
            Self::Server => "server",
        }
    }
}

/// Record a frame written to the feed.
pub fn record_sent(bytes: usize) {
    counter!("stream_client_messages_sent_total").increment(1);
    counter!("stream_client_bytes_sent_total").increment(bytes as u64);
}

/// Record a frame received from the feed.
pub fn record_received(bytes: usize) {
    counter!("stream_client_messages_received_total").increment(1);
    counter!("stream_client_bytes_received_total").increment(bytes as u64);
}

/// Record a dropped outbound message.
pub fn record_dropped(reason: DropReason) {
    counter!(
        "stream_client_messages_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record an error.
pub fn record_error(kind: ErrorKind) {
    counter!(
        "stream_client_errors_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!("stream_client_reconnects_total").increment(1);
}

/// Update the connection gauge.
pub fn set_connection_state(state: ConnectionState) {
    let connected = if state == ConnectionState::Connected { 1.0 } else { 0.0 };
    gauge!("stream_client_connected").set(connected);
}

/// Update the outbound queue depth.
#[allow(clippy::cast_precision_loss)]
pub fn set_queue_depth(depth: usize) {
    gauge!("stream_client_queue_depth").set(depth as f64);
}

/// Record a heartbeat round trip.
pub fn record_latency(latency: Duration) {
    histogram!("stream_client_latency_seconds").record(latency.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_as_str() {
        assert_eq!(ErrorKind::Connect.as_str(), "connect");
        assert_eq!(ErrorKind::Transport.as_str(), "transport");
        assert_eq!(ErrorKind::Decode.as_str(), "decode");
        assert_eq!(ErrorKind::Send.as_str(), "send");
        assert_eq!(ErrorKind::Server.as_str(), "server");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_sent(10);
        record_received(10);
        record_dropped(DropReason::Evicted);
        record_error(ErrorKind::Decode);
        record_reconnect();
        set_connection_state(ConnectionState::Connected);
        set_queue_depth(3);
        record_latency(Duration::from_millis(5));
    }
}
