//! Connection Health
//!
//! Connection state machine labels, link quality assessment, and the
//! immutable health snapshot handed to consumers.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Connection State
// =============================================================================

/// Physical connection state.
///
/// ```text
/// disconnected → connecting → connected → (error | disconnected)
/// connected → reconnecting → connecting        (unexpected loss)
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No connection; initial state and terminal after manual close.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Session open.
    Connected,
    /// Waiting for the backoff timer after an unexpected loss.
    Reconnecting,
    /// Last connection attempt failed.
    Error,
}

impl ConnectionState {
    /// Label used in logs and health output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire framing negotiated for inbound market data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolMode {
    /// JSON text frames only.
    #[default]
    Text,
    /// JSON text frames plus fixed-layout binary ticks.
    Binary,
}

// =============================================================================
// Quality
// =============================================================================

/// Coarse link quality, degrading excellent → good → fair → poor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    /// Low latency, almost no errors.
    #[default]
    Excellent,
    /// Usable.
    Good,
    /// Noticeably degraded.
    Fair,
    /// Unreliable, overdue pong, or no connection.
    Poor,
}

impl ConnectionQuality {
    /// Wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Poor => "poor",
        }
    }
}

impl fmt::Display for ConnectionQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latency and error-rate limits for each quality tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityThresholds {
    /// Max latency for `excellent`.
    pub excellent_latency: Duration,
    /// Max error rate for `excellent`.
    pub excellent_error_rate: f64,
    /// Max latency for `good`.
    pub good_latency: Duration,
    /// Max error rate for `good`.
    pub good_error_rate: f64,
    /// Max latency for `fair`.
    pub fair_latency: Duration,
    /// Max error rate for `fair`.
    pub fair_error_rate: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            excellent_latency: Duration::from_millis(100),
            excellent_error_rate: 0.01,
            good_latency: Duration::from_millis(300),
            good_error_rate: 0.05,
            fair_latency: Duration::from_millis(1000),
            fair_error_rate: 0.15,
        }
    }
}

impl QualityThresholds {
    /// Classify the link.
    ///
    /// Unknown latency (no pong yet) is treated as zero. An overdue pong is
    /// always `poor`.
    #[must_use]
    pub fn assess(&self, latency: Option<Duration>, error_rate: f64, pong_overdue: bool) -> ConnectionQuality {
        if pong_overdue {
            return ConnectionQuality::Poor;
        }

        let latency = latency.unwrap_or(Duration::ZERO);
        if latency <= self.excellent_latency && error_rate < self.excellent_error_rate {
            ConnectionQuality::Excellent
        } else if latency <= self.good_latency && error_rate < self.good_error_rate {
            ConnectionQuality::Good
        } else if latency <= self.fair_latency && error_rate < self.fair_error_rate {
            ConnectionQuality::Fair
        } else {
            ConnectionQuality::Poor
        }
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Immutable copy of the connection's health.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    /// Current state.
    pub status: ConnectionState,
    /// Identifier of the current (or last) handshake.
    pub connection_id: Option<String>,
    /// Framing mode.
    pub protocol: ProtocolMode,
    /// Latest ping round trip, overwritten on each pong.
    pub latency_ms: Option<u64>,
    /// Reconnect attempts started since the client was created.
    pub reconnect_count: u64,
    /// Consecutive failed attempts in the current backoff sequence.
    pub reconnect_attempts: u32,
    /// Frames sent.
    pub messages_sent: u64,
    /// Frames received.
    pub messages_received: u64,
    /// Errors recorded.
    pub error_count: u64,
    /// When the last pong arrived.
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Current link quality.
    pub quality: ConnectionQuality,
    /// Outbound messages awaiting transmission.
    pub queued_messages: usize,
    /// Registered subscriptions.
    pub subscriptions: usize,
}
