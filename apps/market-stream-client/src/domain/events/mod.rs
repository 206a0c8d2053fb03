//! Stream Events
//!
//! Typed notifications emitted by the client over a broadcast channel.
//! Consumers subscribe with [`crate::StreamClient::events`]; a slow consumer
//! lags and misses events rather than blocking the client.

use std::time::Duration;

use serde::Serialize;

use crate::domain::health::ConnectionQuality;
use crate::domain::queue::MessageId;
use crate::domain::stats::StatsSnapshot;
use crate::domain::streaming::MarketData;
use crate::domain::subscription::SubscriptionId;

/// Why an outbound message was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Evicted from a full queue by a higher-priority message.
    Evicted,
    /// Rejected because the queue was full of higher-priority messages.
    QueueFull,
    /// Transport send failed more times than the retry budget allows.
    RetriesExhausted,
}

impl DropReason {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Evicted => "evicted",
            Self::QueueFull => "queue_full",
            Self::RetriesExhausted => "retries_exhausted",
        }
    }
}

/// Event emitted by the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A session was established.
    ConnectionOpened {
        /// Handshake identifier.
        connection_id: String,
    },
    /// The session ended.
    ConnectionClosed {
        /// Close reason, if any.
        reason: String,
        /// Close code, if any.
        code: Option<u16>,
    },
    /// A connection attempt or the live session failed.
    ConnectionError {
        /// Error description.
        message: String,
        /// Whether the client will keep trying on its own.
        recoverable: bool,
    },
    /// A reconnect is scheduled.
    Reconnecting {
        /// Attempt number (1-based).
        attempt: u32,
        /// Backoff delay before the attempt.
        #[serde(with = "duration_ms")]
        delay: Duration,
    },
    /// Reconnect attempts exceeded the maximum; no further retries.
    ReconnectExhausted {
        /// Attempts made.
        attempts: u32,
    },
    /// Market data arrived.
    MarketData(MarketData),
    /// The far end confirmed a subscription.
    SubscriptionAcknowledged {
        /// Subscription confirmed.
        id: SubscriptionId,
    },
    /// The far end reported an error frame.
    ServerError {
        /// Server error code, if any.
        code: Option<String>,
        /// Server message.
        message: String,
    },
    /// An outbound message was discarded.
    MessageDropped {
        /// Message identifier.
        id: MessageId,
        /// Why it was discarded.
        reason: DropReason,
    },
    /// Statistics changed.
    StatsUpdated(StatsSnapshot),
    /// Link quality changed.
    QualityChanged {
        /// Previous quality.
        previous: ConnectionQuality,
        /// New quality.
        current: ConnectionQuality,
    },
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }
}
