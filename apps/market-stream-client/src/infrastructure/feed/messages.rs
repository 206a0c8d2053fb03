//! Feed Wire Messages
//!
//! Outbound control frames and the decoded form of inbound frames.
//!
//! # Outbound
//!
//! ```json
//! {"action":"subscribe","symbol":"EURUSD","channel":"price","id":1,"timestamp":1700000000000}
//! {"type":"ping","timestamp":1700000000000,"connectionId":"conn_..."}
//! ```
//!
//! # Inbound
//!
//! JSON objects discriminated by `type`: `pong`, `subscription_ack`,
//! `error`, and the market data types `tick`, `trade`, `quote`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::streaming::MarketData;
use crate::domain::subscription::{ControlAction, SubscriptionCommand, SubscriptionId};

/// Milliseconds since the Unix epoch, as used in frame timestamps.
#[must_use]
pub fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

// =============================================================================
// Outbound
// =============================================================================

/// Subscribe/unsubscribe control frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlFrame {
    /// Requested action.
    pub action: ControlAction,
    /// Instrument symbol.
    pub symbol: String,
    /// Feed channel.
    pub channel: String,
    /// Subscription identifier.
    pub id: SubscriptionId,
    /// Send time in epoch milliseconds.
    pub timestamp: u64,
}

impl ControlFrame {
    /// Build the frame for a registry command, stamped now.
    #[must_use]
    pub fn from_command(command: &SubscriptionCommand) -> Self {
        Self {
            action: command.action,
            symbol: command.symbol.clone(),
            channel: command.channel.clone(),
            id: command.id,
            timestamp: now_millis(),
        }
    }

    /// JSON payload for the outbound queue.
    #[must_use]
    pub fn to_payload(&self) -> Value {
        serde_json::json!({
            "action": self.action.as_str(),
            "symbol": self.symbol,
            "channel": self.channel,
            "id": self.id,
            "timestamp": self.timestamp,
        })
    }
}

/// Heartbeat ping frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "ping", rename_all = "camelCase")]
pub struct PingFrame {
    /// Send time in epoch milliseconds; echoed back in the pong.
    pub timestamp: u64,
    /// Identifier of the current handshake.
    pub connection_id: String,
}

impl PingFrame {
    /// Ping stamped now.
    #[must_use]
    pub fn new(connection_id: impl Into<String>) -> Self {
        Self {
            timestamp: now_millis(),
            connection_id: connection_id.into(),
        }
    }

    /// JSON payload for the outbound queue.
    #[must_use]
    pub fn to_payload(&self) -> Value {
        serde_json::json!({
            "type": "ping",
            "timestamp": self.timestamp,
            "connectionId": self.connection_id,
        })
    }

    /// Whether an outbound payload is a ping.
    #[must_use]
    pub fn is_ping(payload: &Value) -> bool {
        payload.get("type").and_then(Value::as_str) == Some("ping")
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Heartbeat reply.
    Pong {
        /// Echoed ping timestamp, if present.
        timestamp: Option<u64>,
    },
    /// The far end confirmed a subscription.
    SubscriptionAck {
        /// Subscription confirmed.
        id: SubscriptionId,
    },
    /// The far end reported an error.
    ServerError {
        /// Server error code, if any.
        code: Option<String>,
        /// Server message.
        message: String,
    },
    /// Market data update.
    MarketData(MarketData),
    /// A frame with a `type` this client does not handle.
    Unknown {
        /// The unhandled type.
        kind: String,
    },
}
