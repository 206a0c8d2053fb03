//! Market Data Streaming Types
//!
//! Canonical representation of inbound market data, independent of whether
//! it arrived as a JSON text frame or a fixed-layout binary frame. Business
//! interpretation of the values is left to consumers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a market data update was reported by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketDataKind {
    /// Price tick.
    Tick,
    /// Executed trade.
    Trade,
    /// Bid/ask quote.
    Quote,
    /// Fixed-layout binary tick.
    BinaryTick,
}

impl MarketDataKind {
    /// Wire label for JSON types; `binary_tick` for binary frames.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tick => "tick",
            Self::Trade => "trade",
            Self::Quote => "quote",
            Self::BinaryTick => "binary_tick",
        }
    }

    /// Parse a JSON `type` discriminator.
    #[must_use]
    pub fn from_wire(kind: &str) -> Option<Self> {
        match kind {
            "tick" => Some(Self::Tick),
            "trade" => Some(Self::Trade),
            "quote" => Some(Self::Quote),
            _ => None,
        }
    }
}

/// A single market data update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    /// Message kind.
    pub kind: MarketDataKind,
    /// Instrument symbol.
    pub symbol: String,
    /// Price, when the feed reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    /// Volume, when the feed reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    /// Feed timestamp (milliseconds since the epoch).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    /// Full decoded payload (`null` for binary frames).
    #[serde(default)]
    pub payload: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_kinds_round_trip() {
        for kind in [MarketDataKind::Tick, MarketDataKind::Trade, MarketDataKind::Quote] {
            assert_eq!(MarketDataKind::from_wire(kind.as_str()), Some(kind));
        }
        assert_eq!(MarketDataKind::from_wire("binary_tick"), None);
        assert_eq!(MarketDataKind::from_wire("bar"), None);
    }

    #[test]
    fn optional_fields_are_omitted() {
        let data = MarketData {
            kind: MarketDataKind::Quote,
            symbol: "EURUSD".to_string(),
            price: None,
            volume: None,
            timestamp: Some(1),
            payload: Value::Null,
        };

        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["kind"], "quote");
        assert!(json.get("price").is_none());
        assert_eq!(json["timestamp"], 1);
    }
}
