//! Feed Codec Module
//!
//! Decodes inbound feed frames.
//!
//! - **Text frames**: JSON, either a single object or an array of objects,
//!   each discriminated by its `type` field
//! - **Binary frames**: fixed 32-byte big-endian ticks, accepted only when
//!   binary mode was negotiated
//!
//! # Binary Tick Layout
//!
//! ```text
//! offset  size  field
//!      0     6  symbol (ASCII, NUL padded)
//!      6     2  padding
//!      8     8  price      f64
//!     16     8  volume     f64
//!     24     8  timestamp  u64 (epoch milliseconds)
//! ```

use serde_json::Value;

use crate::application::ports::WireFrame;
use crate::domain::health::ProtocolMode;
use crate::domain::streaming::{MarketData, MarketDataKind};
use crate::domain::subscription::SubscriptionId;
use crate::infrastructure::feed::messages::InboundMessage;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// A JSON object had no `type` field.
    #[error("message has no type field")]
    MissingType,

    /// A required field was absent or had the wrong type.
    #[error("{kind} message missing field `{field}`")]
    MissingField {
        /// Message type.
        kind: String,
        /// Field name.
        field: &'static str,
    },

    /// Text frame was neither a JSON object nor an array.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    /// Binary frame shorter than the fixed layout.
    #[error("binary frame truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Required length.
        expected: usize,
        /// Received length.
        actual: usize,
    },

    /// Binary symbol field was empty or not printable ASCII.
    #[error("invalid symbol in binary frame")]
    InvalidSymbol,

    /// A binary frame arrived on a text-mode session.
    #[error("binary frame received but binary mode is off")]
    UnexpectedBinary,
}

// =============================================================================
// JSON
// =============================================================================

/// JSON codec for text frames.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON parsing fails or a known message type lacks
    /// a required field. Unknown types are not errors.
    pub fn decode(&self, text: &str) -> Result<Vec<InboundMessage>, CodecError> {
        let value: Value = serde_json::from_str(text.trim())?;

        match value {
            Value::Array(items) => items.into_iter().map(|item| self.decode_value(item)).collect(),
            Value::Object(_) => Ok(vec![self.decode_value(value)?]),
            other => Err(CodecError::InvalidFormat(format!(
                "expected JSON array or object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Decode one JSON object.
    ///
    /// # Errors
    ///
    /// Returns an error if the object has no `type` or a known type lacks a
    /// required field.
    pub fn decode_value(&self, value: Value) -> Result<InboundMessage, CodecError> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(CodecError::MissingType)?
            .to_string();

        match kind.as_str() {
            "pong" => Ok(InboundMessage::Pong {
                timestamp: value.get("timestamp").and_then(as_millis),
            }),
            "subscription_ack" => {
                let id = value
                    .get("id")
                    .and_then(as_subscription_id)
                    .ok_or_else(|| CodecError::MissingField {
                        kind: kind.clone(),
                        field: "id",
                    })?;
                Ok(InboundMessage::SubscriptionAck { id })
            }
            "error" => {
                let message = value
                    .get("message")
                    .or_else(|| value.get("error"))
                    .and_then(Value::as_str)
                    .unwrap_or("unspecified server error")
                    .to_string();
                let code = value.get("code").and_then(|code| match code {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                });
                Ok(InboundMessage::ServerError { code, message })
            }
            other => match MarketDataKind::from_wire(other) {
                Some(data_kind) => {
                    let symbol = value
                        .get("symbol")
                        .and_then(Value::as_str)
                        .ok_or_else(|| CodecError::MissingField {
                            kind: kind.clone(),
                            field: "symbol",
                        })?
                        .to_string();
                    Ok(InboundMessage::MarketData(MarketData {
                        kind: data_kind,
                        symbol,
                        price: value.get("price").and_then(Value::as_f64),
                        volume: value.get("volume").and_then(Value::as_f64),
                        timestamp: value.get("timestamp").and_then(as_millis),
                        payload: value,
                    }))
                }
                None => Ok(InboundMessage::Unknown { kind: kind.clone() }),
            },
        }
    }
}

fn as_millis(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .map(|f| {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let millis = f as u64;
                millis
            })
    })
}

fn as_subscription_id(value: &Value) -> Option<SubscriptionId> {
    match value {
        Value::Number(n) => n.as_u64().map(SubscriptionId::new),
        Value::String(s) => s.parse().ok().map(SubscriptionId::new),
        _ => None,
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// Binary
// =============================================================================

/// Codec for fixed-layout binary ticks.
#[derive(Debug, Default, Clone)]
pub struct BinaryTickCodec;

impl BinaryTickCodec {
    /// Total frame length.
    pub const FRAME_LEN: usize = 32;
    /// Symbol field width.
    pub const SYMBOL_LEN: usize = 6;

    const PRICE_OFFSET: usize = 8;
    const VOLUME_OFFSET: usize = 16;
    const TIMESTAMP_OFFSET: usize = 24;

    /// Create a new binary codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one binary tick. Trailing bytes beyond the layout are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is truncated or the symbol is invalid.
    pub fn decode(&self, bytes: &[u8]) -> Result<MarketData, CodecError> {
        if bytes.len() < Self::FRAME_LEN {
            return Err(CodecError::Truncated {
                expected: Self::FRAME_LEN,
                actual: bytes.len(),
            });
        }

        let symbol = Self::read_symbol(bytes)?;
        let price = f64::from_be_bytes(Self::read_word(bytes, Self::PRICE_OFFSET)?);
        let volume = f64::from_be_bytes(Self::read_word(bytes, Self::VOLUME_OFFSET)?);
        let timestamp = u64::from_be_bytes(Self::read_word(bytes, Self::TIMESTAMP_OFFSET)?);

        Ok(MarketData {
            kind: MarketDataKind::BinaryTick,
            symbol,
            price: Some(price),
            volume: Some(volume),
            timestamp: Some(timestamp),
            payload: Value::Null,
        })
    }

    /// Encode a tick in the binary layout.
    ///
    /// # Errors
    ///
    /// Returns an error if the symbol is empty, longer than six bytes, or not
    /// printable ASCII.
    pub fn encode(
        &self,
        symbol: &str,
        price: f64,
        volume: f64,
        timestamp: u64,
    ) -> Result<[u8; Self::FRAME_LEN], CodecError> {
        let raw = symbol.as_bytes();
        if raw.is_empty() || raw.len() > Self::SYMBOL_LEN || !raw.iter().all(u8::is_ascii_graphic) {
            return Err(CodecError::InvalidSymbol);
        }

        let mut frame = [0u8; Self::FRAME_LEN];
        frame[..raw.len()].copy_from_slice(raw);
        frame[Self::PRICE_OFFSET..Self::VOLUME_OFFSET].copy_from_slice(&price.to_be_bytes());
        frame[Self::VOLUME_OFFSET..Self::TIMESTAMP_OFFSET].copy_from_slice(&volume.to_be_bytes());
        frame[Self::TIMESTAMP_OFFSET..].copy_from_slice(&timestamp.to_be_bytes());
        Ok(frame)
    }

    fn read_symbol(bytes: &[u8]) -> Result<String, CodecError> {
        let field = bytes.get(..Self::SYMBOL_LEN).ok_or(CodecError::Truncated {
            expected: Self::FRAME_LEN,
            actual: bytes.len(),
        })?;
        let end = field.iter().position(|b| *b == 0).unwrap_or(field.len());
        let symbol = &field[..end];

        if symbol.is_empty() || !symbol.iter().all(u8::is_ascii_graphic) {
            return Err(CodecError::InvalidSymbol);
        }
        Ok(symbol.iter().map(|b| char::from(*b)).collect())
    }

    fn read_word(bytes: &[u8], offset: usize) -> Result<[u8; 8], CodecError> {
        bytes
            .get(offset..offset + 8)
            .and_then(|slice| <[u8; 8]>::try_from(slice).ok())
            .ok_or(CodecError::Truncated {
                expected: Self::FRAME_LEN,
                actual: bytes.len(),
            })
    }
}

// =============================================================================
// Frame Decoder
// =============================================================================

/// Decodes wire frames according to the negotiated protocol mode.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    mode: ProtocolMode,
    json: JsonCodec,
    binary: BinaryTickCodec,
}

impl FrameDecoder {
    /// Decoder for a session in `mode`.
    #[must_use]
    pub const fn new(mode: ProtocolMode) -> Self {
        Self {
            mode,
            json: JsonCodec::new(),
            binary: BinaryTickCodec::new(),
        }
    }

    /// Decode one frame. Close frames decode to nothing.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed frames and for binary frames on a
    /// text-mode session.
    pub fn decode(&self, frame: &WireFrame) -> Result<Vec<InboundMessage>, CodecError> {
        match frame {
            WireFrame::Text(text) => self.json.decode(text),
            WireFrame::Binary(bytes) => match self.mode {
                ProtocolMode::Binary => Ok(vec![InboundMessage::MarketData(self.binary.decode(bytes)?)]),
                ProtocolMode::Text => Err(CodecError::UnexpectedBinary),
            },
            WireFrame::Close { .. } => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use test_case::test_case;

    use super::*;

    #[test]
    fn decode_pong_with_timestamp() {
        let messages = JsonCodec::new().decode(r#"{"type":"pong","timestamp":1700000000123}"#).unwrap();
        assert_eq!(
            messages,
            vec![InboundMessage::Pong {
                timestamp: Some(1_700_000_000_123)
            }]
        );
    }

    #[test]
    fn decode_pong_without_timestamp() {
        let messages = JsonCodec::new().decode(r#"{"type":"pong"}"#).unwrap();
        assert_eq!(messages, vec![InboundMessage::Pong { timestamp: None }]);
    }

    #[test_case(json!(3) ; "numeric id")]
    #[test_case(json!("3") ; "string id")]
    fn decode_subscription_ack(id: Value) {
        let message = JsonCodec::new()
            .decode_value(json!({"type": "subscription_ack", "id": id}))
            .unwrap();
        assert_eq!(
            message,
            InboundMessage::SubscriptionAck {
                id: SubscriptionId::new(3)
            }
        );
    }

    #[test]
    fn subscription_ack_without_id_is_an_error() {
        let err = JsonCodec::new()
            .decode(r#"{"type":"subscription_ack"}"#)
            .unwrap_err();
        assert!(matches!(err, CodecError::MissingField { field: "id", .. }));
    }

    #[test]
    fn decode_server_error() {
        let messages = JsonCodec::new()
            .decode(r#"{"type":"error","code":429,"message":"slow down"}"#)
            .unwrap();
        assert_eq!(
            messages,
            vec![InboundMessage::ServerError {
                code: Some("429".to_string()),
                message: "slow down".to_string(),
            }]
        );
    }

    #[test_case("tick", MarketDataKind::Tick)]
    #[test_case("trade", MarketDataKind::Trade)]
    #[test_case("quote", MarketDataKind::Quote)]
    fn decode_market_data(kind: &str, expected: MarketDataKind) {
        let text = json!({"type": kind, "symbol": "EURUSD", "price": 1.0845, "timestamp": 5}).to_string();
        let messages = JsonCodec::new().decode(&text).unwrap();

        let [InboundMessage::MarketData(data)] = messages.as_slice() else {
            panic!("expected one market data message, got {messages:?}");
        };
        assert_eq!(data.kind, expected);
        assert_eq!(data.symbol, "EURUSD");
        assert_eq!(data.price, Some(1.0845));
        assert_eq!(data.volume, None);
        assert_eq!(data.timestamp, Some(5));
        assert_eq!(data.payload["type"], kind);
    }

    #[test]
    fn market_data_without_symbol_is_an_error() {
        let err = JsonCodec::new().decode(r#"{"type":"tick","price":1.0}"#).unwrap_err();
        assert!(matches!(err, CodecError::MissingField { field: "symbol", .. }));
    }

    #[test]
    fn unknown_type_is_accepted() {
        let messages = JsonCodec::new().decode(r#"{"type":"news","headline":"x"}"#).unwrap();
        assert_eq!(
            messages,
            vec![InboundMessage::Unknown {
                kind: "news".to_string()
            }]
        );
    }

    #[test]
    fn decode_array_of_messages() {
        let messages = JsonCodec::new()
            .decode(r#"[{"type":"pong"},{"type":"subscription_ack","id":1}]"#)
            .unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[test_case("not json" ; "garbage")]
    #[test_case("42" ; "scalar")]
    #[test_case(r#"{"symbol":"EURUSD"}"# ; "no type")]
    fn malformed_text_is_an_error(text: &str) {
        assert!(JsonCodec::new().decode(text).is_err());
    }

    #[test]
    fn binary_tick_decodes_fields() {
        let codec = BinaryTickCodec::new();
        let frame = codec.encode("EURUSD", 1.0845, 250_000.0, 1_700_000_000_000).unwrap();

        let data = codec.decode(&frame).unwrap();
        assert_eq!(data.kind, MarketDataKind::BinaryTick);
        assert_eq!(data.symbol, "EURUSD");
        assert_eq!(data.price, Some(1.0845));
        assert_eq!(data.volume, Some(250_000.0));
        assert_eq!(data.timestamp, Some(1_700_000_000_000));
    }

    #[test]
    fn binary_symbol_stops_at_nul() {
        let codec = BinaryTickCodec::new();
        let frame = codec.encode("BTC", 64_000.5, 1.0, 1).unwrap();
        assert_eq!(&frame[3..8], &[0, 0, 0, 0, 0]);
        assert_eq!(codec.decode(&frame).unwrap().symbol, "BTC");
    }

    #[test]
    fn binary_layout_is_big_endian() {
        let frame = BinaryTickCodec::new().encode("AAPL", 1.0, 2.0, 0x0102).unwrap();
        assert_eq!(&frame[8..16], &1.0f64.to_be_bytes());
        assert_eq!(frame[30], 0x01);
        assert_eq!(frame[31], 0x02);
    }

    #[test_case(0 ; "empty")]
    #[test_case(6 ; "symbol only")]
    #[test_case(31 ; "one short")]
    fn truncated_binary_frame(len: usize) {
        let frame = BinaryTickCodec::new().encode("EURUSD", 1.0, 1.0, 1).unwrap();
        let err = BinaryTickCodec::new().decode(&frame[..len]).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { expected: 32, actual } if actual == len));
    }

    #[test]
    fn invalid_binary_symbol() {
        let mut frame = [0u8; 32];
        assert!(matches!(
            BinaryTickCodec::new().decode(&frame),
            Err(CodecError::InvalidSymbol)
        ));

        frame[0] = 0xFF;
        assert!(matches!(
            BinaryTickCodec::new().decode(&frame),
            Err(CodecError::InvalidSymbol)
        ));
    }

    #[test]
    fn encode_rejects_long_symbol() {
        assert!(BinaryTickCodec::new().encode("TOOLONG", 1.0, 1.0, 1).is_err());
    }

    #[test]
    fn decoder_respects_protocol_mode() {
        let frame = WireFrame::Binary(
            BinaryTickCodec::new()
                .encode("EURUSD", 1.0, 1.0, 1)
                .unwrap()
                .to_vec(),
        );

        assert!(matches!(
            FrameDecoder::new(ProtocolMode::Text).decode(&frame),
            Err(CodecError::UnexpectedBinary)
        ));
        assert_eq!(FrameDecoder::new(ProtocolMode::Binary).decode(&frame).unwrap().len(), 1);
    }

    #[test]
    fn decoder_handles_text_and_close() {
        let decoder = FrameDecoder::new(ProtocolMode::Binary);
        let text = WireFrame::Text(r#"{"type":"pong"}"#.to_string());
        assert_eq!(decoder.decode(&text).unwrap().len(), 1);

        let close = WireFrame::Close {
            code: Some(1000),
            reason: String::new(),
        };
        assert!(decoder.decode(&close).unwrap().is_empty());
    }
}
