//! WebSocket Transport
//!
//! Production [`FeedTransport`] over `tokio-tungstenite`. The socket is
//! split: a writer task drains an unbounded channel so [`FrameSink::send`]
//! never suspends, and the read half is mapped into [`WireFrame`]s.
//! Protocol-level pings are answered by tungstenite itself and are not
//! surfaced.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use url::Url;

use crate::application::ports::{FeedTransport, FrameSink, TransportError, TransportSession, WireFrame};

/// WebSocket transport for `ws://` and `wss://` feeds.
#[derive(Debug, Default, Clone)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Create a new transport.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FeedTransport for WebSocketTransport {
    async fn open(&self, url: &Url) -> Result<TransportSession, TransportError> {
        tracing::debug!(host = url.host_str().unwrap_or_default(), "Opening WebSocket");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        let (mut write, read) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = write.send(message).await {
                    tracing::debug!(error = %e, "WebSocket write failed");
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = write.close().await;
        });

        let inbound = read
            .filter_map(|message| async move {
                match message {
                    Ok(Message::Text(text)) => Some(Ok(WireFrame::Text(text.to_string()))),
                    Ok(Message::Binary(bytes)) => Some(Ok(WireFrame::Binary(bytes.to_vec()))),
                    Ok(Message::Close(frame)) => Some(Ok(WireFrame::Close {
                        code: frame.as_ref().map(|f| u16::from(f.code)),
                        reason: frame.map(|f| f.reason.to_string()).unwrap_or_default(),
                    })),
                    Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
                    Err(e) => Some(Err(map_error(e))),
                }
            })
            .boxed();

        Ok(TransportSession {
            sink: Box::new(WebSocketSink { tx }),
            inbound,
        })
    }
}

/// Write half backed by the writer task.
struct WebSocketSink {
    tx: mpsc::UnboundedSender<Message>,
}

impl FrameSink for WebSocketSink {
    fn send(&self, frame: WireFrame) -> Result<(), TransportError> {
        self.tx.send(to_message(frame)).map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        let _ = self.tx.send(Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "client closing".into(),
        })));
    }
}

fn to_message(frame: WireFrame) -> Message {
    match frame {
        WireFrame::Text(text) => Message::Text(text.into()),
        WireFrame::Binary(bytes) => Message::Binary(bytes.into()),
        WireFrame::Close { code, reason } => Message::Close(Some(CloseFrame {
            code: code.map_or(CloseCode::Normal, CloseCode::from),
            reason: reason.into(),
        })),
    }
}

fn map_error(error: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error;

    match error {
        Error::ConnectionClosed | Error::AlreadyClosed => TransportError::Closed,
        Error::Io(e) => TransportError::Io(e.to_string()),
        other => TransportError::Protocol(other.to_string()),
    }
}
