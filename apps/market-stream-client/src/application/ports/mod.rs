//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `FeedTransport`: Opens a bidirectional frame session to the feed
//! - `FrameSink`: Writes frames on an open session
//! - `SubscriptionStore`: Saves and restores subscription state

use async_trait::async_trait;
use futures::stream::BoxStream;
use url::Url;

use crate::domain::subscription::Subscription;

// =============================================================================
// Transport
// =============================================================================

/// A frame on the feed connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    /// UTF-8 text frame (JSON).
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Close frame.
    Close {
        /// Close code, if the peer sent one.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },
}

impl WireFrame {
    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
            Self::Close { reason, .. } => reason.len(),
        }
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Errors raised by a transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Handshake failed or the endpoint refused the connection.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The session is closed.
    #[error("connection closed")]
    Closed,

    /// Network I/O failed.
    #[error("I/O error: {0}")]
    Io(String),

    /// The peer violated the framing protocol.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Write half of an open session.
///
/// Sending never suspends; adapters buffer internally.
pub trait FrameSink: Send + Sync {
    /// Queue a frame for writing.
    ///
    /// # Errors
    ///
    /// Returns an error if the session can no longer accept writes.
    fn send(&self, frame: WireFrame) -> Result<(), TransportError>;

    /// Close the session with a normal close code.
    fn close(&self);
}

/// An open session: a sink for outbound frames and a stream of inbound ones.
pub struct TransportSession {
    /// Outbound half.
    pub sink: Box<dyn FrameSink>,
    /// Inbound half; ends when the connection is gone.
    pub inbound: BoxStream<'static, Result<WireFrame, TransportError>>,
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession").finish_non_exhaustive()
    }
}

/// Opens sessions to the feed.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    /// Perform the handshake against `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    async fn open(&self, url: &Url) -> Result<TransportSession, TransportError>;
}

// =============================================================================
// Persistence
// =============================================================================

/// Errors raised by a subscription store.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Storage I/O failed.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Local persistence hook for subscription state.
#[cfg_attr(test, mockall::automock)]
pub trait SubscriptionStore: Send + Sync {
    /// Replace the stored subscriptions.
    ///
    /// # Errors
    ///
    /// Returns an error if the data cannot be written.
    fn save(&self, subscriptions: &[Subscription]) -> Result<(), PersistenceError>;

    /// Load previously stored subscriptions; empty when nothing was saved.
    ///
    /// # Errors
    ///
    /// Returns an error if stored data exists but cannot be read.
    fn load(&self) -> Result<Vec<Subscription>, PersistenceError>;
}
