//! In-Memory Transport
//!
//! A [`FeedTransport`] that connects to an in-process peer instead of the
//! network. Each accepted handshake yields an [`InMemoryPeer`] that can
//! inspect what the client wrote and push frames, closes and failures back.
//! Used by the test suites and for embedding the client against a local
//! simulator.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use url::Url;

use crate::application::ports::{FeedTransport, FrameSink, TransportError, TransportSession, WireFrame};

/// How the transport answers a handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// Complete the handshake.
    Accept,
    /// Fail the handshake with the given reason.
    Refuse(String),
    /// Never answer; the caller's timeout decides.
    Hang,
}

struct TransportShared {
    script: Mutex<VecDeque<ConnectBehavior>>,
    fallback: Mutex<ConnectBehavior>,
    attempts: AtomicUsize,
    urls: Mutex<Vec<Url>>,
    peers_tx: mpsc::UnboundedSender<InMemoryPeer>,
    peers_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<InMemoryPeer>>,
}

/// Transport that hands each accepted session to the test as a peer.
#[derive(Clone)]
pub struct InMemoryTransport {
    shared: Arc<TransportShared>,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransport")
            .field("attempts", &self.attempts())
            .finish_non_exhaustive()
    }
}

impl InMemoryTransport {
    /// Transport that accepts every handshake.
    #[must_use]
    pub fn new() -> Self {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(TransportShared {
                script: Mutex::new(VecDeque::new()),
                fallback: Mutex::new(ConnectBehavior::Accept),
                attempts: AtomicUsize::new(0),
                urls: Mutex::new(Vec::new()),
                peers_tx,
                peers_rx: tokio::sync::Mutex::new(peers_rx),
            }),
        }
    }

    /// Answer the next unscripted handshake with `behavior`.
    pub fn script(&self, behavior: ConnectBehavior) {
        self.shared.script.lock().push_back(behavior);
    }

    /// Behavior once the script is exhausted.
    pub fn set_fallback(&self, behavior: ConnectBehavior) {
        *self.shared.fallback.lock() = behavior;
    }

    /// Handshakes attempted so far.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// URLs of every attempted handshake.
    #[must_use]
    pub fn urls(&self) -> Vec<Url> {
        self.shared.urls.lock().clone()
    }

    /// Wait for the next accepted session.
    ///
    /// Returns `None` only if every transport handle was dropped.
    pub async fn next_peer(&self) -> Option<InMemoryPeer> {
        self.shared.peers_rx.lock().await.recv().await
    }

    fn next_behavior(&self) -> ConnectBehavior {
        self.shared
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.shared.fallback.lock().clone())
    }
}

#[async_trait]
impl FeedTransport for InMemoryTransport {
    async fn open(&self, url: &Url) -> Result<TransportSession, TransportError> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);
        self.shared.urls.lock().push(url.clone());

        match self.next_behavior() {
            ConnectBehavior::Accept => {}
            ConnectBehavior::Refuse(reason) => return Err(TransportError::Handshake(reason)),
            ConnectBehavior::Hang => std::future::pending::<()>().await,
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (count_tx, _) = watch::channel(0usize);
        let log = Arc::new(PeerLog {
            frames: Mutex::new(Vec::new()),
            count: count_tx,
            closed_by_client: AtomicBool::new(false),
            writes_broken: AtomicBool::new(false),
        });

        let peer = InMemoryPeer {
            url: url.clone(),
            log: log.clone(),
            inbound_tx,
        };
        // Receiver lives in `shared`, so this cannot fail.
        let _ = self.shared.peers_tx.send(peer);

        Ok(TransportSession {
            sink: Box::new(MemorySink { log }),
            inbound: UnboundedReceiverStream::new(inbound_rx).boxed(),
        })
    }
}

// =============================================================================
// Peer
// =============================================================================

struct PeerLog {
    frames: Mutex<Vec<WireFrame>>,
    count: watch::Sender<usize>,
    closed_by_client: AtomicBool,
    writes_broken: AtomicBool,
}

struct MemorySink {
    log: Arc<PeerLog>,
}

impl FrameSink for MemorySink {
    fn send(&self, frame: WireFrame) -> Result<(), TransportError> {
        if self.log.writes_broken.load(Ordering::SeqCst) {
            return Err(TransportError::Io("simulated write failure".to_string()));
        }
        if self.log.closed_by_client.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let count = {
            let mut frames = self.log.frames.lock();
            frames.push(frame);
            frames.len()
        };
        self.log.count.send_replace(count);
        Ok(())
    }

    fn close(&self) {
        self.log.closed_by_client.store(true, Ordering::SeqCst);
    }
}

/// The far end of one in-memory session.
///
/// Dropping the peer ends the client's inbound stream, which the client
/// sees as an unexpected connection loss.
pub struct InMemoryPeer {
    url: Url,
    log: Arc<PeerLog>,
    inbound_tx: mpsc::UnboundedSender<Result<WireFrame, TransportError>>,
}

impl std::fmt::Debug for InMemoryPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryPeer").field("url", &self.url.as_str()).finish_non_exhaustive()
    }
}

impl InMemoryPeer {
    /// Handshake URL the client used.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Every frame the client wrote, in order.
    #[must_use]
    pub fn sent_frames(&self) -> Vec<WireFrame> {
        self.log.frames.lock().clone()
    }

    /// Text frames the client wrote, parsed as JSON.
    #[must_use]
    pub fn sent_json(&self) -> Vec<Value> {
        self.log
            .frames
            .lock()
            .iter()
            .filter_map(|frame| match frame {
                WireFrame::Text(text) => serde_json::from_str(text).ok(),
                _ => None,
            })
            .collect()
    }

    /// Wait until the client has written at least `count` frames.
    pub async fn wait_for_frames(&self, count: usize) -> Vec<WireFrame> {
        let mut rx = self.log.count.subscribe();
        let _ = rx.wait_for(|written| *written >= count).await;
        self.sent_frames()
    }

    /// Whether the client closed this session.
    #[must_use]
    pub fn closed_by_client(&self) -> bool {
        self.log.closed_by_client.load(Ordering::SeqCst)
    }

    /// Deliver a text frame.
    pub fn push_text(&self, text: impl Into<String>) {
        let _ = self.inbound_tx.send(Ok(WireFrame::Text(text.into())));
    }

    /// Deliver a JSON text frame.
    pub fn push_json(&self, value: &Value) {
        self.push_text(value.to_string());
    }

    /// Deliver a binary frame.
    pub fn push_binary(&self, bytes: impl Into<Vec<u8>>) {
        let _ = self.inbound_tx.send(Ok(WireFrame::Binary(bytes.into())));
    }

    /// Deliver a close frame.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        let _ = self.inbound_tx.send(Ok(WireFrame::Close {
            code: Some(code),
            reason: reason.into(),
        }));
    }

    /// Deliver a transport error.
    pub fn fail(&self, error: TransportError) {
        let _ = self.inbound_tx.send(Err(error));
    }

    /// Make every subsequent client write fail.
    pub fn break_writes(&self) {
        self.log.writes_broken.store(true, Ordering::SeqCst);
    }

    /// Drop the session without a close frame.
    pub fn drop_connection(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("ws://feed.test/stream").unwrap()
    }

    #[tokio::test]
    async fn accepted_session_connects_both_ends() {
        let transport = InMemoryTransport::new();
        let mut session = transport.open(&url()).await.unwrap();
        let peer = transport.next_peer().await.unwrap();

        session.sink.send(WireFrame::Text("hello".to_string())).unwrap();
        assert_eq!(peer.wait_for_frames(1).await, vec![WireFrame::Text("hello".to_string())]);

        peer.push_text("world");
        assert_eq!(
            session.inbound.next().await,
            Some(Ok(WireFrame::Text("world".to_string())))
        );

        peer.drop_connection();
        assert_eq!(session.inbound.next().await, None);
        assert_eq!(transport.attempts(), 1);
        assert_eq!(transport.urls(), vec![url()]);
    }

    #[tokio::test]
    async fn scripted_refusal_then_fallback() {
        let transport = InMemoryTransport::new();
        transport.script(ConnectBehavior::Refuse("nope".to_string()));

        let err = transport.open(&url()).await.unwrap_err();
        assert_eq!(err, TransportError::Handshake("nope".to_string()));
        assert!(transport.open(&url()).await.is_ok());
        assert_eq!(transport.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn hang_never_completes() {
        let transport = InMemoryTransport::new();
        transport.set_fallback(ConnectBehavior::Hang);

        let result = tokio::time::timeout(std::time::Duration::from_secs(1), transport.open(&url())).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn closed_or_broken_sink_rejects_writes() {
        let transport = InMemoryTransport::new();
        let session = transport.open(&url()).await.unwrap();
        let peer = transport.next_peer().await.unwrap();

        peer.break_writes();
        assert!(matches!(
            session.sink.send(WireFrame::Text("x".to_string())),
            Err(TransportError::Io(_))
        ));

        let session = transport.open(&url()).await.unwrap();
        let peer = transport.next_peer().await.unwrap();
        session.sink.close();
        assert!(peer.closed_by_client());
        assert_eq!(
            session.sink.send(WireFrame::Text("x".to_string())),
            Err(TransportError::Closed)
        );
    }
}
