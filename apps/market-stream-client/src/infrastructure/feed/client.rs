//! Stream Client
//!
//! Owns the physical connection to the feed and everything tied to it:
//! connect with timeout, heartbeat, backoff reconnection, subscription
//! replay, the outbound priority queue and rate limiting.
//!
//! # State Machine
//!
//! ```text
//! disconnected ──connect()──► connecting ──ok──► connected
//!      ▲                       ▲     │               │
//!      │                  timer│   fail       unexpected loss
//!      │                       │     ▼               ▼
//!      └──── exhausted ────── error | reconnecting ◄─┘
//! ```
//!
//! A manual [`StreamClient::disconnect`] is terminal: no timer survives it
//! and nothing reconnects until the next [`StreamClient::connect`].
//!
//! # Concurrency
//!
//! [`StreamClient`] is a cheap cloneable handle. All mutable state lives in
//! one mutex-guarded block; the lock is never held across an `.await`. Each
//! session runs one reader task plus a heartbeat task, and every callback
//! from those tasks carries the session generation so stale sessions are
//! ignored.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    FeedTransport, FrameSink, PersistenceError, SubscriptionStore, TransportError, TransportSession,
    WireFrame,
};
use crate::domain::events::{DropReason, StreamEvent};
use crate::domain::health::{ConnectionQuality, ConnectionState, HealthSnapshot};
use crate::domain::queue::{EnqueueOutcome, MessageId, MessageQueue, Priority, QueuedMessage};
use crate::domain::rate::RateGovernor;
use crate::domain::stats::{StatsCollector, StatsSnapshot};
use crate::domain::subscription::{
    ControlAction, Subscription, SubscriptionCommand, SubscriptionId, SubscriptionRegistry,
};
use crate::infrastructure::config::ClientConfig;
use crate::infrastructure::feed::endpoint::{EndpointError, build_connection_url, new_connection_id};
use crate::infrastructure::feed::heartbeat::{HeartbeatEvent, HeartbeatManager, HeartbeatState};
use crate::infrastructure::feed::messages::{ControlFrame, PingFrame};
use crate::infrastructure::feed::reconnect::ReconnectPolicy;
use crate::infrastructure::feed::session;
use crate::infrastructure::metrics::{self, ErrorKind};

/// Close code reported for a client-initiated disconnect.
pub const NORMAL_CLOSE: u16 = 1000;

// =============================================================================
// Error Type
// =============================================================================

/// Errors returned by [`StreamClient::connect`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectError {
    /// The configuration cannot produce a valid connection URL.
    #[error("configuration error: {0}")]
    Config(#[from] EndpointError),

    /// The handshake did not complete within the connect timeout.
    #[error("connection timed out after {0:?}")]
    Timeout(Duration),

    /// The transport failed the handshake.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Another connection attempt is already in progress.
    #[error("connection attempt already in progress")]
    InProgress,

    /// The attempt was superseded by a disconnect or network loss.
    #[error("connection attempt aborted")]
    Aborted,
}

impl ConnectError {
    /// Whether the error comes from configuration and will never succeed.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

/// Result of [`StreamClient::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the transport immediately.
    Transmitted,
    /// Held in the outbound queue.
    Queued,
    /// Discarded: the queue was full of higher-priority messages.
    Dropped,
}

// =============================================================================
// State
// =============================================================================

pub(super) struct ActiveSession {
    pub(super) sink: Arc<dyn FrameSink>,
    pub(super) cancel: CancellationToken,
    pub(super) heartbeat: Arc<HeartbeatState>,
}

pub(super) struct ClientState {
    pub(super) status: ConnectionState,
    pub(super) connection_id: Option<String>,
    pub(super) session: Option<ActiveSession>,
    pub(super) generation: u64,
    pub(super) queue: MessageQueue,
    pub(super) registry: SubscriptionRegistry,
    pub(super) governor: RateGovernor,
    pub(super) reconnect: ReconnectPolicy,
    pub(super) reconnect_timer: Option<CancellationToken>,
    pub(super) manual_close: bool,
    pub(super) online: bool,
    pub(super) foreground: bool,
    pub(super) latency: Option<Duration>,
    pub(super) last_heartbeat: Option<DateTime<Utc>>,
    pub(super) quality: ConnectionQuality,
    pub(super) pong_overdue: bool,
}

pub(super) struct ClientInner {
    pub(super) config: ClientConfig,
    pub(super) transport: Arc<dyn FeedTransport>,
    pub(super) store: Option<Arc<dyn SubscriptionStore>>,
    pub(super) stats: StatsCollector,
    pub(super) events: broadcast::Sender<StreamEvent>,
    pub(super) heartbeat_interval: watch::Sender<Duration>,
    pub(super) next_message_id: AtomicU64,
    pub(super) state: Mutex<ClientState>,
}

enum ConnectTrigger {
    Manual,
    Reconnect(CancellationToken),
    NetworkRestored,
}

// =============================================================================
// Stream Client
// =============================================================================

/// Resilient client for one market data feed.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use market_stream_client::{ClientConfig, Priority, StreamClient, WebSocketTransport};
///
/// async fn example() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ClientConfig::new("wss://stream.example.com/v1/realtime");
///     let client = StreamClient::new(config, Arc::new(WebSocketTransport::new()));
///
///     // Subscriptions can be registered before connecting
///     client.subscribe("EURUSD", "price");
///
///     let mut events = client.events();
///     client.connect().await?;
///
///     client.send(serde_json::json!({"action": "snapshot"}), Priority::Low);
///
///     while let Ok(event) = events.recv().await {
///         println!("{event:?}");
///     }
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct StreamClient {
    pub(super) inner: Arc<ClientInner>,
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("url", &self.inner.config.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl StreamClient {
    /// Create a disconnected client.
    #[must_use]
    pub fn new(config: ClientConfig, transport: Arc<dyn FeedTransport>) -> Self {
        Self::build(config, transport, None)
    }

    /// Create a disconnected client that persists subscriptions to `store`.
    #[must_use]
    pub fn with_store(
        config: ClientConfig,
        transport: Arc<dyn FeedTransport>,
        store: Arc<dyn SubscriptionStore>,
    ) -> Self {
        Self::build(config, transport, Some(store))
    }

    fn build(
        config: ClientConfig,
        transport: Arc<dyn FeedTransport>,
        store: Option<Arc<dyn SubscriptionStore>>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (heartbeat_interval, _) = watch::channel(config.heartbeat.ping_interval);
        if config.rate_limit_per_sec == 0 {
            tracing::warn!("rate_limit_per_sec is 0: only one frame can ever be sent, the rest stay queued");
        }

        let state = ClientState {
            status: ConnectionState::Disconnected,
            connection_id: None,
            session: None,
            generation: 0,
            queue: MessageQueue::new(config.queue_capacity),
            registry: SubscriptionRegistry::new(),
            governor: RateGovernor::per_second(config.rate_limit_per_sec),
            reconnect: ReconnectPolicy::new(config.reconnect.clone()),
            reconnect_timer: None,
            manual_close: true,
            online: true,
            foreground: true,
            latency: None,
            last_heartbeat: None,
            quality: ConnectionQuality::Poor,
            pong_overdue: false,
        };

        Self {
            inner: Arc::new(ClientInner {
                config,
                transport,
                store,
                stats: StatsCollector::new(),
                events,
                heartbeat_interval,
                next_message_id: AtomicU64::new(1),
                state: Mutex::new(state),
            }),
        }
    }

    // =========================================================================
    // Connection
    // =========================================================================

    /// Open the connection.
    ///
    /// Returns immediately when already connected. On success the registry
    /// is replayed and the outbound queue flushed.
    ///
    /// # Errors
    ///
    /// Configuration errors are returned without scheduling a reconnect.
    /// Timeouts and handshake failures are returned after a reconnect has
    /// been scheduled (unless auto-reconnect is off). Returns
    /// [`ConnectError::InProgress`] while another attempt is running.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        self.establish(ConnectTrigger::Manual).await
    }

    async fn establish(&self, trigger: ConnectTrigger) -> Result<(), ConnectError> {
        let (url, connection_id) = {
            let mut state = self.inner.state.lock();

            match trigger {
                ConnectTrigger::Manual => {
                    state.manual_close = false;
                }
                ConnectTrigger::Reconnect(token) => {
                    if token.is_cancelled() || state.manual_close {
                        return Ok(());
                    }
                }
                ConnectTrigger::NetworkRestored => {
                    if state.manual_close {
                        return Ok(());
                    }
                }
            }

            match state.status {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => return Err(ConnectError::InProgress),
                _ => {}
            }

            if let Some(timer) = state.reconnect_timer.take() {
                timer.cancel();
            }

            let connection_id = new_connection_id();
            let url = match build_connection_url(&self.inner.config, &connection_id) {
                Ok(url) => url,
                Err(e) => {
                    tracing::error!(error = %e, "Invalid feed configuration");
                    self.set_status(&mut state, ConnectionState::Error);
                    self.inner.stats.record_error();
                    metrics::record_error(ErrorKind::Connect);
                    self.emit(StreamEvent::ConnectionError {
                        message: e.to_string(),
                        recoverable: false,
                    });
                    return Err(e.into());
                }
            };

            self.set_status(&mut state, ConnectionState::Connecting);
            state.connection_id = Some(connection_id.clone());
            (url, connection_id)
        };

        tracing::info!(connection_id = %connection_id, host = url.host_str().unwrap_or_default(), "Connecting to feed");

        let timeout = self.inner.config.connect_timeout;
        match tokio::time::timeout(timeout, self.inner.transport.open(&url)).await {
            Ok(Ok(session)) => self.on_open(session, &connection_id),
            Ok(Err(e)) => self.on_connect_failure(&connection_id, ConnectError::Transport(e)),
            Err(_) => self.on_connect_failure(&connection_id, ConnectError::Timeout(timeout)),
        }
    }

    fn on_open(&self, session: TransportSession, connection_id: &str) -> Result<(), ConnectError> {
        let TransportSession { sink, inbound } = session;
        let mut state = self.inner.state.lock();

        if state.status != ConnectionState::Connecting || state.connection_id.as_deref() != Some(connection_id) {
            tracing::debug!(connection_id, "Discarding superseded session");
            sink.close();
            return Err(ConnectError::Aborted);
        }

        state.generation += 1;
        let generation = state.generation;

        let cancel = CancellationToken::new();
        let heartbeat = Arc::new(HeartbeatState::new());
        state.session = Some(ActiveSession {
            sink: Arc::from(sink),
            cancel: cancel.clone(),
            heartbeat: heartbeat.clone(),
        });

        self.set_status(&mut state, ConnectionState::Connected);
        state.reconnect.reset();
        state.latency = None;
        state.pong_overdue = false;
        self.set_quality(&mut state, ConnectionQuality::Excellent);
        self.inner.stats.mark_connected();

        tracing::info!(connection_id, generation, "Connected to feed");
        self.emit(StreamEvent::ConnectionOpened {
            connection_id: connection_id.to_string(),
        });

        // Replay precedes anything already queued
        let mut outgoing: Vec<QueuedMessage> = state
            .registry
            .replay_all()
            .iter()
            .map(|command| self.control_message(command))
            .collect();
        let replayed = outgoing.len();
        outgoing.extend(state.queue.drain_in_priority_order());
        let sent = self.transmit_batch(&mut state, outgoing);
        tracing::debug!(replayed, sent, queued = state.queue.len(), "Session primed");
        drop(state);

        let (heartbeat_tx, heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(16);
        let manager = HeartbeatManager::new(
            self.inner.heartbeat_interval.subscribe(),
            self.inner.config.heartbeat.pong_timeout,
            heartbeat,
            heartbeat_tx,
            cancel.child_token(),
        );
        tokio::spawn(manager.run());
        tokio::spawn(session::run(
            self.clone(),
            generation,
            inbound,
            heartbeat_rx,
            cancel,
            self.inner.config.queue_drain_interval,
        ));

        self.emit(StreamEvent::StatsUpdated(self.inner.stats.snapshot()));
        Ok(())
    }

    fn on_connect_failure(&self, connection_id: &str, error: ConnectError) -> Result<(), ConnectError> {
        let mut state = self.inner.state.lock();

        if state.status != ConnectionState::Connecting || state.connection_id.as_deref() != Some(connection_id) {
            return Err(ConnectError::Aborted);
        }

        self.set_status(&mut state, ConnectionState::Error);
        self.inner.stats.record_error();
        metrics::record_error(ErrorKind::Connect);
        tracing::warn!(connection_id, error = %error, "Connection attempt failed");

        let will_retry = self.may_reconnect(&state) && state.reconnect.should_retry();
        self.emit(StreamEvent::ConnectionError {
            message: error.to_string(),
            recoverable: will_retry,
        });

        if self.may_reconnect(&state) {
            self.schedule_reconnect(&mut state);
        }
        Err(error)
    }

    fn may_reconnect(&self, state: &ClientState) -> bool {
        !state.manual_close && state.online && self.inner.config.auto_reconnect
    }

    /// Arm the backoff timer. Returns `false` once attempts are exhausted.
    fn schedule_reconnect(&self, state: &mut ClientState) -> bool {
        if let Some(timer) = state.reconnect_timer.take() {
            timer.cancel();
        }

        let Some(delay) = state.reconnect.next_delay() else {
            let attempts = state.reconnect.attempt_count();
            tracing::error!(attempts, "Reconnect attempts exhausted, giving up");
            self.set_status(state, ConnectionState::Disconnected);
            self.emit(StreamEvent::ReconnectExhausted { attempts });
            return false;
        };

        let attempt = state.reconnect.attempt_count();
        tracing::info!(attempt, delay_ms = delay.as_millis(), "Scheduling reconnect");
        self.emit(StreamEvent::Reconnecting { attempt, delay });

        let token = CancellationToken::new();
        state.reconnect_timer = Some(token.clone());

        let client = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {
                    tracing::debug!(attempt, "Reconnect timer cancelled");
                }
                () = tokio::time::sleep(delay) => {
                    client.inner.stats.record_reconnect();
                    metrics::record_reconnect();
                    if let Err(e) = client.establish(ConnectTrigger::Reconnect(token)).await {
                        tracing::debug!(attempt, error = %e, "Reconnect attempt failed");
                    }
                }
            }
        });
        true
    }

    /// Close the connection for good.
    ///
    /// Cancels any pending reconnect, stops the heartbeat, closes the
    /// socket and clears the outbound queue. Subscriptions are kept and
    /// replayed on the next [`Self::connect`].
    pub fn disconnect(&self) {
        let mut state = self.inner.state.lock();
        state.manual_close = true;

        if let Some(timer) = state.reconnect_timer.take() {
            timer.cancel();
        }
        self.close_session(&mut state);

        let cleared = state.queue.clear();
        metrics::set_queue_depth(0);
        state.registry.mark_all_unacknowledged();
        state.reconnect.reset();
        state.connection_id = None;
        state.latency = None;
        state.pong_overdue = false;

        let previous = state.status;
        self.set_status(&mut state, ConnectionState::Disconnected);
        self.set_quality(&mut state, ConnectionQuality::Poor);
        drop(state);

        tracing::info!(previous = %previous, cleared, "Disconnected by client");
        if previous != ConnectionState::Disconnected {
            self.emit(StreamEvent::ConnectionClosed {
                reason: "client disconnect".to_string(),
                code: Some(NORMAL_CLOSE),
            });
        }
    }

    /// [`Self::disconnect`] and forget every subscription.
    pub fn teardown(&self) {
        self.disconnect();

        let mut state = self.inner.state.lock();
        for subscription in state.registry.snapshot() {
            self.inner.stats.forget_subscription(subscription.id);
        }
        state.registry.clear();
        drop(state);

        self.persist(&[]);
        tracing::info!("Client torn down");
    }

    pub(super) fn close_session(&self, state: &mut ClientState) -> bool {
        let Some(session) = state.session.take() else {
            return false;
        };
        session.cancel.cancel();
        session.sink.close();
        self.inner.stats.mark_disconnected();
        true
    }

    /// Handle the end of session `generation`.
    pub(super) fn on_connection_lost(&self, generation: u64, reason: String, code: Option<u16>) {
        let mut state = self.inner.state.lock();
        if state.generation != generation || state.session.is_none() {
            return;
        }

        self.close_session(&mut state);
        state.registry.mark_all_unacknowledged();
        self.set_quality(&mut state, ConnectionQuality::Poor);
        tracing::warn!(generation, reason = %reason, code, "Connection lost");
        self.emit(StreamEvent::ConnectionClosed { reason, code });

        if self.may_reconnect(&state) {
            self.set_status(&mut state, ConnectionState::Reconnecting);
            self.schedule_reconnect(&mut state);
        } else {
            self.set_status(&mut state, ConnectionState::Disconnected);
        }
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    /// Send a JSON message.
    ///
    /// Written immediately when connected, nothing is queued ahead of it
    /// and the rate governor grants a token; otherwise queued. Never blocks
    /// and never fails; drops are reported through events.
    pub fn send(&self, payload: Value, priority: Priority) -> SendOutcome {
        let message = self.new_message(payload, priority);
        let mut state = self.inner.state.lock();
        self.submit(&mut state, message)
    }

    pub(super) fn submit(&self, state: &mut ClientState, message: QueuedMessage) -> SendOutcome {
        if Self::is_live(state) && state.queue.is_empty() && state.governor.try_consume(1.0) {
            return match self.write_frame(state, &message) {
                Ok(()) => SendOutcome::Transmitted,
                Err(e) => self.handle_send_failure(state, message, &e),
            };
        }

        let outcome = self.enqueue(state, message);
        if Self::is_live(state) {
            self.flush_queue(state);
        }
        outcome
    }

    /// Retry queued messages on a live session.
    pub(super) fn flush_queue(&self, state: &mut ClientState) -> usize {
        if !Self::is_live(state) || state.queue.is_empty() {
            return 0;
        }
        let pending = state.queue.drain_in_priority_order();
        self.transmit_batch(state, pending)
    }

    /// Write `messages` in order until the governor refuses or a write
    /// fails; the remainder goes back to the queue in the same order.
    fn transmit_batch(&self, state: &mut ClientState, messages: Vec<QueuedMessage>) -> usize {
        let mut sent = 0;
        let mut pending = messages.into_iter();

        while let Some(message) = pending.next() {
            if !state.governor.try_consume(1.0) {
                self.enqueue(state, message);
                for rest in pending.by_ref() {
                    self.enqueue(state, rest);
                }
                break;
            }

            if let Err(e) = self.write_frame(state, &message) {
                self.handle_send_failure(state, message, &e);
                for rest in pending.by_ref() {
                    self.enqueue(state, rest);
                }
                break;
            }
            sent += 1;
        }

        metrics::set_queue_depth(state.queue.len());
        sent
    }

    fn write_frame(&self, state: &ClientState, message: &QueuedMessage) -> Result<(), TransportError> {
        let session = state.session.as_ref().ok_or(TransportError::Closed)?;
        let text = message.payload.to_string();
        let bytes = text.len();

        session.sink.send(WireFrame::Text(text))?;
        if PingFrame::is_ping(&message.payload) {
            session.heartbeat.mark_ping_sent();
        }

        self.inner.stats.record_sent(bytes);
        metrics::record_sent(bytes);
        tracing::trace!(id = %message.id, priority = %message.priority, bytes, "Frame sent");
        Ok(())
    }

    fn handle_send_failure(
        &self,
        state: &mut ClientState,
        mut message: QueuedMessage,
        error: &TransportError,
    ) -> SendOutcome {
        self.inner.stats.record_error();
        metrics::record_error(ErrorKind::Send);

        if message.record_failure() {
            tracing::debug!(id = %message.id, retry = message.retry_count, error = %error, "Send failed, requeueing");
            self.enqueue(state, message)
        } else {
            tracing::warn!(id = %message.id, retries = message.retry_count, error = %error, "Dropping message after exhausting retries");
            self.report_drop(message.id, DropReason::RetriesExhausted);
            SendOutcome::Dropped
        }
    }

    fn enqueue(&self, state: &mut ClientState, message: QueuedMessage) -> SendOutcome {
        let outcome = match state.queue.enqueue(message) {
            EnqueueOutcome::Queued => SendOutcome::Queued,
            EnqueueOutcome::Evicted(evicted) => {
                tracing::warn!(id = %evicted.id, priority = %evicted.priority, "Queue full, evicted oldest lowest-priority message");
                self.report_drop(evicted.id, DropReason::Evicted);
                SendOutcome::Queued
            }
            EnqueueOutcome::Rejected(rejected) => {
                tracing::warn!(id = %rejected.id, priority = %rejected.priority, "Queue full, message rejected");
                self.report_drop(rejected.id, DropReason::QueueFull);
                SendOutcome::Dropped
            }
        };
        metrics::set_queue_depth(state.queue.len());
        outcome
    }

    fn report_drop(&self, id: MessageId, reason: DropReason) {
        self.inner.stats.record_dropped();
        metrics::record_dropped(reason);
        self.emit(StreamEvent::MessageDropped { id, reason });
    }

    fn new_message(&self, payload: Value, priority: Priority) -> QueuedMessage {
        let id = MessageId::new(self.inner.next_message_id.fetch_add(1, Ordering::Relaxed));
        QueuedMessage::new(id, payload, priority)
    }

    fn control_message(&self, command: &SubscriptionCommand) -> QueuedMessage {
        self.new_message(
            ControlFrame::from_command(command).to_payload(),
            SubscriptionCommand::PRIORITY,
        )
    }

    pub(super) fn submit_command(&self, state: &mut ClientState, command: &SubscriptionCommand) {
        if Self::is_live(state) {
            let message = self.control_message(command);
            self.submit(state, message);
        }
    }

    pub(super) fn new_ping(&self, payload: Value) -> QueuedMessage {
        self.new_message(payload, Priority::High)
    }

    pub(super) const fn is_live(state: &ClientState) -> bool {
        matches!(state.status, ConnectionState::Connected) && state.session.is_some()
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Register interest in `symbol` on `channel`.
    ///
    /// Safe while disconnected. Registering an existing pair returns its id.
    pub fn subscribe(&self, symbol: impl Into<String>, channel: impl Into<String>) -> SubscriptionId {
        let mut state = self.inner.state.lock();
        let registration = state.registry.subscribe(symbol, channel);
        if !registration.is_new {
            return registration.id;
        }

        if let Some(command) = state.registry.command(registration.id, ControlAction::Subscribe) {
            tracing::info!(id = %registration.id, symbol = %command.symbol, channel = %command.channel, "Subscribed");
            self.submit_command(&mut state, &command);
        }
        let snapshot = state.registry.snapshot();
        drop(state);

        self.persist(&snapshot);
        registration.id
    }

    /// Remove a subscription. Returns `false` for unknown ids.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.inner.state.lock();
        let Some(removed) = state.registry.unsubscribe(id) else {
            return false;
        };
        self.inner.stats.forget_subscription(id);

        if removed.active {
            let command = SubscriptionCommand::for_subscription(ControlAction::Unsubscribe, &removed);
            self.submit_command(&mut state, &command);
        }
        tracing::info!(id = %id, symbol = %removed.symbol, channel = %removed.channel, "Unsubscribed");
        let snapshot = state.registry.snapshot();
        drop(state);

        self.persist(&snapshot);
        true
    }

    /// Pause or resume a subscription. Returns `true` when the flag changed.
    pub fn set_subscription_active(&self, id: SubscriptionId, active: bool) -> bool {
        let mut state = self.inner.state.lock();
        let Some(command) = state.registry.set_active(id, active) else {
            return false;
        };
        self.submit_command(&mut state, &command);
        let snapshot = state.registry.snapshot();
        drop(state);

        self.persist(&snapshot);
        true
    }

    /// Reload subscriptions from the store, replacing the registry.
    ///
    /// When connected, the restored subscriptions are replayed at once.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn restore_subscriptions(&self) -> Result<usize, PersistenceError> {
        let Some(store) = &self.inner.store else {
            return Ok(0);
        };
        let records = store.load()?;

        let mut state = self.inner.state.lock();
        let restored = state.registry.restore(records);
        if Self::is_live(&state) {
            for command in state.registry.replay_all() {
                self.submit_command(&mut state, &command);
            }
        }
        drop(state);

        tracing::info!(restored, "Subscriptions restored");
        Ok(restored)
    }

    /// Copy of every subscription.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.inner.state.lock().registry.snapshot()
    }

    /// Copy of one subscription.
    #[must_use]
    pub fn subscription(&self, id: SubscriptionId) -> Option<Subscription> {
        self.inner.state.lock().registry.get(id).cloned()
    }

    fn persist(&self, subscriptions: &[Subscription]) {
        let Some(store) = &self.inner.store else {
            return;
        };
        if let Err(e) = store.save(subscriptions) {
            tracing::warn!(error = %e, "Failed to persist subscriptions");
        }
    }

    // =========================================================================
    // Host lifecycle
    // =========================================================================

    /// Host app moved to the background: double the heartbeat interval.
    pub fn enter_background(&self) {
        let mut state = self.inner.state.lock();
        if !state.foreground {
            return;
        }
        state.foreground = false;
        drop(state);

        let interval = self.inner.config.heartbeat.background_interval();
        self.inner.heartbeat_interval.send_replace(interval);
        tracing::info!(interval_ms = interval.as_millis(), "Entered background");
    }

    /// Host app returned to the foreground: restore the heartbeat interval.
    pub fn enter_foreground(&self) {
        let mut state = self.inner.state.lock();
        if state.foreground {
            return;
        }
        state.foreground = true;
        drop(state);

        let interval = self.inner.config.heartbeat.ping_interval;
        self.inner.heartbeat_interval.send_replace(interval);
        tracing::info!(interval_ms = interval.as_millis(), "Entered foreground");
    }

    /// Network went away: close the socket but keep reconnect intent.
    pub fn network_offline(&self) {
        let mut state = self.inner.state.lock();
        state.online = false;

        if let Some(timer) = state.reconnect_timer.take() {
            timer.cancel();
        }
        let had_session = self.close_session(&mut state);
        state.registry.mark_all_unacknowledged();

        let previous = state.status;
        self.set_status(&mut state, ConnectionState::Disconnected);
        self.set_quality(&mut state, ConnectionQuality::Poor);
        drop(state);

        tracing::info!(previous = %previous, "Network offline");
        if had_session {
            self.emit(StreamEvent::ConnectionClosed {
                reason: "network offline".to_string(),
                code: None,
            });
        }
    }

    /// Network is back: reconnect at once unless manually closed.
    pub fn network_online(&self) {
        let mut state = self.inner.state.lock();
        state.online = true;

        let idle = !matches!(
            state.status,
            ConnectionState::Connected | ConnectionState::Connecting
        );
        if state.manual_close || !idle {
            return;
        }
        drop(state);

        tracing::info!("Network online, reconnecting immediately");
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(e) = client.establish(ConnectTrigger::NetworkRestored).await {
                tracing::debug!(error = %e, "Reconnect after network restore failed");
            }
        });
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Subscribe to client events.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<StreamEvent> {
        self.inner.events.subscribe()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().status
    }

    /// Whether a session is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        Self::is_live(&self.inner.state.lock())
    }

    /// Outbound messages awaiting transmission.
    #[must_use]
    pub fn queued_messages(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Current heartbeat interval (doubled while backgrounded).
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        *self.inner.heartbeat_interval.borrow()
    }

    /// Traffic statistics.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Connection health.
    #[must_use]
    pub fn health(&self) -> HealthSnapshot {
        let stats = self.inner.stats.snapshot();
        let state = self.inner.state.lock();

        HealthSnapshot {
            status: state.status,
            connection_id: state.connection_id.clone(),
            protocol: self.inner.config.protocol_mode(),
            latency_ms: state
                .latency
                .map(|l| u64::try_from(l.as_millis()).unwrap_or(u64::MAX)),
            reconnect_count: stats.reconnects,
            reconnect_attempts: state.reconnect.attempt_count(),
            messages_sent: stats.messages_sent,
            messages_received: stats.messages_received,
            error_count: stats.errors,
            last_heartbeat: state.last_heartbeat,
            quality: state.quality,
            queued_messages: state.queue.len(),
            subscriptions: state.registry.len(),
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    pub(super) fn emit(&self, event: StreamEvent) {
        // No receivers is fine
        let _ = self.inner.events.send(event);
    }

    pub(super) fn set_status(&self, state: &mut ClientState, status: ConnectionState) {
        if state.status == status {
            return;
        }
        tracing::debug!(from = %state.status, to = %status, "Connection state changed");
        state.status = status;
        metrics::set_connection_state(status);
    }

    pub(super) fn set_quality(&self, state: &mut ClientState, quality: ConnectionQuality) {
        if state.quality == quality {
            return;
        }
        let previous = state.quality;
        state.quality = quality;
        tracing::info!(previous = %previous, current = %quality, "Connection quality changed");
        self.emit(StreamEvent::QualityChanged {
            previous,
            current: quality,
        });
    }

    /// Recompute quality from latency, error rate and heartbeat state.
    pub(super) fn reassess_quality(&self, state: &mut ClientState) {
        if !Self::is_live(state) {
            return;
        }
        let error_rate = self.inner.stats.snapshot().error_rate();
        let quality = self
            .inner
            .config
            .quality
            .assess(state.latency, error_rate, state.pong_overdue);
        self.set_quality(state, quality);
    }
}
