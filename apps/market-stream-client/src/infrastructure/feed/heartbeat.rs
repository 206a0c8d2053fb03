//! Heartbeat Manager
//!
//! Drives periodic pings on an open session and watches for overdue pongs.
//! A missing pong is reported so health can degrade; it never tears the
//! session down on its own. The ping interval is read from a `watch`
//! channel so the lifecycle adapter can stretch it while the host app is
//! backgrounded and restore it immediately on return.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between pings while in the foreground.
    pub ping_interval: Duration,
    /// How long to wait for a pong before reporting it overdue.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(5),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }

    /// Interval used while the host app is backgrounded.
    #[must_use]
    pub fn background_interval(&self) -> Duration {
        self.ping_interval.saturating_mul(2)
    }
}

/// Events emitted by the heartbeat manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send a ping frame now.
    SendPing,
    /// The last ping went unanswered past the pong timeout.
    PongOverdue,
}

/// State shared between the heartbeat manager and the session reader.
#[derive(Debug, Default)]
pub struct HeartbeatState {
    ping_sent_at: RwLock<Option<Instant>>,
    waiting_for_pong: AtomicBool,
}

impl HeartbeatState {
    /// Create new heartbeat state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark that a ping is due and a pong is now expected.
    ///
    /// The round trip clock starts only once the ping is actually written,
    /// see [`mark_ping_sent`](Self::mark_ping_sent).
    pub fn expect_pong(&self) {
        *self.ping_sent_at.write() = None;
        self.waiting_for_pong.store(true, Ordering::SeqCst);
    }

    /// Mark that a ping frame was just written to the transport.
    pub fn mark_ping_sent(&self) {
        *self.ping_sent_at.write() = Some(Instant::now());
    }

    /// Record that a pong was received.
    ///
    /// Returns the round trip when a ping was outstanding.
    pub fn record_pong(&self) -> Option<Duration> {
        let sent = self.ping_sent_at.write().take();
        let was_waiting = self.waiting_for_pong.swap(false, Ordering::SeqCst);
        sent.filter(|_| was_waiting).map(|at| at.elapsed())
    }

    /// Whether a ping is still unanswered.
    #[must_use]
    pub fn is_waiting_for_pong(&self) -> bool {
        self.waiting_for_pong.load(Ordering::SeqCst)
    }
}

/// Heartbeat loop for one session.
///
/// # Example
///
/// ```rust,no_run
/// use market_stream_client::infrastructure::feed::heartbeat::{
///     HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState,
/// };
/// use std::sync::Arc;
/// use tokio::sync::{mpsc, watch};
/// use tokio_util::sync::CancellationToken;
///
/// async fn example() {
///     let config = HeartbeatConfig::default();
///     let (_interval_tx, interval_rx) = watch::channel(config.ping_interval);
///     let state = Arc::new(HeartbeatState::new());
///     let (event_tx, mut event_rx) = mpsc::channel(10);
///     let cancel = CancellationToken::new();
///
///     let manager = HeartbeatManager::new(
///         interval_rx,
///         config.pong_timeout,
///         state.clone(),
///         event_tx,
///         cancel.clone(),
///     );
///     tokio::spawn(manager.run());
///
///     while let Some(event) = event_rx.recv().await {
///         match event {
///             HeartbeatEvent::SendPing => { /* write a ping frame */ }
///             HeartbeatEvent::PongOverdue => { /* degrade quality */ }
///         }
///     }
/// }
/// ```
pub struct HeartbeatManager {
    interval: watch::Receiver<Duration>,
    pong_timeout: Duration,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    #[must_use]
    pub const fn new(
        interval: watch::Receiver<Duration>,
        pong_timeout: Duration,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            interval,
            pong_timeout,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled or the event receiver is dropped.
    ///
    /// The first ping goes out one full interval after start.
    pub async fn run(mut self) {
        let mut period = *self.interval.borrow_and_update();
        let mut ticker = Self::ticker(period);
        let mut pong_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat manager cancelled");
                    break;
                }
                changed = self.interval.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    period = *self.interval.borrow_and_update();
                    ticker = Self::ticker(period);
                    tracing::debug!(interval_ms = period.as_millis(), "Heartbeat interval changed");
                }
                _ = ticker.tick() => {
                    self.state.expect_pong();
                    pong_deadline = Some(Instant::now() + self.pong_timeout);
                    if self.event_tx.send(HeartbeatEvent::SendPing).await.is_err() {
                        tracing::debug!("Event channel closed, stopping heartbeat");
                        break;
                    }
                }
                () = sleep_until(pong_deadline) => {
                    pong_deadline = None;
                    if self.state.is_waiting_for_pong() {
                        tracing::warn!(
                            timeout_ms = self.pong_timeout.as_millis(),
                            "Pong overdue"
                        );
                        if self.event_tx.send(HeartbeatEvent::PongOverdue).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    fn ticker(period: Duration) -> tokio::time::Interval {
        let period = period.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Harness {
        interval_tx: watch::Sender<Duration>,
        state: Arc<HeartbeatState>,
        events: mpsc::Receiver<HeartbeatEvent>,
        cancel: CancellationToken,
        handle: tokio::task::JoinHandle<()>,
    }

    fn spawn(interval: Duration, pong_timeout: Duration) -> Harness {
        let (interval_tx, interval_rx) = watch::channel(interval);
        let state = Arc::new(HeartbeatState::new());
        let (event_tx, events) = mpsc::channel(10);
        let cancel = CancellationToken::new();
        let manager = HeartbeatManager::new(
            interval_rx,
            pong_timeout,
            state.clone(),
            event_tx,
            cancel.clone(),
        );
        Harness {
            interval_tx,
            state,
            events,
            cancel,
            handle: tokio::spawn(manager.run()),
        }
    }

    #[test]
    fn default_config_values() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.ping_interval, Duration::from_secs(30));
        assert_eq!(config.pong_timeout, Duration::from_secs(5));
        assert_eq!(config.background_interval(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn state_round_trip() {
        let state = HeartbeatState::new();
        assert!(!state.is_waiting_for_pong());
        assert!(state.record_pong().is_none());

        state.expect_pong();
        assert!(state.is_waiting_for_pong());
        tokio::time::advance(Duration::from_millis(500)).await;

        state.mark_ping_sent();
        tokio::time::advance(Duration::from_millis(40)).await;

        assert_eq!(state.record_pong(), Some(Duration::from_millis(40)));
        assert!(!state.is_waiting_for_pong());
    }

    #[test]
    fn pong_before_ping_is_written_has_no_round_trip() {
        let state = HeartbeatState::new();
        state.expect_pong();

        assert!(state.record_pong().is_none());
        assert!(!state.is_waiting_for_pong());
    }

    #[tokio::test(start_paused = true)]
    async fn first_ping_after_one_interval() {
        let mut harness = spawn(Duration::from_secs(30), Duration::from_secs(5));
        let start = Instant::now();

        let event = harness.events.recv().await.unwrap();

        assert_eq!(event, HeartbeatEvent::SendPing);
        assert_eq!(start.elapsed(), Duration::from_secs(30));
        assert!(harness.state.is_waiting_for_pong());
        harness.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn missing_pong_is_reported_after_timeout() {
        let mut harness = spawn(Duration::from_secs(30), Duration::from_secs(5));
        assert_eq!(harness.events.recv().await, Some(HeartbeatEvent::SendPing));
        let ping_at = Instant::now();

        assert_eq!(harness.events.recv().await, Some(HeartbeatEvent::PongOverdue));
        assert_eq!(ping_at.elapsed(), Duration::from_secs(5));

        // Keeps pinging after an overdue pong
        assert_eq!(harness.events.recv().await, Some(HeartbeatEvent::SendPing));
        harness.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn answered_ping_is_not_reported() {
        let mut harness = spawn(Duration::from_secs(30), Duration::from_secs(5));
        assert_eq!(harness.events.recv().await, Some(HeartbeatEvent::SendPing));
        let ping_at = Instant::now();
        harness.state.record_pong();

        assert_eq!(harness.events.recv().await, Some(HeartbeatEvent::SendPing));
        assert_eq!(ping_at.elapsed(), Duration::from_secs(30));
        harness.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn interval_change_takes_effect_immediately() {
        let mut harness = spawn(Duration::from_secs(30), Duration::from_secs(5));
        tokio::task::yield_now().await;

        let changed_at = Instant::now();
        harness.interval_tx.send_replace(Duration::from_secs(60));

        assert_eq!(harness.events.recv().await, Some(HeartbeatEvent::SendPing));
        assert_eq!(changed_at.elapsed(), Duration::from_secs(60));
        harness.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn manager_cancellation() {
        let harness = spawn(Duration::from_secs(10), Duration::from_secs(10));

        harness.cancel.cancel();

        let result = tokio::time::timeout(Duration::from_millis(100), harness.handle).await;
        assert!(result.is_ok(), "manager should shut down on cancellation");
    }
}
