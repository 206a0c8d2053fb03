//! Telemetry/Stats Collector
//!
//! Aggregates traffic, error and latency counters for one client instance
//! and exposes them as an owned, immutable [`StatsSnapshot`].
//!
//! Every counter and the session timeline sit behind one `RwLock`, so a
//! snapshot is copied under a single read guard and never mixes values from
//! before and after a concurrent update. Readers share the lock with each
//! other; writers hold it only for a few integer updates.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::Instant;

use crate::domain::subscription::SubscriptionId;

/// Number of recent latency samples used for the rolling average.
pub const LATENCY_WINDOW: usize = 32;

// =============================================================================
// Snapshot
// =============================================================================

/// Point-in-time copy of all collected statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// Frames written to the transport.
    pub messages_sent: u64,
    /// Frames received from the transport.
    pub messages_received: u64,
    /// Payload bytes written.
    pub bytes_sent: u64,
    /// Payload bytes received.
    pub bytes_received: u64,
    /// Errors of any kind (connect, transport, decode, send).
    pub errors: u64,
    /// Reconnect attempts started.
    pub reconnects: u64,
    /// Outbound messages dropped (evicted, rejected or out of retries).
    pub messages_dropped: u64,
    /// Start of the current (or most recent) session.
    pub connected_at: Option<DateTime<Utc>>,
    /// End of the most recent session.
    pub disconnected_at: Option<DateTime<Utc>>,
    /// Connected time summed across sessions, including the live one.
    pub uptime_ms: u64,
    /// Most recent ping round trip.
    pub last_latency_ms: Option<u64>,
    /// Mean of the last [`LATENCY_WINDOW`] round trips.
    pub average_latency_ms: Option<f64>,
    /// Market data messages per subscription.
    pub subscription_messages: BTreeMap<SubscriptionId, u64>,
}

impl StatsSnapshot {
    /// Errors per received message; zero before any traffic.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn error_rate(&self) -> f64 {
        if self.messages_received == 0 {
            0.0
        } else {
            self.errors as f64 / self.messages_received as f64
        }
    }
}

// =============================================================================
// Collector
// =============================================================================

#[derive(Debug, Default)]
struct Counters {
    messages_sent: u64,
    messages_received: u64,
    bytes_sent: u64,
    bytes_received: u64,
    errors: u64,
    reconnects: u64,
    messages_dropped: u64,
    connected_at: Option<DateTime<Utc>>,
    disconnected_at: Option<DateTime<Utc>>,
    session_started: Option<Instant>,
    accumulated_uptime: Duration,
    latency_samples: VecDeque<u64>,
    subscription_messages: BTreeMap<SubscriptionId, u64>,
}

/// Thread-safe statistics collector.
#[derive(Debug, Default)]
pub struct StatsCollector {
    counters: RwLock<Counters>,
}

impl StatsCollector {
    /// Create a collector with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one outbound frame of `bytes` length.
    pub fn record_sent(&self, bytes: usize) {
        let mut counters = self.counters.write();
        counters.messages_sent += 1;
        counters.bytes_sent += bytes as u64;
    }

    /// Record one inbound frame of `bytes` length.
    pub fn record_received(&self, bytes: usize) {
        let mut counters = self.counters.write();
        counters.messages_received += 1;
        counters.bytes_received += bytes as u64;
    }

    /// Record an error.
    pub fn record_error(&self) {
        self.counters.write().errors += 1;
    }

    /// Record a reconnect attempt.
    pub fn record_reconnect(&self) {
        self.counters.write().reconnects += 1;
    }

    /// Record a dropped outbound message.
    pub fn record_dropped(&self) {
        self.counters.write().messages_dropped += 1;
    }

    /// Record a ping round trip.
    pub fn record_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        let mut counters = self.counters.write();
        if counters.latency_samples.len() == LATENCY_WINDOW {
            counters.latency_samples.pop_front();
        }
        counters.latency_samples.push_back(millis);
    }

    /// A session started.
    pub fn mark_connected(&self) {
        let mut counters = self.counters.write();
        counters.connected_at = Some(Utc::now());
        counters.session_started = Some(Instant::now());
    }

    /// The current session ended. No-op when no session is live.
    pub fn mark_disconnected(&self) {
        let mut counters = self.counters.write();
        if let Some(started) = counters.session_started.take() {
            counters.accumulated_uptime += started.elapsed();
            counters.disconnected_at = Some(Utc::now());
        }
    }

    /// Count market data against the given subscriptions.
    pub fn record_subscription_messages(&self, ids: &[SubscriptionId]) {
        if ids.is_empty() {
            return;
        }
        let mut counters = self.counters.write();
        for id in ids {
            *counters.subscription_messages.entry(*id).or_insert(0) += 1;
        }
    }

    /// Stop tracking a removed subscription.
    pub fn forget_subscription(&self, id: SubscriptionId) {
        self.counters.write().subscription_messages.remove(&id);
    }

    /// Owned copy of every counter, taken under one read guard.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn snapshot(&self) -> StatsSnapshot {
        let counters = self.counters.read();

        let live = counters
            .session_started
            .map_or(Duration::ZERO, |started| started.elapsed());
        let uptime = counters.accumulated_uptime + live;

        let average_latency_ms = if counters.latency_samples.is_empty() {
            None
        } else {
            let total: u64 = counters.latency_samples.iter().sum();
            Some(total as f64 / counters.latency_samples.len() as f64)
        };

        StatsSnapshot {
            messages_sent: counters.messages_sent,
            messages_received: counters.messages_received,
            bytes_sent: counters.bytes_sent,
            bytes_received: counters.bytes_received,
            errors: counters.errors,
            reconnects: counters.reconnects,
            messages_dropped: counters.messages_dropped,
            connected_at: counters.connected_at,
            disconnected_at: counters.disconnected_at,
            uptime_ms: u64::try_from(uptime.as_millis()).unwrap_or(u64::MAX),
            last_latency_ms: counters.latency_samples.back().copied(),
            average_latency_ms,
            subscription_messages: counters.subscription_messages.clone(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let snapshot = StatsCollector::new().snapshot();
        assert_eq!(snapshot, StatsSnapshot::default());
        assert_eq!(snapshot.error_rate(), 0.0);
    }

    #[test]
    fn records_traffic_and_bytes() {
        let stats = StatsCollector::new();
        stats.record_sent(10);
        stats.record_sent(5);
        stats.record_received(100);
        stats.record_error();
        stats.record_reconnect();
        stats.record_dropped();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.messages_sent, 2);
        assert_eq!(snapshot.bytes_sent, 15);
        assert_eq!(snapshot.messages_received, 1);
        assert_eq!(snapshot.bytes_received, 100);
        assert_eq!(snapshot.errors, 1);
        assert_eq!(snapshot.reconnects, 1);
        assert_eq!(snapshot.messages_dropped, 1);
        assert_eq!(snapshot.error_rate(), 1.0);
    }

    #[test]
    fn snapshot_is_an_owned_copy() {
        let stats = StatsCollector::new();
        let before = stats.snapshot();
        stats.record_sent(1);

        assert_eq!(before.messages_sent, 0);
        assert_eq!(stats.snapshot().messages_sent, 1);
    }

    #[test]
    fn snapshot_is_consistent_under_concurrent_writers() {
        const ROUNDS: u64 = 200_000;

        let stats = std::sync::Arc::new(StatsCollector::new());
        let writer = {
            let stats = std::sync::Arc::clone(&stats);
            std::thread::spawn(move || {
                for _ in 0..ROUNDS {
                    stats.record_received(10);
                    stats.record_sent(4);
                }
            })
        };

        let mut torn = 0_u64;
        while !writer.is_finished() {
            let snapshot = stats.snapshot();
            if snapshot.bytes_received != snapshot.messages_received * 10
                || snapshot.bytes_sent != snapshot.messages_sent * 4
            {
                torn += 1;
            }
        }
        writer.join().unwrap();

        assert_eq!(torn, 0);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.messages_received, ROUNDS);
        assert_eq!(snapshot.bytes_received, ROUNDS * 10);
        assert_eq!(snapshot.bytes_sent, ROUNDS * 4);
    }

    #[test]
    fn latency_window_is_bounded() {
        let stats = StatsCollector::new();
        for ms in 0..(LATENCY_WINDOW as u64 + 8) {
            stats.record_latency(Duration::from_millis(ms));
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.last_latency_ms, Some(LATENCY_WINDOW as u64 + 7));
        // Window holds 8..=39
        assert_eq!(snapshot.average_latency_ms, Some(23.5));
    }

    #[tokio::test(start_paused = true)]
    async fn uptime_accumulates_across_sessions() {
        let stats = StatsCollector::new();

        stats.mark_connected();
        tokio::time::advance(Duration::from_secs(2)).await;
        stats.mark_disconnected();

        tokio::time::advance(Duration::from_secs(10)).await;

        stats.mark_connected();
        tokio::time::advance(Duration::from_secs(3)).await;

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.uptime_ms, 5_000);
        assert!(snapshot.connected_at.is_some());
        assert!(snapshot.disconnected_at.is_some());
    }

    #[test]
    fn mark_disconnected_without_session_is_noop() {
        let stats = StatsCollector::new();
        stats.mark_disconnected();
        assert!(stats.snapshot().disconnected_at.is_none());
    }

    #[test]
    fn per_subscription_counts() {
        let stats = StatsCollector::new();
        let a = SubscriptionId::new(1);
        let b = SubscriptionId::new(2);

        stats.record_subscription_messages(&[a, b]);
        stats.record_subscription_messages(&[a]);
        assert_eq!(stats.snapshot().subscription_messages.get(&a), Some(&2));

        stats.forget_subscription(a);
        let snapshot = stats.snapshot();
        assert!(!snapshot.subscription_messages.contains_key(&a));
        assert_eq!(snapshot.subscription_messages.get(&b), Some(&1));
    }
}
