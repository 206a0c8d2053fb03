//! Outbound Message Queue
//!
//! Bounded, priority-ordered holding area for outbound messages that could
//! not be transmitted immediately (disconnected, rate limited, or a failed
//! transport write awaiting retry).
//!
//! # Ordering
//!
//! Each priority tier is a FIFO. Draining yields `high`, then `medium`, then
//! `low`, preserving enqueue order within a tier. When the queue is full the
//! oldest entry of the lowest occupied tier is evicted to make room, unless
//! the incoming message ranks below everything already queued, in which case
//! the incoming message itself is rejected.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of failed transport writes a message survives before it is dropped.
pub const MAX_SEND_RETRIES: u32 = 3;

// =============================================================================
// Types
// =============================================================================

/// Delivery priority of an outbound message.
///
/// Ordering follows urgency: `Low < Medium < High`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Bulk traffic that may be shed first.
    Low,
    /// Ordinary consumer traffic.
    #[default]
    Medium,
    /// Control traffic (subscription replay, heartbeats).
    High,
}

impl Priority {
    /// All tiers, most urgent first.
    pub const DESCENDING: [Self; 3] = [Self::High, Self::Medium, Self::Low];

    /// All tiers, least urgent first.
    pub const ASCENDING: [Self; 3] = [Self::Low, Self::Medium, Self::High];

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    const fn tier(self) -> usize {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(u64);

impl MessageId {
    /// Wrap a raw identifier.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg_{}", self.0)
    }
}

/// An outbound payload awaiting transmission.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    /// Message identifier.
    pub id: MessageId,
    /// JSON payload sent as a text frame.
    pub payload: serde_json::Value,
    /// When the message was first created.
    pub enqueued_at: DateTime<Utc>,
    /// Failed transport writes so far.
    pub retry_count: u32,
    /// Delivery priority.
    pub priority: Priority,
}

impl QueuedMessage {
    /// Create a fresh message with no retries.
    #[must_use]
    pub fn new(id: MessageId, payload: serde_json::Value, priority: Priority) -> Self {
        Self {
            id,
            payload,
            enqueued_at: Utc::now(),
            retry_count: 0,
            priority,
        }
    }

    /// Record a failed transport write.
    ///
    /// Returns `true` while the message is still within its retry budget.
    pub const fn record_failure(&mut self) -> bool {
        self.retry_count += 1;
        self.retry_count <= MAX_SEND_RETRIES
    }
}

/// Result of [`MessageQueue::enqueue`].
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    /// Message stored; nothing displaced.
    Queued,
    /// Message stored after evicting the returned entry.
    Evicted(QueuedMessage),
    /// Queue full of higher-priority traffic; the incoming message is returned.
    Rejected(QueuedMessage),
}

// =============================================================================
// Message Queue
// =============================================================================

/// Bounded priority queue of outbound messages.
///
/// # Example
///
/// ```rust
/// use market_stream_client::domain::queue::{MessageId, MessageQueue, Priority, QueuedMessage};
///
/// let mut queue = MessageQueue::new(10);
/// queue.enqueue(QueuedMessage::new(MessageId::new(1), "a".into(), Priority::Low));
/// queue.enqueue(QueuedMessage::new(MessageId::new(2), "b".into(), Priority::High));
///
/// let order: Vec<u64> = queue
///     .drain_in_priority_order()
///     .into_iter()
///     .map(|m| m.id.get())
///     .collect();
/// assert_eq!(order, vec![2, 1]);
/// ```
#[derive(Debug)]
pub struct MessageQueue {
    capacity: usize,
    tiers: [VecDeque<QueuedMessage>; 3],
}

impl MessageQueue {
    /// Create a queue holding at most `capacity` messages (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            tiers: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
        }
    }

    /// Store a message, evicting the lowest-priority oldest entry when full.
    pub fn enqueue(&mut self, message: QueuedMessage) -> EnqueueOutcome {
        if self.len() < self.capacity {
            self.tiers[message.priority.tier()].push_back(message);
            return EnqueueOutcome::Queued;
        }

        let Some(lowest) = self.lowest_occupied() else {
            self.tiers[message.priority.tier()].push_back(message);
            return EnqueueOutcome::Queued;
        };

        if message.priority < lowest {
            return EnqueueOutcome::Rejected(message);
        }

        let evicted = self.tiers[lowest.tier()].pop_front();
        self.tiers[message.priority.tier()].push_back(message);

        evicted.map_or(EnqueueOutcome::Queued, EnqueueOutcome::Evicted)
    }

    /// Remove and return every message, `high` first, FIFO within a tier.
    pub fn drain_in_priority_order(&mut self) -> Vec<QueuedMessage> {
        let mut drained = Vec::with_capacity(self.len());
        for tier in &mut self.tiers {
            drained.extend(tier.drain(..));
        }
        drained
    }

    /// Drop all queued messages, returning how many were discarded.
    pub fn clear(&mut self) -> usize {
        let count = self.len();
        for tier in &mut self.tiers {
            tier.clear();
        }
        count
    }

    /// Number of queued messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiers.iter().map(VecDeque::len).sum()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiers.iter().all(VecDeque::is_empty)
    }

    /// Number of queued messages in one tier.
    #[must_use]
    pub fn len_for(&self, priority: Priority) -> usize {
        self.tiers[priority.tier()].len()
    }

    /// Maximum number of messages held.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    fn lowest_occupied(&self) -> Option<Priority> {
        Priority::ASCENDING
            .into_iter()
            .find(|priority| !self.tiers[priority.tier()].is_empty())
    }
}

// =============================================================================
// Tests
// =============================================================================
