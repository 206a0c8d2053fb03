//! Subscription Registry
//!
//! Domain types for tracking the (symbol, channel) pairs a consumer wants
//! streamed, independent of the current connection state.
//!
//! # Design
//!
//! The registry is the single source of truth for consumer intent:
//! - Subscriptions exist while disconnected and are replayed on every
//!   (re)connect so server-side state matches client intent
//! - The far end acknowledges each subscription; acknowledgement is reset
//!   whenever the session is lost
//! - Inbound market data updates per-subscription counters by symbol
//!
//! Records are kept in an id-ordered map so replay order is creation order.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::queue::Priority;

// =============================================================================
// Types
// =============================================================================

/// A symbol string (e.g. `EURUSD`, `AAPL`).
pub type Symbol = String;

/// Identifier assigned by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
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

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One (symbol, channel) pair a consumer wants streamed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Registry-assigned identifier.
    pub id: SubscriptionId,
    /// Instrument symbol.
    pub symbol: Symbol,
    /// Feed channel (`price`, `depth`, `trades`, ...).
    pub channel: String,
    /// Whether the subscription should be live on the wire.
    pub active: bool,
    /// Whether the far end acknowledged it during the current session.
    #[serde(default, skip_serializing)]
    pub acknowledged: bool,
    /// When the subscription was requested.
    pub created_at: DateTime<Utc>,
    /// Last acknowledgement or data update.
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
    /// Market data messages received for this subscription.
    #[serde(default)]
    pub message_count: u64,
}

/// Wire action for a subscription control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    /// Start streaming.
    Subscribe,
    /// Stop streaming.
    Unsubscribe,
}

impl ControlAction {
    /// Wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// A control message the connection manager must put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionCommand {
    /// Subscribe or unsubscribe.
    pub action: ControlAction,
    /// Subscription the command refers to.
    pub id: SubscriptionId,
    /// Instrument symbol.
    pub symbol: Symbol,
    /// Feed channel.
    pub channel: String,
}

impl SubscriptionCommand {
    /// Control traffic always outranks consumer data.
    pub const PRIORITY: Priority = Priority::High;

    /// Command for an existing subscription record.
    #[must_use]
    pub fn for_subscription(action: ControlAction, subscription: &Subscription) -> Self {
        Self {
            action,
            id: subscription.id,
            symbol: subscription.symbol.clone(),
            channel: subscription.channel.clone(),
        }
    }
}

/// Result of [`SubscriptionRegistry::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    /// Identifier of the (possibly pre-existing) subscription.
    pub id: SubscriptionId,
    /// `false` when the pair was already registered.
    pub is_new: bool,
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Logical set of requested subscriptions.
///
/// Not synchronized; the owning connection manager serializes access.
///
/// # Example
///
/// ```rust
/// use market_stream_client::domain::subscription::{ControlAction, SubscriptionRegistry};
///
/// let mut registry = SubscriptionRegistry::new();
/// let eurusd = registry.subscribe("EURUSD", "price");
/// assert!(eurusd.is_new);
///
/// // Registering the same pair again is a no-op
/// assert_eq!(registry.subscribe("EURUSD", "price").id, eurusd.id);
///
/// // Replay yields one subscribe command per active subscription
/// let replay = registry.replay_all();
/// assert_eq!(replay.len(), 1);
/// assert_eq!(replay[0].action, ControlAction::Subscribe);
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    next_id: u64,
    entries: BTreeMap<SubscriptionId, Subscription>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a subscription request. Safe while disconnected.
    pub fn subscribe(&mut self, symbol: impl Into<Symbol>, channel: impl Into<String>) -> Registration {
        let symbol = symbol.into();
        let channel = channel.into();

        if let Some(existing) = self
            .entries
            .values()
            .find(|s| s.symbol == symbol && s.channel == channel)
        {
            return Registration {
                id: existing.id,
                is_new: false,
            };
        }

        self.next_id += 1;
        let id = SubscriptionId::new(self.next_id);
        self.entries.insert(
            id,
            Subscription {
                id,
                symbol,
                channel,
                active: true,
                acknowledged: false,
                created_at: Utc::now(),
                last_update: None,
                message_count: 0,
            },
        );

        Registration { id, is_new: true }
    }

    /// Remove a subscription, returning the removed record.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> Option<Subscription> {
        self.entries.remove(&id)
    }

    /// Build the command that would (un)subscribe `id` on the wire.
    #[must_use]
    pub fn command(&self, id: SubscriptionId, action: ControlAction) -> Option<SubscriptionCommand> {
        self.entries
            .get(&id)
            .map(|s| SubscriptionCommand::for_subscription(action, s))
    }

    /// Pause or resume a subscription without forgetting it.
    ///
    /// Returns the command to send when the flag actually changed.
    pub fn set_active(&mut self, id: SubscriptionId, active: bool) -> Option<SubscriptionCommand> {
        let subscription = self.entries.get_mut(&id)?;
        if subscription.active == active {
            return None;
        }

        subscription.active = active;
        subscription.acknowledged = false;

        let action = if active {
            ControlAction::Subscribe
        } else {
            ControlAction::Unsubscribe
        };
        Some(SubscriptionCommand::for_subscription(action, subscription))
    }

    /// Mark a subscription acknowledged by the far end.
    ///
    /// Returns `false` for unknown identifiers.
    pub fn acknowledge(&mut self, id: SubscriptionId, at: DateTime<Utc>) -> bool {
        let Some(subscription) = self.entries.get_mut(&id) else {
            return false;
        };
        subscription.acknowledged = true;
        subscription.last_update = Some(at);
        true
    }

    /// Subscribe commands for every active subscription, in creation order.
    ///
    /// Acknowledgements are cleared; the far end must confirm again.
    pub fn replay_all(&mut self) -> Vec<SubscriptionCommand> {
        self.entries
            .values_mut()
            .filter(|s| s.active)
            .map(|s| {
                s.acknowledged = false;
                SubscriptionCommand::for_subscription(ControlAction::Subscribe, s)
            })
            .collect()
    }

    /// Update counters for inbound data on `symbol`.
    ///
    /// Returns the identifiers of the matching active subscriptions; an
    /// unknown symbol matches nothing and is not an error.
    pub fn record_inbound(&mut self, symbol: &str, at: DateTime<Utc>) -> Vec<SubscriptionId> {
        self.entries
            .values_mut()
            .filter(|s| s.active && s.symbol == symbol)
            .map(|s| {
                s.message_count += 1;
                s.last_update = Some(at);
                s.id
            })
            .collect()
    }

    /// Forget every acknowledgement (session lost).
    pub fn mark_all_unacknowledged(&mut self) {
        for subscription in self.entries.values_mut() {
            subscription.acknowledged = false;
        }
    }

    /// Replace the registry contents with previously persisted records.
    ///
    /// Identifiers are kept; new identifiers continue after the highest one.
    pub fn restore(&mut self, subscriptions: Vec<Subscription>) -> usize {
        self.entries.clear();
        for mut subscription in subscriptions {
            subscription.acknowledged = false;
            self.entries.insert(subscription.id, subscription);
        }
        self.next_id = self
            .entries
            .keys()
            .last()
            .map_or(self.next_id, |id| id.get().max(self.next_id));
        self.entries.len()
    }

    /// Remove every subscription.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Look up a subscription.
    #[must_use]
    pub fn get(&self, id: SubscriptionId) -> Option<&Subscription> {
        self.entries.get(&id)
    }

    /// Copy of all subscriptions in creation order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Subscription> {
        self.entries.values().cloned().collect()
    }

    /// Number of subscriptions (active or paused).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of active subscriptions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.entries.values().filter(|s| s.active).count()
    }
}

// =============================================================================
// Tests
// =============================================================================
