#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Market Stream Client - Resilient Real-Time Feed Connection
//!
//! Keeps one persistent, bidirectional connection to a market data feed
//! alive across flaky networks and host app lifecycle changes, and gives
//! consumers a reliable subscription model with delivery telemetry.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types and pure state machines
//!   - `queue`: Priority outbound queue with bounded capacity
//!   - `rate`: Token bucket rate governor
//!   - `subscription`: Subscription registry and replay
//!   - `stats`: Traffic and latency statistics
//!   - `health`: Connection state, quality tiers, health snapshot
//!   - `events`: Events emitted to consumers
//!   - `streaming`: Market data payloads
//!
//! - **Application**: Port definitions
//!   - `ports`: Feed transport and subscription store interfaces
//!
//! - **Infrastructure**: Adapters and the connection manager
//!   - `feed`: [`StreamClient`], codecs, heartbeat, reconnect, transports
//!   - `lifecycle`: Host foreground/background and network signals
//!   - `persistence`: Subscription stores
//!   - `config`: Configuration from code and environment
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!              subscribe / send                         frames
//! Consumer ────────────────────► StreamClient ◄──────────────────► Feed
//!    ▲                            │   │   │
//!    │      broadcast events      │   │   └── heartbeat task
//!    └────────────────────────────┘   └────── session reader task
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no I/O.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::events::{DropReason, StreamEvent};
pub use domain::health::{
    ConnectionQuality, ConnectionState, HealthSnapshot, ProtocolMode, QualityThresholds,
};
pub use domain::queue::{MessageId, Priority};
pub use domain::stats::StatsSnapshot;
pub use domain::streaming::{MarketData, MarketDataKind};
pub use domain::subscription::{Subscription, SubscriptionId, Symbol};

// Ports
pub use application::ports::{
    FeedTransport, FrameSink, PersistenceError, SubscriptionStore, TransportError,
    TransportSession, WireFrame,
};

// Client
pub use infrastructure::feed::{
    ConnectError, InMemoryTransport, SendOutcome, StreamClient, WebSocketTransport,
};

// Infrastructure config
pub use infrastructure::config::{
    ApiKey, ClientConfig, ConfigError, FeedProfile, ServerSettings, StreamSettings,
    WebSocketSettings,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Lifecycle and persistence
pub use infrastructure::lifecycle::{LifecycleAdapter, LifecycleSignal};
pub use infrastructure::persistence::{JsonFileStore, MemoryStore};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
