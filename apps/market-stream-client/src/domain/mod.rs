//! Domain Layer - Core client state and business rules.
//!
//! Pure data structures for the stream client: no I/O, no tasks. The
//! connection manager in the infrastructure layer owns instances of these
//! and serializes access to them.

/// Connection events emitted to consumers.
pub mod events;

/// Connection state, quality assessment and health snapshots.
pub mod health;

/// Bounded priority queue for outbound messages.
pub mod queue;

/// Token bucket bounding the outbound message rate.
pub mod rate;

/// Traffic and latency statistics.
pub mod stats;

/// Market data types.
pub mod streaming;

/// Subscription registry.
pub mod subscription;
