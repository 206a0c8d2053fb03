//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the connection manager that
//! drives them.

/// Configuration from code and environment.
pub mod config;

/// Feed connection: client, codecs, heartbeat, reconnect, transports.
pub mod feed;

/// Health check HTTP endpoint.
pub mod health;

/// Host lifecycle signal handling.
pub mod lifecycle;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Subscription store adapters.
pub mod persistence;

/// OpenTelemetry tracing integration.
pub mod telemetry;
