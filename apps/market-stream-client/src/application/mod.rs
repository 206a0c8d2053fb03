//! Application Layer - Port definitions.
//!
//! Contracts the connection manager depends on. Infrastructure adapters
//! implement them for real networks, files and tests.

/// Port interfaces for the feed transport and subscription persistence.
pub mod ports;
