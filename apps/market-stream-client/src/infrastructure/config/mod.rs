//! Configuration Module
//!
//! Environment-driven settings for the binary and the per-client
//! configuration built from them.

mod client;
mod settings;

pub use client::ClientConfig;
pub use settings::{
    ApiKey, ConfigError, DEFAULT_CHANNEL, DEFAULT_PROTOCOL_VERSION, FeedProfile, QueueSettings,
    ServerSettings, StreamSettings, SymbolRequest, WebSocketSettings, parse_symbols,
};
