//! Client Configuration
//!
//! Tunables for one [`crate::StreamClient`] instance.

use std::time::Duration;

use crate::domain::health::{ProtocolMode, QualityThresholds};
use crate::infrastructure::config::settings::{
    ApiKey, DEFAULT_PROTOCOL_VERSION, FeedProfile, StreamSettings,
};
use crate::infrastructure::feed::heartbeat::HeartbeatConfig;
use crate::infrastructure::feed::reconnect::ReconnectConfig;

/// Configuration for a stream client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Feed endpoint (`ws://` or `wss://`).
    pub url: String,
    /// Optional API key passed as the `api_key` URL parameter.
    pub api_key: Option<ApiKey>,
    /// Protocol version passed as the `protocol_version` URL parameter.
    pub protocol_version: String,
    /// Request binary framing.
    pub binary: bool,
    /// Reconnect automatically after unexpected loss.
    pub auto_reconnect: bool,
    /// Handshake timeout.
    pub connect_timeout: Duration,
    /// Heartbeat cadence.
    pub heartbeat: HeartbeatConfig,
    /// Backoff schedule.
    pub reconnect: ReconnectConfig,
    /// Maximum queued outbound messages.
    pub queue_capacity: usize,
    /// Outbound messages per second.
    pub rate_limit_per_sec: u32,
    /// How often queued messages are retried while connected.
    pub queue_drain_interval: Duration,
    /// Quality tier limits.
    pub quality: QualityThresholds,
    /// Event channel capacity per consumer.
    pub event_capacity: usize,
}

impl ClientConfig {
    /// Defaults for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
            binary: false,
            auto_reconnect: true,
            connect_timeout: Duration::from_secs(10),
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectConfig::default(),
            queue_capacity: 1000,
            rate_limit_per_sec: 100,
            queue_drain_interval: Duration::from_millis(100),
            quality: QualityThresholds::default(),
            event_capacity: 1024,
        }
    }

    /// Preset for a feed family at its default endpoint.
    #[must_use]
    pub fn for_profile(profile: FeedProfile) -> Self {
        let base = Self::new(profile.default_url());
        Self {
            binary: profile.binary(),
            rate_limit_per_sec: profile.rate_limit(),
            heartbeat: HeartbeatConfig {
                ping_interval: profile.heartbeat_interval(),
                ..base.heartbeat.clone()
            },
            ..base
        }
    }

    /// Build from environment settings.
    #[must_use]
    pub fn from_settings(settings: &StreamSettings) -> Self {
        let ws = &settings.websocket;
        Self {
            api_key: settings.api_key.clone(),
            protocol_version: settings.protocol_version.clone(),
            binary: settings.binary,
            auto_reconnect: ws.auto_reconnect,
            connect_timeout: ws.connect_timeout,
            heartbeat: HeartbeatConfig::new(ws.heartbeat_interval, ws.pong_timeout),
            reconnect: ReconnectConfig {
                initial_delay: ws.reconnect_delay_initial,
                max_delay: ws.reconnect_delay_max,
                max_attempts: ws.max_reconnect_attempts,
                ..ReconnectConfig::default()
            },
            queue_capacity: settings.queue.capacity,
            rate_limit_per_sec: settings.queue.rate_limit_per_sec,
            ..Self::new(settings.url.clone())
        }
    }

    /// Framing mode implied by [`Self::binary`].
    #[must_use]
    pub const fn protocol_mode(&self) -> ProtocolMode {
        if self.binary {
            ProtocolMode::Binary
        } else {
            ProtocolMode::Text
        }
    }
}
