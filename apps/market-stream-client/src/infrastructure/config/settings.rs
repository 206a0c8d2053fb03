//! Stream Client Settings
//!
//! Configuration types for the stream client binary, loaded from environment
//! variables. Feed profiles supply defaults that individual variables can
//! override.

use std::path::PathBuf;
use std::time::Duration;

/// Preset for a family of feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedProfile {
    /// Low-latency trading data: binary framing, high rate, fast heartbeat.
    Trading,
    /// News headlines: text framing, moderate rate.
    News,
    /// Economic calendar: text framing, low rate, slow heartbeat.
    Economic,
}

impl FeedProfile {
    /// Parse a profile name; `None` for anything unrecognized.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trading" => Some(Self::Trading),
            "news" => Some(Self::News),
            "economic" => Some(Self::Economic),
            _ => None,
        }
    }

    /// Profile name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trading => "trading",
            Self::News => "news",
            Self::Economic => "economic",
        }
    }

    /// Default feed endpoint.
    #[must_use]
    pub const fn default_url(&self) -> &'static str {
        match self {
            Self::Trading => "wss://stream.tradingdata.com/v1/realtime",
            Self::News => "wss://stream.newsdata.com/v1/realtime",
            Self::Economic => "wss://stream.economicdata.com/v1/realtime",
        }
    }

    /// Whether binary framing is requested.
    #[must_use]
    pub const fn binary(&self) -> bool {
        matches!(self, Self::Trading)
    }

    /// Outbound messages per second.
    #[must_use]
    pub const fn rate_limit(&self) -> u32 {
        match self {
            Self::Trading => 1000,
            Self::News => 50,
            Self::Economic => 20,
        }
    }

    /// Foreground heartbeat interval.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        match self {
            Self::Trading => Duration::from_secs(10),
            Self::News => Duration::from_secs(30),
            Self::Economic => Duration::from_secs(60),
        }
    }
}

/// Feed API key, redacted from debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The raw key.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

/// WebSocket connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketSettings {
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// How long to wait for a pong.
    pub pong_timeout: Duration,
    /// Handshake timeout.
    pub connect_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Whether unexpected loss triggers reconnection.
    pub auto_reconnect: bool,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            reconnect_delay_initial: Duration::from_secs(5),
            reconnect_delay_max: Duration::from_secs(30),
            max_reconnect_attempts: 10,
            auto_reconnect: true,
        }
    }
}

/// Outbound queue settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSettings {
    /// Maximum queued outbound messages.
    pub capacity: usize,
    /// Outbound messages per second.
    pub rate_limit_per_sec: u32,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            capacity: 1000,
            rate_limit_per_sec: 100,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Port serving `/health`, `/healthz`, `/readyz` and `/metrics`.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8082 }
    }
}

/// A (symbol, channel) pair requested at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRequest {
    /// Instrument symbol.
    pub symbol: String,
    /// Feed channel.
    pub channel: String,
}

/// Complete client configuration as loaded from the environment.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Selected feed profile, if any.
    pub profile: Option<FeedProfile>,
    /// Feed endpoint.
    pub url: String,
    /// Optional API key passed as a URL parameter.
    pub api_key: Option<ApiKey>,
    /// Request binary framing.
    pub binary: bool,
    /// Protocol version passed as a URL parameter.
    pub protocol_version: String,
    /// Connection settings.
    pub websocket: WebSocketSettings,
    /// Outbound queue settings.
    pub queue: QueueSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// Subscriptions requested at startup.
    pub subscriptions: Vec<SymbolRequest>,
    /// Where subscription state is persisted.
    pub store_path: PathBuf,
}

/// Default channel for `STREAM_SYMBOLS` entries without one.
pub const DEFAULT_CHANNEL: &str = "price";

/// Default protocol version.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2.0";

impl StreamSettings {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if no endpoint is configured or a value is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if no endpoint is configured or a value is invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let profile = match lookup("STREAM_PROFILE") {
            Some(raw) => Some(FeedProfile::from_str_case_insensitive(&raw).ok_or_else(|| {
                ConfigError::InvalidValue {
                    key: "STREAM_PROFILE".to_string(),
                    value: raw,
                }
            })?),
            None => None,
        };

        let url = match lookup("STREAM_URL") {
            Some(url) if url.trim().is_empty() => {
                return Err(ConfigError::EmptyValue("STREAM_URL".to_string()));
            }
            Some(url) => url,
            None => profile
                .map(|p| p.default_url().to_string())
                .ok_or_else(|| ConfigError::MissingEnvVar("STREAM_URL".to_string()))?,
        };

        let api_key = lookup("STREAM_API_KEY")
            .filter(|key| !key.is_empty())
            .map(ApiKey::new);

        let binary = parse_bool(&lookup, "STREAM_BINARY", profile.is_some_and(|p| p.binary()));

        let protocol_version = lookup("STREAM_PROTOCOL_VERSION")
            .unwrap_or_else(|| DEFAULT_PROTOCOL_VERSION.to_string());

        let defaults = WebSocketSettings::default();
        let websocket = WebSocketSettings {
            heartbeat_interval: parse_duration_secs(
                &lookup,
                "STREAM_HEARTBEAT_INTERVAL_SECS",
                profile.map_or(defaults.heartbeat_interval, |p| p.heartbeat_interval()),
            ),
            pong_timeout: parse_duration_secs(&lookup, "STREAM_PONG_TIMEOUT_SECS", defaults.pong_timeout),
            connect_timeout: parse_duration_secs(
                &lookup,
                "STREAM_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout,
            ),
            reconnect_delay_initial: parse_duration_millis(
                &lookup,
                "STREAM_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_duration_secs(
                &lookup,
                "STREAM_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect_delay_max,
            ),
            max_reconnect_attempts: parse_or(
                &lookup,
                "STREAM_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            auto_reconnect: parse_bool(&lookup, "STREAM_AUTO_RECONNECT", defaults.auto_reconnect),
        };

        let queue_defaults = QueueSettings::default();
        let queue = QueueSettings {
            capacity: parse_or(&lookup, "STREAM_QUEUE_CAPACITY", queue_defaults.capacity),
            rate_limit_per_sec: parse_or(
                &lookup,
                "STREAM_RATE_LIMIT",
                profile.map_or(queue_defaults.rate_limit_per_sec, |p| p.rate_limit()),
            ),
        };
        if queue.rate_limit_per_sec == 0 {
            return Err(ConfigError::InvalidValue {
                key: "STREAM_RATE_LIMIT".to_string(),
                value: "0 (outbound traffic would stall)".to_string(),
            });
        }

        let server = ServerSettings {
            health_port: parse_or(&lookup, "STREAM_HEALTH_PORT", ServerSettings::default().health_port),
        };

        let subscriptions = match lookup("STREAM_SYMBOLS") {
            Some(raw) => parse_symbols(&raw)?,
            None => Vec::new(),
        };

        let store_path = lookup("STREAM_STORE_PATH")
            .map_or_else(|| PathBuf::from("subscriptions.json"), PathBuf::from);

        Ok(Self {
            profile,
            url,
            api_key,
            binary,
            protocol_version,
            websocket,
            queue,
            server,
            subscriptions,
            store_path,
        })
    }
}

/// Parse `SYMBOL[:channel]` entries separated by commas.
///
/// # Errors
///
/// Returns an error for entries with an empty symbol or channel.
pub fn parse_symbols(raw: &str) -> Result<Vec<SymbolRequest>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (symbol, channel) = entry.split_once(':').unwrap_or((entry, DEFAULT_CHANNEL));
            let (symbol, channel) = (symbol.trim(), channel.trim());
            if symbol.is_empty() || channel.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "STREAM_SYMBOLS".to_string(),
                    value: entry.to_string(),
                });
            }
            Ok(SymbolRequest {
                symbol: symbol.to_uppercase(),
                channel: channel.to_lowercase(),
            })
        })
        .collect()
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be interpreted.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

fn parse_or<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    lookup(key).map_or(default, |v| {
        matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
    })
}

fn parse_duration_secs(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
