//! Connection URL
//!
//! Builds the handshake URL from the client configuration. Configuration
//! problems found here are fatal: they are returned from `connect()` and
//! never retried.

use url::Url;

use crate::infrastructure::config::ClientConfig;

/// Protocol versions this client can speak.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2.0"];

/// Errors building the connection URL.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    /// The configured URL does not parse.
    #[error("invalid feed URL: {0}")]
    InvalidUrl(String),

    /// The URL scheme is not `ws` or `wss`.
    #[error("unsupported URL scheme `{0}` (expected ws or wss)")]
    UnsupportedScheme(String),

    /// The protocol version is not supported.
    #[error("unsupported protocol version `{0}`")]
    UnsupportedProtocolVersion(String),
}

/// Build the handshake URL for `connection_id`.
///
/// Adds `api_key` (when configured), `connection_id`, `protocol_version`,
/// and `binary=true` when binary framing is requested. Existing query
/// parameters are kept.
///
/// # Errors
///
/// Returns an error if the URL is invalid, not a WebSocket URL, or the
/// protocol version is unsupported.
pub fn build_connection_url(config: &ClientConfig, connection_id: &str) -> Result<Url, EndpointError> {
    let mut url = Url::parse(&config.url).map_err(|e| EndpointError::InvalidUrl(e.to_string()))?;

    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(EndpointError::UnsupportedScheme(url.scheme().to_string()));
    }

    if !SUPPORTED_PROTOCOL_VERSIONS.contains(&config.protocol_version.as_str()) {
        return Err(EndpointError::UnsupportedProtocolVersion(
            config.protocol_version.clone(),
        ));
    }

    {
        let mut query = url.query_pairs_mut();
        if let Some(key) = &config.api_key {
            query.append_pair("api_key", key.expose());
        }
        query.append_pair("connection_id", connection_id);
        query.append_pair("protocol_version", &config.protocol_version);
        if config.binary {
            query.append_pair("binary", "true");
        }
    }

    Ok(url)
}

/// A fresh handshake identifier.
#[must_use]
pub fn new_connection_id() -> String {
    format!("conn_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;
    use crate::infrastructure::config::ApiKey;

    fn params(url: &Url) -> HashMap<String, String> {
        url.query_pairs().into_owned().collect()
    }

    #[test]
    fn text_mode_parameters() {
        let config = ClientConfig::new("wss://feed.example/v1/realtime");
        let url = build_connection_url(&config, "conn_1").unwrap();

        let params = params(&url);
        assert_eq!(params.get("connection_id").map(String::as_str), Some("conn_1"));
        assert_eq!(params.get("protocol_version").map(String::as_str), Some("2.0"));
        assert!(!params.contains_key("binary"));
        assert!(!params.contains_key("api_key"));
        assert_eq!(url.path(), "/v1/realtime");
    }

    #[test]
    fn binary_mode_and_api_key() {
        let config = ClientConfig {
            binary: true,
            api_key: Some(ApiKey::new("k&y")),
            ..ClientConfig::new("ws://localhost:9000/?region=eu")
        };
        let url = build_connection_url(&config, "conn_2").unwrap();

        let params = params(&url);
        assert_eq!(params.get("binary").map(String::as_str), Some("true"));
        assert_eq!(params.get("api_key").map(String::as_str), Some("k&y"));
        assert_eq!(params.get("region").map(String::as_str), Some("eu"));
    }

    #[test_case("not a url" ; "garbage")]
    #[test_case("" ; "empty")]
    fn invalid_url(raw: &str) {
        let err = build_connection_url(&ClientConfig::new(raw), "c").unwrap_err();
        assert!(matches!(err, EndpointError::InvalidUrl(_)));
    }

    #[test_case("https://feed.example" ; "https")]
    #[test_case("ftp://feed.example" ; "ftp")]
    fn non_websocket_scheme(raw: &str) {
        let err = build_connection_url(&ClientConfig::new(raw), "c").unwrap_err();
        assert!(matches!(err, EndpointError::UnsupportedScheme(_)));
    }

    #[test]
    fn unsupported_protocol_version() {
        let config = ClientConfig {
            protocol_version: "3.0".to_string(),
            ..ClientConfig::new("wss://feed.example")
        };
        assert_eq!(
            build_connection_url(&config, "c").unwrap_err(),
            EndpointError::UnsupportedProtocolVersion("3.0".to_string())
        );
    }

    #[test]
    fn connection_ids_are_unique() {
        let a = new_connection_id();
        let b = new_connection_id();
        assert!(a.starts_with("conn_"));
        assert_ne!(a, b);
    }
}
