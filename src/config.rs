//! Environment-driven configuration for the relay binary.

use std::net::SocketAddr;

use thiserror::Error;

use crate::dify::DEFAULT_API_URL;

/// Default bind address for the relay.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";

/// Configuration errors raised at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("DIFY_API_KEY is not set")]
    MissingApiKey,
    #[error("invalid LISTEN_ADDR {value:?}: {source}")]
    InvalidListenAddr {
        value: String,
        source: std::net::AddrParseError,
    },
}

/// Runtime configuration for the relay.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the upstream API.
    pub dify_api_url: String,
    /// Bearer credential for the upstream API.
    pub dify_api_key: String,
    /// Address the relay binds to.
    pub listen_addr: SocketAddr,
}

impl Config {
    /// Read configuration from the environment.
    ///
    /// `DIFY_API_KEY` is required; `DIFY_API_URL` and `LISTEN_ADDR` fall
    /// back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(
            std::env::var("DIFY_API_URL").ok(),
            std::env::var("DIFY_API_KEY").ok(),
            std::env::var("LISTEN_ADDR").ok(),
        )
    }

    fn from_vars(
        api_url: Option<String>,
        api_key: Option<String>,
        listen_addr: Option<String>,
    ) -> Result<Self, ConfigError> {
        let dify_api_key = api_key
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let dify_api_url = api_url
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let raw_addr = listen_addr.unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let listen_addr = raw_addr
            .parse()
            .map_err(|source| ConfigError::InvalidListenAddr {
                value: raw_addr,
                source,
            })?;

        Ok(Self {
            dify_api_url,
            dify_api_key,
            listen_addr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_vars(None, Some("key-123".to_string()), None).unwrap();
        assert_eq!(config.dify_api_url, DEFAULT_API_URL);
        assert_eq!(config.dify_api_key, "key-123");
        assert_eq!(config.listen_addr, "0.0.0.0:3000".parse().unwrap());
    }

    #[test]
    fn test_explicit_values() {
        let config = Config::from_vars(
            Some("https://dify.internal/v1".to_string()),
            Some("key-456".to_string()),
            Some("127.0.0.1:8080".to_string()),
        )
        .unwrap();
        assert_eq!(config.dify_api_url, "https://dify.internal/v1");
        assert_eq!(config.listen_addr, "127.0.0.1:8080".parse().unwrap());
    }

    #[test]
    fn test_missing_api_key() {
        let err = Config::from_vars(None, None, None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingApiKey));

        let err = Config::from_vars(None, Some(String::new()), None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingApiKey));
    }

    #[test]
    fn test_invalid_listen_addr() {
        let err = Config::from_vars(
            None,
            Some("key".to_string()),
            Some("not-an-addr".to_string()),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidListenAddr { .. }));
    }
}
