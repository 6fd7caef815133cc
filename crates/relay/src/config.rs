//! Relay configuration, read once from the environment at start-up.

use std::net::SocketAddr;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    pub addr: SocketAddr,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// `RELAY_HOST` (default `0.0.0.0`) and `RELAY_PORT` (default `8765`).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let host = get("RELAY_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = match get("RELAY_PORT") {
            Some(raw) => raw.parse().map_err(|e| ConfigError::Invalid {
                key: "RELAY_PORT",
                message: format!("'{raw}': {e}"),
            })?,
            None => 8765,
        };
        let addr = format!("{host}:{port}")
            .parse()
            .map_err(|e| ConfigError::Invalid {
                key: "RELAY_HOST",
                message: format!("'{host}': {e}"),
            })?;

        Ok(Self { addr })
    }
}
