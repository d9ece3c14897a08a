//! Bridge configuration.
//!
//! All fields have defaults, so an empty JSON object (or no file at all) is a
//! valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::types::ApiError;

/// Fixed per-call timeout for host-initiated requests
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Upper bound on inbound handlers running at once
pub const DEFAULT_MAX_INFLIGHT_REQUESTS: usize = 8;

/// Protocol version sent in the `initialize` handshake
pub const DEFAULT_PROTOCOL_VERSION: u16 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
    pub request_timeout_ms: u64,
    pub max_inflight_requests: usize,
    pub client_name: String,
    pub client_version: String,
    pub protocol_version: u16,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            max_inflight_requests: DEFAULT_MAX_INFLIGHT_REQUESTS,
            client_name: env!("CARGO_PKG_NAME").to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: DEFAULT_PROTOCOL_VERSION,
        }
    }
}

impl BridgeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Parse a configuration from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, ApiError> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| ApiError::invalid(format!("Invalid bridge config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file written as JSON.
    pub fn from_json_file(path: &Path) -> Result<Self, ApiError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ApiError::PathNotFound {
                    path: path.display().to_string(),
                }
            } else {
                ApiError::io("Failed to read bridge config", e)
            }
        })?;
        log::debug!("Loaded bridge config from {}", path.display());
        Self::from_json_str(&text)
    }

    fn validate(&self) -> Result<(), ApiError> {
        if self.request_timeout_ms == 0 {
            return Err(ApiError::invalid("requestTimeoutMs must be greater than zero"));
        }
        if self.max_inflight_requests == 0 {
            return Err(ApiError::invalid("maxInflightRequests must be greater than zero"));
        }
        Ok(())
    }
}

/// How to launch an agent process.
#[derive(Debug, Clone)]
pub struct AgentCommand {
    /// Path to the executable binary
    pub path: PathBuf,
    /// Command-line arguments
    pub args: Vec<String>,
    /// Environment variables to set
    pub env: Vec<(String, String)>,
}

impl AgentCommand {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use uuid::Uuid;

    #[test]
    fn test_empty_object_uses_defaults() {
        let config = BridgeConfig::from_json_str("{}").unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.request_timeout(), Duration::from_millis(30_000));
    }

    #[test]
    fn test_partial_override() {
        let config =
            BridgeConfig::from_json_str(r#"{"requestTimeoutMs": 500, "clientName": "host"}"#)
                .unwrap();
        assert_eq!(config.request_timeout_ms, 500);
        assert_eq!(config.client_name, "host");
        assert_eq!(config.max_inflight_requests, DEFAULT_MAX_INFLIGHT_REQUESTS);
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let result = BridgeConfig::from_json_str(r#"{"requestTimeoutMs": 0}"#);
        assert!(matches!(result, Err(ApiError::InvalidInput { .. })));
    }

    #[test]
    fn test_from_json_file() {
        let path = env::temp_dir().join(format!("bridge_config_{}.json", Uuid::new_v4()));
        std::fs::write(&path, r#"{"maxInflightRequests": 2}"#).expect("failed to write config");

        let config = BridgeConfig::from_json_file(&path).unwrap();
        assert_eq!(config.max_inflight_requests, 2);

        std::fs::remove_file(&path).expect("failed to remove config");
    }

    #[test]
    fn test_from_json_file_missing() {
        let result = BridgeConfig::from_json_file(Path::new("/nonexistent/bridge/config.json"));
        assert!(matches!(result, Err(ApiError::PathNotFound { .. })));
    }
}
