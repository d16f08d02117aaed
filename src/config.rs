//! Server and client configuration.
//!
//! Both configurations load from TOML with serde defaults for every field,
//! then take overrides from the environment. Command-line flags are applied
//! last by the binary.

use derive_getters::Getters;
use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Environment variable overriding the server bind host.
pub const HOST_ENV: &str = "STRICTLY_HOST";
/// Environment variable overriding the server port.
pub const PORT_ENV: &str = "STRICTLY_PORT";
/// Environment variable overriding the server URL clients connect to.
pub const SERVER_URL_ENV: &str = "STRICTLY_SERVER_URL";

/// Configuration of the session server.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    host: String,

    /// Port to bind to.
    #[serde(default = "default_port")]
    port: u16,

    /// Buffered pushes per session before slow clients start skipping.
    #[serde(default = "default_push_capacity")]
    push_capacity: usize,

    /// FEN every new session starts from; standard start if absent.
    #[serde(default)]
    starting_fen: Option<String>,
}

#[instrument]
fn default_host() -> String {
    "127.0.0.1".to_string()
}

#[instrument]
fn default_port() -> u16 {
    3000
}

fn default_push_capacity() -> usize {
    crate::session::DEFAULT_PUSH_CAPACITY
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            push_capacity: default_push_capacity(),
            starting_fen: None,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a TOML file.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Self = read_toml(path.as_ref())?;
        info!(host = %config.host, port = config.port, "Server config loaded");
        Ok(config)
    }

    /// Applies `STRICTLY_HOST` and `STRICTLY_PORT` from the process environment.
    pub fn with_env(self) -> Result<Self, ConfigError> {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    #[instrument(skip(self, lookup))]
    pub fn with_env_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(host) = lookup(HOST_ENV) {
            debug!(%host, "Host overridden from environment");
            self.host = host;
        }
        if let Some(port) = lookup(PORT_ENV) {
            self.port = port
                .parse()
                .map_err(|e| ConfigError::new(format!("Invalid {}={:?}: {}", PORT_ENV, port, e)))?;
            debug!(port = self.port, "Port overridden from environment");
        }
        Ok(self)
    }

    /// Replaces the host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Replaces the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Address to bind, as `host:port`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration of a command-line client.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the session server.
    #[serde(default = "default_server_url")]
    server_url: String,

    /// How long to wait for a move response before re-fetching.
    #[serde(default = "default_move_timeout_ms")]
    move_timeout_ms: u64,

    /// File holding this client's participant identity.
    #[serde(default = "default_identity_path")]
    identity_path: PathBuf,
}

#[instrument]
fn default_server_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_move_timeout_ms() -> u64 {
    5000
}

fn default_identity_path() -> PathBuf {
    PathBuf::from(".strictly_identity")
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            move_timeout_ms: default_move_timeout_ms(),
            identity_path: default_identity_path(),
        }
    }
}

impl ClientConfig {
    /// Loads configuration from a TOML file.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Self = read_toml(path.as_ref())?;
        info!(server_url = %config.server_url, "Client config loaded");
        Ok(config)
    }

    /// Applies `STRICTLY_SERVER_URL` from the process environment.
    pub fn with_env(self) -> Self {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    #[instrument(skip(self, lookup))]
    pub fn with_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(SERVER_URL_ENV) {
            debug!(%url, "Server URL overridden from environment");
            self.server_url = url;
        }
        self
    }

    /// Replaces the server URL.
    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    /// Move response timeout.
    pub fn move_timeout(&self) -> Duration {
        Duration::from_millis(self.move_timeout_ms)
    }
}

fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    debug!("Loading config from file");
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::new(format!("Failed to read config file: {}", e)))?;
    toml::from_str(&content).map_err(|e| ConfigError::new(format!("Failed to parse config: {}", e)))
}

/// Configuration error.
#[derive(Debug, Clone, Display, Error)]
#[display("Config error: {} at {}:{}", message, file, line)]
pub struct ConfigError {
    /// Error message.
    pub message: String,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl ConfigError {
    /// Creates a new configuration error.
    #[track_caller]
    pub fn new(message: String) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            message,
            line: loc.line(),
            file: loc.file(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults_from_empty_toml() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.bind_address(), "127.0.0.1:3000");
    }

    #[test]
    fn test_env_overrides() {
        let env = |key: &str| match key {
            HOST_ENV => Some("0.0.0.0".to_string()),
            PORT_ENV => Some("8080".to_string()),
            SERVER_URL_ENV => Some("http://chess.example:8080".to_string()),
            _ => None,
        };
        let server = ServerConfig::default().with_env_from(env).unwrap();
        assert_eq!(server.bind_address(), "0.0.0.0:8080");

        let client = ClientConfig::default().with_env_from(env);
        assert_eq!(client.server_url(), "http://chess.example:8080");
    }

    #[test]
    fn test_bad_port_reports_location() {
        let err = ServerConfig::default()
            .with_env_from(|_| Some("not-a-port".to_string()))
            .unwrap_err();
        assert!(err.message.contains(PORT_ENV));
        assert!(err.file.ends_with("config.rs"));
    }
}
