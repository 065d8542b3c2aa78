//! Server configuration.
//!
//! Settings are layered, lowest precedence first:
//! 1. Built-in defaults ([`ServerConfig::default`])
//! 2. A TOML file (`--config`)
//! 3. Environment variables (`PARKD_BIND`, `PARKD_PORT`, `PARKD_FRAMING`)
//! 4. Command-line flags (applied by the binary)
//!
//! # Example file
//!
//! ```toml
//! bind = "0.0.0.0"
//! port = 8080
//! framing = "lines"
//! idle_timeout_secs = 600
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use parking_protocol::Framing;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8080;

/// Environment variable overriding the bind address.
pub const ENV_BIND: &str = "PARKD_BIND";

/// Environment variable overriding the port.
pub const ENV_PORT: &str = "PARKD_PORT";

/// Environment variable overriding the framing mode.
pub const ENV_FRAMING: &str = "PARKD_FRAMING";

/// Runtime settings for the parking server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to listen on
    pub bind: IpAddr,

    /// Port to listen on (0 picks a free port)
    pub port: u16,

    /// Message delimiting on client connections
    pub framing: Framing,

    /// Disconnect clients idle for this many seconds (absent or 0 disables)
    pub idle_timeout_secs: Option<u64>,

    /// Upper bound for a single response or broadcast write
    pub write_timeout_ms: u64,

    /// How long shutdown waits for connection handlers to finish
    pub shutdown_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            framing: Framing::Raw,
            idle_timeout_secs: None,
            write_timeout_ms: 10_000,
            shutdown_grace_ms: 2_000,
        }
    }
}

impl ServerConfig {
    /// Loads settings from a TOML file; missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Read` or `ConfigError::Parse`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Applies overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnv` if a variable is set but unparseable.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_BIND) {
            self.bind = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: ENV_BIND,
                value: value.clone(),
                reason: "not an IP address".to_string(),
            })?;
        }

        if let Some(value) = lookup(ENV_PORT) {
            self.port = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: ENV_PORT,
                value: value.clone(),
                reason: "not a port number".to_string(),
            })?;
        }

        if let Some(value) = lookup(ENV_FRAMING) {
            self.framing = value.parse().map_err(|e| ConfigError::InvalidEnv {
                var: ENV_FRAMING,
                value: value.clone(),
                reason: format!("{e}"),
            })?;
        }

        Ok(())
    }

    /// Address to bind.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Failed to parse config file {path}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid value {value:?} for {var}: {reason}")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.framing, Framing::Raw);
        assert_eq!(config.socket_addr().to_string(), "0.0.0.0:8080");
        assert_eq!(config.idle_timeout(), None);
        assert_eq!(config.write_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = 9000\nframing = \"lines\"").unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.framing, Framing::Lines);
        assert_eq!(config.bind, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.shutdown_grace_ms, 2_000);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "spots = 80").unwrap();

        let err = ServerConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ServerConfig::from_file(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("nope.toml"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ServerConfig::default();
        config
            .apply_env_from(env(&[
                (ENV_BIND, "127.0.0.1"),
                (ENV_PORT, "9100"),
                (ENV_FRAMING, "lines"),
            ]))
            .unwrap();

        assert_eq!(config.socket_addr().to_string(), "127.0.0.1:9100");
        assert_eq!(config.framing, Framing::Lines);
    }

    #[test]
    fn test_invalid_env_port() {
        let mut config = ServerConfig::default();
        let err = config
            .apply_env_from(env(&[(ENV_PORT, "eighty")]))
            .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidEnv { var: ENV_PORT, .. }));
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn test_zero_idle_timeout_disables() {
        let config = ServerConfig {
            idle_timeout_secs: Some(0),
            ..ServerConfig::default()
        };
        assert_eq!(config.idle_timeout(), None);

        let config = ServerConfig {
            idle_timeout_secs: Some(60),
            ..ServerConfig::default()
        };
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(60)));
    }
}
