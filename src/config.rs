//! Service Configuration
//!
//! Tunable policy for the connection service. Values layer the usual way:
//! built-in defaults, then an optional TOML file, then `PEERLINK_*`
//! environment variables.
//!
//! The retry shape of the client connect loop — 3 attempts per channel with
//! a 200 ms delay — is deliberate policy, not an incidental default: it races
//! discovery against the remote server's channel rotation. Change it only if
//! the requirements change.

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunable policy for a [`ConnectionService`](crate::ConnectionService).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service name advertised on listening channels.
    pub service_name: String,

    /// Client connect attempts per channel.
    pub connect_attempts: u32,

    /// Delay between client connect attempts in milliseconds.
    pub connect_retry_delay_ms: u64,

    /// Length of one stop-flag poll slice around a blocking accept, in
    /// milliseconds. Bounds how long a stop request can go unobserved.
    pub accept_poll_ms: u64,

    /// Read buffer size per peer socket, in bytes.
    pub read_buffer_bytes: usize,

    /// Depth of each peer's outbound frame queue.
    pub send_queue_depth: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: "peerlink".to_string(),
            connect_attempts: 3,
            connect_retry_delay_ms: 200,
            accept_poll_ms: 100,
            read_buffer_bytes: 1024,
            send_queue_depth: 32,
        }
    }
}

impl ServiceConfig {
    /// Defaults overridden by `PEERLINK_*` environment variables.
    ///
    /// Recognized variables: `PEERLINK_SERVICE_NAME`,
    /// `PEERLINK_CONNECT_ATTEMPTS`, `PEERLINK_CONNECT_RETRY_DELAY_MS`,
    /// `PEERLINK_ACCEPT_POLL_MS`, `PEERLINK_READ_BUFFER_BYTES`,
    /// `PEERLINK_SEND_QUEUE_DEPTH`. Unparseable values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(name) = env::var("PEERLINK_SERVICE_NAME") {
            config.service_name = name;
        }
        if let Some(value) = env_parse("PEERLINK_CONNECT_ATTEMPTS") {
            config.connect_attempts = value;
        }
        if let Some(value) = env_parse("PEERLINK_CONNECT_RETRY_DELAY_MS") {
            config.connect_retry_delay_ms = value;
        }
        if let Some(value) = env_parse("PEERLINK_ACCEPT_POLL_MS") {
            config.accept_poll_ms = value;
        }
        if let Some(value) = env_parse("PEERLINK_READ_BUFFER_BYTES") {
            config.read_buffer_bytes = value;
        }
        if let Some(value) = env_parse("PEERLINK_SEND_QUEUE_DEPTH") {
            config.send_queue_depth = value;
        }
        config
    }

    /// Delay between client connect attempts.
    #[must_use]
    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }

    /// Length of one stop-flag poll slice.
    #[must_use]
    pub fn accept_poll(&self) -> Duration {
        Duration::from_millis(self.accept_poll_ms)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

/// Errors from configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for [`ServiceConfig`].
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// Path that failed to parse.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
}

/// Default config file location: `$XDG_CONFIG_HOME/peerlink/peerlink.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("peerlink").join("peerlink.toml"))
}

/// Load configuration from the default path.
///
/// A missing file (or an unresolvable config directory) yields the defaults.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file exists but cannot be read or
/// parsed.
pub fn load_config() -> Result<ServiceConfig, ConfigError> {
    match default_config_path() {
        Some(path) if path.exists() => load_config_from_path(&path),
        _ => Ok(ServiceConfig::default()),
    }
}

/// Load configuration from a specific TOML file.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file cannot be read or parsed.
pub fn load_config_from_path(path: &Path) -> Result<ServiceConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn defaults_carry_the_documented_policy() {
        let config = ServiceConfig::default();
        assert_eq!(config.connect_attempts, 3);
        assert_eq!(config.connect_retry_delay_ms, 200);
        assert_eq!(config.read_buffer_bytes, 1024);
        assert_eq!(config.connect_retry_delay(), Duration::from_millis(200));
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config: ServiceConfig =
            toml::from_str("connect_attempts = 5\nservice_name = \"game\"\n").unwrap();
        assert_eq!(config.connect_attempts, 5);
        assert_eq!(config.service_name, "game");
        assert_eq!(config.connect_retry_delay_ms, 200);
    }

    #[test]
    fn load_from_file_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peerlink.toml");

        let expected = ServiceConfig {
            service_name: "roundtrip".to_string(),
            send_queue_depth: 64,
            ..ServiceConfig::default()
        };

        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(toml::to_string(&expected).unwrap().as_bytes())
            .unwrap();

        let loaded = load_config_from_path(&path).unwrap();
        assert_eq!(loaded, expected);
    }

    #[test]
    fn unreadable_file_reports_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = load_config_from_path(&missing).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn invalid_toml_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "connect_attempts = \"many\"").unwrap();

        let err = load_config_from_path(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn env_overrides_apply() {
        env::set_var("PEERLINK_CONNECT_ATTEMPTS", "9");
        env::set_var("PEERLINK_SERVICE_NAME", "from-env");
        let config = ServiceConfig::from_env();
        env::remove_var("PEERLINK_CONNECT_ATTEMPTS");
        env::remove_var("PEERLINK_SERVICE_NAME");

        assert_eq!(config.connect_attempts, 9);
        assert_eq!(config.service_name, "from-env");
        assert_eq!(config.accept_poll_ms, 100);
    }
}
