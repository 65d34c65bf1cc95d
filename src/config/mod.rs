//! Configuration module
//!
//! Handles loading and saving openttd-admin configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::network::SessionConfig;
use crate::protocol::{CLIENT_VERSION, DEFAULT_ADMIN_PORT};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server to connect to
    #[serde(default)]
    pub server: ServerConfig,

    /// Session behaviour
    #[serde(default)]
    pub session: SessionSettings,

    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,
}

/// Admin port endpoint and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// Admin port (not the game port)
    #[serde(default = "default_port")]
    pub port: u16,
    /// The server's `admin_password`
    #[serde(default)]
    pub password: String,
    /// Name announced to the server
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_ADMIN_PORT
}

fn default_user_agent() -> String {
    "openttd-admin".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            password: String::new(),
            user_agent: default_user_agent(),
        }
    }
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Reconnect with backoff after the connection drops
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    /// Run event handlers inline
    #[serde(default)]
    pub sync_events: bool,
    /// Track server state from the event stream
    #[serde(default = "default_true")]
    pub state_enabled: bool,
    /// Heartbeat interval in ms
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
    /// Connection timeout in ms
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Rcon response timeout in ms
    #[serde(default = "default_rcon_timeout")]
    pub rcon_timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_heartbeat_interval() -> u64 {
    10_000
}

fn default_connect_timeout() -> u64 {
    5_000
}

fn default_rcon_timeout() -> u64 {
    30_000
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            auto_reconnect: default_true(),
            sync_events: false,
            state_enabled: default_true(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            connect_timeout_ms: default_connect_timeout(),
            rcon_timeout_ms: default_rcon_timeout(),
        }
    }
}

/// General configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
    /// Pretty-print JSON output
    #[serde(default)]
    pub pretty: bool,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("openttd-admin/config.toml")),
            Some(PathBuf::from("./openttd-admin.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject values the session cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.server.host.is_empty() {
            return Err(ConfigError::Invalid("server.host must not be empty".into()));
        }
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must not be 0".into()));
        }
        if self.session.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "session.heartbeat_interval_ms must be greater than 0".into(),
            ));
        }
        let strings = [
            ("server.password", &self.server.password),
            ("server.user_agent", &self.server.user_agent),
        ];
        for (name, value) in strings {
            if value.contains('\0') {
                return Err(ConfigError::Invalid(format!("{} contains a NUL byte", name)));
            }
        }
        Ok(())
    }

    /// Build the runtime session configuration
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            host: self.server.host.clone(),
            port: self.server.port,
            password: self.server.password.clone(),
            user_agent: self.server.user_agent.clone(),
            client_version: CLIENT_VERSION.to_string(),
            auto_reconnect: self.session.auto_reconnect,
            sync_events: self.session.sync_events,
            state_enabled: self.session.state_enabled,
            heartbeat_interval: Duration::from_millis(self.session.heartbeat_interval_ms),
            connect_timeout: Duration::from_millis(self.session.connect_timeout_ms),
            rcon_timeout: Duration::from_millis(self.session.rcon_timeout_ms),
        }
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        server: ServerConfig {
            host: "openttd.example.org".to_string(),
            password: "changeme".to_string(),
            ..Default::default()
        },
        ..Default::default()
    };

    Ok(toml::to_string_pretty(&config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, DEFAULT_ADMIN_PORT);
        assert!(config.session.auto_reconnect);
    }

    #[test]
    fn test_save_and_load() {
        let mut config = Config::default();
        config.server.password = "hunter2".into();
        let file = NamedTempFile::new().unwrap();

        config.save(file.path()).unwrap();

        let loaded = Config::load(file.path()).unwrap();
        assert_eq!(loaded.server.port, config.server.port);
        assert_eq!(loaded.server.password, "hunter2");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nhost = \"10.0.0.2\"\n\n[session]\nauto_reconnect = false").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.host, "10.0.0.2");
        assert_eq!(config.server.port, DEFAULT_ADMIN_PORT);
        assert!(!config.session.auto_reconnect);
        assert_eq!(config.session.rcon_timeout_ms, 30_000);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[session]\nheartbeat_interval_ms = 0").unwrap();
        assert!(matches!(Config::load(file.path()), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_file() {
        let path = Path::new("/nonexistent/openttd-admin.toml");
        assert!(matches!(Config::load(path), Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_session_config_conversion() {
        let mut config = Config::default();
        config.session.heartbeat_interval_ms = 250;
        config.session.sync_events = true;

        let session = config.session_config();
        assert_eq!(session.heartbeat_interval, Duration::from_millis(250));
        assert!(session.sync_events);
        assert_eq!(session.port, DEFAULT_ADMIN_PORT);
    }

    #[test]
    fn test_sample_config() {
        let sample = generate_sample_config().unwrap();
        let parsed: Config = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.server.host, "openttd.example.org");
    }
}
