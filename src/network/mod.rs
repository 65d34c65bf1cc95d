//! Network module - Handles the TCP side of an admin port session
//!
//! Provides:
//! - Transport for reading and writing length-prefixed frames
//! - Session for the connection lifecycle (handshake, heartbeat, reconnect)
//! - Backoff policy for reconnect attempts

mod backoff;
mod session;
mod transport;

pub use backoff::*;
pub use session::*;
pub use transport::*;

use std::net::SocketAddr;
use std::time::Duration;

use crate::protocol::{CLIENT_VERSION, DEFAULT_ADMIN_PORT};

/// Configuration for an admin port session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Server hostname or IP
    pub host: String,
    /// Admin port (not the game port)
    pub port: u16,
    /// Admin password configured on the server
    pub password: String,
    /// Client name announced in the Join packet
    pub user_agent: String,
    /// Client version announced in the Join packet
    pub client_version: String,
    /// Reconnect with backoff after the connection drops
    pub auto_reconnect: bool,
    /// Run event handlers inline instead of as spawned tasks
    pub sync_events: bool,
    /// Maintain a state cache from the event stream
    pub state_enabled: bool,
    /// Ping interval; the liveness timeout is five times this
    pub heartbeat_interval: Duration,
    /// Deadline for connecting and for the first handshake response
    pub connect_timeout: Duration,
    /// Deadline for a blocking rcon submission
    pub rcon_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_ADMIN_PORT,
            password: String::new(),
            user_agent: "openttd-admin".to_string(),
            client_version: CLIENT_VERSION.to_string(),
            auto_reconnect: true,
            sync_events: false,
            state_enabled: true,
            heartbeat_interval: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            rcon_timeout: Duration::from_secs(30),
        }
    }
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn without_reconnect(mut self) -> Self {
        self.auto_reconnect = false;
        self
    }

    pub fn with_sync_events(mut self) -> Self {
        self.sync_events = true;
        self
    }

    pub fn without_state(mut self) -> Self {
        self.state_enabled = false;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Time without a Pong after which the connection is considered dead
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_interval * 5
    }
}

/// Resolve a hostname to a socket address
pub async fn resolve_host(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    use tokio::net::lookup_host;

    let addr_string = format!("{}:{}", host, port);
    let mut addrs = lookup_host(&addr_string).await?;

    addrs.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Could not resolve host: {}", host),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.port, 3977);
        assert!(config.auto_reconnect);
        assert!(config.state_enabled);
        assert!(!config.sync_events);
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(50));
    }

    #[test]
    fn test_session_config_builder() {
        let config = SessionConfig::new("game.example", 4000)
            .with_password("secret")
            .without_reconnect()
            .with_sync_events()
            .with_heartbeat_interval(Duration::from_millis(200));
        assert_eq!(config.host, "game.example");
        assert_eq!(config.port, 4000);
        assert_eq!(config.password, "secret");
        assert!(!config.auto_reconnect);
        assert!(config.sync_events);
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_resolve_localhost() {
        let addr = resolve_host("127.0.0.1", 3977).await.unwrap();
        assert_eq!(addr.port(), 3977);
    }
}
