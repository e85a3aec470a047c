use crate::error::ConfigError;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Directory holding `tables/<name>.table.ron` and the collision files
    pub asset_dir: PathBuf,
    /// Table loaded when the lobby starts a game without a `MapInfo`
    pub table: String,
    pub tick_interval: Duration,
    pub broadcast_interval: Duration,
    pub ping_interval: Duration,
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:16002".to_string(),
            asset_dir: PathBuf::from("server/assets"),
            table: "pool".to_string(),
            tick_interval: Duration::from_millis(16),
            broadcast_interval: Duration::from_millis(50),
            ping_interval: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(15),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::ListenAddr(self.listen_addr.clone()));
        }
        if self.table.is_empty() {
            return Err(ConfigError::EmptyTable);
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("tick_interval"));
        }
        if self.broadcast_interval < self.tick_interval {
            return Err(ConfigError::BroadcastFasterThanTick);
        }
        if self.ping_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("ping_interval"));
        }
        if self.handshake_timeout.is_zero() {
            return Err(ConfigError::ZeroInterval("handshake_timeout"));
        }
        Ok(())
    }
}
