//! Configuration file for the relink CLI.

use relink_core::SessionConfig;
use relink_core::config::{
    DEFAULT_AUTH_TIMEOUT, DEFAULT_ENDPOINT_PORT, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_JOIN_TIMEOUT,
    DEFAULT_LOAD_BALANCER_PORT, DEFAULT_RELAY_PORT,
};
use relink_proto::Region;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// relink configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Relay configuration
    #[serde(default)]
    pub relay: RelayConfig,
    /// Load balancer configuration
    #[serde(default)]
    pub load_balancer: LoadBalancerConfig,
    /// Hosted room configuration
    #[serde(default)]
    pub room: RoomConfig,
    /// Session timing
    #[serde(default)]
    pub session: TimingConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relay host
    #[serde(default = "default_host")]
    pub address: String,
    /// Relay transport port
    #[serde(default = "default_relay_port")]
    pub port: u16,
    /// Relay HTTP endpoint port
    #[serde(default = "default_endpoint_port")]
    pub endpoint_port: u16,
    /// Shared authentication key
    #[serde(default = "default_auth_key")]
    pub auth_key: String,
    /// Attempt NAT punch-through
    #[serde(default = "default_true")]
    pub use_nat_punch: bool,
}

/// Load balancer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancerConfig {
    /// Resolve relays through the load balancer
    #[serde(default)]
    pub enabled: bool,
    /// Load balancer host
    #[serde(default = "default_host")]
    pub address: String,
    /// Load balancer port
    #[serde(default = "default_load_balancer_port")]
    pub port: u16,
    /// Preferred region tag (0 = any)
    #[serde(default)]
    pub region: Region,
}

/// Hosted room configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Display name
    #[serde(default = "default_room_name")]
    pub name: String,
    /// Capacity
    #[serde(default = "default_max_players")]
    pub max_players: i32,
    /// List publicly
    #[serde(default = "default_true")]
    pub is_public: bool,
    /// Free-form metadata
    #[serde(default)]
    pub extra_data: String,
    /// Application identifier
    #[serde(default)]
    pub app_id: i32,
    /// Application version
    #[serde(default = "default_app_version")]
    pub app_version: String,
}

/// Session timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Heartbeat interval in seconds
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Authentication deadline in seconds (0 waits forever)
    #[serde(default = "default_auth_timeout_secs")]
    pub auth_timeout_secs: u64,
    /// Load-balanced join deadline in seconds
    #[serde(default = "default_join_timeout_secs")]
    pub join_timeout_secs: u64,
    /// Override local address detection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_address: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_relay_port() -> u16 {
    DEFAULT_RELAY_PORT
}

fn default_endpoint_port() -> u16 {
    DEFAULT_ENDPOINT_PORT
}

fn default_load_balancer_port() -> u16 {
    DEFAULT_LOAD_BALANCER_PORT
}

fn default_auth_key() -> String {
    SessionConfig::default().auth_key
}

fn default_true() -> bool {
    true
}

fn default_room_name() -> String {
    SessionConfig::default().server_name
}

fn default_max_players() -> i32 {
    10
}

fn default_app_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_heartbeat_secs() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL.as_secs()
}

fn default_auth_timeout_secs() -> u64 {
    DEFAULT_AUTH_TIMEOUT.as_secs()
}

fn default_join_timeout_secs() -> u64 {
    DEFAULT_JOIN_TIMEOUT.as_secs()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            address: default_host(),
            port: default_relay_port(),
            endpoint_port: default_endpoint_port(),
            auth_key: default_auth_key(),
            use_nat_punch: true,
        }
    }
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_host(),
            port: default_load_balancer_port(),
            region: Region::Any,
        }
    }
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            name: default_room_name(),
            max_players: default_max_players(),
            is_public: true,
            extra_data: String::new(),
            app_id: 0,
            app_version: default_app_version(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat_secs(),
            auth_timeout_secs: default_auth_timeout_secs(),
            join_timeout_secs: default_join_timeout_secs(),
            local_address: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("relink/config.toml")
    }

    /// Load `path` if it exists, otherwise fall back to defaults
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.relay.address.is_empty() {
            anyhow::bail!("Relay address must not be empty");
        }
        if self.relay.port == 0 || self.relay.endpoint_port == 0 {
            anyhow::bail!("Relay ports must be non-zero");
        }

        if self.load_balancer.enabled
            && (self.load_balancer.address.is_empty() || self.load_balancer.port == 0)
        {
            anyhow::bail!("Load balancer enabled but no address or port specified");
        }

        if self.room.max_players <= 0 {
            anyhow::bail!("Max players must be positive");
        }

        if self.session.heartbeat_secs == 0 {
            anyhow::bail!("Heartbeat interval must be at least 1 second");
        }

        if let Some(addr) = &self.session.local_address {
            addr.parse::<IpAddr>()
                .map_err(|_| anyhow::anyhow!("Invalid local address: {}", addr))?;
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Build the engine configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the local address override does not parse.
    pub fn session_config(&self) -> anyhow::Result<SessionConfig> {
        let local_address = self
            .session
            .local_address
            .as_deref()
            .map(str::parse::<IpAddr>)
            .transpose()?;

        let auth_timeout = match self.session.auth_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(SessionConfig {
            relay_address: self.relay.address.clone(),
            relay_port: self.relay.port,
            endpoint_port: self.relay.endpoint_port,
            use_load_balancer: self.load_balancer.enabled,
            load_balancer_address: self.load_balancer.address.clone(),
            load_balancer_port: self.load_balancer.port,
            use_nat_punch: self.relay.use_nat_punch,
            auth_key: self.relay.auth_key.clone(),
            app_id: self.room.app_id,
            app_version: self.room.app_version.clone(),
            max_players: self.room.max_players,
            server_name: self.room.name.clone(),
            is_public: self.room.is_public,
            extra_data: self.room.extra_data.clone(),
            connect_on_start: true,
            heartbeat_interval: Duration::from_secs(self.session.heartbeat_secs),
            auth_timeout,
            join_timeout: Duration::from_secs(self.session.join_timeout_secs),
            region: self.load_balancer.region,
            local_address,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.relay.port, 7777);
        assert_eq!(config.relay.endpoint_port, 8080);
        assert_eq!(config.session.heartbeat_secs, 3);
        assert!(!config.load_balancer.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.room.max_players = 0;
        assert!(config.validate().is_err());

        config.room.max_players = 4;
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "debug".to_string();
        config.session.local_address = Some("not-an-ip".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.relay.address, deserialized.relay.address);
        assert_eq!(config.room.max_players, deserialized.room.max_players);
        assert_eq!(config.load_balancer.region, deserialized.load_balancer.region);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [relay]
            address = "relay.example.net"

            [load_balancer]
            enabled = true
            region = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.relay.address, "relay.example.net");
        assert_eq!(config.relay.port, 7777);
        assert_eq!(config.load_balancer.region, Region::Europe);
    }

    #[test]
    fn test_session_config_mapping() {
        let mut config = Config::default();
        config.session.auth_timeout_secs = 0;
        config.session.local_address = Some("10.0.0.5".to_string());

        let session = config.session_config().unwrap();
        assert_eq!(session.auth_timeout, None);
        assert_eq!(session.local_address, Some("10.0.0.5".parse().unwrap()));
        assert_eq!(session.heartbeat_interval, Duration::from_secs(3));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        let mut config = Config::default();
        config.room.name = "Saved".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.room.name, "Saved");
    }
}
