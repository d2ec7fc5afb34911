//! Session configuration.

use relink_proto::Region;
use std::net::IpAddr;
use std::time::Duration;

/// Default relay transport port
pub const DEFAULT_RELAY_PORT: u16 = 7777;

/// Default relay HTTP endpoint port (room list)
pub const DEFAULT_ENDPOINT_PORT: u16 = 8080;

/// Default load balancer port
pub const DEFAULT_LOAD_BALANCER_PORT: u16 = 7070;

/// Default heartbeat interval
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(3);

/// Default time allowed between transport connect and relay authentication
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time allowed for multi-step joins and relay lookups
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Session configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Relay host name or address
    pub relay_address: String,
    /// Relay transport port
    pub relay_port: u16,
    /// Relay HTTP endpoint port used for the room list
    pub endpoint_port: u16,
    /// Resolve rooms and relays through a load balancer
    pub use_load_balancer: bool,
    /// Load balancer host name or address
    pub load_balancer_address: String,
    /// Load balancer port
    pub load_balancer_port: u16,
    /// Attempt NAT punch-through when a direct-connect module is present
    pub use_nat_punch: bool,
    /// Shared secret sent on authentication request
    pub auth_key: String,
    /// Application identifier advertised with hosted rooms
    pub app_id: i32,
    /// Application version advertised with hosted rooms
    pub app_version: String,
    /// Capacity of hosted rooms
    pub max_players: i32,
    /// Display name of hosted rooms
    pub server_name: String,
    /// List hosted rooms publicly
    pub is_public: bool,
    /// Free-form metadata for hosted rooms
    pub extra_data: String,
    /// Connect to the relay as soon as the session starts
    pub connect_on_start: bool,
    /// Keepalive cadence
    pub heartbeat_interval: Duration,
    /// Give up on authentication after this long; `None` waits forever
    pub auth_timeout: Option<Duration>,
    /// Deadline for load-balanced joins and relay lookups
    pub join_timeout: Duration,
    /// Preferred relay region (load-balanced mode)
    pub region: Region,
    /// Local LAN address; detected when `None`
    pub local_address: Option<IpAddr>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            relay_address: "127.0.0.1".to_string(),
            relay_port: DEFAULT_RELAY_PORT,
            endpoint_port: DEFAULT_ENDPOINT_PORT,
            use_load_balancer: false,
            load_balancer_address: "127.0.0.1".to_string(),
            load_balancer_port: DEFAULT_LOAD_BALANCER_PORT,
            use_nat_punch: true,
            auth_key: "Secret Auth Key".to_string(),
            app_id: 0,
            app_version: "1.0".to_string(),
            max_players: 10,
            server_name: "My awesome server!".to_string(),
            is_public: true,
            extra_data: "Map 1".to_string(),
            connect_on_start: true,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            auth_timeout: Some(DEFAULT_AUTH_TIMEOUT),
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            region: Region::Any,
            local_address: None,
        }
    }
}

impl SessionConfig {
    /// Point the session at a relay
    #[must_use]
    pub fn with_relay(mut self, address: impl Into<String>, port: u16) -> Self {
        self.relay_address = address.into();
        self.relay_port = port;
        self
    }

    /// Resolve relays and rooms through a load balancer
    #[must_use]
    pub fn with_load_balancer(mut self, address: impl Into<String>, port: u16) -> Self {
        self.use_load_balancer = true;
        self.load_balancer_address = address.into();
        self.load_balancer_port = port;
        self
    }

    /// Set the shared authentication key
    #[must_use]
    pub fn with_auth_key(mut self, key: impl Into<String>) -> Self {
        self.auth_key = key.into();
        self
    }

    /// Enable or disable NAT punch-through
    #[must_use]
    pub fn with_nat_punch(mut self, enabled: bool) -> Self {
        self.use_nat_punch = enabled;
        self
    }

    /// Set the application identity advertised with hosted rooms
    #[must_use]
    pub fn with_app(mut self, app_id: i32, version: impl Into<String>) -> Self {
        self.app_id = app_id;
        self.app_version = version.into();
        self
    }

    /// Set the parameters of hosted rooms
    #[must_use]
    pub fn with_room(mut self, name: impl Into<String>, max_players: i32, is_public: bool) -> Self {
        self.server_name = name.into();
        self.max_players = max_players;
        self.is_public = is_public;
        self
    }

    /// Override local address detection
    #[must_use]
    pub fn with_local_address(mut self, address: IpAddr) -> Self {
        self.local_address = Some(address);
        self
    }

    /// Set the authentication deadline
    #[must_use]
    pub fn with_auth_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.auth_timeout = timeout;
        self
    }
}

/// Best-effort detection of the local IPv4 address.
///
/// Connecting a UDP socket sends nothing; it only selects the outbound
/// interface, whose address is then read back.
#[must_use]
pub fn detect_local_ipv4() -> Option<IpAddr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let addr = socket.local_addr().ok()?;
    if addr.ip().is_unspecified() {
        None
    } else {
        Some(addr.ip())
    }
}
