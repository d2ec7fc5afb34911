//! Room directory data model.
//!
//! Rooms are not carried by opcode frames; relays publish them as JSON on
//! their HTTP endpoint with camelCase keys.

use serde::{Deserialize, Serialize};

/// Relay region tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Region {
    /// No preference
    #[default]
    Any,
    /// North America
    NorthAmerica,
    /// South America
    SouthAmerica,
    /// Europe
    Europe,
    /// Asia
    Asia,
    /// Africa
    Africa,
    /// Oceania
    Oceania,
}

impl TryFrom<u8> for Region {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Any),
            1 => Ok(Self::NorthAmerica),
            2 => Ok(Self::SouthAmerica),
            3 => Ok(Self::Europe),
            4 => Ok(Self::Asia),
            5 => Ok(Self::Africa),
            6 => Ok(Self::Oceania),
            _ => Err(format!("unknown region tag: {value}")),
        }
    }
}

impl From<Region> for u8 {
    fn from(region: Region) -> Self {
        region as u8
    }
}

/// Where a room's relay can be reached
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelayAddress {
    /// Relay transport port
    pub port: u16,
    /// Relay HTTP endpoint port
    pub endpoint_port: u16,
    /// Relay host name or address
    pub address: String,
    /// Region the relay serves
    pub server_region: Region,
}

impl RelayAddress {
    /// True when both addresses name the same relay transport endpoint
    #[must_use]
    pub fn same_relay(&self, address: &str, port: u16) -> bool {
        self.address == address && self.port == port
    }
}

/// A relay-hosted session
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Room {
    /// Display name
    pub server_name: String,
    /// Capacity
    pub max_players: i32,
    /// Relay-assigned room id
    pub server_id: String,
    /// Free-form metadata
    pub server_data: String,
    /// Relay id of the host
    pub host_id: i32,
    /// Application identifier
    pub app_id: i32,
    /// Application version
    pub version: String,
    /// Relay ids of members, in join order
    pub clients: Vec<i32>,
    /// Current member count
    pub current_players: i32,
    /// Relay hosting this room
    pub relay_info: RelayAddress,
}

impl Room {
    /// Parse a relay room list
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the document is not a list of rooms.
    pub fn parse_list(json: &str) -> Result<Vec<Room>, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Parse a single relay address (load balancer reply)
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the document is not a relay address.
    pub fn parse_relay_address(json: &str) -> Result<RelayAddress, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// True when the room is full
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.current_players >= self.max_players
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST: &str = r#"[
        {
            "serverName": "Room A",
            "maxPlayers": 8,
            "serverId": "abc123",
            "serverData": "map=dust",
            "hostId": 4,
            "appId": 7,
            "version": "1.0",
            "clients": [5, 9],
            "currentPlayers": 3,
            "relayInfo": {
                "port": 7777,
                "endpointPort": 8080,
                "address": "relay.example.net",
                "serverRegion": 3
            }
        }
    ]"#;

    #[test]
    fn test_parse_room_list() {
        let rooms = Room::parse_list(LIST).unwrap();
        assert_eq!(rooms.len(), 1);
        let room = &rooms[0];
        assert_eq!(room.server_id, "abc123");
        assert_eq!(room.clients, vec![5, 9]);
        assert_eq!(room.relay_info.server_region, Region::Europe);
        assert_eq!(room.relay_info.endpoint_port, 8080);
        assert!(!room.is_full());
    }

    #[test]
    fn test_missing_fields_default() {
        let rooms = Room::parse_list(r#"[{"serverId": "x"}]"#).unwrap();
        assert_eq!(rooms[0].server_id, "x");
        assert_eq!(rooms[0].relay_info.server_region, Region::Any);
    }

    #[test]
    fn test_unknown_region_rejected() {
        let result = Room::parse_relay_address(r#"{"serverRegion": 42}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_relay_address_roundtrip() {
        let addr = RelayAddress {
            port: 7777,
            endpoint_port: 8080,
            address: "10.1.1.1".to_string(),
            server_region: Region::Asia,
        };
        let json = serde_json::to_string(&addr).unwrap();
        assert!(json.contains("\"endpointPort\":8080"));
        assert_eq!(Room::parse_relay_address(&json).unwrap(), addr);
        assert!(addr.same_relay("10.1.1.1", 7777));
        assert!(!addr.same_relay("10.1.1.1", 7778));
    }
}
