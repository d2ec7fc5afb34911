//! Cached room directory.
//!
//! The cache is replaced wholesale on every successful refresh. Fetching is
//! delegated to a [`RoomListSource`]; the result comes back through
//! [`RoomDirectory::apply`], the single resumption point of a refresh.

use crate::config::SessionConfig;
use crate::transport::{DirectoryEndpoint, RoomListSource};
use relink_proto::{RelayMessage, Room, RoomUpdate};

/// Room list cache
#[derive(Debug, Default, Clone)]
pub struct RoomDirectory {
    rooms: Vec<Room>,
    pending: bool,
}

impl RoomDirectory {
    /// Create an empty directory
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Endpoint the room list is fetched from
    #[must_use]
    pub fn endpoint(config: &SessionConfig) -> DirectoryEndpoint {
        if config.use_load_balancer {
            DirectoryEndpoint {
                address: config.load_balancer_address.clone(),
                port: config.load_balancer_port,
                load_balanced: true,
            }
        } else {
            DirectoryEndpoint {
                address: config.relay_address.clone(),
                port: config.endpoint_port,
                load_balanced: false,
            }
        }
    }

    /// Ask `source` for a fresh list
    pub fn refresh(&mut self, source: &mut dyn RoomListSource, endpoint: &DirectoryEndpoint) {
        tracing::debug!(
            "Requesting room list from {}:{}",
            endpoint.address,
            endpoint.port
        );
        self.pending = true;
        source.request_rooms(endpoint);
    }

    /// Deliver a fetch result; returns the new room count on success.
    ///
    /// A failed fetch leaves the cache untouched.
    pub fn apply(&mut self, result: Result<Vec<Room>, String>) -> Option<usize> {
        self.pending = false;
        match result {
            Ok(rooms) => {
                self.rooms = rooms;
                Some(self.rooms.len())
            }
            Err(e) => {
                tracing::warn!("Room list request failed: {}", e);
                None
            }
        }
    }

    /// A refresh is in flight
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Cached rooms, in relay order
    #[must_use]
    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    /// Number of cached rooms
    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// True when the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Look a room up by its relay-assigned id
    #[must_use]
    pub fn find_by_id(&self, server_id: &str) -> Option<&Room> {
        self.rooms.iter().find(|r| r.server_id == server_id)
    }

    /// Rooms published by the given application
    pub fn for_app(&self, app_id: i32) -> impl Iterator<Item = &Room> {
        self.rooms.iter().filter(move |r| r.app_id == app_id)
    }

    /// Build the relay message for a partial metadata change and mirror it
    /// into the cached copy of `room_id`.
    ///
    /// Returns `None` when the change is empty.
    pub fn update(&mut self, room_id: Option<&str>, update: RoomUpdate) -> Option<RelayMessage> {
        if update.is_empty() {
            return None;
        }

        if let Some(room) = room_id.and_then(|id| self.rooms.iter_mut().find(|r| r.server_id == id)) {
            if let Some(name) = &update.name {
                room.server_name.clone_from(name);
            }
            if let Some(data) = &update.data {
                room.server_data.clone_from(data);
            }
            if let Some(max) = update.max_players {
                room.max_players = max;
            }
        }

        Some(RelayMessage::UpdateRoomData(update))
    }

    /// Drop every cached room
    pub fn clear(&mut self) {
        self.rooms.clear();
        self.pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relink_proto::Region;

    fn room(id: &str, app_id: i32) -> Room {
        Room {
            server_name: format!("Room {id}"),
            max_players: 4,
            server_id: id.to_string(),
            app_id,
            ..Room::default()
        }
    }

    #[derive(Default)]
    struct RecordingSource {
        requests: Vec<DirectoryEndpoint>,
    }

    impl RoomListSource for RecordingSource {
        fn request_rooms(&mut self, endpoint: &DirectoryEndpoint) {
            self.requests.push(endpoint.clone());
        }

        fn request_best_relay(&mut self, _endpoint: &DirectoryEndpoint, _region: Region) {}
    }

    #[test]
    fn test_refresh_replaces_cache() {
        let mut directory = RoomDirectory::new();
        assert_eq!(directory.apply(Ok(vec![room("a", 1), room("b", 1)])), Some(2));
        assert_eq!(directory.apply(Ok(vec![room("c", 1)])), Some(1));

        assert!(directory.find_by_id("a").is_none());
        assert!(directory.find_by_id("c").is_some());
    }

    #[test]
    fn test_failed_fetch_keeps_cache() {
        let mut directory = RoomDirectory::new();
        directory.apply(Ok(vec![room("a", 1)]));
        assert_eq!(directory.apply(Err("timed out".to_string())), None);
        assert_eq!(directory.len(), 1);
        assert!(!directory.is_pending());
    }

    #[test]
    fn test_refresh_goes_through_source() {
        let mut directory = RoomDirectory::new();
        let mut source = RecordingSource::default();
        let config = SessionConfig::default().with_relay("relay.example.net", 7777);
        directory.refresh(&mut source, &RoomDirectory::endpoint(&config));

        assert!(directory.is_pending());
        assert_eq!(source.requests[0].address, "relay.example.net");
        assert_eq!(source.requests[0].port, 8080);
        assert!(!source.requests[0].load_balanced);
    }

    #[test]
    fn test_load_balanced_endpoint() {
        let config = SessionConfig::default().with_load_balancer("lb.example.net", 7070);
        let endpoint = RoomDirectory::endpoint(&config);
        assert_eq!(endpoint.address, "lb.example.net");
        assert!(endpoint.load_balanced);
    }

    #[test]
    fn test_filter_by_app() {
        let mut directory = RoomDirectory::new();
        directory.apply(Ok(vec![room("a", 1), room("b", 2), room("c", 1)]));
        let ids: Vec<_> = directory.for_app(1).map(|r| r.server_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_update_builds_message_and_mirrors() {
        let mut directory = RoomDirectory::new();
        directory.apply(Ok(vec![room("abc123", 1)]));

        let message = directory
            .update(Some("abc123"), RoomUpdate::default().with_name("Renamed"))
            .unwrap();
        assert_eq!(
            message,
            RelayMessage::UpdateRoomData(RoomUpdate::default().with_name("Renamed"))
        );
        assert_eq!(directory.find_by_id("abc123").unwrap().server_name, "Renamed");
    }

    #[test]
    fn test_empty_update_sends_nothing() {
        let mut directory = RoomDirectory::new();
        assert!(directory.update(Some("x"), RoomUpdate::default()).is_none());
    }
}
