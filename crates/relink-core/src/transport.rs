//! Collaborator seams.
//!
//! The session drives three external components without knowing how they
//! move bytes:
//!
//! - [`RelayTransport`]: the byte-stream link to the relay (TCP, KCP,
//!   WebSocket, ...)
//! - [`DirectConnect`]: an optional peer-to-peer module used after a
//!   successful punch or on a LAN
//! - [`RoomListSource`]: fetches the room list / best relay from the relay's
//!   HTTP endpoint or a load balancer
//!
//! Calls into collaborators are non-blocking. Their results come back as
//! events ([`TransportEvent`], [`DirectEvent`]) or completion calls on the
//! session, always on the session's own tick.

use crate::error::TransportError;
use relink_proto::Region;

/// Byte-stream link to a relay
pub trait RelayTransport {
    /// Begin connecting; completion is reported with [`TransportEvent::Connected`]
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the connection attempt cannot be started.
    fn connect(&mut self, address: &str, port: u16) -> Result<(), TransportError>;

    /// Close the link
    fn disconnect(&mut self);

    /// Send one complete frame
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the link is down or the send fails.
    fn send(&mut self, frame: &[u8], channel: u8) -> Result<(), TransportError>;

    /// Largest frame the link accepts
    fn max_packet_size(&self) -> usize;

    /// Per-frame hook before protocol processing
    fn early_update(&mut self) {}

    /// Per-frame hook after protocol processing
    fn late_update(&mut self) {}

    /// Release every resource held by the transport
    fn shutdown(&mut self);
}

/// Events reported by a [`RelayTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Link established
    Connected,
    /// One inbound frame
    Data {
        /// Frame bytes, opcode first
        frame: Vec<u8>,
        /// Transport channel
        channel: u8,
    },
    /// Link lost or closed
    Disconnected,
    /// Non-fatal transport error
    Error(String),
}

/// Optional direct peer-to-peer module
pub trait DirectConnect {
    /// Start listening; `None` lets the module pick its own port
    fn start_server(&mut self, port: Option<u16>);

    /// Stop listening and drop every direct peer
    fn stop_server(&mut self);

    /// Connect to a host
    fn join_server(&mut self, ip: &str, port: u16);

    /// Drop the client-side connection
    fn client_disconnect(&mut self);

    /// Drop a direct peer
    fn kick(&mut self, direct_id: i32);

    /// Send to a direct peer
    fn server_send(&mut self, direct_id: i32, data: &[u8], channel: u8);

    /// Send to the host
    fn client_send(&mut self, data: &[u8], channel: u8);

    /// Whether the module can run behind the punch proxies
    fn supports_nat_punch(&self) -> bool;

    /// Port the module listens on
    fn transport_port(&self) -> u16;

    /// Per-frame hook before protocol processing
    fn early_update(&mut self) {}

    /// Per-frame hook after protocol processing
    fn late_update(&mut self) {}
}

/// Events reported by a [`DirectConnect`] module
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectEvent {
    /// A peer connected to our direct server
    ServerConnected(i32),
    /// Data from a direct peer
    ServerData {
        /// Module-local peer id
        direct_id: i32,
        /// Payload
        data: Vec<u8>,
        /// Channel
        channel: u8,
    },
    /// A direct peer left
    ServerDisconnected(i32),
    /// Our direct client connected to the host
    ClientConnected,
    /// Data from the host
    ClientData {
        /// Payload
        data: Vec<u8>,
        /// Channel
        channel: u8,
    },
    /// Our direct client lost (or never reached) the host
    ClientDisconnected,
}

/// HTTP endpoint serving room lists and relay assignments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEndpoint {
    /// Host name or address
    pub address: String,
    /// Port
    pub port: u16,
    /// Endpoint is a load balancer rather than a single relay
    pub load_balanced: bool,
}

/// Fetches directory data on behalf of the session
pub trait RoomListSource {
    /// Request the room list; deliver it with `Session::apply_room_list`
    fn request_rooms(&mut self, endpoint: &DirectoryEndpoint);

    /// Request the best relay for `region`; deliver it with
    /// `Session::apply_best_relay`
    fn request_best_relay(&mut self, endpoint: &DirectoryEndpoint, region: Region);
}
