//! Relay session state machine.
//!
//! A [`Session`] owns one relay link and everything layered on it: the
//! authentication handshake, hosting or joining a room, the connection
//! registries, NAT punch coordination and the heartbeat.
//!
//! The session never blocks and never spawns work of its own beyond the
//! punch receive tasks. It is driven by the caller:
//!
//! - [`Session::handle_transport_event`] for everything the relay link reports
//! - [`Session::handle_direct_event`] for the optional direct-connect module
//! - [`Session::early_update`] / [`Session::late_update`] once per tick
//!
//! Results surface as [`SessionEvent`]s drained with [`Session::poll_event`].

use crate::config::{SessionConfig, detect_local_ipv4};
use crate::error::SessionError;
use crate::join::{JoinSequence, JoinStep, RelayLookup};
use crate::liveness::PROXY_TIMEOUT;
use crate::punch::{PunchCoordinator, PunchRole};
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::rooms::RoomDirectory;
use crate::transport::{DirectConnect, DirectEvent, RelayTransport, RoomListSource, TransportEvent};
use relink_proto::{
    CreateRoom, LOCALHOST, RelayAddress, RelayMessage, Room, RoomUpdate, SendBuffer,
};
use std::collections::VecDeque;
use std::collections::vec_deque::Drain;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

/// URI scheme of hosted rooms
pub const URI_SCHEME: &str = "relink";

/// Unspecified address advertised when no LAN address is usable
const UNSPECIFIED_IP: &str = "0.0.0.0";

/// Relay link state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No link
    Disconnected,
    /// Transport connect in progress
    Connecting,
    /// Link up, waiting for the relay to authenticate us
    ConnectedUnauthenticated,
    /// Ready to host or join
    Authenticated,
}

/// What the session is doing on the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Neither hosting nor joined
    Idle,
    /// Hosting a room
    Hosting,
    /// Joined to a room
    Joined,
}

/// Notifications for the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Relay link established
    ConnectedToRelay,
    /// Relay accepted our key
    Authenticated,
    /// Relay link lost
    DisconnectedFromRelay,
    /// Relay assigned an id to our hosted room
    RoomCreated {
        /// Room id
        room_id: String,
    },
    /// Room list cache replaced
    RoomListUpdated {
        /// Rooms in the new list
        count: usize,
    },
    /// A peer joined our room
    ServerConnected(ConnectionId),
    /// Data from a peer in our room
    ServerDataReceived {
        /// Local connection handle
        connection: ConnectionId,
        /// Payload
        data: Vec<u8>,
        /// Transport channel
        channel: u8,
    },
    /// A peer left our room
    ServerDisconnected(ConnectionId),
    /// We joined a room
    ClientConnected,
    /// Data from the host
    ClientDataReceived {
        /// Payload
        data: Vec<u8>,
        /// Transport channel
        channel: u8,
    },
    /// We left (or failed to join) a room
    ClientDisconnected,
}

/// One relay session
pub struct Session<T: RelayTransport> {
    config: SessionConfig,
    transport: T,
    direct: Option<Box<dyn DirectConnect + Send>>,
    room_source: Option<Box<dyn RoomListSource + Send>>,
    send_buffer: SendBuffer,
    state: ConnectionState,
    role: Role,
    /// Joined through the direct-connect module rather than the relay
    direct_connected: bool,
    cached_host_id: Option<String>,
    room_id: Option<String>,
    relay_address: String,
    relay_port: u16,
    relayed: ConnectionRegistry,
    direct_peers: ConnectionRegistry,
    next_member_id: ConnectionId,
    rooms: RoomDirectory,
    punch: PunchCoordinator,
    local_ip: Option<IpAddr>,
    next_heartbeat: Option<Instant>,
    connected_at: Option<Instant>,
    join: Option<JoinSequence>,
    relay_lookup: Option<RelayLookup>,
    events: VecDeque<SessionEvent>,
    shut_down: bool,
}

impl<T: RelayTransport> Session<T> {
    /// Create a session over `transport`
    #[must_use]
    pub fn new(config: SessionConfig, transport: T) -> Self {
        let local_ip = config.local_address.or_else(detect_local_ipv4);
        let send_buffer = SendBuffer::for_packet_size(transport.max_packet_size());

        Self {
            relay_address: config.relay_address.clone(),
            relay_port: config.relay_port,
            config,
            transport,
            direct: None,
            room_source: None,
            send_buffer,
            state: ConnectionState::Disconnected,
            role: Role::Idle,
            direct_connected: false,
            cached_host_id: None,
            room_id: None,
            relayed: ConnectionRegistry::new(),
            direct_peers: ConnectionRegistry::new(),
            next_member_id: 1,
            rooms: RoomDirectory::new(),
            punch: PunchCoordinator::new(local_ip),
            local_ip,
            next_heartbeat: None,
            connected_at: None,
            join: None,
            relay_lookup: None,
            events: VecDeque::new(),
            shut_down: false,
        }
    }

    /// Attach a direct-connect module
    #[must_use]
    pub fn with_direct_connect(mut self, direct: Box<dyn DirectConnect + Send>) -> Self {
        if self.config.use_nat_punch && !direct.supports_nat_punch() {
            tracing::info!("Direct-connect module cannot punch, NAT punch-through disabled");
        }
        self.direct = Some(direct);
        self
    }

    /// Attach a room list source
    #[must_use]
    pub fn with_room_source(mut self, source: Box<dyn RoomListSource + Send>) -> Self {
        self.room_source = Some(source);
        self
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Relay link state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Current role
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Link up (authenticated or not)
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::ConnectedUnauthenticated | ConnectionState::Authenticated
        )
    }

    /// Relay accepted our key
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state == ConnectionState::Authenticated
    }

    /// Hosting a room
    #[must_use]
    pub fn is_server(&self) -> bool {
        self.role == Role::Hosting
    }

    /// Joined to a room
    #[must_use]
    pub fn is_client(&self) -> bool {
        self.role == Role::Joined
    }

    /// Joined through the direct-connect module
    #[must_use]
    pub fn is_direct_connected(&self) -> bool {
        self.direct_connected
    }

    /// Room id assigned by the relay
    #[must_use]
    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    /// Room being joined
    #[must_use]
    pub fn cached_host_id(&self) -> Option<&str> {
        self.cached_host_id.as_deref()
    }

    /// Relay currently targeted
    #[must_use]
    pub fn current_relay(&self) -> (&str, u16) {
        (&self.relay_address, self.relay_port)
    }

    /// Local LAN address, if known
    #[must_use]
    pub fn local_ip(&self) -> Option<IpAddr> {
        self.local_ip
    }

    /// Peers routed through the relay
    #[must_use]
    pub fn relayed_connections(&self) -> &ConnectionRegistry {
        &self.relayed
    }

    /// Peers routed through the direct-connect module
    #[must_use]
    pub fn direct_connections(&self) -> &ConnectionRegistry {
        &self.direct_peers
    }

    /// Cached room list
    #[must_use]
    pub fn rooms(&self) -> &[Room] {
        self.rooms.rooms()
    }

    /// Room directory
    #[must_use]
    pub fn directory(&self) -> &RoomDirectory {
        &self.rooms
    }

    /// NAT punch coordinator
    #[must_use]
    pub fn punch(&self) -> &PunchCoordinator {
        &self.punch
    }

    /// Relay transport
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Relay transport, mutably
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// True once [`Session::shutdown`] ran
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Next pending notification
    pub fn poll_event(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    /// Every pending notification
    pub fn drain_events(&mut self) -> Drain<'_, SessionEvent> {
        self.events.drain(..)
    }

    /// Schedule the heartbeat and connect if configured to
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the automatic relay connect fails.
    pub fn start(&mut self, now: Instant) -> Result<(), SessionError> {
        self.ensure_heartbeat(now);
        if self.config.connect_on_start {
            self.connect_to_relay(now)?;
        }
        Ok(())
    }

    /// Connect to the configured relay; no-op when a link is up or pending.
    ///
    /// In load-balanced mode the best relay is requested first and the
    /// connect resumes in [`Session::apply_best_relay`].
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the session is shut down or the transport
    /// refuses to start connecting.
    pub fn connect_to_relay(&mut self, now: Instant) -> Result<(), SessionError> {
        if self.shut_down {
            return Err(SessionError::ContractViolation("session is shut down"));
        }
        if self.state != ConnectionState::Disconnected || self.relay_lookup.is_some() {
            tracing::debug!("Relay connect already in progress ({:?})", self.state);
            return Ok(());
        }

        self.ensure_heartbeat(now);

        if self.config.use_load_balancer {
            if let Some(source) = self.room_source.as_mut() {
                let endpoint = RoomDirectory::endpoint(&self.config);
                tracing::info!(
                    "Requesting best relay from load balancer {}:{}",
                    endpoint.address,
                    endpoint.port
                );
                source.request_best_relay(&endpoint, self.config.region);
                self.relay_lookup = Some(RelayLookup::begin(
                    self.config.region,
                    now,
                    self.config.join_timeout,
                ));
                return Ok(());
            }
            tracing::warn!(
                "Load balancer configured without a room source, using {}:{}",
                self.relay_address,
                self.relay_port
            );
        }

        self.open_transport()
    }

    /// Deliver the load balancer's answer
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the transport refuses to start connecting.
    pub fn apply_best_relay(
        &mut self,
        result: Result<RelayAddress, String>,
        _now: Instant,
    ) -> Result<(), SessionError> {
        if self.relay_lookup.take().is_none() {
            tracing::debug!("Ignoring unsolicited relay assignment");
            return Ok(());
        }

        match result {
            Ok(relay) => {
                tracing::info!(
                    "Load balancer assigned relay {}:{} ({:?})",
                    relay.address,
                    relay.port,
                    relay.server_region
                );
                self.relay_address = relay.address;
                self.relay_port = relay.port;
                self.open_transport()
            }
            Err(e) => {
                tracing::warn!("Best relay request failed: {}", e);
                Ok(())
            }
        }
    }

    /// Feed one relay transport event
    pub fn handle_transport_event(&mut self, event: TransportEvent, now: Instant) {
        match event {
            TransportEvent::Connected => self.on_transport_connected(now),
            TransportEvent::Data { frame, channel } => self.handle_frame(&frame, channel, now),
            TransportEvent::Disconnected => self.handle_disconnect(),
            TransportEvent::Error(e) => tracing::warn!("Relay transport error: {}", e),
        }
    }

    /// Decode and dispatch one inbound frame.
    ///
    /// Malformed frames are logged and dropped without touching any state.
    pub fn handle_frame(&mut self, frame: &[u8], channel: u8, now: Instant) {
        let message = match RelayMessage::from_bytes(frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Dropping malformed relay frame: {}", e);
                return;
            }
        };

        tracing::trace!("Relay -> {}", message.message_type());

        match message {
            RelayMessage::AuthenticationRequest => {
                let key = self.config.auth_key.clone();
                if let Err(e) = self.send(&RelayMessage::AuthenticationResponse { key }, 0) {
                    tracing::warn!("Failed to send authentication key: {}", e);
                }
            }
            RelayMessage::Authenticated => self.on_authenticated(),
            RelayMessage::ServerJoined { client_id } => self.on_server_joined(client_id),
            RelayMessage::PlayerDisconnected { client_id } => {
                if self.role == Role::Hosting {
                    if let Some(connection) = self.relayed.remove_by_remote(client_id) {
                        tracing::debug!("Relay peer {} left (connection {})", client_id, connection);
                        self.events.push_back(SessionEvent::ServerDisconnected(connection));
                    }
                }
            }
            RelayMessage::ServerLeft => {
                if self.role == Role::Joined {
                    tracing::info!("Host left the room");
                    self.role = Role::Idle;
                    self.direct_connected = false;
                    self.events.push_back(SessionEvent::ClientDisconnected);
                }
            }
            RelayMessage::GetData { payload, sender } => match self.role {
                Role::Hosting => {
                    let connection = sender.and_then(|id| self.relayed.lookup_by_remote(id));
                    match connection {
                        Some(connection) => self.events.push_back(SessionEvent::ServerDataReceived {
                            connection,
                            data: payload,
                            channel,
                        }),
                        None => tracing::debug!("Dropping data from unknown relay peer {:?}", sender),
                    }
                }
                Role::Joined => self.events.push_back(SessionEvent::ClientDataReceived {
                    data: payload,
                    channel,
                }),
                Role::Idle => tracing::debug!("Dropping data while not in a room"),
            },
            RelayMessage::RoomCreated { room_id } => {
                tracing::info!("Relay created room {}", room_id);
                self.room_id = Some(room_id.clone());
                self.events.push_back(SessionEvent::RoomCreated { room_id });
            }
            RelayMessage::RequestNatConnection { nat_id, port } => {
                self.on_nat_request(&nat_id, port);
            }
            RelayMessage::DirectConnectIp {
                ip,
                port,
                attempt_nat_punch,
            } => self.on_direct_connect_ip(&ip, port, attempt_nat_punch, now),
            RelayMessage::Heartbeat => {}
            other => {
                tracing::debug!("Ignoring unexpected {} from relay", other.message_type());
            }
        }
    }

    /// Feed one direct-connect module event
    pub fn handle_direct_event(&mut self, event: DirectEvent) {
        match event {
            DirectEvent::ServerConnected(direct_id) => {
                if self.role != Role::Hosting {
                    tracing::debug!("Ignoring direct peer {} while not hosting", direct_id);
                    return;
                }
                let connection = self.next_member_id;
                match self.direct_peers.add(direct_id, connection) {
                    Ok(()) => {
                        self.next_member_id += 1;
                        tracing::debug!("Direct peer {} connected as {}", direct_id, connection);
                        self.events.push_back(SessionEvent::ServerConnected(connection));
                    }
                    Err(e) => tracing::warn!("Rejecting direct peer: {}", e),
                }
            }
            DirectEvent::ServerData {
                direct_id,
                data,
                channel,
            } => match self.direct_peers.lookup_by_remote(direct_id) {
                Some(connection) => self.events.push_back(SessionEvent::ServerDataReceived {
                    connection,
                    data,
                    channel,
                }),
                None => tracing::debug!("Dropping data from unknown direct peer {}", direct_id),
            },
            DirectEvent::ServerDisconnected(direct_id) => {
                if let Some(connection) = self.direct_peers.remove_by_remote(direct_id) {
                    self.events.push_back(SessionEvent::ServerDisconnected(connection));
                }
            }
            DirectEvent::ClientConnected => {
                tracing::info!("Direct connection to host established");
                self.direct_connected = true;
                self.events.push_back(SessionEvent::ClientConnected);
            }
            DirectEvent::ClientData { data, channel } => {
                self.events
                    .push_back(SessionEvent::ClientDataReceived { data, channel });
            }
            DirectEvent::ClientDisconnected => {
                if self.direct_connected {
                    self.direct_connected = false;
                    self.role = Role::Idle;
                    self.events.push_back(SessionEvent::ClientDisconnected);
                } else if self.role == Role::Joined {
                    self.fall_back_to_relay();
                }
                self.punch.dispose_client_proxy();
            }
        }
    }

    /// Open a room on the relay.
    ///
    /// Logged no-op unless authenticated and idle.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the room request cannot be sent.
    pub fn start_server(&mut self) -> Result<(), SessionError> {
        if self.state != ConnectionState::Authenticated {
            tracing::info!("Not authenticated with relay, server not started");
            return Ok(());
        }
        if self.role != Role::Idle || self.join.is_some() {
            tracing::info!("Cannot host while already hosting or connected");
            return Ok(());
        }

        self.relayed.clear();
        self.direct_peers.clear();
        self.next_member_id = 1;
        self.punch.clear_server_proxies();

        let direct_connectable = self.direct.is_some() && self.local_ip.is_some();
        let punching = direct_connectable
            && self.punch_enabled()
            && match self.punch.ensure_socket() {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!("NAT punch unavailable, hosting without it: {}", e);
                    false
                }
            };

        let direct_port = if punching {
            0
        } else {
            match &self.direct {
                Some(direct) if direct.supports_nat_punch() => i32::from(direct.transport_port()),
                _ => 1,
            }
        };

        let direct_server_port = self.punch.direct_server_port();
        if let Some(direct) = self.direct.as_mut() {
            if punching {
                direct.start_server(direct_server_port);
            } else if direct_connectable {
                direct.start_server(None);
            }
        }

        let local_ip = if direct_connectable {
            self.local_ip_string()
        } else {
            UNSPECIFIED_IP.to_string()
        };

        let request = CreateRoom {
            max_players: self.config.max_players,
            name: self.config.server_name.clone(),
            is_public: self.config.is_public,
            extra_data: self.config.extra_data.clone(),
            direct_connectable,
            local_ip,
            use_nat_punch: punching,
            direct_port,
            app_id: self.config.app_id,
            version: self.config.app_version.clone(),
        };
        self.send(&RelayMessage::CreateRoom(request), 0)?;

        self.role = Role::Hosting;
        tracing::info!(
            "Requested room '{}' for {} players (punch: {})",
            self.config.server_name,
            self.config.max_players,
            punching
        );
        Ok(())
    }

    /// Leave the hosted room and drop every direct peer and proxy
    pub fn stop_server(&mut self) {
        if self.role != Role::Hosting {
            return;
        }

        self.role = Role::Idle;
        if let Err(e) = self.send(&RelayMessage::LeaveRoom, 0) {
            tracing::warn!("Failed to leave room: {}", e);
        }
        if let Some(direct) = self.direct.as_mut() {
            direct.stop_server();
        }
        let disposed = self.punch.clear_server_proxies();
        tracing::info!("Stopped hosting ({} proxies disposed)", disposed);
    }

    /// Join the room hosted as `host_id`.
    ///
    /// Without authentication this is a logged no-op that reports
    /// [`SessionEvent::ClientDisconnected`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ContractViolation`] while hosting or already
    /// joined; nothing is sent in that case.
    pub fn connect(&mut self, host_id: &str, now: Instant) -> Result<(), SessionError> {
        if self.state != ConnectionState::Authenticated {
            tracing::info!("Not connected to relay, cannot join {}", host_id);
            self.events.push_back(SessionEvent::ClientDisconnected);
            return Ok(());
        }
        if self.role != Role::Idle || self.join.is_some() {
            return Err(SessionError::ContractViolation(
                "cannot connect while hosting or already connected",
            ));
        }

        if !self.config.use_load_balancer {
            return self.send_join(host_id);
        }

        let room = self.rooms.find_by_id(host_id).cloned();
        let (sequence, step) = JoinSequence::begin(
            host_id,
            room.as_ref(),
            &self.relay_address,
            self.relay_port,
            now,
            self.config.join_timeout,
        );

        match step {
            JoinStep::SendJoin => self.send_join(host_id),
            JoinStep::SwitchRelay { address, port } => {
                self.join = sequence;
                self.switch_relay(address, port)
            }
            JoinStep::Wait | JoinStep::TimedOut => Ok(()),
        }
    }

    /// Leave the joined room
    pub fn client_disconnect(&mut self) {
        if self.direct_connected {
            if let Some(direct) = self.direct.as_mut() {
                direct.client_disconnect();
            }
            self.punch.dispose_client_proxy();
        }
        if self.role == Role::Joined {
            self.role = Role::Idle;
            if self.is_connected() {
                if let Err(e) = self.send(&RelayMessage::LeaveRoom, 0) {
                    tracing::warn!("Failed to leave room: {}", e);
                }
            }
        }

        self.join = None;
        self.direct_connected = false;
        self.cached_host_id = None;
    }

    /// Send to the host
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the relay link is down or the frame does
    /// not fit the send buffer.
    pub fn client_send(&mut self, data: &[u8], channel: u8) -> Result<(), SessionError> {
        if self.direct_connected {
            if let Some(direct) = self.direct.as_mut() {
                direct.client_send(data, channel);
                return Ok(());
            }
        }

        let message = RelayMessage::SendData {
            payload: data.to_vec(),
            target: 0,
        };
        self.send(&message, channel)
    }

    /// Send to a peer in our room
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownConnection`] for an unregistered
    /// handle, or a transport/framing error.
    pub fn server_send(
        &mut self,
        connection: ConnectionId,
        data: &[u8],
        channel: u8,
    ) -> Result<(), SessionError> {
        if let Some(direct_id) = self.direct_peers.lookup_by_local(connection) {
            if let Some(direct) = self.direct.as_mut() {
                direct.server_send(direct_id, data, channel);
                return Ok(());
            }
        }

        let target = self
            .relayed
            .lookup_by_local(connection)
            .ok_or(SessionError::UnknownConnection(connection))?;
        let message = RelayMessage::SendData {
            payload: data.to_vec(),
            target,
        };
        self.send(&message, channel)
    }

    /// Remove a peer from our room
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownConnection`] for an unregistered
    /// handle, or a transport error.
    pub fn server_disconnect(&mut self, connection: ConnectionId) -> Result<(), SessionError> {
        if let Some(client_id) = self.relayed.lookup_by_local(connection) {
            return self.send(&RelayMessage::KickPlayer { client_id }, 0);
        }

        if let Some(direct_id) = self.direct_peers.lookup_by_local(connection) {
            if let Some(direct) = self.direct.as_mut() {
                direct.kick(direct_id);
                return Ok(());
            }
        }

        Err(SessionError::UnknownConnection(connection))
    }

    /// Address shown for a connection: relay id, or `DIRECT-<id>`
    #[must_use]
    pub fn connection_address(&self, connection: ConnectionId) -> Option<String> {
        if let Some(relay_id) = self.relayed.lookup_by_local(connection) {
            return Some(relay_id.to_string());
        }
        self.direct_peers
            .lookup_by_local(connection)
            .map(|direct_id| format!("DIRECT-{direct_id}"))
    }

    /// URI of the hosted room
    #[must_use]
    pub fn server_uri(&self) -> Option<String> {
        self.room_id
            .as_ref()
            .map(|id| format!("{URI_SCHEME}://{id}"))
    }

    /// Send a partial metadata change for the hosted room.
    ///
    /// Ignored unless hosting; empty changes send nothing.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the update cannot be sent.
    pub fn update_room(&mut self, update: RoomUpdate) -> Result<(), SessionError> {
        if self.role != Role::Hosting {
            tracing::debug!("Room update ignored while not hosting");
            return Ok(());
        }

        match self.rooms.update(self.room_id.as_deref(), update) {
            Some(message) => self.send(&message, 0),
            None => Ok(()),
        }
    }

    /// Rename the hosted room
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the update cannot be sent.
    pub fn update_room_name(&mut self, name: &str) -> Result<(), SessionError> {
        self.update_room(RoomUpdate::default().with_name(name))
    }

    /// Replace the hosted room's metadata string
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the update cannot be sent.
    pub fn update_room_data(&mut self, data: &str) -> Result<(), SessionError> {
        self.update_room(RoomUpdate::default().with_data(data))
    }

    /// Change the hosted room's visibility
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the update cannot be sent.
    pub fn update_room_visibility(&mut self, is_public: bool) -> Result<(), SessionError> {
        self.update_room(RoomUpdate::default().with_visibility(is_public))
    }

    /// Change the hosted room's capacity
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the update cannot be sent.
    pub fn update_room_player_count(&mut self, max_players: i32) -> Result<(), SessionError> {
        self.update_room(RoomUpdate::default().with_max_players(max_players))
    }

    /// Ask the room source for a fresh list
    pub fn refresh_rooms(&mut self) {
        let endpoint = RoomDirectory::endpoint(&self.config);
        match self.room_source.as_deref_mut() {
            Some(source) => self.rooms.refresh(source, &endpoint),
            None => tracing::trace!("No room source attached, skipping room refresh"),
        }
    }

    /// Deliver a room list fetch result
    pub fn apply_room_list(&mut self, result: Result<Vec<Room>, String>) {
        if let Some(count) = self.rooms.apply(result) {
            tracing::debug!("Room list updated: {} rooms", count);
            self.events.push_back(SessionEvent::RoomListUpdated { count });
        }
    }

    /// Per-tick work before the application runs
    pub fn early_update(&mut self, now: Instant) {
        if self.shut_down {
            return;
        }

        self.transport.early_update();
        if let Some(direct) = self.direct.as_mut() {
            direct.early_update();
        }

        let role = self.punch_role();
        self.punch.process_events(role, now);
        self.check_deadlines(now);
    }

    /// Per-tick work after the application ran
    pub fn late_update(&mut self, now: Instant) {
        if self.shut_down {
            return;
        }

        self.transport.late_update();
        if let Some(direct) = self.direct.as_mut() {
            direct.late_update();
        }

        self.punch.poll(now);

        if let Some(due) = self.next_heartbeat {
            if now >= due {
                self.next_heartbeat = Some(now + self.config.heartbeat_interval);
                self.heartbeat(now);
            }
        }
    }

    /// Tear everything down; safe to call more than once
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }

        tracing::info!("Shutting down relay session");
        if self.state == ConnectionState::Authenticated {
            self.transport.disconnect();
        }
        self.handle_disconnect();

        self.relay_lookup = None;
        self.next_heartbeat = None;
        self.punch.shutdown();
        self.transport.shutdown();
        self.shut_down = true;
    }

    fn send(&mut self, message: &RelayMessage, channel: u8) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }

        let frame = self.send_buffer.encode(message)?;
        self.transport.send(frame, channel)?;
        tracing::trace!("Relay <- {}", message.message_type());
        Ok(())
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            tracing::debug!("Relay state transition: {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    fn open_transport(&mut self) -> Result<(), SessionError> {
        self.send_buffer = SendBuffer::for_packet_size(self.transport.max_packet_size());
        self.set_state(ConnectionState::Connecting);
        tracing::info!(
            "Connecting to relay {}:{}",
            self.relay_address,
            self.relay_port
        );

        if let Err(e) = self.transport.connect(&self.relay_address, self.relay_port) {
            self.set_state(ConnectionState::Disconnected);
            return Err(e.into());
        }
        Ok(())
    }

    fn switch_relay(&mut self, address: String, port: u16) -> Result<(), SessionError> {
        tracing::info!("Switching to relay {}:{} to join room", address, port);
        if self.state != ConnectionState::Disconnected {
            self.transport.disconnect();
            self.reset_relay_state();
        }

        self.relay_address = address;
        self.relay_port = port;
        if let Err(e) = self.open_transport() {
            self.join = None;
            self.events.push_back(SessionEvent::DisconnectedFromRelay);
            return Err(e);
        }
        Ok(())
    }

    fn ensure_heartbeat(&mut self, now: Instant) {
        if self.next_heartbeat.is_none() {
            self.next_heartbeat = Some(now + self.config.heartbeat_interval);
        }
    }

    fn on_transport_connected(&mut self, now: Instant) {
        if self.state != ConnectionState::Connecting {
            tracing::debug!("Ignoring transport connect in state {:?}", self.state);
            return;
        }

        tracing::info!("Connected to relay {}:{}", self.relay_address, self.relay_port);
        self.set_state(ConnectionState::ConnectedUnauthenticated);
        self.connected_at = Some(now);
        self.events.push_back(SessionEvent::ConnectedToRelay);
    }

    fn on_authenticated(&mut self) {
        if self.state != ConnectionState::ConnectedUnauthenticated {
            tracing::debug!("Ignoring authentication in state {:?}", self.state);
            return;
        }

        tracing::info!("Authenticated with relay");
        self.set_state(ConnectionState::Authenticated);
        self.connected_at = None;
        self.events.push_back(SessionEvent::Authenticated);
        self.refresh_rooms();

        let step = self.join.as_mut().map(JoinSequence::on_authenticated);
        if step == Some(JoinStep::SendJoin) {
            if let Some(join) = self.join.take() {
                if let Err(e) = self.send_join(join.host_id()) {
                    tracing::warn!("Failed to join room {}: {}", join.host_id(), e);
                    self.events.push_back(SessionEvent::ClientDisconnected);
                }
            }
        }
    }

    fn on_server_joined(&mut self, client_id: i32) {
        match self.role {
            Role::Hosting => {
                let connection = self.next_member_id;
                match self.relayed.add(client_id, connection) {
                    Ok(()) => {
                        self.next_member_id += 1;
                        tracing::debug!("Relay peer {} joined as {}", client_id, connection);
                        self.events.push_back(SessionEvent::ServerConnected(connection));
                    }
                    Err(e) => tracing::warn!("Ignoring duplicate join: {}", e),
                }
            }
            Role::Joined => {
                tracing::info!("Joined room {:?}", self.cached_host_id);
                self.events.push_back(SessionEvent::ClientConnected);
            }
            Role::Idle => tracing::debug!("Ignoring join notification while idle"),
        }
    }

    fn on_nat_request(&mut self, nat_id: &str, port: i32) {
        if !self.punch_enabled() {
            tracing::trace!("Ignoring NAT request, punch-through unavailable");
            return;
        }

        let relay = self.relay_address.clone();
        if let Err(e) = self.punch.begin_relay_punch(&relay, nat_id, port) {
            tracing::warn!("NAT punch setup failed: {}", e);
        }
    }

    fn on_direct_connect_ip(&mut self, ip: &str, port: i32, attempt_nat_punch: bool, now: Instant) {
        let Ok(port) = u16::try_from(port) else {
            tracing::warn!("Relay advertised invalid direct port {}", port);
            self.abandon_direct_join();
            return;
        };
        let addr = match ip.parse::<IpAddr>() {
            Ok(addr) => addr,
            Err(e) => {
                tracing::warn!("Relay advertised invalid direct address {}: {}", ip, e);
                self.abandon_direct_join();
                return;
            }
        };

        let punching = attempt_nat_punch && self.punch_enabled();
        if punching {
            let peer = SocketAddr::new(addr, port);
            if self.role != Role::Hosting {
                self.punch.set_client_peer(peer);
            }
            if let Err(e) = self.punch.start_peer_punch(peer, now) {
                tracing::warn!("Cannot punch towards {}: {}", peer, e);
            }
        }

        if self.role == Role::Hosting {
            return;
        }

        let target = if !punching {
            Some((ip.to_string(), port))
        } else if ip != LOCALHOST {
            match self.punch.open_client_proxy() {
                Ok(proxy_port) => Some((LOCALHOST.to_string(), proxy_port)),
                Err(e) => {
                    tracing::warn!("Failed to open client proxy: {}", e);
                    None
                }
            }
        } else {
            // Same-machine host listens one port above its advertised punch port.
            port.checked_add(1).map(|proxy_port| (LOCALHOST.to_string(), proxy_port))
        };

        let Some((join_ip, join_port)) = target else {
            self.abandon_direct_join();
            return;
        };
        match self.direct.as_mut() {
            Some(direct) => direct.join_server(&join_ip, join_port),
            None => self.abandon_direct_join(),
        }
    }

    /// The relay offered a direct path this side cannot use
    fn abandon_direct_join(&mut self) {
        if self.role == Role::Joined && !self.direct_connected {
            self.punch.dispose_client_proxy();
            self.fall_back_to_relay();
        }
    }

    fn fall_back_to_relay(&mut self) {
        let Some(host_id) = self.cached_host_id.clone() else {
            return;
        };

        tracing::info!("Direct connection to {} failed, joining through relay", host_id);
        let message = RelayMessage::JoinServer {
            host_id,
            use_direct_connect: false,
            local_ip: self.local_ip_string(),
        };
        if let Err(e) = self.send(&message, 0) {
            tracing::warn!("Relay fallback join failed: {}", e);
        }
    }

    fn send_join(&mut self, host_id: &str) -> Result<(), SessionError> {
        self.direct_connected = false;
        let message = RelayMessage::JoinServer {
            host_id: host_id.to_string(),
            use_direct_connect: self.direct.is_some(),
            local_ip: self.local_ip_string(),
        };
        self.send(&message, 0)?;

        self.cached_host_id = Some(host_id.to_string());
        self.role = Role::Joined;
        tracing::info!("Joining room {}", host_id);
        Ok(())
    }

    fn check_deadlines(&mut self, now: Instant) {
        if let (Some(connected_at), Some(timeout)) = (self.connected_at, self.config.auth_timeout) {
            if self.state == ConnectionState::ConnectedUnauthenticated
                && now.saturating_duration_since(connected_at) >= timeout
            {
                tracing::warn!("Relay did not authenticate within {:?}, disconnecting", timeout);
                self.transport.disconnect();
                self.handle_disconnect();
            }
        }

        if let Some(join) = &self.join {
            if join.poll(now) == JoinStep::TimedOut {
                tracing::warn!("Join of room {} timed out", join.host_id());
                self.join = None;
                self.cached_host_id = None;
                self.events.push_back(SessionEvent::ClientDisconnected);
            }
        }

        if let Some(lookup) = self.relay_lookup {
            if lookup.is_expired(now) {
                tracing::warn!("Load balancer did not answer for region {:?}", lookup.region());
                self.relay_lookup = None;
            }
        }
    }

    fn heartbeat(&mut self, now: Instant) {
        if !self.is_connected() {
            return;
        }

        if let Err(e) = self.send(&RelayMessage::Heartbeat, 0) {
            tracing::warn!("Failed to send heartbeat: {}", e);
        }
        self.punch.keepalive();
        self.punch.sweep_proxies(now, PROXY_TIMEOUT);
    }

    /// Single handler for every way the relay link can go away
    fn handle_disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }

        tracing::info!("Disconnected from relay");
        self.join = None;
        self.reset_relay_state();
        self.events.push_back(SessionEvent::DisconnectedFromRelay);
    }

    fn reset_relay_state(&mut self) {
        self.set_state(ConnectionState::Disconnected);
        self.role = Role::Idle;
        self.direct_connected = false;
        self.cached_host_id = None;
        self.room_id = None;
        self.connected_at = None;
        self.relayed.clear();
        self.direct_peers.clear();
    }

    fn punch_enabled(&self) -> bool {
        self.config.use_nat_punch
            && self.local_ip.is_some()
            && self
                .direct
                .as_ref()
                .is_some_and(|direct| direct.supports_nat_punch())
    }

    fn punch_role(&self) -> PunchRole {
        match self.role {
            Role::Hosting => PunchRole::Server,
            Role::Joined => PunchRole::Client,
            Role::Idle => PunchRole::Idle,
        }
    }

    fn local_ip_string(&self) -> String {
        self.local_ip
            .map_or_else(|| UNSPECIFIED_IP.to_string(), |ip| ip.to_string())
    }
}

impl<T: RelayTransport> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("role", &self.role)
            .field("relay", &(&self.relay_address, self.relay_port))
            .field("room_id", &self.room_id)
            .field("relayed", &self.relayed.len())
            .field("direct", &self.direct_peers.len())
            .finish_non_exhaustive()
    }
}
