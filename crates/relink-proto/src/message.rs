//! Relay message definitions and their fixed field layouts.

use crate::buffer::{BOOL_SIZE, FrameReader, FrameWriter, INT_SIZE, prefixed_len};
use crate::error::FrameError;
use crate::opcode::OpCode;

/// Room parameters sent with [`OpCode::CreateRoom`]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CreateRoom {
    /// Room capacity
    pub max_players: i32,
    /// Display name
    pub name: String,
    /// Listed in the public room directory
    pub is_public: bool,
    /// Free-form metadata
    pub extra_data: String,
    /// Host can accept direct connections
    pub direct_connectable: bool,
    /// Host LAN address, `0.0.0.0` when unknown
    pub local_ip: String,
    /// Host participates in NAT punch-through
    pub use_nat_punch: bool,
    /// Direct-connect port (0 when punching, 1 when unsupported)
    pub direct_port: i32,
    /// Application identifier used to filter incompatible rooms
    pub app_id: i32,
    /// Application version
    pub version: String,
}

/// Partial room metadata change sent with [`OpCode::UpdateRoomData`].
///
/// Each field is independently optional; `None` leaves the relay's value
/// untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoomUpdate {
    /// New display name
    pub name: Option<String>,
    /// New metadata string
    pub data: Option<String>,
    /// New visibility
    pub is_public: Option<bool>,
    /// New capacity
    pub max_players: Option<i32>,
}

impl RoomUpdate {
    /// Rename the room
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Replace the metadata string
    #[must_use]
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Change visibility
    #[must_use]
    pub fn with_visibility(mut self, is_public: bool) -> Self {
        self.is_public = Some(is_public);
        self
    }

    /// Change capacity
    #[must_use]
    pub fn with_max_players(mut self, max_players: i32) -> Self {
        self.max_players = Some(max_players);
        self
    }

    /// True when no field would change
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.data.is_none()
            && self.is_public.is_none()
            && self.max_players.is_none()
    }
}

/// Relay protocol messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    /// Placeholder, no payload
    Default,
    /// Identifier request, no payload
    RequestId,
    /// Client asks to join a room
    JoinServer {
        /// Room id of the host
        host_id: String,
        /// Client has a direct-connect module
        use_direct_connect: bool,
        /// Client LAN address
        local_ip: String,
    },
    /// Payload towards the relay
    SendData {
        /// Opaque application bytes
        payload: Vec<u8>,
        /// Relay id of the recipient (0 when sent by a client)
        target: i32,
    },
    /// Identifier reply, no payload
    GetId,
    /// A peer joined our room, or our join succeeded
    ServerJoined {
        /// Relay-assigned id of the joining peer
        client_id: i32,
    },
    /// Payload from the relay
    GetData {
        /// Opaque application bytes
        payload: Vec<u8>,
        /// Relay id of the sender, present only when delivered to a host
        sender: Option<i32>,
    },
    /// Open a room
    CreateRoom(CreateRoom),
    /// Host closed the room
    ServerLeft,
    /// A member left the room
    PlayerDisconnected {
        /// Relay id of the departed member
        client_id: i32,
    },
    /// Room opened
    RoomCreated {
        /// Relay-assigned room id
        room_id: String,
    },
    /// Leave the current room
    LeaveRoom,
    /// Remove a member
    KickPlayer {
        /// Relay id of the member
        client_id: i32,
    },
    /// Relay asks for the shared key
    AuthenticationRequest,
    /// Shared key
    AuthenticationResponse {
        /// Opaque shared secret
        key: String,
    },
    /// Relay accepted the key
    Authenticated,
    /// Partial room metadata change
    UpdateRoomData(RoomUpdate),
    /// Connection data exchange, no payload
    ServerConnectionData,
    /// Relay asks us to open a punch socket
    RequestNatConnection {
        /// Correlation token echoed back in the punch burst
        nat_id: String,
        /// Relay port accepting punch datagrams
        port: i32,
    },
    /// Relay advertises a peer's direct endpoint
    DirectConnectIp {
        /// Peer address
        ip: String,
        /// Peer port
        port: i32,
        /// Peer expects a hole punch
        attempt_nat_punch: bool,
    },
    /// Keepalive
    Heartbeat,
}

fn write_optional<'a, T: ?Sized>(
    writer: &mut FrameWriter<'a>,
    value: Option<&T>,
    write: impl FnOnce(&mut FrameWriter<'a>, &T) -> Result<(), FrameError>,
) -> Result<(), FrameError> {
    match value {
        Some(value) => {
            writer.write_bool(true)?;
            write(writer, value)
        }
        None => writer.write_bool(false),
    }
}

fn read_optional<'a, T>(
    reader: &mut FrameReader<'a>,
    read: impl FnOnce(&mut FrameReader<'a>) -> Result<T, FrameError>,
) -> Result<Option<T>, FrameError> {
    if reader.read_bool()? {
        read(reader).map(Some)
    } else {
        Ok(None)
    }
}

impl RelayMessage {
    /// Opcode tagging this message on the wire
    #[must_use]
    pub fn opcode(&self) -> OpCode {
        match self {
            Self::Default => OpCode::Default,
            Self::RequestId => OpCode::RequestId,
            Self::JoinServer { .. } => OpCode::JoinServer,
            Self::SendData { .. } => OpCode::SendData,
            Self::GetId => OpCode::GetId,
            Self::ServerJoined { .. } => OpCode::ServerJoined,
            Self::GetData { .. } => OpCode::GetData,
            Self::CreateRoom(_) => OpCode::CreateRoom,
            Self::ServerLeft => OpCode::ServerLeft,
            Self::PlayerDisconnected { .. } => OpCode::PlayerDisconnected,
            Self::RoomCreated { .. } => OpCode::RoomCreated,
            Self::LeaveRoom => OpCode::LeaveRoom,
            Self::KickPlayer { .. } => OpCode::KickPlayer,
            Self::AuthenticationRequest => OpCode::AuthenticationRequest,
            Self::AuthenticationResponse { .. } => OpCode::AuthenticationResponse,
            Self::Authenticated => OpCode::Authenticated,
            Self::UpdateRoomData(_) => OpCode::UpdateRoomData,
            Self::ServerConnectionData => OpCode::ServerConnectionData,
            Self::RequestNatConnection { .. } => OpCode::RequestNatConnection,
            Self::DirectConnectIp { .. } => OpCode::DirectConnectIp,
            Self::Heartbeat => OpCode::Heartbeat,
        }
    }

    /// Get the message type name
    #[must_use]
    pub fn message_type(&self) -> &'static str {
        self.opcode().name()
    }

    /// Exact number of bytes [`encode_into`](Self::encode_into) will write
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        let body = match self {
            Self::Default
            | Self::RequestId
            | Self::GetId
            | Self::ServerLeft
            | Self::LeaveRoom
            | Self::AuthenticationRequest
            | Self::Authenticated
            | Self::ServerConnectionData
            | Self::Heartbeat => 0,
            Self::JoinServer {
                host_id, local_ip, ..
            } => prefixed_len(host_id.len()) + BOOL_SIZE + prefixed_len(local_ip.len()),
            Self::SendData { payload, .. } => prefixed_len(payload.len()) + INT_SIZE,
            Self::ServerJoined { .. }
            | Self::PlayerDisconnected { .. }
            | Self::KickPlayer { .. } => INT_SIZE,
            Self::GetData { payload, sender } => {
                prefixed_len(payload.len()) + sender.map_or(0, |_| INT_SIZE)
            }
            Self::CreateRoom(room) => {
                INT_SIZE
                    + prefixed_len(room.name.len())
                    + BOOL_SIZE
                    + prefixed_len(room.extra_data.len())
                    + BOOL_SIZE
                    + prefixed_len(room.local_ip.len())
                    + BOOL_SIZE
                    + INT_SIZE
                    + INT_SIZE
                    + prefixed_len(room.version.len())
            }
            Self::RoomCreated { room_id } => prefixed_len(room_id.len()),
            Self::AuthenticationResponse { key } => prefixed_len(key.len()),
            Self::UpdateRoomData(update) => {
                4 * BOOL_SIZE
                    + update.name.as_ref().map_or(0, |s| prefixed_len(s.len()))
                    + update.data.as_ref().map_or(0, |s| prefixed_len(s.len()))
                    + update.is_public.map_or(0, |_| BOOL_SIZE)
                    + update.max_players.map_or(0, |_| INT_SIZE)
            }
            Self::RequestNatConnection { nat_id, .. } => prefixed_len(nat_id.len()) + INT_SIZE,
            Self::DirectConnectIp { ip, .. } => prefixed_len(ip.len()) + INT_SIZE + BOOL_SIZE,
        };
        1 + body
    }

    /// Encode into `buf`, returning the number of bytes written
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::BufferOverflow`] if `buf` is too small; nothing
    /// beyond the returned length is meaningful in that case.
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<usize, FrameError> {
        let needed = self.encoded_len();
        if needed > buf.len() {
            return Err(FrameError::BufferOverflow {
                needed,
                capacity: buf.len(),
            });
        }

        let mut w = FrameWriter::new(buf);
        w.write_u8(self.opcode().as_u8())?;

        match self {
            Self::Default
            | Self::RequestId
            | Self::GetId
            | Self::ServerLeft
            | Self::LeaveRoom
            | Self::AuthenticationRequest
            | Self::Authenticated
            | Self::ServerConnectionData
            | Self::Heartbeat => {}
            Self::JoinServer {
                host_id,
                use_direct_connect,
                local_ip,
            } => {
                w.write_string(host_id)?;
                w.write_bool(*use_direct_connect)?;
                w.write_string(local_ip)?;
            }
            Self::SendData { payload, target } => {
                w.write_bytes(payload)?;
                w.write_i32(*target)?;
            }
            Self::ServerJoined { client_id }
            | Self::PlayerDisconnected { client_id }
            | Self::KickPlayer { client_id } => {
                w.write_i32(*client_id)?;
            }
            Self::GetData { payload, sender } => {
                w.write_bytes(payload)?;
                if let Some(sender) = sender {
                    w.write_i32(*sender)?;
                }
            }
            Self::CreateRoom(room) => {
                w.write_i32(room.max_players)?;
                w.write_string(&room.name)?;
                w.write_bool(room.is_public)?;
                w.write_string(&room.extra_data)?;
                w.write_bool(room.direct_connectable)?;
                w.write_string(&room.local_ip)?;
                w.write_bool(room.use_nat_punch)?;
                w.write_i32(room.direct_port)?;
                w.write_i32(room.app_id)?;
                w.write_string(&room.version)?;
            }
            Self::RoomCreated { room_id } => w.write_string(room_id)?,
            Self::AuthenticationResponse { key } => w.write_string(key)?,
            Self::UpdateRoomData(update) => {
                write_optional(&mut w, update.name.as_deref(), |w, v| w.write_string(v))?;
                write_optional(&mut w, update.data.as_deref(), |w, v| w.write_string(v))?;
                write_optional(&mut w, update.is_public.as_ref(), |w, v| w.write_bool(*v))?;
                write_optional(&mut w, update.max_players.as_ref(), |w, v| w.write_i32(*v))?;
            }
            Self::RequestNatConnection { nat_id, port } => {
                w.write_string(nat_id)?;
                w.write_i32(*port)?;
            }
            Self::DirectConnectIp {
                ip,
                port,
                attempt_nat_punch,
            } => {
                w.write_string(ip)?;
                w.write_i32(*port)?;
                w.write_bool(*attempt_nat_punch)?;
            }
        }

        Ok(w.position())
    }

    /// Serialize message to a freshly allocated buffer
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::FieldTooLong`] if a field exceeds the 32-bit
    /// length prefix.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        let mut buf = vec![0u8; self.encoded_len()];
        let len = self.encode_into(&mut buf)?;
        buf.truncate(len);
        Ok(buf)
    }

    /// Decode a message from an inbound frame
    ///
    /// Trailing bytes after a complete message are ignored.
    ///
    /// # Errors
    ///
    /// Returns a [`FrameError`] for empty input, unknown or reserved opcodes,
    /// and any field that runs past the end of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.is_empty() {
            return Err(FrameError::Empty);
        }

        let mut r = FrameReader::new(bytes);
        let opcode = OpCode::try_from(r.read_u8()?)?;

        let msg = match opcode {
            OpCode::Default => Self::Default,
            OpCode::RequestId => Self::RequestId,
            OpCode::GetId => Self::GetId,
            OpCode::ServerLeft => Self::ServerLeft,
            OpCode::LeaveRoom => Self::LeaveRoom,
            OpCode::AuthenticationRequest => Self::AuthenticationRequest,
            OpCode::Authenticated => Self::Authenticated,
            OpCode::ServerConnectionData => Self::ServerConnectionData,
            OpCode::Heartbeat => Self::Heartbeat,
            OpCode::JoinServer => Self::JoinServer {
                host_id: r.read_string()?,
                use_direct_connect: r.read_bool()?,
                local_ip: r.read_string()?,
            },
            OpCode::SendData => Self::SendData {
                payload: r.read_bytes()?,
                target: r.read_i32()?,
            },
            OpCode::ServerJoined => Self::ServerJoined {
                client_id: r.read_i32()?,
            },
            OpCode::GetData => {
                let payload = r.read_bytes()?;
                let sender = if r.remaining() > 0 {
                    Some(r.read_i32()?)
                } else {
                    None
                };
                Self::GetData { payload, sender }
            }
            OpCode::CreateRoom => Self::CreateRoom(CreateRoom {
                max_players: r.read_i32()?,
                name: r.read_string()?,
                is_public: r.read_bool()?,
                extra_data: r.read_string()?,
                direct_connectable: r.read_bool()?,
                local_ip: r.read_string()?,
                use_nat_punch: r.read_bool()?,
                direct_port: r.read_i32()?,
                app_id: r.read_i32()?,
                version: r.read_string()?,
            }),
            OpCode::PlayerDisconnected => Self::PlayerDisconnected {
                client_id: r.read_i32()?,
            },
            OpCode::RoomCreated => Self::RoomCreated {
                room_id: r.read_string()?,
            },
            OpCode::KickPlayer => Self::KickPlayer {
                client_id: r.read_i32()?,
            },
            OpCode::AuthenticationResponse => Self::AuthenticationResponse {
                key: r.read_string()?,
            },
            OpCode::UpdateRoomData => Self::UpdateRoomData(RoomUpdate {
                name: read_optional(&mut r, FrameReader::read_string)?,
                data: read_optional(&mut r, FrameReader::read_string)?,
                is_public: read_optional(&mut r, FrameReader::read_bool)?,
                max_players: read_optional(&mut r, FrameReader::read_i32)?,
            }),
            OpCode::RequestNatConnection => Self::RequestNatConnection {
                nat_id: r.read_string()?,
                port: r.read_i32()?,
            },
            OpCode::DirectConnectIp => Self::DirectConnectIp {
                ip: r.read_string()?,
                port: r.read_i32()?,
                attempt_nat_punch: r.read_bool()?,
            },
        };

        Ok(msg)
    }
}
