//! Relay opcodes.
//!
//! The first byte of every relay message names its type and therefore its
//! field layout. Values are fixed for interoperability with deployed relays;
//! 15 and 16 are a reserved gap and must never be reassigned.

use crate::error::FrameError;

/// Single-byte message tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// No-op placeholder
    Default = 0,
    /// Ask the relay for an identifier
    RequestId = 1,
    /// Join a hosted room
    JoinServer = 2,
    /// Application payload towards the relay
    SendData = 3,
    /// Identifier reply
    GetId = 4,
    /// A peer joined (host) or our join succeeded (client)
    ServerJoined = 5,
    /// Application payload from the relay
    GetData = 6,
    /// Open a room
    CreateRoom = 7,
    /// The host closed the room we joined
    ServerLeft = 8,
    /// A member left the room we host
    PlayerDisconnected = 9,
    /// Room opened, carries the assigned id
    RoomCreated = 10,
    /// Leave the current room
    LeaveRoom = 11,
    /// Remove a member from our room
    KickPlayer = 12,
    /// Relay asks for the shared key
    AuthenticationRequest = 13,
    /// Shared key reply
    AuthenticationResponse = 14,
    /// Relay accepted our key
    Authenticated = 17,
    /// Partial room metadata update
    UpdateRoomData = 18,
    /// Connection data exchange
    ServerConnectionData = 19,
    /// Relay asks us to open a punch socket
    RequestNatConnection = 20,
    /// Relay advertises a peer's direct endpoint
    DirectConnectIp = 21,
    /// Keepalive
    Heartbeat = 200,
}

impl TryFrom<u8> for OpCode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Default),
            1 => Ok(Self::RequestId),
            2 => Ok(Self::JoinServer),
            3 => Ok(Self::SendData),
            4 => Ok(Self::GetId),
            5 => Ok(Self::ServerJoined),
            6 => Ok(Self::GetData),
            7 => Ok(Self::CreateRoom),
            8 => Ok(Self::ServerLeft),
            9 => Ok(Self::PlayerDisconnected),
            10 => Ok(Self::RoomCreated),
            11 => Ok(Self::LeaveRoom),
            12 => Ok(Self::KickPlayer),
            13 => Ok(Self::AuthenticationRequest),
            14 => Ok(Self::AuthenticationResponse),
            15 | 16 => Err(FrameError::ReservedOpCode(value)),
            17 => Ok(Self::Authenticated),
            18 => Ok(Self::UpdateRoomData),
            19 => Ok(Self::ServerConnectionData),
            20 => Ok(Self::RequestNatConnection),
            21 => Ok(Self::DirectConnectIp),
            200 => Ok(Self::Heartbeat),
            _ => Err(FrameError::UnknownOpCode(value)),
        }
    }
}

impl OpCode {
    /// Raw wire value
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Human-readable name for logs
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Default => "Default",
            Self::RequestId => "RequestID",
            Self::JoinServer => "JoinServer",
            Self::SendData => "SendData",
            Self::GetId => "GetID",
            Self::ServerJoined => "ServerJoined",
            Self::GetData => "GetData",
            Self::CreateRoom => "CreateRoom",
            Self::ServerLeft => "ServerLeft",
            Self::PlayerDisconnected => "PlayerDisconnected",
            Self::RoomCreated => "RoomCreated",
            Self::LeaveRoom => "LeaveRoom",
            Self::KickPlayer => "KickPlayer",
            Self::AuthenticationRequest => "AuthenticationRequest",
            Self::AuthenticationResponse => "AuthenticationResponse",
            Self::Authenticated => "Authenticated",
            Self::UpdateRoomData => "UpdateRoomData",
            Self::ServerConnectionData => "ServerConnectionData",
            Self::RequestNatConnection => "RequestNATConnection",
            Self::DirectConnectIp => "DirectConnectIP",
            Self::Heartbeat => "Heartbeat",
        }
    }
}
