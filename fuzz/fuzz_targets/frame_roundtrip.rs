//! Fuzz target for relay frame encoding
//!
//! Every encodable message must decode back to itself.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use relink_proto::{CreateRoom, RelayMessage, RoomUpdate};

#[derive(Debug, Arbitrary)]
enum Input {
    Join(String, bool, String),
    Send(Vec<u8>, i32),
    Data(Vec<u8>, Option<i32>),
    Create(i32, String, bool, String, i32),
    Update(Option<String>, Option<String>, Option<bool>, Option<i32>),
    Nat(String, i32),
    Direct(String, i32, bool),
}

impl From<Input> for RelayMessage {
    fn from(input: Input) -> Self {
        match input {
            Input::Join(host_id, use_direct_connect, local_ip) => Self::JoinServer {
                host_id,
                use_direct_connect,
                local_ip,
            },
            Input::Send(payload, target) => Self::SendData { payload, target },
            Input::Data(payload, sender) => Self::GetData { payload, sender },
            Input::Create(max_players, name, is_public, version, direct_port) => {
                Self::CreateRoom(CreateRoom {
                    max_players,
                    name,
                    is_public,
                    direct_port,
                    version,
                    ..CreateRoom::default()
                })
            }
            Input::Update(name, data, is_public, max_players) => Self::UpdateRoomData(RoomUpdate {
                name,
                data,
                is_public,
                max_players,
            }),
            Input::Nat(nat_id, port) => Self::RequestNatConnection { nat_id, port },
            Input::Direct(ip, port, attempt_nat_punch) => Self::DirectConnectIp {
                ip,
                port,
                attempt_nat_punch,
            },
        }
    }
}

fuzz_target!(|input: Input| {
    let message = RelayMessage::from(input);
    if let Ok(bytes) = message.to_bytes() {
        assert_eq!(RelayMessage::from_bytes(&bytes).ok(), Some(message));
    }
});
