//! Property-based tests for relink
//!
//! Uses proptest to verify invariants across large input spaces.

use proptest::prelude::*;

// ============================================================================
// Frame Codec Properties
// ============================================================================

mod codec_properties {
    use super::*;
    use relink_proto::{CreateRoom, RelayMessage, RoomUpdate, SendBuffer};

    fn message() -> impl Strategy<Value = RelayMessage> {
        prop_oneof![
            (".{0,40}", any::<bool>(), "[0-9.]{0,15}").prop_map(
                |(host_id, use_direct_connect, local_ip)| RelayMessage::JoinServer {
                    host_id,
                    use_direct_connect,
                    local_ip,
                }
            ),
            (prop::collection::vec(any::<u8>(), 0..512), any::<i32>())
                .prop_map(|(payload, target)| RelayMessage::SendData { payload, target }),
            (
                prop::collection::vec(any::<u8>(), 0..512),
                proptest::option::of(any::<i32>())
            )
                .prop_map(|(payload, sender)| RelayMessage::GetData { payload, sender }),
            (any::<i32>(), ".{0,32}", any::<bool>(), any::<i32>()).prop_map(
                |(max_players, name, is_public, direct_port)| {
                    RelayMessage::CreateRoom(CreateRoom {
                        max_players,
                        name,
                        is_public,
                        direct_port,
                        ..CreateRoom::default()
                    })
                }
            ),
            (
                proptest::option::of(".{0,16}"),
                proptest::option::of(any::<bool>()),
                proptest::option::of(any::<i32>())
            )
                .prop_map(|(name, is_public, max_players)| {
                    RelayMessage::UpdateRoomData(RoomUpdate {
                        name,
                        data: None,
                        is_public,
                        max_players,
                    })
                }),
            (".{0,24}", any::<i32>())
                .prop_map(|(nat_id, port)| RelayMessage::RequestNatConnection { nat_id, port }),
            Just(RelayMessage::Heartbeat),
        ]
    }

    proptest! {
        /// Encoding then decoding yields the original message
        #[test]
        fn message_roundtrip(msg in message()) {
            let bytes = msg.to_bytes().unwrap();
            prop_assert_eq!(bytes.len(), msg.encoded_len());
            prop_assert_eq!(RelayMessage::from_bytes(&bytes).unwrap(), msg);
        }

        /// The session send buffer produces the same bytes as `to_bytes`
        #[test]
        fn send_buffer_matches_to_bytes(msg in message()) {
            let mut buffer = SendBuffer::for_packet_size(1200);
            let capacity = buffer.capacity();
            let expected = msg.to_bytes().unwrap();
            match buffer.encode(&msg) {
                Ok(frame) => prop_assert_eq!(frame, &expected[..]),
                Err(_) => prop_assert!(expected.len() > capacity),
            }
        }

        /// Decoding arbitrary bytes never panics
        #[test]
        fn decode_arbitrary_bytes(data in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = RelayMessage::from_bytes(&data);
        }

        /// Every strict prefix of a payload-carrying frame is rejected
        #[test]
        fn truncated_frames_rejected(
            payload in prop::collection::vec(any::<u8>(), 1..64),
            target in any::<i32>(),
            cut in 0usize..64,
        ) {
            let bytes = RelayMessage::SendData { payload, target }.to_bytes().unwrap();
            let cut = cut % bytes.len();
            prop_assert!(RelayMessage::from_bytes(&bytes[..cut]).is_err());
        }
    }
}

// ============================================================================
// Connection Registry Properties
// ============================================================================

mod registry_properties {
    use super::*;
    use relink_core::ConnectionRegistry;

    #[derive(Debug, Clone)]
    enum Op {
        Add(i32, i32),
        RemoveRemote(i32),
        RemoveLocal(i32),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0i32..16, 0i32..16).prop_map(|(r, l)| Op::Add(r, l)),
            (0i32..16).prop_map(Op::RemoveRemote),
            (0i32..16).prop_map(Op::RemoveLocal),
        ]
    }

    proptest! {
        /// Any sequence of operations keeps both directions consistent
        #[test]
        fn stays_bijective(ops in prop::collection::vec(op(), 0..64)) {
            let mut registry = ConnectionRegistry::new();

            for op in ops {
                match op {
                    Op::Add(remote, local) => {
                        let before = registry.len();
                        match registry.add(remote, local) {
                            Ok(()) => prop_assert_eq!(registry.len(), before + 1),
                            Err(_) => prop_assert_eq!(registry.len(), before),
                        }
                    }
                    Op::RemoveRemote(remote) => {
                        if let Some(local) = registry.remove_by_remote(remote) {
                            prop_assert_eq!(registry.lookup_by_local(local), None);
                        }
                    }
                    Op::RemoveLocal(local) => {
                        if let Some(remote) = registry.remove_by_local(local) {
                            prop_assert_eq!(registry.lookup_by_remote(remote), None);
                        }
                    }
                }

                for remote in registry.all_remote_ids() {
                    let local = registry.lookup_by_remote(remote).unwrap();
                    prop_assert_eq!(registry.lookup_by_local(local), Some(remote));
                }
            }
        }
    }
}

// ============================================================================
// Liveness Properties
// ============================================================================

mod liveness_properties {
    use super::*;
    use relink_core::LivenessTracker;
    use std::time::{Duration, Instant};

    proptest! {
        /// A sweep removes exactly the keys idle for longer than the timeout
        #[test]
        fn sweep_partitions_by_idle_time(
            ages in prop::collection::vec(0u64..60, 1..32),
            timeout_secs in 1u64..45,
        ) {
            let start = Instant::now();
            let now = start + Duration::from_secs(60);
            let timeout = Duration::from_secs(timeout_secs);
            let mut tracker = LivenessTracker::new();

            for (key, age) in ages.iter().enumerate() {
                tracker.touch(key, now - Duration::from_secs(*age));
            }

            let mut expired = tracker.sweep(now, timeout);
            expired.sort_unstable();

            let expected: Vec<usize> = ages
                .iter()
                .enumerate()
                .filter(|(_, age)| Duration::from_secs(**age) > timeout)
                .map(|(key, _)| key)
                .collect();

            prop_assert_eq!(&expired, &expected);
            prop_assert_eq!(tracker.len(), ages.len() - expected.len());
            for key in expected {
                prop_assert!(!tracker.contains(&key));
            }
        }
    }
}
