//! Resumable multi-step handshakes.
//!
//! Both sequences here are plain state machines with a deadline. The session
//! resumes them from exactly one place each: [`JoinSequence::on_authenticated`]
//! when the relay authenticates us, [`RelayLookup`] when the best-relay answer
//! is delivered. Either one is polled on every tick for its deadline.

use relink_proto::{Region, Room};
use std::time::{Duration, Instant};

/// What the session must do next for a pending join
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinStep {
    /// Send `JoinServer` on the current relay now
    SendJoin,
    /// Reconnect to another relay, then wait for authentication
    SwitchRelay {
        /// Relay host
        address: String,
        /// Relay transport port
        port: u16,
    },
    /// Nothing to do yet
    Wait,
    /// The deadline passed
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinStage {
    AwaitingAuthentication,
    Done,
}

/// Load-balanced join: switch to the room's relay, await authentication, join
#[derive(Debug, Clone)]
pub struct JoinSequence {
    host_id: String,
    stage: JoinStage,
    deadline: Instant,
}

impl JoinSequence {
    /// Plan a join for `host_id`.
    ///
    /// Returns `None` with [`JoinStep::SendJoin`] when the room lives on the
    /// current relay (or is unknown), otherwise a pending sequence with
    /// [`JoinStep::SwitchRelay`].
    #[must_use]
    pub fn begin(
        host_id: &str,
        room: Option<&Room>,
        current_address: &str,
        current_port: u16,
        now: Instant,
        timeout: Duration,
    ) -> (Option<Self>, JoinStep) {
        let Some(room) = room else {
            return (None, JoinStep::SendJoin);
        };

        let relay = &room.relay_info;
        if relay.address.is_empty() || relay.same_relay(current_address, current_port) {
            return (None, JoinStep::SendJoin);
        }

        let sequence = Self {
            host_id: host_id.to_string(),
            stage: JoinStage::AwaitingAuthentication,
            deadline: now + timeout,
        };
        let step = JoinStep::SwitchRelay {
            address: relay.address.clone(),
            port: relay.port,
        };
        (Some(sequence), step)
    }

    /// Room being joined
    #[must_use]
    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    /// True once the join has been sent
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.stage == JoinStage::Done
    }

    /// Resume after the new relay authenticated us
    pub fn on_authenticated(&mut self) -> JoinStep {
        match self.stage {
            JoinStage::AwaitingAuthentication => {
                self.stage = JoinStage::Done;
                JoinStep::SendJoin
            }
            JoinStage::Done => JoinStep::Wait,
        }
    }

    /// Check the deadline
    #[must_use]
    pub fn poll(&self, now: Instant) -> JoinStep {
        if self.stage == JoinStage::AwaitingAuthentication && now >= self.deadline {
            JoinStep::TimedOut
        } else {
            JoinStep::Wait
        }
    }
}

/// Pending best-relay request to a load balancer
#[derive(Debug, Clone, Copy)]
pub struct RelayLookup {
    region: Region,
    deadline: Instant,
}

impl RelayLookup {
    /// Start waiting for an answer
    #[must_use]
    pub fn begin(region: Region, now: Instant, timeout: Duration) -> Self {
        Self {
            region,
            deadline: now + timeout,
        }
    }

    /// Region that was asked for
    #[must_use]
    pub fn region(&self) -> Region {
        self.region
    }

    /// True once the deadline passed
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relink_proto::RelayAddress;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn room_on(address: &str, port: u16) -> Room {
        Room {
            server_id: "abc123".to_string(),
            relay_info: RelayAddress {
                port,
                endpoint_port: 8080,
                address: address.to_string(),
                ..RelayAddress::default()
            },
            ..Room::default()
        }
    }

    #[test]
    fn test_same_relay_joins_immediately() {
        let room = room_on("relay-a", 7777);
        let (sequence, step) =
            JoinSequence::begin("abc123", Some(&room), "relay-a", 7777, Instant::now(), TIMEOUT);
        assert!(sequence.is_none());
        assert_eq!(step, JoinStep::SendJoin);
    }

    #[test]
    fn test_unknown_room_joins_immediately() {
        let (sequence, step) =
            JoinSequence::begin("zzz", None, "relay-a", 7777, Instant::now(), TIMEOUT);
        assert!(sequence.is_none());
        assert_eq!(step, JoinStep::SendJoin);
    }

    #[test]
    fn test_other_relay_switches_then_joins() {
        let room = room_on("relay-b", 7778);
        let now = Instant::now();
        let (sequence, step) =
            JoinSequence::begin("abc123", Some(&room), "relay-a", 7777, now, TIMEOUT);
        let mut sequence = sequence.unwrap();

        assert_eq!(
            step,
            JoinStep::SwitchRelay {
                address: "relay-b".to_string(),
                port: 7778
            }
        );
        assert_eq!(sequence.poll(now + Duration::from_secs(1)), JoinStep::Wait);
        assert_eq!(sequence.on_authenticated(), JoinStep::SendJoin);
        assert!(sequence.is_done());
        assert_eq!(sequence.on_authenticated(), JoinStep::Wait);
        assert_eq!(sequence.poll(now + TIMEOUT * 2), JoinStep::Wait);
    }

    #[test]
    fn test_join_deadline() {
        let room = room_on("relay-b", 7777);
        let now = Instant::now();
        let (sequence, _) =
            JoinSequence::begin("abc123", Some(&room), "relay-a", 7777, now, TIMEOUT);
        assert_eq!(sequence.unwrap().poll(now + TIMEOUT), JoinStep::TimedOut);
    }

    #[test]
    fn test_relay_lookup_deadline() {
        let now = Instant::now();
        let lookup = RelayLookup::begin(Region::Europe, now, TIMEOUT);
        assert_eq!(lookup.region(), Region::Europe);
        assert!(!lookup.is_expired(now + Duration::from_secs(9)));
        assert!(lookup.is_expired(now + TIMEOUT));
    }
}
