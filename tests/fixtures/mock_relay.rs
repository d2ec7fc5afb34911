//! In-memory relay, direct-connect module and room source.
//!
//! The transport is owned by the session and inspected through
//! `Session::transport`; the direct module and room source are boxed, so
//! they record into shared logs the test keeps a handle to.
//!
//! # Example
//!
//! ```no_run
//! use relink_core::SessionConfig;
//! use relink_integration_tests::fixtures::{authenticated_session, sent_messages};
//! use std::time::Instant;
//!
//! let mut session = authenticated_session(SessionConfig::default(), Instant::now());
//! session.start_server().unwrap();
//! assert_eq!(sent_messages(&session).len(), 1);
//! ```

use relink_core::{
    DirectConnect, DirectoryEndpoint, RelayTransport, RoomListSource, Session, SessionConfig,
    TransportError, TransportEvent,
};
use relink_proto::{RelayMessage, Region};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Relay transport that records every call
#[derive(Debug)]
pub struct RecordingTransport {
    /// Connect targets, in order
    pub connects: Vec<(String, u16)>,
    /// Frames sent, in order
    pub sent: Vec<Vec<u8>>,
    /// Caller-initiated disconnects
    pub disconnects: usize,
    /// Shutdown calls
    pub shutdowns: usize,
    /// Refuse connect attempts
    pub fail_connect: bool,
    /// Reported packet size
    pub max_packet_size: usize,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self {
            connects: Vec::new(),
            sent: Vec::new(),
            disconnects: 0,
            shutdowns: 0,
            fail_connect: false,
            max_packet_size: 1200,
        }
    }
}

impl RelayTransport for RecordingTransport {
    fn connect(&mut self, address: &str, port: u16) -> Result<(), TransportError> {
        if self.fail_connect {
            return Err(TransportError::ConnectionFailed(format!("{address}:{port}")));
        }
        self.connects.push((address.to_string(), port));
        Ok(())
    }

    fn disconnect(&mut self) {
        self.disconnects += 1;
    }

    fn send(&mut self, frame: &[u8], _channel: u8) -> Result<(), TransportError> {
        self.sent.push(frame.to_vec());
        Ok(())
    }

    fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    fn shutdown(&mut self) {
        self.shutdowns += 1;
    }
}

/// One call made on a [`MockDirect`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectCall {
    /// `start_server`
    StartServer(Option<u16>),
    /// `stop_server`
    StopServer,
    /// `join_server`
    JoinServer(String, u16),
    /// `client_disconnect`
    ClientDisconnect,
    /// `kick`
    Kick(i32),
    /// `server_send`
    ServerSend(i32, Vec<u8>),
    /// `client_send`
    ClientSend(Vec<u8>),
}

/// Shared record of direct-module calls
pub type DirectLog = Arc<Mutex<Vec<DirectCall>>>;

/// Direct-connect module that records every call
#[derive(Debug, Clone)]
pub struct MockDirect {
    log: DirectLog,
    supports_punch: bool,
    port: u16,
}

impl MockDirect {
    /// Create a module and the log it writes to
    pub fn new(supports_punch: bool, port: u16) -> (Self, DirectLog) {
        let log = DirectLog::default();
        let direct = Self {
            log: Arc::clone(&log),
            supports_punch,
            port,
        };
        (direct, log)
    }

    fn record(&self, call: DirectCall) {
        self.log.lock().unwrap().push(call);
    }
}

impl DirectConnect for MockDirect {
    fn start_server(&mut self, port: Option<u16>) {
        self.record(DirectCall::StartServer(port));
    }

    fn stop_server(&mut self) {
        self.record(DirectCall::StopServer);
    }

    fn join_server(&mut self, ip: &str, port: u16) {
        self.record(DirectCall::JoinServer(ip.to_string(), port));
    }

    fn client_disconnect(&mut self) {
        self.record(DirectCall::ClientDisconnect);
    }

    fn kick(&mut self, direct_id: i32) {
        self.record(DirectCall::Kick(direct_id));
    }

    fn server_send(&mut self, direct_id: i32, data: &[u8], _channel: u8) {
        self.record(DirectCall::ServerSend(direct_id, data.to_vec()));
    }

    fn client_send(&mut self, data: &[u8], _channel: u8) {
        self.record(DirectCall::ClientSend(data.to_vec()));
    }

    fn supports_nat_punch(&self) -> bool {
        self.supports_punch
    }

    fn transport_port(&self) -> u16 {
        self.port
    }
}

/// Requests seen by a [`MockRoomSource`]
#[derive(Debug, Default)]
pub struct SourceLog {
    /// Room list requests
    pub room_requests: Vec<DirectoryEndpoint>,
    /// Best-relay requests
    pub relay_requests: Vec<(DirectoryEndpoint, Region)>,
}

/// Room source that only records requests; tests deliver the replies
#[derive(Debug, Clone, Default)]
pub struct MockRoomSource {
    log: Arc<Mutex<SourceLog>>,
}

impl MockRoomSource {
    /// Create a source and the log it writes to
    pub fn new() -> (Self, Arc<Mutex<SourceLog>>) {
        let source = Self::default();
        let log = Arc::clone(&source.log);
        (source, log)
    }
}

impl RoomListSource for MockRoomSource {
    fn request_rooms(&mut self, endpoint: &DirectoryEndpoint) {
        self.log.lock().unwrap().room_requests.push(endpoint.clone());
    }

    fn request_best_relay(&mut self, endpoint: &DirectoryEndpoint, region: Region) {
        self.log
            .lock()
            .unwrap()
            .relay_requests
            .push((endpoint.clone(), region));
    }
}

/// Encode a relay message as an inbound frame
pub fn frame(message: RelayMessage) -> Vec<u8> {
    message.to_bytes().unwrap()
}

/// Decode every frame the session has sent
pub fn sent_messages(session: &Session<RecordingTransport>) -> Vec<RelayMessage> {
    session
        .transport()
        .sent
        .iter()
        .map(|bytes| RelayMessage::from_bytes(bytes).unwrap())
        .collect()
}

/// Drive a fresh session through connect and authentication.
///
/// Events and sent frames produced on the way are discarded.
pub fn authenticated_session(config: SessionConfig, now: Instant) -> Session<RecordingTransport> {
    authenticate(Session::new(config, RecordingTransport::default()), now)
}

/// Drive an already configured session through connect and authentication
pub fn authenticate(
    mut session: Session<RecordingTransport>,
    now: Instant,
) -> Session<RecordingTransport> {
    session.start(now).unwrap();
    session.handle_transport_event(TransportEvent::Connected, now);
    session.handle_frame(&frame(RelayMessage::AuthenticationRequest), 0, now);
    session.handle_frame(&frame(RelayMessage::Authenticated), 0, now);
    session.drain_events().for_each(drop);
    session.transport_mut().sent.clear();
    session
}
