//! Test doubles for the session's collaborators.

pub mod mock_relay;

pub use mock_relay::{
    DirectCall, DirectLog, MockDirect, MockRoomSource, RecordingTransport, SourceLog,
    authenticate, authenticated_session, frame, sent_messages,
};
