//! Error types for the relink session engine.

use relink_proto::FrameError;
use std::io;
use thiserror::Error;

/// Session-level errors
#[derive(Debug, Error)]
pub enum SessionError {
    /// Caller invoked an operation the current state forbids
    #[error("contract violation: {0}")]
    ContractViolation(&'static str),

    /// No relay link is up
    #[error("not connected to relay")]
    NotConnected,

    /// Local connection handle is not registered
    #[error("unknown connection: {0}")]
    UnknownConnection(i32),

    /// Outbound frame could not be encoded
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Underlying relay transport failed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Relay transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error from underlying transport
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Transport is closed
    #[error("transport is closed")]
    Closed,

    /// Connection failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Transport-specific error
    #[error("transport error: {0}")]
    Other(String),
}

/// Connection registry errors
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// Remote identifier already mapped
    #[error("remote id {0} already registered")]
    RemoteInUse(i32),

    /// Local handle already mapped
    #[error("local handle {0} already registered")]
    LocalInUse(i32),
}

/// NAT punch-through errors
#[derive(Debug, Error)]
pub enum PunchError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Every bind attempt in the punch port range failed
    #[error("no free punch port after {0} attempts")]
    NoFreePort(usize),

    /// Relay host did not resolve
    #[error("failed to resolve {0}")]
    Resolve(String),

    /// No local IPv4 address is known
    #[error("no local address for punch socket")]
    NoLocalAddress,

    /// Punch sockets are driven by a Tokio runtime and none is running
    #[error("no Tokio runtime available for punch socket")]
    NoRuntime,

    /// Punch payload could not be encoded
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}
