//! # Relink Protocol
//!
//! Wire protocol spoken between a relink session and a relay server.
//!
//! This crate provides:
//! - Opcode definitions (single-byte message tags, fixed values)
//! - A bounded field reader/writer (no read ever passes the buffer end)
//! - Typed relay messages with exact per-opcode field layouts
//! - The room directory model published by relays as JSON
//!
//! ## Frame layout
//!
//! ```text
//! ┌────────┬──────────────────────────────────────────────┐
//! │ opcode │ fields, in the fixed order for that opcode    │
//! │ 1 byte │ int = i32 LE, bool = 1 byte,                  │
//! │        │ string / bytes = i32 LE length + content      │
//! └────────┴──────────────────────────────────────────────┘
//! ```
//!
//! There is no version negotiation: both ends must agree on the layouts.
//!
//! ## Example
//!
//! ```rust
//! use relink_proto::{RelayMessage, SendBuffer};
//!
//! let mut buffer = SendBuffer::for_packet_size(1200);
//! let frame = buffer
//!     .encode(&RelayMessage::KickPlayer { client_id: 4 })
//!     .unwrap();
//! assert_eq!(RelayMessage::from_bytes(frame).unwrap(), RelayMessage::KickPlayer { client_id: 4 });
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod error;
pub mod message;
pub mod opcode;
pub mod room;

pub use buffer::{FrameReader, FrameWriter, SendBuffer};
pub use error::FrameError;
pub use message::{CreateRoom, RelayMessage, RoomUpdate};
pub use opcode::OpCode;
pub use room::{RelayAddress, Region, Room};

/// Local loopback address used for direct-connect proxies
pub const LOCALHOST: &str = "127.0.0.1";
