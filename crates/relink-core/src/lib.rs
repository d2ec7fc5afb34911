//! # Relink Core
//!
//! Relay session engine: lets peers that cannot reach each other exchange
//! traffic through a relay server, upgrading to a direct path through NAT
//! hole punching when possible.
//!
//! This crate provides:
//! - The relay session state machine (connect, authenticate, host or join)
//! - Bijective connection registries (relay id ↔ local handle)
//! - NAT punch-through coordination and loopback socket proxies
//! - Idle eviction for server-side proxies
//! - A cached room directory
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Session                                │
//! │   (relay link state, role, heartbeat, event queue)              │
//! ├──────────────────────┬──────────────────────┬───────────────────┤
//! │  ConnectionRegistry  │   PunchCoordinator   │   RoomDirectory   │
//! │  (relayed / direct)  │ (punch socket, proxy │   (room cache)    │
//! │                      │  table + liveness)   │                   │
//! ├──────────────────────┴──────────────────────┴───────────────────┤
//! │  RelayTransport   │   DirectConnect   │   RoomListSource        │
//! │  (collaborators supplied by the embedding application)          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The session is sans-IO apart from the punch sockets: the caller feeds it
//! transport events and ticks it with [`Session::early_update`] and
//! [`Session::late_update`]. Punch sockets need a Tokio runtime.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod join;
pub mod liveness;
pub mod proxy;
pub mod punch;
pub mod registry;
pub mod rooms;
pub mod session;
pub mod transport;

pub use config::SessionConfig;
pub use error::{PunchError, RegistryError, SessionError, TransportError};
pub use join::{JoinSequence, JoinStep, RelayLookup};
pub use liveness::{LivenessTracker, PROXY_TIMEOUT, Proxy, ProxyTable};
pub use proxy::{ProxyKey, SocketProxy};
pub use punch::{PunchCoordinator, PunchEvent, PunchRole};
pub use registry::{ConnectionId, ConnectionRegistry, RemoteId};
pub use rooms::RoomDirectory;
pub use session::{ConnectionState, Role, Session, SessionEvent};
pub use transport::{
    DirectConnect, DirectEvent, DirectoryEndpoint, RelayTransport, RoomListSource, TransportEvent,
};

pub use relink_proto as proto;
