//! openttd-admin - Client for the OpenTTD admin port
//!
//! Connects to a game server's admin port, keeps the session alive, streams
//! server events to registered handlers and maintains a live view of the
//! clients and companies on the server.

pub mod config;
pub mod events;
pub mod network;
pub mod protocol;
pub mod rcon;
pub mod state;

pub use events::{Event, EventKind, Subscription};
pub use network::{scrape, Session, SessionConfig, SessionError, SessionResult};
pub use protocol::{RequestPacket, ResponseKind, ResponsePacket, UpdateFrequency, UpdateType};
pub use state::{ServerState, StateCache};
