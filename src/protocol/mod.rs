//! Protocol module - Defines the OpenTTD admin port wire protocol
//!
//! The protocol uses a simple little-endian binary format:
//! - 2 bytes frame length (covers the length bytes, the type byte and the payload)
//! - 1 byte packet type
//! - Variable length payload of fixed fields, strings NUL-terminated

mod codec;
mod date;
mod message;

pub use codec::*;
pub use date::*;
pub use message::*;

/// Default admin port of an OpenTTD server (not the game port)
pub const DEFAULT_ADMIN_PORT: u16 = 3977;

/// Size of the frame header: length(2) + type(1)
pub const FRAME_HEADER_SIZE: usize = 3;

/// Poll ID meaning "every client" / "every company"
pub const POLL_ALL: u32 = u32::MAX;

/// Company ID carried by clients that are spectating
pub const SPECTATOR_COMPANY: u8 = 255;

/// Highest protocol version that still reports company share owners
pub const SHARES_MAX_PROTOCOL_VERSION: u8 = 2;

/// Version string sent in the Join packet
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");
