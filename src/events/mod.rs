//! Events - What a session hands to registered handlers
//!
//! Every decoded server packet becomes an [`Event::Packet`]; the session adds
//! the synthetic [`Event::Connect`] and [`Event::Disconnect`] around them.

mod dispatcher;

pub use dispatcher::*;

use crate::protocol::{ResponseKind, ResponsePacket};

/// Something that happened on a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Handshake accepted
    Connect,
    /// Connection torn down
    Disconnect,
    /// A packet from the server
    Packet(ResponsePacket),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Connect => EventKind::Connect,
            Event::Disconnect => EventKind::Disconnect,
            Event::Packet(packet) => match packet.kind() {
                Some(kind) => EventKind::Packet(kind),
                None => EventKind::Unknown,
            },
        }
    }

    /// Get the packet, if this event carries one
    pub fn packet(&self) -> Option<&ResponsePacket> {
        match self {
            Event::Packet(packet) => Some(packet),
            _ => None,
        }
    }
}

impl From<ResponsePacket> for Event {
    fn from(packet: ResponsePacket) -> Self {
        Event::Packet(packet)
    }
}

/// Key that handlers register under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Disconnect,
    Packet(ResponseKind),
    /// Packets of a kind this client cannot decode
    Unknown,
}

impl From<ResponseKind> for EventKind {
    fn from(kind: ResponseKind) -> Self {
        EventKind::Packet(kind)
    }
}
