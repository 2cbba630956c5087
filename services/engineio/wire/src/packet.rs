//! Packet types for the Engine.IO protocol.
//!
//! A packet is either a text packet, tagged with a single character type,
//! or an opaque binary payload.

use bytes::Bytes;

use crate::PacketError;

/// Packet types as defined in the wire protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Handshake open packet
    Open,
    /// Transport close request
    Close,
    /// Heartbeat or upgrade probe ping
    Ping,
    /// Heartbeat or upgrade probe pong
    Pong,
    /// Application data
    Message,
    /// Upgrade commit
    Upgrade,
    /// No-op, used to release a pending poll
    Noop,
}

impl PacketType {
    /// The single character tag used on the wire
    pub fn as_char(self) -> char {
        match self {
            PacketType::Open => '0',
            PacketType::Close => '1',
            PacketType::Ping => '2',
            PacketType::Pong => '3',
            PacketType::Message => '4',
            PacketType::Upgrade => '5',
            PacketType::Noop => '6',
        }
    }
}

impl TryFrom<char> for PacketType {
    type Error = PacketError;

    fn try_from(value: char) -> Result<Self, Self::Error> {
        match value {
            '0' => Ok(PacketType::Open),
            '1' => Ok(PacketType::Close),
            '2' => Ok(PacketType::Ping),
            '3' => Ok(PacketType::Pong),
            '4' => Ok(PacketType::Message),
            '5' => Ok(PacketType::Upgrade),
            '6' => Ok(PacketType::Noop),
            _ => Err(PacketError::InvalidPacketFormat),
        }
    }
}

/// A single protocol packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Typed text packet with an optional payload
    Text {
        /// Packet type tag
        typ: PacketType,
        /// Payload following the tag, `None` when empty
        payload: Option<String>,
    },
    /// Raw binary payload
    Binary(Bytes),
}

impl Packet {
    /// Text packet without payload
    pub fn text(typ: PacketType) -> Self {
        Packet::Text { typ, payload: None }
    }

    /// Text packet carrying a payload
    pub fn with_payload(typ: PacketType, payload: impl Into<String>) -> Self {
        let payload = payload.into();
        Packet::Text {
            typ,
            payload: (!payload.is_empty()).then_some(payload),
        }
    }

    /// `message` packet carrying application text
    pub fn message(payload: impl Into<String>) -> Self {
        Self::with_payload(PacketType::Message, payload)
    }

    /// Binary packet
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Packet::Binary(data.into())
    }

    /// Type tag of a text packet, `None` for binary packets
    pub fn packet_type(&self) -> Option<PacketType> {
        match self {
            Packet::Text { typ, .. } => Some(*typ),
            Packet::Binary(_) => None,
        }
    }

    /// Whether this is a text packet of the given type
    pub fn is(&self, typ: PacketType) -> bool {
        self.packet_type() == Some(typ)
    }

    /// Text payload, if any
    pub fn payload(&self) -> Option<&str> {
        match self {
            Packet::Text { payload, .. } => payload.as_deref(),
            Packet::Binary(_) => None,
        }
    }
}
