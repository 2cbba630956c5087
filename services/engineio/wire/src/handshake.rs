//! Handshake body, transport names and protocol versions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::packet::PacketType;
use crate::PacketError;

/// Transport carrying a session, ordered by upgrade preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    /// HTTP long-polling
    Polling,
    /// WebSocket
    Websocket,
}

impl TransportType {
    /// All transports, lowest first
    pub const ALL: [TransportType; 2] = [TransportType::Polling, TransportType::Websocket];

    /// Query string name of the transport
    pub fn as_str(self) -> &'static str {
        match self {
            TransportType::Polling => "polling",
            TransportType::Websocket => "websocket",
        }
    }

    /// Transports a session opened on `from` may upgrade to
    pub fn upgrades_from(from: TransportType) -> Vec<TransportType> {
        Self::ALL.into_iter().filter(|t| *t > from).collect()
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportType {
    type Err = PacketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "polling" => Ok(TransportType::Polling),
            "websocket" => Ok(TransportType::Websocket),
            _ => Err(PacketError::InvalidPacketFormat),
        }
    }
}

/// Engine.IO protocol revision announced by the client in `EIO`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ProtocolVersion {
    /// Legacy revision 2
    V2 = 2,
    /// Legacy revision 3
    V3 = 3,
    /// Current revision
    V4 = 4,
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(ProtocolVersion::V2),
            3 => Ok(ProtocolVersion::V3),
            4 => Ok(ProtocolVersion::V4),
            _ => Err(PacketError::InvalidPacketFormat),
        }
    }
}

/// Payload of the `open` packet that answers a new connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeResponse {
    /// Session id
    pub sid: String,
    /// Transports the client may upgrade to
    pub upgrades: Vec<TransportType>,
    /// Heartbeat interval in milliseconds
    pub ping_interval: u64,
    /// Heartbeat timeout in milliseconds
    pub ping_timeout: u64,
    /// Maximum number of packets accepted per payload
    pub max_payload: u64,
}

impl HandshakeResponse {
    /// JSON payload without the packet type
    pub fn to_json(&self) -> String {
        // Only strings, integers and enum names; serialization cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Full `open` packet: type char followed by the JSON payload
    pub fn build_body(&self) -> String {
        let mut body = String::new();
        body.push(PacketType::Open.as_char());
        body.push_str(&self.to_json());
        body
    }

    /// Parse an `open` packet body
    pub fn parse_body(body: &str) -> Result<Self, PacketError> {
        let json = body
            .strip_prefix(PacketType::Open.as_char())
            .ok_or(PacketError::InvalidPacketFormat)?;
        serde_json::from_str(json).map_err(|_| PacketError::InvalidPacketFormat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upgrades_from() {
        assert_eq!(
            TransportType::upgrades_from(TransportType::Polling),
            vec![TransportType::Websocket]
        );
        assert!(TransportType::upgrades_from(TransportType::Websocket).is_empty());
        assert_eq!("websocket".parse::<TransportType>().unwrap(), TransportType::Websocket);
        assert!("flashsocket".parse::<TransportType>().is_err());
    }

    #[test]
    fn test_handshake_body() {
        let response = HandshakeResponse {
            sid: "abc".to_string(),
            upgrades: vec![TransportType::Websocket],
            ping_interval: 3000,
            ping_timeout: 2000,
            max_payload: 1_000_000,
        };

        let body = response.build_body();
        assert_eq!(
            body,
            r#"0{"sid":"abc","upgrades":["websocket"],"pingInterval":3000,"pingTimeout":2000,"maxPayload":1000000}"#
        );
        assert_eq!(HandshakeResponse::parse_body(&body).unwrap(), response);
        assert!(HandshakeResponse::parse_body("4{}").is_err());
    }

    #[test]
    fn test_protocol_version() {
        assert_eq!(ProtocolVersion::try_from(4).unwrap(), ProtocolVersion::V4);
        assert_eq!(ProtocolVersion::V3 as u8, 3);
        assert!(ProtocolVersion::try_from(5).is_err());
    }
}
