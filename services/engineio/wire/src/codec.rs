//! Encoding and decoding of packets for both transports.
//!
//! Polling bodies carry a batch of packets joined by the ASCII record
//! separator, with binary packets escaped as `b` + base64. WebSocket frames
//! carry exactly one packet each and binary data travels unescaped.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use tracing::trace;

use crate::packet::{Packet, PacketType};
use crate::PacketError;

/// Separator between packets of a polling payload
pub const SEPARATOR: char = '\u{1e}';

/// Marker for a base64 escaped binary packet inside a polling payload
pub const BINARY_PREFIX: char = 'b';

/// A single WebSocket data frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    /// Text frame
    Text(String),
    /// Binary frame
    Binary(Bytes),
}

/// Encode a single packet for a polling payload
pub fn encode_packet(packet: &Packet) -> String {
    match packet {
        Packet::Text { typ, payload } => {
            let mut out = String::with_capacity(1 + payload.as_ref().map_or(0, String::len));
            out.push(typ.as_char());
            if let Some(payload) = payload {
                out.push_str(payload);
            }
            out
        }
        Packet::Binary(data) => {
            let mut out = String::with_capacity(1 + data.len().div_ceil(3) * 4);
            out.push(BINARY_PREFIX);
            STANDARD.encode_string(data, &mut out);
            out
        }
    }
}

/// Encode a batch of packets into a polling payload
pub fn encode_payload(packets: &[Packet]) -> String {
    let mut out = String::new();
    for (i, packet) in packets.iter().enumerate() {
        if i > 0 {
            out.push(SEPARATOR);
        }
        out.push_str(&encode_packet(packet));
    }
    out
}

/// Decode a single packet from its textual form
pub fn decode_packet(data: &str) -> Result<Packet, PacketError> {
    let mut chars = data.chars();
    let tag = chars.next().ok_or(PacketError::InvalidPacketFormat)?;

    if tag == BINARY_PREFIX {
        let raw = STANDARD
            .decode(chars.as_str())
            .map_err(|_| PacketError::InvalidPacketFormat)?;
        return Ok(Packet::Binary(Bytes::from(raw)));
    }

    let typ = PacketType::try_from(tag)?;
    Ok(Packet::with_payload(typ, chars.as_str()))
}

/// Decode a polling payload into its packets.
///
/// Fails with [`PacketError::TooLargePacketSequence`] when the number of
/// segments reaches `max_payload`, before any segment is decoded.
pub fn decode_payload(data: Option<&str>, max_payload: usize) -> Result<Vec<Packet>, PacketError> {
    let data = match data {
        Some(data) if !data.is_empty() => data,
        _ => return Err(PacketError::InvalidPacketFormat),
    };

    let segments: Vec<&str> = data.split(SEPARATOR).collect();
    if segments.len() >= max_payload {
        trace!(
            "Rejecting payload with {} segments (max {})",
            segments.len(),
            max_payload
        );
        return Err(PacketError::TooLargePacketSequence);
    }

    segments.into_iter().map(decode_packet).collect()
}

/// Decode a WebSocket text frame, which must hold a text packet
pub fn decode_text_frame(data: &str) -> Result<Packet, PacketError> {
    match decode_packet(data)? {
        Packet::Binary(_) => Err(PacketError::InvalidPacketType),
        packet => Ok(packet),
    }
}

/// Decode a WebSocket binary frame
pub fn decode_binary_frame(data: Bytes) -> Packet {
    Packet::Binary(data)
}

/// Encode a packet as a WebSocket frame
pub fn encode_frame(packet: &Packet) -> WireFrame {
    match packet {
        Packet::Binary(data) => WireFrame::Binary(data.clone()),
        text => WireFrame::Text(encode_packet(text)),
    }
}
