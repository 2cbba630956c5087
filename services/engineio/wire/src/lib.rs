//! Wire protocol packets, payload encoding/decoding and handshake body for Engine.IO.
//!
//! This crate provides the stateless part of the Engine.IO protocol: the packet
//! sum type, the batched polling payload codec, the WebSocket frame codec and
//! the handshake response sent when a session is opened.
//!
//! ## Wire Format
//!
//! ```text
//! text packet      <type char><payload>          e.g. "4hello", "2probe", "6"
//! binary packet    b<base64>   (polling only)    e.g. "bAQID"
//! polling payload  packet \x1e packet \x1e ...
//! websocket        text frame = text packet, binary frame = raw bytes
//! ```
//!
//! Type characters: `0` open, `1` close, `2` ping, `3` pong, `4` message,
//! `5` upgrade, `6` noop.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod handshake;
pub mod packet;

// Re-export main types
pub use codec::{
    decode_binary_frame, decode_packet, decode_payload, decode_text_frame, encode_frame,
    encode_packet, encode_payload, WireFrame, BINARY_PREFIX, SEPARATOR,
};
pub use error::PacketError;
pub use handshake::{HandshakeResponse, ProtocolVersion, TransportType};
pub use packet::{Packet, PacketType};
