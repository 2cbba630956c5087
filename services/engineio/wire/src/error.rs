//! Wire protocol error types.

use thiserror::Error;

/// Packet codec errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    /// Absent, empty or otherwise malformed packet data
    #[error("invalid packet format")]
    InvalidPacketFormat,

    /// Polling payload carries too many packets
    #[error("too large packet sequence")]
    TooLargePacketSequence,

    /// Packet kind not allowed where it was found
    #[error("invalid packet type")]
    InvalidPacketType,
}
