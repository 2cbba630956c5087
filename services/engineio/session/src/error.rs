//! Engine error and disconnect reason types.

use engineio_wire::PacketError;
use std::fmt;
use thiserror::Error;

/// Errors rejecting a transport request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Packet codec failure
    #[error(transparent)]
    Packet(#[from] PacketError),

    /// No session with the requested id
    #[error("unknown session id")]
    UnknownSession,

    /// Session already closed
    #[error("session closed")]
    SessionClosed,

    /// Session silent for too long
    #[error("session timed out")]
    SessionTimedOut,

    /// A poll request was already pending for the session
    #[error("duplicate poll request")]
    DuplicatePoll,

    /// Session was upgraded to WebSocket and no longer polls
    #[error("polling declined")]
    PollingDeclined,

    /// `EIO` version not accepted
    #[error("unsupported engine version")]
    UnsupportedVersion,

    /// Missing or malformed query parameters
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Refused by the request gating hook
    #[error("request rejected: {0}")]
    RequestRejected(String),
}

/// Why a session was removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// No reaction within the heartbeat window
    PingTimeout,
    /// Closed by the client, the peer socket or the application
    Forcefully,
    /// Undecodable data received
    InvalidPacket,
    /// Request against a session that was already closed
    InvalidSession,
    /// Concurrent poll requests
    InvalidState,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DisconnectReason::PingTimeout => "ping_timeout",
            DisconnectReason::Forcefully => "forcefully",
            DisconnectReason::InvalidPacket => "invalid_packet",
            DisconnectReason::InvalidSession => "invalid_session",
            DisconnectReason::InvalidState => "invalid_state",
        };
        f.write_str(name)
    }
}
