//! Session lifecycle states.
//!
//! States compare by a coarse rank rather than structurally:
//!
//! ```text
//! closed (0) < opening (1) < idle = heartbeat(*) (2) < upgrading(*) (3)
//! ```
//!
//! So `Idle == Heartbeat(WaitingForPong)` holds, and a pong is accepted
//! from an idle session as well. Use `match` when the exact sub-state
//! matters.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Phase of a heartbeat exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeartbeatState {
    /// A ping should go out with the next response
    SendingPing,
    /// A ping went out, the pong is outstanding
    WaitingForPong,
    /// A pong should go out with the next response
    SendingPong,
}

/// Phase of a polling to WebSocket upgrade
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UpgradingState {
    /// Socket attached, no probe seen yet
    WaitingForPing,
    /// Probe answered
    SendingPong,
    /// Upgrade complete
    Finished,
}

impl UpgradingState {
    const ALL: [UpgradingState; 3] = [
        UpgradingState::WaitingForPing,
        UpgradingState::SendingPong,
        UpgradingState::Finished,
    ];

    /// Next phase, saturating at `Finished`
    pub fn increased(self) -> Self {
        Self::ALL
            .get(self as usize + 1)
            .copied()
            .unwrap_or(self)
    }

    /// Previous phase, saturating at `WaitingForPing`
    pub fn decreased(self) -> Self {
        (self as usize)
            .checked_sub(1)
            .and_then(|i| Self::ALL.get(i).copied())
            .unwrap_or(self)
    }
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy)]
pub enum SessionState {
    /// Created, handshake not yet delivered
    Opening,
    /// Nothing in flight
    Idle,
    /// Heartbeat exchange in progress
    Heartbeat(HeartbeatState),
    /// Transport upgrade in progress
    Upgrading(UpgradingState),
    /// Terminal, the session is being removed
    Closed,
}

impl SessionState {
    /// Coarse rank used by comparisons
    pub fn rank(&self) -> u8 {
        match self {
            SessionState::Closed => 0,
            SessionState::Opening => 1,
            SessionState::Idle | SessionState::Heartbeat(_) => 2,
            SessionState::Upgrading(_) => 3,
        }
    }

    /// Whether the session is mid-upgrade, whatever the phase
    pub fn is_upgrading(&self) -> bool {
        matches!(self, SessionState::Upgrading(_))
    }
}

impl PartialEq for SessionState {
    fn eq(&self, other: &Self) -> bool {
        self.rank() == other.rank()
    }
}

impl Eq for SessionState {}

impl PartialOrd for SessionState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SessionState {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl Hash for SessionState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Opening => write!(f, "opening"),
            SessionState::Idle => write!(f, "idle"),
            SessionState::Heartbeat(phase) => write!(f, "heartbeat({:?})", phase),
            SessionState::Upgrading(phase) => write!(f, "upgrading({:?})", phase),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}
