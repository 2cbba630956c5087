//! Heartbeat timers and timeout supervision.
//!
//! Three kinds of background tasks live here, all holding only a weak
//! reference to the engine:
//!
//! - the per-session WebSocket heartbeat, pinging every `ping_interval`
//!   and disconnecting silent sessions;
//! - the engine-wide sweep, reaping sessions silent for twice the
//!   timeout window whatever their transport;
//! - the delayed removal following a polling `close` packet.

use engineio_wire::{Packet, PacketType};
use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, trace};

use crate::engine::EngineInner;
use crate::error::DisconnectReason;
use crate::session::{Sid, TaskSlot};
use crate::state::{HeartbeatState, SessionState, UpgradingState};

/// Delay between opening a WebSocket session and its first ping
pub const INITIAL_PING_DELAY: Duration = Duration::from_millis(50);

/// Outcome of one heartbeat tick
enum Tick {
    Continue,
    TimedOut,
    Gone,
}

/// Spawn the heartbeat of a WebSocket session.
///
/// With `warm_up` the task first waits [`INITIAL_PING_DELAY`] and sends an
/// initial ping, as for sessions opened directly on WebSocket.
pub(crate) fn spawn_heartbeat(engine: Weak<EngineInner>, id: Sid, warm_up: bool) -> TaskSlot {
    let handle = tokio::spawn(async move {
        if warm_up {
            sleep(INITIAL_PING_DELAY).await;
            let Some(inner) = engine.upgrade() else { return };
            let sent = inner
                .registry
                .with_session(&id, |session| {
                    if let Some(socket) = session.socket() {
                        socket.send_packet(&Packet::text(PacketType::Ping));
                    }
                })
                .await;
            if sent.is_none() {
                return;
            }
        }

        loop {
            let ping_interval = match engine.upgrade() {
                Some(inner) => inner.config.ping_interval,
                None => return,
            };
            sleep(ping_interval).await;

            let Some(inner) = engine.upgrade() else { return };
            let tick = inner
                .registry
                .with_session(&id, |session| {
                    if inner.is_timed_out(session) {
                        return Tick::TimedOut;
                    }
                    if session.state() < SessionState::Upgrading(UpgradingState::WaitingForPing) {
                        if let Some(socket) = session.socket() {
                            trace!("WebSocket heartbeat ping for {}", id);
                            socket.send_packet(&Packet::text(PacketType::Ping));
                        }
                        session.set_state(SessionState::Heartbeat(HeartbeatState::WaitingForPong));
                    }
                    Tick::Continue
                })
                .await
                .unwrap_or(Tick::Gone);

            match tick {
                Tick::Continue => {}
                Tick::Gone => return,
                Tick::TimedOut => {
                    info!("Closing {} after heartbeat timeout", id);
                    // Removal aborts this task, so it runs on its own
                    tokio::spawn(async move {
                        inner
                            .remove_session(&id, DisconnectReason::PingTimeout)
                            .await;
                    });
                    return;
                }
            }
        }
    });

    TaskSlot::new(handle)
}

/// Spawn the engine-wide sweep of stale sessions.
///
/// The first pass runs immediately; the task ends once the engine is dropped.
pub(crate) fn spawn_sweep(engine: Weak<EngineInner>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let Some(inner) = engine.upgrade() else { return };

            let stale = inner
                .registry
                .remove_where(|session| session.silence() > period)
                .await;

            for session in &stale {
                info!("Client removed by cleanup {}", session.id());
                inner
                    .notify_removed(session, DisconnectReason::PingTimeout)
                    .await;
            }
        }
    })
}

/// Remove a session after `delay`, unless it is already gone
pub(crate) fn schedule_close(engine: Weak<EngineInner>, id: Sid, delay: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("Closing {} in {:?}", id, delay);
        sleep(delay).await;
        if let Some(inner) = engine.upgrade() {
            inner
                .remove_session(&id, DisconnectReason::Forcefully)
                .await;
        }
    })
}
