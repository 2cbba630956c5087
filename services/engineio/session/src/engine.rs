//! Engine core: configuration, session lookup and removal, server push.
//!
//! Transport specific operations live in [`crate::polling`] and
//! [`crate::websocket`]; timers live in [`crate::keepalive`].

use engineio_wire::{HandshakeResponse, Packet, TransportType};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{DisconnectReason, EngineError};
use crate::handler::{Client, EngineEventHandler};
use crate::handshake::Handshake;
use crate::keepalive;
use crate::manager::SessionRegistry;
use crate::session::{Session, Sid};
use crate::state::SessionState;

/// Silence allowed during an upgrade, as a multiple of the normal window
pub const UPGRADE_TIMEOUT_MULTIPLIER: u32 = 2;

/// Sweep interval and staleness threshold, as a multiple of the normal window
pub const SWEEP_MULTIPLIER: u32 = 2;

/// Engine configuration
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Interval between heartbeat pings, also the poll timeout
    pub ping_interval: Duration,
    /// Time allowed for a pong on top of the interval
    pub ping_timeout: Duration,
    /// Maximum number of packets in a polling payload
    pub max_payload: usize,
    /// Whether sessions may upgrade from polling to WebSocket
    pub allow_upgrades: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_millis(3000),
            ping_timeout: Duration::from_millis(2000),
            max_payload: 1_000_000,
            allow_upgrades: true,
        }
    }
}

impl EngineConfig {
    /// Silence after which a session counts as timed out
    pub fn timeout_threshold(&self) -> Duration {
        self.ping_interval + self.ping_timeout
    }

    /// Interval and threshold of the background sweep
    pub fn sweep_interval(&self) -> Duration {
        self.timeout_threshold() * SWEEP_MULTIPLIER
    }
}

/// A request failure, optionally removing the implicated session
pub(crate) struct Rejection {
    error: EngineError,
    reason: Option<DisconnectReason>,
}

impl Rejection {
    pub(crate) fn removing(error: EngineError, reason: DisconnectReason) -> Self {
        Self {
            error,
            reason: Some(reason),
        }
    }
}

impl From<EngineError> for Rejection {
    fn from(error: EngineError) -> Self {
        Self {
            error,
            reason: None,
        }
    }
}

pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) registry: SessionRegistry,
    pub(crate) handler: Arc<dyn EngineEventHandler>,
    this: Weak<EngineInner>,
}

impl EngineInner {
    pub(crate) fn weak(&self) -> Weak<EngineInner> {
        self.this.clone()
    }

    pub(crate) fn client(&self, session: &Session) -> Client {
        Client::new(session, self.weak())
    }

    pub(crate) fn is_timed_out(&self, session: &Session) -> bool {
        let mut threshold = self.config.timeout_threshold();
        if session.state().is_upgrading() {
            threshold *= UPGRADE_TIMEOUT_MULTIPLIER;
        }
        session.silence() > threshold
    }

    /// Transports offered in the handshake of a session opened on `transport`
    pub(crate) fn upgrades(&self, transport: TransportType) -> Vec<TransportType> {
        if self.config.allow_upgrades {
            TransportType::upgrades_from(transport)
        } else {
            Vec::new()
        }
    }

    pub(crate) fn handshake_response(&self, id: &Sid, transport: TransportType) -> HandshakeResponse {
        HandshakeResponse {
            sid: id.to_string(),
            upgrades: self.upgrades(transport),
            ping_interval: self.config.ping_interval.as_millis() as u64,
            ping_timeout: self.config.ping_timeout.as_millis() as u64,
            max_payload: self.config.max_payload as u64,
        }
    }

    /// Look up a polling session for a request and run `f` on it.
    ///
    /// Closed and timed out sessions are removed; sessions already on
    /// WebSocket decline polling.
    pub(crate) async fn checkout<R>(
        &self,
        id: &Sid,
        f: impl FnOnce(&mut Session) -> Result<R, Rejection>,
    ) -> Result<R, EngineError> {
        let (rejection, removed) = {
            let mut sessions = self.registry.lock().await;
            let session = sessions.get_mut(id).ok_or(EngineError::UnknownSession)?;

            let verdict = if session.state() == SessionState::Closed {
                Err(Rejection::removing(
                    EngineError::SessionClosed,
                    DisconnectReason::InvalidSession,
                ))
            } else if self.is_timed_out(session) {
                warn!("Session {} timed out", id);
                Err(Rejection::removing(
                    EngineError::SessionTimedOut,
                    DisconnectReason::PingTimeout,
                ))
            } else if session.transport() == TransportType::Websocket {
                debug!("Polling declined for {}", id);
                Err(EngineError::PollingDeclined.into())
            } else {
                f(session)
            };

            let rejection = match verdict {
                Ok(value) => return Ok(value),
                Err(rejection) => rejection,
            };
            // Removed under the same lock so no other request sees it half closed
            let removed = rejection.reason.and_then(|_| sessions.remove(id)).map(|mut session| {
                session.shutdown();
                session
            });
            (rejection, removed)
        };

        if let (Some(reason), Some(session)) = (rejection.reason, removed) {
            self.notify_removed(&session, reason).await;
        }
        Err(rejection.error)
    }

    /// Remove a session and notify the application
    pub(crate) async fn remove_session(&self, id: &Sid, reason: DisconnectReason) -> bool {
        match self.registry.remove(id).await {
            Some(session) => {
                self.notify_removed(&session, reason).await;
                true
            }
            None => false,
        }
    }

    pub(crate) async fn notify_removed(&self, session: &Session, reason: DisconnectReason) {
        info!("Client disconnected {} ({})", session.id(), reason);
        self.handler
            .on_disconnection(self.client(session), reason)
            .await;
    }

    /// Buffer packets for polling or write them to the socket
    pub(crate) async fn send_packets(&self, id: &Sid, packets: Vec<Packet>) {
        let count = packets.len();
        let delivered = self
            .registry
            .with_session(id, |session| match session.transport() {
                TransportType::Polling => {
                    session.push_packets(packets);
                    true
                }
                TransportType::Websocket => match session.socket() {
                    Some(socket) => {
                        for packet in &packets {
                            socket.send_packet(packet);
                        }
                        session.take_buffer();
                        true
                    }
                    None => false,
                },
            })
            .await;

        if delivered == Some(true) {
            debug!("Sending {} packets for {}", count, id);
        } else {
            debug!("No transport for {}, {} packets dropped", id, count);
        }
    }

    /// Hand message packets to the application
    pub(crate) async fn process_packets(&self, id: &Sid, packets: Vec<Packet>) {
        let client = self
            .registry
            .with_session(id, |session| {
                if session.state() != SessionState::Closed {
                    session.set_state(SessionState::Idle);
                }
                self.client(session)
            })
            .await;

        if let Some(client) = client {
            debug!("Processing {} packets for {}", packets.len(), id);
            self.handler.on_packets(client, packets).await;
        }
    }
}

/// Engine.IO server engine.
///
/// Cheap to clone; all clones share the same sessions. Must be created
/// inside a Tokio runtime, as it spawns the background sweep.
#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Arc<EngineInner>,
}

impl Engine {
    /// Create an engine delivering events to `handler`
    pub fn new(config: EngineConfig, handler: Arc<dyn EngineEventHandler>) -> Self {
        let sweep_interval = config.sweep_interval();
        let inner = Arc::new_cyclic(|this| EngineInner {
            config,
            registry: SessionRegistry::new(),
            handler,
            this: this.clone(),
        });

        keepalive::spawn_sweep(Arc::downgrade(&inner), sweep_interval);

        Self { inner }
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Handles to all live sessions
    pub async fn clients(&self) -> Vec<Client> {
        let sessions = self.inner.registry.lock().await;
        sessions
            .values()
            .map(|session| self.inner.client(session))
            .collect()
    }

    /// Handle to one live session
    pub async fn client(&self, id: &Sid) -> Option<Client> {
        self.inner
            .registry
            .with_session(id, |session| self.inner.client(session))
            .await
    }

    /// Number of live sessions
    pub async fn session_count(&self) -> usize {
        self.inner.registry.len().await
    }

    /// Transport of a live session
    pub async fn transport(&self, id: &Sid) -> Option<TransportType> {
        self.inner
            .registry
            .with_session(id, |session| session.transport())
            .await
    }

    /// Push packets to a session
    pub async fn send_packets(&self, id: &Sid, packets: Vec<Packet>) {
        self.inner.send_packets(id, packets).await;
    }

    /// Close a session; `false` if it did not exist
    pub async fn disconnect(&self, id: &Sid) -> bool {
        self.inner
            .remove_session(id, DisconnectReason::Forcefully)
            .await
    }

    /// Report a rejected request to the application
    pub async fn report_error(&self, handshake: &Handshake, error: &EngineError) {
        debug!("Request rejected: {}", error);
        self.inner
            .handler
            .on_connection_error(handshake, error)
            .await;
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.inner.config)
            .finish()
    }
}
