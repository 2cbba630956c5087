//! Application callback surface and the per-client handle passed to it.

use async_trait::async_trait;
use engineio_wire::{Packet, TransportType};
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use crate::engine::EngineInner;
use crate::error::{DisconnectReason, EngineError};
use crate::handshake::Handshake;
use crate::session::{Session, Sid};

/// Callbacks from the engine into the application layer.
///
/// All methods default to doing nothing. They are never called while the
/// session registry is locked, so implementations may use the [`Client`]
/// handle freely.
#[async_trait]
pub trait EngineEventHandler: Send + Sync {
    /// A session was opened
    async fn on_connection(&self, _client: Client) {}

    /// A session was removed
    async fn on_disconnection(&self, _client: Client, _reason: DisconnectReason) {}

    /// A request was rejected
    async fn on_connection_error(&self, _handshake: &Handshake, _error: &EngineError) {}

    /// Message or binary packets arrived, in arrival order
    async fn on_packets(&self, _client: Client, _packets: Vec<Packet>) {}
}

/// Handler ignoring every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

#[async_trait]
impl EngineEventHandler for NoopHandler {}

/// Handle to one session, usable after the callback returns
#[derive(Clone)]
pub struct Client {
    id: Sid,
    connection_time: SystemTime,
    handshake: Arc<Handshake>,
    engine: Weak<EngineInner>,
}

impl Client {
    pub(crate) fn new(session: &Session, engine: Weak<EngineInner>) -> Self {
        Self {
            id: session.id().clone(),
            connection_time: session.connection_time(),
            handshake: Arc::clone(session.handshake()),
            engine,
        }
    }

    /// Session id
    pub fn id(&self) -> &Sid {
        &self.id
    }

    /// When the session was opened
    pub fn connection_time(&self) -> SystemTime {
        self.connection_time
    }

    /// Request metadata captured at open
    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    /// Current transport, `None` once the session is gone
    pub async fn transport(&self) -> Option<TransportType> {
        let engine = self.engine.upgrade()?;
        engine
            .registry
            .with_session(&self.id, |session| session.transport())
            .await
    }

    /// Send one packet to the client
    pub async fn send_packet(&self, packet: Packet) {
        self.send_packets(vec![packet]).await;
    }

    /// Send packets to the client, buffered for polling or written to the socket
    pub async fn send_packets(&self, packets: Vec<Packet>) {
        if let Some(engine) = self.engine.upgrade() {
            engine.send_packets(&self.id, packets).await;
        }
    }

    /// Close the session
    pub async fn disconnect(&self) {
        if let Some(engine) = self.engine.upgrade() {
            engine
                .remove_session(&self.id, DisconnectReason::Forcefully)
                .await;
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("connection_time", &self.connection_time)
            .finish()
    }
}
