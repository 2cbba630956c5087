//! Shared helpers for engine tests.

use async_trait::async_trait;
use engineio_wire::Packet;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::{
    Client, DisconnectReason, Engine, EngineConfig, EngineError, EngineEventHandler, Handshake,
    Sid,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    Connected(Sid),
    Disconnected(Sid, DisconnectReason),
    Packets(Sid, Vec<Packet>),
    Error(EngineError),
}

/// Records every callback; optionally echoes packets back to the sender
pub(crate) struct Recorder {
    events: mpsc::UnboundedSender<Event>,
    echo: bool,
}

#[async_trait]
impl EngineEventHandler for Recorder {
    async fn on_connection(&self, client: Client) {
        let _ = self.events.send(Event::Connected(client.id().clone()));
    }

    async fn on_disconnection(&self, client: Client, reason: DisconnectReason) {
        let _ = self
            .events
            .send(Event::Disconnected(client.id().clone(), reason));
    }

    async fn on_connection_error(&self, _handshake: &Handshake, error: &EngineError) {
        let _ = self.events.send(Event::Error(error.clone()));
    }

    async fn on_packets(&self, client: Client, packets: Vec<Packet>) {
        if self.echo {
            client.send_packets(packets.clone()).await;
        }
        let _ = self
            .events
            .send(Event::Packets(client.id().clone(), packets));
    }
}

pub(crate) fn test_engine(config: EngineConfig) -> (Engine, mpsc::UnboundedReceiver<Event>) {
    build(config, false)
}

pub(crate) fn echo_engine(config: EngineConfig) -> (Engine, mpsc::UnboundedReceiver<Event>) {
    build(config, true)
}

fn build(config: EngineConfig, echo: bool) -> (Engine, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let engine = Engine::new(config, Arc::new(Recorder { events: tx, echo }));
    (engine, rx)
}

/// Open a polling session and consume its connection event
pub(crate) async fn polling_session(
    engine: &Engine,
    events: &mut mpsc::UnboundedReceiver<Event>,
) -> Sid {
    let (sid, _body) = engine.open_polling(Handshake::default()).await;
    assert_eq!(events.recv().await, Some(Event::Connected(sid.clone())));
    sid
}

/// Yield until a poll is parked on the session
pub(crate) async fn wait_for_parked_poll(engine: &Engine, sid: &Sid) {
    while !engine
        .inner
        .registry
        .with_session(sid, |session| session.has_pending_poll())
        .await
        .unwrap_or(false)
    {
        tokio::task::yield_now().await;
    }
}

/// Yield until a socket is attached to the session
pub(crate) async fn wait_for_socket(engine: &Engine, sid: &Sid) {
    while engine
        .inner
        .registry
        .with_session(sid, |session| session.socket().is_none())
        .await
        .unwrap_or(true)
    {
        tokio::task::yield_now().await;
    }
}
