//! WebSocket transport and the polling to WebSocket upgrade.
//!
//! The HTTP layer hands over a socket as an inbound stream of [`WsFrame`]s
//! plus an outbound channel drained by its writer task. The engine drives
//! the inbound side until the stream ends, the session goes away or the
//! client closes it.
//!
//! Upgrade sequence on an existing polling session:
//!
//! ```text
//! client                         server
//!   | --- GET ?sid (Upgrade) ---> |  upgrading(waitingForPing)
//!   | --- 2probe --------------> |  upgrading(sendingPong)
//!   | <-- 3probe --------------- |  parked poll released with noop
//!   | --- 5 -------------------> |  transport = websocket, idle
//! ```

use bytes::Bytes;
use engineio_wire::{
    decode_binary_frame, decode_text_frame, Packet, PacketError, PacketType, TransportType,
    WireFrame,
};
use futures::{Stream, StreamExt};
use std::sync::Weak;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::engine::{Engine, EngineInner};
use crate::error::DisconnectReason;
use crate::handshake::Handshake;
use crate::keepalive;
use crate::session::{Session, Sid, SocketSlot};
use crate::state::{HeartbeatState, SessionState, UpgradingState};

/// A WebSocket frame, in either direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsFrame {
    /// Text frame
    Text(String),
    /// Binary frame
    Binary(Bytes),
    /// Close frame
    Close,
}

impl From<WireFrame> for WsFrame {
    fn from(frame: WireFrame) -> Self {
        match frame {
            WireFrame::Text(text) => WsFrame::Text(text),
            WireFrame::Binary(data) => WsFrame::Binary(data),
        }
    }
}

/// Whether to keep reading a socket
enum Flow {
    Continue,
    Stop,
}

/// Effect of one inbound text packet, applied after the lock is released
enum Action {
    None,
    Deliver(Packet),
    Remove(DisconnectReason),
}

impl Engine {
    /// Open a new session directly on WebSocket and serve it.
    ///
    /// Sends the handshake, then after a short warm-up an initial ping, and
    /// keeps the heartbeat running until the session ends.
    pub async fn open_websocket<S>(
        &self,
        handshake: Handshake,
        incoming: S,
        outgoing: mpsc::UnboundedSender<WsFrame>,
    ) where
        S: Stream<Item = WsFrame> + Send + Unpin,
    {
        let inner = &self.inner;
        let id = Sid::new();
        let body = inner
            .handshake_response(&id, TransportType::Websocket)
            .build_body();

        let mut session = Session::new(id.clone(), TransportType::Websocket, handshake);
        let (socket, detached) = SocketSlot::new(outgoing.clone());
        let socket_id = socket.id();
        socket.send(WsFrame::Text(body));
        session.attach_socket(socket);
        session.set_state(SessionState::Idle);
        session.set_heartbeat(keepalive::spawn_heartbeat(inner.weak(), id.clone(), true));

        let client = inner.client(&session);
        if let Err(mut rejected) = inner.registry.insert(session).await {
            info!("Closing WebSocket due to existing socket for {}", id);
            rejected.shutdown();
            return;
        }

        info!("WebSocket client connected with ID: {}", id);
        inner.handler.on_connection(client).await;

        self.drive(&id, socket_id, detached, incoming).await;
    }

    /// Attach a WebSocket to an existing polling session and serve it.
    ///
    /// The session stays on polling until the client commits the upgrade.
    pub async fn upgrade_websocket<S>(
        &self,
        id: &Sid,
        incoming: S,
        outgoing: mpsc::UnboundedSender<WsFrame>,
    ) where
        S: Stream<Item = WsFrame> + Send + Unpin,
    {
        let inner = &self.inner;
        let attached = inner
            .registry
            .with_session(id, |session| {
                if session.transport() == TransportType::Websocket || session.socket().is_some() {
                    return None;
                }
                let (socket, detached) = SocketSlot::new(outgoing.clone());
                let socket_id = socket.id();
                session.attach_socket(socket);
                session.set_state(SessionState::Upgrading(UpgradingState::WaitingForPing));
                Some((socket_id, detached))
            })
            .await
            .flatten();

        let Some((socket_id, detached)) = attached else {
            info!("Closing WebSocket, {} cannot be upgraded", id);
            let _ = outgoing.send(WsFrame::Close);
            return;
        };

        info!("WebSocket upgrading started {}", id);
        self.drive(id, socket_id, detached, incoming).await;
    }

    async fn drive<S>(
        &self,
        id: &Sid,
        socket_id: u64,
        mut detached: oneshot::Receiver<()>,
        mut incoming: S,
    ) where
        S: Stream<Item = WsFrame> + Send + Unpin,
    {
        loop {
            let frame = tokio::select! {
                frame = incoming.next() => frame,
                _ = &mut detached => {
                    debug!("WebSocket {} detached from {}", socket_id, id);
                    return;
                }
            };

            let frame = match frame {
                Some(WsFrame::Close) | None => break,
                Some(frame) => frame,
            };

            if let Flow::Stop = self.handle_frame(id, socket_id, frame).await {
                return;
            }
        }

        // Peer went away
        self.release_socket(id, socket_id, DisconnectReason::Forcefully)
            .await;
    }

    /// Remove the session if `socket_id` is still the socket attached to it
    async fn release_socket(&self, id: &Sid, socket_id: u64, reason: DisconnectReason) {
        let owned = self
            .inner
            .registry
            .with_session(id, |session| {
                session.socket().map(SocketSlot::id) == Some(socket_id)
            })
            .await
            .unwrap_or(false);
        if owned {
            self.inner.remove_session(id, reason).await;
        }
    }

    async fn handle_frame(&self, id: &Sid, socket_id: u64, frame: WsFrame) -> Flow {
        let inner = &self.inner;

        let packet = match frame {
            WsFrame::Binary(data) => decode_binary_frame(data),
            WsFrame::Text(text) => match decode_text_frame(&text) {
                Ok(packet) => packet,
                Err(PacketError::InvalidPacketType) => {
                    debug!("Ignoring non-text packet in text frame from {}", id);
                    return Flow::Continue;
                }
                Err(err) => {
                    warn!("Closing {} due to invalid packet format: {}", id, err);
                    self.release_socket(id, socket_id, DisconnectReason::InvalidPacket)
                        .await;
                    return Flow::Stop;
                }
            },
            WsFrame::Close => return Flow::Stop,
        };

        let action = inner
            .registry
            .with_session(id, |session| {
                if session.socket().map(SocketSlot::id) != Some(socket_id) {
                    return None;
                }
                session.touch();
                Some(apply_packet(inner.weak(), session, packet))
            })
            .await
            .flatten();

        match action {
            None => Flow::Stop,
            Some(Action::None) => Flow::Continue,
            Some(Action::Deliver(packet)) => {
                inner.process_packets(id, vec![packet]).await;
                Flow::Continue
            }
            Some(Action::Remove(reason)) => {
                inner.remove_session(id, reason).await;
                Flow::Stop
            }
        }
    }
}

/// Apply one inbound WebSocket packet to its session
fn apply_packet(
    engine: Weak<EngineInner>,
    session: &mut Session,
    packet: Packet,
) -> Action {
    let typ = match packet.packet_type() {
        Some(typ) => typ,
        None => {
            debug!("WebSocket binary packet from {}", session.id());
            return Action::Deliver(packet);
        }
    };

    match typ {
        PacketType::Pong => {
            if session.state() == SessionState::Heartbeat(HeartbeatState::WaitingForPong) {
                trace!("WebSocket pong received {}", session.id());
                session.set_state(SessionState::Idle);
            }
            Action::None
        }
        PacketType::Ping => {
            debug!("WebSocket upgrade ping probe received {}", session.id());
            session.set_state(SessionState::Upgrading(
                UpgradingState::WaitingForPing.increased(),
            ));
            let pong = Packet::Text {
                typ: PacketType::Pong,
                payload: packet.payload().map(str::to_string),
            };
            if let Some(socket) = session.socket() {
                socket.send_packet(&pong);
            }
            Action::None
        }
        PacketType::Upgrade => {
            if session.transport() == TransportType::Polling {
                // Hand over whatever the polling transport had not delivered yet
                let pending = session.take_buffer();
                if let Some(socket) = session.socket() {
                    for packet in &pending {
                        socket.send_packet(packet);
                    }
                }
                session.upgrade_transport();
            }
            session.set_state(SessionState::Idle);
            session.set_heartbeat(keepalive::spawn_heartbeat(
                engine,
                session.id().clone(),
                false,
            ));
            info!("WebSocket upgrading successfully finished {}", session.id());
            Action::None
        }
        PacketType::Message => Action::Deliver(packet),
        PacketType::Close => Action::Remove(DisconnectReason::Forcefully),
        PacketType::Open | PacketType::Noop => Action::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        echo_engine, polling_session, test_engine, wait_for_parked_poll, wait_for_socket, Event,
    };
    use crate::{EngineConfig, EngineError};
    use engineio_wire::HandshakeResponse;
    use futures::channel::mpsc as fmpsc;
    use std::time::Duration;
    use tokio::time::advance;

    struct TestSocket {
        to_server: fmpsc::UnboundedSender<WsFrame>,
        from_server: mpsc::UnboundedReceiver<WsFrame>,
    }

    impl TestSocket {
        fn send(&self, text: &str) {
            self.to_server
                .unbounded_send(WsFrame::Text(text.to_string()))
                .unwrap();
        }

        async fn recv(&mut self) -> WsFrame {
            self.from_server.recv().await.unwrap()
        }
    }

    fn socket_pair() -> (
        TestSocket,
        fmpsc::UnboundedReceiver<WsFrame>,
        mpsc::UnboundedSender<WsFrame>,
    ) {
        let (to_server, incoming) = fmpsc::unbounded();
        let (outgoing, from_server) = mpsc::unbounded_channel();
        (
            TestSocket {
                to_server,
                from_server,
            },
            incoming,
            outgoing,
        )
    }

    fn text(data: &str) -> WsFrame {
        WsFrame::Text(data.to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_websocket_handshake_and_ping() {
        let (engine, mut events) = echo_engine(EngineConfig::default());
        let (mut client, incoming, outgoing) = socket_pair();

        tokio::spawn({
            let engine = engine.clone();
            async move {
                engine
                    .open_websocket(Handshake::default(), incoming, outgoing)
                    .await
            }
        });

        let open = match client.recv().await {
            WsFrame::Text(body) => HandshakeResponse::parse_body(&body).unwrap(),
            other => panic!("expected handshake, got {:?}", other),
        };
        assert!(open.upgrades.is_empty());
        let sid = Sid::from(open.sid);
        assert_eq!(events.recv().await, Some(Event::Connected(sid.clone())));

        assert_eq!(client.recv().await, text("2"));

        client.send("4hi");
        assert_eq!(client.recv().await, text("4hi"));

        client
            .to_server
            .unbounded_send(WsFrame::Binary(Bytes::from_static(&[7, 8])))
            .unwrap();
        assert_eq!(
            client.recv().await,
            WsFrame::Binary(Bytes::from_static(&[7, 8]))
        );
        assert_eq!(engine.transport(&sid).await, Some(TransportType::Websocket));
    }

    #[tokio::test(start_paused = true)]
    async fn test_websocket_ping_timeout() {
        let (engine, mut events) = test_engine(EngineConfig::default());
        let (mut client, incoming, outgoing) = socket_pair();

        tokio::spawn({
            let engine = engine.clone();
            async move {
                engine
                    .open_websocket(Handshake::default(), incoming, outgoing)
                    .await
            }
        });

        let Some(Event::Connected(sid)) = events.recv().await else {
            panic!("expected connection");
        };

        // Handshake, initial ping, one heartbeat ping, then the close
        assert!(matches!(client.recv().await, WsFrame::Text(_)));
        assert_eq!(client.recv().await, text("2"));
        assert_eq!(client.recv().await, text("2"));
        assert_eq!(client.recv().await, WsFrame::Close);

        assert_eq!(
            events.recv().await,
            Some(Event::Disconnected(sid, DisconnectReason::PingTimeout))
        );
        assert_eq!(engine.session_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_keeps_websocket_alive() {
        let (engine, mut events) = test_engine(EngineConfig::default());
        let (mut client, incoming, outgoing) = socket_pair();

        tokio::spawn({
            let engine = engine.clone();
            async move {
                engine
                    .open_websocket(Handshake::default(), incoming, outgoing)
                    .await
            }
        });
        let Some(Event::Connected(sid)) = events.recv().await else {
            panic!("expected connection");
        };
        assert!(matches!(client.recv().await, WsFrame::Text(_)));

        for _ in 0..5 {
            assert_eq!(client.recv().await, text("2"));
            client.send("3");
        }
        assert_eq!(engine.session_count().await, 1);
        assert!(engine.client(&sid).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_upgrade_sequence() {
        let (engine, mut events) = test_engine(EngineConfig::default());
        let sid = polling_session(&engine, &mut events).await;

        let poll = tokio::spawn({
            let engine = engine.clone();
            let sid = sid.clone();
            async move { engine.poll(&sid).await }
        });
        wait_for_parked_poll(&engine, &sid).await;

        let (mut client, incoming, outgoing) = socket_pair();
        tokio::spawn({
            let engine = engine.clone();
            let sid = sid.clone();
            async move { engine.upgrade_websocket(&sid, incoming, outgoing).await }
        });

        client.send("2probe");
        assert_eq!(client.recv().await, text("3probe"));

        // The old transport is released with a noop
        assert_eq!(
            poll.await.unwrap(),
            Ok(vec![Packet::text(PacketType::Noop)])
        );
        assert_eq!(engine.transport(&sid).await, Some(TransportType::Polling));

        // Packets pushed before the commit are flushed over the socket
        engine
            .send_packets(&sid, vec![Packet::message("pending")])
            .await;

        client.send("5");
        assert_eq!(client.recv().await, text("4pending"));
        assert_eq!(engine.transport(&sid).await, Some(TransportType::Websocket));

        assert_eq!(engine.poll(&sid).await, Err(EngineError::PollingDeclined));

        engine.send_packets(&sid, vec![Packet::message("live")]).await;
        assert_eq!(client.recv().await, text("4live"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffered_packets_survive_upgrade() {
        let (engine, mut events) = test_engine(EngineConfig::default());
        let sid = polling_session(&engine, &mut events).await;
        engine
            .send_packets(&sid, vec![Packet::message("before")])
            .await;

        let (mut client, incoming, outgoing) = socket_pair();
        tokio::spawn({
            let engine = engine.clone();
            let sid = sid.clone();
            async move { engine.upgrade_websocket(&sid, incoming, outgoing).await }
        });

        client.send("2probe");
        assert_eq!(client.recv().await, text("3probe"));
        assert_eq!(
            engine.poll(&sid).await,
            Ok(vec![Packet::text(PacketType::Noop)])
        );

        client.send("5");
        assert_eq!(client.recv().await, text("4before"));
        assert_eq!(engine.transport(&sid).await, Some(TransportType::Websocket));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upgrade_doubles_timeout() {
        let (engine, mut events) = test_engine(EngineConfig::default());
        let sid = polling_session(&engine, &mut events).await;

        let (_client, incoming, outgoing) = socket_pair();
        tokio::spawn({
            let engine = engine.clone();
            let sid = sid.clone();
            async move { engine.upgrade_websocket(&sid, incoming, outgoing).await }
        });
        wait_for_socket(&engine, &sid).await;

        // Past ping_interval + ping_timeout, still inside twice that
        advance(Duration::from_secs(7)).await;
        assert_eq!(engine.receive_data(&sid, Some("6")).await, Ok(()));

        advance(Duration::from_millis(10_001)).await;
        assert_eq!(
            engine.receive_data(&sid, Some("6")).await,
            Err(EngineError::SessionTimedOut)
        );
        assert_eq!(
            events.recv().await,
            Some(Event::Disconnected(sid, DisconnectReason::PingTimeout))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_heartbeat_ping_while_upgrading() {
        let (engine, mut events) = test_engine(EngineConfig::default());
        let (mut client, incoming, outgoing) = socket_pair();

        tokio::spawn({
            let engine = engine.clone();
            async move {
                engine
                    .open_websocket(Handshake::default(), incoming, outgoing)
                    .await
            }
        });
        let Some(Event::Connected(sid)) = events.recv().await else {
            panic!("expected connection");
        };
        assert!(matches!(client.recv().await, WsFrame::Text(_)));
        assert_eq!(client.recv().await, text("2"));

        client.send("2");
        assert_eq!(client.recv().await, text("3"));

        // Heartbeat ticks stay silent until the doubled timeout closes the socket
        assert_eq!(client.recv().await, WsFrame::Close);
        assert_eq!(
            events.recv().await,
            Some(Event::Disconnected(sid, DisconnectReason::PingTimeout))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_socket_rejected() {
        let (engine, mut events) = test_engine(EngineConfig::default());
        let sid = polling_session(&engine, &mut events).await;

        let (_first, incoming, outgoing) = socket_pair();
        tokio::spawn({
            let engine = engine.clone();
            let sid = sid.clone();
            async move { engine.upgrade_websocket(&sid, incoming, outgoing).await }
        });
        wait_for_socket(&engine, &sid).await;

        let (mut second, incoming, outgoing) = socket_pair();
        engine.upgrade_websocket(&sid, incoming, outgoing).await;
        assert_eq!(second.recv().await, WsFrame::Close);
        assert_eq!(engine.session_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upgrade_unknown_session() {
        let (engine, _events) = test_engine(EngineConfig::default());
        let (mut client, incoming, outgoing) = socket_pair();
        engine
            .upgrade_websocket(&Sid::from("missing"), incoming, outgoing)
            .await;
        assert_eq!(client.recv().await, WsFrame::Close);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_frame_removes_session() {
        let (engine, mut events) = test_engine(EngineConfig::default());
        let (client, incoming, outgoing) = socket_pair();

        let serve = tokio::spawn({
            let engine = engine.clone();
            async move {
                engine
                    .open_websocket(Handshake::default(), incoming, outgoing)
                    .await
            }
        });
        let Some(Event::Connected(sid)) = events.recv().await else {
            panic!("expected connection");
        };

        client.send("9garbage");
        serve.await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(Event::Disconnected(sid, DisconnectReason::InvalidPacket))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_packet_and_peer_close() {
        let (engine, mut events) = test_engine(EngineConfig::default());

        let (client, incoming, outgoing) = socket_pair();
        let serve = tokio::spawn({
            let engine = engine.clone();
            async move {
                engine
                    .open_websocket(Handshake::default(), incoming, outgoing)
                    .await
            }
        });
        let Some(Event::Connected(first)) = events.recv().await else {
            panic!("expected connection");
        };
        client.send("1");
        serve.await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(Event::Disconnected(first, DisconnectReason::Forcefully))
        );

        let (client, incoming, outgoing) = socket_pair();
        let serve = tokio::spawn({
            let engine = engine.clone();
            async move {
                engine
                    .open_websocket(Handshake::default(), incoming, outgoing)
                    .await
            }
        });
        let Some(Event::Connected(second)) = events.recv().await else {
            panic!("expected connection");
        };
        drop(client);
        serve.await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(Event::Disconnected(second, DisconnectReason::Forcefully))
        );
        assert_eq!(engine.session_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_application_disconnect_ends_socket() {
        let (engine, mut events) = test_engine(EngineConfig::default());
        let (mut client, incoming, outgoing) = socket_pair();
        let serve = tokio::spawn({
            let engine = engine.clone();
            async move {
                engine
                    .open_websocket(Handshake::default(), incoming, outgoing)
                    .await
            }
        });
        let Some(Event::Connected(sid)) = events.recv().await else {
            panic!("expected connection");
        };

        assert!(engine.disconnect(&sid).await);
        serve.await.unwrap();

        assert!(matches!(client.recv().await, WsFrame::Text(_)));
        assert_eq!(client.recv().await, WsFrame::Close);
        assert_eq!(
            events.recv().await,
            Some(Event::Disconnected(sid, DisconnectReason::Forcefully))
        );
    }
}
