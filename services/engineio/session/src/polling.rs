//! HTTP long-polling transport.
//!
//! A GET parks on the session until there is something to deliver or the
//! poll timeout elapses; a POST delivers a batch of client packets.

use engineio_wire::{decode_payload, encode_payload, Packet, PacketError, PacketType, TransportType};
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

use crate::engine::{Engine, Rejection};
use crate::error::{DisconnectReason, EngineError};
use crate::handshake::Handshake;
use crate::keepalive;
use crate::session::{PollSlot, Session, Sid};
use crate::state::{HeartbeatState, SessionState, UpgradingState};

/// What a parked poll should do after re-reading its session
enum PollStep {
    Ready(Vec<Packet>),
    Closed,
    Wait,
}

impl Session {
    /// Evaluate the session for a parked poll.
    ///
    /// When packets are ready the poll is finished in the same critical
    /// section: buffer cleared, state back to idle, slot released.
    fn poll_step(&mut self) -> PollStep {
        let packets = match self.state() {
            SessionState::Closed => return PollStep::Closed,
            _ if self.transport() == TransportType::Websocket => {
                vec![Packet::text(PacketType::Noop)]
            }
            SessionState::Heartbeat(HeartbeatState::SendingPing) => {
                trace!("Polling heartbeat ping for {}", self.id());
                vec![Packet::text(PacketType::Ping)]
            }
            SessionState::Heartbeat(HeartbeatState::SendingPong) => {
                trace!("Polling heartbeat pong for {}", self.id());
                vec![Packet::text(PacketType::Pong)]
            }
            // TODO: confirm the intended reply while our own ping awaits its pong
            SessionState::Heartbeat(HeartbeatState::WaitingForPong) => {
                vec![Packet::text(PacketType::Pong)]
            }
            SessionState::Idle if !self.buffer().is_empty() => self.take_buffer(),
            SessionState::Upgrading(UpgradingState::SendingPong) => {
                // Buffered packets stay for the flush once the upgrade commits
                self.set_state(SessionState::Idle);
                self.clear_pending_poll();
                return PollStep::Ready(vec![Packet::text(PacketType::Noop)]);
            }
            _ => return PollStep::Wait,
        };

        self.take_buffer();
        self.set_state(SessionState::Idle);
        self.clear_pending_poll();
        PollStep::Ready(packets)
    }
}

impl Engine {
    /// Open a session on the polling transport.
    ///
    /// Returns the new id and the handshake body (the seeded `open` packet).
    pub async fn open_polling(&self, handshake: Handshake) -> (Sid, String) {
        let inner = &self.inner;
        let id = Sid::new();
        let response = inner.handshake_response(&id, TransportType::Polling);

        let mut session = Session::new(id.clone(), TransportType::Polling, handshake);
        session.push_packets([Packet::with_payload(PacketType::Open, response.to_json())]);
        let body = encode_payload(&session.take_buffer());
        session.set_state(SessionState::Idle);

        let client = inner.client(&session);
        if inner.registry.insert(session).await.is_err() {
            // Fresh UUIDs do not collide in practice
            warn!("Session id {} already registered", id);
        }

        info!("Polling client connected with ID: {}", id);
        inner.handler.on_connection(client).await;
        (id, body)
    }

    /// Long-poll for packets.
    ///
    /// Waits until the session has something to deliver, sending a ping once
    /// `ping_interval` elapses without traffic. A second poll while one is
    /// parked closes the session.
    pub async fn poll(&self, id: &Sid) -> Result<Vec<Packet>, EngineError> {
        let inner = &self.inner;
        let (slot, mut cancelled) = PollSlot::new();

        let notify = inner
            .checkout(id, |session| {
                if session.has_pending_poll() {
                    info!("Closing {} due to duplicated poll requests", id);
                    session.set_state(SessionState::Closed);
                    session.clear_pending_poll();
                    return Err(Rejection::removing(
                        EngineError::DuplicatePoll,
                        DisconnectReason::InvalidState,
                    ));
                }
                session.set_pending_poll(slot);
                Ok(session.notifier())
            })
            .await?;

        let timeout = sleep(inner.config.ping_interval);
        tokio::pin!(timeout);
        let mut timer_armed = true;

        let packets = loop {
            let step = inner.registry.with_session(id, Session::poll_step).await;
            match step {
                Some(PollStep::Ready(packets)) => break packets,
                Some(PollStep::Closed) => {
                    inner.remove_session(id, DisconnectReason::Forcefully).await;
                    break vec![Packet::text(PacketType::Noop)];
                }
                Some(PollStep::Wait) => {}
                None => break vec![Packet::text(PacketType::Close)],
            }

            tokio::select! {
                _ = notify.notified() => {}
                _ = &mut timeout, if timer_armed => {
                    timer_armed = false;
                    inner
                        .registry
                        .with_session(id, |session| {
                            if session.state() > SessionState::Closed {
                                session.set_state(SessionState::Heartbeat(HeartbeatState::SendingPing));
                            }
                        })
                        .await;
                }
                _ = &mut cancelled => break vec![Packet::text(PacketType::Close)],
            }
        };

        debug!("Poll for {} returns {} packets", id, packets.len());
        Ok(packets)
    }

    /// Deliver a POSTed polling payload.
    ///
    /// Message and binary packets reach the application as one batch. An
    /// undecodable body removes the session.
    pub async fn receive_data(&self, id: &Sid, data: Option<&str>) -> Result<(), EngineError> {
        let inner = &self.inner;
        inner
            .checkout(id, |session| {
                session.touch();
                Ok(())
            })
            .await?;

        let packets = match decode_payload(data, inner.config.max_payload) {
            Ok(packets) => packets,
            Err(err) => {
                if err == PacketError::InvalidPacketFormat {
                    warn!("Invalid packet from {}", id);
                    inner.remove_session(id, DisconnectReason::InvalidPacket).await;
                }
                return Err(err.into());
            }
        };

        let mut messages = Vec::new();
        let mut closing = false;
        let found = inner
            .registry
            .with_session(id, |session| {
                for packet in packets {
                    match packet.packet_type() {
                        Some(PacketType::Ping) => {
                            trace!("Polling heartbeat ping received for {}", id);
                            session.set_state(SessionState::Heartbeat(HeartbeatState::SendingPing));
                        }
                        Some(PacketType::Pong)
                            if session.state()
                                == SessionState::Heartbeat(HeartbeatState::WaitingForPong) =>
                        {
                            trace!("Polling heartbeat pong received for {}", id);
                            session.set_state(SessionState::Idle);
                        }
                        Some(PacketType::Close) => {
                            debug!("Polling close requested by {}", id);
                            session.set_state(SessionState::Closed);
                            closing = true;
                        }
                        Some(PacketType::Message) | None => messages.push(packet),
                        Some(_) => {}
                    }
                }
            })
            .await;

        if found.is_none() {
            return Err(EngineError::UnknownSession);
        }

        if !messages.is_empty() {
            inner.process_packets(id, messages).await;
        }
        if closing {
            keepalive::schedule_close(inner.weak(), id.clone(), inner.config.timeout_threshold());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{echo_engine, polling_session, test_engine, wait_for_parked_poll, Event};
    use crate::EngineConfig;
    use engineio_wire::HandshakeResponse;
    use std::time::Duration;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn test_open_returns_handshake() {
        let (engine, mut events) = test_engine(EngineConfig::default());
        let (sid, body) = engine.open_polling(Handshake::default()).await;

        let response = HandshakeResponse::parse_body(&body).unwrap();
        assert_eq!(response.sid, sid.as_str());
        assert_eq!(response.upgrades, vec![TransportType::Websocket]);
        assert_eq!(response.ping_interval, 3000);
        assert_eq!(response.ping_timeout, 2000);
        assert_eq!(response.max_payload, 1_000_000);

        assert_eq!(events.recv().await, Some(Event::Connected(sid.clone())));
        assert_eq!(engine.transport(&sid).await, Some(TransportType::Polling));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_upgrades_when_disabled() {
        let config = EngineConfig {
            allow_upgrades: false,
            ..Default::default()
        };
        let (engine, _events) = test_engine(config);
        let (_sid, body) = engine.open_polling(Handshake::default()).await;
        assert!(HandshakeResponse::parse_body(&body).unwrap().upgrades.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_posted_message_is_polled_back() {
        let (engine, mut events) = echo_engine(EngineConfig::default());
        let sid = polling_session(&engine, &mut events).await;

        engine.receive_data(&sid, Some("4hello")).await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(Event::Packets(sid.clone(), vec![Packet::message("hello")]))
        );

        let packets = engine.poll(&sid).await.unwrap();
        assert_eq!(packets, vec![Packet::message("hello")]);

        let buffered = engine
            .inner
            .registry
            .with_session(&sid, |session| session.buffer().len())
            .await;
        assert_eq!(buffered, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parked_poll_wakes_on_push() {
        let (engine, mut events) = test_engine(EngineConfig::default());
        let sid = polling_session(&engine, &mut events).await;

        let poll = tokio::spawn({
            let engine = engine.clone();
            let sid = sid.clone();
            async move { engine.poll(&sid).await }
        });
        wait_for_parked_poll(&engine, &sid).await;

        let client = engine.client(&sid).await.unwrap();
        client
            .send_packets(vec![Packet::message("a"), Packet::binary(vec![1u8, 2])])
            .await;

        let packets = poll.await.unwrap().unwrap();
        assert_eq!(
            encode_payload(&packets),
            "4a\u{1e}bAQI="
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_timeout_sends_ping() {
        let (engine, mut events) = test_engine(EngineConfig::default());
        let sid = polling_session(&engine, &mut events).await;

        let started = tokio::time::Instant::now();
        let packets = engine.poll(&sid).await.unwrap();
        assert_eq!(packets, vec![Packet::text(PacketType::Ping)]);
        assert!(started.elapsed() >= Duration::from_millis(3000));

        // Answer the ping; the session stays alive
        engine.receive_data(&sid, Some("3")).await.unwrap();
        assert_eq!(engine.session_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_poll_closes_session() {
        let (engine, mut events) = test_engine(EngineConfig::default());
        let sid = polling_session(&engine, &mut events).await;

        let first = tokio::spawn({
            let engine = engine.clone();
            let sid = sid.clone();
            async move { engine.poll(&sid).await }
        });
        wait_for_parked_poll(&engine, &sid).await;

        assert_eq!(engine.poll(&sid).await, Err(EngineError::DuplicatePoll));
        assert_eq!(
            first.await.unwrap(),
            Ok(vec![Packet::text(PacketType::Close)])
        );
        assert_eq!(engine.session_count().await, 0);
        assert_eq!(
            events.recv().await,
            Some(Event::Disconnected(sid.clone(), DisconnectReason::InvalidState))
        );
        assert_eq!(engine.poll(&sid).await, Err(EngineError::UnknownSession));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_session_times_out() {
        let (engine, mut events) = test_engine(EngineConfig::default());
        let sid = polling_session(&engine, &mut events).await;

        advance(Duration::from_millis(5001)).await;

        assert_eq!(engine.poll(&sid).await, Err(EngineError::SessionTimedOut));
        assert_eq!(
            events.recv().await,
            Some(Event::Disconnected(sid, DisconnectReason::PingTimeout))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_body_removes_session() {
        let (engine, mut events) = test_engine(EngineConfig::default());
        let sid = polling_session(&engine, &mut events).await;

        let result = engine.receive_data(&sid, Some("xyz")).await;
        assert_eq!(
            result,
            Err(EngineError::Packet(PacketError::InvalidPacketFormat))
        );
        assert_eq!(
            events.recv().await,
            Some(Event::Disconnected(sid.clone(), DisconnectReason::InvalidPacket))
        );
        assert_eq!(engine.session_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_too_large_payload_keeps_session() {
        let config = EngineConfig {
            max_payload: 2,
            ..Default::default()
        };
        let (engine, mut events) = test_engine(config);
        let sid = polling_session(&engine, &mut events).await;

        let result = engine.receive_data(&sid, Some("4a\u{1e}4b")).await;
        assert_eq!(
            result,
            Err(EngineError::Packet(PacketError::TooLargePacketSequence))
        );
        assert_eq!(engine.session_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_packet_closes_session() {
        let (engine, mut events) = test_engine(EngineConfig::default());
        let sid = polling_session(&engine, &mut events).await;

        engine.receive_data(&sid, Some("1")).await.unwrap();

        // The session is closed right away and rejects further requests
        assert_eq!(engine.receive_data(&sid, Some("4x")).await, Err(EngineError::SessionClosed));
        assert_eq!(
            events.recv().await,
            Some(Event::Disconnected(sid.clone(), DisconnectReason::InvalidSession))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_packet_releases_parked_poll() {
        let (engine, mut events) = test_engine(EngineConfig::default());
        let sid = polling_session(&engine, &mut events).await;

        let poll = tokio::spawn({
            let engine = engine.clone();
            let sid = sid.clone();
            async move { engine.poll(&sid).await }
        });
        wait_for_parked_poll(&engine, &sid).await;

        engine.receive_data(&sid, Some("1")).await.unwrap();
        assert_eq!(
            poll.await.unwrap(),
            Ok(vec![Packet::text(PacketType::Noop)])
        );
        assert_eq!(
            events.recv().await,
            Some(Event::Disconnected(sid, DisconnectReason::Forcefully))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_ping_is_answered_with_ping() {
        let (engine, mut events) = test_engine(EngineConfig::default());
        let sid = polling_session(&engine, &mut events).await;

        engine.receive_data(&sid, Some("2")).await.unwrap();
        let packets = engine.poll(&sid).await.unwrap();
        assert_eq!(packets, vec![Packet::text(PacketType::Ping)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_delivered_as_one_batch() {
        let (engine, mut events) = test_engine(EngineConfig::default());
        let sid = polling_session(&engine, &mut events).await;

        engine
            .receive_data(&sid, Some("4one\u{1e}6\u{1e}bAQI=\u{1e}4two"))
            .await
            .unwrap();
        assert_eq!(
            events.recv().await,
            Some(Event::Packets(
                sid,
                vec![
                    Packet::message("one"),
                    Packet::binary(vec![1u8, 2]),
                    Packet::message("two"),
                ]
            ))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_session() {
        let (engine, _events) = test_engine(EngineConfig::default());
        let sid = Sid::from("missing");
        assert_eq!(engine.poll(&sid).await, Err(EngineError::UnknownSession));
        assert_eq!(
            engine.receive_data(&sid, Some("4a")).await,
            Err(EngineError::UnknownSession)
        );
    }
}
