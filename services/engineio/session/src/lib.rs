//! Sessions, transports and heartbeat supervision for Engine.IO.
//!
//! This crate provides the stateful core of the Engine.IO server: the
//! session state machine, the session registry, the long-polling and
//! WebSocket transports including the live upgrade between them, and the
//! timers that detect dead clients.
//!
//! ## Features
//!
//! - **Long-Polling**: parked GET requests woken by state changes, batched POSTs
//! - **WebSocket**: direct sessions and in-place upgrade from polling
//! - **Heartbeat**: per-socket ping/pong with timeout, plus a background sweep
//! - **Callbacks**: connection, disconnection, error and packet events
//!
//! ## Example
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use engineio_session::{Client, Engine, EngineConfig, EngineEventHandler};
//! use engineio_wire::Packet;
//! use std::sync::Arc;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl EngineEventHandler for Echo {
//!     async fn on_packets(&self, client: Client, packets: Vec<Packet>) {
//!         client.send_packets(packets).await;
//!     }
//! }
//!
//! # async fn example() {
//! let engine = Engine::new(EngineConfig::default(), Arc::new(Echo));
//! let (sid, body) = engine.open_polling(Default::default()).await;
//! println!("opened {} with {}", sid, body);
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod error;
pub mod handler;
pub mod handshake;
pub mod keepalive;
pub mod manager;
pub mod polling;
pub mod session;
pub mod state;
pub mod websocket;

#[cfg(test)]
mod test_support;

// Re-export main types
pub use engine::{Engine, EngineConfig, SWEEP_MULTIPLIER, UPGRADE_TIMEOUT_MULTIPLIER};
pub use error::{DisconnectReason, EngineError};
pub use handler::{Client, EngineEventHandler, NoopHandler};
pub use handshake::Handshake;
pub use keepalive::INITIAL_PING_DELAY;
pub use manager::SessionRegistry;
pub use session::{PollSlot, Session, Sid, SocketSlot, TaskSlot};
pub use state::{HeartbeatState, SessionState, UpgradingState};
pub use websocket::WsFrame;
