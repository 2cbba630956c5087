//! HTTP facade for the Engine.IO server.
//!
//! Mounts an [`engineio_session::Engine`] on an axum router: GET requests
//! open sessions, long-poll, or upgrade to WebSocket; POST requests carry
//! client payloads.
//!
//! ## Features
//!
//! - **Query Validation**: `EIO`, `transport` and `sid` parameters
//! - **Request Gating**: optional hook run before opening or upgrading
//! - **Handshake Cookie**: configurable `Set-Cookie` on polling handshakes
//! - **WebSocket Bridge**: axum sockets adapted to the engine's frame channels
//!
//! ## Example
//!
//! ```rust,no_run
//! use engineio_http::{router, ServerConfig};
//! use engineio_session::{Engine, EngineConfig, NoopHandler};
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//!
//! # async fn example() -> std::io::Result<()> {
//! let engine = Engine::new(EngineConfig::default(), Arc::new(NoopHandler));
//! let app = router(engine, ServerConfig::default());
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//! axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod cookie;
pub mod query;
pub mod server;
pub mod socket;

// Re-export main types
pub use config::{AllowRequest, CookieOptions, SameSite, ServerConfig};
pub use cookie::render_set_cookie;
pub use query::SocketQuery;
pub use server::{router, MAX_BODY_BYTES, OK_BODY, TEXT_PLAIN};
pub use socket::split_socket;
