//! Engine.IO server binary.
//!
//! Serves the polling and WebSocket transports over HTTP and runs a small
//! echo application that sends every received packet back to its client.

use async_trait::async_trait;
use clap::Parser;
use engineio_http::router;
use engineio_session::{Client, DisconnectReason, Engine, EngineError, EngineEventHandler, Handshake};
use engineio_wire::Packet;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::EngineIoConfig;
use logging::EngineLogFormatter;

/// Engine.IO server with an echo application
#[derive(Parser, Debug)]
#[command(name = "engineio", version, about = "Engine.IO server with an echo application")]
struct Args {
    /// Listen address, e.g. 0.0.0.0:3000
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Mount path of the engine
    #[arg(long)]
    path: Option<String>,

    /// Heartbeat interval, e.g. 25s
    #[arg(long)]
    ping_interval: Option<humantime::Duration>,

    /// Grace period for a pong, e.g. 20s
    #[arg(long)]
    ping_timeout: Option<humantime::Duration>,

    /// Maximum packets per polling payload
    #[arg(long)]
    max_payload: Option<usize>,

    /// Accept protocol revision 3
    #[arg(long)]
    allow_eio3: bool,

    /// Keep polling sessions on polling
    #[arg(long)]
    disable_upgrades: bool,

    /// Mount the engine with a trailing slash
    #[arg(long)]
    trailing_slash: bool,

    /// Issue a handshake cookie with this name
    #[arg(long)]
    cookie_name: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Configuration file path
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

impl Args {
    /// Explicit flags take precedence over file and environment
    fn apply_to(&self, config: &mut EngineIoConfig) {
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(path) = &self.path {
            config.path = path.clone();
        }
        if let Some(interval) = self.ping_interval {
            config.ping_interval = interval.into();
        }
        if let Some(timeout) = self.ping_timeout {
            config.ping_timeout = timeout.into();
        }
        if let Some(max_payload) = self.max_payload {
            config.max_payload = max_payload;
        }
        if self.allow_eio3 {
            config.allow_eio3 = true;
        }
        if self.disable_upgrades {
            config.allow_upgrades = false;
        }
        if self.trailing_slash {
            config.trailing_slash = true;
        }
        if let Some(name) = &self.cookie_name {
            config.cookie_name = Some(name.clone());
        }
    }
}

/// Sends every received packet back to its client
struct EchoApplication;

#[async_trait]
impl EngineEventHandler for EchoApplication {
    async fn on_connection(&self, client: Client) {
        component_info!(
            "app",
            "Client {} connected from {:?}",
            client.id(),
            client.handshake().address
        );
    }

    async fn on_disconnection(&self, client: Client, reason: DisconnectReason) {
        component_info!("app", "Client {} disconnected: {}", client.id(), reason);
    }

    async fn on_connection_error(&self, handshake: &Handshake, error: &EngineError) {
        component_warn!("app", "Rejected request {}: {}", handshake.url, error);
    }

    async fn on_packets(&self, client: Client, packets: Vec<Packet>) {
        component_debug!("app", "Echoing {} packets to {}", packets.len(), client.id());
        client.send_packets(packets).await;
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("engineio={}", args.log_level).parse()?)
        .add_directive(format!("engineio_wire={}", args.log_level).parse()?)
        .add_directive(format!("engineio_session={}", args.log_level).parse()?)
        .add_directive(format!("engineio_http={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(true)
        .event_format(EngineLogFormatter::new("engineio".to_string()))
        .init();

    info!("Starting Engine.IO server v{}", env!("CARGO_PKG_VERSION"));

    let mut config = EngineIoConfig::load_from_file(&args.config)?;
    args.apply_to(&mut config);

    let engine = Engine::new(config.engine_config(), Arc::new(EchoApplication));
    let app = router(engine, config.server_config());

    let listener = TcpListener::bind(config.listen)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", config.listen, e))?;
    info!("Listening on {}", config.listen);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Engine.IO server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received SIGINT signal, shutting down");
}
