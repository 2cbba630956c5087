//! Configuration handling for the Engine.IO service.
//!
//! Values come from built-in defaults, the shared YAML config file and
//! `ENGINEIO_*` environment variables, in that order of precedence.
//! Command-line flags are applied on top by the caller.

use anyhow::Result;
use engineio_http::{CookieOptions, ServerConfig};
use engineio_session::EngineConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Prefix of the service keys in the shared config file
const KEY_PREFIX: &str = "services.engineio.";

/// Environment variables and the config keys they override
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("ENGINEIO_LISTEN", "listen"),
    ("ENGINEIO_PATH", "path"),
    ("ENGINEIO_PING_INTERVAL", "ping_interval"),
    ("ENGINEIO_PING_TIMEOUT", "ping_timeout"),
    ("ENGINEIO_MAX_PAYLOAD", "max_payload"),
    ("ENGINEIO_ALLOW_EIO3", "allow_eio3"),
    ("ENGINEIO_ALLOW_UPGRADES", "allow_upgrades"),
    ("ENGINEIO_TRAILING_SLASH", "trailing_slash"),
    ("ENGINEIO_COOKIE_NAME", "cookie_name"),
];

/// Engine.IO service configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EngineIoConfig {
    /// HTTP listen address
    pub listen: SocketAddr,
    /// Mount path of the engine
    pub path: String,
    /// Heartbeat interval
    pub ping_interval: Duration,
    /// Grace period for a pong
    pub ping_timeout: Duration,
    /// Maximum packets per polling payload
    pub max_payload: usize,
    /// Accept protocol revision 3
    pub allow_eio3: bool,
    /// Allow polling sessions to upgrade to WebSocket
    pub allow_upgrades: bool,
    /// Mount with a trailing slash
    pub trailing_slash: bool,
    /// Name of the handshake cookie, if one is issued
    pub cookie_name: Option<String>,
}

impl Default for EngineIoConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        let server = ServerConfig::default();
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 3000)),
            path: server.path,
            ping_interval: engine.ping_interval,
            ping_timeout: engine.ping_timeout,
            max_payload: engine.max_payload,
            allow_eio3: server.allow_eio3,
            allow_upgrades: engine.allow_upgrades,
            trailing_slash: server.add_trailing_slash,
            cookie_name: None,
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    services: Option<ServicesConfig>,
}

#[derive(Debug, Deserialize)]
struct ServicesConfig {
    engineio: Option<ServiceConfig>,
}

#[derive(Debug, Deserialize)]
struct ServiceConfig {
    config: Option<HashMap<String, String>>,
}

impl EngineIoConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        if let Ok(content) = std::fs::read_to_string(&config_path) {
            match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root_config) => {
                    config.apply_root_config(root_config);
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(e) => {
                    warn!("Failed to parse config file {:?}, using defaults: {}", config_path.as_ref(), e);
                }
            }
        } else {
            warn!("Config file {:?} not found, using defaults", config_path.as_ref());
        }

        config.apply_overrides(|name| std::env::var(name).ok());

        info!(
            "Final engine.io configuration: listen={}, path={}, ping_interval={:?}, ping_timeout={:?}",
            config.listen, config.path, config.ping_interval, config.ping_timeout
        );

        Ok(config)
    }

    fn apply_root_config(&mut self, root_config: RootConfig) {
        let entries = root_config
            .services
            .and_then(|services| services.engineio)
            .and_then(|service| service.config)
            .unwrap_or_default();

        // Keys of other services share the map
        for (key, value) in entries {
            if let Some(name) = key.strip_prefix(KEY_PREFIX) {
                if !self.apply_value(name, &value) {
                    warn!("Ignoring invalid value {:?} for {}", value, key);
                }
            }
        }
    }

    /// Apply `ENGINEIO_*` overrides found through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for (variable, name) in ENV_OVERRIDES {
            if let Some(value) = lookup(variable) {
                if self.apply_value(name, &value) {
                    info!("{} overridden by environment: {}", name, value);
                } else {
                    warn!("Ignoring invalid {}={:?}", variable, value);
                }
            }
        }
    }

    /// Set one named value; `false` if the name or value is not understood
    fn apply_value(&mut self, name: &str, value: &str) -> bool {
        match name {
            "listen" => parse_into(value, &mut self.listen),
            "path" => {
                self.path = value.to_string();
                true
            }
            "ping_interval" => parse_duration_into(value, &mut self.ping_interval),
            "ping_timeout" => parse_duration_into(value, &mut self.ping_timeout),
            "max_payload" => parse_into(value, &mut self.max_payload),
            "allow_eio3" => parse_into(value, &mut self.allow_eio3),
            "allow_upgrades" => parse_into(value, &mut self.allow_upgrades),
            "trailing_slash" => parse_into(value, &mut self.trailing_slash),
            "cookie_name" => {
                self.cookie_name = Some(value.to_string()).filter(|name| !name.is_empty());
                true
            }
            _ => false,
        }
    }

    /// Engine settings derived from this configuration
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            ping_interval: self.ping_interval,
            ping_timeout: self.ping_timeout,
            max_payload: self.max_payload,
            allow_upgrades: self.allow_upgrades,
        }
    }

    /// HTTP facade settings derived from this configuration
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            path: self.path.clone(),
            add_trailing_slash: self.trailing_slash,
            allow_eio3: self.allow_eio3,
            cookie: self.cookie_name.as_deref().map(|name| {
                let mut cookie = CookieOptions::new(name);
                cookie.path = Some("/".to_string());
                cookie.http_only = true;
                cookie
            }),
            allow_request: None,
        }
    }
}

fn parse_into<T: std::str::FromStr>(value: &str, target: &mut T) -> bool {
    match value.trim().parse() {
        Ok(parsed) => {
            *target = parsed;
            true
        }
        Err(_) => false,
    }
}

fn parse_duration_into(value: &str, target: &mut Duration) -> bool {
    match humantime::parse_duration(value.trim()) {
        Ok(parsed) => {
            *target = parsed;
            true
        }
        Err(_) => false,
    }
}
