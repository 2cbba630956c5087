//! HTTP facade configuration.

use chrono::{DateTime, Utc};
use engineio_session::Handshake;
use std::fmt;
use std::sync::Arc;

/// Hook deciding whether a request may open or upgrade a session
pub type AllowRequest = Arc<dyn Fn(&Handshake) -> Result<(), String> + Send + Sync>;

/// `SameSite` cookie attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    /// Same-site requests only
    Strict,
    /// Same-site requests and top-level navigation
    Lax,
    /// Cross-site allowed
    None,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SameSite::Strict => f.write_str("Strict"),
            SameSite::Lax => f.write_str("Lax"),
            SameSite::None => f.write_str("None"),
        }
    }
}

/// Cookie issued with every polling handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    /// Cookie name
    pub name: String,
    /// Absolute expiry
    pub expires: Option<DateTime<Utc>>,
    /// Lifetime in seconds
    pub max_age: Option<i64>,
    /// `Domain` attribute
    pub domain: Option<String>,
    /// `Path` attribute
    pub path: Option<String>,
    /// `Secure` attribute
    pub secure: bool,
    /// `HttpOnly` attribute
    pub http_only: bool,
    /// `SameSite` attribute
    pub same_site: Option<SameSite>,
}

impl CookieOptions {
    /// Cookie with the given name and no attributes
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expires: None,
            max_age: None,
            domain: None,
            path: None,
            secure: false,
            http_only: false,
            same_site: None,
        }
    }
}

/// Routing and request handling options
#[derive(Clone)]
pub struct ServerConfig {
    /// Mount path, without leading slash
    pub path: String,
    /// Mount at `/<path>/` instead of `/<path>`
    pub add_trailing_slash: bool,
    /// Accept protocol revision 3 besides 4
    pub allow_eio3: bool,
    /// Cookie issued with polling handshakes
    pub cookie: Option<CookieOptions>,
    /// Gate run before a session is opened or upgraded
    pub allow_request: Option<AllowRequest>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            path: "engine.io".to_string(),
            add_trailing_slash: false,
            allow_eio3: false,
            cookie: None,
            allow_request: None,
        }
    }
}

impl ServerConfig {
    /// Route the engine is mounted on
    pub fn route(&self) -> String {
        let mut route = format!("/{}", self.path.trim_matches('/'));
        if self.add_trailing_slash {
            route.push('/');
        }
        route
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("path", &self.path)
            .field("add_trailing_slash", &self.add_trailing_slash)
            .field("allow_eio3", &self.allow_eio3)
            .field("cookie", &self.cookie)
            .field("allow_request", &self.allow_request.is_some())
            .finish()
    }
}
