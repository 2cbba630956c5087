//! Request metadata captured when a session is opened.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;

/// Metadata of the request that opened a session.
///
/// Opaque to the engine; handed to the application with every callback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Handshake {
    /// Request headers, names lower-cased
    pub headers: BTreeMap<String, String>,
    /// Remote peer address, when known
    pub address: Option<SocketAddr>,
    /// Whether the request arrived over TLS
    pub is_secure: bool,
    /// Request URL (path and query)
    pub url: String,
    /// Query parameters
    pub query: HashMap<String, String>,
}

impl Handshake {
    /// Header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Query parameter by name
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}
