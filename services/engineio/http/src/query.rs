//! Query parameter validation.

use axum::extract::Query;
use axum::http::Uri;
use engineio_session::{EngineError, Sid};
use engineio_wire::{ProtocolVersion, TransportType};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct RawQuery {
    #[serde(rename = "EIO")]
    eio: Option<String>,
    transport: Option<String>,
    sid: Option<String>,
}

/// Validated transport query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketQuery {
    /// Protocol revision announced by the client
    pub version: ProtocolVersion,
    /// Requested transport
    pub transport: TransportType,
    /// Session id, absent on the opening request
    pub sid: Option<Sid>,
}

impl SocketQuery {
    /// Parse and validate the query string of `uri`
    pub fn from_uri(uri: &Uri) -> Result<Self, EngineError> {
        let Query(raw) = Query::<RawQuery>::try_from_uri(uri)
            .map_err(|err| EngineError::InvalidQuery(err.body_text()))?;

        let eio = raw
            .eio
            .ok_or_else(|| EngineError::InvalidQuery("missing EIO".to_string()))?;
        let version = eio
            .parse::<u8>()
            .ok()
            .and_then(|v| ProtocolVersion::try_from(v).ok())
            .ok_or_else(|| EngineError::InvalidQuery(format!("invalid EIO {}", eio)))?;

        let transport = raw
            .transport
            .ok_or_else(|| EngineError::InvalidQuery("missing transport".to_string()))?;
        let transport = transport
            .parse::<TransportType>()
            .map_err(|_| EngineError::InvalidQuery(format!("invalid transport {}", transport)))?;

        Ok(Self {
            version,
            transport,
            sid: raw.sid.filter(|sid| !sid.is_empty()).map(Sid::from),
        })
    }

    /// Reject protocol revisions the server does not speak
    pub fn check_version(&self, allow_eio3: bool) -> Result<(), EngineError> {
        match self.version {
            ProtocolVersion::V4 => Ok(()),
            ProtocolVersion::V3 if allow_eio3 => Ok(()),
            _ => Err(EngineError::UnsupportedVersion),
        }
    }

    /// Session id, required outside the opening request
    pub fn require_sid(&self) -> Result<&Sid, EngineError> {
        self.sid
            .as_ref()
            .ok_or_else(|| EngineError::InvalidQuery("missing sid".to_string()))
    }
}
