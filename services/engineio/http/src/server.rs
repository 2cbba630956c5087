//! Routes serving the polling and WebSocket transports.

use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, FromRequestParts, Query, Request, State};
use axum::http::header::{CONNECTION, CONTENT_TYPE, SET_COOKIE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use engineio_session::{Engine, EngineError, Handshake};
use engineio_wire::{encode_payload, PacketError, TransportType};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::cookie::{new_cookie_value, render_set_cookie};
use crate::query::SocketQuery;
use crate::socket::split_socket;

/// Content type of polling responses
pub const TEXT_PLAIN: &str = "text/plain; charset=UTF-8";

/// Body of a successful POST
pub const OK_BODY: &str = "ok";

/// Largest POST body read into memory
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// 400 answer carrying the error text
struct Rejection(EngineError);

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, self.0.to_string()).into_response()
    }
}

struct HttpState {
    engine: Engine,
    config: ServerConfig,
}

impl HttpState {
    fn allow(&self, handshake: &Handshake) -> Result<(), EngineError> {
        match &self.config.allow_request {
            Some(allow) => allow(handshake).map_err(EngineError::RequestRejected),
            None => Ok(()),
        }
    }

    async fn reject(&self, handshake: &Handshake, error: EngineError) -> Response {
        self.engine.report_error(handshake, &error).await;
        Rejection(error).into_response()
    }
}

/// Build the router serving `engine` under the configured path
pub fn router(engine: Engine, config: ServerConfig) -> Router {
    let route = config.route();
    info!("Mounting Engine.IO on {}", route);

    let state = Arc::new(HttpState { engine, config });
    Router::new()
        .route(
            &route,
            get(handle_get)
                .post(handle_post)
                .put(reject_method)
                .delete(reject_method)
                .patch(reject_method),
        )
        .with_state(state)
}

async fn reject_method() -> StatusCode {
    StatusCode::BAD_REQUEST
}

async fn handle_get(State(state): State<Arc<HttpState>>, request: Request) -> Response {
    let (mut parts, _body) = request.into_parts();
    let handshake = capture_handshake(&parts);

    match serve_get(&state, &mut parts, &handshake).await {
        Ok(response) => response,
        Err(error) => state.reject(&handshake, error).await,
    }
}

async fn serve_get(
    state: &Arc<HttpState>,
    parts: &mut Parts,
    handshake: &Handshake,
) -> Result<Response, EngineError> {
    let query = SocketQuery::from_uri(&parts.uri)?;
    query.check_version(state.config.allow_eio3)?;

    if let Some(sid) = query.sid {
        if wants_upgrade(&parts.headers) && state.engine.config().allow_upgrades {
            state.allow(handshake)?;
            let ws = websocket_upgrade(parts, state).await?;
            let engine = state.engine.clone();
            debug!("WebSocket upgrade requested for {}", sid);
            return Ok(ws.on_upgrade(move |socket| async move {
                let (incoming, outgoing) = split_socket(socket);
                engine.upgrade_websocket(&sid, incoming, outgoing).await;
            }));
        }

        let packets = state.engine.poll(&sid).await?;
        return Ok(([(CONTENT_TYPE, TEXT_PLAIN)], encode_payload(&packets)).into_response());
    }

    state.allow(handshake)?;
    match query.transport {
        TransportType::Polling => {
            let (_sid, body) = state.engine.open_polling(handshake.clone()).await;
            let mut response = ([(CONTENT_TYPE, TEXT_PLAIN)], body).into_response();
            if let Some(cookie) = &state.config.cookie {
                let rendered = render_set_cookie(cookie, &new_cookie_value());
                if let Ok(value) = HeaderValue::from_str(&rendered) {
                    response.headers_mut().insert(SET_COOKIE, value);
                }
            }
            Ok(response)
        }
        TransportType::Websocket => {
            let ws = websocket_upgrade(parts, state).await?;
            let engine = state.engine.clone();
            let handshake = handshake.clone();
            Ok(ws.on_upgrade(move |socket| async move {
                let (incoming, outgoing) = split_socket(socket);
                engine.open_websocket(handshake, incoming, outgoing).await;
            }))
        }
    }
}

async fn handle_post(State(state): State<Arc<HttpState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let handshake = capture_handshake(&parts);

    match serve_post(&state, &parts, body).await {
        Ok(response) => response,
        Err(error) => state.reject(&handshake, error).await,
    }
}

async fn serve_post(state: &HttpState, parts: &Parts, body: Body) -> Result<Response, EngineError> {
    let query = SocketQuery::from_uri(&parts.uri)?;
    query.check_version(state.config.allow_eio3)?;
    let sid = query.require_sid()?;

    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| EngineError::Packet(PacketError::TooLargePacketSequence))?;

    // Undecodable bodies go through the engine so the session is dropped
    let text = std::str::from_utf8(&bytes).ok();
    state.engine.receive_data(sid, text).await?;

    Ok(([(CONTENT_TYPE, TEXT_PLAIN)], OK_BODY).into_response())
}

async fn websocket_upgrade(
    parts: &mut Parts,
    state: &Arc<HttpState>,
) -> Result<WebSocketUpgrade, EngineError> {
    WebSocketUpgrade::from_request_parts(parts, state)
        .await
        .map_err(|rejection| EngineError::InvalidQuery(rejection.body_text()))
}

fn wants_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
}

fn capture_handshake(parts: &Parts) -> Handshake {
    let headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();

    let forwarded_https = parts
        .headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|proto| proto.eq_ignore_ascii_case("https"));

    let query = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
        .map(|Query(query)| query)
        .unwrap_or_default();

    Handshake {
        headers,
        address: parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr),
        is_secure: forwarded_https || parts.uri.scheme_str() == Some("https"),
        url: parts.uri.to_string(),
        query,
    }
}
