//! Bridges an axum WebSocket to the engine's frame channels.

use axum::extract::ws::{Message, WebSocket};
use engineio_session::WsFrame;
use futures::future;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

/// Split a socket into the engine's inbound stream and outbound sender.
///
/// A writer task owns the sink half and runs until every sender is gone or
/// a close frame has been written.
pub fn split_socket(socket: WebSocket) -> (BoxStream<'static, WsFrame>, mpsc::UnboundedSender<WsFrame>) {
    let (mut sink, stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsFrame>();

    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let message = match frame {
                WsFrame::Text(text) => Message::Text(text.into()),
                WsFrame::Binary(data) => Message::Binary(data),
                WsFrame::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            };
            if let Err(e) = sink.send(message).await {
                debug!("WebSocket write failed: {}", e);
                break;
            }
        }
    });

    let incoming = stream
        .filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(WsFrame::Text(text.to_string())),
                Ok(Message::Binary(data)) => Some(WsFrame::Binary(data)),
                Ok(Message::Close(_)) => Some(WsFrame::Close),
                // Control frames are answered by the socket itself
                Ok(_) => None,
                Err(e) => {
                    debug!("WebSocket read failed: {}", e);
                    Some(WsFrame::Close)
                }
            })
        })
        .boxed();

    (incoming, tx)
}
