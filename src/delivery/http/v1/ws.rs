use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tokio::time::{Instant, interval_at, timeout};
use uuid::Uuid;

use crate::usecase::hub::{ConnectionHandle, ConnectionHub, Mailbox};
use crate::AppState;

const WRITE_WAIT: Duration = Duration::from_secs(10);
const PONG_WAIT: Duration = Duration::from_secs(60);
const PING_PERIOD: Duration = Duration::from_secs(54);
const MAX_MESSAGE_SIZE: usize = 512;

#[derive(Deserialize)]
pub struct WsQuery {
    token: String,
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let user_id = match state.jwt_service.authenticate(&query.token) {
        Ok(user_id) => user_id,
        Err(e) => {
            tracing::warn!(error = %e, "WS connection rejected: invalid token");
            return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        }
    };

    tracing::info!(user_id = %user_id, "WS connection accepted, upgrading");

    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, user_id, state))
}

async fn handle_socket(socket: WebSocket, user_id: Uuid, state: Arc<AppState>) {
    let (ws_sender, ws_receiver) = socket.split();
    pump_connection(ws_sender, ws_receiver, state.hub.clone(), user_id).await;
}

/// Registers the connection and runs its two pumps until either side ends.
/// The connection is unregistered as soon as the first pump exits.
async fn pump_connection<S, R, E>(sink: S, stream: R, hub: Arc<ConnectionHub>, user_id: Uuid)
where
    S: Sink<Message> + Unpin + Send + 'static,
    R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let already_online = hub.is_online(user_id).await;
    let (handle, mailbox) = hub.register(user_id).await;
    tracing::debug!(connection_id = %handle.id, already_online, "WS pumps starting");

    let mut writer = tokio::spawn(write_pump(sink, mailbox, handle));
    let mut reader = tokio::spawn(read_pump(stream, handle));

    tokio::select! {
        _ = &mut reader => {
            // unregister closes the mailbox; give the writer a chance to send Close
            hub.unregister(&handle).await;
            if timeout(WRITE_WAIT, &mut writer).await.is_err() {
                writer.abort();
            }
        }
        _ = &mut writer => {
            hub.unregister(&handle).await;
            reader.abort();
        }
    }

    let remaining = hub.connection_count(user_id).await;
    tracing::info!(
        user_id = %user_id,
        connection_id = %handle.id,
        remaining,
        "WS client disconnected"
    );
}

async fn send_with_deadline<S>(sink: &mut S, message: Message) -> bool
where
    S: Sink<Message> + Unpin,
{
    matches!(timeout(WRITE_WAIT, sink.send(message)).await, Ok(Ok(())))
}

/// Drains the mailbox to the socket and keeps the peer alive with pings.
async fn write_pump<S>(mut ws_sender: S, mut mailbox: Mailbox, handle: ConnectionHandle)
where
    S: Sink<Message> + Unpin,
{
    let mut ping = interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);

    loop {
        tokio::select! {
            batch = mailbox.next_batch() => match batch {
                Some(text) => {
                    if !send_with_deadline(&mut ws_sender, Message::Text(text.into())).await {
                        tracing::info!(connection_id = %handle.id, "WS send failed, client disconnected");
                        break;
                    }
                }
                None => {
                    tracing::debug!(connection_id = %handle.id, "mailbox closed");
                    let _ = send_with_deadline(&mut ws_sender, Message::Close(None)).await;
                    break;
                }
            },
            _ = ping.tick() => {
                if !send_with_deadline(&mut ws_sender, Message::Ping(Bytes::new())).await {
                    tracing::info!(connection_id = %handle.id, "WS ping failed");
                    break;
                }
            }
        }
    }
}

/// Consumes inbound frames until the peer closes, errors or goes silent.
async fn read_pump<R, E>(mut ws_receiver: R, handle: ConnectionHandle)
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    loop {
        match timeout(PONG_WAIT, ws_receiver.next()).await {
            Err(_) => {
                tracing::info!(connection_id = %handle.id, "WS read deadline exceeded");
                break;
            }
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => break,
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(e))) => {
                tracing::debug!(connection_id = %handle.id, error = %e, "WS receive error");
                break;
            }
        }
    }
}
