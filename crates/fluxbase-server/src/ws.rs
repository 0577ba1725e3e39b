//! The WebSocket gateway.
//!
//! One upgrade path (`/realtime`), optionally carrying a bearer token
//! in the query string. Frames of a single connection are processed
//! sequentially; the writer task drains the drop-oldest outbound
//! buffer. The heartbeat enforces the read deadline and revalidates
//! the connection's identity so revoked tokens lose their
//! subscriptions within one interval.

use crate::state::AppState;
use axum::Extension;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use fluxbase_core::protocol::{ClientFrame, ServerFrame, codes};
use fluxbase_core::{Channel, CredentialSource, Error, Identity};
use fluxbase_realtime::outbound;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct UpgradeParams {
    token: Option<String>,
}

pub async fn upgrade(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
    Query(params): Query<UpgradeParams>,
    Extension(identity): Extension<Identity>,
) -> Result<Response, crate::error::ApiError> {
    // The middleware already authenticated the headers. Browser
    // WebSocket clients cannot set headers, so a query-string token
    // fills in when none was presented.
    let identity = match (identity.source, params.token.as_deref()) {
        (CredentialSource::Anonymous, Some(token)) if !token.is_empty() => {
            state.validator.authenticate_bearer(token).await?
        }
        _ => identity,
    };

    Ok(ws.on_upgrade(move |socket| handle_socket(state, socket, identity)))
}

async fn handle_socket(state: Arc<AppState>, socket: WebSocket, identity: Identity) {
    let connection_id = Uuid::new_v4();
    let (outbound_tx, mut outbound_rx) = outbound::channel(state.cfg.realtime.outbound_buffer);

    let (mut sink, mut stream) = socket.split();

    if let Err(e) = state
        .registry
        .register(connection_id, identity.clone(), outbound_tx.clone())
        .await
    {
        let frame = ServerFrame::error(e.code(), e.public_message(), None);
        if let Ok(text) = serde_json::to_string(&frame) {
            let _ = sink.send(Message::Text(text.into())).await;
        }
        let _ = sink.close().await;
        return;
    }
    tracing::debug!(%connection_id, role = %identity.role, "websocket connected");

    // Writer task: everything outbound flows through the buffer.
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to serialize frame");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let read_deadline = Duration::from_secs(state.cfg.realtime.read_deadline_secs);
    let mut heartbeat = tokio::time::interval(Duration::from_secs(
        state.cfg.realtime.heartbeat_interval_secs,
    ));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            message = stream.next() => {
                let Some(Ok(message)) = message else {
                    break;
                };
                last_activity = Instant::now();
                match message {
                    Message::Text(text) => {
                        handle_frame(&state, connection_id, text.as_str(), &outbound_tx).await;
                    }
                    Message::Close(_) => break,
                    // Protocol-level pings are answered by the stack.
                    _ => {}
                }
            }
            _ = tokio::time::sleep_until(last_activity + read_deadline) => {
                tracing::debug!(%connection_id, "read deadline exceeded; closing");
                break;
            }
            _ = heartbeat.tick() => {
                if let Err(e) = state.validator.revalidate(&identity).await {
                    state
                        .registry
                        .cancel_subscriptions(
                            connection_id,
                            codes::UNAUTHORIZED,
                            &e.public_message(),
                        )
                        .await;
                    break;
                }
            }
        }
    }

    state.registry.unregister(connection_id).await;
    state.rate_limiter.forget(connection_id);
    outbound_tx.close();
    let _ = writer.await;
    tracing::debug!(%connection_id, "websocket closed");
}

/// Process one inbound frame. Errors become `error` frames; nothing
/// here disconnects the peer.
async fn handle_frame(
    state: &AppState,
    connection_id: Uuid,
    raw: &str,
    outbound: &outbound::Outbound,
) {
    if !state.rate_limiter.allow(connection_id) {
        outbound.send(ServerFrame::error(
            codes::RATE_LIMITED,
            "message rate limit exceeded",
            None,
        ));
        return;
    }

    let frame: ClientFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(e) => {
            outbound.send(ServerFrame::error(
                "BAD_REQUEST",
                format!("malformed frame: {e}"),
                None,
            ));
            return;
        }
    };

    match frame {
        ClientFrame::Ping => outbound.send(ServerFrame::Pong),
        ClientFrame::Subscribe { channel, filter } => {
            let parsed: Channel = match channel.parse() {
                Ok(parsed) => parsed,
                Err(_) => {
                    outbound.send(ServerFrame::error(
                        codes::INVALID_CHANNEL,
                        format!("invalid channel: {channel}"),
                        Some(channel),
                    ));
                    return;
                }
            };
            match state
                .registry
                .subscribe(connection_id, parsed, filter.as_deref())
                .await
            {
                Ok(()) => outbound.send(ServerFrame::ack(channel)),
                Err(e) => outbound.send(error_frame(e, Some(channel))),
            }
        }
        ClientFrame::Unsubscribe { channel } => {
            let parsed: Channel = match channel.parse() {
                Ok(parsed) => parsed,
                Err(_) => {
                    outbound.send(ServerFrame::error(
                        codes::INVALID_CHANNEL,
                        format!("invalid channel: {channel}"),
                        Some(channel),
                    ));
                    return;
                }
            };
            match state.registry.unsubscribe(connection_id, &parsed).await {
                Ok(()) => outbound.send(ServerFrame::ack(channel)),
                Err(e) => outbound.send(error_frame(e, Some(channel))),
            }
        }
        ClientFrame::Broadcast { channel, payload } => {
            let parsed: Channel = match channel.parse() {
                Ok(parsed @ Channel::Broadcast { .. }) => parsed,
                _ => {
                    outbound.send(ServerFrame::error(
                        codes::INVALID_CHANNEL,
                        "broadcast requires a broadcast:<topic> channel",
                        Some(channel),
                    ));
                    return;
                }
            };
            state.registry.broadcast(&parsed, payload).await;
            outbound.send(ServerFrame::ack(channel));
        }
    }
}

fn error_frame(error: Error, channel: Option<String>) -> ServerFrame {
    ServerFrame::error(error.code(), error.public_message(), channel)
}
