//! Connection gateway: WebSocket upgrade, connect-time authentication, and
//! the per-connection event loop.
//!
//! Identity is checked exactly once, before the upgrade completes; only an
//! authentication failure terminates a connection outright. After that,
//! every handler error is contained to the connection it came from.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use rencontre_shared::identity::IdentityToken;
use rencontre_shared::{ClientEvent, ConnId, ServerEvent, UserId};

use crate::api::AppState;
use crate::error::ServerError;
use crate::identity::IdentityVerifier;
use crate::relay;

#[derive(Deserialize)]
pub struct ConnectParams {
    /// URL-safe base64 JSON [`IdentityToken`]; absent for anonymous users.
    token: Option<String>,
}

/// `GET /ws` -- authenticate, then hand the socket to [`handle_socket`].
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> Result<Response, ServerError> {
    let identity = authenticate(
        &state.verifier,
        state.config.allow_anonymous,
        params.token.as_deref(),
    )
    .await?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, identity, state)))
}

/// Resolve the connect-time identity, or reject the connection.
async fn authenticate(
    verifier: &IdentityVerifier,
    allow_anonymous: bool,
    token: Option<&str>,
) -> Result<Option<UserId>, ServerError> {
    match token {
        Some(raw) => {
            let token = IdentityToken::from_base64(raw)
                .ok_or_else(|| ServerError::Unauthorized("malformed identity token".into()))?;
            let user = verifier
                .verify(&token)
                .await
                .ok_or_else(|| ServerError::Unauthorized("invalid identity token".into()))?;
            Ok(Some(user))
        }
        None if allow_anonymous => Ok(None),
        None => Err(ServerError::Unauthorized("identity token required".into())),
    }
}

async fn handle_socket(socket: WebSocket, identity: Option<UserId>, state: AppState) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let conn = state.matchmaker.register(identity.clone(), tx).await;

    info!(
        conn = %conn.short(),
        anonymous = identity.is_none(),
        "connection established"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer task: drain the event channel into JSON text frames.
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Ok(json) = serde_json::to_string(&event) else {
                continue;
            };
            if ws_tx.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => dispatch(&state, conn, event).await,
                            Err(e) => {
                                warn!(conn = %conn.short(), error = %e, "unparseable client event");
                                state
                                    .matchmaker
                                    .send_to(
                                        conn,
                                        ServerEvent::Error {
                                            message: format!("invalid event: {e}"),
                                        },
                                    )
                                    .await;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(conn = %conn.short(), "client closed connection");
                        break;
                    }
                    // Ping/pong is handled by axum; binary frames are ignored.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(conn = %conn.short(), error = %e, "socket error");
                        break;
                    }
                }
            }
            _ = &mut send_task => break,
        }
    }

    // Socket teardown and explicit leave share one transition; disconnect
    // additionally destroys the handle. Idempotent against duplicates.
    state.matchmaker.disconnect(conn).await;
    send_task.abort();

    info!(conn = %conn.short(), "connection closed");
}

async fn dispatch(state: &AppState, conn: ConnId, event: ClientEvent) {
    match event {
        ClientEvent::JoinWaiting => state.matchmaker.join_waiting(conn).await,
        ClientEvent::Leave => state.matchmaker.leave(conn).await,
        ClientEvent::TypingStart => relay::set_typing(&state.matchmaker, conn, true).await,
        ClientEvent::TypingStop => relay::set_typing(&state.matchmaker, conn, false).await,
        ClientEvent::SendMessage { content } => {
            relay::send_message(
                &state.matchmaker,
                &state.guard,
                &state.db,
                state.config.retention(),
                conn,
                content,
            )
            .await
        }
    }
}
