//! WebSocket handler for seat-selection sessions
//!
//! Handles upgrade, authentication, the select/deselect loop and the
//! abandoned-cart cleanup on disconnect. The URL carries the function id;
//! the bearer token rides a query parameter because browsers cannot set
//! WebSocket headers.

use axum::extract::ws::{Message, WebSocket};
use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::messages::{ClientMessage, WsMessage};
use crate::core_types::{FunctionId, SeatCode, UserId};
use crate::error::{EngineError, with_retry};
use crate::gateway::state::AppState;
use crate::models::Function;

/// WebSocket connection query parameters.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: String,
}

/// WebSocket upgrade handler.
///
/// Endpoint: `GET /ws/functions/{function_id}?token=...`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(function_id): Path<FunctionId>,
    Query(params): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    // Authenticate and resolve the function before upgrading
    let user: UserId = match state
        .auth
        .verify_token(&params.token)
        .and_then(|claims| claims.sub.parse().map_err(|_| EngineError::Unauthorized))
    {
        Ok(user) => user,
        Err(_) => return StatusCode::UNAUTHORIZED.into_response(),
    };

    let function = match with_retry(|| state.store.functions.find_by_id(function_id)).await {
        Ok(Some(function)) => function,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Function lookup failed on WS open");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, function, user, state))
}

fn parse_seats(raw: &[String]) -> Result<Vec<SeatCode>, EngineError> {
    raw.iter().map(|s| SeatCode::parse(s)).collect()
}

/// Handle one session's lifecycle: join group, stream messages, clean up.
async fn handle_socket(socket: WebSocket, function: Function, user: UserId, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<WsMessage>(state.config.session_buffer);

    let hub = state.hub.clone();
    let session = hub.register(function.id, user, tx);

    // Full snapshot on (re)connection
    match state.inventory.query_map(&function).await {
        Ok(seat_map) => {
            hub.send_to(
                function.id,
                session,
                WsMessage::ConnectionEstablished {
                    function: function.id,
                    seat_map,
                    timestamp: Utc::now(),
                },
            );
        }
        Err(e) => {
            tracing::warn!(function = %function.id, error = %e, "Snapshot failed on WS open");
            hub.send_to(
                function.id,
                session,
                WsMessage::Error {
                    code: e.code().to_string(),
                    message: "seat map unavailable".to_string(),
                    timestamp: Utc::now(),
                },
            );
        }
    }

    // Forward outbound messages from the session buffer to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg)
                && sender.send(Message::Text(json.into())).await.is_err()
            {
                break;
            }
        }
    });

    // Seats held through this session; released on close
    let mut held: Vec<SeatCode> = Vec::new();

    loop {
        // The forward task finishing means the socket died or the hub
        // dropped this session as a slow consumer - either way, tear down
        let msg = tokio::select! {
            _ = &mut send_task => break,
            inbound = receiver.next() => match inbound {
                Some(Ok(msg)) => msg,
                _ => break,
            },
        };
        match msg {
            Message::Text(text) => {
                let Ok(cmd) = serde_json::from_str::<ClientMessage>(&text) else {
                    hub.send_to(
                        function.id,
                        session,
                        WsMessage::Error {
                            code: "BAD_MESSAGE".to_string(),
                            message: "expected {action: select|deselect, seats: [..]}".to_string(),
                            timestamp: Utc::now(),
                        },
                    );
                    continue;
                };

                match cmd {
                    ClientMessage::Select { seats } => {
                        handle_select(&state, &function, user, session, &seats, &mut held).await;
                    }
                    ClientMessage::Deselect { seats } => {
                        handle_deselect(&state, &function, user, session, &seats, &mut held).await;
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    send_task.abort();
    hub.unregister(function.id, session);

    // Abandoned cart: drop whatever this session still holds
    if !held.is_empty() {
        if let Err(e) = state.inventory.release(&function, user, &held).await {
            tracing::warn!(
                function = %function.id,
                user = %user,
                error = %e,
                "Disconnect cleanup failed; reaper will expire the holds"
            );
        }
    }
}

async fn handle_select(
    state: &Arc<AppState>,
    function: &Function,
    user: UserId,
    session: super::connection::SessionId,
    raw_seats: &[String],
    held: &mut Vec<SeatCode>,
) {
    let outcome = match parse_seats(raw_seats) {
        Ok(seats) => state
            .inventory
            .try_hold(function, user, &seats)
            .await
            .map(|expires_at| (seats, expires_at)),
        Err(e) => Err(e),
    };

    match outcome {
        Ok((seats, expires_at)) => {
            for seat in &seats {
                if !held.contains(seat) {
                    held.push(*seat);
                }
            }
            state.hub.send_to(
                function.id,
                session,
                WsMessage::SelectionConfirmed {
                    seats,
                    expires_at,
                    timestamp: Utc::now(),
                },
            );
        }
        Err(e) => {
            let conflicts = match &e {
                EngineError::SeatUnavailable(conflicts) => conflicts.clone(),
                _ => Vec::new(),
            };
            state.hub.send_to(
                function.id,
                session,
                WsMessage::SelectionFailed {
                    code: e.code().to_string(),
                    message: e.to_string(),
                    conflicts,
                    timestamp: Utc::now(),
                },
            );
        }
    }
}

async fn handle_deselect(
    state: &Arc<AppState>,
    function: &Function,
    user: UserId,
    session: super::connection::SessionId,
    raw_seats: &[String],
    held: &mut Vec<SeatCode>,
) {
    let outcome = match parse_seats(raw_seats) {
        Ok(seats) => state.inventory.release(function, user, &seats).await,
        Err(e) => Err(e),
    };

    match outcome {
        Ok(released) => {
            held.retain(|seat| !released.contains(seat));
        }
        Err(e) => {
            state.hub.send_to(
                function.id,
                session,
                WsMessage::SelectionFailed {
                    code: e.code().to_string(),
                    message: e.to_string(),
                    conflicts: Vec::new(),
                    timestamp: Utc::now(),
                },
            );
        }
    }
}
