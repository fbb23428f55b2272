use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures::SinkExt;
use serde::Deserialize;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::rest::extract::access_token;
use crate::auth::Claims;
use crate::error::AppError;
use crate::realtime::{ClientMessage, Connection, ConnectionId};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let token = access_token(&headers)
        .or(query.token)
        .ok_or_else(|| AppError::Authentication("Authentication required".to_string()))?;
    let claims = state.jwt.verify_access(&token)?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, claims)))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, claims: Claims) {
    let user_id = claims.user_id();
    let Connection {
        id: conn_id,
        direct,
        broadcast,
    } = state.dispatcher.connect();
    state.metrics.realtime_connections.inc();

    info!(conn_id = %conn_id, user_id = %user_id, role = %claims.role, "websocket client connected");

    let (mut sender, mut receiver) = futures::StreamExt::split(socket);

    let broadcast_events = BroadcastStream::new(broadcast).filter_map(move |item| match item {
        Ok(envelope) if envelope.is_for(user_id) => Some(envelope.event),
        Ok(_) => None,
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!(conn_id = %conn_id, skipped, "websocket client lagging, events dropped");
            None
        }
    });
    let mut events = Box::pin(broadcast_events.merge(ReceiverStream::new(direct)));

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, event = event.name(), "failed to serialize event for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Text(text) => {
                    handle_client_message(&recv_state, conn_id, user_id, &text);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.dispatcher.disconnect(conn_id);
    state.metrics.realtime_connections.dec();

    info!(conn_id = %conn_id, user_id = %user_id, "websocket client disconnected");
}

/// A socket may only register the identity it authenticated as.
fn handle_client_message(state: &AppState, conn_id: ConnectionId, user_id: Uuid, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::RegisterUser { user_id: requested }) if requested == user_id => {
            state.dispatcher.bind(user_id, conn_id);
        }
        Ok(ClientMessage::RegisterUser { user_id: requested }) => {
            warn!(
                conn_id = %conn_id,
                user_id = %user_id,
                requested = %requested,
                "refusing to bind connection to another user"
            );
        }
        Err(err) => {
            debug!(conn_id = %conn_id, error = %err, "ignoring unrecognised client message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn register_binds_only_own_identity() {
        let state = AppState::new(Config::for_tests());
        let me = Uuid::from_u128(1);
        let someone_else = Uuid::from_u128(2);
        let conn = state.dispatcher.connect();

        let foreign = format!(r#"{{"event":"registerUser","userId":"{someone_else}"}}"#);
        handle_client_message(&state, conn.id, me, &foreign);
        assert_eq!(state.dispatcher.resolve(someone_else), None);

        let own = format!(r#"{{"event":"registerUser","userId":"{me}"}}"#);
        handle_client_message(&state, conn.id, me, &own);
        assert_eq!(state.dispatcher.resolve(me), Some(conn.id));
    }

    #[test]
    fn garbage_frames_are_ignored() {
        let state = AppState::new(Config::for_tests());
        let conn = state.dispatcher.connect();
        handle_client_message(&state, conn.id, Uuid::from_u128(1), "not json");
        assert_eq!(state.dispatcher.resolve(Uuid::from_u128(1)), None);
    }
}
