//! WebSocket endpoint for board sessions.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use taskboard_domain::{Actor, BoardId};
use tracing::{instrument, Span};

use crate::state::SyncState;

#[derive(Debug, Default, Deserialize)]
pub struct ConnectQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// Routes for board sessions: `/ws/boards/{board_id}/?token=...`.
pub fn router() -> Router<SyncState> {
    Router::new()
        .route("/ws/boards/{board_id}/", get(upgrade))
        .route("/ws/boards/{board_id}", get(upgrade))
}

async fn upgrade(
    ws: WebSocketUpgrade,
    Path(board_id): Path<BoardId>,
    Query(query): Query<ConnectQuery>,
    State(state): State<SyncState>,
) -> impl IntoResponse {
    let actor = state.resolve_actor(query.token.as_deref()).await;
    ws.on_upgrade(move |socket| handle(socket, state, board_id, actor))
}

#[instrument(
    name = "board_ws.session",
    skip(socket, state),
    fields(connection_id = tracing::field::Empty)
)]
async fn handle(socket: WebSocket, state: SyncState, board_id: BoardId, actor: Actor) {
    let (mut handler, mut outgoing) = state.open_connection(board_id, actor);
    Span::current().record("connection_id", format_args!("{}", handler.id()));

    let (mut ws_sender, mut ws_receiver) = socket.split();

    if let Err(error) = handler.connect().await {
        tracing::info!(%error, "connection refused");
    }

    loop {
        tokio::select! {
            event = outgoing.recv() => {
                // The registry dropped this connection (board deleted, member
                // removed, queue overflow, or shutdown)
                let Some(event) = event else { break };
                let text = match event.to_json() {
                    Ok(text) => text,
                    Err(error) => {
                        tracing::warn!(%error, event = event.name(), "failed to encode event");
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            message = ws_receiver.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        handler.receive(text.as_str()).await;
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if ws_sender.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        tracing::debug!(%error, "websocket receive error");
                        break;
                    }
                }
            }
        }
    }

    handler.close();
    let _ = ws_sender.send(Message::Close(None)).await;
    tracing::info!("board session ended");
}
