//! Per-connection lifecycle.
//!
//! A [`ConnectionHandler`] moves through `Connecting -> Joined -> Closed`.
//! Joining subscribes its outgoing queue to the board registry; inbound
//! frames are decoded and handed to the dispatcher; replies meant only for
//! this connection (`error`, `ack`) go to the same queue so they stay in
//! order with broadcasts. The handler keeps only a weak handle on the queue,
//! so the connection ends as soon as the registry lets go of it.

use std::sync::Arc;
use taskboard_core::SyncConfig;
use taskboard_domain::{Actor, BoardId};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::dispatcher::{CommandDispatcher, DispatchError, SessionContext};
use crate::message::{AckPayload, ErrorCode, ErrorPayload, Inbound, ServerEvent};
use crate::registry::ConnectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Joined,
    Closed,
}

pub struct ConnectionHandler {
    session: SessionContext,
    state: ConnectionState,
    dispatcher: Arc<CommandDispatcher>,
    send_snapshot: bool,
    acknowledge: bool,
    /// Strong sender held only until it is handed to the registry.
    pending: Option<mpsc::Sender<ServerEvent>>,
    outbound: mpsc::WeakSender<ServerEvent>,
}

impl ConnectionHandler {
    pub fn new(
        board_id: BoardId,
        actor: Actor,
        dispatcher: Arc<CommandDispatcher>,
        config: &SyncConfig,
    ) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (sender, receiver) = mpsc::channel(config.outgoing_buffer);
        let handler = Self {
            session: SessionContext {
                connection_id: Uuid::new_v4(),
                board_id,
                actor,
            },
            state: ConnectionState::Connecting,
            dispatcher,
            send_snapshot: config.send_snapshot_on_join,
            acknowledge: config.acknowledge_actions,
            outbound: sender.downgrade(),
            pending: Some(sender),
        };
        (handler, receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.session.connection_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Join the board. On failure an `error` event is queued and the
    /// connection is closed.
    pub async fn connect(&mut self) -> Result<(), DispatchError> {
        let Some(sender) = self.pending.take() else {
            return Ok(());
        };

        match self
            .dispatcher
            .join(&self.session, sender.clone(), self.send_snapshot)
            .await
        {
            Ok(snapshot) => {
                self.state = ConnectionState::Joined;
                tracing::info!(
                    board_id = %self.session.board_id,
                    actor = %self.session.actor,
                    snapshot,
                    "connection joined"
                );
                Ok(())
            }
            Err(error) => {
                self.state = ConnectionState::Closed;
                let _ = sender.try_send(error_event(&error, None, None));
                Err(error)
            }
        }
    }

    /// Handle one inbound text frame.
    pub async fn receive(&mut self, text: &str) -> ConnectionState {
        if self.state != ConnectionState::Joined {
            return self.state;
        }

        match Inbound::parse(text) {
            Inbound::Unknown { action } => {
                tracing::debug!(%action, "ignoring unknown action");
            }
            Inbound::Malformed {
                action,
                request_id,
                reason,
            } => {
                self.reply(ServerEvent::Error(ErrorPayload {
                    code: ErrorCode::Malformed,
                    message: reason,
                    action,
                    request_id,
                }));
            }
            Inbound::Action { action, request_id } => {
                let name = action.name();
                match self.dispatcher.dispatch(&self.session, action).await {
                    Ok(outcome) => {
                        if outcome.board_closed {
                            self.state = ConnectionState::Closed;
                        } else if self.acknowledge {
                            if let Some(request_id) = request_id {
                                self.reply(ServerEvent::Ack(AckPayload {
                                    action: name.to_string(),
                                    request_id,
                                }));
                            }
                        }
                    }
                    Err(error) => {
                        tracing::debug!(action = name, %error, "action rejected");
                        self.reply(error_event(&error, Some(name), request_id));
                    }
                }
            }
        }
        self.state
    }

    /// Leave the board. Safe to call more than once.
    pub fn close(&mut self) {
        self.pending = None;
        if self.state == ConnectionState::Joined {
            self.dispatcher
                .registry()
                .leave(self.session.board_id, self.session.connection_id);
        }
        self.state = ConnectionState::Closed;
    }

    fn reply(&self, event: ServerEvent) {
        let Some(sender) = self.outbound.upgrade() else {
            return;
        };
        if let Err(error) = sender.try_send(event) {
            tracing::debug!(connection_id = %self.session.connection_id, %error, "reply dropped");
        }
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        self.close();
    }
}

fn error_event(
    error: &DispatchError,
    action: Option<&str>,
    request_id: Option<String>,
) -> ServerEvent {
    ServerEvent::Error(ErrorPayload {
        code: error.code(),
        message: error.to_string(),
        action: action.map(str::to_string),
        request_id,
    })
}
