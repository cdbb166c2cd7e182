//! Board session registry.
//!
//! Tracks which live connections are subscribed to which board and fans
//! events out to them. The registry holds the only strong sender of each
//! connection's outgoing queue, so dropping a subscriber closes that
//! connection's queue once it has drained.

use dashmap::DashMap;
use std::collections::HashMap;
use taskboard_domain::{Actor, BoardId, UserId};
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::message::ServerEvent;

pub type ConnectionId = Uuid;

#[derive(Debug)]
struct Subscriber {
    user_id: Option<UserId>,
    sender: mpsc::Sender<ServerEvent>,
}

/// Result of one fan-out.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Subscribers removed because their queue was full or closed.
    pub dropped: Vec<ConnectionId>,
}

pub struct BoardSessionRegistry {
    boards: DashMap<BoardId, HashMap<ConnectionId, Subscriber>>,
    echo_to_sender: bool,
}

impl BoardSessionRegistry {
    pub fn new(echo_to_sender: bool) -> Self {
        Self {
            boards: DashMap::new(),
            echo_to_sender,
        }
    }

    /// Subscribe a connection to a board. Joining twice keeps the first sender.
    pub fn join(
        &self,
        board_id: BoardId,
        connection_id: ConnectionId,
        actor: Actor,
        sender: mpsc::Sender<ServerEvent>,
    ) -> bool {
        let mut subscribers = self.boards.entry(board_id).or_default();
        if subscribers.contains_key(&connection_id) {
            return false;
        }
        subscribers.insert(
            connection_id,
            Subscriber {
                user_id: actor.user_id(),
                sender,
            },
        );
        tracing::debug!(
            %board_id,
            %connection_id,
            subscribers = subscribers.len(),
            "connection joined board"
        );
        true
    }

    /// Unsubscribe a connection. Boards without subscribers are dropped.
    pub fn leave(&self, board_id: BoardId, connection_id: ConnectionId) -> bool {
        let removed = match self.boards.get_mut(&board_id) {
            Some(mut subscribers) => subscribers.remove(&connection_id).is_some(),
            None => false,
        };
        self.boards
            .remove_if(&board_id, |_, subscribers| subscribers.is_empty());
        if removed {
            tracing::debug!(%board_id, %connection_id, "connection left board");
        }
        removed
    }

    /// Deliver `event` to every subscriber of `board_id`.
    ///
    /// `origin` is the connection whose action produced the event; it is skipped
    /// unless echo is enabled. Delivery never waits: a subscriber whose queue is
    /// full or closed is removed, and the rest still receive the event.
    pub fn broadcast(
        &self,
        board_id: BoardId,
        event: &ServerEvent,
        origin: Option<ConnectionId>,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        if let Some(subscribers) = self.boards.get(&board_id) {
            for (connection_id, subscriber) in subscribers.iter() {
                if !self.echo_to_sender && origin == Some(*connection_id) {
                    continue;
                }
                match subscriber.sender.try_send(event.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!(
                            %board_id,
                            %connection_id,
                            "outgoing queue full, dropping subscriber"
                        );
                        report.dropped.push(*connection_id);
                    }
                    Err(TrySendError::Closed(_)) => report.dropped.push(*connection_id),
                }
            }
        }

        for connection_id in &report.dropped {
            self.leave(board_id, *connection_id);
        }
        report
    }

    /// Unsubscribe every connection of `user_id` from a board.
    pub fn evict_user(&self, board_id: BoardId, user_id: UserId) -> usize {
        let evicted = match self.boards.get_mut(&board_id) {
            Some(mut subscribers) => {
                let before = subscribers.len();
                subscribers.retain(|_, subscriber| subscriber.user_id != Some(user_id));
                before - subscribers.len()
            }
            None => 0,
        };
        self.boards
            .remove_if(&board_id, |_, subscribers| subscribers.is_empty());
        evicted
    }

    /// Drop every subscriber of a board. Returns how many were removed.
    pub fn close_board(&self, board_id: BoardId) -> usize {
        let closed = self
            .boards
            .remove(&board_id)
            .map(|(_, subscribers)| subscribers.len())
            .unwrap_or(0);
        tracing::info!(%board_id, connections = closed, "closed board sessions");
        closed
    }

    pub fn subscriber_count(&self, board_id: BoardId) -> usize {
        self.boards
            .get(&board_id)
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }

    pub fn board_count(&self) -> usize {
        self.boards.len()
    }

    pub fn is_subscribed(&self, board_id: BoardId, connection_id: ConnectionId) -> bool {
        self.boards
            .get(&board_id)
            .map(|subscribers| subscribers.contains_key(&connection_id))
            .unwrap_or(false)
    }

    /// Drop all subscribers on every board.
    pub fn shutdown(&self) {
        let boards = self.boards.len();
        self.boards.clear();
        tracing::info!(boards, "session registry shut down");
    }
}
