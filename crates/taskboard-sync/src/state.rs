use std::sync::Arc;
use taskboard_core::{AppConfig, SyncConfig};
use taskboard_domain::{Actor, BoardId, RolePolicy};
use taskboard_store::BoardStore;
use tokio::sync::mpsc;

use crate::connection::ConnectionHandler;
use crate::dispatcher::CommandDispatcher;
use crate::message::ServerEvent;
use crate::registry::BoardSessionRegistry;
use crate::reminders::ReminderScheduler;
use crate::services::{AuthService, NotificationService};

/// Shared handles for the WebSocket endpoint.
#[derive(Clone)]
pub struct SyncState {
    store: Arc<dyn BoardStore>,
    auth: Arc<dyn AuthService>,
    dispatcher: Arc<CommandDispatcher>,
    reminders: Option<ReminderScheduler>,
    sync: SyncConfig,
}

impl SyncState {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn BoardStore>,
        auth: Arc<dyn AuthService>,
        notifier: Arc<dyn NotificationService>,
    ) -> Self {
        let registry = Arc::new(BoardSessionRegistry::new(config.sync.echo_to_sender));
        let policy = Arc::new(RolePolicy::new(config.policy.restrict_list_management));
        let reminders = config.reminders.enabled.then(|| {
            ReminderScheduler::new(store.clone(), notifier.clone(), config.reminders.lead_minutes)
        });
        let dispatcher = Arc::new(CommandDispatcher::new(
            store.clone(),
            registry,
            policy,
            notifier,
            reminders.clone(),
        ));

        Self {
            store,
            auth,
            dispatcher,
            reminders,
            sync: config.sync.clone(),
        }
    }

    pub fn store(&self) -> &Arc<dyn BoardStore> {
        &self.store
    }

    pub fn dispatcher(&self) -> &Arc<CommandDispatcher> {
        &self.dispatcher
    }

    pub fn registry(&self) -> &Arc<BoardSessionRegistry> {
        self.dispatcher.registry()
    }

    pub fn reminders(&self) -> Option<&ReminderScheduler> {
        self.reminders.as_ref()
    }

    /// A token that is missing, invalid, or names an unknown user yields an anonymous actor.
    pub async fn resolve_actor(&self, token: Option<&str>) -> Actor {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return Actor::Anonymous;
        };
        let Some(user_id) = self.auth.resolve(token).await else {
            return Actor::Anonymous;
        };
        match self.store.get_user(user_id).await {
            Ok(Some(user)) => Actor::User(user.id),
            Ok(None) => {
                tracing::debug!(%user_id, "token names unknown user");
                Actor::Anonymous
            }
            Err(error) => {
                tracing::warn!(%user_id, %error, "user lookup failed");
                Actor::Anonymous
            }
        }
    }

    pub fn open_connection(
        &self,
        board_id: BoardId,
        actor: Actor,
    ) -> (ConnectionHandler, mpsc::Receiver<ServerEvent>) {
        ConnectionHandler::new(board_id, actor, self.dispatcher.clone(), &self.sync)
    }

    /// Close every session and cancel pending reminders.
    pub fn shutdown(&self) {
        self.registry().shutdown();
        if let Some(reminders) = &self.reminders {
            reminders.cancel_all();
        }
    }
}
