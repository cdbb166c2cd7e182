//! Command dispatcher.
//!
//! Every inbound action runs through [`CommandDispatcher::dispatch`], which
//! takes the board's lock, resolves the actor's role once, asks the policy,
//! applies the mutation through the store and broadcasts the resulting
//! events before releasing the lock. Subscribers therefore observe events in
//! the order mutations were applied. Reminder timers are armed under the
//! lock too; notifications go out after it is released.

use dashmap::DashMap;
use std::sync::Arc;
use taskboard_core::TaskboardError;
use taskboard_domain::{
    normalize_email, normalize_name, Actor, AuthorizationPolicy, BoardAccess, BoardAction,
    BoardId, BoardState, ListId, ListState, MemberState, NewTask, Role, Task, TaskId, TaskList,
    UserId,
};
use taskboard_store::BoardStore;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use crate::message::{
    AddListPayload, AddTaskPayload, AddUserPayload, BoardDeleted, BoardRenamed, ClientAction,
    DeleteBoardPayload, DeleteListPayload, DeleteTaskPayload, DeleteUserPayload,
    EditListNamePayload, ErrorCode, ListDeleted, ListRenamed, ListReordered, MoveTaskPayload,
    ReorderTaskPayload, ServerEvent, SetStatusPayload, StatusChanged, TaskDeleted, TaskMoved,
    TaskOrder, UpdateBoardNamePayload, UpdateTaskPayload, UserRemoved,
};
use crate::registry::{BoardSessionRegistry, ConnectionId};
use crate::reminders::ReminderScheduler;
use crate::services::{Notification, NotificationService};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{actor} may not {action}")]
    PermissionDenied { actor: Actor, action: BoardAction },
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Invalid(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::PermissionDenied { .. } => ErrorCode::PermissionDenied,
            Self::Malformed(_) => ErrorCode::Malformed,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::Invalid(_) => ErrorCode::Invalid,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    fn not_found(kind: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{kind} {id}"))
    }
}

impl From<TaskboardError> for DispatchError {
    fn from(error: TaskboardError) -> Self {
        match error {
            TaskboardError::NotFound(what) => Self::NotFound(what),
            TaskboardError::Validation(message) => Self::Invalid(message),
            TaskboardError::Conflict(message) => Self::Conflict(message),
            TaskboardError::PermissionDenied(message) => Self::Internal(message),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Identity of the connection an action arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionContext {
    pub connection_id: ConnectionId,
    pub board_id: BoardId,
    pub actor: Actor,
}

/// What a successful action produced.
#[derive(Debug, Clone, Default)]
pub struct DispatchOutcome {
    /// Events broadcast to the board, in order.
    pub events: Vec<ServerEvent>,
    /// The board was deleted and its sessions closed.
    pub board_closed: bool,
}

#[derive(Default)]
struct Effects {
    events: Vec<ServerEvent>,
    notifications: Vec<(UserId, Notification)>,
    reminders: Vec<Task>,
    cancelled_reminders: Vec<TaskId>,
    evict: Vec<UserId>,
    close_board: bool,
}

impl Effects {
    fn event(event: ServerEvent) -> Self {
        Self {
            events: vec![event],
            ..Default::default()
        }
    }
}

pub struct CommandDispatcher {
    store: Arc<dyn BoardStore>,
    registry: Arc<BoardSessionRegistry>,
    policy: Arc<dyn AuthorizationPolicy>,
    notifier: Arc<dyn NotificationService>,
    reminders: Option<ReminderScheduler>,
    board_locks: DashMap<BoardId, Arc<Mutex<()>>>,
}

impl CommandDispatcher {
    pub fn new(
        store: Arc<dyn BoardStore>,
        registry: Arc<BoardSessionRegistry>,
        policy: Arc<dyn AuthorizationPolicy>,
        notifier: Arc<dyn NotificationService>,
        reminders: Option<ReminderScheduler>,
    ) -> Self {
        Self {
            store,
            registry,
            policy,
            notifier,
            reminders,
            board_locks: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<BoardSessionRegistry> {
        &self.registry
    }

    fn board_lock(&self, board_id: BoardId) -> Arc<Mutex<()>> {
        self.board_locks
            .entry(board_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock entry of a board that turned out not to exist, unless
    /// another caller is holding or waiting on it.
    fn release_unknown_board(&self, board_id: BoardId, lock: Arc<Mutex<()>>) {
        self.board_locks.remove_if(&board_id, |_, entry| {
            Arc::ptr_eq(entry, &lock) && Arc::strong_count(entry) <= 2
        });
    }

    async fn access(&self, session: &SessionContext) -> Result<BoardAccess, DispatchError> {
        let role = match session.actor.user_id() {
            Some(user_id) => self
                .store
                .get_membership(session.board_id, user_id)
                .await?
                .map(|membership| membership.role),
            None => None,
        };
        Ok(BoardAccess::new(session.actor, session.board_id, role))
    }

    fn authorize(&self, access: &BoardAccess, action: BoardAction) -> Result<(), DispatchError> {
        if self.policy.check(access, action) {
            Ok(())
        } else {
            Err(DispatchError::PermissionDenied {
                actor: access.actor,
                action,
            })
        }
    }

    /// Subscribe a connection to its board, queueing a `full_board_state`
    /// snapshot first when requested and the actor may view the board.
    ///
    /// Runs under the board lock so the snapshot is always the first event in
    /// the queue and no broadcast falls between it and the subscription.
    /// Returns whether a snapshot was queued.
    pub async fn join(
        &self,
        session: &SessionContext,
        sender: mpsc::Sender<ServerEvent>,
        want_snapshot: bool,
    ) -> Result<bool, DispatchError> {
        let lock = self.board_lock(session.board_id);
        let guard = lock.lock().await;

        if self.store.get_board(session.board_id).await?.is_none() {
            drop(guard);
            self.release_unknown_board(session.board_id, lock);
            return Err(DispatchError::not_found("board", session.board_id));
        }
        let access = self.access(session).await?;
        let snapshot: Option<BoardState> =
            if want_snapshot && self.policy.check(&access, BoardAction::ViewBoard) {
                self.store.board_state(session.board_id).await?
            } else {
                None
            };

        let sent_snapshot = match snapshot {
            Some(state) => sender.try_send(ServerEvent::FullBoardState(state)).is_ok(),
            None => false,
        };
        self.registry.join(
            session.board_id,
            session.connection_id,
            session.actor,
            sender,
        );
        Ok(sent_snapshot)
    }

    /// Apply one action and broadcast its events.
    ///
    /// On error nothing was changed and nothing was broadcast.
    pub async fn dispatch(
        &self,
        session: &SessionContext,
        action: ClientAction,
    ) -> Result<DispatchOutcome, DispatchError> {
        let name = action.name();
        let lock = self.board_lock(session.board_id);
        let guard = lock.lock().await;

        if self.store.get_board(session.board_id).await?.is_none() {
            drop(guard);
            self.release_unknown_board(session.board_id, lock);
            return Err(DispatchError::not_found("board", session.board_id));
        }
        let access = self.access(session).await?;
        let effects = match action {
            ClientAction::MoveTask(payload) => self.move_task(&access, payload).await,
            ClientAction::ReorderTask(payload) => self.reorder_task(&access, payload).await,
            ClientAction::SetStatus(payload) => self.set_status(&access, payload).await,
            ClientAction::AddUser(payload) => self.add_user(&access, payload).await,
            ClientAction::DeleteUser(payload) => self.delete_user(&access, payload).await,
            ClientAction::AddList(payload) => self.add_list(&access, payload).await,
            ClientAction::EditListName(payload) => self.edit_list_name(&access, payload).await,
            ClientAction::DeleteList(payload) => self.delete_list(&access, payload).await,
            ClientAction::AddTask(payload) => self.add_task(&access, payload).await,
            ClientAction::UpdateTask(payload) => self.update_task(&access, payload).await,
            ClientAction::DeleteTask(payload) => self.delete_task(&access, payload).await,
            ClientAction::UpdateBoardName(payload) => {
                self.update_board_name(&access, payload).await
            }
            ClientAction::DeleteBoard(payload) => self.delete_board(&access, payload).await,
        }?;

        for event in &effects.events {
            self.registry
                .broadcast(session.board_id, event, Some(session.connection_id));
        }
        for user_id in &effects.evict {
            self.registry.evict_user(session.board_id, *user_id);
        }
        if effects.close_board {
            self.registry.close_board(session.board_id);
            self.board_locks.remove(&session.board_id);
        }
        if let Some(reminders) = &self.reminders {
            for task_id in &effects.cancelled_reminders {
                reminders.cancel(*task_id);
            }
            for task in &effects.reminders {
                reminders.schedule(task);
            }
        }
        drop(guard);

        tracing::debug!(
            board_id = %session.board_id,
            actor = %session.actor,
            action = name,
            events = effects.events.len(),
            "action applied"
        );

        for (user_id, notification) in effects.notifications {
            let kind = notification.kind();
            if let Err(error) = self.notifier.send(user_id, notification).await {
                tracing::warn!(%user_id, kind, %error, "failed to send notification");
            }
        }

        Ok(DispatchOutcome {
            events: effects.events,
            board_closed: effects.close_board,
        })
    }

    async fn list_on_board(
        &self,
        board_id: BoardId,
        list_id: ListId,
    ) -> Result<TaskList, DispatchError> {
        match self.store.get_list(list_id).await? {
            Some(list) if list.board_id == board_id => Ok(list),
            _ => Err(DispatchError::not_found("list", list_id)),
        }
    }

    async fn task_on_board(
        &self,
        board_id: BoardId,
        task_id: TaskId,
    ) -> Result<Task, DispatchError> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("task", task_id))?;
        match self.store.get_list(task.list_id).await? {
            Some(list) if list.board_id == board_id => Ok(task),
            _ => Err(DispatchError::not_found("task", task_id)),
        }
    }

    fn same_board(access: &BoardAccess, board_id: BoardId) -> Result<(), DispatchError> {
        if access.board_id == board_id {
            Ok(())
        } else {
            Err(DispatchError::not_found("board", board_id))
        }
    }

    async fn list_orders(&self, list_id: ListId) -> Result<Vec<TaskOrder>, DispatchError> {
        Ok(self
            .store
            .tasks_in_list(list_id)
            .await?
            .iter()
            .map(TaskOrder::from)
            .collect())
    }

    async fn ensure_members(
        &self,
        board_id: BoardId,
        users: &[UserId],
    ) -> Result<(), DispatchError> {
        for user_id in users {
            if self.store.get_membership(board_id, *user_id).await?.is_none() {
                return Err(DispatchError::Invalid(format!(
                    "user {user_id} is not a member of this board"
                )));
            }
        }
        Ok(())
    }

    async fn move_task(
        &self,
        access: &BoardAccess,
        payload: MoveTaskPayload,
    ) -> Result<Effects, DispatchError> {
        self.authorize(access, BoardAction::MoveTask)?;
        let task = self.task_on_board(access.board_id, payload.task_id).await?;
        if task.list_id != payload.source_list_id {
            return Err(DispatchError::Conflict(format!(
                "task {} is not in list {}",
                task.id, payload.source_list_id
            )));
        }
        let target = self
            .list_on_board(access.board_id, payload.target_list_id)
            .await?;

        let moved = self.store.move_task(task.id, target.id).await?;
        let source_orders = self.list_orders(moved.source_list_id).await?;

        Ok(Effects::event(ServerEvent::MoveTask(TaskMoved {
            task_id: moved.task.id,
            source_list_id: moved.source_list_id,
            target_list_id: target.id,
            new_order: moved.task.order,
            source_orders,
        })))
    }

    async fn reorder_task(
        &self,
        access: &BoardAccess,
        payload: ReorderTaskPayload,
    ) -> Result<Effects, DispatchError> {
        self.authorize(access, BoardAction::ReorderTask)?;
        let list = self.list_on_board(access.board_id, payload.list_id).await?;
        let assigned = self.store.reorder_list(list.id, &payload.task_order).await?;

        Ok(Effects::event(ServerEvent::ReorderTask(ListReordered {
            list_id: list.id,
            task_order: assigned
                .into_iter()
                .map(|(task_id, order)| TaskOrder { task_id, order })
                .collect(),
        })))
    }

    async fn set_status(
        &self,
        access: &BoardAccess,
        payload: SetStatusPayload,
    ) -> Result<Effects, DispatchError> {
        self.authorize(access, BoardAction::SetStatus)?;
        let membership = self
            .store
            .get_membership(access.board_id, payload.user_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("member", payload.user_id))?;

        if membership.is_owner() && payload.user_status != Role::Owner {
            return Err(DispatchError::Conflict(
                "the owner's role cannot be changed".to_string(),
            ));
        }
        if payload.user_status == Role::Owner && !membership.is_owner() {
            return Err(DispatchError::Conflict(
                "board already has an owner".to_string(),
            ));
        }

        let updated = self
            .store
            .set_role(access.board_id, payload.user_id, payload.user_status)
            .await?;

        Ok(Effects::event(ServerEvent::SetStatus(StatusChanged {
            user_id: updated.user_id,
            user_status: updated.role,
        })))
    }

    async fn add_user(
        &self,
        access: &BoardAccess,
        payload: AddUserPayload,
    ) -> Result<Effects, DispatchError> {
        Self::same_board(access, payload.board_id)?;
        self.authorize(access, BoardAction::AddUser)?;
        let board = self
            .store
            .get_board(access.board_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("board", access.board_id))?;

        let mut effects = Effects::default();
        for email in &payload.emails {
            let email = normalize_email(email);
            let Some(user) = self.store.find_user_by_email(&email).await? else {
                tracing::debug!(board_id = %board.id, %email, "no user with that email, skipped");
                continue;
            };
            if self
                .store
                .get_membership(board.id, user.id)
                .await?
                .is_some()
            {
                continue;
            }
            let membership = self
                .store
                .add_membership(board.id, user.id, Role::Member)
                .await?;

            effects
                .events
                .push(ServerEvent::AddUser(MemberState::new(&user, membership.role)));
            effects.notifications.push((
                user.id,
                Notification::AddedToBoard {
                    board_id: board.id,
                    board_name: board.name.clone(),
                },
            ));
        }
        Ok(effects)
    }

    async fn delete_user(
        &self,
        access: &BoardAccess,
        payload: DeleteUserPayload,
    ) -> Result<Effects, DispatchError> {
        Self::same_board(access, payload.board_id)?;
        let leaving = access.actor.user_id() == Some(payload.user_id);
        let action = if leaving {
            BoardAction::LeaveBoard
        } else {
            BoardAction::DeleteUser
        };
        self.authorize(access, action)?;

        let membership = self
            .store
            .get_membership(access.board_id, payload.user_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("member", payload.user_id))?;
        if membership.is_owner() {
            return Err(DispatchError::Conflict(
                "the owner cannot be removed from the board".to_string(),
            ));
        }
        self.store
            .remove_membership(access.board_id, payload.user_id)
            .await?;

        let mut effects = Effects::event(ServerEvent::DeleteUser(UserRemoved {
            user_id: payload.user_id,
        }));
        effects.evict.push(payload.user_id);
        if !leaving {
            if let Some(board) = self.store.get_board(access.board_id).await? {
                effects.notifications.push((
                    payload.user_id,
                    Notification::RemovedFromBoard {
                        board_id: board.id,
                        board_name: board.name,
                    },
                ));
            }
        }
        Ok(effects)
    }

    async fn add_list(
        &self,
        access: &BoardAccess,
        payload: AddListPayload,
    ) -> Result<Effects, DispatchError> {
        Self::same_board(access, payload.board)?;
        self.authorize(access, BoardAction::AddList)?;
        let name = required_name(&payload.name, "list name")?;
        let list = self.store.create_list(access.board_id, name).await?;

        Ok(Effects::event(ServerEvent::AddList(ListState {
            list,
            tasks: Vec::new(),
        })))
    }

    async fn edit_list_name(
        &self,
        access: &BoardAccess,
        payload: EditListNamePayload,
    ) -> Result<Effects, DispatchError> {
        self.authorize(access, BoardAction::EditListName)?;
        let list = self.list_on_board(access.board_id, payload.list_id).await?;
        let name = required_name(&payload.name, "list name")?;
        let list = self.store.rename_list(list.id, name).await?;

        Ok(Effects::event(ServerEvent::EditListName(ListRenamed {
            list_id: list.id,
            name: list.name,
        })))
    }

    async fn delete_list(
        &self,
        access: &BoardAccess,
        payload: DeleteListPayload,
    ) -> Result<Effects, DispatchError> {
        self.authorize(access, BoardAction::DeleteList)?;
        let list = self.list_on_board(access.board_id, payload.list_id).await?;
        let task_ids = self.store.delete_list(list.id).await?;

        let mut effects = Effects::event(ServerEvent::DeleteList(ListDeleted {
            list_id: list.id,
            task_ids: task_ids.clone(),
        }));
        effects.cancelled_reminders = task_ids;
        Ok(effects)
    }

    async fn add_task(
        &self,
        access: &BoardAccess,
        payload: AddTaskPayload,
    ) -> Result<Effects, DispatchError> {
        self.authorize(access, BoardAction::AddTask)?;
        let list = self.list_on_board(access.board_id, payload.list_id).await?;
        let title = required_name(&payload.title, "task title")?;
        self.ensure_members(access.board_id, &payload.associated_users)
            .await?;

        let task = self
            .store
            .create_task(
                list.id,
                NewTask {
                    title,
                    description: payload.description,
                    due_date: payload.due_date,
                    priority: payload.priority,
                    associated_users: payload.associated_users,
                },
            )
            .await?;

        let mut effects = Effects::event(ServerEvent::AddTask(task.clone()));
        if task.due_date.is_some() {
            effects.reminders.push(task);
        }
        Ok(effects)
    }

    async fn update_task(
        &self,
        access: &BoardAccess,
        payload: UpdateTaskPayload,
    ) -> Result<Effects, DispatchError> {
        self.authorize(access, BoardAction::UpdateTask)?;
        let task = self.task_on_board(access.board_id, payload.task_id).await?;

        let mut update = payload.to_update();
        if update.is_empty() {
            return Err(DispatchError::Invalid("no fields to update".to_string()));
        }
        if let Some(title) = &update.title {
            update.title = Some(required_name(title, "task title")?);
        }
        if let Some(users) = &update.associated_users {
            self.ensure_members(access.board_id, users).await?;
        }
        let rearm = update.touches_reminder();

        let task = self.store.update_task(task.id, update).await?;
        let mut effects = Effects::event(ServerEvent::UpdateTask(task.clone()));
        if rearm {
            effects.reminders.push(task);
        }
        Ok(effects)
    }

    async fn delete_task(
        &self,
        access: &BoardAccess,
        payload: DeleteTaskPayload,
    ) -> Result<Effects, DispatchError> {
        self.authorize(access, BoardAction::DeleteTask)?;
        let task = self.task_on_board(access.board_id, payload.task_id).await?;
        let deleted = self.store.delete_task(task.id).await?;
        let list_orders = self.list_orders(deleted.list_id).await?;

        let mut effects = Effects::event(ServerEvent::DeleteTask(TaskDeleted {
            task_id: deleted.id,
            list_id: deleted.list_id,
            list_orders,
        }));
        effects.cancelled_reminders.push(deleted.id);
        Ok(effects)
    }

    async fn update_board_name(
        &self,
        access: &BoardAccess,
        payload: UpdateBoardNamePayload,
    ) -> Result<Effects, DispatchError> {
        Self::same_board(access, payload.board_id)?;
        self.authorize(access, BoardAction::UpdateBoardName)?;
        let name = required_name(&payload.name, "board name")?;
        let board = self.store.rename_board(access.board_id, name).await?;

        Ok(Effects::event(ServerEvent::UpdateBoardName(BoardRenamed {
            board_id: board.id,
            name: board.name,
        })))
    }

    async fn delete_board(
        &self,
        access: &BoardAccess,
        payload: DeleteBoardPayload,
    ) -> Result<Effects, DispatchError> {
        Self::same_board(access, payload.board_id)?;
        self.authorize(access, BoardAction::DeleteBoard)?;
        if access.actor.user_id() != Some(payload.owner_id) {
            return Err(DispatchError::PermissionDenied {
                actor: access.actor,
                action: BoardAction::DeleteBoard,
            });
        }

        let board = self
            .store
            .get_board(access.board_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("board", access.board_id))?;
        let members = self.store.list_members(board.id).await?;
        let mut task_ids = Vec::new();
        for list in self.store.lists_for_board(board.id).await? {
            task_ids.extend(self.store.tasks_in_list(list.id).await?.iter().map(|t| t.id));
        }

        let removed = self.store.delete_board(board.id).await?;
        tracing::info!(
            board_id = %board.id,
            lists = removed.lists,
            tasks = removed.tasks,
            memberships = removed.memberships,
            "board deleted"
        );

        let mut effects = Effects::event(ServerEvent::DeleteBoard(BoardDeleted {
            board_id: board.id,
        }));
        effects.close_board = true;
        effects.cancelled_reminders = task_ids;
        effects.notifications = members
            .into_iter()
            .filter(|(membership, _)| Some(membership.user_id) != access.actor.user_id())
            .map(|(membership, _)| {
                (
                    membership.user_id,
                    Notification::BoardDeleted {
                        board_id: board.id,
                        board_name: board.name.clone(),
                    },
                )
            })
            .collect();
        Ok(effects)
    }
}

fn required_name(raw: &str, what: &str) -> Result<String, DispatchError> {
    normalize_name(raw).ok_or_else(|| DispatchError::Invalid(format!("{what} cannot be empty")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MockNotificationService;
    use chrono::{Duration as ChronoDuration, Utc};
    use taskboard_domain::{FieldUpdate, RolePolicy, User};
    use taskboard_store::MemoryStore;
    use uuid::Uuid;

    struct Fixture {
        store: Arc<MemoryStore>,
        dispatcher: CommandDispatcher,
        board: BoardId,
        owner: UserId,
        member: UserId,
    }

    async fn fixture(notifier: MockNotificationService) -> Fixture {
        fixture_with(notifier, false).await
    }

    async fn fixture_with(notifier: MockNotificationService, with_reminders: bool) -> Fixture {
        let notifier: Arc<dyn NotificationService> = Arc::new(notifier);
        let store = Arc::new(MemoryStore::new());
        let owner = store.insert_user(User::new("owner@example.com")).await.unwrap();
        let member = store.insert_user(User::new("member@example.com")).await.unwrap();
        let (board, _) = store.create_board("B1".to_string(), owner.id).await.unwrap();
        store
            .add_membership(board.id, member.id, Role::Member)
            .await
            .unwrap();

        let reminders =
            with_reminders.then(|| ReminderScheduler::new(store.clone(), notifier.clone(), 0));
        let dispatcher = CommandDispatcher::new(
            store.clone(),
            Arc::new(BoardSessionRegistry::new(true)),
            Arc::new(RolePolicy::default()),
            notifier,
            reminders,
        );
        Fixture {
            store,
            dispatcher,
            board: board.id,
            owner: owner.id,
            member: member.id,
        }
    }

    fn session(board_id: BoardId, user: UserId) -> SessionContext {
        SessionContext {
            connection_id: Uuid::new_v4(),
            board_id,
            actor: Actor::User(user),
        }
    }

    #[tokio::test]
    async fn test_add_user_notifies_new_member() {
        let mut notifier = MockNotificationService::new();
        notifier
            .expect_send()
            .withf(|_, notification| {
                matches!(notification, Notification::AddedToBoard { board_name, .. } if board_name == "B1")
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let fx = fixture(notifier).await;
        let newcomer = fx
            .store
            .insert_user(User::new("new@example.com"))
            .await
            .unwrap();

        let outcome = fx
            .dispatcher
            .dispatch(
                &session(fx.board, fx.owner),
                ClientAction::AddUser(AddUserPayload {
                    emails: vec![
                        " NEW@example.com ".to_string(),
                        "nobody@example.com".to_string(),
                        "member@example.com".to_string(),
                    ],
                    board_id: fx.board,
                }),
            )
            .await
            .unwrap();

        assert_eq!(outcome.events.len(), 1);
        assert!(matches!(
            &outcome.events[0],
            ServerEvent::AddUser(member) if member.user_id == newcomer.id && member.user_status == Role::Member
        ));
    }

    #[tokio::test]
    async fn test_denied_action_sends_no_notification() {
        let mut notifier = MockNotificationService::new();
        notifier.expect_send().never();
        let fx = fixture(notifier).await;

        let error = fx
            .dispatcher
            .dispatch(
                &session(fx.board, fx.member),
                ClientAction::DeleteUser(DeleteUserPayload {
                    user_id: fx.owner,
                    board_id: fx.board,
                }),
            )
            .await
            .unwrap_err();

        assert_eq!(error.code(), ErrorCode::PermissionDenied);
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_fail_action() {
        let mut notifier = MockNotificationService::new();
        notifier
            .expect_send()
            .times(1)
            .returning(|_, _| Err(crate::services::NotifyError::Unavailable("smtp".into())));
        let fx = fixture(notifier).await;

        let outcome = fx
            .dispatcher
            .dispatch(
                &session(fx.board, fx.owner),
                ClientAction::DeleteUser(DeleteUserPayload {
                    user_id: fx.member,
                    board_id: fx.board,
                }),
            )
            .await
            .unwrap();

        assert_eq!(outcome.events.len(), 1);
        assert!(fx
            .store
            .get_membership(fx.board, fx.member)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_self_leave_is_silent() {
        let mut notifier = MockNotificationService::new();
        notifier.expect_send().never();
        let fx = fixture(notifier).await;

        fx.dispatcher
            .dispatch(
                &session(fx.board, fx.member),
                ClientAction::DeleteUser(DeleteUserPayload {
                    user_id: fx.member,
                    board_id: fx.board,
                }),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_set_status_guards_owner() {
        let mut notifier = MockNotificationService::new();
        notifier.expect_send().never();
        let fx = fixture(notifier).await;
        let owner_session = session(fx.board, fx.owner);

        let demote_owner = fx
            .dispatcher
            .dispatch(
                &owner_session,
                ClientAction::SetStatus(SetStatusPayload {
                    user_id: fx.owner,
                    user_status: Role::Member,
                }),
            )
            .await
            .unwrap_err();
        assert_eq!(demote_owner.code(), ErrorCode::Conflict);

        let second_owner = fx
            .dispatcher
            .dispatch(
                &owner_session,
                ClientAction::SetStatus(SetStatusPayload {
                    user_id: fx.member,
                    user_status: Role::Owner,
                }),
            )
            .await
            .unwrap_err();
        assert_eq!(second_owner.code(), ErrorCode::Conflict);

        let promoted = fx
            .dispatcher
            .dispatch(
                &owner_session,
                ClientAction::SetStatus(SetStatusPayload {
                    user_id: fx.member,
                    user_status: Role::Admin,
                }),
            )
            .await
            .unwrap();
        assert_eq!(
            promoted.events,
            vec![ServerEvent::SetStatus(StatusChanged {
                user_id: fx.member,
                user_status: Role::Admin,
            })]
        );
    }

    #[tokio::test]
    async fn test_ids_from_other_boards_are_not_found() {
        let mut notifier = MockNotificationService::new();
        notifier.expect_send().never();
        let fx = fixture(notifier).await;
        let (other, _) = fx
            .store
            .create_board("B2".to_string(), fx.owner)
            .await
            .unwrap();
        let foreign = fx
            .store
            .create_list(other.id, "Elsewhere".to_string())
            .await
            .unwrap();

        let error = fx
            .dispatcher
            .dispatch(
                &session(fx.board, fx.owner),
                ClientAction::DeleteList(DeleteListPayload {
                    list_id: foreign.id,
                }),
            )
            .await
            .unwrap_err();

        assert_eq!(error.code(), ErrorCode::NotFound);
        assert!(fx.store.get_list(foreign.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stale_source_list_is_conflict() {
        let mut notifier = MockNotificationService::new();
        notifier.expect_send().never();
        let fx = fixture(notifier).await;
        let todo = fx
            .store
            .create_list(fx.board, "Todo".to_string())
            .await
            .unwrap();
        let done = fx
            .store
            .create_list(fx.board, "Done".to_string())
            .await
            .unwrap();
        let task = fx
            .store
            .create_task(
                todo.id,
                NewTask {
                    title: "T1".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let error = fx
            .dispatcher
            .dispatch(
                &session(fx.board, fx.member),
                ClientAction::MoveTask(MoveTaskPayload {
                    task_id: task.id,
                    source_list_id: done.id,
                    target_list_id: todo.id,
                }),
            )
            .await
            .unwrap_err();

        assert_eq!(error.code(), ErrorCode::Conflict);
    }

    #[tokio::test]
    async fn test_blank_names_are_invalid() {
        let mut notifier = MockNotificationService::new();
        notifier.expect_send().never();
        let fx = fixture(notifier).await;

        let error = fx
            .dispatcher
            .dispatch(
                &session(fx.board, fx.owner),
                ClientAction::UpdateBoardName(UpdateBoardNamePayload {
                    board_id: fx.board,
                    name: "   ".to_string(),
                }),
            )
            .await
            .unwrap_err();

        assert_eq!(error.code(), ErrorCode::Invalid);
        let board = fx.store.get_board(fx.board).await.unwrap().unwrap();
        assert_eq!(board.name, "B1");
    }

    #[tokio::test]
    async fn test_delete_board_requires_matching_owner_id() {
        let mut notifier = MockNotificationService::new();
        notifier
            .expect_send()
            .withf(|_, notification| matches!(notification, Notification::BoardDeleted { .. }))
            .times(1)
            .returning(|_, _| Ok(()));
        let fx = fixture(notifier).await;
        let owner_session = session(fx.board, fx.owner);

        let mismatch = fx
            .dispatcher
            .dispatch(
                &owner_session,
                ClientAction::DeleteBoard(DeleteBoardPayload {
                    board_id: fx.board,
                    owner_id: fx.member,
                }),
            )
            .await
            .unwrap_err();
        assert_eq!(mismatch.code(), ErrorCode::PermissionDenied);

        let outcome = fx
            .dispatcher
            .dispatch(
                &owner_session,
                ClientAction::DeleteBoard(DeleteBoardPayload {
                    board_id: fx.board,
                    owner_id: fx.owner,
                }),
            )
            .await
            .unwrap();
        assert!(outcome.board_closed);
        assert!(fx.store.get_board(fx.board).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_boards_leave_no_lock_behind() {
        let mut notifier = MockNotificationService::new();
        notifier.expect_send().never();
        let fx = fixture(notifier).await;

        for _ in 0..100 {
            let (sender, _receiver) = mpsc::channel(4);
            let error = fx
                .dispatcher
                .join(&session(Uuid::new_v4(), fx.owner), sender, true)
                .await
                .unwrap_err();
            assert_eq!(error.code(), ErrorCode::NotFound);
        }
        let error = fx
            .dispatcher
            .dispatch(
                &session(Uuid::new_v4(), fx.owner),
                ClientAction::DeleteList(DeleteListPayload {
                    list_id: Uuid::new_v4(),
                }),
            )
            .await
            .unwrap_err();
        assert_eq!(error.code(), ErrorCode::NotFound);
        assert_eq!(fx.dispatcher.board_locks.len(), 0);

        let (sender, _receiver) = mpsc::channel(4);
        assert!(fx
            .dispatcher
            .join(&session(fx.board, fx.owner), sender, true)
            .await
            .unwrap());
        assert_eq!(fx.dispatcher.board_locks.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_reminder_follows_last_applied_due_date() {
        let mut notifier = MockNotificationService::new();
        notifier.expect_send().never();
        let fx = fixture_with(notifier, true).await;
        let list = fx
            .store
            .create_list(fx.board, "Todo".to_string())
            .await
            .unwrap();
        let task = fx
            .store
            .create_task(
                list.id,
                NewTask {
                    title: "T1".to_string(),
                    associated_users: vec![fx.member],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let task_id = task.id;
        let dispatcher = Arc::new(fx.dispatcher);

        for round in 0..20 {
            let mut handles = Vec::new();
            for offset in 0..8 {
                let dispatcher = dispatcher.clone();
                let session = session(fx.board, fx.owner);
                let due = Utc::now() + ChronoDuration::days(30 + round * 8 + offset);
                handles.push(tokio::spawn(async move {
                    dispatcher
                        .dispatch(
                            &session,
                            ClientAction::UpdateTask(UpdateTaskPayload {
                                task_id,
                                title: None,
                                description: FieldUpdate::NoChange,
                                due_date: FieldUpdate::Set(due),
                                completed: None,
                                priority: None,
                                associated_users: None,
                            }),
                        )
                        .await
                }));
            }
            for handle in handles {
                handle.await.unwrap().unwrap();
            }

            let stored = fx.store.get_task(task_id).await.unwrap().unwrap();
            let reminders = dispatcher.reminders.as_ref().unwrap();
            assert_eq!(reminders.armed_for(task_id), stored.due_date);
            assert_eq!(reminders.pending_count(), 1);
        }
    }
}
