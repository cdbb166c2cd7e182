//! Board authorization policy.
//!
//! Every decision about who may do what on a board goes through
//! [`AuthorizationPolicy::check`]. Callers look up the actor's role once per
//! inbound message and hand it over in a [`BoardAccess`]; the policy itself
//! never touches the store.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{BoardId, Role, UserId};

/// Who is acting. Connections with a missing or invalid token are anonymous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Actor {
    Anonymous,
    User(UserId),
}

impl Actor {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Actor::User(id) => Some(*id),
            Actor::Anonymous => None,
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Anonymous => f.write_str("anonymous"),
            Actor::User(id) => write!(f, "{id}"),
        }
    }
}

impl From<Option<UserId>> for Actor {
    fn from(id: Option<UserId>) -> Self {
        id.map_or(Actor::Anonymous, Actor::User)
    }
}

/// Every action that can be attempted on a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardAction {
    ViewBoard,
    MoveTask,
    ReorderTask,
    SetStatus,
    AddUser,
    DeleteUser,
    LeaveBoard,
    AddList,
    EditListName,
    DeleteList,
    AddTask,
    UpdateTask,
    DeleteTask,
    UpdateBoardName,
    DeleteBoard,
}

impl BoardAction {
    pub fn as_str(self) -> &'static str {
        match self {
            BoardAction::ViewBoard => "view_board",
            BoardAction::MoveTask => "move_task",
            BoardAction::ReorderTask => "reorder_task",
            BoardAction::SetStatus => "set_status",
            BoardAction::AddUser => "add_user",
            BoardAction::DeleteUser => "delete_user",
            BoardAction::LeaveBoard => "leave_board",
            BoardAction::AddList => "add_list",
            BoardAction::EditListName => "edit_list_name",
            BoardAction::DeleteList => "delete_list",
            BoardAction::AddTask => "add_task",
            BoardAction::UpdateTask => "update_task",
            BoardAction::DeleteTask => "delete_task",
            BoardAction::UpdateBoardName => "update_board_name",
            BoardAction::DeleteBoard => "delete_board",
        }
    }
}

impl fmt::Display for BoardAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The actor's standing on one board, resolved once per message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardAccess {
    pub actor: Actor,
    pub board_id: BoardId,
    /// `None` when the actor is anonymous or not a member.
    pub role: Option<Role>,
}

impl BoardAccess {
    pub fn new(actor: Actor, board_id: BoardId, role: Option<Role>) -> Self {
        Self {
            actor,
            board_id,
            role,
        }
    }

    pub fn is_member(&self) -> bool {
        self.role.is_some()
    }
}

pub trait AuthorizationPolicy: Send + Sync {
    fn check(&self, access: &BoardAccess, action: BoardAction) -> bool;
}

/// Role-table policy used by the server.
#[derive(Debug, Clone, Copy, Default)]
pub struct RolePolicy {
    /// When set, list creation, renaming and deletion need owner or admin.
    pub restrict_list_management: bool,
}

impl RolePolicy {
    pub fn new(restrict_list_management: bool) -> Self {
        Self {
            restrict_list_management,
        }
    }

    fn required(&self, action: BoardAction) -> Requirement {
        match action {
            BoardAction::ViewBoard
            | BoardAction::MoveTask
            | BoardAction::ReorderTask
            | BoardAction::AddTask
            | BoardAction::UpdateTask
            | BoardAction::DeleteTask
            | BoardAction::LeaveBoard => Requirement::AnyMember,
            BoardAction::AddList | BoardAction::EditListName | BoardAction::DeleteList => {
                if self.restrict_list_management {
                    Requirement::Manager
                } else {
                    Requirement::AnyMember
                }
            }
            BoardAction::SetStatus | BoardAction::AddUser | BoardAction::DeleteUser => {
                Requirement::Manager
            }
            BoardAction::UpdateBoardName | BoardAction::DeleteBoard => Requirement::Owner,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Requirement {
    AnyMember,
    Manager,
    Owner,
}

impl AuthorizationPolicy for RolePolicy {
    fn check(&self, access: &BoardAccess, action: BoardAction) -> bool {
        if access.actor == Actor::Anonymous {
            return false;
        }
        let Some(role) = access.role else {
            return false;
        };
        match self.required(action) {
            Requirement::AnyMember => true,
            Requirement::Manager => role.can_manage_members(),
            Requirement::Owner => role == Role::Owner,
        }
    }
}
