//! Point-in-time view of one board.
//!
//! `BoardState` is what a client receives in `full_board_state` right after it
//! joins: the board with its lists in position order, each list's tasks in
//! task order, and the member roster. It is pure data assembled from store
//! records so the same type serves snapshot replies and seed exports.

use crate::task_order::{sorted_board_lists, sorted_list_tasks};
use crate::{Board, BoardMembership, Role, Task, TaskList, User, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardState {
    #[serde(flatten)]
    pub board: Board,
    pub lists: Vec<ListState>,
    pub members: Vec<MemberState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListState {
    #[serde(flatten)]
    pub list: TaskList,
    pub tasks: Vec<Task>,
}

/// A membership joined with the user's public profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberState {
    pub user_id: UserId,
    pub email: String,
    pub username: Option<String>,
    pub user_status: Role,
}

impl MemberState {
    pub fn new(user: &User, role: Role) -> Self {
        Self {
            user_id: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
            user_status: role,
        }
    }
}

impl BoardState {
    /// Assemble a snapshot from flat records. Records belonging to other boards are ignored.
    pub fn assemble(
        board: Board,
        lists: &[TaskList],
        tasks: &[Task],
        members: &[(BoardMembership, User)],
    ) -> Self {
        let lists = sorted_board_lists(board.id, lists)
            .into_iter()
            .map(|list| ListState {
                list: list.clone(),
                tasks: sorted_list_tasks(list.id, tasks).into_iter().cloned().collect(),
            })
            .collect();

        let mut members: Vec<MemberState> = members
            .iter()
            .filter(|(membership, _)| membership.board_id == board.id)
            .map(|(membership, user)| MemberState::new(user, membership.role))
            .collect();
        // Owner first, then admins, then members; alphabetical within a role
        members.sort_by(|a, b| {
            role_rank(a.user_status)
                .cmp(&role_rank(b.user_status))
                .then_with(|| a.email.cmp(&b.email))
        });

        Self {
            board,
            lists,
            members,
        }
    }

    pub fn task_count(&self) -> usize {
        self.lists.iter().map(|l| l.tasks.len()).sum()
    }
}

fn role_rank(role: Role) -> u8 {
    match role {
        Role::Owner => 0,
        Role::Admin => 1,
        Role::Member => 2,
    }
}
