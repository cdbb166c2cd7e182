use crate::traits::{BoardDeletion, BoardStore, TaskMove};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use taskboard_core::{TaskboardError, TaskboardResult};
use taskboard_domain::task_order::{
    compact_list_orders, next_order_in_list, plan_reorder, sorted_list_tasks,
};
use taskboard_domain::{
    normalize_email, Board, BoardId, BoardMembership, BoardState, ListId, NewTask, Role, Task,
    TaskId, TaskList, TaskUpdate, User, UserId,
};

#[derive(Debug, Default)]
struct MemoryState {
    users: HashMap<UserId, User>,
    boards: HashMap<BoardId, Board>,
    memberships: Vec<BoardMembership>,
    lists: Vec<TaskList>,
    tasks: Vec<Task>,
}

impl MemoryState {
    fn membership_mut(
        &mut self,
        board_id: BoardId,
        user_id: UserId,
    ) -> TaskboardResult<&mut BoardMembership> {
        self.memberships
            .iter_mut()
            .find(|m| m.board_id == board_id && m.user_id == user_id)
            .ok_or_else(|| TaskboardError::NotFound(format!("membership {user_id} on {board_id}")))
    }

    fn list(&self, id: ListId) -> TaskboardResult<&TaskList> {
        self.lists
            .iter()
            .find(|l| l.id == id)
            .ok_or_else(|| TaskboardError::not_found("list", id))
    }

    fn task_index(&self, id: TaskId) -> TaskboardResult<usize> {
        self.tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| TaskboardError::not_found("task", id))
    }
}

/// Process-local store backing the sync server.
///
/// All state sits behind one `RwLock`; each trait call takes it exactly once,
/// which makes every call atomic. Stands in for the relational store in
/// development and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BoardStore for MemoryStore {
    async fn insert_user(&self, mut user: User) -> TaskboardResult<User> {
        let mut state = self.state.write();
        user.email = normalize_email(&user.email);
        if user.email.is_empty() {
            return Err(TaskboardError::Validation("email must not be empty".to_string()));
        }
        if state.users.values().any(|u| u.email == user.email) {
            return Err(TaskboardError::Conflict(format!(
                "user with email {} already exists",
                user.email
            )));
        }
        if state.users.contains_key(&user.id) {
            return Err(TaskboardError::Conflict(format!("user {} already exists", user.id)));
        }
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: UserId) -> TaskboardResult<Option<User>> {
        Ok(self.state.read().users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> TaskboardResult<Option<User>> {
        let email = normalize_email(email);
        Ok(self
            .state
            .read()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn create_board(
        &self,
        name: String,
        owner: UserId,
    ) -> TaskboardResult<(Board, BoardMembership)> {
        let mut state = self.state.write();
        if !state.users.contains_key(&owner) {
            return Err(TaskboardError::not_found("user", owner));
        }
        let board = Board::new(name);
        let membership = BoardMembership::new(board.id, owner, Role::Owner);
        state.boards.insert(board.id, board.clone());
        state.memberships.push(membership.clone());
        Ok((board, membership))
    }

    async fn get_board(&self, id: BoardId) -> TaskboardResult<Option<Board>> {
        Ok(self.state.read().boards.get(&id).cloned())
    }

    async fn rename_board(&self, id: BoardId, name: String) -> TaskboardResult<Board> {
        let mut state = self.state.write();
        let board = state
            .boards
            .get_mut(&id)
            .ok_or_else(|| TaskboardError::not_found("board", id))?;
        board.update_name(name);
        Ok(board.clone())
    }

    async fn delete_board(&self, id: BoardId) -> TaskboardResult<BoardDeletion> {
        let mut state = self.state.write();
        if state.boards.remove(&id).is_none() {
            return Err(TaskboardError::not_found("board", id));
        }

        let list_ids: Vec<ListId> = state
            .lists
            .iter()
            .filter(|l| l.board_id == id)
            .map(|l| l.id)
            .collect();

        let tasks_before = state.tasks.len();
        state.tasks.retain(|t| !list_ids.contains(&t.list_id));
        let lists_before = state.lists.len();
        state.lists.retain(|l| l.board_id != id);
        let memberships_before = state.memberships.len();
        state.memberships.retain(|m| m.board_id != id);

        Ok(BoardDeletion {
            lists: lists_before - state.lists.len(),
            tasks: tasks_before - state.tasks.len(),
            memberships: memberships_before - state.memberships.len(),
        })
    }

    async fn get_membership(
        &self,
        board_id: BoardId,
        user_id: UserId,
    ) -> TaskboardResult<Option<BoardMembership>> {
        Ok(self
            .state
            .read()
            .memberships
            .iter()
            .find(|m| m.board_id == board_id && m.user_id == user_id)
            .cloned())
    }

    async fn list_members(
        &self,
        board_id: BoardId,
    ) -> TaskboardResult<Vec<(BoardMembership, User)>> {
        let state = self.state.read();
        Ok(state
            .memberships
            .iter()
            .filter(|m| m.board_id == board_id)
            .filter_map(|m| state.users.get(&m.user_id).map(|u| (m.clone(), u.clone())))
            .collect())
    }

    async fn add_membership(
        &self,
        board_id: BoardId,
        user_id: UserId,
        role: Role,
    ) -> TaskboardResult<BoardMembership> {
        let mut state = self.state.write();
        if !state.boards.contains_key(&board_id) {
            return Err(TaskboardError::not_found("board", board_id));
        }
        if !state.users.contains_key(&user_id) {
            return Err(TaskboardError::not_found("user", user_id));
        }
        if state
            .memberships
            .iter()
            .any(|m| m.board_id == board_id && m.user_id == user_id)
        {
            return Err(TaskboardError::Conflict(format!(
                "user {user_id} is already a member of board {board_id}"
            )));
        }
        let membership = BoardMembership::new(board_id, user_id, role);
        state.memberships.push(membership.clone());
        Ok(membership)
    }

    async fn set_role(
        &self,
        board_id: BoardId,
        user_id: UserId,
        role: Role,
    ) -> TaskboardResult<BoardMembership> {
        let mut state = self.state.write();
        let membership = state.membership_mut(board_id, user_id)?;
        membership.role = role;
        Ok(membership.clone())
    }

    async fn remove_membership(
        &self,
        board_id: BoardId,
        user_id: UserId,
    ) -> TaskboardResult<BoardMembership> {
        let mut state = self.state.write();
        let position = state
            .memberships
            .iter()
            .position(|m| m.board_id == board_id && m.user_id == user_id)
            .ok_or_else(|| {
                TaskboardError::NotFound(format!("membership {user_id} on {board_id}"))
            })?;
        Ok(state.memberships.remove(position))
    }

    async fn create_list(&self, board_id: BoardId, name: String) -> TaskboardResult<TaskList> {
        let mut state = self.state.write();
        if !state.boards.contains_key(&board_id) {
            return Err(TaskboardError::not_found("board", board_id));
        }
        let position = state
            .lists
            .iter()
            .filter(|l| l.board_id == board_id)
            .map(|l| l.position)
            .max()
            .map_or(0, |max| max + 1);
        let list = TaskList::new(board_id, name, position);
        state.lists.push(list.clone());
        Ok(list)
    }

    async fn get_list(&self, id: ListId) -> TaskboardResult<Option<TaskList>> {
        Ok(self.state.read().lists.iter().find(|l| l.id == id).cloned())
    }

    async fn rename_list(&self, id: ListId, name: String) -> TaskboardResult<TaskList> {
        let mut state = self.state.write();
        let list = state
            .lists
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| TaskboardError::not_found("list", id))?;
        list.update_name(name);
        Ok(list.clone())
    }

    async fn delete_list(&self, id: ListId) -> TaskboardResult<Vec<TaskId>> {
        let mut state = self.state.write();
        let position = state
            .lists
            .iter()
            .position(|l| l.id == id)
            .ok_or_else(|| TaskboardError::not_found("list", id))?;
        state.lists.remove(position);

        let removed: Vec<TaskId> = sorted_list_tasks(id, &state.tasks)
            .into_iter()
            .map(|t| t.id)
            .collect();
        state.tasks.retain(|t| t.list_id != id);
        Ok(removed)
    }

    async fn lists_for_board(&self, board_id: BoardId) -> TaskboardResult<Vec<TaskList>> {
        let state = self.state.read();
        Ok(taskboard_domain::task_order::sorted_board_lists(board_id, &state.lists)
            .into_iter()
            .cloned()
            .collect())
    }

    async fn create_task(&self, list_id: ListId, task: NewTask) -> TaskboardResult<Task> {
        let mut state = self.state.write();
        state.list(list_id)?;
        let order = next_order_in_list(&state.tasks, list_id);
        let task = task.into_task(list_id, order);
        state.tasks.push(task.clone());
        Ok(task)
    }

    async fn get_task(&self, id: TaskId) -> TaskboardResult<Option<Task>> {
        Ok(self.state.read().tasks.iter().find(|t| t.id == id).cloned())
    }

    async fn update_task(&self, id: TaskId, updates: TaskUpdate) -> TaskboardResult<Task> {
        let mut state = self.state.write();
        let index = state.task_index(id)?;
        state.tasks[index].update(updates);
        Ok(state.tasks[index].clone())
    }

    async fn delete_task(&self, id: TaskId) -> TaskboardResult<Task> {
        let mut state = self.state.write();
        let index = state.task_index(id)?;
        let task = state.tasks.remove(index);
        compact_list_orders(&mut state.tasks, task.list_id);
        Ok(task)
    }

    async fn tasks_in_list(&self, list_id: ListId) -> TaskboardResult<Vec<Task>> {
        let state = self.state.read();
        state.list(list_id)?;
        Ok(sorted_list_tasks(list_id, &state.tasks)
            .into_iter()
            .cloned()
            .collect())
    }

    async fn move_task(&self, id: TaskId, target_list: ListId) -> TaskboardResult<TaskMove> {
        let mut state = self.state.write();
        state.list(target_list)?;
        let index = state.task_index(id)?;
        let source_list_id = state.tasks[index].list_id;

        let order = next_order_in_list(&state.tasks, target_list);
        state.tasks[index].move_to_list(target_list, order);

        // A same-list move lands at max+1 and is pulled back to N-1 here
        compact_list_orders(&mut state.tasks, source_list_id);
        let task = state.tasks[index].clone();
        Ok(TaskMove {
            task,
            source_list_id,
        })
    }

    async fn reorder_list(
        &self,
        list_id: ListId,
        task_order: &[TaskId],
    ) -> TaskboardResult<Vec<(TaskId, i32)>> {
        let mut state = self.state.write();
        state.list(list_id)?;
        let current: Vec<TaskId> = sorted_list_tasks(list_id, &state.tasks)
            .into_iter()
            .map(|t| t.id)
            .collect();
        let plan = plan_reorder(&current, task_order)
            .map_err(|e| TaskboardError::Validation(e.to_string()))?;

        for (task_id, order) in &plan {
            if let Some(task) = state.tasks.iter_mut().find(|t| t.id == *task_id) {
                task.set_order(*order);
            }
        }
        Ok(plan)
    }

    async fn board_state(&self, board_id: BoardId) -> TaskboardResult<Option<BoardState>> {
        let state = self.state.read();
        let Some(board) = state.boards.get(&board_id).cloned() else {
            return Ok(None);
        };
        let list_ids: Vec<ListId> = state
            .lists
            .iter()
            .filter(|l| l.board_id == board_id)
            .map(|l| l.id)
            .collect();
        let tasks: Vec<Task> = state
            .tasks
            .iter()
            .filter(|t| list_ids.contains(&t.list_id))
            .cloned()
            .collect();
        let members: Vec<(BoardMembership, User)> = state
            .memberships
            .iter()
            .filter(|m| m.board_id == board_id)
            .filter_map(|m| state.users.get(&m.user_id).map(|u| (m.clone(), u.clone())))
            .collect();
        Ok(Some(BoardState::assemble(
            board,
            &state.lists,
            &tasks,
            &members,
        )))
    }
}
