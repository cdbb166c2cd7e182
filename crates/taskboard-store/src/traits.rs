use async_trait::async_trait;
use taskboard_core::TaskboardResult;
use taskboard_domain::{
    Board, BoardId, BoardMembership, BoardState, ListId, NewTask, Role, Task, TaskId, TaskList,
    TaskUpdate, User, UserId,
};

/// What a board deletion removed alongside the board itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardDeletion {
    pub lists: usize,
    pub tasks: usize,
    pub memberships: usize,
}

/// Outcome of moving a task between lists.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskMove {
    pub task: Task,
    pub source_list_id: ListId,
}

/// Storage for boards, lists, tasks, users, and memberships.
///
/// Every method is atomic on its own. Multi-step sequences are serialized by
/// the caller per board; implementations only guarantee that a single call
/// never exposes a half-applied change (e.g. a task with a duplicate order).
///
/// Ordering contract: within a list, task orders are always a dense `0..N-1`
/// sequence after any call returns.
#[async_trait]
pub trait BoardStore: Send + Sync {
    // Users
    async fn insert_user(&self, user: User) -> TaskboardResult<User>;
    async fn get_user(&self, id: UserId) -> TaskboardResult<Option<User>>;
    /// Case-insensitive lookup.
    async fn find_user_by_email(&self, email: &str) -> TaskboardResult<Option<User>>;

    // Boards
    /// Create a board and its owner membership together.
    async fn create_board(
        &self,
        name: String,
        owner: UserId,
    ) -> TaskboardResult<(Board, BoardMembership)>;
    async fn get_board(&self, id: BoardId) -> TaskboardResult<Option<Board>>;
    async fn rename_board(&self, id: BoardId, name: String) -> TaskboardResult<Board>;
    /// Delete a board with all of its lists, tasks, and memberships.
    async fn delete_board(&self, id: BoardId) -> TaskboardResult<BoardDeletion>;

    // Memberships
    async fn get_membership(
        &self,
        board_id: BoardId,
        user_id: UserId,
    ) -> TaskboardResult<Option<BoardMembership>>;
    async fn list_members(&self, board_id: BoardId)
        -> TaskboardResult<Vec<(BoardMembership, User)>>;
    /// Fails with `Conflict` when the pair already exists.
    async fn add_membership(
        &self,
        board_id: BoardId,
        user_id: UserId,
        role: Role,
    ) -> TaskboardResult<BoardMembership>;
    async fn set_role(
        &self,
        board_id: BoardId,
        user_id: UserId,
        role: Role,
    ) -> TaskboardResult<BoardMembership>;
    async fn remove_membership(
        &self,
        board_id: BoardId,
        user_id: UserId,
    ) -> TaskboardResult<BoardMembership>;

    // Lists
    /// Appends the list after the board's existing lists.
    async fn create_list(&self, board_id: BoardId, name: String) -> TaskboardResult<TaskList>;
    async fn get_list(&self, id: ListId) -> TaskboardResult<Option<TaskList>>;
    async fn rename_list(&self, id: ListId, name: String) -> TaskboardResult<TaskList>;
    /// Delete a list and its tasks, returning the ids of the removed tasks.
    async fn delete_list(&self, id: ListId) -> TaskboardResult<Vec<TaskId>>;
    async fn lists_for_board(&self, board_id: BoardId) -> TaskboardResult<Vec<TaskList>>;

    // Tasks
    /// Appends the task at `max order + 1` of the list.
    async fn create_task(&self, list_id: ListId, task: NewTask) -> TaskboardResult<Task>;
    async fn get_task(&self, id: TaskId) -> TaskboardResult<Option<Task>>;
    async fn update_task(&self, id: TaskId, updates: TaskUpdate) -> TaskboardResult<Task>;
    /// Delete a task and close the gap it leaves in its list.
    async fn delete_task(&self, id: TaskId) -> TaskboardResult<Task>;
    /// Tasks of a list sorted by order.
    async fn tasks_in_list(&self, list_id: ListId) -> TaskboardResult<Vec<Task>>;
    /// Append the task to `target_list` and compact its former list.
    async fn move_task(&self, id: TaskId, target_list: ListId) -> TaskboardResult<TaskMove>;
    /// Assign `order = index` following `task_order`, which must name every task of the
    /// list exactly once (`Validation` otherwise).
    async fn reorder_list(
        &self,
        list_id: ListId,
        task_order: &[TaskId],
    ) -> TaskboardResult<Vec<(TaskId, i32)>>;

    // Queries
    async fn board_state(&self, board_id: BoardId) -> TaskboardResult<Option<BoardState>>;
}
