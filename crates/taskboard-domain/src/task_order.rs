//! Task ordering rules.
//!
//! Pure functions that keep each list's `order` values a dense `0..N-1`
//! sequence. The store applies their results; the dispatcher relies on them
//! to validate `reorder_task` requests before anything is mutated.

use std::collections::HashSet;

use crate::{ListId, Task, TaskId, TaskList};
use uuid::Uuid;

/// Why a requested ordering cannot be applied to a list.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReorderError {
    #[error("task {0} appears more than once")]
    Duplicate(TaskId),
    #[error("task {0} is not in the list")]
    Foreign(TaskId),
    #[error("task {0} is missing from the requested order")]
    Missing(TaskId),
}

/// Get a board's lists sorted by position, then creation time.
pub fn sorted_board_lists(board_id: Uuid, lists: &[TaskList]) -> Vec<&TaskList> {
    let mut sorted: Vec<_> = lists.iter().filter(|l| l.board_id == board_id).collect();
    sorted.sort_by_key(|l| (l.position, l.created_at));
    sorted
}

/// Tasks of one list in display order.
pub fn sorted_list_tasks(list_id: ListId, tasks: &[Task]) -> Vec<&Task> {
    let mut sorted: Vec<_> = tasks.iter().filter(|t| t.list_id == list_id).collect();
    sorted.sort_by_key(|t| (t.order, t.created_at));
    sorted
}

/// Order a task appended to the list receives: `max + 1`, or `0` for an empty list.
pub fn next_order_in_list(tasks: &[Task], list_id: ListId) -> i32 {
    tasks
        .iter()
        .filter(|t| t.list_id == list_id)
        .map(|t| t.order)
        .max()
        .map_or(0, |max| max + 1)
}

/// Compact task orders in a list to be sequential (0, 1, 2, ...).
///
/// Returns the ids whose order actually changed.
pub fn compact_list_orders(tasks: &mut [Task], list_id: ListId) -> Vec<TaskId> {
    let mut indices: Vec<usize> = tasks
        .iter()
        .enumerate()
        .filter(|(_, t)| t.list_id == list_id)
        .map(|(i, _)| i)
        .collect();

    // Ties on order fall back to creation time so the result is deterministic
    indices.sort_by_key(|&i| (tasks[i].order, tasks[i].created_at));

    let mut changed = Vec::new();
    for (new_order, &idx) in indices.iter().enumerate() {
        let new_order = new_order as i32;
        if tasks[idx].order != new_order {
            tasks[idx].set_order(new_order);
            changed.push(tasks[idx].id);
        }
    }
    changed
}

/// Check that `requested` names every task of the list exactly once and
/// return the `(task, order)` assignments it implies.
pub fn plan_reorder(
    current: &[TaskId],
    requested: &[TaskId],
) -> Result<Vec<(TaskId, i32)>, ReorderError> {
    let members: HashSet<TaskId> = current.iter().copied().collect();
    let mut seen = HashSet::with_capacity(requested.len());

    for id in requested {
        if !members.contains(id) {
            return Err(ReorderError::Foreign(*id));
        }
        if !seen.insert(*id) {
            return Err(ReorderError::Duplicate(*id));
        }
    }

    if let Some(missing) = current.iter().find(|id| !seen.contains(*id)) {
        return Err(ReorderError::Missing(*missing));
    }

    Ok(requested
        .iter()
        .enumerate()
        .map(|(index, id)| (*id, index as i32))
        .collect())
}

/// Whether the orders of a list form a dense permutation of `0..N-1`.
pub fn is_dense(tasks: &[Task], list_id: ListId) -> bool {
    let mut orders: Vec<i32> = tasks
        .iter()
        .filter(|t| t.list_id == list_id)
        .map(|t| t.order)
        .collect();
    orders.sort_unstable();
    orders.iter().enumerate().all(|(i, order)| *order == i as i32)
}
