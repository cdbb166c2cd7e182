use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{field_update::FieldUpdate, list::ListId, user::UserId};

pub type TaskId = Uuid;

/// Colour-coded urgency. `None` means no priority was chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    #[default]
    None,
    /// Low
    Green,
    /// Medium
    Orange,
    /// High
    Red,
}

impl TaskPriority {
    pub fn label(self) -> &'static str {
        match self {
            TaskPriority::None => "none",
            TaskPriority::Green => "low",
            TaskPriority::Orange => "medium",
            TaskPriority::Red => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub list_id: ListId,
    pub title: String,
    pub description: Option<String>,
    /// Position within the list. Dense `0..N-1` per list.
    pub order: i32,
    pub completed: bool,
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub priority: TaskPriority,
    /// Users reminded when the due date arrives.
    #[serde(default)]
    pub associated_users: Vec<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(list_id: ListId, title: String, order: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            list_id,
            title,
            description: None,
            order,
            completed: false,
            due_date: None,
            priority: TaskPriority::None,
            associated_users: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn move_to_list(&mut self, list_id: ListId, order: i32) {
        self.list_id = list_id;
        self.order = order;
        self.updated_at = Utc::now();
    }

    pub fn set_order(&mut self, order: i32) {
        if self.order != order {
            self.order = order;
            self.updated_at = Utc::now();
        }
    }

    pub fn update(&mut self, updates: TaskUpdate) {
        if let Some(title) = updates.title {
            self.title = title;
        }
        updates.description.apply_to(&mut self.description);
        updates.due_date.apply_to(&mut self.due_date);
        if let Some(completed) = updates.completed {
            self.completed = completed;
        }
        if let Some(priority) = updates.priority {
            self.priority = priority;
        }
        if let Some(users) = updates.associated_users {
            self.associated_users = dedup_users(users);
        }
        self.updated_at = Utc::now();
    }
}

/// Partial update of a task. `None`/`NoChange` leave the field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: FieldUpdate<String>,
    pub due_date: FieldUpdate<DateTime<Utc>>,
    pub completed: Option<bool>,
    pub priority: Option<TaskPriority>,
    pub associated_users: Option<Vec<UserId>>,
}

impl TaskUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && !self.description.is_change()
            && !self.due_date.is_change()
            && self.completed.is_none()
            && self.priority.is_none()
            && self.associated_users.is_none()
    }

    /// Whether applying this update can change when or to whom a reminder goes.
    pub fn touches_reminder(&self) -> bool {
        self.due_date.is_change() || self.associated_users.is_some()
    }
}

/// Fields for a task about to be created. The order is assigned by the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: TaskPriority,
    pub associated_users: Vec<UserId>,
}

impl NewTask {
    pub fn into_task(self, list_id: ListId, order: i32) -> Task {
        let mut task = Task::new(list_id, self.title, order);
        task.description = self.description;
        task.due_date = self.due_date;
        task.priority = self.priority;
        task.associated_users = dedup_users(self.associated_users);
        task
    }
}

fn dedup_users(users: Vec<UserId>) -> Vec<UserId> {
    let mut seen = Vec::with_capacity(users.len());
    for user in users {
        if !seen.contains(&user) {
            seen.push(user);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_update_leaves_untouched_fields() {
        let mut task = Task::new(Uuid::new_v4(), "Write docs".to_string(), 0);
        task.description = Some("draft".to_string());
        let due = Utc::now();
        task.due_date = Some(due);

        task.update(TaskUpdate {
            completed: Some(true),
            ..Default::default()
        });

        assert!(task.completed);
        assert_eq!(task.title, "Write docs");
        assert_eq!(task.description.as_deref(), Some("draft"));
        assert_eq!(task.due_date, Some(due));
    }

    #[test]
    fn test_clear_due_date() {
        let mut task = Task::new(Uuid::new_v4(), "Ship".to_string(), 0);
        task.due_date = Some(Utc::now());

        task.update(TaskUpdate {
            due_date: FieldUpdate::Clear,
            ..Default::default()
        });

        assert_eq!(task.due_date, None);
    }

    #[test]
    fn test_associated_users_are_deduplicated() {
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();
        let task = NewTask {
            title: "Review".to_string(),
            associated_users: vec![user, other, user],
            ..Default::default()
        }
        .into_task(Uuid::new_v4(), 2);

        assert_eq!(task.associated_users, vec![user, other]);
        assert_eq!(task.order, 2);
    }

    #[test]
    fn test_priority_wire_names() {
        assert_eq!(serde_json::to_string(&TaskPriority::Red).unwrap(), "\"red\"");
        assert_eq!(
            serde_json::from_str::<TaskPriority>("\"none\"").unwrap(),
            TaskPriority::None
        );
        assert_eq!(TaskPriority::Orange.label(), "medium");
    }

    #[test]
    fn test_empty_update() {
        assert!(TaskUpdate::default().is_empty());
        let update = TaskUpdate {
            due_date: FieldUpdate::Clear,
            ..Default::default()
        };
        assert!(!update.is_empty());
        assert!(update.touches_reminder());
    }
}
