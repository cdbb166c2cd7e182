//! WebSocket message types for board synchronization.
//!
//! Both directions use JSON text frames shaped `{"action": ..., "payload": {...}}`.
//! Inbound frames may carry an optional `request_id`, echoed back in `ack`
//! and `error` replies so clients can match outcomes to requests.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use taskboard_domain::{
    BoardId, BoardState, FieldUpdate, ListId, ListState, MemberState, Role, Task,
    TaskId, TaskPriority, TaskUpdate, UserId,
};

/// Raw inbound frame before the action name is looked up.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub action: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub request_id: Option<String>,
}

/// A recognised inbound action with its decoded payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientAction {
    MoveTask(MoveTaskPayload),
    ReorderTask(ReorderTaskPayload),
    SetStatus(SetStatusPayload),
    AddUser(AddUserPayload),
    DeleteUser(DeleteUserPayload),
    AddList(AddListPayload),
    EditListName(EditListNamePayload),
    DeleteList(DeleteListPayload),
    AddTask(AddTaskPayload),
    UpdateTask(UpdateTaskPayload),
    DeleteTask(DeleteTaskPayload),
    UpdateBoardName(UpdateBoardNamePayload),
    DeleteBoard(DeleteBoardPayload),
}

/// Outcome of decoding one inbound frame.
#[derive(Debug)]
pub enum Inbound {
    Action {
        action: ClientAction,
        request_id: Option<String>,
    },
    /// Action name not in the catalogue. Ignored by the handler.
    Unknown { action: String },
    /// Known action (or unreadable frame) whose payload did not decode.
    Malformed {
        action: Option<String>,
        request_id: Option<String>,
        reason: String,
    },
}

impl Inbound {
    pub fn parse(text: &str) -> Self {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(error) => {
                return Inbound::Malformed {
                    action: None,
                    request_id: None,
                    reason: error.to_string(),
                }
            }
        };

        match ClientAction::decode(&envelope.action, envelope.payload) {
            None => Inbound::Unknown {
                action: envelope.action,
            },
            Some(Ok(action)) => Inbound::Action {
                action,
                request_id: envelope.request_id,
            },
            Some(Err(error)) => Inbound::Malformed {
                action: Some(envelope.action),
                request_id: envelope.request_id,
                reason: error.to_string(),
            },
        }
    }
}

impl ClientAction {
    /// Decode the payload for `action`. `None` means the action name is unknown.
    pub fn decode(action: &str, payload: Value) -> Option<Result<Self, serde_json::Error>> {
        // A missing payload decodes like an empty object
        let payload = match payload {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        let decoded = match action {
            "move_task" => serde_json::from_value(payload).map(Self::MoveTask),
            "reorder_task" => serde_json::from_value(payload).map(Self::ReorderTask),
            "set_status" => serde_json::from_value(payload).map(Self::SetStatus),
            "add_user" => serde_json::from_value(payload).map(Self::AddUser),
            "delete_user" => serde_json::from_value(payload).map(Self::DeleteUser),
            "add_list" => serde_json::from_value(payload).map(Self::AddList),
            "edit_list_name" => serde_json::from_value(payload).map(Self::EditListName),
            "delete_list" => serde_json::from_value(payload).map(Self::DeleteList),
            "add_task" => serde_json::from_value(payload).map(Self::AddTask),
            "update_task" => serde_json::from_value(payload).map(Self::UpdateTask),
            "delete_task" => serde_json::from_value(payload).map(Self::DeleteTask),
            "update_board_name" => serde_json::from_value(payload).map(Self::UpdateBoardName),
            "delete_board" => serde_json::from_value(payload).map(Self::DeleteBoard),
            _ => return None,
        };
        Some(decoded)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::MoveTask(_) => "move_task",
            Self::ReorderTask(_) => "reorder_task",
            Self::SetStatus(_) => "set_status",
            Self::AddUser(_) => "add_user",
            Self::DeleteUser(_) => "delete_user",
            Self::AddList(_) => "add_list",
            Self::EditListName(_) => "edit_list_name",
            Self::DeleteList(_) => "delete_list",
            Self::AddTask(_) => "add_task",
            Self::UpdateTask(_) => "update_task",
            Self::DeleteTask(_) => "delete_task",
            Self::UpdateBoardName(_) => "update_board_name",
            Self::DeleteBoard(_) => "delete_board",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MoveTaskPayload {
    pub task_id: TaskId,
    pub source_list_id: ListId,
    pub target_list_id: ListId,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReorderTaskPayload {
    pub list_id: ListId,
    pub task_order: Vec<TaskId>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SetStatusPayload {
    pub user_id: UserId,
    #[serde(alias = "new_status")]
    pub user_status: Role,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AddUserPayload {
    pub emails: Vec<String>,
    pub board_id: BoardId,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeleteUserPayload {
    pub user_id: UserId,
    pub board_id: BoardId,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AddListPayload {
    pub name: String,
    #[serde(alias = "board_id")]
    pub board: BoardId,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EditListNamePayload {
    pub list_id: ListId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeleteListPayload {
    pub list_id: ListId,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AddTaskPayload {
    pub list_id: ListId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_due_date")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub associated_users: Vec<UserId>,
}

/// Partial task update. For `description` and `due_date` an absent key means
/// "no change" and `null` means "clear"; `due_date: ""` also clears.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UpdateTaskPayload {
    pub task_id: TaskId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: FieldUpdate<String>,
    #[serde(default, deserialize_with = "deserialize_due_date_update")]
    pub due_date: FieldUpdate<DateTime<Utc>>,
    #[serde(default)]
    pub completed: Option<bool>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub associated_users: Option<Vec<UserId>>,
}

impl UpdateTaskPayload {
    pub fn to_update(&self) -> TaskUpdate {
        TaskUpdate {
            title: self.title.clone(),
            description: self.description.clone(),
            due_date: self.due_date.clone(),
            completed: self.completed,
            priority: self.priority,
            associated_users: self.associated_users.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeleteTaskPayload {
    pub task_id: TaskId,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UpdateBoardNamePayload {
    pub board_id: BoardId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeleteBoardPayload {
    pub board_id: BoardId,
    /// Must match the acting user in addition to the owner role check.
    pub owner_id: UserId,
}

/// Accepts RFC 3339 or `YYYY-MM-DD HH:MM:SS` (taken as UTC).
fn parse_due_date(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|_| format!("invalid due_date '{raw}'"))
}

fn deserialize_due_date_update<'de, D>(
    deserializer: D,
) -> Result<FieldUpdate<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(FieldUpdate::Clear),
        Some(raw) if raw.trim().is_empty() => Ok(FieldUpdate::Clear),
        Some(raw) => parse_due_date(raw.trim())
            .map(FieldUpdate::Set)
            .map_err(serde::de::Error::custom),
    }
}

fn deserialize_optional_due_date<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match deserialize_due_date_update(deserializer)? {
        FieldUpdate::Set(due) => Ok(Some(due)),
        _ => Ok(None),
    }
}

/// Messages sent from the server to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    MoveTask(TaskMoved),
    ReorderTask(ListReordered),
    SetStatus(StatusChanged),
    AddUser(MemberState),
    DeleteUser(UserRemoved),
    AddList(ListState),
    EditListName(ListRenamed),
    DeleteList(ListDeleted),
    AddTask(Task),
    UpdateTask(Task),
    DeleteTask(TaskDeleted),
    UpdateBoardName(BoardRenamed),
    DeleteBoard(BoardDeleted),
    FullBoardState(BoardState),
    /// Sent only to the connection whose request failed.
    Error(ErrorPayload),
    /// Sent only to the connection whose request succeeded.
    Ack(AckPayload),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MoveTask(_) => "move_task",
            Self::ReorderTask(_) => "reorder_task",
            Self::SetStatus(_) => "set_status",
            Self::AddUser(_) => "add_user",
            Self::DeleteUser(_) => "delete_user",
            Self::AddList(_) => "add_list",
            Self::EditListName(_) => "edit_list_name",
            Self::DeleteList(_) => "delete_list",
            Self::AddTask(_) => "add_task",
            Self::UpdateTask(_) => "update_task",
            Self::DeleteTask(_) => "delete_task",
            Self::UpdateBoardName(_) => "update_board_name",
            Self::DeleteBoard(_) => "delete_board",
            Self::FullBoardState(_) => "full_board_state",
            Self::Error(_) => "error",
            Self::Ack(_) => "ack",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOrder {
    pub task_id: TaskId,
    pub order: i32,
}

impl From<&Task> for TaskOrder {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id,
            order: task.order,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskMoved {
    pub task_id: TaskId,
    pub source_list_id: ListId,
    pub target_list_id: ListId,
    pub new_order: i32,
    /// Orders of the tasks remaining in the source list after the gap closed.
    pub source_orders: Vec<TaskOrder>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListReordered {
    pub list_id: ListId,
    pub task_order: Vec<TaskOrder>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusChanged {
    pub user_id: UserId,
    pub user_status: Role,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserRemoved {
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListRenamed {
    pub list_id: ListId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListDeleted {
    pub list_id: ListId,
    /// Tasks removed with the list; clients drop them.
    pub task_ids: Vec<TaskId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskDeleted {
    pub task_id: TaskId,
    pub list_id: ListId,
    pub list_orders: Vec<TaskOrder>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoardRenamed {
    pub board_id: BoardId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoardDeleted {
    pub board_id: BoardId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    PermissionDenied,
    Malformed,
    Conflict,
    Invalid,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AckPayload {
    pub action: String,
    pub request_id: String,
}
