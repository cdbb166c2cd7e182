pub mod board;
pub mod field_update;
pub mod list;
pub mod membership;
pub mod policy;
pub mod snapshot;
pub mod task;
pub mod task_order;
pub mod user;

pub use board::{normalize_name, Board, BoardId};
pub use field_update::FieldUpdate;
pub use list::{ListId, TaskList};
pub use membership::{BoardMembership, Role};
pub use policy::{Actor, AuthorizationPolicy, BoardAccess, BoardAction, RolePolicy};
pub use snapshot::{BoardState, ListState, MemberState};
pub use task::{NewTask, Task, TaskId, TaskPriority, TaskUpdate};
pub use task_order::ReorderError;
pub use user::{normalize_email, NotificationPreference, User, UserId};
