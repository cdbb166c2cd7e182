//! Seed data loading.
//!
//! A seed file is a JSON document describing users and boards. It bootstraps
//! the in-memory store for development servers and end-to-end tests:
//!
//! ```json
//! {
//!   "users": [{"email": "u1@example.com", "username": "u1"}],
//!   "boards": [{"name": "B1", "owner": "u1@example.com", "lists": [{"name": "Todo", "tasks": ["T1"]}]}]
//! }
//! ```

use crate::traits::BoardStore;
use serde::{Deserialize, Serialize};
use std::path::Path;
use taskboard_core::{TaskboardError, TaskboardResult};
use taskboard_domain::{BoardId, NewTask, NotificationPreference, Role, User, UserId};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub users: Vec<SeedUser>,
    #[serde(default)]
    pub boards: Vec<SeedBoard>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedUser {
    /// Fixed id so issued tokens stay valid across restarts.
    #[serde(default)]
    pub id: Option<UserId>,
    pub email: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub notification_preference: NotificationPreference,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedBoard {
    pub name: String,
    /// Email of the owning user.
    pub owner: String,
    #[serde(default)]
    pub admins: Vec<String>,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub lists: Vec<SeedList>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedList {
    pub name: String,
    #[serde(default)]
    pub tasks: Vec<String>,
}

/// Ids created while applying a seed, in input order.
#[derive(Debug, Clone, Default)]
pub struct SeedSummary {
    pub users: Vec<UserId>,
    pub boards: Vec<BoardId>,
    pub tasks: usize,
}

impl SeedData {
    pub async fn load(path: &Path) -> TaskboardResult<Self> {
        let bytes = tokio::fs::read(path).await?;
        serde_json::from_slice(&bytes).map_err(|e| TaskboardError::Serialization(e.to_string()))
    }

    pub async fn apply(&self, store: &dyn BoardStore) -> TaskboardResult<SeedSummary> {
        let mut summary = SeedSummary::default();

        for seed in &self.users {
            let user = User {
                id: seed.id.unwrap_or_else(Uuid::new_v4),
                email: seed.email.clone(),
                username: seed.username.clone(),
                timezone: seed.timezone.clone(),
                notification_preference: seed.notification_preference,
            };
            let user = store.insert_user(user).await?;
            summary.users.push(user.id);
        }

        for seed in &self.boards {
            let owner = resolve(store, &seed.owner).await?;
            let (board, _) = store.create_board(seed.name.clone(), owner).await?;

            for (emails, role) in [(&seed.admins, Role::Admin), (&seed.members, Role::Member)] {
                for email in emails {
                    let user = resolve(store, email).await?;
                    store.add_membership(board.id, user, role).await?;
                }
            }

            for list in &seed.lists {
                let created = store.create_list(board.id, list.name.clone()).await?;
                for title in &list.tasks {
                    store
                        .create_task(
                            created.id,
                            NewTask {
                                title: title.clone(),
                                ..Default::default()
                            },
                        )
                        .await?;
                    summary.tasks += 1;
                }
            }

            tracing::info!(board_id = %board.id, name = %board.name, "seeded board");
            summary.boards.push(board.id);
        }

        Ok(summary)
    }
}

async fn resolve(store: &dyn BoardStore, email: &str) -> TaskboardResult<UserId> {
    store
        .find_user_by_email(email)
        .await?
        .map(|u| u.id)
        .ok_or_else(|| TaskboardError::Validation(format!("seed references unknown user {email}")))
}
