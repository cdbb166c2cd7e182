use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{board::BoardId, user::UserId};

/// Role a user holds on a board. Serialized as `user_status` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Member,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Member => "member",
        }
    }

    /// Owners and admins manage membership.
    pub fn can_manage_members(self) -> bool {
        matches!(self, Role::Owner | Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "owner" => Ok(Role::Owner),
            "admin" => Ok(Role::Admin),
            "member" => Ok(Role::Member),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// The role-bearing link between a user and a board. `(board_id, user_id)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardMembership {
    pub board_id: BoardId,
    pub user_id: UserId,
    #[serde(rename = "user_status")]
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl BoardMembership {
    pub fn new(board_id: BoardId, user_id: UserId, role: Role) -> Self {
        Self {
            board_id,
            user_id,
            role,
            created_at: Utc::now(),
        }
    }

    pub fn is_owner(&self) -> bool {
        self.role == Role::Owner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing_is_case_insensitive() {
        assert_eq!("Owner".parse::<Role>(), Ok(Role::Owner));
        assert_eq!("ADMIN".parse::<Role>(), Ok(Role::Admin));
        assert_eq!("member".parse::<Role>(), Ok(Role::Member));
        assert!("guest".parse::<Role>().is_err());
    }

    #[test]
    fn test_role_wire_format() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
        let membership = BoardMembership::new(uuid::Uuid::new_v4(), uuid::Uuid::new_v4(), Role::Member);
        let value = serde_json::to_value(&membership).unwrap();
        assert_eq!(value["user_status"], "member");
    }
}
