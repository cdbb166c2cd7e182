use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = Uuid;

/// Channel(s) a user wants out-of-band notifications on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPreference {
    #[default]
    Email,
    Discord,
    Both,
    None,
}

impl NotificationPreference {
    pub fn wants_email(self) -> bool {
        matches!(self, Self::Email | Self::Both)
    }

    pub fn wants_discord(self) -> bool {
        matches!(self, Self::Discord | Self::Both)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub username: Option<String>,
    /// IANA zone name, used by notification sinks to render due dates.
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub notification_preference: NotificationPreference,
}

impl User {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            username: None,
            timezone: None,
            notification_preference: NotificationPreference::default(),
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn effective_timezone(&self) -> &str {
        self.timezone.as_deref().unwrap_or("UTC")
    }
}

/// Emails compare case-insensitively and ignore surrounding whitespace.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preference_channels() {
        assert!(NotificationPreference::Both.wants_email());
        assert!(NotificationPreference::Both.wants_discord());
        assert!(!NotificationPreference::Discord.wants_email());
        assert!(!NotificationPreference::None.wants_discord());
    }

    #[test]
    fn test_effective_timezone() {
        let mut user = User::new("a@example.com");
        assert_eq!(user.effective_timezone(), "UTC");
        user.timezone = Some("Asia/Tbilisi".to_string());
        assert_eq!(user.effective_timezone(), "Asia/Tbilisi");
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  U2@Example.COM "), "u2@example.com");
    }
}
