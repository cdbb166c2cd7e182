//! Collaborator services consumed by the sync layer.
//!
//! [`AuthService`] turns the connection token into a user id and
//! [`NotificationService`] delivers out-of-band notices (added to a board,
//! task due, ...). Both are traits so tests and deployments can plug in
//! their own implementations.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use taskboard_core::AuthConfig;
use taskboard_domain::{BoardId, NotificationPreference, TaskId, TaskPriority, UserId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token")]
    InvalidToken,
    #[error("token expiry out of range")]
    ExpiryOutOfRange,
    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

/// Resolves a connection token to a user. `None` means the connection is anonymous.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthService: Send + Sync {
    async fn resolve(&self, token: &str) -> Option<UserId>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub user_id: UserId,
    pub exp: i64,
}

/// HS256 tokens carrying a `user_id` claim.
#[derive(Clone)]
pub struct JwtAuthService {
    decoding_key: DecodingKey,
    encoding_key: EncodingKey,
}

impl JwtAuthService {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(&self, user_id: UserId, ttl: ChronoDuration) -> Result<String, TokenError> {
        let expires_at = Utc::now()
            .checked_add_signed(ttl)
            .ok_or(TokenError::ExpiryOutOfRange)?;
        self.issue_until(user_id, expires_at)
    }

    pub fn issue_until(
        &self,
        user_id: UserId,
        expires_at: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let claims = TokenClaims {
            user_id,
            exp: expires_at.timestamp(),
        };
        Ok(encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.encoding_key,
        )?)
    }

    pub fn validate(&self, token: &str) -> Result<TokenClaims, TokenError> {
        if token.trim().is_empty() {
            return Err(TokenError::InvalidToken);
        }
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 30;
        let data = decode::<TokenClaims>(token, &self.decoding_key, &validation)?;
        Ok(data.claims)
    }
}

#[async_trait]
impl AuthService for JwtAuthService {
    async fn resolve(&self, token: &str) -> Option<UserId> {
        match self.validate(token) {
            Ok(claims) => Some(claims.user_id),
            Err(error) => {
                tracing::debug!(%error, "rejected connection token");
                None
            }
        }
    }
}

/// Fixed token table, used for development and seeded deployments.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenAuth {
    tokens: HashMap<String, UserId>,
}

impl StaticTokenAuth {
    pub fn new(tokens: HashMap<String, UserId>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl AuthService for StaticTokenAuth {
    async fn resolve(&self, token: &str) -> Option<UserId> {
        self.tokens.get(token).copied()
    }
}

/// Tries each service in turn; the first one that recognises the token wins.
pub struct AuthChain {
    services: Vec<Arc<dyn AuthService>>,
}

impl AuthChain {
    pub fn new(services: Vec<Arc<dyn AuthService>>) -> Self {
        Self { services }
    }

    /// Static tokens first, then JWT when a secret is configured.
    pub fn from_config(config: &AuthConfig) -> Self {
        let mut services: Vec<Arc<dyn AuthService>> = Vec::new();
        if !config.tokens.is_empty() {
            services.push(Arc::new(StaticTokenAuth::new(config.tokens.clone())));
        }
        if let Some(secret) = &config.jwt_secret {
            services.push(Arc::new(JwtAuthService::new(secret)));
        }
        if services.is_empty() {
            tracing::warn!("no authentication configured, every connection will be anonymous");
        }
        Self::new(services)
    }
}

#[async_trait]
impl AuthService for AuthChain {
    async fn resolve(&self, token: &str) -> Option<UserId> {
        for service in &self.services {
            if let Some(user_id) = service.resolve(token).await {
                return Some(user_id);
            }
        }
        None
    }
}

/// Out-of-band notice for a single user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    AddedToBoard {
        board_id: BoardId,
        board_name: String,
    },
    RemovedFromBoard {
        board_id: BoardId,
        board_name: String,
    },
    BoardDeleted {
        board_id: BoardId,
        board_name: String,
    },
    /// Routed by `preference`; `timezone` is the zone to render `due_date` in.
    TaskDue {
        task_id: TaskId,
        title: String,
        due_date: DateTime<Utc>,
        priority: TaskPriority,
        preference: NotificationPreference,
        timezone: String,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AddedToBoard { .. } => "added_to_board",
            Self::RemovedFromBoard { .. } => "removed_from_board",
            Self::BoardDeleted { .. } => "board_deleted",
            Self::TaskDue { .. } => "task_due",
        }
    }

    /// Channels this notice should go out on as `(email, discord)`.
    /// Board membership notices are email only.
    pub fn channels(&self) -> (bool, bool) {
        match self {
            Self::TaskDue { preference, .. } => {
                (preference.wants_email(), preference.wants_discord())
            }
            _ => (true, false),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification channel unavailable: {0}")]
    Unavailable(String),
    #[error("notification rejected: {0}")]
    Rejected(String),
}

/// Delivery is best-effort; failures are logged by callers and never undo a mutation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn send(&self, user_id: UserId, notification: Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log instead of an external channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotificationService;

#[async_trait]
impl NotificationService for LogNotificationService {
    async fn send(&self, user_id: UserId, notification: Notification) -> Result<(), NotifyError> {
        let detail = serde_json::to_string(&notification)
            .map_err(|e| NotifyError::Rejected(e.to_string()))?;
        let (email, discord) = notification.channels();
        tracing::info!(
            %user_id,
            kind = notification.kind(),
            email,
            discord,
            %detail,
            "notification"
        );
        Ok(())
    }
}
