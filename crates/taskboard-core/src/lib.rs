pub mod config;
pub mod error;
pub mod result;

pub use config::{AppConfig, AuthConfig, PolicyConfig, ReminderConfig, ServerConfig, SyncConfig};
pub use error::TaskboardError;
pub use result::TaskboardResult;
