pub mod connection;
pub mod dispatcher;
pub mod message;
pub mod registry;
pub mod reminders;
pub mod services;
pub mod state;
pub mod ws;

pub use connection::{ConnectionHandler, ConnectionState};
pub use dispatcher::{CommandDispatcher, DispatchError, DispatchOutcome, SessionContext};
pub use message::{ClientAction, ErrorCode, Inbound, ServerEvent};
pub use registry::{BoardSessionRegistry, BroadcastReport, ConnectionId};
pub use reminders::ReminderScheduler;
pub use services::{
    AuthChain, AuthService, JwtAuthService, LogNotificationService, Notification,
    NotificationService, NotifyError, StaticTokenAuth,
};
pub use state::SyncState;
pub use ws::router;
