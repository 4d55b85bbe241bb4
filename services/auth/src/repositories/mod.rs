//! Data access for durable entities

pub mod session_log;
pub mod user;

pub use session_log::{SessionAction, SessionLogEntry, SessionLogRepository};
pub use user::UserRepository;
