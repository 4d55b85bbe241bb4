//! Audit trail for session lifecycle events
//!
//! Append failures are logged and swallowed; the audit sink must never
//! block or fail the primary auth flow.

use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

/// Session lifecycle action recorded in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    Login,
    Logout,
    Refresh,
    Revoke,
}

impl SessionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionAction::Login => "login",
            SessionAction::Logout => "logout",
            SessionAction::Refresh => "refresh",
            SessionAction::Revoke => "revoke",
        }
    }
}

/// One audit entry
#[derive(Debug, Clone)]
pub struct SessionLogEntry {
    pub user_id: Uuid,
    pub session_id: String,
    pub action: SessionAction,
    pub ip: String,
    pub user_agent: String,
    pub geo: String,
}

/// Audit sink writing to the session_log table
#[derive(Clone)]
pub struct SessionLogRepository {
    pool: PgPool,
    enabled: bool,
}

impl SessionLogRepository {
    /// Create a new session log repository
    pub fn new(pool: PgPool, enabled: bool) -> Self {
        Self { pool, enabled }
    }

    /// Append an audit entry; a no-op when disabled
    pub async fn append(&self, entry: SessionLogEntry) {
        if !self.enabled {
            return;
        }

        let result = sqlx::query(
            "INSERT INTO session_log (user_id, session_id, action, ip, user_agent, geo) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(entry.user_id)
        .bind(&entry.session_id)
        .bind(entry.action.as_str())
        .bind(&entry.ip)
        .bind(&entry.user_agent)
        .bind(&entry.geo)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!(
                action = entry.action.as_str(),
                session_id = %entry.session_id,
                error = %e,
                "session log append failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_names() {
        assert_eq!(SessionAction::Login.as_str(), "login");
        assert_eq!(SessionAction::Logout.as_str(), "logout");
        assert_eq!(SessionAction::Refresh.as_str(), "refresh");
        assert_eq!(SessionAction::Revoke.as_str(), "revoke");
    }
}
