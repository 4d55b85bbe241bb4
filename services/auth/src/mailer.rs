//! Login message dispatch
//!
//! Delivery transport is an external collaborator; the service consumes
//! it through the [`Mailer`] trait. The console implementation logs the
//! magic link, the human-entry code, and a readable expiry, which is
//! enough for local development and tests.

use anyhow::Result;
use chrono::Utc;
use tracing::info;

use crate::token_store::AUTH_TOKEN_TTL_SECS;

/// Sends login messages carrying both redemption paths (link and code)
pub trait Mailer: Send + Sync {
    fn send_login_email(&self, to: &str, token: &str, code: &str, public_url: &str) -> Result<()>;
}

/// Fallback sender that logs instead of delivering
pub struct ConsoleMailer;

impl Mailer for ConsoleMailer {
    fn send_login_email(&self, to: &str, token: &str, code: &str, public_url: &str) -> Result<()> {
        let link = format!("{}/auth/verify?token={}", public_url, token);
        let expires_at = (Utc::now() + chrono::Duration::seconds(AUTH_TOKEN_TTL_SECS as i64))
            .format("%H:%M UTC");

        info!(
            to = to,
            code = code,
            link = %link,
            expires_at = %expires_at,
            "login email (console)"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_mailer_never_fails() {
        let mailer = ConsoleMailer;
        assert!(
            mailer
                .send_login_email("a@b.com", &"0f".repeat(32), "ABC-DEF", "http://localhost:8080")
                .is_ok()
        );
    }
}
