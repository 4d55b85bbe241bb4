//! Short-lived storage for pending login attempts
//!
//! Each pending login is stored under two Redis keys sharing one TTL:
//! the opaque token (magic-link flow) and a code index keyed by
//! email + normalized code (manual-entry flow). Every create and delete
//! touches both keys in one pipeline so the index never orphans.

use anyhow::{Context, Result};
use common::cache::RedisPool;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::token::normalize_code;

/// Auth token TTL: the login code/link is valid for 5 minutes.
pub const AUTH_TOKEN_TTL_SECS: u64 = 300;

/// Failed code comparisons allowed before the token is invalidated.
pub const MAX_CODE_ATTEMPTS: u32 = 5;

/// One outstanding login attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingAuth {
    pub code: String,
    pub email: String,
    pub attempts: u32,
}

/// Error type for code lookups
#[derive(Debug, Error)]
pub enum CodeLookupError {
    /// The attempt counter hit the cap; both keys have been deleted
    #[error("too many attempts")]
    TooManyAttempts,
    /// Store failure
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Store for pending auth tokens and their code index
#[derive(Clone)]
pub struct AuthTokenStore {
    redis: RedisPool,
}

impl AuthTokenStore {
    /// Create a new auth token store
    pub fn new(redis: RedisPool) -> Self {
        Self { redis }
    }

    fn token_key(token: &str) -> String {
        format!("auth:{}", token)
    }

    fn code_key(email: &str, normalized_code: &str) -> String {
        format!("auth:code:{}:{}", email, normalized_code)
    }

    /// Store a pending auth token and its code index with a shared TTL
    pub async fn save(&self, token: &str, code: &str, email: &str) -> Result<()> {
        let data = PendingAuth {
            code: code.to_string(),
            email: email.to_string(),
            attempts: 0,
        };
        let payload = serde_json::to_string(&data).context("auth token: serialize")?;

        let mut conn = self.redis.connection().await.context("auth token: connect")?;
        let _: () = redis::pipe()
            .set_ex(Self::token_key(token), payload, AUTH_TOKEN_TTL_SECS)
            .ignore()
            .set_ex(
                Self::code_key(email, &normalize_code(code)),
                token,
                AUTH_TOKEN_TTL_SECS,
            )
            .ignore()
            .query_async(&mut conn)
            .await
            .context("auth token: save")?;

        debug!(email = email, "saved pending auth token");
        Ok(())
    }

    /// Atomically read-and-delete a token record (GETDEL)
    ///
    /// On a hit the code index is cleaned up as well. Concurrent consumers
    /// of one token see exactly one success.
    pub async fn consume(&self, token: &str) -> Result<Option<PendingAuth>> {
        let mut conn = self.redis.connection().await.context("auth token: connect")?;

        let payload: Option<String> = conn
            .get_del(Self::token_key(token))
            .await
            .context("auth token: consume")?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        let data: PendingAuth =
            serde_json::from_str(&payload).context("auth token: deserialize")?;

        let _: u64 = conn
            .del(Self::code_key(&data.email, &normalize_code(&data.code)))
            .await
            .context("auth token: delete code index")?;

        Ok(Some(data))
    }

    /// Resolve the code index and read (without deleting) the token record
    ///
    /// Returns the token alongside the record so a failed comparison can
    /// increment attempts in place. Once the attempt counter has reached
    /// [`MAX_CODE_ATTEMPTS`] both keys are deleted and the lookup signals
    /// the terminal error, distinct from a plain miss.
    pub async fn lookup_by_code(
        &self,
        email: &str,
        code: &str,
    ) -> Result<Option<(String, PendingAuth)>, CodeLookupError> {
        let mut conn = self
            .redis
            .connection()
            .await
            .context("auth token: connect")?;

        let code_key = Self::code_key(email, &normalize_code(code));
        let token: Option<String> = conn
            .get(&code_key)
            .await
            .context("auth token: resolve code index")?;
        let Some(token) = token else {
            return Ok(None);
        };

        let payload: Option<String> = conn
            .get(Self::token_key(&token))
            .await
            .context("auth token: read record")?;
        let Some(payload) = payload else {
            return Ok(None);
        };

        let data: PendingAuth =
            serde_json::from_str(&payload).context("auth token: deserialize")?;

        if data.attempts >= MAX_CODE_ATTEMPTS {
            let _: () = redis::pipe()
                .del(Self::token_key(&token))
                .ignore()
                .del(&code_key)
                .ignore()
                .query_async(&mut conn)
                .await
                .context("auth token: delete exhausted record")?;
            return Err(CodeLookupError::TooManyAttempts);
        }

        Ok(Some((token, data)))
    }

    /// Increment the attempt counter in place, preserving the remaining TTL
    pub async fn record_failed_attempt(&self, token: &str) -> Result<()> {
        let mut conn = self.redis.connection().await.context("auth token: connect")?;

        let key = Self::token_key(token);
        let payload: Option<String> = conn
            .get(&key)
            .await
            .context("auth token: read for attempt increment")?;
        let Some(payload) = payload else {
            // Expired between lookup and increment; nothing to count against.
            return Ok(());
        };

        let mut data: PendingAuth =
            serde_json::from_str(&payload).context("auth token: deserialize")?;
        data.attempts += 1;
        let payload = serde_json::to_string(&data).context("auth token: serialize")?;

        let _: () = redis::cmd("SET")
            .arg(&key)
            .arg(payload)
            .arg("KEEPTTL")
            .query_async(&mut conn)
            .await
            .context("auth token: write attempt increment")?;

        Ok(())
    }

    /// Delete a token record and its code index together
    pub async fn discard(&self, token: &str) -> Result<()> {
        let mut conn = self.redis.connection().await.context("auth token: connect")?;

        let payload: Option<String> = conn
            .get(Self::token_key(token))
            .await
            .context("auth token: read for discard")?;
        let Some(payload) = payload else {
            return Ok(());
        };

        let data: PendingAuth =
            serde_json::from_str(&payload).context("auth token: deserialize")?;

        let _: () = redis::pipe()
            .del(Self::token_key(token))
            .ignore()
            .del(Self::code_key(&data.email, &normalize_code(&data.code)))
            .ignore()
            .query_async(&mut conn)
            .await
            .context("auth token: discard")?;

        Ok(())
    }
}
