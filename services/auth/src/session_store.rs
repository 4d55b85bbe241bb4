//! Session management backed by Redis hashes
//!
//! Each session is a hash under `s:{session_id}` so individual fields
//! (e.g. the activity timestamp) can be updated without read-modify-write
//! cycles. A set under `su:{user_id}` indexes the sessions per user and
//! is kept in sync with the primary records; stale IDs found during a
//! full listing are pruned from the set.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, SecondsFormat, Utc};
use common::cache::RedisPool;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::token::generate_token;

// Hash field names, kept short to bound per-session memory.
const F_USER_ID: &str = "uid";
const F_REFRESH_TOKEN: &str = "rt";
const F_PREV_REFRESH_TOKEN: &str = "prt";
const F_IP: &str = "ip";
const F_GEO: &str = "geo";
const F_CREATED_AT: &str = "cat";
const F_LAST_ACTIVE_AT: &str = "lat";

/// One authenticated device/browser instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub user_id: String,
    pub refresh_token: String,
    /// Previous refresh secret, kept valid through the rotation grace window
    pub prev_refresh_token: Option<String>,
    pub ip: String,
    pub geo: String,
    pub created_at: String,
    pub last_active_at: String,
}

/// A resolved session with display data, for the sessions list
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub ip: String,
    pub geo: String,
    pub created_at: String,
    pub last_active_at: String,
    pub current: bool,
}

/// Session store over Redis
#[derive(Clone)]
pub struct SessionStore {
    redis: RedisPool,
    expiry: Duration,
    touch_min_interval: Duration,
}

impl SessionStore {
    /// Create a new session store
    pub fn new(redis: RedisPool, expiry: Duration, touch_min_interval: Duration) -> Self {
        Self {
            redis,
            expiry,
            touch_min_interval,
        }
    }

    fn session_key(session_id: &str) -> String {
        format!("s:{}", session_id)
    }

    fn user_sessions_key(user_id: &str) -> String {
        format!("su:{}", user_id)
    }

    /// Current time in the RFC3339 form stored in session hashes
    pub fn now_timestamp() -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// Create a new session and add it to the user's index, one pipeline
    pub async fn create(&self, session_id: &str, record: &SessionRecord) -> Result<()> {
        let key = Self::session_key(session_id);
        let index_key = Self::user_sessions_key(&record.user_id);
        let expiry_secs = self.expiry.as_secs() as i64;

        let mut fields: Vec<(&str, String)> = vec![
            (F_USER_ID, record.user_id.clone()),
            (F_REFRESH_TOKEN, record.refresh_token.clone()),
            (F_IP, record.ip.clone()),
            (F_GEO, record.geo.clone()),
            (F_CREATED_AT, record.created_at.clone()),
            (F_LAST_ACTIVE_AT, record.last_active_at.clone()),
        ];
        if let Some(prev) = &record.prev_refresh_token {
            fields.push((F_PREV_REFRESH_TOKEN, prev.clone()));
        }

        let mut conn = self.redis.connection().await.context("session: connect")?;
        let _: () = redis::pipe()
            .hset_multiple(&key, &fields)
            .ignore()
            .expire(&key, expiry_secs)
            .ignore()
            .sadd(&index_key, session_id)
            .ignore()
            .expire(&index_key, expiry_secs)
            .ignore()
            .query_async(&mut conn)
            .await
            .context("session: create")?;

        debug!(user_id = %record.user_id, "created session");
        Ok(())
    }

    /// Get a session record, or None if it does not exist or has expired
    pub async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let mut conn = self.redis.connection().await.context("session: connect")?;
        let map: HashMap<String, String> = conn
            .hgetall(Self::session_key(session_id))
            .await
            .context("session: get")?;
        Ok(record_from_map(&map))
    }

    /// List all active session IDs for a user
    pub async fn list_user_sessions(&self, user_id: &str) -> Result<Vec<String>> {
        let mut conn = self.redis.connection().await.context("session: connect")?;
        let ids: Vec<String> = conn
            .smembers(Self::user_sessions_key(user_id))
            .await
            .context("session: list ids")?;
        Ok(ids)
    }

    /// List resolved sessions using one pipelined round-trip
    ///
    /// IDs whose underlying record has expired are pruned from the user's
    /// set, self-healing the index.
    pub async fn list_user_sessions_full(
        &self,
        user_id: &str,
        current_session_id: &str,
    ) -> Result<Vec<SessionInfo>> {
        let mut conn = self.redis.connection().await.context("session: connect")?;

        let ids: Vec<String> = conn
            .smembers(Self::user_sessions_key(user_id))
            .await
            .context("session: list ids")?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.hgetall(Self::session_key(id));
        }
        let maps: Vec<HashMap<String, String>> = pipe
            .query_async(&mut conn)
            .await
            .context("session: batch resolve")?;

        let mut stale_ids = Vec::new();
        let mut sessions = Vec::with_capacity(ids.len());
        for (id, map) in ids.iter().zip(maps) {
            if map.is_empty() {
                stale_ids.push(id.clone());
                continue;
            }
            sessions.push(SessionInfo {
                session_id: id.clone(),
                ip: map.get(F_IP).cloned().unwrap_or_default(),
                geo: map.get(F_GEO).cloned().unwrap_or_default(),
                created_at: map.get(F_CREATED_AT).cloned().unwrap_or_default(),
                last_active_at: map.get(F_LAST_ACTIVE_AT).cloned().unwrap_or_default(),
                current: id == current_session_id,
            });
        }

        if !stale_ids.is_empty() {
            debug!(
                user_id = user_id,
                stale = stale_ids.len(),
                "pruning expired session ids from index"
            );
            let _: u64 = conn
                .srem(Self::user_sessions_key(user_id), stale_ids)
                .await
                .context("session: prune index")?;
        }

        Ok(sessions)
    }

    /// Remove a session record and its index entry together
    pub async fn delete(&self, session_id: &str, user_id: &str) -> Result<()> {
        let mut conn = self.redis.connection().await.context("session: connect")?;
        let _: () = redis::pipe()
            .del(Self::session_key(session_id))
            .ignore()
            .srem(Self::user_sessions_key(user_id), session_id)
            .ignore()
            .query_async(&mut conn)
            .await
            .context("session: delete")?;
        Ok(())
    }

    /// Remove all of a user's sessions except the current one
    pub async fn delete_others(&self, current_session_id: &str, user_id: &str) -> Result<usize> {
        let ids = self.list_user_sessions(user_id).await?;
        let mut count = 0;
        for id in ids {
            if id == current_session_id {
                continue;
            }
            self.delete(&id, user_id).await?;
            count += 1;
        }
        Ok(count)
    }

    /// Rotate the refresh secret for a session
    ///
    /// The current secret moves into the previous slot so a concurrent
    /// refresher holding it still succeeds during the grace window. The
    /// activity timestamp is updated and the TTL renewed. Fails if the
    /// session does not exist.
    pub async fn rotate_refresh_token(&self, session_id: &str) -> Result<String> {
        let mut conn = self.redis.connection().await.context("session: connect")?;

        let key = Self::session_key(session_id);
        let current: Option<String> = conn
            .hget(&key, F_REFRESH_TOKEN)
            .await
            .context("session: read refresh token")?;
        let Some(current) = current else {
            bail!("session not found");
        };

        let new_token = generate_token()?;
        let now = Self::now_timestamp();

        let _: () = redis::pipe()
            .hset_multiple(
                &key,
                &[
                    (F_REFRESH_TOKEN, new_token.as_str()),
                    (F_PREV_REFRESH_TOKEN, current.as_str()),
                    (F_LAST_ACTIVE_AT, now.as_str()),
                ],
            )
            .ignore()
            .expire(&key, self.expiry.as_secs() as i64)
            .ignore()
            .query_async(&mut conn)
            .await
            .context("session: rotate refresh token")?;

        Ok(new_token)
    }

    /// Get a session and update its activity timestamp, throttled
    ///
    /// The write is skipped when the last touch is younger than the
    /// configured minimum interval, bounding write volume under
    /// high-frequency request rates. Whenever a write does happen the
    /// TTL is renewed (sliding expiration).
    pub async fn validate_and_touch(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let mut conn = self.redis.connection().await.context("session: connect")?;

        let key = Self::session_key(session_id);
        let map: HashMap<String, String> = conn
            .hgetall(&key)
            .await
            .context("session: get for touch")?;
        let Some(mut record) = record_from_map(&map) else {
            return Ok(None);
        };

        let now = Utc::now();
        let needs_touch = match DateTime::parse_from_rfc3339(&record.last_active_at) {
            Ok(last) => {
                (now - last.with_timezone(&Utc)).num_seconds()
                    >= self.touch_min_interval.as_secs() as i64
            }
            // Unparseable or missing timestamp: repair it with a write.
            Err(_) => true,
        };

        if needs_touch {
            let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
            let _: () = redis::pipe()
                .hset(&key, F_LAST_ACTIVE_AT, stamp.as_str())
                .ignore()
                .expire(&key, self.expiry.as_secs() as i64)
                .ignore()
                .query_async(&mut conn)
                .await
                .context("session: touch")?;
            record.last_active_at = stamp;
        }

        Ok(Some(record))
    }
}

fn record_from_map(map: &HashMap<String, String>) -> Option<SessionRecord> {
    if map.is_empty() {
        return None;
    }
    Some(SessionRecord {
        user_id: map.get(F_USER_ID).cloned().unwrap_or_default(),
        refresh_token: map.get(F_REFRESH_TOKEN).cloned().unwrap_or_default(),
        prev_refresh_token: map.get(F_PREV_REFRESH_TOKEN).cloned(),
        ip: map.get(F_IP).cloned().unwrap_or_default(),
        geo: map.get(F_GEO).cloned().unwrap_or_default(),
        created_at: map.get(F_CREATED_AT).cloned().unwrap_or_default(),
        last_active_at: map.get(F_LAST_ACTIVE_AT).cloned().unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{generate_session_id, timing_safe_eq};
    use common::cache::RedisConfig;
    use serial_test::serial;

    async fn store(touch_min_interval: Duration) -> SessionStore {
        let pool = RedisPool::new(&RedisConfig {
            url: "redis://localhost:6379".to_string(),
        })
        .await
        .expect("redis connection");
        SessionStore::new(pool, Duration::from_secs(3600), touch_min_interval)
    }

    fn record(user_id: &str) -> SessionRecord {
        let now = SessionStore::now_timestamp();
        SessionRecord {
            user_id: user_id.to_string(),
            refresh_token: generate_token().unwrap(),
            prev_refresh_token: None,
            ip: "203.0.113.7".to_string(),
            geo: "Lisbon, Portugal".to_string(),
            created_at: now.clone(),
            last_active_at: now,
        }
    }

    #[tokio::test]
    #[serial]
    #[ignore] // Requires Redis running at localhost:6379
    async fn test_create_get_delete() {
        let store = store(Duration::from_secs(60)).await;
        let sid = generate_session_id().unwrap();
        let rec = record("user-create-get");

        store.create(&sid, &rec).await.unwrap();

        let loaded = store.get(&sid).await.unwrap().expect("session exists");
        assert_eq!(loaded.user_id, rec.user_id);
        assert_eq!(loaded.refresh_token, rec.refresh_token);
        assert_eq!(loaded.prev_refresh_token, None);

        let ids = store.list_user_sessions("user-create-get").await.unwrap();
        assert!(ids.contains(&sid));

        store.delete(&sid, "user-create-get").await.unwrap();
        assert!(store.get(&sid).await.unwrap().is_none());
        let ids = store.list_user_sessions("user-create-get").await.unwrap();
        assert!(!ids.contains(&sid));
    }

    #[tokio::test]
    #[serial]
    #[ignore] // Requires Redis running at localhost:6379
    async fn test_touch_throttle() {
        let store = store(Duration::from_secs(60)).await;
        let sid = generate_session_id().unwrap();
        let mut rec = record("user-touch");
        // Fresh timestamp: within the interval, so no write expected.
        rec.last_active_at = SessionStore::now_timestamp();
        store.create(&sid, &rec).await.unwrap();

        let first = store.validate_and_touch(&sid).await.unwrap().unwrap();
        let second = store.validate_and_touch(&sid).await.unwrap().unwrap();
        assert_eq!(first.last_active_at, rec.last_active_at);
        assert_eq!(second.last_active_at, rec.last_active_at);

        // An old timestamp forces a touch.
        let zero_interval = SessionStore::new(
            store.redis.clone(),
            Duration::from_secs(3600),
            Duration::from_secs(0),
        );
        let touched = zero_interval.validate_and_touch(&sid).await.unwrap().unwrap();
        assert!(touched.last_active_at >= rec.last_active_at);

        store.delete(&sid, "user-touch").await.unwrap();
    }

    #[tokio::test]
    #[serial]
    #[ignore] // Requires Redis running at localhost:6379
    async fn test_refresh_rotation_grace_window() {
        let store = store(Duration::from_secs(60)).await;
        let sid = generate_session_id().unwrap();
        let rec = record("user-rotate");
        let original = rec.refresh_token.clone();
        store.create(&sid, &rec).await.unwrap();

        let rotated = store.rotate_refresh_token(&sid).await.unwrap();
        assert_ne!(rotated, original);

        let loaded = store.get(&sid).await.unwrap().unwrap();
        assert!(timing_safe_eq(&loaded.refresh_token, &rotated));
        assert_eq!(loaded.prev_refresh_token.as_deref(), Some(original.as_str()));

        // A second rotation retires the original secret entirely.
        let rotated_again = store.rotate_refresh_token(&sid).await.unwrap();
        let loaded = store.get(&sid).await.unwrap().unwrap();
        assert_eq!(loaded.refresh_token, rotated_again);
        assert_eq!(loaded.prev_refresh_token.as_deref(), Some(rotated.as_str()));
        assert!(!timing_safe_eq(
            loaded.prev_refresh_token.as_deref().unwrap_or(""),
            &original
        ));

        store.delete(&sid, "user-rotate").await.unwrap();
    }

    #[tokio::test]
    #[serial]
    #[ignore] // Requires Redis running at localhost:6379
    async fn test_rotate_missing_session_fails() {
        let store = store(Duration::from_secs(60)).await;
        assert!(store.rotate_refresh_token("does-not-exist").await.is_err());
    }

    #[tokio::test]
    #[serial]
    #[ignore] // Requires Redis running at localhost:6379
    async fn test_delete_others() {
        let store = store(Duration::from_secs(60)).await;
        let user = "user-revoke-others";

        let a = generate_session_id().unwrap();
        let b = generate_session_id().unwrap();
        let c = generate_session_id().unwrap();
        for sid in [&a, &b, &c] {
            store.create(sid, &record(user)).await.unwrap();
        }

        let removed = store.delete_others(&a, user).await.unwrap();
        assert_eq!(removed, 2);

        assert!(store.get(&a).await.unwrap().is_some());
        assert!(store.get(&b).await.unwrap().is_none());
        assert!(store.get(&c).await.unwrap().is_none());

        store.delete(&a, user).await.unwrap();
    }

    // Full login flow over the Redis stores: request a code, redeem it,
    // open a session, refresh it, log out.
    #[tokio::test]
    #[serial]
    #[ignore] // Requires Redis running at localhost:6379
    async fn test_code_login_flow() {
        use crate::token::{generate_code, normalize_code};
        use crate::token_store::AuthTokenStore;

        let store = store(Duration::from_secs(60)).await;
        let tokens = AuthTokenStore::new(store.redis.clone());
        let email = "flow@example.com";

        let token = generate_token().unwrap();
        let code = generate_code().unwrap();
        tokens.save(&token, &code, email).await.unwrap();

        let (found_token, pending) = tokens
            .lookup_by_code(email, &code)
            .await
            .unwrap()
            .expect("code resolves");
        assert_eq!(found_token, token);
        assert!(timing_safe_eq(
            &normalize_code(&pending.code),
            &normalize_code(&code)
        ));
        tokens.discard(&token).await.unwrap();

        let sid = generate_session_id().unwrap();
        store.create(&sid, &record("flow-user")).await.unwrap();

        let rotated = store.rotate_refresh_token(&sid).await.unwrap();
        let session = store.get(&sid).await.unwrap().expect("session exists");
        assert!(timing_safe_eq(&session.refresh_token, &rotated));

        store.delete(&sid, "flow-user").await.unwrap();
        assert!(store.get(&sid).await.unwrap().is_none());
        assert!(tokens.consume(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    #[serial]
    #[ignore] // Requires Redis running at localhost:6379
    async fn test_full_listing_prunes_stale_ids() {
        let store = store(Duration::from_secs(60)).await;
        let user = "user-stale-index";

        let live = generate_session_id().unwrap();
        let stale = generate_session_id().unwrap();
        store.create(&live, &record(user)).await.unwrap();
        store.create(&stale, &record(user)).await.unwrap();

        // Expire the record but leave the index entry behind.
        store
            .redis
            .delete(&SessionStore::session_key(&stale))
            .await
            .unwrap();

        let sessions = store.list_user_sessions_full(user, &live).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_id, live);
        assert!(sessions[0].current);

        let ids = store.list_user_sessions(user).await.unwrap();
        assert!(!ids.contains(&stale));

        store.delete(&live, user).await.unwrap();
    }
}
