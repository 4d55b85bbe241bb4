//! Periodic session-keyspace collector
//!
//! On each tick the collector scans the session keys, classifies every
//! session as active or frozen against the activity window, updates the
//! exported gauges, and pushes a user-centric payload to the hub. The
//! scan is cursor-based so a large keyspace never blocks Redis.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use common::cache::RedisPool;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error};

use super::hub::{ClientInfo, Hub, WsPayload};

type SnapshotFn = Box<dyn Fn(WsPayload) + Send + Sync>;

/// Derives session and user metrics from Redis and the live hub
pub struct Collector {
    redis: RedisPool,
    hub: Arc<Hub>,
    active_window: Duration,
    last_redis_uids: Mutex<HashSet<String>>,
    on_snapshot: Mutex<Option<SnapshotFn>>,
}

impl Collector {
    /// Create a collector; `active_window` is the recency bound below
    /// which a session counts as active
    pub fn new(redis: RedisPool, hub: Arc<Hub>, active_window: Duration) -> Self {
        Self {
            redis,
            hub,
            active_window,
            last_redis_uids: Mutex::new(HashSet::new()),
            on_snapshot: Mutex::new(None),
        }
    }

    /// Register a callback invoked after each tick with the new payload
    pub fn set_on_snapshot(&self, f: impl Fn(WsPayload) + Send + Sync + 'static) {
        *self.lock_snapshot() = Some(Box::new(f));
    }

    /// Compute a fresh payload from live hub state and the cached user
    /// set, without touching Redis
    ///
    /// Used for the initial send on connect so a new client sees
    /// current numbers without waiting for the next tick.
    pub fn snapshot(&self) -> WsPayload {
        let uids = self.lock_uids().clone();
        compute_payload(&self.hub.connected_clients(), &uids)
    }

    /// Run the collection loop until the task is dropped
    pub async fn run(self: Arc<Self>, tick: Duration) {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of a tokio interval fires immediately.
        interval.tick().await;

        loop {
            interval.tick().await;
            if let Err(e) = self.collect().await {
                error!(error = %e, "metrics collection failed");
            }
        }
    }

    async fn collect(&self) -> Result<()> {
        let counts = self.count_sessions().await?;

        metrics::gauge!("auth.sessions.active").set(counts.active as f64);
        metrics::gauge!("auth.sessions.frozen").set(counts.frozen as f64);

        *self.lock_uids() = counts.user_ids.clone();

        let payload = compute_payload(&self.hub.connected_clients(), &counts.user_ids);
        metrics::gauge!("auth.users.online").set(payload.users_online as f64);
        metrics::gauge!("auth.users.offline").set(payload.users_offline as f64);
        metrics::gauge!("auth.anon.recent").set(payload.anon_recent as f64);

        debug!(
            active = counts.active,
            frozen = counts.frozen,
            users_online = payload.users_online,
            users_offline = payload.users_offline,
            anon_recent = payload.anon_recent,
            "metrics tick"
        );

        if let Some(f) = self.lock_snapshot().as_ref() {
            f(payload);
        }
        Ok(())
    }

    /// Scan session keys, classifying each and collecting unique user IDs
    async fn count_sessions(&self) -> Result<SessionCounts> {
        let mut conn = self.redis.connection().await.context("metrics: connect")?;
        let cutoff = Utc::now() - self.active_window;

        let mut counts = SessionCounts::default();
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg("s:*")
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .context("metrics: scan sessions")?;

            if !keys.is_empty() {
                let mut pipe = redis::pipe();
                for key in &keys {
                    pipe.cmd("HMGET").arg(key).arg("lat").arg("uid");
                }
                let rows: Vec<(Option<String>, Option<String>)> = pipe
                    .query_async(&mut conn)
                    .await
                    .context("metrics: resolve sessions")?;

                for (last_active_at, user_id) in rows {
                    counts.classify(last_active_at.as_deref(), cutoff);
                    if let Some(uid) = user_id.filter(|u| !u.is_empty()) {
                        counts.user_ids.insert(uid);
                    }
                }
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(counts)
    }

    fn lock_uids(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        match self.last_redis_uids.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_snapshot(&self) -> std::sync::MutexGuard<'_, Option<SnapshotFn>> {
        match self.on_snapshot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[derive(Default)]
struct SessionCounts {
    active: usize,
    frozen: usize,
    user_ids: HashSet<String>,
}

impl SessionCounts {
    fn classify(&mut self, last_active_at: Option<&str>, cutoff: DateTime<Utc>) {
        let recent = last_active_at
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc) > cutoff)
            // Missing or unreadable timestamp counts as idle.
            .unwrap_or(false);
        if recent {
            self.active += 1;
        } else {
            self.frozen += 1;
        }
    }
}

/// Derive user-centric metrics from hub connections and session user IDs
///
/// A connected client is active by definition; no time-window check is
/// applied to connections, only to the session scan.
fn compute_payload(clients: &[ClientInfo], redis_uids: &HashSet<String>) -> WsPayload {
    let mut connected_uids = HashSet::new();
    let mut anon_labels = HashSet::new();

    for client in clients {
        if client.user_id.is_empty() {
            anon_labels.insert(client.label.as_str());
        } else {
            connected_uids.insert(client.user_id.as_str());
        }
    }

    let users_offline = redis_uids
        .iter()
        .filter(|uid| !connected_uids.contains(uid.as_str()))
        .count();

    WsPayload {
        users_online: connected_uids.len(),
        users_offline,
        anon_recent: anon_labels.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn client(label: &str, user_id: &str) -> ClientInfo {
        ClientInfo {
            label: label.to_string(),
            user_id: user_id.to_string(),
            connected_at: Utc::now(),
        }
    }

    #[test]
    fn test_compute_payload_dedupes_users_and_anons() {
        // Same user on two devices, same anonymous label twice.
        let clients = vec![
            client("phone", "u1"),
            client("laptop", "u1"),
            client("visitor-a", ""),
            client("visitor-a", ""),
            client("visitor-b", ""),
        ];
        let redis_uids: HashSet<String> =
            ["u1", "u2", "u3"].iter().map(|s| s.to_string()).collect();

        let payload = compute_payload(&clients, &redis_uids);
        assert_eq!(payload.users_online, 1);
        assert_eq!(payload.users_offline, 2);
        assert_eq!(payload.anon_recent, 2);
    }

    #[test]
    fn test_compute_payload_empty() {
        let payload = compute_payload(&[], &HashSet::new());
        assert_eq!(payload, WsPayload::default());
    }

    #[test]
    fn test_classify_against_cutoff() {
        let cutoff = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let mut counts = SessionCounts::default();

        counts.classify(Some("2025-06-01T12:05:00Z"), cutoff);
        counts.classify(Some("2025-06-01T11:00:00Z"), cutoff);
        counts.classify(Some("not a timestamp"), cutoff);
        counts.classify(None, cutoff);

        assert_eq!(counts.active, 1);
        assert_eq!(counts.frozen, 3);
    }

    #[tokio::test]
    async fn test_snapshot_uses_cached_uids() {
        let hub = Arc::new(Hub::new(Duration::from_secs(15)));
        // Connections are lazy; no server is needed for snapshot().
        let pool = RedisPool::new(&common::cache::RedisConfig {
            url: "redis://localhost:6379".to_string(),
        })
        .await
        .expect("client");
        let collector = Collector::new(pool, Arc::clone(&hub), Duration::from_secs(300));

        let (_id, _rx) = hub.register("phone".to_string(), "u1".to_string());
        *collector.lock_uids() = ["u1", "u2"].iter().map(|s| s.to_string()).collect();

        let payload = collector.snapshot();
        assert_eq!(payload.users_online, 1);
        assert_eq!(payload.users_offline, 1);
        assert_eq!(payload.anon_recent, 0);
    }
}
