//! Rate limiter for login-code requests
//!
//! Two independent fixed windows per email (per-minute and per-hour),
//! each a Redis counter with its own TTL. The check-then-increment gap
//! is an accepted race: a burst of concurrent requests for one identity
//! can exceed the ceiling by at most the number of requests in flight
//! during one round-trip.

use anyhow::{Context, Result};
use common::cache::RedisPool;
use redis::AsyncCommands;

const MINUTE_WINDOW_SECS: i64 = 60;
const HOUR_WINDOW_SECS: i64 = 3600;

/// Outcome of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitOutcome {
    /// Request allowed; both counters were incremented
    Allowed,
    /// Request rejected; no counter was incremented
    Limited {
        /// Seconds until the violated window resets
        retry_after_secs: i64,
    },
}

/// Fixed-window rate limiter backed by Redis
#[derive(Clone)]
pub struct RateLimiter {
    redis: RedisPool,
    per_minute: i64,
    per_hour: i64,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(redis: RedisPool, per_minute: i64, per_hour: i64) -> Self {
        Self {
            redis,
            per_minute,
            per_hour,
        }
    }

    fn minute_key(email: &str) -> String {
        format!("auth:rl:{}:min", email)
    }

    fn hour_key(email: &str) -> String {
        format!("auth:rl:{}:hour", email)
    }

    /// Check both windows for an email and increment them if allowed
    ///
    /// Rejection reports the seconds remaining on the violated window's
    /// TTL, falling back to the nominal window length if the TTL cannot
    /// be read.
    pub async fn check_and_increment(&self, email: &str) -> Result<RateLimitOutcome> {
        let mut conn = self
            .redis
            .connection()
            .await
            .context("rate limit: connect")?;

        let minute_key = Self::minute_key(email);
        let hour_key = Self::hour_key(email);

        let minute_count: Option<i64> = conn
            .get(&minute_key)
            .await
            .context("rate limit: read minute counter")?;
        if minute_count.unwrap_or(0) >= self.per_minute {
            let retry_after = Self::window_ttl(&mut conn, &minute_key, MINUTE_WINDOW_SECS).await;
            return Ok(RateLimitOutcome::Limited {
                retry_after_secs: retry_after,
            });
        }

        let hour_count: Option<i64> = conn
            .get(&hour_key)
            .await
            .context("rate limit: read hour counter")?;
        if hour_count.unwrap_or(0) >= self.per_hour {
            let retry_after = Self::window_ttl(&mut conn, &hour_key, HOUR_WINDOW_SECS).await;
            return Ok(RateLimitOutcome::Limited {
                retry_after_secs: retry_after,
            });
        }

        // One batch: both counters advance together or not at all.
        let _: () = redis::pipe()
            .incr(&minute_key, 1)
            .ignore()
            .expire(&minute_key, MINUTE_WINDOW_SECS)
            .ignore()
            .incr(&hour_key, 1)
            .ignore()
            .expire(&hour_key, HOUR_WINDOW_SECS)
            .ignore()
            .query_async(&mut conn)
            .await
            .context("rate limit: increment counters")?;

        Ok(RateLimitOutcome::Allowed)
    }

    async fn window_ttl(
        conn: &mut redis::aio::MultiplexedConnection,
        key: &str,
        nominal_secs: i64,
    ) -> i64 {
        let ttl: i64 = conn.ttl(key).await.unwrap_or(-1);
        if ttl > 0 { ttl } else { nominal_secs }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::cache::RedisConfig;
    use serial_test::serial;

    async fn test_pool() -> RedisPool {
        RedisPool::new(&RedisConfig {
            url: "redis://localhost:6379".to_string(),
        })
        .await
        .expect("redis connection")
    }

    async fn clear(pool: &RedisPool, email: &str) {
        pool.delete(&RateLimiter::minute_key(email)).await.unwrap();
        pool.delete(&RateLimiter::hour_key(email)).await.unwrap();
    }

    #[tokio::test]
    #[serial]
    #[ignore] // Requires Redis running at localhost:6379
    async fn test_minute_ceiling_rejects_with_retry_after() {
        let pool = test_pool().await;
        let email = "limited@example.com";
        clear(&pool, email).await;

        let limiter = RateLimiter::new(pool.clone(), 5, 20);

        for _ in 0..5 {
            assert_eq!(
                limiter.check_and_increment(email).await.unwrap(),
                RateLimitOutcome::Allowed
            );
        }

        match limiter.check_and_increment(email).await.unwrap() {
            RateLimitOutcome::Limited { retry_after_secs } => {
                assert!(retry_after_secs > 0 && retry_after_secs <= 60);
            }
            RateLimitOutcome::Allowed => panic!("sixth request should be limited"),
        }

        // Rejection must not have advanced the hour counter past 5.
        let hour_count: Option<i64> = pool
            .get(&RateLimiter::hour_key(email))
            .await
            .unwrap()
            .and_then(|v| v.parse().ok());
        assert_eq!(hour_count, Some(5));

        clear(&pool, email).await;
    }

    #[tokio::test]
    #[serial]
    #[ignore] // Requires Redis running at localhost:6379
    async fn test_window_reset_allows_again() {
        let pool = test_pool().await;
        let email = "resets@example.com";
        clear(&pool, email).await;

        let limiter = RateLimiter::new(pool.clone(), 1, 20);

        assert_eq!(
            limiter.check_and_increment(email).await.unwrap(),
            RateLimitOutcome::Allowed
        );
        assert!(matches!(
            limiter.check_and_increment(email).await.unwrap(),
            RateLimitOutcome::Limited { .. }
        ));

        // Simulate window expiry instead of sleeping a full minute.
        pool.delete(&RateLimiter::minute_key(email)).await.unwrap();
        assert_eq!(
            limiter.check_and_increment(email).await.unwrap(),
            RateLimitOutcome::Allowed
        );

        clear(&pool, email).await;
    }
}
