//! Service configuration loaded from environment variables

use anyhow::Result;
use std::env;
use std::time::Duration;

/// Auth service configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Port the HTTP server listens on
    pub server_port: u16,
    /// Public base URL used in login links and cookie security
    pub public_url: String,
    /// Shared secret for signing access tokens
    pub jwt_secret: String,
    /// Access token lifetime (default: 5 minutes)
    pub access_expiry: Duration,
    /// Session TTL, renewed on touch (default: 7 days)
    pub session_expiry: Duration,
    /// Minimum interval between session touch writes (default: 60s)
    pub touch_min_interval: Duration,
    /// Login-code requests allowed per email per minute (default: 5)
    pub rate_limit_per_minute: i64,
    /// Login-code requests allowed per email per hour (default: 20)
    pub rate_limit_per_hour: i64,
    /// How often the metrics collector scans the session keyspace
    pub metrics_tick: Duration,
    /// Window within which a session counts as active (default: 5 minutes)
    pub metrics_active_window: Duration,
    /// Window over which hub broadcasts are spread (default: 15s)
    pub broadcast_spread: Duration,
    /// Whether session log entries are written to Postgres
    pub session_log_enabled: bool,
    /// Whether the onboarding referral field is shown to clients
    pub referral_field_enabled: bool,
}

impl AuthConfig {
    /// Create a new AuthConfig from environment variables
    ///
    /// # Environment Variables
    /// - `SERVER_PORT`: HTTP listen port (default: 8080)
    /// - `PUBLIC_URL`: public base URL (default: "http://localhost:8080")
    /// - `JWT_SECRET`: HS256 signing secret (required)
    /// - `JWT_ACCESS_EXPIRY`: access token lifetime in seconds (default: 300)
    /// - `SESSION_EXPIRY`: session TTL in seconds (default: 604800)
    /// - `SESSION_TOUCH_MIN_INTERVAL`: touch throttle in seconds (default: 60)
    /// - `RATE_LIMIT_PER_MINUTE` / `RATE_LIMIT_PER_HOUR`: limiter ceilings
    /// - `METRICS_TICK`: collector interval in seconds (default: 40)
    /// - `METRICS_ACTIVE_WINDOW`: active-session window in seconds (default: 300)
    /// - `METRICS_BROADCAST_SPREAD`: broadcast spread in seconds (default: 15)
    /// - `SESSION_LOG_ENABLED`: write audit entries (default: true)
    /// - `REFERRAL_FIELD_ENABLED`: expose the referral field (default: false)
    pub fn from_env() -> Result<Self> {
        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| anyhow::anyhow!("JWT_SECRET environment variable not set"))?;

        Ok(AuthConfig {
            server_port: parse_env("SERVER_PORT", 8080),
            public_url: env::var("PUBLIC_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            jwt_secret,
            access_expiry: Duration::from_secs(parse_env("JWT_ACCESS_EXPIRY", 300)),
            session_expiry: Duration::from_secs(parse_env("SESSION_EXPIRY", 7 * 24 * 3600)),
            touch_min_interval: Duration::from_secs(parse_env("SESSION_TOUCH_MIN_INTERVAL", 60)),
            rate_limit_per_minute: parse_env("RATE_LIMIT_PER_MINUTE", 5),
            rate_limit_per_hour: parse_env("RATE_LIMIT_PER_HOUR", 20),
            metrics_tick: Duration::from_secs(parse_env("METRICS_TICK", 40)),
            metrics_active_window: Duration::from_secs(parse_env("METRICS_ACTIVE_WINDOW", 300)),
            broadcast_spread: Duration::from_secs(parse_env("METRICS_BROADCAST_SPREAD", 15)),
            session_log_enabled: parse_env("SESSION_LOG_ENABLED", true),
            referral_field_enabled: parse_env("REFERRAL_FIELD_ENABLED", false),
        })
    }

    /// Whether the service is exposed over TLS (controls the cookie flag)
    pub fn is_secure(&self) -> bool {
        self.public_url.starts_with("https")
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Config with test defaults, used across the service's unit tests.
#[cfg(test)]
pub(crate) fn test_config() -> AuthConfig {
    AuthConfig {
        server_port: 8080,
        public_url: "http://localhost:8080".to_string(),
        jwt_secret: "test-secret".to_string(),
        access_expiry: Duration::from_secs(300),
        session_expiry: Duration::from_secs(7 * 24 * 3600),
        touch_min_interval: Duration::from_secs(60),
        rate_limit_per_minute: 5,
        rate_limit_per_hour: 20,
        metrics_tick: Duration::from_secs(40),
        metrics_active_window: Duration::from_secs(300),
        broadcast_spread: Duration::from_secs(15),
        session_log_enabled: false,
        referral_field_enabled: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_defaults() {
        assert_eq!(parse_env("AUTH_CONFIG_TEST_UNSET", 42u64), 42);
        assert!(parse_env("AUTH_CONFIG_TEST_UNSET_BOOL", true));
    }

    #[test]
    fn test_is_secure() {
        let mut config = test_config();
        assert!(!config.is_secure());
        config.public_url = "https://sandbox.example.com".to_string();
        assert!(config.is_secure());
    }
}
