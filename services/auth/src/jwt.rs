//! JWT service for short-lived access tokens
//!
//! Access tokens are stateless HS256 assertions binding a user ID and a
//! session ID for a few minutes. The bearer middleware still validates
//! the referenced session on every request, so revoking a session locks
//! out its access tokens immediately.

use anyhow::Result;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Claims carried by an access token
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    /// User ID
    pub uid: String,
    /// Session ID
    pub sid: String,
    /// Issued at time (unix seconds)
    pub iat: u64,
    /// Expiration time (unix seconds)
    pub exp: u64,
}

/// JWT service
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    access_expiry: Duration,
}

impl JwtService {
    /// Initialize a new JWT service with a shared HS256 secret
    pub fn new(secret: &str, access_expiry: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        JwtService {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            access_expiry,
        }
    }

    /// Create a signed access token bound to a user and session
    pub fn create_access_token(&self, user_id: &str, session_id: &str) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| anyhow::anyhow!("Failed to get current time: {}", e))?
            .as_secs();

        let claims = AccessClaims {
            uid: user_id.to_string(),
            sid: session_id.to_string(),
            iat: now,
            exp: now + self.access_expiry.as_secs(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;
        Ok(token)
    }

    /// Validate an access token and return the claims
    pub fn parse_access_token(&self, token: &str) -> Result<AccessClaims> {
        let token_data = decode::<AccessClaims>(token, &self.decoding_key, &self.validation)?;
        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> JwtService {
        JwtService::new("test-secret", Duration::from_secs(300))
    }

    #[test]
    fn test_access_token_round_trip() {
        let svc = service();
        let token = svc
            .create_access_token("user-1234", "abcdef0123456789")
            .unwrap();

        let claims = svc.parse_access_token(&token).unwrap();
        assert_eq!(claims.uid, "user-1234");
        assert_eq!(claims.sid, "abcdef0123456789");
        assert_eq!(claims.exp, claims.iat + 300);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let svc = service();
        let token = svc.create_access_token("user-1234", "sid").unwrap();

        let other = JwtService::new("different-secret", Duration::from_secs(300));
        assert!(other.parse_access_token(&token).is_err());
    }

    #[test]
    fn test_garbage_token_rejected() {
        let svc = service();
        assert!(svc.parse_access_token("not.a.jwt").is_err());
        assert!(svc.parse_access_token("").is_err());
    }
}
