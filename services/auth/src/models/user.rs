//! User model and related functionality

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Account status for the passwordless flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    /// Created on first login-code request, not yet verified
    PendingVerification,
    /// Verified at least once
    Active,
    /// Administratively disabled; verification is refused
    Disabled,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::PendingVerification => "pending_verification",
            UserStatus::Active => "active",
            UserStatus::Disabled => "disabled",
        }
    }
}

impl std::str::FromStr for UserStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_verification" => Ok(UserStatus::PendingVerification),
            "active" => Ok(UserStatus::Active),
            "disabled" => Ok(UserStatus::Disabled),
            other => Err(anyhow::anyhow!("unknown user status: {}", other)),
        }
    }
}

/// User entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub status: UserStatus,
    pub display_name: Option<String>,
    pub gravatar_allowed: bool,
    pub referral_source: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// User profile update payload
#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpdateProfile {
    pub display_name: Option<String>,
    pub gravatar_allowed: Option<bool>,
    pub referral_source: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_status_round_trip() {
        for status in [
            UserStatus::PendingVerification,
            UserStatus::Active,
            UserStatus::Disabled,
        ] {
            assert_eq!(UserStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(UserStatus::from_str("banned").is_err());
    }
}
