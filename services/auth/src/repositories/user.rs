//! User repository for database operations

use anyhow::Result;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

use crate::models::user::UpdateProfile;
use crate::models::{User, UserStatus};

const USER_COLUMNS: &str =
    "id, email, name, status, display_name, gravatar_allowed, referral_source, created_at";

fn user_from_row(row: &PgRow) -> Result<User> {
    let status: String = row.try_get("status")?;
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        status: UserStatus::from_str(&status)?,
        display_name: row.try_get("display_name")?,
        gravatar_allowed: row.try_get("gravatar_allowed")?,
        referral_source: row.try_get("referral_source")?,
        created_at: row.try_get("created_at")?,
    })
}

/// User repository
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    /// Create a new user repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new user with an explicit status
    pub async fn create_with_status(
        &self,
        email: &str,
        name: &str,
        status: UserStatus,
    ) -> Result<User> {
        info!(email = email, status = status.as_str(), "creating user");

        let row = sqlx::query(&format!(
            "INSERT INTO users (email, name, status) VALUES ($1, $2, $3) RETURNING {USER_COLUMNS}"
        ))
        .bind(email)
        .bind(name)
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;

        user_from_row(&row)
    }

    /// Find a user by email
    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    /// Find a user by ID
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    /// Transition a user from pending verification to active
    pub async fn activate(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE users SET status = 'active' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Update profile fields, leaving unset fields untouched
    pub async fn update_profile(&self, id: Uuid, update: &UpdateProfile) -> Result<User> {
        let row = sqlx::query(&format!(
            "UPDATE users SET \
                display_name = COALESCE($2, display_name), \
                gravatar_allowed = COALESCE($3, gravatar_allowed), \
                referral_source = COALESCE($4, referral_source) \
             WHERE id = $1 \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(update.display_name.as_deref())
        .bind(update.gravatar_allowed)
        .bind(update.referral_source.as_deref())
        .fetch_one(&self.pool)
        .await?;

        user_from_row(&row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::database::{DatabaseConfig, init_pool};

    async fn test_repository() -> Result<UserRepository> {
        let config = DatabaseConfig::from_env()?;
        let pool = init_pool(&config).await?;
        Ok(UserRepository::new(pool))
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running with DATABASE_URL set
    async fn test_first_verification_activates_pending_user() -> Result<()> {
        let repo = test_repository().await?;
        let email = format!("activate-{}@example.com", Uuid::new_v4());

        let created = repo
            .create_with_status(&email, &email, UserStatus::PendingVerification)
            .await?;
        assert_eq!(created.status, UserStatus::PendingVerification);

        repo.activate(created.id).await?;

        let found = repo.find_by_id(created.id).await?;
        assert_eq!(found.map(|u| u.status), Some(UserStatus::Active));
        Ok(())
    }
}
