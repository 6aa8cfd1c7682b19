use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Inactive,
    Suspended,
}

/// Identity record in the database. Users are never hard-deleted;
/// deactivation is a status transition.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub google_id: String,
    pub email: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub status: UserStatus,
    pub email_verified: bool,
    pub preferences: Option<serde_json::Value>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub last_login_at: Option<OffsetDateTime>,
}

const USER_COLUMNS: &str = "id, google_id, email, name, avatar_url, status, email_verified, \
                            preferences, created_at, updated_at, last_login_at";

/// Fields for a first-time federation. Status starts `active`, preferences
/// empty.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub google_id: String,
    pub email: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub email_verified: bool,
}

impl User {
    pub async fn create(db: &PgPool, new: &NewUser) -> sqlx::Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (google_id, email, name, avatar_url, status, email_verified, preferences)
            VALUES ($1, $2, $3, $4, 'active', $5, '{{}}'::jsonb)
            RETURNING {USER_COLUMNS}
            "#,
        ))
        .bind(&new.google_id)
        .bind(&new.email)
        .bind(&new.name)
        .bind(&new.avatar_url)
        .bind(new.email_verified)
        .fetch_one(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> sqlx::Result<Option<User>> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(db)
            .await
    }

    /// Exact-match lookup; the provider id is a uniqueness key.
    pub async fn find_by_google_id(db: &PgPool, google_id: &str) -> sqlx::Result<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE google_id = $1"
        ))
        .bind(google_id)
        .fetch_optional(db)
        .await
    }

    /// Exact-match lookup, case-sensitive as stored.
    pub async fn find_by_email(db: &PgPool, email: &str) -> sqlx::Result<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(db)
        .await
    }

    /// Refresh the mutable profile fields on a repeat login.
    pub async fn update_profile(
        db: &PgPool,
        id: Uuid,
        name: &str,
        avatar_url: Option<&str>,
    ) -> sqlx::Result<User> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET name = $2, avatar_url = $3, updated_at = now()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#,
        ))
        .bind(id)
        .bind(name)
        .bind(avatar_url)
        .fetch_one(db)
        .await
    }

    /// Attach a provider id to a user who previously existed under the same
    /// email without one.
    pub async fn link_google_id(
        db: &PgPool,
        id: Uuid,
        google_id: &str,
        name: &str,
        avatar_url: Option<&str>,
    ) -> sqlx::Result<User> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET google_id = $2, name = $3, avatar_url = $4, updated_at = now()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#,
        ))
        .bind(id)
        .bind(google_id)
        .bind(name)
        .bind(avatar_url)
        .fetch_one(db)
        .await
    }

    pub async fn touch_last_login(db: &PgPool, id: Uuid) -> sqlx::Result<User> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET last_login_at = now(), updated_at = now()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#,
        ))
        .bind(id)
        .fetch_one(db)
        .await
    }

}
