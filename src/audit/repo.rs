use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use super::Window;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "login_method", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LoginMethod {
    Google,
    TokenRefresh,
}

/// Append-only audit record; never updated after insert, only pruned by age.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LoginLog {
    pub id: Uuid,
    /// Absent when the attempt failed before an identity was resolved.
    pub user_id: Option<Uuid>,
    /// Absent for administrative events (global sign-out) that are not
    /// logins; the method breakdown only counts tagged rows.
    pub login_method: Option<LoginMethod>,
    pub success: bool,
    pub error_message: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub location: Option<serde_json::Value>,
    pub login_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default)]
pub struct NewLoginLog {
    pub user_id: Option<Uuid>,
    pub method: Option<LoginMethod>,
    pub success: bool,
    pub error_message: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub location: Option<serde_json::Value>,
}

impl NewLoginLog {
    pub fn success(user_id: Uuid, method: LoginMethod) -> Self {
        Self {
            user_id: Some(user_id),
            method: Some(method),
            success: true,
            ..Default::default()
        }
    }

    pub fn failure(user_id: Option<Uuid>, method: LoginMethod, error: impl Into<String>) -> Self {
        Self {
            user_id,
            method: Some(method),
            success: false,
            error_message: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_client(mut self, ip: Option<String>, user_agent: Option<String>) -> Self {
        self.ip_address = ip;
        self.user_agent = user_agent;
        self
    }

    pub fn with_location(mut self, location: serde_json::Value) -> Self {
        self.location = Some(location);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

const LOG_COLUMNS: &str = "id, user_id, login_method, success, error_message, ip_address, \
                           user_agent, location, login_at";

pub async fn record(db: &PgPool, entry: &NewLoginLog) -> sqlx::Result<LoginLog> {
    sqlx::query_as::<_, LoginLog>(&format!(
        r#"
        INSERT INTO login_logs (user_id, login_method, success, error_message, ip_address, user_agent, location)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {LOG_COLUMNS}
        "#,
    ))
    .bind(entry.user_id)
    .bind(entry.method)
    .bind(entry.success)
    .bind(&entry.error_message)
    .bind(&entry.ip_address)
    .bind(&entry.user_agent)
    .bind(&entry.location)
    .fetch_one(db)
    .await
}

pub async fn by_user(db: &PgPool, user_id: Uuid, page: i64, limit: i64) -> sqlx::Result<Page<LoginLog>> {
    let page = page.max(1);
    let limit = limit.clamp(1, 100);
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM login_logs WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(db)
        .await?;
    let items = sqlx::query_as::<_, LoginLog>(&format!(
        r#"
        SELECT {LOG_COLUMNS}
        FROM login_logs
        WHERE user_id = $1
        ORDER BY login_at DESC
        LIMIT $2 OFFSET $3
        "#,
    ))
    .bind(user_id)
    .bind(limit)
    .bind((page - 1) * limit)
    .fetch_all(db)
    .await?;
    Ok(Page { items, total, page, limit })
}

pub async fn by_ip(db: &PgPool, ip: &str, page: i64, limit: i64) -> sqlx::Result<Page<LoginLog>> {
    let page = page.max(1);
    let limit = limit.clamp(1, 100);
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM login_logs WHERE ip_address = $1")
        .bind(ip)
        .fetch_one(db)
        .await?;
    let items = sqlx::query_as::<_, LoginLog>(&format!(
        r#"
        SELECT {LOG_COLUMNS}
        FROM login_logs
        WHERE ip_address = $1
        ORDER BY login_at DESC
        LIMIT $2 OFFSET $3
        "#,
    ))
    .bind(ip)
    .bind(limit)
    .bind((page - 1) * limit)
    .fetch_all(db)
    .await?;
    Ok(Page { items, total, page, limit })
}

pub async fn failed_count_for_user(db: &PgPool, user_id: Uuid, window: Window) -> sqlx::Result<i64> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM login_logs WHERE user_id = $1 AND NOT success AND login_at >= $2",
    )
    .bind(user_id)
    .bind(window.start(OffsetDateTime::now_utc()))
    .fetch_one(db)
    .await
}

pub async fn failed_count_for_ip(db: &PgPool, ip: &str, window: Window) -> sqlx::Result<i64> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM login_logs WHERE ip_address = $1 AND NOT success AND login_at >= $2",
    )
    .bind(ip)
    .bind(window.start(OffsetDateTime::now_utc()))
    .fetch_one(db)
    .await
}

pub async fn last_successful_login(db: &PgPool, user_id: Uuid) -> sqlx::Result<Option<LoginLog>> {
    sqlx::query_as::<_, LoginLog>(&format!(
        r#"
        SELECT {LOG_COLUMNS}
        FROM login_logs
        WHERE user_id = $1 AND success
        ORDER BY login_at DESC
        LIMIT 1
        "#,
    ))
    .bind(user_id)
    .fetch_optional(db)
    .await
}

/// All rows for one user, feeding the per-user stats aggregation.
pub async fn logs_for_user(db: &PgPool, user_id: Uuid) -> sqlx::Result<Vec<LoginLog>> {
    sqlx::query_as::<_, LoginLog>(&format!(
        "SELECT {LOG_COLUMNS} FROM login_logs WHERE user_id = $1"
    ))
    .bind(user_id)
    .fetch_all(db)
    .await
}

pub async fn logs_since(db: &PgPool, window: Window) -> sqlx::Result<Vec<LoginLog>> {
    sqlx::query_as::<_, LoginLog>(&format!(
        "SELECT {LOG_COLUMNS} FROM login_logs WHERE login_at >= $1"
    ))
    .bind(window.start(OffsetDateTime::now_utc()))
    .fetch_all(db)
    .await
}

pub async fn failed_since(db: &PgPool, window: Window) -> sqlx::Result<Vec<LoginLog>> {
    sqlx::query_as::<_, LoginLog>(&format!(
        "SELECT {LOG_COLUMNS} FROM login_logs WHERE NOT success AND login_at >= $1"
    ))
    .bind(window.start(OffsetDateTime::now_utc()))
    .fetch_all(db)
    .await
}

/// Retention prune; the only deletion path for audit rows.
pub async fn prune_older_than(db: &PgPool, days: i64) -> sqlx::Result<u64> {
    let cutoff = OffsetDateTime::now_utc() - time::Duration::days(days);
    let result = sqlx::query("DELETE FROM login_logs WHERE login_at < $1")
        .bind(cutoff)
        .execute(db)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&LoginMethod::TokenRefresh).unwrap(),
            "\"token_refresh\""
        );
        assert_eq!(
            serde_json::to_string(&LoginMethod::Google).unwrap(),
            "\"google\""
        );
    }

    #[test]
    fn builders_set_expected_fields() {
        let user_id = Uuid::new_v4();
        let ok = NewLoginLog::success(user_id, LoginMethod::Google)
            .with_client(Some("203.0.113.5".into()), Some("curl/8".into()));
        assert!(ok.success);
        assert_eq!(ok.user_id, Some(user_id));
        assert_eq!(ok.ip_address.as_deref(), Some("203.0.113.5"));
        assert!(ok.error_message.is_none());

        let bad = NewLoginLog::failure(None, LoginMethod::TokenRefresh, "invalid token");
        assert!(!bad.success);
        assert!(bad.user_id.is_none());
        assert_eq!(bad.error_message.as_deref(), Some("invalid token"));
    }
}
