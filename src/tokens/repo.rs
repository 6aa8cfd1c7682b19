use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "token_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Stored refresh-token record. Only the SHA-256 digest of the secret is
/// persisted; access tokens are stateless and never written here.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_type: TokenKind,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
    pub is_revoked: bool,
    pub device_info: Option<serde_json::Value>,
}

impl RefreshToken {
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }

    /// Valid iff unrevoked and unexpired. Revocation is monotonic, so a
    /// revoked token never validates again regardless of expiry.
    pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        !self.is_revoked && !self.is_expired_at(now)
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(OffsetDateTime::now_utc())
    }
}

const TOKEN_COLUMNS: &str =
    "id, user_id, token_type, token_hash, expires_at, created_at, is_revoked, device_info";

/// Internal diagnostics only; the external validate contract never exposes
/// the expired/revoked distinction.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct TokenStats {
    pub total: usize,
    pub active: usize,
    pub expired: usize,
    pub revoked: usize,
}

pub async fn store(
    db: &PgPool,
    user_id: Uuid,
    token_hash: &str,
    expires_at: OffsetDateTime,
    device_info: Option<&serde_json::Value>,
) -> sqlx::Result<RefreshToken> {
    sqlx::query_as::<_, RefreshToken>(&format!(
        r#"
        INSERT INTO user_tokens (user_id, token_type, token_hash, expires_at, device_info)
        VALUES ($1, 'refresh', $2, $3, $4)
        RETURNING {TOKEN_COLUMNS}
        "#,
    ))
    .bind(user_id)
    .bind(token_hash)
    .bind(expires_at)
    .bind(device_info)
    .fetch_one(db)
    .await
}

/// Look up a token by digest; hits that are revoked or expired are
/// indistinguishable from misses.
pub async fn validate(db: &PgPool, token_hash: &str) -> sqlx::Result<Option<RefreshToken>> {
    sqlx::query_as::<_, RefreshToken>(&format!(
        r#"
        SELECT {TOKEN_COLUMNS}
        FROM user_tokens
        WHERE token_hash = $1 AND NOT is_revoked AND expires_at > now()
        "#,
    ))
    .bind(token_hash)
    .fetch_optional(db)
    .await
}

fn consume_sql() -> String {
    format!(
        r#"
        UPDATE user_tokens
        SET is_revoked = TRUE
        WHERE token_hash = $1 AND NOT is_revoked AND expires_at > now()
        RETURNING {TOKEN_COLUMNS}
        "#,
    )
}

/// Atomic validate-and-revoke used by the rotation protocol: a single
/// conditional UPDATE that succeeds only while the row is unrevoked and
/// unexpired, so concurrent exchanges of the same value produce at most one
/// winner. Returns the consumed record, or `None` for miss/replay/expiry.
pub async fn consume(db: &PgPool, token_hash: &str) -> sqlx::Result<Option<RefreshToken>> {
    sqlx::query_as::<_, RefreshToken>(&consume_sql())
        .bind(token_hash)
        .fetch_optional(db)
        .await
}

/// Idempotent: revoking an already-revoked token affects zero rows and is
/// not an error.
pub async fn revoke(db: &PgPool, token_id: Uuid) -> sqlx::Result<u64> {
    let result = sqlx::query("UPDATE user_tokens SET is_revoked = TRUE WHERE id = $1 AND NOT is_revoked")
        .bind(token_id)
        .execute(db)
        .await?;
    Ok(result.rows_affected())
}

/// Hash-keyed revocation; unlike `validate` it also reaches rows that are
/// already expired.
pub async fn revoke_by_hash(db: &PgPool, token_hash: &str) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "UPDATE user_tokens SET is_revoked = TRUE WHERE token_hash = $1 AND NOT is_revoked",
    )
    .bind(token_hash)
    .execute(db)
    .await?;
    Ok(result.rows_affected())
}

/// Global sign-out: every live token the user holds.
pub async fn revoke_all(db: &PgPool, user_id: Uuid) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "UPDATE user_tokens SET is_revoked = TRUE WHERE user_id = $1 AND NOT is_revoked",
    )
    .bind(user_id)
    .execute(db)
    .await?;
    Ok(result.rows_affected())
}

pub async fn revoke_all_of_kind(db: &PgPool, user_id: Uuid, kind: TokenKind) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "UPDATE user_tokens SET is_revoked = TRUE WHERE user_id = $1 AND token_type = $2 AND NOT is_revoked",
    )
    .bind(user_id)
    .bind(kind)
    .execute(db)
    .await?;
    Ok(result.rows_affected())
}

/// Bulk GC; only deletes rows already excluded from `validate`, so it is
/// safe to run concurrently with live traffic.
pub async fn sweep_expired(db: &PgPool) -> sqlx::Result<u64> {
    let result = sqlx::query("DELETE FROM user_tokens WHERE expires_at < now()")
        .execute(db)
        .await?;
    Ok(result.rows_affected())
}

pub async fn sweep_revoked(db: &PgPool) -> sqlx::Result<u64> {
    let result = sqlx::query("DELETE FROM user_tokens WHERE is_revoked")
        .execute(db)
        .await?;
    Ok(result.rows_affected())
}

pub async fn active_count(db: &PgPool, user_id: Uuid) -> sqlx::Result<i64> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM user_tokens WHERE user_id = $1 AND NOT is_revoked AND expires_at > now()",
    )
    .bind(user_id)
    .fetch_one(db)
    .await
}

pub async fn active_refresh_tokens(db: &PgPool, user_id: Uuid) -> sqlx::Result<Vec<RefreshToken>> {
    sqlx::query_as::<_, RefreshToken>(&format!(
        r#"
        SELECT {TOKEN_COLUMNS}
        FROM user_tokens
        WHERE user_id = $1 AND token_type = 'refresh' AND NOT is_revoked AND expires_at > now()
        ORDER BY created_at DESC
        "#,
    ))
    .bind(user_id)
    .fetch_all(db)
    .await
}

pub async fn token_stats(db: &PgPool, user_id: Option<Uuid>) -> sqlx::Result<TokenStats> {
    let rows = match user_id {
        Some(id) => {
            sqlx::query_as::<_, RefreshToken>(&format!(
                "SELECT {TOKEN_COLUMNS} FROM user_tokens WHERE user_id = $1"
            ))
            .bind(id)
            .fetch_all(db)
            .await?
        }
        None => {
            sqlx::query_as::<_, RefreshToken>(&format!("SELECT {TOKEN_COLUMNS} FROM user_tokens"))
                .fetch_all(db)
                .await?
        }
    };
    Ok(summarize(&rows, OffsetDateTime::now_utc()))
}

pub fn summarize(tokens: &[RefreshToken], now: OffsetDateTime) -> TokenStats {
    TokenStats {
        total: tokens.len(),
        active: tokens.iter().filter(|t| t.is_valid_at(now)).count(),
        expired: tokens
            .iter()
            .filter(|t| !t.is_revoked && t.is_expired_at(now))
            .count(),
        revoked: tokens.iter().filter(|t| t.is_revoked).count(),
    }
}
