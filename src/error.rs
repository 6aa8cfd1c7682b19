use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Closed error taxonomy surfaced by the auth subsystem.
///
/// Everything the flows can fail with is translated into one of these at the
/// service boundary. Only `Crypto` is considered fatal to the process.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Federation profile is missing the fields needed to identify a user.
    #[error("federation profile is missing a usable email")]
    IncompleteProfile,

    /// RNG or hash primitive unavailable. Fatal, non-retryable.
    #[error("crypto primitive failure: {0}")]
    Crypto(String),

    /// Persistence failed mid-issuance; retry the whole issuance.
    #[error("token issuance failed: {0}")]
    TokenIssuance(String),

    /// Refresh token miss, expiry, revocation, or replay. The client is
    /// never told which.
    #[error("invalid or expired token")]
    InvalidOrExpiredToken,

    /// Access token failed signature, claims, or expiry checks.
    #[error("invalid access token")]
    InvalidAccessToken,

    /// A token referenced a user id with no backing record. Should not
    /// happen; logged server-side, surfaced to the client exactly like
    /// `InvalidOrExpiredToken`.
    #[error("user not found")]
    UserNotFound,

    /// Identity provider rejected or failed the code exchange.
    #[error("identity provider error: {0}")]
    Provider(String),

    /// Transient storage failure, surfaced to the caller as-is.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AuthError::IncompleteProfile => (
                StatusCode::BAD_REQUEST,
                "IncompleteProfile",
                self.to_string(),
            ),
            // UserNotFound must be indistinguishable from a bad token on the
            // wire; the anomaly is already logged where it was detected.
            AuthError::InvalidOrExpiredToken | AuthError::UserNotFound => (
                StatusCode::UNAUTHORIZED,
                "InvalidToken",
                "invalid or expired token".to_string(),
            ),
            AuthError::InvalidAccessToken => (
                StatusCode::UNAUTHORIZED,
                "InvalidToken",
                self.to_string(),
            ),
            AuthError::Provider(_) => (
                StatusCode::BAD_GATEWAY,
                "ProviderError",
                self.to_string(),
            ),
            AuthError::Crypto(_) | AuthError::TokenIssuance(_) | AuthError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalError",
                "internal error".to_string(),
            ),
        };

        (status, Json(ErrorBody { error: code, message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_not_found_renders_like_invalid_token() {
        let a = AuthError::UserNotFound.into_response();
        let b = AuthError::InvalidOrExpiredToken.into_response();
        assert_eq!(a.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(a.status(), b.status());
    }

    #[test]
    fn internal_errors_hide_detail() {
        let resp = AuthError::TokenIssuance("insert failed".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
